use std::str::FromStr;
use std::time;

use activity_common::state::{PipelineState, StateStore};
use activity_common::window::TimeWindow;
use envconfig::Envconfig;
use tracing::info;

use crate::batcher::GroupingWindow;
use crate::error::WorkerError;
use crate::pipeline::PipelineSettings;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3310")]
    pub port: u16,

    #[envconfig(from = "STATE_PATH", default = "state.json")]
    pub state_path: String,

    #[envconfig(from = "LEGACY_SEEN_PATH")]
    pub legacy_seen_path: Option<String>,

    #[envconfig(
        from = "PROFILE_URL",
        default = "https://apps.runescape.com/runemetrics/profile/profile"
    )]
    pub profile_url: String,

    #[envconfig(from = "PROFILE_ACTIVITIES", default = "20")]
    pub profile_activities: u32,

    #[envconfig(from = "CHECK_INTERVAL", default = "600")]
    pub check_interval: EnvIntervalSecs,

    #[envconfig(from = "REQUEST_TIMEOUT", default = "10000")]
    pub request_timeout: EnvMsDuration,

    #[envconfig(from = "DISPATCH_TIMEOUT", default = "10000")]
    pub dispatch_timeout: EnvMsDuration,

    #[envconfig(from = "MAX_CONCURRENT_FETCHES", default = "4")]
    pub max_concurrent_fetches: usize,

    #[envconfig(from = "MAX_EVENT_AGE", default = "600")]
    pub max_event_age: EnvSecsDuration,

    #[envconfig(from = "WATERMARK_GRACE", default = "120")]
    pub watermark_grace: EnvSecsDuration,

    /// Level-up grouping bucket; zero groups over the whole cycle.
    #[envconfig(from = "GROUPING_WINDOW", default = "0")]
    pub grouping_window: EnvSecsDuration,

    #[envconfig(from = "SEEN_RETENTION", default = "5000")]
    pub seen_retention: usize,

    /// Comma separated player names added to the tracked set at startup.
    #[envconfig(from = "TRACKED_PLAYERS")]
    pub tracked_players: Option<String>,

    #[envconfig(from = "NOTIFICATION_TARGET")]
    pub notification_target: Option<String>,

    /// Log notifications instead of posting them.
    #[envconfig(from = "DRY_RUN", default = "false")]
    pub dry_run: bool,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The trailing cap never gets shorter than two intervals plus the grace,
    /// so an entity whose fetch failed once still has its events accepted on
    /// the following cycle.
    pub fn time_window(&self) -> TimeWindow {
        let floor = self
            .check_interval
            .0
            .checked_mul(2)
            .and_then(|twice| twice.checked_add(self.watermark_grace.0))
            .unwrap_or(time::Duration::MAX);
        let max_age = std::cmp::max(self.max_event_age.0, floor);

        TimeWindow::new(to_chrono(max_age), to_chrono(self.watermark_grace.0))
    }

    /// How long the pipeline may go without completing a cycle before
    /// liveness reports it stalled: four intervals.
    pub fn liveness_deadline(&self) -> Option<::time::Duration> {
        let deadline = self.check_interval.0.checked_mul(4)?;
        ::time::Duration::try_from(deadline).ok()
    }

    pub fn grouping(&self) -> GroupingWindow {
        if self.grouping_window.0.is_zero() {
            GroupingWindow::Cycle
        } else {
            GroupingWindow::Buckets(to_chrono(self.grouping_window.0))
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            max_concurrent_fetches: self.max_concurrent_fetches.max(1),
            window: self.time_window(),
            grouping: self.grouping(),
            // Never prune below one fetch worth of activities.
            seen_retention: self.seen_retention.max(self.profile_activities as usize),
        }
    }

    /// Load the persisted state, merge the legacy seen file and apply the
    /// registry seeds.
    pub async fn bootstrap_state(&self, store: &StateStore) -> Result<PipelineState, WorkerError> {
        let mut state = store.load().await?;

        if let Some(legacy) = &self.legacy_seen_path {
            let imported = store
                .import_legacy_seen(&mut state, std::path::Path::new(legacy))
                .await?;
            info!(imported, path = %legacy, "merged legacy seen events");
        }
        self.seed_registry(&mut state);

        // The pipeline re-reads the registry from disk every cycle, so the
        // seeds have to be on disk before the first one.
        store.persist(&state).await?;

        Ok(state)
    }

    /// Apply the registry seeds from the environment to a loaded state.
    pub fn seed_registry(&self, state: &mut PipelineState) {
        if let Some(players) = &self.tracked_players {
            for player in players.split(',') {
                state.track(player);
            }
        }
        if let Some(target) = &self.notification_target {
            state.set_notification_target(Some(target.to_owned()));
        }
    }
}

fn to_chrono(duration: time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvSecsDuration(pub time::Duration);

impl FromStr for EnvSecsDuration {
    type Err = ParseEnvDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let secs = s.parse::<u64>().map_err(|_| ParseEnvDurationError)?;

        Ok(EnvSecsDuration(time::Duration::from_secs(secs)))
    }
}

/// Longest accepted `CHECK_INTERVAL`, one week.
pub const MAX_CHECK_INTERVAL_SECS: u64 = 7 * 24 * 60 * 60;

/// A polling interval in seconds, between one second and a week.
#[derive(Debug, Clone, Copy)]
pub struct EnvIntervalSecs(pub time::Duration);

impl FromStr for EnvIntervalSecs {
    type Err = ParseEnvDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let secs = s.parse::<u64>().map_err(|_| ParseEnvDurationError)?;
        if secs == 0 || secs > MAX_CHECK_INTERVAL_SECS {
            return Err(ParseEnvDurationError);
        }

        Ok(EnvIntervalSecs(time::Duration::from_secs(secs)))
    }
}
