//! Pipeline orchestrator: one polling cycle at a time, driven by a fixed timer.
use std::sync::Arc;
use std::time;

use activity_common::classifier::classify;
use activity_common::event::{Event, TrackedEntity};
use activity_common::metrics::{
    CYCLE_DURATION, EVENTS_ACCEPTED, EVENTS_CLASSIFIED, EVENTS_DUPLICATE, EVENTS_OUT_OF_WINDOW,
    FETCHES, NOTIFICATIONS, PERSIST_FAILURES, SEEN_SET_SIZE,
};
use activity_common::state::{PipelineState, StateError, StateStore};
use activity_common::window::TimeWindow;
use chrono::{DateTime, Utc};
use health::HealthHandle;
use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::batcher::{Batcher, GroupingWindow};
use crate::error::FetchError;
use crate::notifier::Notifier;
use crate::poller::{Profile, ProfileSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub max_concurrent_fetches: usize,
    pub window: TimeWindow,
    pub grouping: GroupingWindow,
    /// Identities kept per entity partition of the dedup store.
    pub seen_retention: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: 4,
            window: TimeWindow::default(),
            grouping: GroupingWindow::Cycle,
            seen_retention: 5000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStage {
    Idle,
    Fetching,
    Classifying,
    Filtering,
    Grouping,
    Dispatching,
    Persisting,
}

/// What a single cycle did, for logging and tests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// No notification target was configured, so nothing was fetched.
    pub skipped: bool,
    pub entities: usize,
    pub fetch_failures: usize,
    pub classified: usize,
    pub duplicates: usize,
    pub out_of_window: usize,
    pub accepted: usize,
    pub notifications_sent: usize,
    pub notifications_failed: usize,
    pub pruned: usize,
}

pub struct Pipeline {
    state: PipelineState,
    store: StateStore,
    source: Arc<dyn ProfileSource>,
    notifier: Notifier,
    settings: PipelineSettings,
    stage: CycleStage,
}

impl Pipeline {
    pub fn new(
        state: PipelineState,
        store: StateStore,
        source: Arc<dyn ProfileSource>,
        notifier: Notifier,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            state,
            store,
            source,
            notifier,
            settings,
            stage: CycleStage::Idle,
        }
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn stage(&self) -> CycleStage {
        self.stage
    }

    fn enter(&mut self, stage: CycleStage) {
        debug!(from = ?self.stage, to = ?stage, "pipeline stage");
        self.stage = stage;
    }

    /// Run cycles on `interval` until `shutdown` is cancelled.
    ///
    /// Cancellation is only observed between cycles: a cycle that has started
    /// always runs through persisting.
    pub async fn run(
        mut self,
        interval: time::Duration,
        liveness: HealthHandle,
        shutdown: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("shutdown requested, stopping pipeline");
                    break;
                }
                _ = ticker.tick() => {}
            }

            match self.run_cycle(Utc::now()).await {
                Ok(report) if report.skipped => {}
                Ok(report) => info!(
                    entities = report.entities,
                    fetch_failures = report.fetch_failures,
                    classified = report.classified,
                    duplicates = report.duplicates,
                    out_of_window = report.out_of_window,
                    accepted = report.accepted,
                    sent = report.notifications_sent,
                    failed = report.notifications_failed,
                    pruned = report.pruned,
                    "cycle complete"
                ),
                Err(e) => error!(error = %e, "cycle failed to persist state"),
            }

            liveness.report_healthy().await;
        }
    }

    /// Run one full cycle as of `now`.
    ///
    /// Only a failure to persist is returned as an error. In that case the
    /// in-memory watermark is left where it was, while the identities marked
    /// during the cycle stay marked.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleReport, StateError> {
        let start = time::Instant::now();
        let mut report = CycleReport::default();

        self.reload_registry().await;

        let target = match self.state.notification_target() {
            Some(target) => target.to_owned(),
            None => {
                info!("no notification target set, skipping cycle");
                report.skipped = true;
                return Ok(report);
            }
        };

        self.enter(CycleStage::Fetching);
        let entities = self.state.tracked_entities().to_vec();
        report.entities = entities.len();
        let fetched = self.fetch_all(entities).await;

        self.enter(CycleStage::Classifying);
        let mut events = Vec::new();
        for (entity, result) in fetched {
            let profile = match result {
                Ok(profile) => profile,
                Err(e) => {
                    warn!(entity = %entity, error = %e, "skipping entity for this cycle");
                    report.fetch_failures += 1;
                    continue;
                }
            };

            let skills = profile.skill_table();
            for record in &profile.activities {
                let event = classify(&entity, record, &skills, now);
                metrics::counter!(EVENTS_CLASSIFIED, "kind" => event.kind.label()).increment(1);
                events.push(event);
            }
        }
        report.classified = events.len();

        self.enter(CycleStage::Filtering);
        let accepted = self.accept_new(events, now, &mut report);

        self.enter(CycleStage::Grouping);
        let mut batcher = Batcher::new(self.settings.grouping);
        for event in accepted {
            batcher.push(event);
        }
        let notifications = batcher.drain();

        self.enter(CycleStage::Dispatching);
        for notification in &notifications {
            match self.notifier.dispatch(&target, notification).await {
                Ok(()) => {
                    report.notifications_sent += 1;
                    metrics::counter!(NOTIFICATIONS, "status" => "ok").increment(1);
                }
                Err(e) => {
                    report.notifications_failed += 1;
                    metrics::counter!(NOTIFICATIONS, "status" => "error").increment(1);
                    warn!(
                        entity = notification.entity(),
                        kind = notification.label(),
                        error = %e,
                        "failed to dispatch notification"
                    );
                }
            }
        }

        self.enter(CycleStage::Persisting);
        report.pruned = self.state.seen.retain_latest(self.settings.seen_retention);

        let previous = self.state.last_checked;
        // Held back while any entity is missing from this cycle, so its
        // events are still in the window next time.
        if report.fetch_failures == 0 {
            self.state.last_checked = Some(now);
        }

        let persisted = self.store.persist(&self.state).await;
        self.enter(CycleStage::Idle);
        metrics::gauge!(SEEN_SET_SIZE).set(self.state.seen.len() as f64);
        metrics::histogram!(CYCLE_DURATION).record(start.elapsed().as_secs_f64());

        if let Err(e) = persisted {
            metrics::counter!(PERSIST_FAILURES).increment(1);
            self.state.last_checked = previous;
            return Err(e);
        }

        Ok(report)
    }

    /// Pick up registry edits made to the state file since the last cycle.
    ///
    /// A missing file keeps the registry seeded at startup. An unreadable one
    /// keeps the previous registry for this cycle.
    async fn reload_registry(&mut self) {
        match self.store.load_registry().await {
            Ok(Some(registry)) => {
                if registry.tracked != self.state.tracked_entities()
                    || registry.notification_target.as_deref()
                        != self.state.notification_target()
                {
                    info!(
                        players = registry.tracked.len(),
                        has_target = registry.notification_target.is_some(),
                        "registry changed on disk"
                    );
                }
                self.state.adopt_registry(registry);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "failed to reload registry, keeping the previous one"),
        }
    }

    /// Fetch every entity concurrently, at most `max_concurrent_fetches` at a
    /// time. Results come back in registry order.
    async fn fetch_all(
        &self,
        entities: Vec<TrackedEntity>,
    ) -> Vec<(TrackedEntity, Result<Profile, FetchError>)> {
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent_fetches.max(1)));
        let mut handles = Vec::with_capacity(entities.len());

        for entity in entities {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore has been closed");
            let source = self.source.clone();
            let task_entity = entity.clone();

            let handle = tokio::spawn(async move {
                let result = source.fetch(&task_entity).await;
                drop(permit);
                result
            });
            handles.push((entity, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (entity, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(FetchError::Join(e.to_string())),
            };

            let status = match &result {
                Ok(_) => "ok",
                Err(e) => e.label(),
            };
            metrics::counter!(FETCHES, "status" => status).increment(1);

            results.push((entity, result));
        }
        results
    }

    /// Drop already-seen and out-of-window events, marking the rest seen.
    ///
    /// Marking happens here, before anything is dispatched.
    fn accept_new(
        &mut self,
        events: Vec<Event>,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> Vec<Event> {
        let window = self.settings.window;
        let last_checked = self.state.last_checked;
        let mut accepted = Vec::new();

        for event in events {
            if self.state.seen.seen(&event.identity) {
                report.duplicates += 1;
                metrics::counter!(EVENTS_DUPLICATE).increment(1);
                continue;
            }

            if !window.in_window(&event, last_checked, now) {
                debug!(entity = %event.entity, event = %event, "event outside time window");
                report.out_of_window += 1;
                metrics::counter!(EVENTS_OUT_OF_WINDOW).increment(1);
                continue;
            }

            self.state
                .seen
                .mark_seen(&event.entity, event.identity.clone());
            report.accepted += 1;
            metrics::counter!(EVENTS_ACCEPTED).increment(1);
            accepted.push(event);
        }

        accepted
    }
}
