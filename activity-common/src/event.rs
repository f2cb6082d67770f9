use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tracked player name. Treated as an immutable key for one cycle.
pub type TrackedEntity = String;

/// Format of the `date` field in profile activities, e.g. `16-Oct-2026 12:05`.
/// The source omits the zone; values are UTC.
pub const SOURCE_DATE_FORMAT: &str = "%d-%b-%Y %H:%M";

/// One activity item exactly as the profile source returned it.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct RawActivityRecord {
    #[serde(default)]
    pub text: String,
    #[serde(default, rename = "date")]
    pub timestamp: String,
}

impl RawActivityRecord {
    pub fn new(text: &str, timestamp: &str) -> Self {
        Self {
            text: text.to_owned(),
            timestamp: timestamp.to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// `new_level` is `None` when neither the text nor the skill table knew it.
    LevelUp {
        skill: String,
        new_level: Option<u32>,
    },
    QuestCompleted {
        quest_name: String,
    },
    RareDrop {
        item: String,
        quantity: u32,
    },
    Generic {
        text: String,
    },
}

impl EventKind {
    /// Short label used for metrics and log fields.
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::LevelUp { .. } => "level_up",
            EventKind::QuestCompleted { .. } => "quest_completed",
            EventKind::RareDrop { .. } => "rare_drop",
            EventKind::Generic { .. } => "generic",
        }
    }
}

/// A classified activity for one tracked entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub entity: TrackedEntity,
    pub kind: EventKind,
    pub occurred_at: DateTime<Utc>,
    /// Dedup key, see [`event_identity`].
    pub identity: String,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.identity, self.kind.label())
    }
}

/// Trim and collapse runs of whitespace into single spaces.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Stable dedup key built from the entity, the normalized text and the raw date string.
///
/// The raw date is used verbatim so that records with unparsable dates still
/// produce the same identity on every fetch.
pub fn event_identity(entity: &str, text: &str, raw_timestamp: &str) -> String {
    format!("{}-{}-{}", entity, normalize_text(text), raw_timestamp)
}

/// Parse a source date (`DD-Mon-YYYY HH:MM`) as UTC.
pub fn parse_source_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw.trim(), SOURCE_DATE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Render a timestamp the way the source does, mostly useful for tests and fixtures.
pub fn format_source_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(SOURCE_DATE_FORMAT).to_string()
}
