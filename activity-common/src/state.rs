use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::dedup::SeenEventSet;
use crate::event::TrackedEntity;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("failed to access state file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("state file {path} is not a valid state document: {source}")]
    Deserialize {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Everything the pipeline remembers between cycles and across restarts.
///
/// Owned by the orchestrator. The tracked entities and notification target
/// are registry data maintained by whoever handles user commands; the seen
/// set and watermark are only changed by the pipeline itself.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PipelineState {
    tracked: Vec<TrackedEntity>,
    notification_target: Option<String>,
    pub seen: SeenEventSet,
    pub last_checked: Option<DateTime<Utc>>,
}

impl PipelineState {
    pub fn tracked_entities(&self) -> &[TrackedEntity] {
        &self.tracked
    }

    pub fn notification_target(&self) -> Option<&str> {
        self.notification_target.as_deref()
    }

    /// Start tracking `name`. Returns `false` for blank or already tracked names.
    pub fn track(&mut self, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() || self.tracked.iter().any(|tracked| tracked == name) {
            return false;
        }
        self.tracked.push(name.to_owned());
        true
    }

    /// Stop tracking `name` and forget the identities seen for it.
    pub fn untrack(&mut self, name: &str) -> bool {
        let name = name.trim();
        let before = self.tracked.len();
        self.tracked.retain(|tracked| tracked != name);
        if self.tracked.len() == before {
            return false;
        }
        self.seen.remove_entity(name);
        true
    }

    pub fn set_notification_target(&mut self, target: Option<String>) {
        self.notification_target = target.filter(|target| !target.trim().is_empty());
    }

    /// Replace the registry fields with `registry`, forgetting the seen
    /// identities of entities that are no longer tracked.
    pub fn adopt_registry(&mut self, registry: Registry) {
        let dropped: Vec<TrackedEntity> = self
            .tracked
            .iter()
            .filter(|entity| !registry.tracked.contains(*entity))
            .cloned()
            .collect();
        for entity in &dropped {
            self.seen.remove_entity(entity);
        }

        self.tracked.clear();
        for entity in &registry.tracked {
            self.track(entity);
        }
        self.set_notification_target(registry.notification_target);
    }
}

/// The registry half of the state document: who to poll and where to post.
///
/// Maintained outside the worker; re-read from the state file every cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Registry {
    pub tracked: Vec<TrackedEntity>,
    pub notification_target: Option<String>,
}

/// On-disk layout of [`PipelineState`].
#[derive(Serialize, Deserialize, Debug, Default)]
struct StateDocument {
    #[serde(
        default,
        alias = "tracked_players",
        deserialize_with = "deserialize_players"
    )]
    players: Vec<String>,
    #[serde(
        default,
        alias = "notification_target",
        deserialize_with = "deserialize_target"
    )]
    channel: Option<String>,
    #[serde(default)]
    seen_events: Vec<String>,
    #[serde(default)]
    last_checked: Option<DateTime<Utc>>,
}

/// The registry fields of [`StateDocument`], without the seen list.
#[derive(Deserialize)]
struct RegistryDocument {
    #[serde(
        default,
        alias = "tracked_players",
        deserialize_with = "deserialize_players"
    )]
    players: Vec<String>,
    #[serde(
        default,
        alias = "notification_target",
        deserialize_with = "deserialize_target"
    )]
    channel: Option<String>,
}

/// Older state files store players as `{"<name>": true}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum PlayersField {
    List(Vec<String>),
    Map(serde_json::Map<String, serde_json::Value>),
}

fn deserialize_players<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let players = match Option::<PlayersField>::deserialize(deserializer)? {
        Some(PlayersField::List(players)) => players,
        Some(PlayersField::Map(players)) => players
            .into_iter()
            .filter(|(_, enabled)| enabled.as_bool() != Some(false))
            .map(|(name, _)| name)
            .collect(),
        None => Vec::new(),
    };
    Ok(players)
}

/// Targets may be stored as strings or as numeric channel ids.
#[derive(Deserialize)]
#[serde(untagged)]
enum TargetField {
    Text(String),
    Id(u64),
}

fn deserialize_target<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(
        Option::<TargetField>::deserialize(deserializer)?.map(|target| match target {
            TargetField::Text(text) => text,
            TargetField::Id(id) => id.to_string(),
        }),
    )
}

impl From<StateDocument> for PipelineState {
    fn from(document: StateDocument) -> Self {
        let mut state = PipelineState::default();
        for player in &document.players {
            state.track(player);
        }
        state.set_notification_target(document.channel);
        state.seen = SeenEventSet::from_identities(document.seen_events, &state.tracked);
        state.last_checked = document.last_checked;
        state
    }
}

impl From<&PipelineState> for StateDocument {
    fn from(state: &PipelineState) -> Self {
        Self {
            players: state.tracked.clone(),
            channel: state.notification_target.clone(),
            seen_events: state.seen.identities().map(str::to_owned).collect(),
            last_checked: state.last_checked,
        }
    }
}

/// Durable JSON storage for [`PipelineState`].
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the state document, or empty defaults if the file does not exist yet.
    pub async fn load(&self) -> Result<PipelineState, StateError> {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no state file found, starting empty");
                return Ok(PipelineState::default());
            }
            Err(source) => {
                return Err(StateError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let document: StateDocument =
            serde_json::from_slice(&contents).map_err(|source| StateError::Deserialize {
                path: self.path.clone(),
                source,
            })?;
        Ok(document.into())
    }

    /// Read only the registry fields of the state file. `None` if the file does
    /// not exist yet.
    pub async fn load_registry(&self) -> Result<Option<Registry>, StateError> {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StateError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let document: RegistryDocument =
            serde_json::from_slice(&contents).map_err(|source| StateError::Deserialize {
                path: self.path.clone(),
                source,
            })?;
        Ok(Some(Registry {
            tracked: document.players,
            notification_target: document.channel,
        }))
    }

    /// Merge a legacy seen-events file (a JSON array of identities) into `state`.
    ///
    /// A missing or corrupt legacy file contributes nothing.
    pub async fn import_legacy_seen(
        &self,
        state: &mut PipelineState,
        legacy_path: &Path,
    ) -> Result<usize, StateError> {
        let contents = match tokio::fs::read(legacy_path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(source) => {
                return Err(StateError::Io {
                    path: legacy_path.to_owned(),
                    source,
                })
            }
        };

        let identities: Vec<String> = match serde_json::from_slice(&contents) {
            Ok(identities) => identities,
            Err(e) => {
                warn!(path = %legacy_path.display(), error = %e, "ignoring corrupt legacy seen file");
                return Ok(0);
            }
        };

        let entities = state.tracked_entities().to_vec();
        Ok(state.seen.extend_attributed(identities, &entities))
    }

    /// Write the state atomically: temp file in the same directory, fsync, rename.
    ///
    /// The temp file is removed again when any step fails.
    pub async fn persist(&self, state: &PipelineState) -> Result<(), StateError> {
        let document = StateDocument::from(state);
        let contents = serde_json::to_vec_pretty(&document)?;

        let tmp = self.tmp_path();
        if let Err(source) = write_synced(&tmp, &contents).await {
            self.discard_tmp(&tmp).await;
            return Err(StateError::Io { path: tmp, source });
        }

        if let Err(source) = tokio::fs::rename(&tmp, &self.path).await {
            self.discard_tmp(&tmp).await;
            return Err(StateError::Io {
                path: self.path.clone(),
                source,
            });
        }
        Ok(())
    }

    async fn discard_tmp(&self, tmp: &Path) {
        match tokio::fs::remove_file(tmp).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %tmp.display(), error = %e, "failed to remove temp state file"),
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| "state.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

async fn write_synced(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(contents).await?;
    file.sync_all().await
}
