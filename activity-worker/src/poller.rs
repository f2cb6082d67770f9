use std::time;

use activity_common::event::RawActivityRecord;
use activity_common::skills::{SkillTable, SkillValue};
use async_trait::async_trait;
use reqwest::header;
use serde::Deserialize;

use crate::error::{FetchError, WorkerError};

/// The part of a profile document the pipeline cares about.
#[derive(Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct Profile {
    #[serde(default)]
    pub activities: Vec<RawActivityRecord>,
    #[serde(default, rename = "skillvalues")]
    pub skill_values: Vec<SkillValue>,
    /// Set instead of the profile data for private or unknown profiles.
    #[serde(default)]
    pub error: Option<String>,
}

impl Profile {
    pub fn skill_table(&self) -> SkillTable {
        SkillTable::from_values(&self.skill_values)
    }
}

/// Source of profiles for tracked entities.
///
/// One call per entity per cycle, no retries: failures go back to the
/// pipeline, which skips that entity until the next cycle.
#[async_trait]
pub trait ProfileSource: Send + Sync {
    async fn fetch(&self, entity: &str) -> Result<Profile, FetchError>;
}

/// HTTP client for the public RuneMetrics profile endpoint.
pub struct RuneMetricsClient {
    client: reqwest::Client,
    url: reqwest::Url,
    activities: u32,
}

impl RuneMetricsClient {
    pub fn new(
        url: &str,
        request_timeout: time::Duration,
        activities: u32,
    ) -> Result<Self, WorkerError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent("activity-worker")
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            client,
            url: url.parse()?,
            activities,
        })
    }
}

#[async_trait]
impl ProfileSource for RuneMetricsClient {
    async fn fetch(&self, entity: &str) -> Result<Profile, FetchError> {
        let activities = self.activities.to_string();
        let response = self
            .client
            .get(self.url.clone())
            .query(&[("user", entity), ("activities", activities.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let body = response.bytes().await?;
        let mut profile: Profile = serde_json::from_slice(&body)?;

        match profile.error.take() {
            Some(error) => Err(FetchError::Profile(error)),
            None => Ok(profile),
        }
    }
}
