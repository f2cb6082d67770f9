use std::time;

use activity_common::state::StateError;
use http::StatusCode;
use thiserror::Error;

/// Errors fetching one entity's profile. The entity is skipped for the cycle.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("profile request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("profile source responded with {0}")]
    Status(StatusCode),
    #[error("profile response is not valid json: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("profile source returned an error: {0}")]
    Profile(String),
    #[error("fetch task failed: {0}")]
    Join(String),
}

impl FetchError {
    /// Label used for the `status` dimension of fetch metrics.
    pub fn label(&self) -> &'static str {
        match self {
            FetchError::Request(error) if error.is_timeout() => "timeout",
            FetchError::Request(_) => "request",
            FetchError::Status(_) => "status",
            FetchError::Decode(_) => "decode",
            FetchError::Profile(_) => "profile",
            FetchError::Join(_) => "join",
        }
    }
}

/// Errors handing a notification to the sink. Never rolls back dedup state.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("notification target is not a valid url: {0}")]
    InvalidTarget(#[from] url::ParseError),
    #[error("notification request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("notification sink responded with {0}")]
    Status(StatusCode),
    #[error("notification timed out after {0:?}")]
    Timeout(time::Duration),
}

/// Errors that stop the worker from starting.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("state error: {0}")]
    State(#[from] StateError),
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("invalid profile url: {0}")]
    ProfileUrl(#[from] url::ParseError),
}
