use std::collections::HashMap;
use std::ops::Add;
use std::sync::{Arc, RwLock};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};

/// Liveness reporting for the long-running loops of a worker process.
///
/// Each loop registers a component with a deadline and must call
/// `report_healthy` more often than that deadline. The process is healthy
/// only when every registered component has a live `HealthyUntil` stamp;
/// a registry with no components is unhealthy.
#[derive(Default, Debug)]
pub struct HealthStatus {
    pub healthy: bool,
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    fn into_response(self) -> Response {
        let body = format!("{:?}", self);
        let code = if self.healthy {
            StatusCode::OK
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (code, body).into_response()
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ComponentStatus {
    /// Registered, no report yet.
    Starting,
    /// Healthy until the given instant.
    HealthyUntil(OffsetDateTime),
    Unhealthy,
    /// Missed its `HealthyUntil` deadline.
    Stalled,
}

#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    components: Arc<RwLock<HashMap<String, ComponentStatus>>>,
}

impl HealthHandle {
    pub async fn report_healthy(&self) {
        self.report_status(ComponentStatus::HealthyUntil(
            OffsetDateTime::now_utc().add(self.deadline),
        ))
        .await
    }

    pub async fn report_status(&self, status: ComponentStatus) {
        match self.components.write() {
            Ok(mut map) => {
                map.insert(self.component.clone(), status);
            }
            Err(_) => warn!("poisoned HealthRegistry lock"),
        }
    }
}

#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: Arc<RwLock<HashMap<String, ComponentStatus>>>,
}

impl HealthRegistry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            components: Default::default(),
        }
    }

    /// Register a component, starting in `ComponentStatus::Starting`.
    pub async fn register(&self, component: String, deadline: Duration) -> HealthHandle {
        let handle = HealthHandle {
            component,
            deadline,
            components: self.components.clone(),
        };
        handle.report_status(ComponentStatus::Starting).await;
        handle
    }

    /// Aggregate status, usable directly as an axum handler response.
    pub fn get_status(&self) -> HealthStatus {
        let now = OffsetDateTime::now_utc();
        let mut result = HealthStatus::default();

        match self.components.read() {
            Ok(components) => {
                result.healthy = !components.is_empty();
                for (name, status) in components.iter() {
                    let status = match status {
                        ComponentStatus::HealthyUntil(until) if *until > now => status.clone(),
                        ComponentStatus::HealthyUntil(_) => ComponentStatus::Stalled,
                        other => other.clone(),
                    };
                    if !matches!(status, ComponentStatus::HealthyUntil(_)) {
                        result.healthy = false;
                    }
                    result.components.insert(name.clone(), status);
                }
            }
            Err(_) => warn!("poisoned HealthRegistry lock"),
        }

        if result.healthy {
            info!("{} health check ok", self.name);
        } else {
            warn!("{} health check failed: {:?}", self.name, result.components);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ops::Sub;

    #[tokio::test]
    async fn empty_registry_is_unhealthy() {
        let registry = HealthRegistry::new("liveness");
        assert!(!registry.get_status().healthy);
    }

    #[tokio::test]
    async fn component_lifecycle() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry
            .register("pipeline".to_string(), Duration::seconds(30))
            .await;

        let status = registry.get_status();
        assert!(!status.healthy);
        assert_eq!(
            status.components.get("pipeline"),
            Some(&ComponentStatus::Starting)
        );

        handle.report_healthy().await;
        assert!(registry.get_status().healthy);

        handle.report_status(ComponentStatus::Unhealthy).await;
        let status = registry.get_status();
        assert!(!status.healthy);
        assert_eq!(
            status.components.get("pipeline"),
            Some(&ComponentStatus::Unhealthy)
        );
    }

    #[tokio::test]
    async fn missed_deadline_is_stalled() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry
            .register("pipeline".to_string(), Duration::seconds(30))
            .await;

        handle
            .report_status(ComponentStatus::HealthyUntil(
                OffsetDateTime::now_utc().sub(Duration::seconds(1)),
            ))
            .await;

        let status = registry.get_status();
        assert!(!status.healthy);
        assert_eq!(
            status.components.get("pipeline"),
            Some(&ComponentStatus::Stalled)
        );
    }

    #[tokio::test]
    async fn every_component_must_be_healthy() {
        let registry = HealthRegistry::new("liveness");
        let one = registry
            .register("one".to_string(), Duration::seconds(30))
            .await;
        let two = registry
            .register("two".to_string(), Duration::seconds(30))
            .await;

        one.report_healthy().await;
        assert!(!registry.get_status().healthy);

        two.report_healthy().await;
        assert!(registry.get_status().healthy);
    }

    #[tokio::test]
    async fn into_response() {
        let nok = HealthStatus::default().into_response();
        assert_eq!(nok.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let ok = HealthStatus {
            healthy: true,
            components: Default::default(),
        }
        .into_response();
        assert_eq!(ok.status(), StatusCode::OK);
    }
}
