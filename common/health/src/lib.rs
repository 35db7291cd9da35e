//! A simple health-check registry.
//!
//! Components register a named liveness check with a maximum time-to-live;
//! each check reports healthy by calling back into its handle on some
//! schedule of its own choosing. The registry is considered healthy overall
//! only while every registered check has reported within its TTL.

use std::collections::HashMap;
use std::sync::Arc;

use time::{Duration, OffsetDateTime};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ComponentStatus {
    pub healthy: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct Status {
    pub healthy: bool,
    pub components: HashMap<String, ComponentStatus>,
}

#[derive(Debug)]
struct Check {
    ttl: Duration,
    last_reported: OffsetDateTime,
}

/// A handle given to a component at registration time. The component is
/// expected to call `report_healthy` on an interval shorter than its `ttl`.
#[derive(Clone)]
pub struct HealthHandle {
    name: String,
    registry: HealthRegistry,
}

impl HealthHandle {
    pub async fn report_healthy(&self) {
        self.registry.report_healthy(&self.name).await;
    }
}

/// A registry of named liveness checks, shared across a process via `Clone`.
#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    checks: Arc<RwLock<HashMap<String, Check>>>,
}

impl HealthRegistry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            checks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a new named check with a given time-to-live, returning a
    /// handle the owning component uses to report liveness.
    pub async fn register(&self, name: String, ttl: Duration) -> HealthHandle {
        let mut checks = self.checks.write().await;
        checks.insert(
            name.clone(),
            Check {
                ttl,
                last_reported: OffsetDateTime::now_utc(),
            },
        );

        HealthHandle {
            name,
            registry: self.clone(),
        }
    }

    async fn report_healthy(&self, name: &str) {
        let mut checks = self.checks.write().await;
        if let Some(check) = checks.get_mut(name) {
            check.last_reported = OffsetDateTime::now_utc();
        }
    }

    /// Snapshot the current status of every registered check.
    pub async fn get_status(&self) -> Status {
        let checks = self.checks.read().await;
        let now = OffsetDateTime::now_utc();

        let mut components = HashMap::with_capacity(checks.len());
        let mut healthy = true;

        for (name, check) in checks.iter() {
            let component_healthy = now - check.last_reported <= check.ttl;
            healthy &= component_healthy;
            components.insert(
                name.clone(),
                ComponentStatus {
                    healthy: component_healthy,
                },
            );
        }

        Status { healthy, components }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_registry_starts_healthy() {
        let registry = HealthRegistry::new("test");
        let handle = registry.register("worker".to_string(), Duration::seconds(30)).await;
        handle.report_healthy().await;

        let status = registry.get_status().await;
        assert!(status.healthy);
        assert!(status.components["worker"].healthy);
    }

    #[tokio::test]
    async fn test_registry_unhealthy_after_ttl_elapses() {
        let registry = HealthRegistry::new("test");
        let _handle = registry
            .register("worker".to_string(), Duration::milliseconds(5))
            .await;

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let status = registry.get_status().await;
        assert!(!status.healthy);
        assert!(!status.components["worker"].healthy);
    }

    #[tokio::test]
    async fn test_multiple_components_all_must_be_healthy() {
        let registry = HealthRegistry::new("test");
        let a = registry.register("a".to_string(), Duration::seconds(30)).await;
        let _b = registry.register("b".to_string(), Duration::milliseconds(5)).await;
        a.report_healthy().await;

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let status = registry.get_status().await;
        assert!(!status.healthy);
        assert!(status.components["a"].healthy);
        assert!(!status.components["b"].healthy);
    }
}
