//! Health check system for monitoring component status.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

/// A monitored part of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Component {
    /// Kafka polling
    Broker,
    /// Schema registry lookups
    Registry,
    /// Partition file writes
    Storage,
    /// Kafka offset commits
    Commits,
}

impl Component {
    pub const ALL: [Component; 4] = [
        Component::Broker,
        Component::Registry,
        Component::Storage,
        Component::Commits,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Broker => "broker",
            Component::Registry => "registry",
            Component::Storage => "storage",
            Component::Commits => "commits",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health status of a component.
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentStatus {
    /// Component is healthy
    Healthy,
    /// Component is degraded but operational
    Degraded(String),
    /// Component is unhealthy
    Unhealthy(String),
    /// Component status is unknown
    Unknown,
}

impl ComponentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentStatus::Healthy => "healthy",
            ComponentStatus::Degraded(_) => "degraded",
            ComponentStatus::Unhealthy(_) => "unhealthy",
            ComponentStatus::Unknown => "unknown",
        }
    }

    /// Reason attached to a degraded or unhealthy status.
    pub fn message(&self) -> Option<&str> {
        match self {
            ComponentStatus::Degraded(msg) | ComponentStatus::Unhealthy(msg) => Some(msg),
            _ => None,
        }
    }
}

/// Overall system health status.
#[derive(Debug, Clone, PartialEq)]
pub enum HealthStatus {
    /// All components healthy
    Healthy,
    /// Some components degraded
    Degraded,
    /// System is unhealthy
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

/// Health check manager for tracking component health.
pub struct HealthCheck {
    components: RwLock<BTreeMap<Component, ComponentStatus>>,
    started_at: Instant,
    job_running: RwLock<bool>,
}

impl HealthCheck {
    /// Create a health check with no registered components.
    pub fn new() -> Self {
        Self {
            components: RwLock::new(BTreeMap::new()),
            started_at: Instant::now(),
            job_running: RwLock::new(false),
        }
    }

    /// Create a health check with every pipeline component registered.
    pub fn for_pipeline() -> Self {
        let health = Self::new();
        for component in Component::ALL {
            health.register_component(component);
        }
        health
    }

    /// Register a component to track.
    pub fn register_component(&self, component: Component) {
        self.set(component, ComponentStatus::Unknown);
    }

    /// Mark a component as healthy.
    pub fn mark_healthy(&self, component: Component) {
        self.set(component, ComponentStatus::Healthy);
    }

    /// Mark a component as degraded.
    pub fn mark_degraded(&self, component: Component, reason: &str) {
        self.set(component, ComponentStatus::Degraded(reason.to_string()));
    }

    /// Mark a component as unhealthy.
    pub fn mark_unhealthy(&self, component: Component, reason: &str) {
        self.set(component, ComponentStatus::Unhealthy(reason.to_string()));
    }

    fn set(&self, component: Component, status: ComponentStatus) {
        self.components.write().insert(component, status);
    }

    /// Get the status of a specific component.
    pub fn get_component_status(&self, component: Component) -> Option<ComponentStatus> {
        self.components.read().get(&component).cloned()
    }

    /// Get all component statuses.
    pub fn get_all_statuses(&self) -> BTreeMap<Component, ComponentStatus> {
        self.components.read().clone()
    }

    /// Get overall system health status.
    pub fn overall_status(&self) -> HealthStatus {
        let components = self.components.read();

        let mut has_degraded = false;
        for status in components.values() {
            match status {
                ComponentStatus::Unhealthy(_) => return HealthStatus::Unhealthy,
                ComponentStatus::Degraded(_) => has_degraded = true,
                _ => {}
            }
        }

        if has_degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// Check if the system is operational (healthy or degraded).
    pub fn is_operational(&self) -> bool {
        matches!(
            self.overall_status(),
            HealthStatus::Healthy | HealthStatus::Degraded
        )
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Mark the ingestion job as started.
    pub fn job_started(&self) {
        *self.job_running.write() = true;
    }

    /// Mark the ingestion job as completed.
    pub fn job_completed(&self) {
        *self.job_running.write() = false;
    }

    /// Check if the ingestion job is running.
    pub fn is_job_running(&self) -> bool {
        *self.job_running.read()
    }
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_check_lifecycle() {
        let health = HealthCheck::new();

        health.register_component(Component::Broker);
        health.register_component(Component::Storage);

        assert_eq!(
            health.get_component_status(Component::Broker),
            Some(ComponentStatus::Unknown)
        );

        health.mark_healthy(Component::Broker);
        health.mark_healthy(Component::Storage);
        assert_eq!(health.overall_status(), HealthStatus::Healthy);

        health.mark_degraded(Component::Broker, "commit retry pending");
        assert_eq!(health.overall_status(), HealthStatus::Degraded);
        assert!(health.is_operational());

        health.mark_unhealthy(Component::Storage, "retries exhausted");
        assert_eq!(health.overall_status(), HealthStatus::Unhealthy);
        assert!(!health.is_operational());
    }

    #[test]
    fn test_for_pipeline_registers_all() {
        let health = HealthCheck::for_pipeline();
        let statuses = health.get_all_statuses();
        assert_eq!(statuses.len(), 4);
        assert!(statuses.values().all(|s| *s == ComponentStatus::Unknown));
        // Unknown does not make the system unhealthy
        assert_eq!(health.overall_status(), HealthStatus::Healthy);
    }

    #[test]
    fn test_health_check_unknown_component() {
        let health = HealthCheck::new();
        assert_eq!(health.get_component_status(Component::Registry), None);
    }

    #[test]
    fn test_health_check_job_lifecycle() {
        let health = HealthCheck::new();

        assert!(!health.is_job_running());

        health.job_started();
        assert!(health.is_job_running());

        health.job_completed();
        assert!(!health.is_job_running());
    }

    #[test]
    fn test_component_status_transitions() {
        let health = HealthCheck::new();
        health.register_component(Component::Commits);

        health.mark_degraded(Component::Commits, "warning");
        let status = health.get_component_status(Component::Commits).unwrap();
        assert_eq!(status.as_str(), "degraded");
        assert_eq!(status.message(), Some("warning"));

        health.mark_healthy(Component::Commits);
        assert_eq!(
            health.get_component_status(Component::Commits),
            Some(ComponentStatus::Healthy)
        );
    }
}
