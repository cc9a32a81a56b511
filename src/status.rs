//! Service health self-reports.
//!
//! The scraper pipeline and the web server each report their lifecycle state
//! here; the control plane answers `workerStatus` from this registry instead
//! of reaching into the running tasks.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use ts_rs::TS;

/// Lifecycle state a service reports for itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum ServiceStatus {
    Starting,
    Active,
    Disabled,
    Error,
}

/// The queue consumers' liveness triple, as the control plane reports it.
#[derive(Debug, Clone, Copy, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct WorkerState {
    pub is_alive: bool,
    pub is_paused: bool,
    pub is_running: bool,
}

/// Shared, lock-free registry of service self-reports.
#[derive(Clone, Default)]
pub struct ServiceStatusRegistry {
    inner: Arc<DashMap<&'static str, (ServiceStatus, Instant)>>,
}

impl ServiceStatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, name: &'static str, status: ServiceStatus) {
        self.inner.insert(name, (status, Instant::now()));
    }

    pub fn get(&self, name: &str) -> Option<ServiceStatus> {
        self.inner.get(name).map(|entry| entry.value().0)
    }

    /// Seconds since the named service last reported anything.
    pub fn report_age_secs(&self, name: &str) -> Option<u64> {
        self.inner
            .get(name)
            .map(|entry| entry.value().1.elapsed().as_secs())
    }

    /// Name/status pairs for the health endpoint.
    pub fn snapshot(&self) -> Vec<(String, ServiceStatus)> {
        self.inner
            .iter()
            .map(|entry| (entry.key().to_string(), entry.value().0))
            .collect()
    }

    /// Derive the scraper pool's worker state: alive once the scraper
    /// service has ever reported, paused while it is disabled for shutdown,
    /// running only while active.
    pub fn worker_state(&self) -> WorkerState {
        let scraper = self.get("scraper");
        WorkerState {
            is_alive: scraper.is_some(),
            is_paused: scraper == Some(ServiceStatus::Disabled),
            is_running: scraper == Some(ServiceStatus::Active),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_state_tracks_scraper_reports() {
        let registry = ServiceStatusRegistry::new();

        let state = registry.worker_state();
        assert!(!state.is_alive);
        assert!(!state.is_running);

        registry.set("scraper", ServiceStatus::Active);
        let state = registry.worker_state();
        assert!(state.is_alive);
        assert!(state.is_running);
        assert!(!state.is_paused);

        registry.set("scraper", ServiceStatus::Disabled);
        let state = registry.worker_state();
        assert!(state.is_alive);
        assert!(state.is_paused);
        assert!(!state.is_running);
    }
}
