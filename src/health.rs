//! Process-wide component health registry.
//!
//! Components report `ok`/`error` as they run; the gateway exposes the
//! aggregate through `/health` and `/api/status`.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Starting,
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    pub updated_at: DateTime<Utc>,
    pub last_ok: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub error_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub components: BTreeMap<String, ComponentHealth>,
}

impl HealthSnapshot {
    /// True when no component is in the error state.
    pub fn is_healthy(&self) -> bool {
        self.components
            .values()
            .all(|c| c.status != ComponentStatus::Error)
    }
}

struct HealthRegistry {
    started: Instant,
    started_at: DateTime<Utc>,
    components: Mutex<BTreeMap<String, ComponentHealth>>,
}

fn registry() -> &'static HealthRegistry {
    static REGISTRY: OnceLock<HealthRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| HealthRegistry {
        started: Instant::now(),
        started_at: Utc::now(),
        components: Mutex::new(BTreeMap::new()),
    })
}

fn update(component: &str, apply: impl FnOnce(&mut ComponentHealth, DateTime<Utc>)) {
    let now = Utc::now();
    let mut components = registry().components.lock();
    let entry = components
        .entry(component.to_string())
        .or_insert_with(|| ComponentHealth {
            status: ComponentStatus::Starting,
            updated_at: now,
            last_ok: None,
            last_error: None,
            error_count: 0,
        });
    apply(entry, now);
    entry.updated_at = now;
}

pub fn mark_component_starting(component: &str) {
    update(component, |c, _| c.status = ComponentStatus::Starting);
}

pub fn mark_component_ok(component: &str) {
    update(component, |c, now| {
        c.status = ComponentStatus::Ok;
        c.last_ok = Some(now);
    });
}

pub fn mark_component_error(component: &str, error: impl ToString) {
    let message = crate::providers::sanitize_api_error(&error.to_string());
    update(component, |c, _| {
        c.status = ComponentStatus::Error;
        c.last_error = Some(message);
        c.error_count += 1;
    });
}

/// Seconds since the registry was first touched (process start in practice).
pub fn uptime_seconds() -> u64 {
    registry().started.elapsed().as_secs()
}

pub fn snapshot() -> HealthSnapshot {
    let registry = registry();
    HealthSnapshot {
        pid: std::process::id(),
        started_at: registry.started_at,
        uptime_seconds: registry.started.elapsed().as_secs(),
        components: registry.components.lock().clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The registry is process-global, so each test uses its own component names.

    #[test]
    fn component_transitions_are_recorded() {
        mark_component_starting("test-transitions");
        assert_eq!(
            snapshot().components["test-transitions"].status,
            ComponentStatus::Starting
        );

        mark_component_ok("test-transitions");
        let ok = snapshot().components["test-transitions"].clone();
        assert_eq!(ok.status, ComponentStatus::Ok);
        assert!(ok.last_ok.is_some());

        mark_component_error("test-transitions", "boom");
        let err = snapshot().components["test-transitions"].clone();
        assert_eq!(err.status, ComponentStatus::Error);
        assert_eq!(err.last_error.as_deref(), Some("boom"));
        assert_eq!(err.error_count, 1);
        assert!(err.last_ok.is_some());
    }

    #[test]
    fn error_messages_are_scrubbed() {
        mark_component_error("test-scrub", "bad key sk-abcdef123456");
        let c = snapshot().components["test-scrub"].clone();
        assert!(!c.last_error.unwrap().contains("sk-abcdef123456"));
    }

    #[test]
    fn snapshot_serializes_lowercase_status() {
        mark_component_ok("test-serialize");
        let json = serde_json::to_value(snapshot()).unwrap();
        assert_eq!(json["components"]["test-serialize"]["status"], "ok");
        assert_eq!(json["pid"], std::process::id());
    }

    #[test]
    fn healthy_only_without_errors() {
        let mut snap = snapshot();
        snap.components.clear();
        assert!(snap.is_healthy());
        snap.components.insert(
            "x".into(),
            ComponentHealth {
                status: ComponentStatus::Error,
                updated_at: Utc::now(),
                last_ok: None,
                last_error: Some("down".into()),
                error_count: 1,
            },
        );
        assert!(!snap.is_healthy());
    }
}
