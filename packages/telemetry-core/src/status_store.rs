//! Atomic JSON status-file persistence for long-running components.
//!
//! Each of the AudioHook ingress and the vendor connector owns one status
//! file (`audiohook_status.json`, `connector_status.json`) that the health
//! endpoints read to decide liveness. Writers serialize through a process-wide
//! mutex and always write a `.tmp` sibling then rename it into place, so a
//! concurrent reader never observes a partially-written file.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::clock::Clock;
use crate::error::{TelemetryError, TelemetryResult};

/// Lifecycle states a component's status file can report.
///
/// Mirrors the run-loop states of both the AudioHook ingress and the vendor
/// connector; not every component passes through every variant (the ingress
/// has no `subscribed`/`reconnecting` phase, for instance).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentState {
    Initialized,
    Starting,
    Connecting,
    Subscribed,
    Running,
    Reconnecting,
    Stopping,
    Stopped,
    Error,
}

impl ComponentState {
    /// States considered "alive" for readiness purposes, independent of freshness.
    fn is_alive(self) -> bool {
        matches!(
            self,
            Self::Running | Self::Subscribed | Self::Connecting | Self::Reconnecting | Self::Starting
        )
    }
}

/// A single component's status document.
///
/// `counters` holds per-component fields (`forwarded_chunks`,
/// `forward_failures`, `reconnect_count`, `topics_count`, `last_error`, ...)
/// that vary between the AudioHook ingress and the vendor connector and so
/// are not modeled as fixed struct fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRecord {
    pub state: ComponentState,
    pub updated_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub pid: u32,
    pub dry_run: bool,
    #[serde(flatten)]
    pub counters: Map<String, Value>,
}

impl StatusRecord {
    pub fn new(clock: &dyn Clock, dry_run: bool) -> Self {
        let now = clock.now_utc();
        Self {
            state: ComponentState::Initialized,
            updated_at: now,
            started_at: now,
            pid: process::id(),
            dry_run,
            counters: Map::new(),
        }
    }
}

/// Outcome of a readiness check against a status file.
pub struct HealthCheck {
    pub healthy: bool,
    pub state: ComponentState,
    pub age_seconds: i64,
    pub last_error: Option<String>,
}

/// A single status file, guarded by an in-process mutex for writers.
pub struct StatusStore {
    path: PathBuf,
    record: Mutex<StatusRecord>,
    clock: Arc<dyn Clock>,
}

impl StatusStore {
    /// Creates a store for `path`, writing the initial `initialized` record immediately.
    pub fn new(path: impl Into<PathBuf>, clock: Arc<dyn Clock>, dry_run: bool) -> TelemetryResult<Self> {
        let store = Self {
            path: path.into(),
            record: Mutex::new(StatusRecord::new(clock.as_ref(), dry_run)),
            clock,
        };
        store.persist()?;
        Ok(store)
    }

    /// Sets `state` (and bumps `updated_at`), then persists.
    pub fn set_state(&self, state: ComponentState) -> TelemetryResult<()> {
        {
            let mut record = self.record.lock();
            record.state = state;
            record.updated_at = self.clock.now_utc();
        }
        self.persist()
    }

    /// Records a human-readable error and flips state to `error`.
    pub fn set_error(&self, message: impl Into<String>) -> TelemetryResult<()> {
        {
            let mut record = self.record.lock();
            record.state = ComponentState::Error;
            record.updated_at = self.clock.now_utc();
            record
                .counters
                .insert("last_error".into(), Value::String(message.into()));
        }
        self.persist()
    }

    /// Increments a named counter field by `amount` (creating it at `amount` if absent).
    pub fn increment(&self, key: &str, amount: i64) -> TelemetryResult<()> {
        {
            let mut record = self.record.lock();
            let current = record
                .counters
                .get(key)
                .and_then(Value::as_i64)
                .unwrap_or(0);
            record
                .counters
                .insert(key.to_string(), Value::from(current + amount));
            record.updated_at = self.clock.now_utc();
        }
        self.persist()
    }

    /// Sets an arbitrary counter/metadata field to `value`.
    pub fn set_field(&self, key: &str, value: impl Into<Value>) -> TelemetryResult<()> {
        {
            let mut record = self.record.lock();
            record.counters.insert(key.to_string(), value.into());
            record.updated_at = self.clock.now_utc();
        }
        self.persist()
    }

    /// Returns a clone of the current in-memory record.
    pub fn snapshot(&self) -> StatusRecord {
        self.record.lock().clone()
    }

    /// Evaluates freshness/health directly against the in-memory record, for
    /// readiness checks sharing this process rather than re-reading the file
    /// (see [`read_health`] for the cross-process variant).
    pub fn health(&self, stale_after_seconds: u64) -> HealthCheck {
        let record = self.record.lock();
        let age_seconds = (self.clock.now_utc() - record.updated_at).num_seconds().max(0);
        let last_error = record
            .counters
            .get("last_error")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let healthy =
            record.state.is_alive() && record.state != ComponentState::Error && age_seconds <= stale_after_seconds as i64;
        HealthCheck {
            healthy,
            state: record.state,
            age_seconds,
            last_error,
        }
    }

    fn persist(&self) -> TelemetryResult<()> {
        let record = self.record.lock().clone();
        write_status_file(&self.path, &record)
    }
}

/// Writes `record` to `path` via a temp file + rename, creating parent directories as needed.
fn write_status_file(path: &Path, record: &StatusRecord) -> TelemetryResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_string_pretty(record)?;
    let tmp_path = path.with_extension(match path.extension() {
        Some(ext) => format!("{}.tmp", ext.to_string_lossy()),
        None => "tmp".to_string(),
    });
    std::fs::write(&tmp_path, body)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Reads a status file and evaluates its freshness, without holding a `StatusStore`.
///
/// Used by the SSE gateway's `/ready` handler, which reads the AudioHook and
/// connector status files written by sibling tasks (or sibling processes in a
/// multi-binary deployment) rather than sharing an in-process `StatusStore`.
pub fn read_health(path: &Path, clock: &dyn Clock, stale_after_seconds: u64) -> TelemetryResult<HealthCheck> {
    let body = std::fs::read_to_string(path).map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            TelemetryError::InternalError(format!("status file not found: {}", path.display()))
        } else {
            TelemetryError::from(err)
        }
    })?;
    let record: StatusRecord = serde_json::from_str(&body)?;
    let age_seconds = (clock.now_utc() - record.updated_at).num_seconds().max(0);
    let last_error = record
        .counters
        .get("last_error")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let healthy = record.state.is_alive()
        && record.state != ComponentState::Error
        && age_seconds <= stale_after_seconds as i64;
    Ok(HealthCheck {
        healthy,
        state: record.state,
        age_seconds,
        last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use std::time::Duration;

    fn clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::new(1_700_000_000_000))
    }

    #[test]
    fn writes_and_reads_back_initial_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audiohook_status.json");
        let clock = clock();
        let store = StatusStore::new(&path, clock.clone(), false).unwrap();
        store.set_state(ComponentState::Starting).unwrap();
        store.increment("forwarded_chunks", 3).unwrap();

        let health = read_health(&path, clock.as_ref(), 90).unwrap();
        assert!(health.healthy);
        assert_eq!(health.state, ComponentState::Starting);

        let snapshot = store.snapshot();
        assert_eq!(
            snapshot.counters.get("forwarded_chunks").and_then(Value::as_i64),
            Some(3)
        );
    }

    #[test]
    fn error_state_is_never_healthy_even_when_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connector_status.json");
        let clock = clock();
        let store = StatusStore::new(&path, clock.clone(), false).unwrap();
        store.set_error("token refresh failed").unwrap();

        let health = read_health(&path, clock.as_ref(), 90).unwrap();
        assert!(!health.healthy);
        assert_eq!(health.last_error.as_deref(), Some("token refresh failed"));
    }

    #[test]
    fn in_process_health_matches_file_based_read_health() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audiohook_status.json");
        let clock = clock();
        let store = StatusStore::new(&path, clock.clone(), false).unwrap();
        store.set_state(ComponentState::Running).unwrap();

        let in_process = store.health(90);
        let from_file = read_health(&path, clock.as_ref(), 90).unwrap();
        assert_eq!(in_process.healthy, from_file.healthy);
        assert_eq!(in_process.state, from_file.state);
    }

    #[test]
    fn stale_record_is_unhealthy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audiohook_status.json");
        let clock = clock();
        let store = StatusStore::new(&path, clock.clone(), false).unwrap();
        store.set_state(ComponentState::Running).unwrap();

        clock.advance(Duration::from_secs(200));

        let health = read_health(&path, clock.as_ref(), 90).unwrap();
        assert!(!health.healthy);
        assert!(health.age_seconds >= 200);
    }
}
