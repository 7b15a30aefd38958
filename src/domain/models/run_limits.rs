//! Per-run identity, status, resource limits, and trace log, owned by
//! [`crate::run_context::RunContext`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// A 12-hex-character run identifier, matching the reference
/// implementation's truncated `uuid.uuid4()[:12]` convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub [u8; 6]);

impl RunId {
    #[must_use]
    pub fn generate() -> Self {
        let bytes = Uuid::new_v4().into_bytes();
        let mut id = [0u8; 6];
        id.copy_from_slice(&bytes[..6]);
        Self(id)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

/// Resource ceilings a run enforces on its own agents. Timeouts are
/// expressed in seconds to mirror the reference implementation's defaults
/// directly; the orchestrator converts them to [`std::time::Duration`] at
/// the call site.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RunLimits {
    pub llm_concurrency: usize,
    pub scrape_concurrency: usize,
    pub total_timeout_secs: f64,
    pub agent_timeout_secs: f64,
    pub llm_timeout_secs: f64,
    pub scrape_timeout_secs: f64,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            llm_concurrency: 5,
            scrape_concurrency: 3,
            total_timeout_secs: 180.0,
            agent_timeout_secs: 90.0,
            llm_timeout_secs: 60.0,
            scrape_timeout_secs: 30.0,
        }
    }
}

impl RunLimits {
    /// Per-agent timeout, allowing a future per-agent override map to take
    /// precedence over the blanket default (the orchestrator looks up a
    /// named override before falling back to `agent_timeout_secs`).
    #[must_use]
    pub fn agent_timeout(&self, override_secs: Option<f64>) -> std::time::Duration {
        std::time::Duration::from_secs_f64(override_secs.unwrap_or(self.agent_timeout_secs))
    }

    #[must_use]
    pub fn total_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.total_timeout_secs)
    }
}

/// A single entry in a run's execution trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub event_type: String,
    pub agent_id: Option<String>,
    pub data: JsonValue,
    pub timestamp: DateTime<Utc>,
}

/// Append-only log of everything that happened during a run, kept for
/// debugging and the `debug_snapshot` introspection endpoint. Disabled
/// (`enabled: false`) it becomes a no-op sink to avoid unbounded memory
/// growth on long-lived runs that don't need it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunTrace {
    pub enabled: bool,
    pub events: Vec<TraceEvent>,
}

impl RunTrace {
    #[must_use]
    pub const fn new(enabled: bool) -> Self {
        Self {
            enabled,
            events: Vec::new(),
        }
    }

    pub fn log(&mut self, event_type: impl Into<String>, agent_id: Option<String>, data: JsonValue) {
        if !self.enabled {
            return;
        }
        self.events.push(TraceEvent {
            event_type: event_type.into(),
            agent_id,
            data,
            timestamp: Utc::now(),
        });
    }

    #[must_use]
    pub fn events_for(&self, agent_id: &str) -> Vec<&TraceEvent> {
        self.events
            .iter()
            .filter(|e| e.agent_id.as_deref() == Some(agent_id))
            .collect()
    }
}
