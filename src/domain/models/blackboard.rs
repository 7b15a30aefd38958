//! Shared-memory entry types for the [`crate::services::blackboard::Blackboard`].

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Closed set of categories an entry can be tagged with, used for the
/// category index and collaboration/insight routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataCategory {
    Competitor,
    Analysis,
    Threat,
    Opportunity,
    Score,
    Insight,
    Recommendation,
    Action,
    Meta,
}

/// A single versioned value published to the blackboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlackboardEntry {
    pub key: String,
    pub value: JsonValue,
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
    pub ttl: Option<Duration>,
    pub tags: HashSet<String>,
    pub category: Option<DataCategory>,
    pub version: u64,
    pub previous_value: Option<JsonValue>,
}

impl BlackboardEntry {
    /// `true` once `ttl` has elapsed since `timestamp`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.ttl.is_some_and(|ttl| now - self.timestamp > ttl)
    }

    /// Whether `candidate` differs from this entry's current value. Mirrors
    /// `BlackboardEntry.has_changed` in the reference implementation: a plain
    /// inequality check works for JSON values since `serde_json::Value`'s
    /// `PartialEq` already treats objects as unordered key sets.
    #[must_use]
    pub fn has_changed(&self, candidate: &JsonValue) -> bool {
        &self.value != candidate
    }
}

/// A standing subscription to blackboard updates whose key matches `pattern`
/// (a glob using `*` as a single wildcard segment, compiled to a regex by the
/// blackboard service).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: uuid::Uuid,
    pub pattern: String,
    pub agent_id: String,
    pub categories: Option<HashSet<DataCategory>>,
    pub created_at: DateTime<Utc>,
    pub trigger_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(value: JsonValue) -> BlackboardEntry {
        BlackboardEntry {
            key: "scout.competitors.new".into(),
            value,
            agent_id: "scout".into(),
            timestamp: Utc::now(),
            ttl: None,
            tags: HashSet::new(),
            category: Some(DataCategory::Analysis),
            version: 1,
            previous_value: None,
        }
    }

    #[test]
    fn unchanged_value_is_not_a_change() {
        let e = entry(serde_json::json!({"a": 1, "b": 2}));
        assert!(!e.has_changed(&serde_json::json!({"a": 1, "b": 2})));
    }

    #[test]
    fn changed_value_is_detected_regardless_of_key_order() {
        let e = entry(serde_json::json!({"a": 1, "b": 2}));
        assert!(e.has_changed(&serde_json::json!({"a": 1, "b": 3})));
    }

    #[test]
    fn ttl_expiry_is_relative_to_timestamp() {
        let mut e = entry(JsonValue::Null);
        e.ttl = Some(Duration::seconds(1));
        e.timestamp = Utc::now() - Duration::seconds(2);
        assert!(e.is_expired(Utc::now()));
    }
}
