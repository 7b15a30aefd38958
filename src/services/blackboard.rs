//! Reactive shared memory: versioned entries, glob subscriptions, TTL, and
//! category/agent indexes. One instance is owned per
//! [`crate::run_context::RunContext`]; a Redis-backed variant is documented
//! as a pluggable alternative behind [`BlackboardStore`] but not shipped.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::domain::models::blackboard::{BlackboardEntry, DataCategory, Subscription};

const MAX_HISTORY: usize = 10_000;
const DEFAULT_QUERY_LIMIT: usize = 100;

/// Callback invoked when a published entry matches a standing subscription's
/// pattern (and, if set, category filter).
#[async_trait]
pub trait BlackboardHandler: Send + Sync {
    async fn handle(&self, entry: BlackboardEntry);
}

/// Options accepted by [`Blackboard::publish`], grouped the way the
/// reference implementation's keyword-argument call does.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub ttl: Option<Duration>,
    pub tags: HashSet<String>,
    pub metadata: HashMap<String, JsonValue>,
    pub category: Option<DataCategory>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BlackboardStats {
    pub publishes: u64,
    pub deletes: u64,
    pub expired_evictions: u64,
}

#[derive(Debug, Clone)]
struct HistoryRecord {
    entry: BlackboardEntry,
}

struct SubscriptionRecord {
    record: Subscription,
    pattern: Regex,
    handler: Arc<dyn BlackboardHandler>,
}

struct Inner {
    entries: HashMap<String, BlackboardEntry>,
    metadata: HashMap<String, HashMap<String, JsonValue>>,
    category_index: HashMap<DataCategory, HashSet<String>>,
    agent_index: HashMap<String, HashSet<String>>,
    history: VecDeque<HistoryRecord>,
    stats: BlackboardStats,
}

/// A glob pattern (dots literal, `*` matching any run of characters,
/// including across dotted segments) compiled once and cached on the
/// subscription record.
fn compile_pattern(pattern: &str) -> Regex {
    let escaped_parts: Vec<String> = pattern.split('*').map(regex::escape).collect();
    let joined = escaped_parts.join(".*");
    Regex::new(&format!("^{joined}$")).unwrap_or_else(|_| Regex::new("$^").unwrap())
}

pub struct Blackboard {
    inner: tokio::sync::RwLock<Inner>,
    subscriptions: tokio::sync::RwLock<Vec<SubscriptionRecord>>,
}

impl Default for Blackboard {
    fn default() -> Self {
        Self::new()
    }
}

impl Blackboard {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: tokio::sync::RwLock::new(Inner {
                entries: HashMap::new(),
                metadata: HashMap::new(),
                category_index: HashMap::new(),
                agent_index: HashMap::new(),
                history: VecDeque::new(),
                stats: BlackboardStats::default(),
            }),
            subscriptions: tokio::sync::RwLock::new(Vec::new()),
        }
    }

    /// A no-op if the new value deep-equals the stored value (per
    /// [`serde_json::Value`]'s structural equality). Otherwise bumps the
    /// version, updates indexes, appends history, and fires matching
    /// subscriptions after the write lock is released.
    #[instrument(skip(self, value, options))]
    pub async fn publish(
        &self,
        key: impl Into<String>,
        value: JsonValue,
        agent_id: impl Into<String>,
        options: PublishOptions,
    ) -> BlackboardEntry {
        let key = key.into();
        let agent_id = agent_id.into();
        let now = Utc::now();

        let mut guard = self.inner.write().await;
        if let Some(existing) = guard.entries.get(&key) {
            if !existing.has_changed(&value) {
                return existing.clone();
            }
        }

        let previous = guard.entries.get(&key).cloned();
        let version = previous.as_ref().map_or(1, |p| p.version + 1);
        let entry = BlackboardEntry {
            key: key.clone(),
            value,
            agent_id: agent_id.clone(),
            timestamp: now,
            ttl: options.ttl,
            tags: options.tags,
            category: options.category,
            version,
            previous_value: previous.as_ref().map(|p| p.value.clone()),
        };

        if let Some(prev) = &previous {
            if prev.agent_id != agent_id {
                if let Some(set) = guard.agent_index.get_mut(&prev.agent_id) {
                    set.remove(&key);
                }
            }
            if prev.category != entry.category {
                if let Some(cat) = prev.category {
                    if let Some(set) = guard.category_index.get_mut(&cat) {
                        set.remove(&key);
                    }
                }
            }
        }
        if let Some(cat) = entry.category {
            guard.category_index.entry(cat).or_default().insert(key.clone());
        }
        guard
            .agent_index
            .entry(agent_id.clone())
            .or_default()
            .insert(key.clone());
        guard.metadata.insert(key.clone(), options.metadata);
        guard.entries.insert(key.clone(), entry.clone());
        guard.history.push_back(HistoryRecord {
            entry: entry.clone(),
        });
        if guard.history.len() > MAX_HISTORY {
            guard.history.pop_front();
        }
        guard.stats.publishes += 1;
        drop(guard);

        self.notify_subscribers(&entry).await;
        entry
    }

    async fn notify_subscribers(&self, entry: &BlackboardEntry) {
        let subs = self.subscriptions.read().await;
        for sub in subs.iter() {
            if sub.record.agent_id == entry.agent_id {
                continue;
            }
            if !sub.pattern.is_match(&entry.key) {
                continue;
            }
            if let Some(categories) = &sub.record.categories {
                match entry.category {
                    Some(cat) if categories.contains(&cat) => {}
                    _ => continue,
                }
            }
            sub.handler.handle(entry.clone()).await;
        }
    }

    /// Lazily evicts `key` if its entry has expired, returning `default`
    /// either way in that case.
    pub async fn get(&self, key: &str, default: Option<JsonValue>) -> Option<JsonValue> {
        self.get_entry(key).await.map(|e| e.value).or(default)
    }

    pub async fn get_entry(&self, key: &str) -> Option<BlackboardEntry> {
        let now = Utc::now();
        {
            let guard = self.inner.read().await;
            match guard.entries.get(key) {
                Some(entry) if !entry.is_expired(now) => return Some(entry.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        self.evict_expired_key(key).await;
        None
    }

    async fn evict_expired_key(&self, key: &str) {
        let mut guard = self.inner.write().await;
        if let Some(entry) = guard.entries.remove(key) {
            if let Some(cat) = entry.category {
                if let Some(set) = guard.category_index.get_mut(&cat) {
                    set.remove(key);
                }
            }
            if let Some(set) = guard.agent_index.get_mut(&entry.agent_id) {
                set.remove(key);
            }
            guard.stats.expired_evictions += 1;
        }
    }

    pub async fn get_many(&self, keys: &[String]) -> HashMap<String, Option<JsonValue>> {
        let mut out = HashMap::new();
        for key in keys {
            out.insert(key.clone(), self.get(key, None).await);
        }
        out
    }

    /// Anchored glob match over either the full live key set or, when
    /// `category` is set, that category's index. `limit` defaults to 100 and
    /// a literal `0` yields an empty result.
    pub async fn query(
        &self,
        pattern: &str,
        agent_id: Option<&str>,
        tags: Option<&HashSet<String>>,
        category: Option<DataCategory>,
        limit: Option<usize>,
    ) -> Vec<BlackboardEntry> {
        let limit = limit.unwrap_or(DEFAULT_QUERY_LIMIT);
        if limit == 0 {
            return Vec::new();
        }
        let regex = compile_pattern(pattern);
        let now = Utc::now();
        let guard = self.inner.read().await;

        let candidate_keys: Vec<&String> = match category {
            Some(cat) => guard.category_index.get(&cat).into_iter().flatten().collect(),
            None => guard.entries.keys().collect(),
        };

        let mut results = Vec::new();
        for key in candidate_keys {
            let Some(entry) = guard.entries.get(key) else { continue };
            if entry.is_expired(now) {
                continue;
            }
            if !regex.is_match(key) {
                continue;
            }
            if let Some(agent) = agent_id {
                if entry.agent_id != agent {
                    continue;
                }
            }
            if let Some(wanted) = tags {
                if !wanted.is_subset(&entry.tags) {
                    continue;
                }
            }
            results.push(entry.clone());
            if results.len() >= limit {
                break;
            }
        }
        results
    }

    pub async fn query_by_category(&self, category: DataCategory, limit: usize) -> Vec<BlackboardEntry> {
        self.query("*", None, None, Some(category), Some(limit)).await
    }

    pub async fn query_by_agent(&self, agent_id: &str, limit: usize) -> Vec<BlackboardEntry> {
        let guard = self.inner.read().await;
        let now = Utc::now();
        guard
            .agent_index
            .get(agent_id)
            .into_iter()
            .flatten()
            .filter_map(|key| guard.entries.get(key))
            .filter(|e| !e.is_expired(now))
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn subscribe(
        &self,
        pattern: impl Into<String>,
        agent_id: impl Into<String>,
        handler: Arc<dyn BlackboardHandler>,
        categories: Option<HashSet<DataCategory>>,
    ) -> Uuid {
        let pattern = pattern.into();
        let record = Subscription {
            id: Uuid::new_v4(),
            pattern: pattern.clone(),
            agent_id: agent_id.into(),
            categories,
            created_at: Utc::now(),
            trigger_count: 0,
        };
        let id = record.id;
        let compiled = compile_pattern(&pattern);
        self.subscriptions.write().await.push(SubscriptionRecord {
            record,
            pattern: compiled,
            handler,
        });
        id
    }

    pub async fn unsubscribe(&self, pattern: &str, agent_id: &str) {
        let mut subs = self.subscriptions.write().await;
        subs.retain(|s| !(s.record.pattern == pattern && s.record.agent_id == agent_id));
    }

    pub async fn unsubscribe_all(&self, agent_id: &str) {
        let mut subs = self.subscriptions.write().await;
        subs.retain(|s| s.record.agent_id != agent_id);
    }

    pub async fn delete(&self, key: &str) {
        let mut guard = self.inner.write().await;
        if let Some(entry) = guard.entries.remove(key) {
            if let Some(cat) = entry.category {
                if let Some(set) = guard.category_index.get_mut(&cat) {
                    set.remove(key);
                }
            }
            if let Some(set) = guard.agent_index.get_mut(&entry.agent_id) {
                set.remove(key);
            }
            guard.metadata.remove(key);
            guard.stats.deletes += 1;
        }
    }

    /// Clears every entry matching `pattern`, or everything if `pattern` is
    /// absent.
    pub async fn clear(&self, pattern: Option<&str>) {
        let keys: Vec<String> = {
            let guard = self.inner.read().await;
            match pattern {
                Some(p) => {
                    let regex = compile_pattern(p);
                    guard
                        .entries
                        .keys()
                        .filter(|k| regex.is_match(k))
                        .cloned()
                        .collect()
                }
                None => guard.entries.keys().cloned().collect(),
            }
        };
        for key in keys {
            self.delete(&key).await;
        }
    }

    /// Eagerly evicts every currently-expired entry, returning how many
    /// were removed.
    pub async fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<String> = {
            let guard = self.inner.read().await;
            guard
                .entries
                .iter()
                .filter(|(_, e)| e.is_expired(now))
                .map(|(k, _)| k.clone())
                .collect()
        };
        let count = expired.len();
        for key in expired {
            self.evict_expired_key(&key).await;
        }
        count
    }

    pub async fn get_all_keys(&self) -> Vec<String> {
        self.inner.read().await.entries.keys().cloned().collect()
    }

    pub async fn get_stats(&self) -> BlackboardStats {
        self.inner.read().await.stats
    }

    pub async fn get_history(
        &self,
        agent_id: Option<&str>,
        since: Option<DateTime<Utc>>,
        category: Option<DataCategory>,
        limit: Option<usize>,
    ) -> Vec<BlackboardEntry> {
        let guard = self.inner.read().await;
        let mut out: Vec<BlackboardEntry> = guard
            .history
            .iter()
            .rev()
            .filter(|r| agent_id.is_none_or(|a| r.entry.agent_id == a))
            .filter(|r| since.is_none_or(|s| r.entry.timestamp >= s))
            .filter(|r| category.is_none_or(|c| r.entry.category == Some(c)))
            .map(|r| r.entry.clone())
            .collect();
        if let Some(limit) = limit {
            out.truncate(limit);
        }
        out
    }

    pub async fn get_snapshot(&self) -> HashMap<String, BlackboardEntry> {
        self.inner.read().await.entries.clone()
    }

    pub async fn reset(&self) {
        let mut guard = self.inner.write().await;
        guard.entries.clear();
        guard.metadata.clear();
        guard.category_index.clear();
        guard.agent_index.clear();
        guard.history.clear();
        guard.stats = BlackboardStats::default();
        drop(guard);
        self.subscriptions.write().await.clear();
    }
}

/// Pluggable persistence boundary per spec §6/§9: an optional
/// Redis-backed implementation can sit behind this trait without changing
/// caller code, as long as it preserves the versioning and subscription
/// invariants `Blackboard` enforces in-memory.
#[async_trait]
pub trait BlackboardStore: Send + Sync {
    async fn publish(&self, entry: BlackboardEntry) -> BlackboardEntry;
    async fn get(&self, key: &str) -> Option<BlackboardEntry>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        seen: Arc<tokio::sync::Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl BlackboardHandler for Recorder {
        async fn handle(&self, entry: BlackboardEntry) {
            self.seen.lock().await.push(entry.key);
        }
    }

    #[tokio::test]
    async fn publish_idempotent_for_unchanged_value() {
        let bb = Blackboard::new();
        let e1 = bb
            .publish("k", serde_json::json!(1), "a", PublishOptions::default())
            .await;
        let e2 = bb
            .publish("k", serde_json::json!(1), "a", PublishOptions::default())
            .await;
        assert_eq!(e1.version, e2.version);
    }

    #[tokio::test]
    async fn version_increments_on_change() {
        let bb = Blackboard::new();
        bb.publish("k", serde_json::json!(1), "a", PublishOptions::default())
            .await;
        let e2 = bb
            .publish("k", serde_json::json!(2), "a", PublishOptions::default())
            .await;
        assert_eq!(e2.version, 2);
        assert_eq!(e2.previous_value, Some(serde_json::json!(1)));
    }

    #[tokio::test]
    async fn subscriber_never_notified_of_own_publish() {
        let bb = Blackboard::new();
        let seen = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        bb.subscribe("scout.*", "scout", Arc::new(Recorder { seen: seen.clone() }), None)
            .await;
        bb.publish(
            "scout.competitors.new",
            serde_json::json!({"urls": ["c1"]}),
            "scout",
            PublishOptions::default(),
        )
        .await;
        assert!(seen.lock().await.is_empty());
    }

    #[tokio::test]
    async fn glob_star_matches_across_dotted_segments() {
        let bb = Blackboard::new();
        let seen = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        bb.subscribe("a.*", "x", Arc::new(Recorder { seen: seen.clone() }), None)
            .await;
        bb.publish("a.b", serde_json::json!(1), "y", PublishOptions::default())
            .await;
        bb.publish("a.b.c", serde_json::json!(1), "y", PublishOptions::default())
            .await;
        bb.publish("z.b", serde_json::json!(1), "y", PublishOptions::default())
            .await;
        assert_eq!(*seen.lock().await, vec!["a.b", "a.b.c"]);
    }

    #[tokio::test]
    async fn ttl_expires_lazily_on_read() {
        let bb = Blackboard::new();
        bb.publish(
            "k",
            serde_json::json!(1),
            "a",
            PublishOptions {
                ttl: Some(Duration::milliseconds(1)),
                ..Default::default()
            },
        )
        .await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(bb.get("k", None).await.is_none());
    }

    #[tokio::test]
    async fn query_limit_zero_returns_empty() {
        let bb = Blackboard::new();
        bb.publish("k", serde_json::json!(1), "a", PublishOptions::default())
            .await;
        assert!(bb.query("*", None, None, None, Some(0)).await.is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_stops_future_notifications() {
        let bb = Blackboard::new();
        let seen = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        bb.subscribe("a.*", "x", Arc::new(Recorder { seen: seen.clone() }), None)
            .await;
        bb.unsubscribe("a.*", "x").await;
        bb.publish("a.b", serde_json::json!(1), "y", PublishOptions::default())
            .await;
        assert!(seen.lock().await.is_empty());
    }
}
