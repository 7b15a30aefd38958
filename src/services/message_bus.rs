//! In-process, single-[`crate::run_context::RunContext`] inter-agent messaging:
//! priority delivery, broadcast, request/response correlation, a per-recipient
//! circuit breaker, and a dead-letter list.
//!
//! Grounded on the lock-guarded-`HashMap` + `tokio::sync` style used
//! throughout this crate's service layer.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Mutex, RwLock};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::domain::models::message::{DeliveryStatus, Message, MessagePriority, MessageType};
use crate::domain::swarm_errors::BusError;

/// Consecutive callback failures before a recipient's circuit opens.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
/// How long an open circuit stays open before allowing a trial delivery.
pub const DEFAULT_RESET_TIMEOUT: StdDuration = StdDuration::from_secs(60);

/// Default subscription set assigned to every newly registered agent, shared
/// between `communication.py::register_agent` and
/// `base_agent.py::_get_subscribed_message_types` in the reference source.
#[must_use]
pub fn default_subscriptions() -> HashSet<MessageType> {
    HashSet::from([
        MessageType::Alert,
        MessageType::Request,
        MessageType::Help,
        MessageType::TaskDelegate,
        MessageType::Consensus,
    ])
}

/// Callback a registered agent is invoked through when a message is
/// dequeued for it. A failing callback counts against that agent's circuit
/// breaker; it never aborts delivery to other recipients.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Message) -> Result<(), String>;
}

/// Bus-wide delivery counters, queryable via [`MessageBus::get_stats`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BusStats {
    pub total_sent: u64,
    pub total_delivered: u64,
    pub total_dead_lettered: u64,
    pub total_acknowledged: u64,
    pub total_expired: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open { opened_at: chrono::DateTime<Utc> },
}

struct QueuedEnvelope {
    priority: MessagePriority,
    sequence: u64,
    message: Message,
}

impl PartialEq for QueuedEnvelope {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}
impl Eq for QueuedEnvelope {}

impl PartialOrd for QueuedEnvelope {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEnvelope {
    /// `BinaryHeap` pops the greatest element; we want the lowest
    /// `(priority, sequence)` pair delivered first, so the comparison is
    /// reversed on both fields.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

struct AgentEntry {
    subscriptions: RwLock<HashSet<MessageType>>,
    handler: Arc<dyn MessageHandler>,
    inbox: Mutex<std::collections::BinaryHeap<QueuedEnvelope>>,
    dispatching: Arc<Mutex<()>>,
    received: Mutex<VecDeque<Message>>,
    sent_ids: Mutex<Vec<Uuid>>,
    received_ids: Mutex<Vec<Uuid>>,
    circuit: Mutex<CircuitState>,
    failure_count: AtomicU64,
}

/// Configuration knobs for the per-recipient circuit breaker.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: StdDuration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            reset_timeout: DEFAULT_RESET_TIMEOUT,
        }
    }
}

/// Addressed and broadcast messaging for one run, isolated by
/// [`crate::run_context::RunContext`].
pub struct MessageBus {
    agents: RwLock<HashMap<String, Arc<AgentEntry>>>,
    history: RwLock<VecDeque<Message>>,
    dead_letters: RwLock<Vec<Message>>,
    pending_responses: Mutex<HashMap<Uuid, oneshot::Sender<Message>>>,
    sequence: AtomicU64,
    stats: RwLock<BusStats>,
    circuit_config: CircuitBreakerConfig,
}

const MAX_HISTORY: usize = 10_000;

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl MessageBus {
    #[must_use]
    pub fn new(circuit_config: CircuitBreakerConfig) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            history: RwLock::new(VecDeque::new()),
            dead_letters: RwLock::new(Vec::new()),
            pending_responses: Mutex::new(HashMap::new()),
            sequence: AtomicU64::new(0),
            stats: RwLock::new(BusStats::default()),
            circuit_config,
        }
    }

    /// Idempotent: a second registration for an already-known `agent_id` is
    /// a no-op on its queue/circuit state, mirroring
    /// `communication.py::register_agent`.
    #[instrument(skip(self, handler))]
    pub async fn register_agent(
        &self,
        agent_id: impl Into<String> + std::fmt::Debug,
        handler: Arc<dyn MessageHandler>,
        subscribe_to: Option<HashSet<MessageType>>,
    ) {
        let agent_id = agent_id.into();
        let mut agents = self.agents.write().await;
        agents.entry(agent_id).or_insert_with(|| {
            Arc::new(AgentEntry {
                subscriptions: RwLock::new(subscribe_to.unwrap_or_else(default_subscriptions)),
                handler,
                inbox: Mutex::new(std::collections::BinaryHeap::new()),
                dispatching: Arc::new(Mutex::new(())),
                received: Mutex::new(VecDeque::new()),
                sent_ids: Mutex::new(Vec::new()),
                received_ids: Mutex::new(Vec::new()),
                circuit: Mutex::new(CircuitState::Closed),
                failure_count: AtomicU64::new(0),
            })
        });
    }

    pub async fn subscribe(&self, agent_id: &str, types: impl IntoIterator<Item = MessageType>) {
        if let Some(agent) = self.agents.read().await.get(agent_id) {
            agent.subscriptions.write().await.extend(types);
        }
    }

    pub async fn unsubscribe(&self, agent_id: &str, types: Option<Vec<MessageType>>) {
        if let Some(agent) = self.agents.read().await.get(agent_id) {
            let mut subs = agent.subscriptions.write().await;
            match types {
                Some(types) => {
                    for t in types {
                        subs.remove(&t);
                    }
                }
                None => subs.clear(),
            }
        }
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, AtomicOrdering::SeqCst)
    }

    /// Resolves recipients for `message`: the single addressee if set,
    /// otherwise every agent subscribed to `message.kind` other than the
    /// sender.
    async fn resolve_recipients(&self, message: &Message) -> Vec<String> {
        if let Some(to) = &message.recipient {
            return vec![to.clone()];
        }
        let agents = self.agents.read().await;
        let mut out = Vec::new();
        for (id, entry) in agents.iter() {
            if id == &message.sender {
                continue;
            }
            if entry.subscriptions.read().await.contains(&message.kind) {
                out.push(id.clone());
            }
        }
        out
    }

    /// `true` if the recipient's circuit is open and the message should be
    /// dead-lettered instead of delivered. A half-open trial is granted
    /// (returns `false`, i.e. deliver) exactly once per `reset_timeout`
    /// window; its outcome is recorded by [`Self::record_outcome`].
    async fn circuit_blocks_delivery(&self, agent: &AgentEntry) -> bool {
        let mut state = agent.circuit.lock().await;
        match *state {
            CircuitState::Closed => false,
            CircuitState::Open { opened_at } => {
                let elapsed = Utc::now() - opened_at;
                if elapsed
                    >= chrono::Duration::from_std(self.circuit_config.reset_timeout)
                        .unwrap_or(chrono::Duration::zero())
                {
                    // Half-open: let this one through; keep the state as
                    // `Open` so concurrent senders queue behind the same
                    // trial rather than also tripping through.
                    *state = CircuitState::Open {
                        opened_at: Utc::now(),
                    };
                    false
                } else {
                    true
                }
            }
        }
    }

    async fn record_outcome(&self, agent: &AgentEntry, ok: bool) {
        if ok {
            agent.failure_count.store(0, AtomicOrdering::SeqCst);
            *agent.circuit.lock().await = CircuitState::Closed;
            return;
        }
        let failures = agent.failure_count.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        if failures >= u64::from(self.circuit_config.failure_threshold) {
            *agent.circuit.lock().await = CircuitState::Open {
                opened_at: Utc::now(),
            };
        }
    }

    async fn push_history(&self, message: Message) {
        let mut history = self.history.write().await;
        history.push_back(message);
        if history.len() > MAX_HISTORY {
            history.pop_front();
        }
    }

    async fn dead_letter(&self, mut message: Message) {
        message.delivery_status = DeliveryStatus::Failed;
        self.dead_letters.write().await.push(message.clone());
        self.stats.write().await.total_dead_lettered += 1;
        self.push_history(message).await;
    }

    /// Enqueues `message` for `agent_id` in priority-then-FIFO order. If no
    /// other caller is already draining that agent's inbox, spawns a task
    /// that drains it to empty; otherwise the message is left for the
    /// drain already in flight to pick up on its next pop.
    ///
    /// Spawning rather than draining inline means `send` returns as soon as
    /// a message is queued: a burst of sends issued back to back (even each
    /// one individually awaited) lands every message on the heap before any
    /// of them is dequeued, so the handler sees strict priority-then-FIFO
    /// order rather than send order.
    async fn deliver_to(self: &Arc<Self>, agent_id: &str, agent: Arc<AgentEntry>, message: Message) {
        {
            let mut inbox = agent.inbox.lock().await;
            inbox.push(QueuedEnvelope {
                priority: message.priority,
                sequence: self.next_sequence(),
                message,
            });
        }
        if let Ok(guard) = agent.dispatching.try_lock_owned() {
            let bus = Arc::clone(self);
            let agent_id = agent_id.to_string();
            tokio::spawn(Self::drain(bus, agent_id, agent, guard));
        }
    }

    /// Drains `agent`'s inbox to empty, invoking the handler once per
    /// dequeued message. Runs as its own task so the `send` call that
    /// triggered it isn't blocked on delivery; holding `_dispatch_guard`
    /// for the task's lifetime keeps at most one drain per agent running
    /// at a time.
    async fn drain(
        self: Arc<Self>,
        agent_id: String,
        agent: Arc<AgentEntry>,
        _dispatch_guard: tokio::sync::OwnedMutexGuard<()>,
    ) {
        loop {
            let next = {
                let mut inbox = agent.inbox.lock().await;
                inbox.pop()
            };
            let Some(envelope) = next else { break };
            self.process_envelope(&agent_id, &agent, envelope).await;
        }
    }

    async fn process_envelope(&self, agent_id: &str, agent: &AgentEntry, envelope: QueuedEnvelope) {
        let mut delivered = envelope.message;
        delivered.delivery_status = DeliveryStatus::Delivered;
        delivered.delivered_at = Some(Utc::now());

        if let Some(response_to) = delivered.response_to {
            let mut pending = self.pending_responses.lock().await;
            if let Some(waiter) = pending.remove(&response_to) {
                let _ = waiter.send(delivered.clone());
            }
        }

        let result = agent.handler.handle(delivered.clone()).await;
        self.record_outcome(agent, result.is_ok()).await;
        if let Err(err) = result {
            warn!(agent = agent_id, error = %err, "message handler failed");
        } else {
            self.stats.write().await.total_delivered += 1;
        }
        agent.received.lock().await.push_back(delivered.clone());
        agent.received_ids.lock().await.push(delivered.id);
        self.push_history(delivered).await;
    }

    /// Core send path used by [`Self::broadcast`] and
    /// [`Self::request_response`]. Returns the correlated response when
    /// `wait_for_response` is set on a directed message and one arrives
    /// before `timeout`.
    #[instrument(skip(self, message))]
    pub async fn send(
        self: &Arc<Self>,
        mut message: Message,
        wait_for_response: bool,
        timeout: Option<StdDuration>,
    ) -> Result<Option<Message>, BusError> {
        if wait_for_response {
            message.requires_response = true;
        }
        if message.is_expired(Utc::now()) {
            let mut expired = message;
            expired.delivery_status = DeliveryStatus::Expired;
            self.push_history(expired).await;
            self.stats.write().await.total_expired += 1;
            return Ok(None);
        }

        self.stats.write().await.total_sent += 1;
        if let Some(sender_entry) = self.agents.read().await.get(&message.sender) {
            sender_entry.sent_ids.lock().await.push(message.id);
        }

        let wants_response = wait_for_response && message.recipient.is_some();
        let response_rx = if wants_response {
            let (tx, rx) = oneshot::channel();
            self.pending_responses.lock().await.insert(message.id, tx);
            Some(rx)
        } else {
            None
        };

        let recipients = self.resolve_recipients(&message).await;
        for recipient_id in recipients {
            let Some(agent) = self.agents.read().await.get(&recipient_id).cloned() else {
                continue;
            };
            if self.circuit_blocks_delivery(&agent).await {
                self.dead_letter(message.clone()).await;
                continue;
            }
            self.deliver_to(&recipient_id, agent, message.clone()).await;
        }

        let Some(rx) = response_rx else { return Ok(None) };
        match timeout {
            Some(d) => match tokio::time::timeout(d, rx).await {
                Ok(Ok(response)) => Ok(Some(response)),
                _ => {
                    self.pending_responses.lock().await.remove(&message.id);
                    Err(BusError::ResponseTimeout(d))
                }
            },
            None => rx.await.map(Some).map_err(|_| BusError::MissingRecipient),
        }
    }

    /// Convenience wrapper over [`Self::send`] for a recipient-less
    /// (broadcast) message.
    pub async fn broadcast(
        self: &Arc<Self>,
        from: impl Into<String>,
        kind: MessageType,
        subject: impl Into<String>,
        payload: serde_json::Value,
        priority: MessagePriority,
    ) -> Result<(), BusError> {
        let message = Message::builder(from, kind)
            .subject(subject)
            .payload(payload)
            .priority(priority)
            .build();
        self.send(message, false, None).await.map(|_| ())
    }

    /// Convenience wrapper over [`Self::send`] that sets
    /// `requires_response` and awaits the correlated reply.
    pub async fn request_response(
        self: &Arc<Self>,
        from: impl Into<String>,
        to: impl Into<String>,
        kind: MessageType,
        subject: impl Into<String>,
        payload: serde_json::Value,
        timeout: StdDuration,
    ) -> Result<Option<Message>, BusError> {
        let message = Message::builder(from, kind)
            .to(to)
            .subject(subject)
            .payload(payload)
            .requires_response(true)
            .build();
        self.send(message, true, Some(timeout)).await
    }

    /// Pull-style receive: pops the oldest delivered message still sitting
    /// in `agent_id`'s received log, waiting up to `timeout` for one to
    /// arrive if the log is currently empty.
    pub async fn receive(&self, agent_id: &str, timeout: StdDuration) -> Option<Message> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(agent) = self.agents.read().await.get(agent_id) {
                if let Some(msg) = agent.received.lock().await.pop_front() {
                    return Some(msg);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
    }

    pub async fn receive_all(&self, agent_id: &str) -> Vec<Message> {
        if let Some(agent) = self.agents.read().await.get(agent_id) {
            let mut received = agent.received.lock().await;
            received.drain(..).collect()
        } else {
            Vec::new()
        }
    }

    pub async fn acknowledge(&self, agent_id: &str, message_id: Uuid) {
        let mut history = self.history.write().await;
        for msg in history.iter_mut().rev() {
            if msg.id == message_id {
                msg.delivery_status = DeliveryStatus::Acknowledged;
                break;
            }
        }
        drop(history);
        let _ = agent_id; // acknowledgment is bus-global; agent_id kept for API symmetry with the reference
        self.stats.write().await.total_acknowledged += 1;
    }

    pub async fn messages_by_conversation(&self, conversation_id: Uuid) -> Vec<Message> {
        self.history
            .read()
            .await
            .iter()
            .filter(|m| m.conversation_id == Some(conversation_id))
            .cloned()
            .collect()
    }

    pub async fn messages_by_type(&self, kind: MessageType) -> Vec<Message> {
        self.history
            .read()
            .await
            .iter()
            .filter(|m| m.kind == kind)
            .cloned()
            .collect()
    }

    pub async fn sent_by(&self, agent_id: &str) -> Vec<Uuid> {
        match self.agents.read().await.get(agent_id) {
            Some(agent) => agent.sent_ids.lock().await.clone(),
            None => Vec::new(),
        }
    }

    pub async fn received_by(&self, agent_id: &str) -> Vec<Uuid> {
        match self.agents.read().await.get(agent_id) {
            Some(agent) => agent.received_ids.lock().await.clone(),
            None => Vec::new(),
        }
    }

    pub async fn get_stats(&self) -> BusStats {
        *self.stats.read().await
    }

    pub async fn get_dead_letters(&self) -> Vec<Message> {
        self.dead_letters.read().await.clone()
    }

    pub async fn clear_dead_letters(&self) {
        self.dead_letters.write().await.clear();
    }

    pub async fn clear_history(&self) {
        self.history.write().await.clear();
    }

    pub async fn reset(&self) {
        self.agents.write().await.clear();
        self.history.write().await.clear();
        self.dead_letters.write().await.clear();
        self.pending_responses.lock().await.clear();
        *self.stats.write().await = BusStats::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AOrdering};

    struct RecordingHandler {
        received: Arc<std::sync::Mutex<Vec<MessagePriority>>>,
    }

    #[async_trait]
    impl MessageHandler for RecordingHandler {
        async fn handle(&self, message: Message) -> Result<(), String> {
            self.received.lock().unwrap().push(message.priority);
            Ok(())
        }
    }

    struct FailingHandler {
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler for FailingHandler {
        async fn handle(&self, _message: Message) -> Result<(), String> {
            if self.failures_left.fetch_sub(1, AOrdering::SeqCst) > 0 {
                Err("boom".into())
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn broadcast_excludes_sender_and_non_subscribers() {
        let bus = Arc::new(MessageBus::default());
        let received = Arc::new(std::sync::Mutex::new(Vec::new()));
        bus.register_agent(
            "r",
            Arc::new(RecordingHandler {
                received: received.clone(),
            }),
            Some(HashSet::from([MessageType::Alert])),
        )
        .await;
        bus.register_agent(
            "other",
            Arc::new(RecordingHandler {
                received: Arc::new(std::sync::Mutex::new(Vec::new())),
            }),
            Some(HashSet::new()),
        )
        .await;
        bus.broadcast(
            "r",
            MessageType::Alert,
            "s",
            serde_json::Value::Null,
            MessagePriority::Low,
        )
        .await
        .unwrap();
        assert!(received.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn priority_then_fifo_delivery_order() {
        let bus = Arc::new(MessageBus::default());
        let received = Arc::new(std::sync::Mutex::new(Vec::new()));
        bus.register_agent(
            "recipient",
            Arc::new(RecordingHandler {
                received: received.clone(),
            }),
            Some(HashSet::from([MessageType::Alert])),
        )
        .await;
        bus.register_agent(
            "sender",
            Arc::new(RecordingHandler {
                received: Arc::new(std::sync::Mutex::new(Vec::new())),
            }),
            None,
        )
        .await;

        for priority in [
            MessagePriority::Low,
            MessagePriority::Critical,
            MessagePriority::High,
        ] {
            let msg = Message::builder("sender", MessageType::Alert)
                .to("recipient")
                .priority(priority)
                .build();
            bus.send(msg, false, None).await.unwrap();
        }
        // All three sends land on the heap before the spawned drain task for
        // "recipient" gets polled; yield once so it runs to completion.
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        assert_eq!(
            *received.lock().unwrap(),
            vec![
                MessagePriority::Critical,
                MessagePriority::High,
                MessagePriority::Low
            ]
        );
    }

    #[tokio::test]
    async fn circuit_opens_after_threshold_and_dead_letters() {
        let bus = Arc::new(MessageBus::new(CircuitBreakerConfig {
            failure_threshold: 2,
            reset_timeout: StdDuration::from_secs(3600),
        }));
        bus.register_agent(
            "flaky",
            Arc::new(FailingHandler {
                failures_left: AtomicUsize::new(2),
            }),
            Some(HashSet::from([MessageType::Data])),
        )
        .await;
        bus.register_agent(
            "sender",
            Arc::new(RecordingHandler {
                received: Arc::new(std::sync::Mutex::new(Vec::new())),
            }),
            None,
        )
        .await;

        for _ in 0..2 {
            let msg = Message::builder("sender", MessageType::Data)
                .to("flaky")
                .build();
            bus.send(msg, false, None).await.unwrap();
            // Let the spawned drain task record this failure before the
            // next send's circuit check runs.
            tokio::time::sleep(StdDuration::from_millis(20)).await;
        }
        // Third message: circuit should now be open and dead-lettered.
        let msg = Message::builder("sender", MessageType::Data)
            .to("flaky")
            .build();
        bus.send(msg, false, None).await.unwrap();
        assert_eq!(bus.get_dead_letters().await.len(), 1);
    }

    #[tokio::test]
    async fn request_response_round_trips() {
        struct Echo;
        #[async_trait]
        impl MessageHandler for Echo {
            async fn handle(&self, _message: Message) -> Result<(), String> {
                Ok(())
            }
        }
        let bus = Arc::new(MessageBus::default());
        bus.register_agent("asker", Arc::new(Echo), None).await;
        bus.register_agent("answerer", Arc::new(Echo), None).await;

        let bus_clone = bus.clone();
        let responder = tokio::spawn(async move {
            let msg = bus_clone
                .receive("answerer", StdDuration::from_secs(1))
                .await
                .unwrap();
            let reply = msg.create_response("answerer", serde_json::json!({"ok": true}));
            bus_clone.send(reply, false, None).await.unwrap();
        });

        let response = bus
            .request_response(
                "asker",
                "answerer",
                MessageType::Query,
                "ping",
                serde_json::Value::Null,
                StdDuration::from_secs(1),
            )
            .await
            .unwrap();
        responder.await.unwrap();
        assert_eq!(response.unwrap().payload, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn broadcast_with_no_subscribers_increments_sent_not_delivered() {
        let bus = Arc::new(MessageBus::default());
        bus.broadcast(
            "lonely",
            MessageType::Heartbeat,
            "tick",
            serde_json::Value::Null,
            MessagePriority::Low,
        )
        .await
        .unwrap();
        let stats = bus.get_stats().await;
        assert_eq!(stats.total_sent, 1);
        assert_eq!(stats.total_delivered, 0);
    }
}
