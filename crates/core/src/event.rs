//! Run events and the pipeline that fans them out.
//!
//! Every stage transition, tool call and model call appends an
//! [`AgentEvent`] to the run's own log and then hands it to every
//! subscriber. Two kinds of subscriber exist:
//!
//! - **Callbacks** run synchronously on the run's task and see the whole
//!   [`RunState`]. A panicking callback is logged and skipped.
//! - **Buffered streams** get a bounded `tokio::sync::mpsc` channel. Delivery
//!   uses `try_send`, so a slow consumer loses events (counted) instead of
//!   stalling the run. Order within a stream matches append order.

use crate::state::RunState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// The stage an event originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Planner,
    Executor,
    Reflector,
    Synthesizer,
    DocumentLoader,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::Executor => "executor",
            Self::Reflector => "reflector",
            Self::Synthesizer => "synthesizer",
            Self::DocumentLoader => "document_loader",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    NodeEnter,
    /// Carries `duration_ms`
    NodeExit,
    /// Carries `tool`, `success`, `duration_ms` and optionally `error`
    ToolCall,
    /// Carries `prompt_preview`
    LlmCallPending,
    /// Carries token counts and `duration_ms`
    LlmCall,
    DocumentLoad,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NodeEnter => "node_enter",
            Self::NodeExit => "node_exit",
            Self::ToolCall => "tool_call",
            Self::LlmCallPending => "llm_call_pending",
            Self::LlmCall => "llm_call",
            Self::DocumentLoad => "document_load",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A timestamped, structured record of one transition or external call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub stage: Stage,
    pub kind: EventKind,
    #[serde(default)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl AgentEvent {
    /// Look up a detail field.
    pub fn detail(&self, key: &str) -> Option<&serde_json::Value> {
        self.details.get(key)
    }
}

/// A synchronous event subscriber.
pub trait EventObserver: Send + Sync {
    fn on_event(&self, run: &RunState, event: &AgentEvent);
}

impl<F> EventObserver for F
where
    F: Fn(&RunState, &AgentEvent) + Send + Sync,
{
    fn on_event(&self, run: &RunState, event: &AgentEvent) {
        self(run, event)
    }
}

/// Handle returned by `subscribe*`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// The receiving end of a buffered subscription.
pub struct EventStream {
    pub id: SubscriptionId,
    pub receiver: mpsc::Receiver<AgentEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventStream {
    /// Events discarded because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[derive(Clone)]
enum Subscriber {
    Callback(Arc<dyn EventObserver>),
    Channel {
        sender: mpsc::Sender<AgentEvent>,
        dropped: Arc<AtomicU64>,
    },
}

/// Ordered event log writer plus observer fan-out.
pub struct EventPipeline {
    subscribers: RwLock<Vec<(SubscriptionId, Subscriber)>>,
    next_id: AtomicU64,
    channel_capacity: usize,
}

impl EventPipeline {
    /// Create a pipeline whose buffered subscribers hold `channel_capacity` events.
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            channel_capacity: channel_capacity.max(1),
        }
    }

    fn insert(&self, subscriber: Subscriber) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, subscriber));
        id
    }

    /// Register a synchronous observer.
    pub fn subscribe(&self, observer: impl EventObserver + 'static) -> SubscriptionId {
        self.insert(Subscriber::Callback(Arc::new(observer)))
    }

    /// Register an observer that is also held elsewhere.
    pub fn subscribe_shared(&self, observer: Arc<dyn EventObserver>) -> SubscriptionId {
        self.insert(Subscriber::Callback(observer))
    }

    /// Register a buffered subscriber with the default capacity.
    pub fn subscribe_buffered(&self) -> EventStream {
        self.subscribe_buffered_with_capacity(self.channel_capacity)
    }

    /// Register a buffered subscriber holding at most `capacity` undelivered events.
    pub fn subscribe_buffered_with_capacity(&self, capacity: usize) -> EventStream {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        let id = self.insert(Subscriber::Channel {
            sender,
            dropped: dropped.clone(),
        });
        EventStream {
            id,
            receiver,
            dropped,
        }
    }

    /// Remove a subscriber. Returns `false` if it was not registered.
    ///
    /// Unsubscribing a buffered stream closes its channel once pending
    /// events are drained.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() < before
    }

    /// Drop every subscriber.
    pub fn reset(&self) {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Timestamp an event, append it to the run log, then deliver it.
    pub fn append(
        &self,
        run: &mut RunState,
        stage: Stage,
        kind: EventKind,
        details: serde_json::Map<String, serde_json::Value>,
    ) {
        let event = AgentEvent {
            run_id: run.id.clone(),
            timestamp: Utc::now(),
            stage,
            kind,
            details,
        };
        run.events.push(event.clone());
        self.deliver(run, &event);
    }

    /// Shorthand for a `node_enter` event.
    pub fn node_enter(&self, run: &mut RunState, stage: Stage) {
        self.append(run, stage, EventKind::NodeEnter, serde_json::Map::new());
    }

    /// Shorthand for a `node_exit` event with its duration and extra details.
    pub fn node_exit(
        &self,
        run: &mut RunState,
        stage: Stage,
        duration_ms: f64,
        mut details: serde_json::Map<String, serde_json::Value>,
    ) {
        details.insert("duration_ms".into(), serde_json::json!(duration_ms));
        self.append(run, stage, EventKind::NodeExit, details);
    }

    fn deliver(&self, run: &RunState, event: &AgentEvent) {
        // Snapshot so observers may (un)subscribe from inside a callback.
        let snapshot: Vec<(SubscriptionId, Subscriber)> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut closed = Vec::new();
        for (id, subscriber) in snapshot {
            match subscriber {
                Subscriber::Callback(observer) => {
                    let outcome = catch_unwind(AssertUnwindSafe(|| observer.on_event(run, event)));
                    if outcome.is_err() {
                        warn!(subscription = id.0, kind = %event.kind, "Event observer panicked, skipping");
                    }
                }
                Subscriber::Channel { sender, dropped } => match sender.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        dropped.fetch_add(1, Ordering::Relaxed);
                        debug!(subscription = id.0, "Event buffer full, dropping event");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(id),
                },
            }
        }

        for id in closed {
            self.unsubscribe(id);
        }
    }
}

impl Default for EventPipeline {
    fn default() -> Self {
        Self::new(256)
    }
}
