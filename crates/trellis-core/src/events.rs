//! # Event Bus
//!
//! Buffers node-change events per topic and dispatches them to listeners on
//! flush.
//!
//! Consecutive pushes to the same topic coalesce into one batch; a topic
//! switch starts a new batch, so ordering across topics is preserved and
//! entries are never merged non-adjacently. Delivery happens outside the
//! pending-list lock: a slow listener never stalls producers, and a listener
//! may safely push events from inside its callback — they land in the next
//! flush cycle.
//!
//! Listener lifetime is an explicit contract: whoever subscribes is
//! responsible for unsubscribing on teardown. There is no weak-reference
//! magic; a forgotten subscription keeps receiving batches.

use crate::types::{NodeId, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};

// =============================================================================
// EVENTS
// =============================================================================

/// What happened to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeEventKind {
    /// Node row created (not yet consistent).
    NodeCreated,
    /// Node finalized.
    NodeConsistent,
    /// Node renamed.
    NodeRenamed,
    /// Node reparented.
    NodeMoved,
    /// Description, metadata or version changed.
    NodeUpdated,
    /// A blob was written or removed.
    DataUpdated,
    /// A time series was created or removed.
    TimeSeriesUpdated,
    /// Chunks were appended to a time-series version.
    ChunksAdded,
    /// A dependency edge was added.
    DependencyAdded,
    /// A dependency edge was removed.
    DependencyRemoved,
    /// Node deleted.
    NodeDeleted,
}

/// One node-change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEvent {
    /// The node the change applies to.
    pub id: NodeId,
    /// The kind of change.
    pub kind: NodeEventKind,
}

impl NodeEvent {
    /// Create a new event.
    #[must_use]
    pub const fn new(id: NodeId, kind: NodeEventKind) -> Self {
        Self { id, kind }
    }
}

// =============================================================================
// LISTENERS
// =============================================================================

/// A delivery target for event batches.
///
/// Implementations must be thread-safe; the bus may be flushed from any
/// thread. A returned error is logged and isolated — it never aborts
/// delivery to other listeners or entries.
pub trait EventListener: Send + Sync {
    /// Deliver one topic's batch.
    fn on_events(&self, topic: &str, events: &[NodeEvent]) -> Result<(), StoreError>;
}

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

struct ListenerEntry {
    id: u64,
    /// Empty set = all topics.
    topics: BTreeSet<String>,
    listener: Arc<dyn EventListener>,
}

// =============================================================================
// BUS
// =============================================================================

struct PendingEntry {
    topic: String,
    events: Vec<NodeEvent>,
}

#[derive(Default)]
struct ListenerRegistry {
    next_id: u64,
    entries: Vec<ListenerEntry>,
}

/// The coalescing event bus.
///
/// One lock guards the pending-entry list, a second the listener registry;
/// neither is held during delivery.
#[derive(Default)]
pub struct EventBus {
    pending: Mutex<Vec<PendingEntry>>,
    registry: Mutex<ListenerRegistry>,
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for the given topics. An empty topic set receives
    /// every topic. The caller owns the subscription and must call
    /// [`EventBus::unsubscribe`] on teardown.
    pub fn subscribe(
        &self,
        listener: Arc<dyn EventListener>,
        topics: BTreeSet<String>,
    ) -> SubscriptionId {
        let mut registry = self
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let id = registry.next_id;
        registry.next_id = registry.next_id.saturating_add(1);
        registry.entries.push(ListenerEntry {
            id,
            topics,
            listener,
        });
        SubscriptionId(id)
    }

    /// Remove a subscription. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = registry.entries.len();
        registry.entries.retain(|entry| entry.id != id.0);
        registry.entries.len() != before
    }

    /// Buffer one event under a topic.
    ///
    /// When the most recently appended pending entry carries the same topic
    /// the event joins its batch; otherwise a new entry starts.
    pub fn push_event(&self, event: NodeEvent, topic: &str) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        match pending.last_mut() {
            Some(last) if last.topic == topic => last.events.push(event),
            _ => pending.push(PendingEntry {
                topic: topic.to_string(),
                events: vec![event],
            }),
        }
    }

    /// Number of pending entries (batches) awaiting the next flush.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Deliver all pending batches, in order, to every matching listener.
    ///
    /// The pending list is taken and cleared atomically under the lock, so
    /// pushes made during delivery accumulate for the next flush and a
    /// listener may call back into [`EventBus::push_event`] without
    /// deadlocking. A listener error is logged and skipped.
    pub fn flush(&self) {
        let entries = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *pending)
        };
        if entries.is_empty() {
            return;
        }

        let targets: Vec<(BTreeSet<String>, Arc<dyn EventListener>)> = {
            let registry = self
                .registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            registry
                .entries
                .iter()
                .map(|entry| (entry.topics.clone(), Arc::clone(&entry.listener)))
                .collect()
        };

        for entry in &entries {
            for (topics, listener) in &targets {
                if !topics.is_empty() && !topics.contains(&entry.topic) {
                    continue;
                }
                if let Err(e) = listener.on_events(&entry.topic, &entry.events) {
                    tracing::warn!(
                        topic = %entry.topic,
                        error = %e,
                        "event listener failed, continuing delivery"
                    );
                }
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("pending_entries", &self.pending_len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// TESTS
// =============================================================================
