use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::Allocation;

const CHANNEL_CAPACITY: usize = 256;

/// Event published to remote subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Notice {
    /// Tracking for this id has started; no decision has been made yet.
    Init { id: String },
    /// The record changed. `immediate` hints that delivery must not be
    /// batched. Terminal states arrive here exactly once, as the last
    /// notice for the id.
    Update {
        allocation: Allocation,
        immediate: bool,
    },
}

/// Sink the registry reports into. `init` fires once per admitted id before
/// any fit is attempted; `update` fires after every state-affecting
/// mutation, in mutation order, carrying the post-mutation snapshot.
/// Implementations must not block — the registry calls from inside its
/// critical section.
pub trait NotificationGate: Send + Sync {
    fn init(&self, id: &str);
    fn update(&self, allocation: &Allocation, immediate: bool);
}

/// Broadcast hub: a channel per allocation id plus a firehose channel
/// carrying every notice. Sends never block and are dropped when nobody
/// listens.
pub struct NotifyHub {
    channels: DashMap<String, broadcast::Sender<Notice>>,
    all: broadcast::Sender<Notice>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            all: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribe to notices for one id. Creates the channel if needed.
    pub fn subscribe(&self, id: &str) -> broadcast::Receiver<Notice> {
        let sender = self
            .channels
            .entry(id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Subscribe to every notice the registry emits.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Notice> {
        self.all.subscribe()
    }

    /// Remove a per-id channel once its allocation is finally resolved.
    pub fn remove(&self, id: &str) {
        self.channels.remove(id);
    }

    fn send(&self, id: &str, notice: Notice) {
        if let Some(sender) = self.channels.get(id) {
            let _ = sender.send(notice.clone());
        }
        let _ = self.all.send(notice);
    }
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationGate for NotifyHub {
    fn init(&self, id: &str) {
        self.send(id, Notice::Init { id: id.to_string() });
    }

    fn update(&self, allocation: &Allocation, immediate: bool) {
        self.send(
            &allocation.id,
            Notice::Update {
                allocation: allocation.clone(),
                immediate,
            },
        );
    }
}
