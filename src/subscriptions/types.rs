//! Subscription types for store change notifications.

use crate::diff::Diff;
use crate::types::{ChangeSource, Epoch};
use serde::{Deserialize, Serialize};

/// One committed transaction, as delivered to listeners.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoreChange {
    pub diff: Diff,
    pub source: ChangeSource,
    /// Store epoch after the commit.
    pub epoch: Epoch,
}

/// Filter criteria for listeners and subscriptions.
#[derive(Clone, Debug, Default)]
pub struct ChangeFilter {
    /// Only changes from these sources (None = all sources).
    pub sources: Option<Vec<ChangeSource>>,

    /// Only entries for these record kinds (None = all kinds).
    pub record_types: Option<Vec<String>>,
}

impl ChangeFilter {
    /// Every change.
    pub fn all() -> Self {
        Self::default()
    }

    /// Changes from the given sources.
    pub fn sources(sources: Vec<ChangeSource>) -> Self {
        Self {
            sources: Some(sources),
            ..Default::default()
        }
    }

    /// Changes made through the local API only.
    pub fn local() -> Self {
        Self::sources(vec![ChangeSource::Local])
    }

    /// Entries for the given record kinds.
    pub fn record_types(types: Vec<String>) -> Self {
        Self {
            record_types: Some(types),
            ..Default::default()
        }
    }

    /// Narrow a change to this filter. Returns None if nothing is left.
    pub fn apply(&self, change: &StoreChange) -> Option<StoreChange> {
        if let Some(ref sources) = self.sources {
            if !sources.contains(&change.source) {
                return None;
            }
        }

        match self.record_types {
            None => Some(change.clone()),
            Some(ref types) => {
                let diff = change.diff.filter_types(types);
                if diff.is_empty() {
                    None
                } else {
                    Some(StoreChange {
                        diff,
                        source: change.source,
                        epoch: change.epoch,
                    })
                }
            }
        }
    }
}

/// Configuration for a channel subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Max buffered events before dropping the subscriber.
    /// Default: 1000
    pub buffer_size: usize,

    /// Filter criteria.
    pub filter: ChangeFilter,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            filter: ChangeFilter::default(),
        }
    }
}

/// Events delivered over a subscription channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    /// A transaction was committed.
    Change { change: StoreChange },

    /// Subscription was dropped.
    Dropped { reason: DropReason },
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Receiver went away.
    Disconnected,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Identifier of a registered listener or subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(pub u64);

/// Handle to receive events from a channel subscription.
pub struct SubscriptionHandle {
    pub id: ListenerId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<StoreEvent>,
}

impl SubscriptionHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<StoreEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<StoreEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<StoreEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}
