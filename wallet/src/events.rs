//! # Domain Events
//!
//! The engine never calls back into a presentation layer. Every state change
//! worth showing is published as an [`EngineEvent`] on a broadcast channel;
//! whoever cares subscribes. Publishing with no subscribers is fine, and a
//! subscriber that falls behind sees `RecvError::Lagged` rather than
//! slowing the engine down.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::multisig::proposal::ProposalStatus;
use crate::transaction::types::{AccountStatus, TransactionHash, TransactionStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineEvent {
    TransactionStatusChanged {
        local_id: Uuid,
        hash: Option<TransactionHash>,
        status: TransactionStatus,
    },
    ProposalStatusChanged {
        id: u64,
        status: ProposalStatus,
    },
    AccountStatusChanged {
        address: String,
        status: AccountStatus,
    },
    /// Balance, ciphertexts, or credentials of an account changed.
    AccountUpdated {
        address: String,
    },
    /// The history view of `address` is known to be stale and being fetched.
    HistoryCatchingUp {
        address: String,
    },
    HistoryCaughtUp {
        address: String,
    },
}

/// Fan-out of [`EngineEvent`]s. Cheap to clone; clones share the channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn emit(&self, event: EngineEvent) {
        // No receivers is not an error.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_EVENT_CHANNEL_CAPACITY)
    }
}
