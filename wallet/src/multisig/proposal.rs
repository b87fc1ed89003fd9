//! Multi-signature proposal model.
//!
//! A [`Proposal`] wraps a transaction that needs signatures from several
//! independent key holders. Its status only moves forward:
//!
//! ```text
//! Open ──quorum + broadcast accepted──▶ Submitted ──▶ Finalized | Failed | Rejected
//!   └────────broadcast refused─────────▶ Failed
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::interchange::SignedTransaction;
use crate::transaction::reject_reason::RejectReasonTag;
use crate::transaction::types::{Amount, TransactionHash};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProposalStatus {
    Open,
    Submitted,
    Finalized,
    Failed,
    Rejected,
}

impl ProposalStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finalized | Self::Failed | Self::Rejected)
    }

    pub fn can_transition_to(self, next: ProposalStatus) -> bool {
        use ProposalStatus::*;
        matches!(
            (self, next),
            (Open, Submitted) | (Open, Failed) | (Submitted, Finalized | Failed | Rejected)
        )
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "Open",
            Self::Submitted => "Submitted",
            Self::Finalized => "Finalized",
            Self::Failed => "Failed",
            Self::Rejected => "Rejected",
        };
        f.write_str(s)
    }
}

/// Why a proposal ended up `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposalFailure {
    /// The node refused the broadcast.
    BroadcastRejected,
    /// Included in a block but execution failed.
    Execution(RejectReasonTag),
}

impl fmt::Display for ProposalFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BroadcastRejected => write!(f, "the node rejected the transaction"),
            Self::Execution(reason) => write!(f, "{reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: u64,
    pub transaction: SignedTransaction,
    pub status: ProposalStatus,
    /// Signatures needed before the proposal may be submitted.
    pub threshold: u32,
    /// Execution cost, once finalized.
    pub cost: Option<Amount>,
    pub failure: Option<ProposalFailure>,
    /// Known once submitted.
    pub transaction_hash: Option<TransactionHash>,
    pub created_at: DateTime<Utc>,
}

impl Proposal {
    pub fn new(id: u64, transaction: SignedTransaction, threshold: u32) -> Self {
        Self {
            id,
            transaction,
            status: ProposalStatus::Open,
            threshold,
            cost: None,
            failure: None,
            transaction_hash: None,
            created_at: Utc::now(),
        }
    }

    pub fn signature_count(&self) -> usize {
        self.transaction.signature_count()
    }

    pub fn has_quorum(&self) -> bool {
        self.signature_count() >= self.threshold as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ProposalStatus::*;

    #[test]
    fn forward_transitions_only() {
        assert!(Open.can_transition_to(Submitted));
        assert!(Open.can_transition_to(Failed));
        assert!(Submitted.can_transition_to(Finalized));
        assert!(Submitted.can_transition_to(Rejected));
        assert!(Submitted.can_transition_to(Failed));

        assert!(!Open.can_transition_to(Finalized));
        assert!(!Submitted.can_transition_to(Open));
        assert!(!Open.can_transition_to(Open));
    }

    #[test]
    fn terminal_states_go_nowhere() {
        for terminal in [Finalized, Failed, Rejected] {
            assert!(terminal.is_terminal());
            for next in [Open, Submitted, Finalized, Failed, Rejected] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn failure_display() {
        assert_eq!(
            ProposalFailure::Execution(RejectReasonTag::parse("Mystery")).to_string(),
            "Mystery"
        );
    }
}
