//! # Chain Collaborators
//!
//! The engine never talks to a node directly. Everything it needs from the
//! outside world goes through two traits:
//!
//! - [`ChainStatus`] — transaction outcomes, account history pages,
//!   submission, and the account's on-chain encrypted balance.
//! - [`Decryptor`] — batched decryption of confidential amounts using the
//!   account's secret material.
//!
//! Both are `async` and may fail with [`ChainError::Unreachable`]; callers
//! treat that as transient and never let it change stored status.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transaction::reject_reason::RejectReasonTag;
use crate::transaction::types::{
    Amount, CredentialIndex, EncryptedAmount, TransactionHash, TransactionKind,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("unable to reach node: {0}")]
    Unreachable(String),

    #[error("malformed response from node: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("decryption failed: {0}")]
pub struct DecryptError(pub String);

// ---------------------------------------------------------------------------
// Transaction outcomes
// ---------------------------------------------------------------------------

/// Where the node currently sees a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockItemStatus {
    /// In the node's pending pool.
    Received,
    /// In at least one block, not yet finalized.
    Committed,
    Finalized,
    /// The node does not know the transaction (expired or dropped).
    Absent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionEffect {
    Success,
    Reject { tag: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub cost: Amount,
    pub result: ExecutionEffect,
}

/// Response of [`ChainStatus::transaction_outcome`]: the status plus one
/// execution result per block the transaction appears in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutcome {
    pub status: BlockItemStatus,
    pub outcomes: BTreeMap<String, ExecutionResult>,
}

impl TransactionOutcome {
    pub fn absent() -> Self {
        Self {
            status: BlockItemStatus::Absent,
            outcomes: BTreeMap::new(),
        }
    }

    pub fn received() -> Self {
        Self {
            status: BlockItemStatus::Received,
            outcomes: BTreeMap::new(),
        }
    }

    pub fn finalized(block_hash: &str, result: ExecutionResult) -> Self {
        Self {
            status: BlockItemStatus::Finalized,
            outcomes: BTreeMap::from([(block_hash.to_string(), result)]),
        }
    }

    /// Maps the node's answer to a terminal outcome, or `None` while the
    /// transaction is still in flight.
    ///
    /// A finalized transaction has exactly one outcome; a finalized status
    /// with none is a malformed response.
    pub fn terminal(&self) -> Result<Option<TerminalOutcome>, ChainError> {
        match self.status {
            BlockItemStatus::Received | BlockItemStatus::Committed => Ok(None),
            BlockItemStatus::Absent => Ok(Some(TerminalOutcome::Rejected)),
            BlockItemStatus::Finalized => {
                let (block_hash, result) = self.outcomes.iter().next().ok_or_else(|| {
                    ChainError::Malformed("finalized transaction without outcome".into())
                })?;
                let outcome = match &result.result {
                    ExecutionEffect::Success => TerminalOutcome::Finalized {
                        block_hash: block_hash.clone(),
                        cost: result.cost,
                    },
                    ExecutionEffect::Reject { tag } => TerminalOutcome::Failed {
                        block_hash: block_hash.clone(),
                        cost: result.cost,
                        reject_reason: RejectReasonTag::parse(tag),
                    },
                };
                Ok(Some(outcome))
            }
        }
    }
}

/// The final word on a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminalOutcome {
    Finalized {
        block_hash: String,
        cost: Amount,
    },
    Failed {
        block_hash: String,
        cost: Amount,
        reject_reason: RejectReasonTag,
    },
    /// Dropped before inclusion in any block.
    Rejected,
}

// ---------------------------------------------------------------------------
// Account history
// ---------------------------------------------------------------------------

/// Ciphertexts attached to an encrypted transfer in the history feed.
///
/// `Incoming` is what the receiver sees; `Outgoing` is what the sender
/// sees: the self amount before and after the transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncryptedEffect {
    Incoming {
        encrypted_amount: EncryptedAmount,
    },
    Outgoing {
        input_encrypted_amount: EncryptedAmount,
        new_self_encrypted_amount: EncryptedAmount,
    },
}

/// One entry of an account's history as reported by the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTransaction {
    /// Monotonic id in the history feed.
    pub id: u64,
    pub transaction_hash: TransactionHash,
    pub block_hash: String,
    pub kind: TransactionKind,
    pub from_address: Option<String>,
    pub to_address: Option<String>,
    /// Plaintext amount, when the transfer is not shielded.
    pub amount: Option<Amount>,
    pub cost: Option<Amount>,
    pub success: bool,
    /// Raw reject reason tag for failed transactions.
    pub reject_reason: Option<String>,
    pub encrypted: Option<EncryptedEffect>,
    pub memo: Option<String>,
}

/// A page of history, ascending by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPage {
    pub transactions: Vec<RemoteTransaction>,
    pub has_more: bool,
}

impl HistoryPage {
    pub fn max_id(&self) -> Option<u64> {
        self.transactions.iter().map(|t| t.id).max()
    }
}

/// The shielded part of an account's on-chain state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedEncryptedState {
    pub self_amount: EncryptedAmount,
    pub incoming_amounts: Vec<EncryptedAmount>,
}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ChainStatus: Send + Sync {
    async fn transaction_outcome(
        &self,
        hash: &TransactionHash,
    ) -> Result<TransactionOutcome, ChainError>;

    /// History entries of `address` with id strictly greater than
    /// `since_id`, at most `limit` of them.
    async fn account_history(
        &self,
        address: &str,
        since_id: u64,
        limit: u32,
    ) -> Result<HistoryPage, ChainError>;

    /// Broadcasts a serialized transaction. `Ok(false)` means the node
    /// refused it.
    async fn send_transaction(&self, bytes: &[u8]) -> Result<bool, ChainError>;

    async fn encrypted_state(&self, address: &str) -> Result<ObservedEncryptedState, ChainError>;
}

/// Secret material able to open an account's encrypted amounts.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretSeed(Vec<u8>);

impl SecretSeed {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SecretSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretSeed(<redacted>)")
    }
}

#[async_trait]
pub trait Decryptor: Send + Sync {
    /// Decrypts every ciphertext in one invocation. The result is
    /// positional: `result[i]` is the plaintext of `ciphertexts[i]`.
    async fn decrypt_batch(
        &self,
        ciphertexts: &[EncryptedAmount],
        seed: &SecretSeed,
        credential_index: CredentialIndex,
    ) -> Result<Vec<Amount>, DecryptError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::reject_reason::RejectReason;

    #[test]
    fn pending_statuses_are_not_terminal() {
        let mut outcome = TransactionOutcome::received();
        assert_eq!(outcome.terminal().unwrap(), None);
        outcome.status = BlockItemStatus::Committed;
        assert_eq!(outcome.terminal().unwrap(), None);
    }

    #[test]
    fn absent_means_rejected() {
        assert_eq!(
            TransactionOutcome::absent().terminal().unwrap(),
            Some(TerminalOutcome::Rejected)
        );
    }

    #[test]
    fn finalized_success_and_failure() {
        let ok = TransactionOutcome::finalized(
            "block",
            ExecutionResult {
                cost: Amount(1),
                result: ExecutionEffect::Success,
            },
        );
        assert_eq!(
            ok.terminal().unwrap(),
            Some(TerminalOutcome::Finalized {
                block_hash: "block".into(),
                cost: Amount(1)
            })
        );

        let failed = TransactionOutcome::finalized(
            "block",
            ExecutionResult {
                cost: Amount(3),
                result: ExecutionEffect::Reject {
                    tag: "AmountTooLarge".into(),
                },
            },
        );
        assert_eq!(
            failed.terminal().unwrap(),
            Some(TerminalOutcome::Failed {
                block_hash: "block".into(),
                cost: Amount(3),
                reject_reason: RejectReasonTag::Known(RejectReason::AmountTooLarge),
            })
        );
    }

    #[test]
    fn finalized_without_outcome_is_malformed() {
        let outcome = TransactionOutcome {
            status: BlockItemStatus::Finalized,
            outcomes: BTreeMap::new(),
        };
        assert!(matches!(outcome.terminal(), Err(ChainError::Malformed(_))));
    }

    #[test]
    fn seed_debug_is_redacted() {
        let seed = SecretSeed::new(vec![1, 2, 3]);
        assert_eq!(format!("{seed:?}"), "SecretSeed(<redacted>)");
    }
}
