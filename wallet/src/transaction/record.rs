//! Local record of a transaction affecting an account.
//!
//! A [`TransferTransaction`] is created `Pending` when the wallet submits a
//! transaction, or when it first sees one in the account's remote history.
//! From there, two writers own disjoint fields:
//!
//! - the status poller moves `status` to a terminal value exactly once, via
//!   [`TransferTransaction::apply_terminal`], recording cost, block, and
//!   reject reason;
//! - the balance reconciler fills `decrypted_amount`.
//!
//! Both operations return a new record instead of mutating in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::reject_reason::RejectReasonTag;
use super::types::{Amount, EncryptedAmount, TransactionHash, TransactionKind, TransactionStatus};
use crate::chain::{EncryptedEffect, RemoteTransaction, TerminalOutcome};
use crate::multisig::interchange::AccountTransactionWithSignature;

/// The self encrypted amount a locally submitted shielded operation leaves
/// behind once it finalizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShieldedConsequence {
    pub new_self_encrypted_amount: EncryptedAmount,
    pub remaining_decrypted_amount: Option<Amount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTransaction {
    pub local_id: Uuid,
    pub transaction_hash: Option<TransactionHash>,
    /// Id in the remote history feed, once observed there.
    pub remote_id: Option<u64>,
    pub status: TransactionStatus,
    pub kind: TransactionKind,
    pub from_address: String,
    pub to_address: Option<String>,
    pub amount: Amount,
    pub cost: Option<Amount>,
    pub reject_reason: Option<RejectReasonTag>,
    pub block_hash: Option<String>,
    pub encrypted_effect: Option<EncryptedEffect>,
    pub shielded_consequence: Option<ShieldedConsequence>,
    pub decrypted_amount: Option<Amount>,
    pub memo: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TransferTransaction {
    /// Record for a transaction this wallet just submitted.
    ///
    /// The plaintext of an outgoing shielded transfer is known to the
    /// sender, so it is cached right away.
    pub fn from_submission(signed: &AccountTransactionWithSignature, hash: TransactionHash) -> Self {
        let tx = &signed.transaction;
        let kind = tx.kind();
        let amount = tx.payload.amount();

        Self {
            local_id: Uuid::new_v4(),
            transaction_hash: Some(hash),
            remote_id: None,
            status: TransactionStatus::Pending,
            kind,
            from_address: tx.sender.clone(),
            to_address: tx.payload.to_address().map(str::to_string),
            amount,
            cost: None,
            reject_reason: None,
            block_hash: None,
            encrypted_effect: None,
            shielded_consequence: tx.payload.self_amount_effect().map(
                |(new_self_encrypted_amount, remaining_decrypted_amount)| ShieldedConsequence {
                    new_self_encrypted_amount,
                    remaining_decrypted_amount,
                },
            ),
            decrypted_amount: kind.is_encrypted_transfer().then_some(amount),
            memo: tx.payload.memo().map(str::to_string),
            created_at: Utc::now(),
        }
    }

    /// Record for a history entry not known locally. History only reports
    /// block-included transactions, so the status is already terminal.
    pub fn from_remote(remote: &RemoteTransaction) -> Self {
        let mut record = Self {
            local_id: Uuid::new_v4(),
            transaction_hash: Some(remote.transaction_hash.clone()),
            remote_id: None,
            status: TransactionStatus::Pending,
            kind: remote.kind,
            from_address: remote.from_address.clone().unwrap_or_default(),
            to_address: remote.to_address.clone(),
            amount: remote.amount.unwrap_or(Amount::ZERO),
            cost: None,
            reject_reason: None,
            block_hash: None,
            encrypted_effect: None,
            shielded_consequence: None,
            decrypted_amount: None,
            memo: remote.memo.clone(),
            created_at: Utc::now(),
        };
        record.merge_remote(remote);

        let outcome = if remote.success {
            TerminalOutcome::Finalized {
                block_hash: remote.block_hash.clone(),
                cost: remote.cost.unwrap_or(Amount::ZERO),
            }
        } else {
            TerminalOutcome::Failed {
                block_hash: remote.block_hash.clone(),
                cost: remote.cost.unwrap_or(Amount::ZERO),
                reject_reason: RejectReasonTag::parse(
                    remote.reject_reason.as_deref().unwrap_or_default(),
                ),
            }
        };
        record.apply_terminal(&outcome).unwrap_or(record)
    }

    /// Folds a history entry into this record.
    ///
    /// Remote data fills in what the record lacks; status is left alone
    /// (only the poller resolves a pending record). A cached plaintext is
    /// dropped only when the remote ciphertexts differ from the ones it was
    /// derived from.
    pub fn merge_remote(&mut self, remote: &RemoteTransaction) {
        self.remote_id = Some(remote.id);
        if self.transaction_hash.is_none() {
            self.transaction_hash = Some(remote.transaction_hash.clone());
        }
        if self.to_address.is_none() {
            self.to_address = remote.to_address.clone();
        }
        if self.memo.is_none() {
            self.memo = remote.memo.clone();
        }

        if let Some(effect) = &remote.encrypted {
            let changed = self
                .encrypted_effect
                .as_ref()
                .is_some_and(|current| current != effect);
            if changed {
                self.decrypted_amount = None;
            }
            self.encrypted_effect = Some(effect.clone());
        }
    }

    /// Applies a terminal chain outcome.
    ///
    /// Returns `None` when the record is already terminal: a second
    /// observation is a no-op, so cost and reject reason are never applied
    /// twice.
    pub fn apply_terminal(&self, outcome: &TerminalOutcome) -> Option<Self> {
        if self.status.is_terminal() {
            return None;
        }

        let mut updated = self.clone();
        match outcome {
            TerminalOutcome::Finalized { block_hash, cost } => {
                updated.status = TransactionStatus::Finalized;
                updated.block_hash = Some(block_hash.clone());
                updated.cost = Some(*cost);
            }
            TerminalOutcome::Failed {
                block_hash,
                cost,
                reject_reason,
            } => {
                updated.status = TransactionStatus::Failed;
                updated.block_hash = Some(block_hash.clone());
                updated.cost = Some(*cost);
                updated.reject_reason = Some(reject_reason.clone());
            }
            TerminalOutcome::Rejected => {
                updated.status = TransactionStatus::Rejected;
            }
        }
        Some(updated)
    }

    /// Whether this still-pending transaction will rewrite the sender's self
    /// encrypted amount.
    pub fn pending_self_amount_change(&self, address: &str) -> bool {
        self.status == TransactionStatus::Pending
            && self.from_address == address
            && self.kind.touches_self_amount()
    }

    /// Whether `decrypted_amount` still has to be computed.
    pub fn needs_decryption(&self) -> bool {
        self.kind.is_encrypted_transfer()
            && self.encrypted_effect.is_some()
            && self.decrypted_amount.is_none()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
