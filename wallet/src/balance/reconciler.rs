//! Reconciling local shielded state with the chain.
//!
//! [`reconcile`] is pure: it compares the local account with an observed
//! snapshot and says which fields to overwrite. The self amount is only
//! overwritten while no locally submitted transaction is about to change
//! it; until that transaction resolves the remote value is stale and the
//! local one is the truth.
//!
//! [`BalanceReconciler`] wraps it with the store, and is the only writer of
//! the plaintext caches (`Account::decrypted_amounts`,
//! `TransferTransaction::decrypted_amount`).

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::decrypt::{self, DecryptReport};
use super::ReconcileError;
use crate::account::Account;
use crate::chain::{ChainStatus, Decryptor, EncryptedEffect, ObservedEncryptedState, SecretSeed};
use crate::events::{EngineEvent, EventBus};
use crate::storage::{Store, StoreError};
use crate::transaction::record::TransferTransaction;
use crate::transaction::types::{Amount, EncryptedAmount, TransactionStatus};

/// Fields of an [`Account`] to overwrite after reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountUpdate {
    pub self_encrypted_amount: Option<EncryptedAmount>,
    pub incoming_encrypted_amounts: Option<Vec<EncryptedAmount>>,
    pub all_decrypted: Option<bool>,
}

impl AccountUpdate {
    pub fn is_empty(&self) -> bool {
        self.self_encrypted_amount.is_none()
            && self.incoming_encrypted_amounts.is_none()
            && self.all_decrypted.is_none()
    }

    pub fn apply_to(&self, account: &mut Account) {
        if let Some(amount) = &self.self_encrypted_amount {
            account.self_encrypted_amount = Some(amount.clone());
        }
        if let Some(amounts) = &self.incoming_encrypted_amounts {
            account.incoming_encrypted_amounts = amounts.clone();
        }
        if let Some(all_decrypted) = self.all_decrypted {
            account.all_decrypted = all_decrypted;
        }
    }
}

/// Compares `account` with `observed`.
///
/// Changed incoming amounts are always taken. A changed self amount is
/// taken only if `has_pending_self_change` is false. Either change marks the
/// plaintext cache stale; nothing is decrypted here.
pub fn reconcile(
    account: &Account,
    observed: &ObservedEncryptedState,
    has_pending_self_change: bool,
) -> AccountUpdate {
    let incoming_changed = account.incoming_encrypted_amounts != observed.incoming_amounts;
    let self_differs = account.self_encrypted_amount.as_ref() != Some(&observed.self_amount);
    let self_changed = self_differs && !has_pending_self_change;

    if self_differs && has_pending_self_change {
        debug!(
            address = %account.address,
            "observed self amount ignored while a local transaction is pending"
        );
    }
    if !incoming_changed && !self_changed {
        return AccountUpdate::default();
    }

    AccountUpdate {
        self_encrypted_amount: self_changed.then(|| observed.self_amount.clone()),
        incoming_encrypted_amounts: incoming_changed.then(|| observed.incoming_amounts.clone()),
        all_decrypted: Some(false),
    }
}

pub struct BalanceReconciler {
    store: Arc<dyn Store>,
    chain: Arc<dyn ChainStatus>,
    decryptor: Arc<dyn Decryptor>,
    events: EventBus,
}

impl BalanceReconciler {
    pub fn new(
        store: Arc<dyn Store>,
        chain: Arc<dyn ChainStatus>,
        decryptor: Arc<dyn Decryptor>,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            chain,
            decryptor,
            events,
        }
    }

    /// Fetches the account's on-chain encrypted state and folds it into the
    /// stored account. Returns the committed account if anything changed.
    pub async fn refresh(&self, address: &str) -> Result<Option<Account>, ReconcileError> {
        let observed = self.chain.encrypted_state(address).await?;
        let pending = self.has_pending_self_change(address)?;

        let committed = self.update_account(address, &mut |account| {
            let update = reconcile(account, &observed, pending);
            if update.is_empty() {
                return None;
            }
            let mut next = account.clone();
            update.apply_to(&mut next);
            Some(next)
        })?;

        if let Some(account) = &committed {
            info!(
                address,
                incoming = account.incoming_encrypted_amounts.len(),
                "shielded state changed on chain"
            );
            self.emit_updated(address);
        }
        Ok(committed)
    }

    /// Decrypts everything outstanding for `address` in one batch and
    /// distributes the plaintexts to the account and its transactions.
    ///
    /// Plaintexts already cached are never sent again. If any transaction's
    /// amount cannot be derived, the pass fails with `CorruptLocalState`
    /// before anything is written.
    pub async fn decrypt_pending(
        &self,
        address: &str,
        seed: &SecretSeed,
    ) -> Result<DecryptReport, ReconcileError> {
        let account = self
            .store
            .account(address)?
            .ok_or_else(|| ReconcileError::NotFound(address.to_string()))?;
        let transactions: Vec<TransferTransaction> = self
            .store
            .transactions_for_account(address)?
            .into_iter()
            .filter(TransferTransaction::needs_decryption)
            .collect();

        if account.all_decrypted && account.is_fully_decrypted() && transactions.is_empty() {
            return Ok(DecryptReport::default());
        }

        let candidates = account.shielded_ciphertexts().cloned().chain(
            transactions
                .iter()
                .filter_map(|t| t.encrypted_effect.as_ref())
                .flat_map(decrypt::ciphertexts_of),
        );
        let batch = decrypt::outstanding(candidates, &account.decrypted_amounts);
        let mut plaintexts =
            decrypt::decrypt_all(self.decryptor.as_ref(), &batch, seed, account.credential_index)
                .await?;
        for (ciphertext, amount) in &account.decrypted_amounts {
            plaintexts.entry(ciphertext.clone()).or_insert(*amount);
        }

        let amounts = transactions
            .iter()
            .map(|t| {
                let amount = decrypt::transfer_plaintext(t, address, &plaintexts)?;
                Ok((t, amount))
            })
            .collect::<Result<Vec<_>, ReconcileError>>()
            .map_err(|e| {
                error!(address, error = %e, "reconciliation aborted");
                e
            })?;

        let mut resolved = 0;
        for (transaction, amount) in &amounts {
            if self.store_plaintext(transaction, *amount)? {
                resolved += 1;
            }
        }

        let still_encrypted = self
            .store
            .transactions_for_account(address)?
            .iter()
            .any(TransferTransaction::needs_decryption);
        self.update_account(address, &mut |current| {
            let mut next = current.clone();
            let live: Vec<EncryptedAmount> = next.shielded_ciphertexts().cloned().collect();
            for ciphertext in live {
                if let Some(amount) = plaintexts.get(&ciphertext) {
                    next.decrypted_amounts.insert(ciphertext, *amount);
                }
            }
            next.prune_decrypted();
            next.all_decrypted = next.is_fully_decrypted() && !still_encrypted;
            (next != *current).then_some(next)
        })?;

        info!(
            address,
            ciphertexts = batch.len(),
            transactions = resolved,
            "shielded amounts decrypted"
        );
        self.emit_updated(address);

        Ok(DecryptReport {
            invocations: usize::from(!batch.is_empty()),
            ciphertexts: batch.len(),
            transactions: resolved,
        })
    }

    /// Moves the sender's self amount to what a finalized local shielded
    /// operation left behind, caching the plaintext when it is known.
    pub fn apply_shielded_consequence(
        &self,
        transaction: &TransferTransaction,
    ) -> Result<Option<Account>, ReconcileError> {
        let Some(consequence) = &transaction.shielded_consequence else {
            return Ok(None);
        };
        if transaction.status != TransactionStatus::Finalized {
            return Ok(None);
        }

        let address = transaction.from_address.as_str();
        let result = self.store.update_account(address, &mut |account| {
            let mut next = account.clone();
            next.self_encrypted_amount = Some(consequence.new_self_encrypted_amount.clone());
            if let Some(remaining) = consequence.remaining_decrypted_amount {
                next.decrypted_amounts
                    .insert(consequence.new_self_encrypted_amount.clone(), remaining);
            }
            next.prune_decrypted();
            next.all_decrypted = next.all_decrypted && next.is_fully_decrypted();
            Some(next)
        });

        match result {
            Ok(committed) => {
                debug!(address, local_id = %transaction.local_id, "self amount updated");
                self.emit_updated(address);
                Ok(committed)
            }
            Err(StoreError::NotFound(_)) => {
                warn!(address, "shielded consequence for an account not held locally");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Flags the account's plaintext cache as incomplete.
    pub fn mark_undecrypted(&self, address: &str) -> Result<(), ReconcileError> {
        let changed = self.update_account(address, &mut |account| {
            account.all_decrypted.then(|| Account {
                all_decrypted: false,
                ..account.clone()
            })
        })?;
        if changed.is_some() {
            self.emit_updated(address);
        }
        Ok(())
    }

    fn has_pending_self_change(&self, address: &str) -> Result<bool, ReconcileError> {
        Ok(self
            .store
            .pending_transactions()?
            .iter()
            .any(|t| t.pending_self_amount_change(address)))
    }

    /// Writes a derived plaintext unless the record moved on meanwhile.
    fn store_plaintext(
        &self,
        transaction: &TransferTransaction,
        amount: Amount,
    ) -> Result<bool, ReconcileError> {
        let effect: Option<&EncryptedEffect> = transaction.encrypted_effect.as_ref();
        let written = self.store.update_transaction(&transaction.local_id, &mut |current| {
            let unchanged = current.encrypted_effect.as_ref() == effect;
            (unchanged && current.decrypted_amount.is_none()).then(|| TransferTransaction {
                decrypted_amount: Some(amount),
                ..current.clone()
            })
        })?;
        Ok(written.is_some())
    }

    fn update_account(
        &self,
        address: &str,
        update: &mut dyn FnMut(&Account) -> Option<Account>,
    ) -> Result<Option<Account>, ReconcileError> {
        self.store
            .update_account(address, update)
            .map_err(|e| match e {
                StoreError::NotFound(_) => ReconcileError::NotFound(address.to_string()),
                other => other.into(),
            })
    }

    fn emit_updated(&self, address: &str) {
        self.events.emit(EngineEvent::AccountUpdated {
            address: address.to_string(),
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
