//! Batched decryption.
//!
//! Decrypting is expensive per call, not per ciphertext, so the reconciler
//! gathers everything outstanding and opens it in a single
//! [`Decryptor::decrypt_batch`] invocation. Results come back positionally
//! and are keyed by ciphertext here, which is what makes the batch
//! equivalent to decrypting each ciphertext on its own.

use std::collections::BTreeMap;

use tracing::debug;

use super::ReconcileError;
use crate::chain::{DecryptError, Decryptor, EncryptedEffect, SecretSeed};
use crate::transaction::record::TransferTransaction;
use crate::transaction::types::{Amount, CredentialIndex, EncryptedAmount};

/// What one decryption pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecryptReport {
    /// Calls made to the decryptor: zero or one.
    pub invocations: usize,
    /// Ciphertexts in the batch.
    pub ciphertexts: usize,
    /// Transactions that received a plaintext amount.
    pub transactions: usize,
}

/// Ciphertexts an encrypted effect needs opened.
pub fn ciphertexts_of(effect: &EncryptedEffect) -> Vec<EncryptedAmount> {
    match effect {
        EncryptedEffect::Incoming { encrypted_amount } => vec![encrypted_amount.clone()],
        EncryptedEffect::Outgoing {
            input_encrypted_amount,
            new_self_encrypted_amount,
        } => vec![
            input_encrypted_amount.clone(),
            new_self_encrypted_amount.clone(),
        ],
    }
}

/// The batch to send: candidates in first-seen order, each once, minus
/// anything already cached.
pub fn outstanding(
    candidates: impl IntoIterator<Item = EncryptedAmount>,
    cached: &BTreeMap<EncryptedAmount, Amount>,
) -> Vec<EncryptedAmount> {
    let mut batch = Vec::new();
    for ciphertext in candidates {
        if !cached.contains_key(&ciphertext) && !batch.contains(&ciphertext) {
            batch.push(ciphertext);
        }
    }
    batch
}

/// Opens `batch` with one decryptor call and keys the results by
/// ciphertext. An empty batch makes no call.
pub async fn decrypt_all(
    decryptor: &dyn Decryptor,
    batch: &[EncryptedAmount],
    seed: &SecretSeed,
    credential_index: CredentialIndex,
) -> Result<BTreeMap<EncryptedAmount, Amount>, ReconcileError> {
    if batch.is_empty() {
        return Ok(BTreeMap::new());
    }

    let plaintexts = decryptor
        .decrypt_batch(batch, seed, credential_index)
        .await?;
    if plaintexts.len() != batch.len() {
        return Err(DecryptError(format!(
            "expected {} plaintexts, got {}",
            batch.len(),
            plaintexts.len()
        ))
        .into());
    }

    debug!(count = batch.len(), "decrypted batch");
    Ok(batch.iter().cloned().zip(plaintexts).collect())
}

/// Plaintext amount of an encrypted transfer, seen from `address`.
///
/// The receiver reads the incoming ciphertext directly; the sender derives
/// it as the self amount before minus the self amount after. Any other
/// pairing of effect and role is corrupt local state.
pub fn transfer_plaintext(
    transaction: &TransferTransaction,
    address: &str,
    plaintexts: &BTreeMap<EncryptedAmount, Amount>,
) -> Result<Amount, ReconcileError> {
    let lookup = |ciphertext: &EncryptedAmount| {
        plaintexts.get(ciphertext).copied().ok_or_else(|| {
            ReconcileError::CorruptLocalState(format!(
                "no plaintext for ciphertext {ciphertext} of transaction {}",
                transaction.local_id
            ))
        })
    };

    match &transaction.encrypted_effect {
        Some(EncryptedEffect::Incoming { encrypted_amount })
            if transaction.to_address.as_deref() == Some(address) =>
        {
            lookup(encrypted_amount)
        }
        Some(EncryptedEffect::Outgoing {
            input_encrypted_amount,
            new_self_encrypted_amount,
        }) if transaction.from_address == address => {
            let before = lookup(input_encrypted_amount)?;
            let after = lookup(new_self_encrypted_amount)?;
            before.checked_sub(after).ok_or_else(|| {
                ReconcileError::CorruptLocalState(format!(
                    "self amount grew across outgoing transfer {}",
                    transaction.local_id
                ))
            })
        }
        Some(_) => Err(ReconcileError::CorruptLocalState(format!(
            "encrypted effect of transaction {} does not match {address}'s side of it",
            transaction.local_id
        ))),
        None => Err(ReconcileError::CorruptLocalState(format!(
            "transaction {} has no encrypted effect",
            transaction.local_id
        ))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
