//! Local view of an account.
//!
//! Besides its deployment status and signature threshold, an account
//! carries the shielded half of its balance as ciphertexts (one self amount
//! plus a list of incoming amounts) and a cache of their plaintexts. The
//! `all_decrypted` flag summarizes whether that cache is complete.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::transaction::types::{
    AccountStatus, Amount, CredentialIndex, EncryptedAmount, TransactionHash,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: String,
    pub status: AccountStatus,
    pub signature_threshold: u32,
    /// Highest history id reflected locally.
    pub max_observed_transaction_id: u64,
    /// `None` until the first on-chain observation.
    pub self_encrypted_amount: Option<EncryptedAmount>,
    pub incoming_encrypted_amounts: Vec<EncryptedAmount>,
    /// True only if every ciphertext above has an entry in
    /// `decrypted_amounts`.
    pub all_decrypted: bool,
    pub decrypted_amounts: BTreeMap<EncryptedAmount, Amount>,
    /// Credential used to open shielded amounts.
    pub credential_index: CredentialIndex,
    /// Credential ids by credential index.
    pub credentials: BTreeMap<CredentialIndex, String>,
    /// Set while the account is `Pending`.
    pub deployment_transaction_hash: Option<TransactionHash>,
}

impl Account {
    pub fn new(address: &str, status: AccountStatus) -> Self {
        Self {
            address: address.to_string(),
            status,
            signature_threshold: 1,
            max_observed_transaction_id: 0,
            self_encrypted_amount: None,
            incoming_encrypted_amounts: Vec::new(),
            all_decrypted: true,
            decrypted_amounts: BTreeMap::new(),
            credential_index: 0,
            credentials: BTreeMap::new(),
            deployment_transaction_hash: None,
        }
    }

    /// A not-yet-deployed account waiting on `deployment`.
    pub fn pending(address: &str, deployment: TransactionHash) -> Self {
        Self {
            deployment_transaction_hash: Some(deployment),
            ..Self::new(address, AccountStatus::Pending)
        }
    }

    /// Every ciphertext currently making up the shielded balance, self
    /// amount first.
    pub fn shielded_ciphertexts(&self) -> impl Iterator<Item = &EncryptedAmount> {
        self.self_encrypted_amount
            .iter()
            .chain(self.incoming_encrypted_amounts.iter())
    }

    /// Shielded ciphertexts that have no cached plaintext.
    pub fn undecrypted_ciphertexts(&self) -> Vec<EncryptedAmount> {
        let mut pending: Vec<EncryptedAmount> = Vec::new();
        for ciphertext in self.shielded_ciphertexts() {
            if !self.decrypted_amounts.contains_key(ciphertext) && !pending.contains(ciphertext) {
                pending.push(ciphertext.clone());
            }
        }
        pending
    }

    pub fn is_fully_decrypted(&self) -> bool {
        self.shielded_ciphertexts()
            .all(|c| self.decrypted_amounts.contains_key(c))
    }

    /// Sum of the shielded balance, if every part is decrypted.
    pub fn shielded_balance(&self) -> Option<Amount> {
        self.shielded_ciphertexts()
            .try_fold(Amount::ZERO, |total, c| {
                total.checked_add(*self.decrypted_amounts.get(c)?)
            })
    }

    /// Drops cached plaintexts for ciphertexts no longer part of the
    /// account.
    pub fn prune_decrypted(&mut self) {
        let live: Vec<EncryptedAmount> = self.shielded_ciphertexts().cloned().collect();
        self.decrypted_amounts.retain(|c, _| live.contains(c));
    }

    /// Applies a finalized credential update: new threshold, added
    /// credentials inserted, removed credential ids dropped.
    pub fn apply_credential_update(
        &mut self,
        threshold: u32,
        added: impl IntoIterator<Item = (CredentialIndex, String)>,
        removed: &[String],
    ) {
        self.signature_threshold = threshold;
        self.credentials.extend(added);
        self.credentials.retain(|_, id| !removed.contains(id));
    }
}
