//! # Storage Module
//!
//! Persistence for the three record types the engine owns: accounts,
//! transfer transactions, and multi-signature proposals.
//!
//! ## Architecture
//!
//! ```text
//! mod.rs     Store trait and StoreError
//! memory.rs  In-memory store for tests and ephemeral sessions
//! db.rs      sled-backed persistent store
//! ```
//!
//! ## Update discipline
//!
//! Several polling loops may touch the same records concurrently. Writers
//! never write back a stale copy: every modification of an existing record
//! goes through an `update_*` method, which hands the closure the current
//! stored value and commits its result atomically. A closure returning
//! `None` leaves the record untouched. Combined with each field having a
//! single designated writer, this keeps concurrent loops from clobbering
//! each other's fields.

pub mod db;
pub mod memory;

pub use db::SledStore;
pub use memory::MemoryStore;

use uuid::Uuid;

use crate::account::Account;
use crate::multisig::proposal::Proposal;
use crate::transaction::record::TransferTransaction;
use crate::transaction::types::TransactionHash;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("key not found: {0}")]
    NotFound(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Closure form used by the `update_*` methods.
pub type Update<'a, T> = &'a mut dyn FnMut(&T) -> Option<T>;

pub trait Store: Send + Sync {
    // -- Accounts -----------------------------------------------------------

    fn account(&self, address: &str) -> StoreResult<Option<Account>>;

    fn accounts(&self) -> StoreResult<Vec<Account>>;

    /// Inserts or replaces an account.
    fn put_account(&self, account: &Account) -> StoreResult<()>;

    /// Atomically updates an account. Returns the committed value, or
    /// `None` if the closure declined. Fails with `NotFound` if there is no
    /// such account.
    fn update_account(
        &self,
        address: &str,
        update: Update<'_, Account>,
    ) -> StoreResult<Option<Account>>;

    // -- Transactions -------------------------------------------------------

    fn transaction(&self, local_id: &Uuid) -> StoreResult<Option<TransferTransaction>>;

    fn transaction_by_hash(
        &self,
        hash: &TransactionHash,
    ) -> StoreResult<Option<TransferTransaction>>;

    /// Inserts or replaces a record and indexes its hash.
    fn put_transaction(&self, transaction: &TransferTransaction) -> StoreResult<()>;

    fn update_transaction(
        &self,
        local_id: &Uuid,
        update: Update<'_, TransferTransaction>,
    ) -> StoreResult<Option<TransferTransaction>>;

    /// Records where `address` is sender or receiver, oldest first.
    fn transactions_for_account(&self, address: &str) -> StoreResult<Vec<TransferTransaction>>;

    fn pending_transactions(&self) -> StoreResult<Vec<TransferTransaction>>;

    // -- Proposals ----------------------------------------------------------

    fn proposal(&self, id: u64) -> StoreResult<Option<Proposal>>;

    /// All proposals, ascending by id.
    fn proposals(&self) -> StoreResult<Vec<Proposal>>;

    fn put_proposal(&self, proposal: &Proposal) -> StoreResult<()>;

    fn update_proposal(
        &self,
        id: u64,
        update: Update<'_, Proposal>,
    ) -> StoreResult<Option<Proposal>>;

    /// Allocates a fresh proposal id.
    fn next_proposal_id(&self) -> StoreResult<u64>;
}

pub(crate) fn sort_transactions(transactions: &mut [TransferTransaction]) {
    transactions.sort_by(|a, b| {
        a.remote_id
            .unwrap_or(u64::MAX)
            .cmp(&b.remote_id.unwrap_or(u64::MAX))
            .then(a.created_at.cmp(&b.created_at))
    });
}

pub(crate) fn involves(transaction: &TransferTransaction, address: &str) -> bool {
    transaction.from_address == address || transaction.to_address.as_deref() == Some(address)
}
