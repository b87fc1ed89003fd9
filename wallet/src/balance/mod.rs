//! # Shielded Balance
//!
//! An account's shielded balance is a set of ciphertexts on chain. The
//! wallet keeps its own copy of those ciphertexts plus a cache of their
//! plaintexts, and has to keep both honest while two things move under it:
//! transactions the wallet itself submitted (which change the self amount
//! before the chain reports it) and whatever the chain reports later.
//!
//! ## Architecture
//!
//! ```text
//! reconciler.rs  Merges observed on-chain ciphertexts into the local account
//! decrypt.rs     Batch assembly, one-call decryption, positional results
//! ```

pub mod decrypt;
pub mod reconciler;

pub use decrypt::DecryptReport;
pub use reconciler::{reconcile, AccountUpdate, BalanceReconciler};

use thiserror::Error;

use crate::chain::{ChainError, DecryptError};
use crate::storage::StoreError;

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A ciphertext cannot be tied to a relationship the account has with
    /// the transaction. Points at a bug elsewhere; nothing is written.
    #[error("corrupt local state: {0}")]
    CorruptLocalState(String),

    #[error(transparent)]
    Decryption(#[from] DecryptError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("account {0} not found")]
    NotFound(String),
}
