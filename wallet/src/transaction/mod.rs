//! # Transaction Module
//!
//! Construction, encoding, signing, and local bookkeeping of account
//! transactions.
//!
//! ## Architecture
//!
//! ```text
//! types.rs          Core enums and value types (TransactionKind, Amount, statuses)
//! builder.rs        Fluent TransactionBuilder for unsigned transactions
//! cost.rs           Energy cost model
//! serialization.rs  Deterministic encoding, sign digest, transaction hash
//! signing.rs        Signer capability and the software Ed25519 signer
//! record.rs         Local TransferTransaction records and terminal outcomes
//! reject_reason.rs  Known failure reasons, raw fallback for unknown ones
//! ```
//!
//! ## Transaction Lifecycle
//!
//! 1. **Build** with [`TransactionBuilder`].
//! 2. **Sign** with [`sign_transaction`], locally or on each co-signer's
//!    machine (see [`crate::multisig`]).
//! 3. **Submit**; a `Pending` [`TransferTransaction`] is recorded.
//! 4. **Track** until the poller applies a terminal outcome.
//!
//! All amounts are `u64` in the smallest denomination.

pub mod builder;
pub mod cost;
pub mod record;
pub mod reject_reason;
pub mod serialization;
pub mod signing;
pub mod types;

pub use builder::{
    AccountTransaction, AddedCredential, BuildError, Payload, SchedulePoint, ShieldedSpend,
    TransactionBuilder,
};
pub use record::{ShieldedConsequence, TransferTransaction};
pub use reject_reason::{RejectReason, RejectReasonTag};
pub use serialization::{CanonicalSerializer, SerializationError, TransactionSerializer};
pub use signing::{sign_transaction, Ed25519Signer, KeyPath, Signer, SignerError};
pub use types::{
    AccountStatus, Amount, CredentialIndex, EncryptedAmount, KeyIndex, SignatureBytes,
    TransactionHash, TransactionKind, TransactionStatus,
};
