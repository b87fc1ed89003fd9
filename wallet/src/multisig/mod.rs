//! # Multi-Signature Coordination
//!
//! Governance and shared-account transactions need signatures from several
//! key holders who never share a network. Signatures travel as files; this
//! module turns them back into a proposal that eventually reaches quorum.
//!
//! ## Architecture
//!
//! ```text
//! interchange.rs  Signature file shapes and tagged decoding
//! proposal.rs     Proposal record and its status machine
//! collector.rs    Validates and merges one imported signature
//! store.rs        Proposal lifecycle: create, import, submit, resolve
//! ```

pub mod collector;
pub mod interchange;
pub mod proposal;
pub mod store;

pub use collector::{ImportError, SignatureCollector};
pub use interchange::{
    decode_signature_file, AccountTransactionWithSignature, SignatureMap, SignedTransaction,
    UpdateHeader, UpdateInstruction, UpdateInstructionSignature,
};
pub use proposal::{Proposal, ProposalFailure, ProposalStatus};
pub use store::{ProposalError, ProposalStore};
