//! Signature collection.
//!
//! [`SignatureCollector::merge`] validates one imported signature file
//! against a proposal and returns the proposal with the signature added.
//! The input proposal is never modified; on any error the caller still
//! holds the proposal exactly as it was.

use std::sync::Arc;

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use thiserror::Error;
use tracing::{debug, warn};

use super::interchange::SignedTransaction;
use super::proposal::{Proposal, ProposalStatus};
use crate::config::MAX_SIGNATURES_PER_IMPORT;
use crate::transaction::serialization::{SerializationError, TransactionSerializer};

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("invalid signature file: {0}")]
    InvalidFormat(String),

    #[error("a signature for {0} is already present")]
    DuplicateCredential(String),

    #[error("the signature file is for a different transaction")]
    TransactionMismatch,

    #[error("the signature does not verify: {0}")]
    InvalidSignature(String),

    #[error("expected a signed {expected}, got a signed {actual}")]
    WrongKind {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("proposal is {0}, signatures can no longer be added")]
    ProposalClosed(ProposalStatus),

    #[error(transparent)]
    Serialization(#[from] SerializationError),
}

/// Validates and merges imported signatures.
pub struct SignatureCollector {
    serializer: Arc<dyn TransactionSerializer>,
    /// Level-2 keys that may sign update instructions, by authorization key
    /// index. Without them, update signatures are accepted unverified.
    authorization_keys: Option<Vec<VerifyingKey>>,
}

impl SignatureCollector {
    pub fn new(serializer: Arc<dyn TransactionSerializer>) -> Self {
        Self {
            serializer,
            authorization_keys: None,
        }
    }

    pub fn with_authorization_keys(mut self, keys: Vec<VerifyingKey>) -> Self {
        self.authorization_keys = Some(keys);
        self
    }

    /// Merges the single signature carried by `imported` into `proposal`.
    pub fn merge(
        &self,
        proposal: &Proposal,
        imported: &SignedTransaction,
    ) -> Result<Proposal, ImportError> {
        if proposal.status != ProposalStatus::Open {
            return Err(ImportError::ProposalClosed(proposal.status));
        }

        let expected = proposal.transaction.shape_name();
        let actual = imported.shape_name();
        if expected != actual {
            return Err(ImportError::WrongKind { expected, actual });
        }

        let digest = self.serializer.sign_digest(&proposal.transaction)?;
        if self.serializer.sign_digest(imported)? != digest {
            return Err(ImportError::TransactionMismatch);
        }

        let mut merged = proposal.clone();
        match (&mut merged.transaction, imported) {
            (
                SignedTransaction::AccountTransaction(current),
                SignedTransaction::AccountTransaction(new),
            ) => {
                if new.signatures.len() != MAX_SIGNATURES_PER_IMPORT {
                    return Err(ImportError::InvalidFormat(format!(
                        "must contain exactly one signature, found {}",
                        new.signatures.len()
                    )));
                }
                for (credential, keys) in &new.signatures {
                    if keys.is_empty() {
                        return Err(ImportError::InvalidFormat(format!(
                            "credential {credential} carries no key signatures"
                        )));
                    }
                    if current.signatures.contains_key(credential) {
                        return Err(ImportError::DuplicateCredential(format!(
                            "credential index {credential}"
                        )));
                    }
                    current.signatures.insert(*credential, keys.clone());
                }
            }
            (
                SignedTransaction::UpdateInstruction(current),
                SignedTransaction::UpdateInstruction(new),
            ) => {
                if new.signatures.len() != MAX_SIGNATURES_PER_IMPORT {
                    return Err(ImportError::InvalidFormat(format!(
                        "must contain exactly one signature, found {}",
                        new.signatures.len()
                    )));
                }
                for sig in &new.signatures {
                    let duplicate = current.signatures.iter().any(|existing| {
                        existing.authorization_key_index == sig.authorization_key_index
                            || existing.signature == sig.signature
                    });
                    if duplicate {
                        return Err(ImportError::DuplicateCredential(format!(
                            "authorization key {}",
                            sig.authorization_key_index
                        )));
                    }
                    self.verify(sig.authorization_key_index, sig.signature.as_bytes(), &digest)?;
                    current.signatures.push(sig.clone());
                }
            }
            _ => return Err(ImportError::WrongKind { expected, actual }),
        }

        debug!(
            proposal_id = proposal.id,
            signatures = merged.signature_count(),
            threshold = merged.threshold,
            "signature merged"
        );
        Ok(merged)
    }

    fn verify(&self, key_index: u32, signature: &[u8], digest: &[u8; 32]) -> Result<(), ImportError> {
        let Some(keys) = &self.authorization_keys else {
            return Ok(());
        };
        let key = keys.get(key_index as usize).ok_or_else(|| {
            ImportError::InvalidSignature(format!("no authorization key at index {key_index}"))
        })?;
        let signature = Signature::from_slice(signature)
            .map_err(|e| ImportError::InvalidSignature(e.to_string()))?;
        key.verify(digest, &signature).map_err(|e| {
            warn!(key_index, "update instruction signature failed verification");
            ImportError::InvalidSignature(e.to_string())
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
