//! Deterministic transaction encoding.
//!
//! Binary encoding is a collaborator boundary: the engine only needs a
//! pure, deterministic `serialize(transaction, signatures) -> bytes`, the
//! digest that signers sign, and the hash the chain will know the
//! transaction by. [`TransactionSerializer`] captures that contract;
//! [`CanonicalSerializer`] is the implementation used by default.
//!
//! ## Canonical byte format
//!
//! Fixed-width little-endian integers, null-separated strings, and a
//! length-prefixed JSON payload. Signatures are appended after the signable
//! part, so the sign digest does not move while signatures accumulate:
//!
//! ```text
//! account:  0x00 | kind id | sender 0x00 | nonce | energy | expiry | len | payload
//! update:   0x01 | type | sequence | effective time | timeout | len | payload
//! sigs:     count | (index | [key index] | len | bytes)*
//! ```

use sha2::{Digest, Sha256};
use thiserror::Error;

use super::types::TransactionHash;
use crate::multisig::interchange::{
    AccountTransactionWithSignature, SignedTransaction, UpdateInstruction,
};

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("payload encoding failed: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("{what} does not fit the wire format ({len})")]
    TooLarge { what: &'static str, len: usize },
}

/// Deterministic encoder for transactions and their signatures.
pub trait TransactionSerializer: Send + Sync {
    /// Digest over the transaction without its signatures.
    fn sign_digest(&self, transaction: &SignedTransaction) -> Result<[u8; 32], SerializationError>;

    /// Full wire encoding, signatures included.
    fn serialize(&self, transaction: &SignedTransaction) -> Result<Vec<u8>, SerializationError>;

    /// Hash the chain assigns to the submitted transaction.
    fn transaction_hash(
        &self,
        transaction: &SignedTransaction,
    ) -> Result<TransactionHash, SerializationError> {
        let bytes = self.serialize(transaction)?;
        Ok(TransactionHash::from_bytes(&sha256(&bytes)))
    }
}

fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn push_len(buf: &mut Vec<u8>, what: &'static str, len: usize) -> Result<(), SerializationError> {
    let len32 = u32::try_from(len).map_err(|_| SerializationError::TooLarge { what, len })?;
    buf.extend_from_slice(&len32.to_le_bytes());
    Ok(())
}

/// The default [`TransactionSerializer`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CanonicalSerializer;

impl CanonicalSerializer {
    fn account_signable(tx: &AccountTransactionWithSignature) -> Result<Vec<u8>, SerializationError> {
        let t = &tx.transaction;
        let mut buf = Vec::with_capacity(256);

        buf.push(0x00);
        buf.push(t.kind().id());

        buf.extend_from_slice(t.sender.as_bytes());
        buf.push(0x00);

        buf.extend_from_slice(&t.nonce.to_le_bytes());
        buf.extend_from_slice(&t.energy_amount.to_le_bytes());
        buf.extend_from_slice(&t.expiry.to_le_bytes());

        let payload = serde_json::to_vec(&t.payload)?;
        push_len(&mut buf, "payload", payload.len())?;
        buf.extend_from_slice(&payload);

        Ok(buf)
    }

    fn update_signable(update: &UpdateInstruction) -> Result<Vec<u8>, SerializationError> {
        let mut buf = Vec::with_capacity(128);

        buf.push(0x01);
        buf.extend_from_slice(&update.update_type.to_le_bytes());
        buf.extend_from_slice(&update.header.sequence_number.to_le_bytes());
        buf.extend_from_slice(&update.header.effective_time.to_le_bytes());
        buf.extend_from_slice(&update.header.timeout.to_le_bytes());

        let payload = serde_json::to_vec(&update.payload)?;
        push_len(&mut buf, "payload", payload.len())?;
        buf.extend_from_slice(&payload);

        Ok(buf)
    }

    fn signable(transaction: &SignedTransaction) -> Result<Vec<u8>, SerializationError> {
        match transaction {
            SignedTransaction::AccountTransaction(tx) => Self::account_signable(tx),
            SignedTransaction::UpdateInstruction(update) => Self::update_signable(update),
        }
    }
}

impl TransactionSerializer for CanonicalSerializer {
    fn sign_digest(&self, transaction: &SignedTransaction) -> Result<[u8; 32], SerializationError> {
        Ok(sha256(&Self::signable(transaction)?))
    }

    fn serialize(&self, transaction: &SignedTransaction) -> Result<Vec<u8>, SerializationError> {
        let mut buf = Self::signable(transaction)?;

        match transaction {
            SignedTransaction::AccountTransaction(tx) => {
                push_len(&mut buf, "signature map", tx.signatures.len())?;
                // BTreeMap iteration keeps this deterministic.
                for (credential, keys) in &tx.signatures {
                    buf.extend_from_slice(&credential.to_le_bytes());
                    push_len(&mut buf, "key map", keys.len())?;
                    for (key, signature) in keys {
                        buf.extend_from_slice(&key.to_le_bytes());
                        push_len(&mut buf, "signature", signature.0.len())?;
                        buf.extend_from_slice(&signature.0);
                    }
                }
            }
            SignedTransaction::UpdateInstruction(update) => {
                let mut signatures: Vec<_> = update.signatures.iter().collect();
                signatures.sort_by_key(|s| s.authorization_key_index);
                push_len(&mut buf, "signature list", signatures.len())?;
                for sig in signatures {
                    buf.extend_from_slice(&sig.authorization_key_index.to_le_bytes());
                    push_len(&mut buf, "signature", sig.signature.0.len())?;
                    buf.extend_from_slice(&sig.signature.0);
                }
            }
        }

        Ok(buf)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multisig::interchange::{UpdateHeader, UpdateInstructionSignature};
    use crate::transaction::builder::TransactionBuilder;
    use crate::transaction::types::{Amount, SignatureBytes, TransactionKind};
    use std::collections::BTreeMap;

    fn account(nonce: u64) -> SignedTransaction {
        let tx = TransactionBuilder::new(TransactionKind::SimpleTransfer)
            .sender("sender")
            .recipient("receiver")
            .amount(Amount(100))
            .nonce(nonce)
            .expiry(4_000_000_000)
            .build()
            .unwrap();
        SignedTransaction::AccountTransaction(AccountTransactionWithSignature::unsigned(tx))
    }

    fn update() -> SignedTransaction {
        SignedTransaction::UpdateInstruction(UpdateInstruction {
            header: UpdateHeader {
                sequence_number: 1,
                effective_time: 0,
                timeout: 100,
            },
            payload: serde_json::json!({ "value": 7 }),
            update_type: 2,
            signatures: vec![],
            extra: Default::default(),
        })
    }

    fn add_account_signature(tx: &mut SignedTransaction, cred: u32, byte: u8) {
        if let SignedTransaction::AccountTransaction(inner) = tx {
            inner
                .signatures
                .insert(cred, BTreeMap::from([(0, SignatureBytes(vec![byte; 64]))]));
        }
    }

    #[test]
    fn digest_is_deterministic() {
        let s = CanonicalSerializer;
        assert_eq!(s.sign_digest(&account(1)).unwrap(), s.sign_digest(&account(1)).unwrap());
        assert_ne!(s.sign_digest(&account(1)).unwrap(), s.sign_digest(&account(2)).unwrap());
    }

    #[test]
    fn digest_ignores_signatures() {
        let s = CanonicalSerializer;
        let unsigned = account(1);
        let mut signed = unsigned.clone();
        add_account_signature(&mut signed, 0, 0xaa);

        assert_eq!(s.sign_digest(&unsigned).unwrap(), s.sign_digest(&signed).unwrap());
        assert_ne!(s.serialize(&unsigned).unwrap(), s.serialize(&signed).unwrap());
    }

    #[test]
    fn hash_covers_signatures() {
        let s = CanonicalSerializer;
        let mut a = account(1);
        let mut b = account(1);
        add_account_signature(&mut a, 0, 0xaa);
        add_account_signature(&mut b, 0, 0xbb);
        assert_ne!(s.transaction_hash(&a).unwrap(), s.transaction_hash(&b).unwrap());
        assert_eq!(s.transaction_hash(&a).unwrap().as_str().len(), 64);
    }

    #[test]
    fn update_signature_order_does_not_matter() {
        let s = CanonicalSerializer;
        let sig = |i: u32| UpdateInstructionSignature {
            authorization_key_index: i,
            signature: SignatureBytes(vec![i as u8; 64]),
        };
        let mut a = update();
        let mut b = update();
        if let (SignedTransaction::UpdateInstruction(a), SignedTransaction::UpdateInstruction(b)) =
            (&mut a, &mut b)
        {
            a.signatures = vec![sig(1), sig(2)];
            b.signatures = vec![sig(2), sig(1)];
        }
        assert_eq!(s.serialize(&a).unwrap(), s.serialize(&b).unwrap());
    }

    #[test]
    fn account_and_update_digests_differ() {
        let s = CanonicalSerializer;
        assert_ne!(s.sign_digest(&account(1)).unwrap(), s.sign_digest(&update()).unwrap());
    }
}
