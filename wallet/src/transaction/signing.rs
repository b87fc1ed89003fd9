//! Transaction signing.
//!
//! Signing is a separate step from building because the key holder may
//! not be available at construction time (hardware device, another
//! machine). The engine only sees the opaque [`Signer`] capability: give it
//! the sign digest and a key path, get back signature bytes.
//! [`Ed25519Signer`] is the software implementation for local keys.

use std::collections::HashMap;

use async_trait::async_trait;
use ed25519_dalek::{Signer as _, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::serialization::{SerializationError, TransactionSerializer};
use super::types::{CredentialIndex, KeyIndex, SignatureBytes};
use crate::multisig::interchange::{SignedTransaction, UpdateInstructionSignature};

/// Location of a key inside a key holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPath {
    pub identity_index: u32,
    pub credential_index: CredentialIndex,
    pub key_index: KeyIndex,
}

impl KeyPath {
    pub fn new(identity_index: u32, credential_index: CredentialIndex, key_index: KeyIndex) -> Self {
        Self {
            identity_index,
            credential_index,
            key_index,
        }
    }
}

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("no key at {0:?}")]
    UnknownKey(KeyPath),

    #[error("signing device error: {0}")]
    Device(String),

    #[error(transparent)]
    Serialization(#[from] SerializationError),
}

/// An opaque signing capability.
#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign(&self, payload: &[u8], key_path: &KeyPath) -> Result<SignatureBytes, SignerError>;
}

/// Software signer over in-memory Ed25519 keys.
#[derive(Default)]
pub struct Ed25519Signer {
    keys: HashMap<KeyPath, SigningKey>,
}

impl Ed25519Signer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, path: KeyPath, key: SigningKey) -> Self {
        self.keys.insert(path, key);
        self
    }

    pub fn verifying_key(&self, path: &KeyPath) -> Option<VerifyingKey> {
        self.keys.get(path).map(SigningKey::verifying_key)
    }
}

#[async_trait]
impl Signer for Ed25519Signer {
    async fn sign(&self, payload: &[u8], key_path: &KeyPath) -> Result<SignatureBytes, SignerError> {
        let key = self
            .keys
            .get(key_path)
            .ok_or(SignerError::UnknownKey(*key_path))?;
        Ok(SignatureBytes(key.sign(payload).to_bytes().to_vec()))
    }
}

/// Signs `transaction` with the key at `key_path` and returns a copy
/// carrying only that signature, ready to be written to a signature file.
///
/// Account transactions get the signature under
/// `key_path.credential_index` / `key_path.key_index`. Update instructions
/// get it under `authorization_key_index`.
pub async fn sign_transaction(
    signer: &dyn Signer,
    serializer: &dyn TransactionSerializer,
    transaction: &SignedTransaction,
    key_path: &KeyPath,
    authorization_key_index: u32,
) -> Result<SignedTransaction, SignerError> {
    let digest = serializer.sign_digest(transaction)?;
    let signature = signer.sign(&digest, key_path).await?;

    let signed = match transaction.without_signatures() {
        SignedTransaction::AccountTransaction(mut tx) => {
            tx.signatures
                .entry(key_path.credential_index)
                .or_default()
                .insert(key_path.key_index, signature);
            SignedTransaction::AccountTransaction(tx)
        }
        SignedTransaction::UpdateInstruction(mut update) => {
            update.signatures.push(UpdateInstructionSignature {
                authorization_key_index,
                signature,
            });
            SignedTransaction::UpdateInstruction(update)
        }
    };

    debug!(
        shape = signed.shape_name(),
        credential_index = key_path.credential_index,
        "transaction signed"
    );
    Ok(signed)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multisig::interchange::AccountTransactionWithSignature;
    use crate::transaction::builder::TransactionBuilder;
    use crate::transaction::serialization::CanonicalSerializer;
    use crate::transaction::types::{Amount, TransactionKind};
    use ed25519_dalek::{Signature, Verifier};

    fn key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    fn transfer() -> SignedTransaction {
        let tx = TransactionBuilder::new(TransactionKind::SimpleTransfer)
            .sender("sender")
            .recipient("receiver")
            .amount(Amount(100))
            .build()
            .unwrap();
        SignedTransaction::AccountTransaction(AccountTransactionWithSignature::unsigned(tx))
    }

    #[tokio::test]
    async fn signs_under_credential_and_key_index() {
        let path = KeyPath::new(0, 2, 1);
        let signer = Ed25519Signer::new().with_key(path, key(7));

        let signed = sign_transaction(&signer, &CanonicalSerializer, &transfer(), &path, 0)
            .await
            .unwrap();

        let SignedTransaction::AccountTransaction(tx) = &signed else {
            panic!("shape changed");
        };
        let sig = &tx.signatures[&2][&1];
        assert_eq!(sig.0.len(), 64);

        let digest = CanonicalSerializer.sign_digest(&signed).unwrap();
        let signature = Signature::from_slice(sig.as_bytes()).unwrap();
        assert!(signer
            .verifying_key(&path)
            .unwrap()
            .verify(&digest, &signature)
            .is_ok());
    }

    #[tokio::test]
    async fn unknown_key_path_fails() {
        let signer = Ed25519Signer::new();
        let err = sign_transaction(
            &signer,
            &CanonicalSerializer,
            &transfer(),
            &KeyPath::new(0, 0, 0),
            0,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SignerError::UnknownKey(_)));
    }

    #[tokio::test]
    async fn output_carries_only_the_new_signature() {
        let a = KeyPath::new(0, 0, 0);
        let b = KeyPath::new(1, 1, 0);
        let signer = Ed25519Signer::new().with_key(a, key(1)).with_key(b, key(2));

        let first = sign_transaction(&signer, &CanonicalSerializer, &transfer(), &a, 0)
            .await
            .unwrap();
        let second = sign_transaction(&signer, &CanonicalSerializer, &first, &b, 0)
            .await
            .unwrap();
        assert_eq!(second.signature_count(), 1);
    }
}
