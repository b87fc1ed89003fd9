//! Signature file interchange format.
//!
//! Co-signers live on separate, non-networked machines; a signature travels
//! between them as a JSON file holding the full transaction plus the
//! signatures its author added. Two shapes exist:
//!
//! - an **account transaction with signature**: `{ "transaction": {...},
//!   "signatures": { "<credentialIndex>": { "<keyIndex>": "<hex>" } } }`
//! - an **update instruction**: `{ "header": {...}, "payload": {...},
//!   "type": n, "signatures": [ { "authorizationKeyIndex": i,
//!   "signature": "<hex>" } ] }`
//!
//! [`decode_signature_file`] turns raw bytes into an explicit
//! [`SignedTransaction`] variant (or [`ImportError::InvalidFormat`]) at the
//! boundary. Top-level fields this version does not know about are kept in
//! `extra` and written back out unchanged.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::collector::ImportError;
use crate::transaction::builder::AccountTransaction;
use crate::transaction::types::{CredentialIndex, KeyIndex, SignatureBytes, TransactionKind};

/// Signatures of an account transaction, by credential then key index.
pub type SignatureMap = BTreeMap<CredentialIndex, BTreeMap<KeyIndex, SignatureBytes>>;

// ---------------------------------------------------------------------------
// Account transactions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountTransactionWithSignature {
    pub transaction: AccountTransaction,
    #[serde(with = "index_keys")]
    pub signatures: SignatureMap,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AccountTransactionWithSignature {
    pub fn unsigned(transaction: AccountTransaction) -> Self {
        Self {
            transaction,
            signatures: SignatureMap::new(),
            extra: Map::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Update instructions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateHeader {
    pub sequence_number: u64,
    /// Unix seconds; zero means "immediately".
    pub effective_time: u64,
    pub timeout: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInstructionSignature {
    pub authorization_key_index: u32,
    pub signature: SignatureBytes,
}

/// A chain-governance update, signed by level-2 authorization keys rather
/// than account credentials. The payload is opaque to the wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInstruction {
    pub header: UpdateHeader,
    pub payload: Value,
    #[serde(rename = "type")]
    pub update_type: u32,
    pub signatures: Vec<UpdateInstructionSignature>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ---------------------------------------------------------------------------
// SignedTransaction
// ---------------------------------------------------------------------------

/// Either shape of a (partially) signed transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", content = "body", rename_all = "camelCase")]
pub enum SignedTransaction {
    AccountTransaction(AccountTransactionWithSignature),
    UpdateInstruction(UpdateInstruction),
}

impl SignedTransaction {
    /// Number of distinct signers: credentials for account transactions,
    /// authorization keys for update instructions.
    pub fn signature_count(&self) -> usize {
        match self {
            Self::AccountTransaction(tx) => tx.signatures.len(),
            Self::UpdateInstruction(update) => update.signatures.len(),
        }
    }

    /// Kind of the wrapped account transaction; `None` for updates.
    pub fn account_kind(&self) -> Option<TransactionKind> {
        match self {
            Self::AccountTransaction(tx) => Some(tx.transaction.kind()),
            Self::UpdateInstruction(_) => None,
        }
    }

    pub fn shape_name(&self) -> &'static str {
        match self {
            Self::AccountTransaction(_) => "account transaction",
            Self::UpdateInstruction(_) => "update instruction",
        }
    }

    /// Same transaction with every signature stripped.
    pub fn without_signatures(&self) -> Self {
        match self {
            Self::AccountTransaction(tx) => {
                let mut tx = tx.clone();
                tx.signatures.clear();
                Self::AccountTransaction(tx)
            }
            Self::UpdateInstruction(update) => {
                let mut update = update.clone();
                update.signatures.clear();
                Self::UpdateInstruction(update)
            }
        }
    }

    /// Encodes the bare shape (no `shape` tag) for a signature file.
    pub fn to_file_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Self::AccountTransaction(tx) => serde_json::to_vec_pretty(tx),
            Self::UpdateInstruction(update) => serde_json::to_vec_pretty(update),
        }
    }
}

/// Decodes a signature file into its explicit variant.
///
/// The shape is decided by structure: an object with `header` and an array
/// of `signatures` is an update instruction; an object with `transaction`
/// and a `signatures` object is an account transaction. Anything else, or a
/// recognized shape with malformed fields, is `InvalidFormat`.
pub fn decode_signature_file(bytes: &[u8]) -> Result<SignedTransaction, ImportError> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| ImportError::InvalidFormat(format!("not valid JSON: {e}")))?;

    let object = value
        .as_object()
        .ok_or_else(|| ImportError::InvalidFormat("expected a JSON object".into()))?;

    let signatures = object.get("signatures");
    let is_update = object.contains_key("header") && signatures.is_some_and(Value::is_array);
    let is_account =
        object.contains_key("transaction") && signatures.is_some_and(Value::is_object);

    if is_update {
        serde_json::from_value(value)
            .map(SignedTransaction::UpdateInstruction)
            .map_err(|e| ImportError::InvalidFormat(format!("malformed update instruction: {e}")))
    } else if is_account {
        serde_json::from_value(value)
            .map(SignedTransaction::AccountTransaction)
            .map_err(|e| {
                ImportError::InvalidFormat(format!("malformed account transaction: {e}"))
            })
    } else {
        Err(ImportError::InvalidFormat(
            "neither an account transaction with signatures nor an update instruction".into(),
        ))
    }
}

/// JSON object keys are strings; the indices are integers. Going through
/// `String` keeps decoding working when the enclosing struct is buffered
/// (as `#[serde(flatten)]` does).
mod index_keys {
    use std::collections::BTreeMap;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::SignatureMap;
    use crate::transaction::types::SignatureBytes;

    pub fn serialize<S: Serializer>(map: &SignatureMap, serializer: S) -> Result<S::Ok, S::Error> {
        let as_strings: BTreeMap<String, BTreeMap<String, &SignatureBytes>> = map
            .iter()
            .map(|(cred, keys)| {
                let keys = keys.iter().map(|(k, sig)| (k.to_string(), sig)).collect();
                (cred.to_string(), keys)
            })
            .collect();
        as_strings.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SignatureMap, D::Error> {
        let raw = BTreeMap::<String, BTreeMap<String, SignatureBytes>>::deserialize(deserializer)?;
        let mut map = SignatureMap::new();
        for (cred, keys) in raw {
            let cred: u32 = cred
                .parse()
                .map_err(|_| D::Error::custom(format!("invalid credential index {cred:?}")))?;
            let mut parsed = BTreeMap::new();
            for (key, sig) in keys {
                let key: u32 = key
                    .parse()
                    .map_err(|_| D::Error::custom(format!("invalid key index {key:?}")))?;
                parsed.insert(key, sig);
            }
            map.insert(cred, parsed);
        }
        Ok(map)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
