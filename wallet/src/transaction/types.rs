//! Core type definitions for wallet transactions.
//!
//! These types form the vocabulary shared by the builder, the poller, the
//! proposal store, and the balance reconciler. They are intentionally kept
//! small and `Copy`-friendly where possible.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of one of an account's credentials. Used as the key of the
/// aggregated signature map on account transactions.
pub type CredentialIndex = u32;

/// Index of a key within a credential.
pub type KeyIndex = u32;

// ---------------------------------------------------------------------------
// TransactionKind
// ---------------------------------------------------------------------------

/// Discriminant for the operation an account transaction represents.
///
/// The numeric [`TransactionKind::id`] is the on-chain tag and is what the
/// canonical serializer writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransactionKind {
    SimpleTransfer,
    SimpleTransferWithMemo,
    EncryptedTransfer,
    EncryptedTransferWithMemo,
    TransferToEncrypted,
    TransferToPublic,
    TransferWithSchedule,
    TransferWithScheduleAndMemo,
    UpdateCredentials,
    RegisterData,
}

impl TransactionKind {
    /// On-chain transaction type tag.
    pub fn id(self) -> u8 {
        match self {
            Self::SimpleTransfer => 3,
            Self::EncryptedTransfer => 16,
            Self::TransferToEncrypted => 17,
            Self::TransferToPublic => 18,
            Self::TransferWithSchedule => 19,
            Self::UpdateCredentials => 20,
            Self::RegisterData => 21,
            Self::SimpleTransferWithMemo => 22,
            Self::EncryptedTransferWithMemo => 23,
            Self::TransferWithScheduleAndMemo => 24,
        }
    }

    /// Shielded transfers whose amount is only known as ciphertext.
    pub fn is_encrypted_transfer(self) -> bool {
        matches!(self, Self::EncryptedTransfer | Self::EncryptedTransferWithMemo)
    }

    /// Kinds that rewrite the sender's self encrypted amount when they
    /// finalize.
    pub fn touches_self_amount(self) -> bool {
        matches!(
            self,
            Self::EncryptedTransfer
                | Self::EncryptedTransferWithMemo
                | Self::TransferToEncrypted
                | Self::TransferToPublic
        )
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SimpleTransfer => "SimpleTransfer",
            Self::SimpleTransferWithMemo => "SimpleTransferWithMemo",
            Self::EncryptedTransfer => "EncryptedTransfer",
            Self::EncryptedTransferWithMemo => "EncryptedTransferWithMemo",
            Self::TransferToEncrypted => "TransferToEncrypted",
            Self::TransferToPublic => "TransferToPublic",
            Self::TransferWithSchedule => "TransferWithSchedule",
            Self::TransferWithScheduleAndMemo => "TransferWithScheduleAndMemo",
            Self::UpdateCredentials => "UpdateCredentials",
            Self::RegisterData => "RegisterData",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// TransactionStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a local transaction record.
///
/// `Pending` is the only non-terminal state. Transitions are monotonic:
/// once a record is `Finalized`, `Rejected`, or `Failed` it never moves
/// again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Submitted (or first observed), outcome not yet known.
    Pending,
    /// Included in a finalized block and executed successfully.
    Finalized,
    /// Dropped by the chain before inclusion.
    Rejected,
    /// Included in a finalized block but execution failed.
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Finalized => write!(f, "Finalized"),
            Self::Rejected => write!(f, "Rejected"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// AccountStatus
// ---------------------------------------------------------------------------

/// Deployment state of a local account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountStatus {
    /// Deployment transaction submitted, not yet finalized.
    Pending,
    Confirmed,
    Rejected,
    /// Created in the genesis block; never had a deployment transaction.
    Genesis,
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Confirmed => write!(f, "Confirmed"),
            Self::Rejected => write!(f, "Rejected"),
            Self::Genesis => write!(f, "Genesis"),
        }
    }
}

// ---------------------------------------------------------------------------
// Amount
// ---------------------------------------------------------------------------

/// Number of decimal places used when displaying an [`Amount`].
pub const AMOUNT_DECIMALS: u32 = 6;

/// An amount of the native token in its smallest indivisible unit.
///
/// Always an integer. `Amount(1_000_000)` is one whole token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(pub u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    /// Human-readable form with decimal formatting, e.g. `"1.500000"`.
    pub fn display_decimal(self) -> String {
        let divisor = 10u64.pow(AMOUNT_DECIMALS);
        format!(
            "{}.{:0>width$}",
            self.0 / divisor,
            self.0 % divisor,
            width = AMOUNT_DECIMALS as usize
        )
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Hashes, ciphertexts, signatures
// ---------------------------------------------------------------------------

/// Hex-encoded 32-byte transaction hash.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionHash(String);

impl TransactionHash {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(bytes))
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(hex_str)?;
        Ok(Self::from_bytes(&bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A confidential amount as it appears on chain: an opaque, hex-encoded
/// ciphertext. Only the account's secret material can open it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncryptedAmount(pub String);

impl EncryptedAmount {
    pub fn new(hex_ciphertext: impl Into<String>) -> Self {
        Self(hex_ciphertext.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EncryptedAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Ciphertexts are 192 bytes; the prefix is enough to tell them apart
        // in logs.
        let prefix: String = self.0.chars().take(16).collect();
        write!(f, "{}…", prefix)
    }
}

/// Raw signature bytes, hex-encoded on the wire.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SignatureBytes(pub Vec<u8>);

impl SignatureBytes {
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SignatureBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignatureBytes({})", self.to_hex())
    }
}

impl Serialize for SignatureBytes {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for SignatureBytes {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s)
            .map(SignatureBytes)
            .map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
