//! Transaction construction via the builder pattern.
//!
//! The [`TransactionBuilder`] collects user inputs (recipient, amount,
//! memo or release schedule, nonce, energy budget, expiry), validates them,
//! and produces an unsigned [`AccountTransaction`]. Energy is estimated from
//! the cost model unless the caller pins it explicitly.
//!
//! The builder does not sign. Signatures are attached in
//! [`super::signing`] or collected from co-signers through
//! [`crate::multisig`].

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::cost;
use super::types::{Amount, EncryptedAmount, TransactionKind};
use crate::config::{DEFAULT_TRANSACTION_EXPIRY, MAX_MEMO_SIZE, MAX_SCHEDULE_LENGTH};

// ---------------------------------------------------------------------------
// BuildError
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("transfer amount must be non-zero")]
    ZeroAmount,

    #[error("memo is {size} bytes, maximum is {max}")]
    MemoTooLarge { size: usize, max: usize },

    #[error("release schedule is empty")]
    EmptySchedule,

    #[error("release schedule has {len} entries, maximum is {max}")]
    ScheduleTooLong { len: usize, max: usize },

    #[error("release {index} is not strictly later than the previous one")]
    ScheduleNotIncreasing { index: usize },

    #[error("release schedule total exceeds the largest representable amount")]
    ScheduleTotalOverflow,

    #[error("expiry {expiry} is not in the future (now {now})")]
    ExpiryInPast { expiry: u64, now: u64 },

    #[error("signature threshold must be at least 1")]
    ZeroThreshold,

    #[error("{0} cannot be built from plain inputs")]
    UnsupportedKind(TransactionKind),
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// One release of a scheduled transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulePoint {
    /// Release time, unix milliseconds.
    pub timestamp: u64,
    pub amount: Amount,
}

/// A credential being added to an account by an update-credentials
/// transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddedCredential {
    pub index: u32,
    /// Hex-encoded credential registration id.
    pub credential_id: String,
}

/// Data produced by the external shielded-amount prover for transfers that
/// spend from the sender's self encrypted amount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShieldedSpend {
    /// Ciphertext of the transferred amount (encrypted transfers only).
    pub transfer_amount: Option<EncryptedAmount>,
    pub remaining_encrypted_amount: EncryptedAmount,
    pub remaining_decrypted_amount: Amount,
    /// Index up to which incoming amounts were aggregated into the input.
    pub index: u64,
    /// Hex-encoded proof.
    pub proof: String,
}

/// The operation-specific part of an account transaction.
///
/// The JSON tag is `transactionKind`; a memo turns the transfer variants
/// into their `WithMemo` kind without changing the variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transactionKind", rename_all = "camelCase")]
pub enum Payload {
    #[serde(rename_all = "camelCase")]
    SimpleTransfer {
        to_address: String,
        amount: Amount,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        memo: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    EncryptedTransfer {
        to_address: String,
        plain_transfer_amount: Amount,
        transfer_amount: EncryptedAmount,
        remaining_encrypted_amount: EncryptedAmount,
        remaining_decrypted_amount: Amount,
        index: u64,
        proof: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        memo: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    TransferToEncrypted {
        amount: Amount,
        /// Filled in by the wallet once the new self amount is known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_self_encrypted_amount: Option<EncryptedAmount>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        remaining_decrypted_amount: Option<Amount>,
    },
    #[serde(rename_all = "camelCase")]
    TransferToPublic {
        transfer_amount: Amount,
        remaining_encrypted_amount: EncryptedAmount,
        remaining_decrypted_amount: Amount,
        index: u64,
        proof: String,
    },
    #[serde(rename_all = "camelCase")]
    TransferWithSchedule {
        to_address: String,
        schedule: Vec<SchedulePoint>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        memo: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    UpdateCredentials {
        added_credentials: Vec<AddedCredential>,
        removed_cred_ids: Vec<String>,
        threshold: u32,
        current_number_of_credentials: u32,
    },
    #[serde(rename_all = "camelCase")]
    RegisterData {
        /// Hex-encoded data.
        data: String,
    },
}

impl Payload {
    pub fn kind(&self) -> TransactionKind {
        match self {
            Self::SimpleTransfer { memo: None, .. } => TransactionKind::SimpleTransfer,
            Self::SimpleTransfer { memo: Some(_), .. } => TransactionKind::SimpleTransferWithMemo,
            Self::EncryptedTransfer { memo: None, .. } => TransactionKind::EncryptedTransfer,
            Self::EncryptedTransfer { memo: Some(_), .. } => {
                TransactionKind::EncryptedTransferWithMemo
            }
            Self::TransferToEncrypted { .. } => TransactionKind::TransferToEncrypted,
            Self::TransferToPublic { .. } => TransactionKind::TransferToPublic,
            Self::TransferWithSchedule { memo: None, .. } => TransactionKind::TransferWithSchedule,
            Self::TransferWithSchedule { memo: Some(_), .. } => {
                TransactionKind::TransferWithScheduleAndMemo
            }
            Self::UpdateCredentials { .. } => TransactionKind::UpdateCredentials,
            Self::RegisterData { .. } => TransactionKind::RegisterData,
        }
    }

    pub fn to_address(&self) -> Option<&str> {
        match self {
            Self::SimpleTransfer { to_address, .. }
            | Self::EncryptedTransfer { to_address, .. }
            | Self::TransferWithSchedule { to_address, .. } => Some(to_address),
            _ => None,
        }
    }

    /// Plaintext amount moved by the payload. Zero for kinds that move
    /// nothing. A schedule whose total does not fit saturates at
    /// `u64::MAX`; the builder refuses such schedules, imported files may
    /// still carry one.
    pub fn amount(&self) -> Amount {
        match self {
            Self::SimpleTransfer { amount, .. } | Self::TransferToEncrypted { amount, .. } => {
                *amount
            }
            Self::EncryptedTransfer {
                plain_transfer_amount,
                ..
            } => *plain_transfer_amount,
            Self::TransferToPublic {
                transfer_amount, ..
            } => *transfer_amount,
            Self::TransferWithSchedule { schedule, .. } => {
                Amount(
                    schedule
                        .iter()
                        .fold(0u64, |total, p| total.saturating_add(p.amount.0)),
                )
            }
            Self::UpdateCredentials { .. } | Self::RegisterData { .. } => Amount::ZERO,
        }
    }

    pub fn memo(&self) -> Option<&str> {
        match self {
            Self::SimpleTransfer { memo, .. }
            | Self::EncryptedTransfer { memo, .. }
            | Self::TransferWithSchedule { memo, .. } => memo.as_deref(),
            _ => None,
        }
    }

    /// New self encrypted amount (and its plaintext, when known) that the
    /// sender account ends up with once this payload executes.
    pub fn self_amount_effect(&self) -> Option<(EncryptedAmount, Option<Amount>)> {
        match self {
            Self::EncryptedTransfer {
                remaining_encrypted_amount,
                remaining_decrypted_amount,
                ..
            }
            | Self::TransferToPublic {
                remaining_encrypted_amount,
                remaining_decrypted_amount,
                ..
            } => Some((
                remaining_encrypted_amount.clone(),
                Some(*remaining_decrypted_amount),
            )),
            Self::TransferToEncrypted {
                new_self_encrypted_amount: Some(new_self),
                remaining_decrypted_amount,
                ..
            } => Some((new_self.clone(), *remaining_decrypted_amount)),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// AccountTransaction
// ---------------------------------------------------------------------------

/// An unsigned account transaction.
///
/// Signatures live next to the transaction (see
/// [`crate::multisig::interchange::AccountTransactionWithSignature`]), never
/// inside it, so the sign digest is stable while signatures accumulate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountTransaction {
    pub sender: String,
    pub nonce: u64,
    /// Maximum energy the sender is willing to pay for.
    pub energy_amount: u64,
    /// Unix seconds after which the chain drops the transaction.
    pub expiry: u64,
    pub payload: Payload,
}

impl AccountTransaction {
    pub fn kind(&self) -> TransactionKind {
        self.payload.kind()
    }
}

// ---------------------------------------------------------------------------
// TransactionBuilder
// ---------------------------------------------------------------------------

/// Fluent builder for unsigned [`AccountTransaction`] values.
///
/// ```rust,no_run
/// use nova_wallet::transaction::{Amount, TransactionBuilder, TransactionKind};
///
/// let tx = TransactionBuilder::new(TransactionKind::SimpleTransfer)
///     .sender("4sender")
///     .recipient("4receiver")
///     .amount(Amount(100))
///     .nonce(7)
///     .build()
///     .unwrap();
/// ```
///
/// Memo variants are selected by attaching a memo; passing a `WithMemo`
/// kind without one is a [`BuildError::MissingField`].
pub struct TransactionBuilder {
    kind: TransactionKind,
    sender: String,
    recipient: Option<String>,
    amount: Amount,
    memo: Option<String>,
    schedule: Vec<SchedulePoint>,
    shielded: Option<ShieldedSpend>,
    added_credentials: Vec<AddedCredential>,
    removed_cred_ids: Vec<String>,
    threshold: Option<u32>,
    current_number_of_credentials: u32,
    data: Option<Vec<u8>>,
    nonce: u64,
    energy: Option<u64>,
    expiry: Option<u64>,
    signature_count: u32,
}

impl TransactionBuilder {
    /// Creates a builder for `kind`. The expected signature count defaults
    /// to one; raise it for multi-signature accounts so the energy estimate
    /// covers every co-signer.
    pub fn new(kind: TransactionKind) -> Self {
        Self {
            kind,
            sender: String::new(),
            recipient: None,
            amount: Amount::ZERO,
            memo: None,
            schedule: Vec::new(),
            shielded: None,
            added_credentials: Vec::new(),
            removed_cred_ids: Vec::new(),
            threshold: None,
            current_number_of_credentials: 0,
            data: None,
            nonce: 0,
            energy: None,
            expiry: None,
            signature_count: 1,
        }
    }

    pub fn sender(mut self, address: &str) -> Self {
        self.sender = address.to_string();
        self
    }

    pub fn recipient(mut self, address: &str) -> Self {
        self.recipient = Some(address.to_string());
        self
    }

    pub fn amount(mut self, amount: Amount) -> Self {
        self.amount = amount;
        self
    }

    pub fn memo(mut self, memo: &str) -> Self {
        self.memo = Some(memo.to_string());
        self
    }

    pub fn schedule(mut self, schedule: Vec<SchedulePoint>) -> Self {
        self.schedule = schedule;
        self
    }

    /// Attaches the prover output for shielded spends.
    pub fn shielded(mut self, spend: ShieldedSpend) -> Self {
        self.shielded = Some(spend);
        self
    }

    pub fn add_credential(mut self, index: u32, credential_id: &str) -> Self {
        self.added_credentials.push(AddedCredential {
            index,
            credential_id: credential_id.to_string(),
        });
        self
    }

    pub fn remove_credential(mut self, credential_id: &str) -> Self {
        self.removed_cred_ids.push(credential_id.to_string());
        self
    }

    /// New account signature threshold (update-credentials only).
    pub fn threshold(mut self, threshold: u32) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn current_number_of_credentials(mut self, count: u32) -> Self {
        self.current_number_of_credentials = count;
        self
    }

    pub fn data(mut self, data: &[u8]) -> Self {
        self.data = Some(data.to_vec());
        self
    }

    pub fn nonce(mut self, nonce: u64) -> Self {
        self.nonce = nonce;
        self
    }

    /// Pins the energy budget instead of estimating it.
    pub fn energy(mut self, energy: u64) -> Self {
        self.energy = Some(energy);
        self
    }

    /// Sets the expiry explicitly (unix seconds).
    ///
    /// If not called, `build()` uses now plus
    /// [`DEFAULT_TRANSACTION_EXPIRY`].
    pub fn expiry(mut self, expiry: u64) -> Self {
        self.expiry = Some(expiry);
        self
    }

    pub fn signature_count(mut self, count: u32) -> Self {
        self.signature_count = count.max(1);
        self
    }

    fn take_recipient(&mut self) -> Result<String, BuildError> {
        self.recipient
            .take()
            .filter(|r| !r.is_empty())
            .ok_or(BuildError::MissingField("recipient"))
    }

    fn take_shielded(&mut self) -> Result<ShieldedSpend, BuildError> {
        self.shielded
            .take()
            .ok_or(BuildError::MissingField("shielded spend"))
    }

    fn check_memo(&self, with_memo: bool) -> Result<(), BuildError> {
        match (&self.memo, with_memo) {
            (None, true) => Err(BuildError::MissingField("memo")),
            (Some(memo), _) if memo.len() > MAX_MEMO_SIZE => Err(BuildError::MemoTooLarge {
                size: memo.len(),
                max: MAX_MEMO_SIZE,
            }),
            _ => Ok(()),
        }
    }

    fn check_amount(&self) -> Result<(), BuildError> {
        if self.amount.is_zero() {
            return Err(BuildError::ZeroAmount);
        }
        Ok(())
    }

    fn check_schedule(&self) -> Result<(), BuildError> {
        if self.schedule.is_empty() {
            return Err(BuildError::EmptySchedule);
        }
        if self.schedule.len() > MAX_SCHEDULE_LENGTH {
            return Err(BuildError::ScheduleTooLong {
                len: self.schedule.len(),
                max: MAX_SCHEDULE_LENGTH,
            });
        }
        for (index, pair) in self.schedule.windows(2).enumerate() {
            if pair[1].timestamp <= pair[0].timestamp {
                return Err(BuildError::ScheduleNotIncreasing { index: index + 1 });
            }
        }
        if self.schedule.iter().any(|p| p.amount.is_zero()) {
            return Err(BuildError::ZeroAmount);
        }
        self.schedule
            .iter()
            .try_fold(Amount::ZERO, |total, p| total.checked_add(p.amount))
            .ok_or(BuildError::ScheduleTotalOverflow)?;
        Ok(())
    }

    fn build_payload(&mut self) -> Result<Payload, BuildError> {
        use TransactionKind::*;

        let payload = match self.kind {
            SimpleTransfer | SimpleTransferWithMemo => {
                self.check_memo(self.kind == SimpleTransferWithMemo)?;
                self.check_amount()?;
                Payload::SimpleTransfer {
                    to_address: self.take_recipient()?,
                    amount: self.amount,
                    memo: self.memo.take(),
                }
            }
            EncryptedTransfer | EncryptedTransferWithMemo => {
                self.check_memo(self.kind == EncryptedTransferWithMemo)?;
                self.check_amount()?;
                let to_address = self.take_recipient()?;
                let spend = self.take_shielded()?;
                Payload::EncryptedTransfer {
                    to_address,
                    plain_transfer_amount: self.amount,
                    transfer_amount: spend
                        .transfer_amount
                        .ok_or(BuildError::MissingField("encrypted transfer amount"))?,
                    remaining_encrypted_amount: spend.remaining_encrypted_amount,
                    remaining_decrypted_amount: spend.remaining_decrypted_amount,
                    index: spend.index,
                    proof: spend.proof,
                    memo: self.memo.take(),
                }
            }
            TransferToEncrypted => {
                self.check_amount()?;
                Payload::TransferToEncrypted {
                    amount: self.amount,
                    new_self_encrypted_amount: None,
                    remaining_decrypted_amount: None,
                }
            }
            TransferToPublic => {
                self.check_amount()?;
                let spend = self.take_shielded()?;
                Payload::TransferToPublic {
                    transfer_amount: self.amount,
                    remaining_encrypted_amount: spend.remaining_encrypted_amount,
                    remaining_decrypted_amount: spend.remaining_decrypted_amount,
                    index: spend.index,
                    proof: spend.proof,
                }
            }
            TransferWithSchedule | TransferWithScheduleAndMemo => {
                self.check_memo(self.kind == TransferWithScheduleAndMemo)?;
                self.check_schedule()?;
                Payload::TransferWithSchedule {
                    to_address: self.take_recipient()?,
                    schedule: std::mem::take(&mut self.schedule),
                    memo: self.memo.take(),
                }
            }
            UpdateCredentials => {
                let threshold = self.threshold.ok_or(BuildError::MissingField("threshold"))?;
                if threshold == 0 {
                    return Err(BuildError::ZeroThreshold);
                }
                Payload::UpdateCredentials {
                    added_credentials: std::mem::take(&mut self.added_credentials),
                    removed_cred_ids: std::mem::take(&mut self.removed_cred_ids),
                    threshold,
                    current_number_of_credentials: self.current_number_of_credentials,
                }
            }
            RegisterData => {
                let data = self.data.take().ok_or(BuildError::MissingField("data"))?;
                Payload::RegisterData {
                    data: hex::encode(data),
                }
            }
        };
        Ok(payload)
    }

    /// Consumes the builder and produces an unsigned [`AccountTransaction`].
    pub fn build(mut self) -> Result<AccountTransaction, BuildError> {
        if self.sender.is_empty() {
            return Err(BuildError::MissingField("sender"));
        }

        let now = Utc::now().timestamp() as u64;
        let expiry = self
            .expiry
            .unwrap_or(now + DEFAULT_TRANSACTION_EXPIRY.as_secs());
        if expiry <= now {
            return Err(BuildError::ExpiryInPast { expiry, now });
        }

        let payload = self.build_payload()?;
        let energy_amount = self
            .energy
            .unwrap_or_else(|| cost::estimate_energy(&payload, self.signature_count));

        Ok(AccountTransaction {
            sender: self.sender,
            nonce: self.nonce,
            energy_amount,
            expiry,
            payload,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
