//! Reasons a finalized transaction can fail execution.
//!
//! The chain reports failures as a string tag. Known tags map to
//! [`RejectReason`]; anything else is kept verbatim as
//! [`RejectReasonTag::Unknown`] so that reasons introduced by newer protocol
//! versions are still recorded and shown.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! reject_reasons {
    ($($name:ident => $text:literal,)*) => {
        /// Execution failure reasons this wallet knows how to describe.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum RejectReason {
            $($name,)*
        }

        impl RejectReason {
            /// Looks up a chain tag. Returns `None` for unrecognized tags.
            pub fn from_tag(tag: &str) -> Option<Self> {
                match tag {
                    $(stringify!($name) => Some(Self::$name),)*
                    _ => None,
                }
            }

            pub fn tag(self) -> &'static str {
                match self {
                    $(Self::$name => stringify!($name),)*
                }
            }

            /// Human-readable description.
            pub fn display_text(self) -> &'static str {
                match self {
                    $(Self::$name => $text,)*
                }
            }
        }
    };
}

reject_reasons! {
    InvalidAccountReference => "The referenced account does not exist",
    AmountTooLarge => "Insufficient funds",
    SerializationFailure => "Transaction payload could not be parsed",
    OutOfEnergy => "Ran out of energy",
    InvalidProof => "The attached proof is invalid",
    NonExistentCredentialID => "The credential id does not exist",
    KeyIndexAlreadyInUse => "The key index is already in use",
    InvalidAccountThreshold => "The signature threshold exceeds the number of credentials",
    InvalidCredentialKeySignThreshold => "The credential key threshold exceeds the number of keys",
    InvalidEncryptedAmountTransferProof => "The shielded transfer proof is invalid",
    InvalidTransferToPublicProof => "The unshielding proof is invalid",
    EncryptedAmountSelfTransfer => "A shielded transfer cannot target the sender",
    InvalidIndexOnEncryptedTransfer => "The aggregation index of the shielded transfer is invalid",
    ZeroScheduledAmount => "A scheduled release has a zero amount",
    NonIncreasingSchedule => "Release times are not strictly increasing",
    FirstScheduledReleaseExpired => "The first release time has already passed",
    ScheduledSelfTransfer => "A scheduled transfer cannot target the sender",
    InvalidCredentials => "One or more credentials are invalid",
    DuplicateCredIDs => "A credential id is duplicated",
    NonExistentCredIDs => "A credential id to remove does not exist",
    RemoveFirstCredential => "The first credential of an account cannot be removed",
    CredentialHolderDidNotSign => "The credential holder did not sign",
    NotAllowedMultipleCredentials => "The account does not allow multiple credentials",
    NotAllowedToReceiveEncrypted => "The receiver does not accept shielded transfers",
    NotAllowedToHandleEncrypted => "The sender cannot handle shielded amounts",
    // Appended so the binary encoding of stored reasons stays stable.
    ModuleNotWF => "Smart contract module failed to typecheck",
    ModuleHashAlreadyExists => "A module with the same hash already exists",
    InvalidInitMethod => "No such init method in the module",
    InvalidReceiveMethod => "No such receive method in the contract",
    InvalidModuleReference => "The referenced module does not exist",
    InvalidContractAddress => "No contract instance exists at the given address",
    RuntimeFailure => "Runtime failure while executing the smart contract",
    RejectedInit => "The contract refused to initialize",
    RejectedReceive => "Rejected by contract logic",
    NonExistentRewardAccount => "The designated reward account does not exist",
    AlreadyABaker => "The account is already a baker",
    NotABaker => "The account is not a baker",
    InsufficientBalanceForBakerStake => "Insufficient balance to cover the requested stake",
    StakeUnderMinimumThresholdForBaking => "The stake is below the minimum required for baking",
    BakerInCooldown => "The baker is in its cooldown period",
    DuplicateAggregationKey => "The aggregation key is already in use",
}

/// A stored reject reason: either a known one or the raw tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectReasonTag {
    Known(RejectReason),
    Unknown(String),
}

impl RejectReasonTag {
    /// Never fails: unknown tags are preserved as-is.
    pub fn parse(tag: &str) -> Self {
        match RejectReason::from_tag(tag) {
            Some(reason) => Self::Known(reason),
            None => Self::Unknown(tag.to_string()),
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            Self::Known(reason) => reason.tag(),
            Self::Unknown(raw) => raw,
        }
    }

    pub fn display_text(&self) -> &str {
        match self {
            Self::Known(reason) => reason.display_text(),
            Self::Unknown(raw) => raw,
        }
    }
}

impl fmt::Display for RejectReasonTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_text())
    }
}
