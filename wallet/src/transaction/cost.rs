//! Energy cost model.
//!
//! The chain charges energy for every account transaction as
//!
//! ```text
//! cost = A * signature_count + B * (header_size + payload_size) + type_cost
//! ```
//!
//! where `A` and `B` are [`COST_PER_SIGNATURE`] and [`COST_PER_BYTE`]. The
//! payload sizes below are the sizes of the on-chain binary encoding, not of
//! the JSON interchange representation.

use super::builder::Payload;
use crate::config::{
    COST_PER_BYTE, COST_PER_SIGNATURE, ENCRYPTED_TRANSFER_COST, REGISTER_DATA_COST,
    SCHEDULED_TRANSFER_PER_RELEASE_COST, SIMPLE_TRANSFER_COST, TRANSACTION_HEADER_SIZE,
    TRANSFER_TO_ENCRYPTED_COST, TRANSFER_TO_PUBLIC_COST, UPDATE_CREDENTIALS_BASE_COST,
    UPDATE_CREDENTIALS_PER_EXISTING_COST, UPDATE_CREDENTIALS_PER_NEW_COST,
};

const ADDRESS_SIZE: u64 = 32;
const AMOUNT_SIZE: u64 = 8;
const CIPHERTEXT_SIZE: u64 = 192;
const CREDENTIAL_ID_SIZE: u64 = 48;
const TAG_SIZE: u64 = 1;

/// Raw cost formula.
pub fn calculate_energy_cost(signature_count: u64, payload_size: u64, type_cost: u64) -> u64 {
    COST_PER_SIGNATURE * signature_count
        + COST_PER_BYTE * (TRANSACTION_HEADER_SIZE + payload_size)
        + type_cost
}

fn memo_size(memo: &Option<String>) -> u64 {
    // 2-byte length prefix followed by the memo bytes.
    memo.as_ref().map_or(0, |m| 2 + m.len() as u64)
}

fn proof_size(proof: &str) -> u64 {
    (proof.len() / 2) as u64
}

/// Size in bytes of the binary encoding of `payload`.
pub fn payload_size(payload: &Payload) -> u64 {
    match payload {
        Payload::SimpleTransfer { memo, .. } => {
            TAG_SIZE + ADDRESS_SIZE + AMOUNT_SIZE + memo_size(memo)
        }
        Payload::EncryptedTransfer { proof, memo, .. } => {
            // receiver, remaining amount, transfer amount, index, proof
            TAG_SIZE
                + ADDRESS_SIZE
                + 2 * CIPHERTEXT_SIZE
                + 8
                + proof_size(proof)
                + memo_size(memo)
        }
        Payload::TransferToEncrypted { .. } => TAG_SIZE + AMOUNT_SIZE,
        Payload::TransferToPublic { proof, .. } => {
            TAG_SIZE + CIPHERTEXT_SIZE + AMOUNT_SIZE + 8 + proof_size(proof)
        }
        Payload::TransferWithSchedule { schedule, memo, .. } => {
            TAG_SIZE
                + ADDRESS_SIZE
                + 1
                + schedule.len() as u64 * (8 + AMOUNT_SIZE)
                + memo_size(memo)
        }
        Payload::UpdateCredentials {
            added_credentials,
            removed_cred_ids,
            ..
        } => {
            TAG_SIZE
                + 1
                + added_credentials.len() as u64 * (1 + CREDENTIAL_ID_SIZE)
                + 1
                + removed_cred_ids.len() as u64 * CREDENTIAL_ID_SIZE
                + 1
        }
        Payload::RegisterData { data } => TAG_SIZE + 2 + (data.len() / 2) as u64,
    }
}

/// Fixed execution cost of the payload's transaction type.
pub fn type_cost(payload: &Payload) -> u64 {
    match payload {
        Payload::SimpleTransfer { .. } => SIMPLE_TRANSFER_COST,
        Payload::EncryptedTransfer { .. } => ENCRYPTED_TRANSFER_COST,
        Payload::TransferToEncrypted { .. } => TRANSFER_TO_ENCRYPTED_COST,
        Payload::TransferToPublic { .. } => TRANSFER_TO_PUBLIC_COST,
        Payload::TransferWithSchedule { schedule, .. } => {
            SCHEDULED_TRANSFER_PER_RELEASE_COST * schedule.len() as u64
        }
        Payload::UpdateCredentials {
            added_credentials,
            current_number_of_credentials,
            ..
        } => {
            UPDATE_CREDENTIALS_BASE_COST
                + UPDATE_CREDENTIALS_PER_EXISTING_COST * u64::from(*current_number_of_credentials)
                + UPDATE_CREDENTIALS_PER_NEW_COST * added_credentials.len() as u64
        }
        Payload::RegisterData { .. } => REGISTER_DATA_COST,
    }
}

/// Energy needed to execute `payload` carrying `signature_count` signatures.
pub fn estimate_energy(payload: &Payload, signature_count: u32) -> u64 {
    calculate_energy_cost(
        u64::from(signature_count),
        payload_size(payload),
        type_cost(payload),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::builder::SchedulePoint;
    use crate::transaction::types::Amount;

    fn simple(memo: Option<&str>) -> Payload {
        Payload::SimpleTransfer {
            to_address: "receiver".into(),
            amount: Amount(100),
            memo: memo.map(str::to_string),
        }
    }

    #[test]
    fn formula_matches_constants() {
        assert_eq!(calculate_energy_cost(1, 41, 300), 100 + 60 + 41 + 300);
        assert_eq!(calculate_energy_cost(0, 0, 0), TRANSACTION_HEADER_SIZE);
    }

    #[test]
    fn simple_transfer_cost() {
        assert_eq!(payload_size(&simple(None)), 41);
        assert_eq!(estimate_energy(&simple(None), 1), 501);
    }

    #[test]
    fn memo_adds_prefix_and_bytes() {
        assert_eq!(payload_size(&simple(Some("hello"))), 41 + 2 + 5);
    }

    #[test]
    fn each_extra_signature_costs_the_same() {
        let one = estimate_energy(&simple(None), 1);
        let three = estimate_energy(&simple(None), 3);
        assert_eq!(three - one, 2 * COST_PER_SIGNATURE);
    }

    #[test]
    fn schedule_cost_scales_with_releases() {
        let schedule = (1..=3)
            .map(|i| SchedulePoint {
                timestamp: 1_000 * i,
                amount: Amount(10),
            })
            .collect::<Vec<_>>();
        let payload = Payload::TransferWithSchedule {
            to_address: "receiver".into(),
            schedule,
            memo: None,
        };
        assert_eq!(type_cost(&payload), 3 * SCHEDULED_TRANSFER_PER_RELEASE_COST);
        assert_eq!(payload_size(&payload), 1 + 32 + 1 + 3 * 16);
    }

    #[test]
    fn update_credentials_cost_counts_existing_and_new() {
        let payload = Payload::UpdateCredentials {
            added_credentials: vec![crate::transaction::builder::AddedCredential {
                index: 1,
                credential_id: "ab".repeat(48),
            }],
            removed_cred_ids: vec![],
            threshold: 2,
            current_number_of_credentials: 2,
        };
        assert_eq!(
            type_cost(&payload),
            UPDATE_CREDENTIALS_BASE_COST
                + 2 * UPDATE_CREDENTIALS_PER_EXISTING_COST
                + UPDATE_CREDENTIALS_PER_NEW_COST
        );
    }
}
