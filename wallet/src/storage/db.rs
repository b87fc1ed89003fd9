//! # SledStore — Persistent Storage Engine
//!
//! The on-disk [`Store`], built on sled's embedded key-value store.
//!
//! ## Tree Layout
//!
//! | Tree                 | Key                   | Value                          |
//! |----------------------|-----------------------|--------------------------------|
//! | `accounts`           | `address` (UTF-8)     | `bincode(Account)`             |
//! | `transactions`       | `local_id` (16B)      | `bincode(TransferTransaction)` |
//! | `transaction_hashes` | `hash` (hex, UTF-8)   | `local_id` (16B)               |
//! | `proposals`          | `id` (8B BE)          | `json(Proposal)`               |
//! | `metadata`           | key (UTF-8)           | value (bytes)                  |
//!
//! Proposal ids are big-endian so that sled's lexicographic order matches
//! numeric order. Proposals are stored as JSON because the interchange
//! shapes they embed keep unknown fields in a flattened map, which bincode
//! cannot decode.
//!
//! ## Atomicity
//!
//! `update_*` methods run a compare-and-swap loop: read, apply the
//! closure, swap only if the stored bytes are still the ones read. A lost
//! race retries against the fresh value, so the closure may run more than
//! once.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::{Db, IVec, Tree};
use uuid::Uuid;

use super::{involves, sort_transactions, Store, StoreError, StoreResult, Update};
use crate::account::Account;
use crate::multisig::proposal::Proposal;
use crate::transaction::record::TransferTransaction;
use crate::transaction::types::{TransactionHash, TransactionStatus};

/// Well-known key in the `metadata` tree for the last allocated proposal id.
const META_PROPOSAL_COUNTER: &[u8] = b"proposal_counter";

// ---------------------------------------------------------------------------
// Codecs
// ---------------------------------------------------------------------------

fn to_bincode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn from_bincode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn to_json<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn from_json<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn compare_and_update<T>(
    tree: &Tree,
    key: &[u8],
    label: impl Fn() -> String,
    decode: fn(&[u8]) -> StoreResult<T>,
    encode: fn(&T) -> StoreResult<Vec<u8>>,
    update: Update<'_, T>,
) -> StoreResult<Option<T>> {
    loop {
        let current: IVec = tree.get(key)?.ok_or_else(|| StoreError::NotFound(label()))?;
        let value = decode(&current)?;
        let Some(updated) = update(&value) else {
            return Ok(None);
        };
        let bytes = encode(&updated)?;
        if tree
            .compare_and_swap(key, Some(current), Some(bytes))?
            .is_ok()
        {
            return Ok(Some(updated));
        }
    }
}

// ---------------------------------------------------------------------------
// SledStore
// ---------------------------------------------------------------------------

/// Persistent [`Store`] over a sled database.
///
/// sled trees are thread-safe; a `SledStore` can be shared via `Arc`
/// without external synchronization.
#[derive(Debug, Clone)]
pub struct SledStore {
    db: Db,
    accounts: Tree,
    transactions: Tree,
    transaction_hashes: Tree,
    proposals: Tree,
    metadata: Tree,
}

impl SledStore {
    /// Open or create a store at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// A store that lives in memory and is removed when dropped.
    pub fn open_temporary() -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> StoreResult<Self> {
        Ok(Self {
            accounts: db.open_tree("accounts")?,
            transactions: db.open_tree("transactions")?,
            transaction_hashes: db.open_tree("transaction_hashes")?,
            proposals: db.open_tree("proposals")?,
            metadata: db.open_tree("metadata")?,
            db,
        })
    }

    /// Block until all pending writes are durable.
    pub fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }

    fn index_hash(&self, transaction: &TransferTransaction) -> StoreResult<()> {
        if let Some(hash) = &transaction.transaction_hash {
            self.transaction_hashes
                .insert(hash.as_str().as_bytes(), transaction.local_id.as_bytes())?;
        }
        Ok(())
    }

    fn scan_transactions(
        &self,
        keep: impl Fn(&TransferTransaction) -> bool,
    ) -> StoreResult<Vec<TransferTransaction>> {
        let mut found = Vec::new();
        for entry in self.transactions.iter() {
            let (_key, value) = entry?;
            let transaction: TransferTransaction = from_bincode(&value)?;
            if keep(&transaction) {
                found.push(transaction);
            }
        }
        sort_transactions(&mut found);
        Ok(found)
    }
}

impl Store for SledStore {
    // -- Accounts -----------------------------------------------------------

    fn account(&self, address: &str) -> StoreResult<Option<Account>> {
        self.accounts
            .get(address.as_bytes())?
            .map(|bytes| from_bincode(&bytes))
            .transpose()
    }

    fn accounts(&self) -> StoreResult<Vec<Account>> {
        self.accounts
            .iter()
            .map(|entry| {
                let (_key, value) = entry?;
                from_bincode(&value)
            })
            .collect()
    }

    fn put_account(&self, account: &Account) -> StoreResult<()> {
        self.accounts
            .insert(account.address.as_bytes(), to_bincode(account)?)?;
        Ok(())
    }

    fn update_account(
        &self,
        address: &str,
        update: Update<'_, Account>,
    ) -> StoreResult<Option<Account>> {
        compare_and_update(
            &self.accounts,
            address.as_bytes(),
            || format!("account {address}"),
            from_bincode,
            to_bincode,
            update,
        )
    }

    // -- Transactions -------------------------------------------------------

    fn transaction(&self, local_id: &Uuid) -> StoreResult<Option<TransferTransaction>> {
        self.transactions
            .get(local_id.as_bytes())?
            .map(|bytes| from_bincode(&bytes))
            .transpose()
    }

    fn transaction_by_hash(
        &self,
        hash: &TransactionHash,
    ) -> StoreResult<Option<TransferTransaction>> {
        let Some(id_bytes) = self.transaction_hashes.get(hash.as_str().as_bytes())? else {
            return Ok(None);
        };
        let local_id = Uuid::from_slice(&id_bytes)
            .map_err(|e| StoreError::Serialization(format!("invalid local id: {e}")))?;
        self.transaction(&local_id)
    }

    fn put_transaction(&self, transaction: &TransferTransaction) -> StoreResult<()> {
        self.transactions
            .insert(transaction.local_id.as_bytes(), to_bincode(transaction)?)?;
        self.index_hash(transaction)
    }

    fn update_transaction(
        &self,
        local_id: &Uuid,
        update: Update<'_, TransferTransaction>,
    ) -> StoreResult<Option<TransferTransaction>> {
        let committed = compare_and_update(
            &self.transactions,
            local_id.as_bytes(),
            || format!("transaction {local_id}"),
            from_bincode,
            to_bincode,
            update,
        )?;
        if let Some(updated) = &committed {
            self.index_hash(updated)?;
        }
        Ok(committed)
    }

    fn transactions_for_account(&self, address: &str) -> StoreResult<Vec<TransferTransaction>> {
        self.scan_transactions(|t| involves(t, address))
    }

    fn pending_transactions(&self) -> StoreResult<Vec<TransferTransaction>> {
        self.scan_transactions(|t| t.status == TransactionStatus::Pending)
    }

    // -- Proposals ----------------------------------------------------------

    fn proposal(&self, id: u64) -> StoreResult<Option<Proposal>> {
        self.proposals
            .get(id.to_be_bytes())?
            .map(|bytes| from_json(&bytes))
            .transpose()
    }

    fn proposals(&self) -> StoreResult<Vec<Proposal>> {
        self.proposals
            .iter()
            .map(|entry| {
                let (_key, value) = entry?;
                from_json(&value)
            })
            .collect()
    }

    fn put_proposal(&self, proposal: &Proposal) -> StoreResult<()> {
        self.proposals
            .insert(proposal.id.to_be_bytes(), to_json(proposal)?)?;
        Ok(())
    }

    fn update_proposal(
        &self,
        id: u64,
        update: Update<'_, Proposal>,
    ) -> StoreResult<Option<Proposal>> {
        compare_and_update(
            &self.proposals,
            &id.to_be_bytes(),
            || format!("proposal {id}"),
            from_json,
            to_json,
            update,
        )
    }

    fn next_proposal_id(&self) -> StoreResult<u64> {
        let next = self
            .metadata
            .update_and_fetch(META_PROPOSAL_COUNTER, |old| {
                let current = old
                    .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
                    .map_or(0, u64::from_be_bytes);
                Some((current + 1).to_be_bytes().to_vec())
            })?
            .ok_or_else(|| StoreError::Serialization("proposal counter missing".into()))?;
        let bytes = <[u8; 8]>::try_from(next.as_ref())
            .map_err(|_| StoreError::Serialization("invalid proposal counter".into()))?;
        Ok(u64::from_be_bytes(bytes))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::TerminalOutcome;
    use crate::multisig::interchange::{AccountTransactionWithSignature, SignedTransaction};
    use crate::transaction::builder::TransactionBuilder;
    use crate::transaction::types::{AccountStatus, Amount, TransactionKind};

    fn transfer(nonce: u64) -> AccountTransactionWithSignature {
        let tx = TransactionBuilder::new(TransactionKind::SimpleTransfer)
            .sender("alice")
            .recipient("bob")
            .amount(Amount(100))
            .nonce(nonce)
            .build()
            .unwrap();
        AccountTransactionWithSignature::unsigned(tx)
    }

    fn record(nonce: u64) -> TransferTransaction {
        TransferTransaction::from_submission(
            &transfer(nonce),
            TransactionHash::from_bytes(&[nonce as u8; 32]),
        )
    }

    #[test]
    fn open_temporary_store() {
        let store = SledStore::open_temporary().expect("temp store");
        assert!(store.accounts().unwrap().is_empty());
        assert!(store.proposals().unwrap().is_empty());
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tx = record(1);
        {
            let store = SledStore::open(dir.path()).unwrap();
            store
                .put_account(&Account::new("alice", AccountStatus::Confirmed))
                .unwrap();
            store.put_transaction(&tx).unwrap();
            store.flush().unwrap();
        }

        let store = SledStore::open(dir.path()).unwrap();
        assert!(store.account("alice").unwrap().is_some());
        assert_eq!(store.transaction(&tx.local_id).unwrap(), Some(tx));
    }

    #[test]
    fn transaction_hash_index() {
        let store = SledStore::open_temporary().unwrap();
        let tx = record(2);
        store.put_transaction(&tx).unwrap();

        let hash = tx.transaction_hash.clone().unwrap();
        assert_eq!(store.transaction_by_hash(&hash).unwrap(), Some(tx));
        assert_eq!(
            store
                .transaction_by_hash(&TransactionHash::from_bytes(&[9; 32]))
                .unwrap(),
            None
        );
    }

    #[test]
    fn update_transaction_is_idempotent_for_terminal_records() {
        let store = SledStore::open_temporary().unwrap();
        let tx = record(3);
        store.put_transaction(&tx).unwrap();

        let outcome = TerminalOutcome::Finalized {
            block_hash: "block".into(),
            cost: Amount(1),
        };
        let first = store
            .update_transaction(&tx.local_id, &mut |t| t.apply_terminal(&outcome))
            .unwrap();
        let second = store
            .update_transaction(&tx.local_id, &mut |t| t.apply_terminal(&outcome))
            .unwrap();

        assert_eq!(first.unwrap().status, TransactionStatus::Finalized);
        assert!(second.is_none());
        assert!(store.pending_transactions().unwrap().is_empty());
    }

    #[test]
    fn filters_transactions_by_account() {
        let store = SledStore::open_temporary().unwrap();
        store.put_transaction(&record(1)).unwrap();
        store.put_transaction(&record(2)).unwrap();

        assert_eq!(store.transactions_for_account("alice").unwrap().len(), 2);
        assert_eq!(store.transactions_for_account("bob").unwrap().len(), 2);
        assert!(store.transactions_for_account("carol").unwrap().is_empty());
    }

    #[test]
    fn proposals_round_trip_and_order() {
        let store = SledStore::open_temporary().unwrap();
        for _ in 0..3 {
            let id = store.next_proposal_id().unwrap();
            let proposal = Proposal::new(
                id,
                SignedTransaction::AccountTransaction(transfer(id)),
                2,
            );
            store.put_proposal(&proposal).unwrap();
        }

        let ids: Vec<u64> = store.proposals().unwrap().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(store.proposal(2).unwrap().unwrap().threshold, 2);
    }

    #[test]
    fn update_missing_account_is_not_found() {
        let store = SledStore::open_temporary().unwrap();
        let err = store
            .update_account("ghost", &mut |a| Some(a.clone()))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
