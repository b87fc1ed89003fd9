//! In-memory store for tests and ephemeral sessions.
//!
//! Nothing survives a restart. `update_*` holds the entry's shard lock for
//! the duration of the closure, which makes each update atomic.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use uuid::Uuid;

use super::{involves, sort_transactions, Store, StoreError, StoreResult, Update};
use crate::account::Account;
use crate::multisig::proposal::Proposal;
use crate::transaction::record::TransferTransaction;
use crate::transaction::types::{TransactionHash, TransactionStatus};

#[derive(Default)]
pub struct MemoryStore {
    accounts: DashMap<String, Account>,
    transactions: DashMap<Uuid, TransferTransaction>,
    transaction_hashes: DashMap<TransactionHash, Uuid>,
    proposals: DashMap<u64, Proposal>,
    proposal_counter: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn index_hash(&self, transaction: &TransferTransaction) {
        if let Some(hash) = &transaction.transaction_hash {
            self.transaction_hashes
                .insert(hash.clone(), transaction.local_id);
        }
    }
}

impl Store for MemoryStore {
    fn account(&self, address: &str) -> StoreResult<Option<Account>> {
        Ok(self.accounts.get(address).map(|a| a.clone()))
    }

    fn accounts(&self) -> StoreResult<Vec<Account>> {
        let mut accounts: Vec<Account> = self.accounts.iter().map(|a| a.clone()).collect();
        accounts.sort_by(|a, b| a.address.cmp(&b.address));
        Ok(accounts)
    }

    fn put_account(&self, account: &Account) -> StoreResult<()> {
        self.accounts
            .insert(account.address.clone(), account.clone());
        Ok(())
    }

    fn update_account(
        &self,
        address: &str,
        update: Update<'_, Account>,
    ) -> StoreResult<Option<Account>> {
        let mut entry = self
            .accounts
            .get_mut(address)
            .ok_or_else(|| StoreError::NotFound(format!("account {address}")))?;
        Ok(update(&*entry).map(|updated| {
            *entry = updated.clone();
            updated
        }))
    }

    fn transaction(&self, local_id: &Uuid) -> StoreResult<Option<TransferTransaction>> {
        Ok(self.transactions.get(local_id).map(|t| t.clone()))
    }

    fn transaction_by_hash(
        &self,
        hash: &TransactionHash,
    ) -> StoreResult<Option<TransferTransaction>> {
        let Some(local_id) = self.transaction_hashes.get(hash).map(|id| *id) else {
            return Ok(None);
        };
        self.transaction(&local_id)
    }

    fn put_transaction(&self, transaction: &TransferTransaction) -> StoreResult<()> {
        self.transactions
            .insert(transaction.local_id, transaction.clone());
        self.index_hash(transaction);
        Ok(())
    }

    fn update_transaction(
        &self,
        local_id: &Uuid,
        update: Update<'_, TransferTransaction>,
    ) -> StoreResult<Option<TransferTransaction>> {
        let committed = {
            let mut entry = self
                .transactions
                .get_mut(local_id)
                .ok_or_else(|| StoreError::NotFound(format!("transaction {local_id}")))?;
            update(&*entry).map(|updated| {
                *entry = updated.clone();
                updated
            })
        };
        if let Some(updated) = &committed {
            self.index_hash(updated);
        }
        Ok(committed)
    }

    fn transactions_for_account(&self, address: &str) -> StoreResult<Vec<TransferTransaction>> {
        let mut found: Vec<TransferTransaction> = self
            .transactions
            .iter()
            .filter(|t| involves(t, address))
            .map(|t| t.clone())
            .collect();
        sort_transactions(&mut found);
        Ok(found)
    }

    fn pending_transactions(&self) -> StoreResult<Vec<TransferTransaction>> {
        let mut found: Vec<TransferTransaction> = self
            .transactions
            .iter()
            .filter(|t| t.status == TransactionStatus::Pending)
            .map(|t| t.clone())
            .collect();
        sort_transactions(&mut found);
        Ok(found)
    }

    fn proposal(&self, id: u64) -> StoreResult<Option<Proposal>> {
        Ok(self.proposals.get(&id).map(|p| p.clone()))
    }

    fn proposals(&self) -> StoreResult<Vec<Proposal>> {
        let mut proposals: Vec<Proposal> = self.proposals.iter().map(|p| p.clone()).collect();
        proposals.sort_by_key(|p| p.id);
        Ok(proposals)
    }

    fn put_proposal(&self, proposal: &Proposal) -> StoreResult<()> {
        self.proposals.insert(proposal.id, proposal.clone());
        Ok(())
    }

    fn update_proposal(
        &self,
        id: u64,
        update: Update<'_, Proposal>,
    ) -> StoreResult<Option<Proposal>> {
        let mut entry = self
            .proposals
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("proposal {id}")))?;
        Ok(update(&*entry).map(|updated| {
            *entry = updated.clone();
            updated
        }))
    }

    fn next_proposal_id(&self) -> StoreResult<u64> {
        Ok(self.proposal_counter.fetch_add(1, Ordering::SeqCst) + 1)
    }
}
