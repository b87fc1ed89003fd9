//! # Engine
//!
//! [`Engine`] wires the store, the chain collaborators, and the event bus
//! into the proposal store, the balance reconciler, and the polling loops,
//! and exposes the operations a wallet front end calls.
//!
//! Every background loop the engine starts is handed back to the caller as
//! a handle carrying its cancellation token. Dropping a handle does not
//! stop the loop; aborting its token does.

use std::sync::Arc;

use ed25519_dalek::VerifyingKey;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::account::Account;
use crate::balance::{BalanceReconciler, DecryptReport, ReconcileError};
use crate::chain::{ChainError, ChainStatus, Decryptor, SecretSeed};
use crate::config::EngineConfig;
use crate::events::{EngineEvent, EventBus};
use crate::multisig::interchange::{AccountTransactionWithSignature, SignedTransaction};
use crate::multisig::proposal::{Proposal, ProposalStatus};
use crate::multisig::store::{ProposalError, ProposalStore};
use crate::poller::history::{HistoryRefresher, HistoryTokens};
use crate::poller::monitor::{transaction_target, MonitorTask, TransactionMonitor};
use crate::poller::status::{PollError, StatusPoller};
use crate::storage::{Store, StoreError};
use crate::transaction::record::TransferTransaction;
use crate::transaction::serialization::{SerializationError, TransactionSerializer};
use crate::transaction::types::{AccountStatus, TransactionHash};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("node refused transaction {0}")]
    SubmissionRejected(TransactionHash),

    #[error("transaction {0} not found")]
    TransactionNotFound(Uuid),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error(transparent)]
    Proposal(#[from] ProposalError),

    #[error(transparent)]
    Poll(#[from] PollError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// A running history refresh loop.
pub struct HistoryHandle {
    pub address: String,
    pub tokens: HistoryTokens,
    pub join: JoinHandle<Result<(), PollError>>,
}

impl HistoryHandle {
    /// Aborts the loop and waits for it to exit.
    pub async fn stop(self) -> Result<(), PollError> {
        self.tokens.fetch.abort();
        match self.join.await {
            Ok(result) => result,
            Err(e) => {
                warn!(address = %self.address, error = %e, "history task did not finish cleanly");
                Ok(())
            }
        }
    }
}

pub struct Engine {
    config: EngineConfig,
    store: Arc<dyn Store>,
    chain: Arc<dyn ChainStatus>,
    serializer: Arc<dyn TransactionSerializer>,
    events: EventBus,
    proposals: Arc<ProposalStore>,
    reconciler: Arc<BalanceReconciler>,
    monitor: Arc<TransactionMonitor>,
    history: Arc<HistoryRefresher>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn Store>,
        chain: Arc<dyn ChainStatus>,
        decryptor: Arc<dyn Decryptor>,
        serializer: Arc<dyn TransactionSerializer>,
    ) -> Self {
        let events = EventBus::new(config.event_channel_capacity);
        let proposals = Arc::new(ProposalStore::new(
            store.clone(),
            serializer.clone(),
            events.clone(),
        ));
        let reconciler = Arc::new(BalanceReconciler::new(
            store.clone(),
            chain.clone(),
            decryptor,
            events.clone(),
        ));
        let monitor = Self::monitor_for(&config, &store, &chain, &proposals, &reconciler, &events);
        let history = Arc::new(HistoryRefresher::new(
            store.clone(),
            chain.clone(),
            reconciler.clone(),
            events.clone(),
            &config,
        ));

        Self {
            config,
            store,
            chain,
            serializer,
            events,
            proposals,
            reconciler,
            monitor,
            history,
        }
    }

    /// Requires imported update-instruction signatures to verify against
    /// `keys`. Call before starting any monitor.
    pub fn with_authorization_keys(mut self, keys: Vec<VerifyingKey>) -> Self {
        self.proposals = Arc::new(
            ProposalStore::new(
                self.store.clone(),
                self.serializer.clone(),
                self.events.clone(),
            )
            .with_authorization_keys(keys),
        );
        self.monitor = Self::monitor_for(
            &self.config,
            &self.store,
            &self.chain,
            &self.proposals,
            &self.reconciler,
            &self.events,
        );
        self
    }

    fn monitor_for(
        config: &EngineConfig,
        store: &Arc<dyn Store>,
        chain: &Arc<dyn ChainStatus>,
        proposals: &Arc<ProposalStore>,
        reconciler: &Arc<BalanceReconciler>,
        events: &EventBus,
    ) -> Arc<TransactionMonitor> {
        Arc::new(TransactionMonitor::new(
            store.clone(),
            chain.clone(),
            proposals.clone(),
            reconciler.clone(),
            StatusPoller::new(config.status_poll_interval()),
            events.clone(),
        ))
    }

    // -- Accessors ------------------------------------------------------------

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn proposals(&self) -> &ProposalStore {
        &self.proposals
    }

    pub fn reconciler(&self) -> &BalanceReconciler {
        &self.reconciler
    }

    pub fn monitor(&self) -> &Arc<TransactionMonitor> {
        &self.monitor
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    // -- Accounts -------------------------------------------------------------

    /// Stores `account`. A pending account with a deployment hash gets a
    /// deployment monitor, returned to the caller.
    pub fn add_account(&self, account: &Account) -> EngineResult<Option<MonitorTask>> {
        self.store.put_account(account)?;
        info!(address = %account.address, status = %account.status, "account added");

        let deploying = account.status == AccountStatus::Pending
            && account.deployment_transaction_hash.is_some();
        Ok(deploying.then(|| self.monitor.spawn_account_deployment(&account.address)))
    }

    // -- Transfers ------------------------------------------------------------

    /// Broadcasts a signed account transaction, records it as `Pending`, and
    /// starts its status monitor.
    ///
    /// Nothing is recorded when the node refuses the transaction or cannot
    /// be reached.
    pub async fn submit_transaction(
        &self,
        signed: &AccountTransactionWithSignature,
    ) -> EngineResult<(TransferTransaction, MonitorTask)> {
        let wrapped = SignedTransaction::AccountTransaction(signed.clone());
        let bytes = self.serializer.serialize(&wrapped)?;
        let hash = self.serializer.transaction_hash(&wrapped)?;

        if !self.chain.send_transaction(&bytes).await? {
            warn!(hash = %hash, "node refused transaction");
            return Err(EngineError::SubmissionRejected(hash));
        }

        let record = TransferTransaction::from_submission(signed, hash.clone());
        self.store.put_transaction(&record)?;
        info!(
            hash = %hash,
            local_id = %record.local_id,
            kind = %record.kind,
            "transaction submitted"
        );
        self.events.emit(EngineEvent::TransactionStatusChanged {
            local_id: record.local_id,
            hash: Some(hash.clone()),
            status: record.status,
        });

        let task = self
            .monitor
            .spawn_transaction(record.local_id, transaction_target(&hash));
        Ok((record, task))
    }

    /// Starts a monitor for an already recorded transaction.
    pub fn track_transaction(&self, local_id: Uuid) -> EngineResult<MonitorTask> {
        let record = self
            .store
            .transaction(&local_id)?
            .ok_or(EngineError::TransactionNotFound(local_id))?;
        let hash = record
            .transaction_hash
            .ok_or(EngineError::TransactionNotFound(local_id))?;
        Ok(self
            .monitor
            .spawn_transaction(local_id, transaction_target(&hash)))
    }

    // -- Proposals ------------------------------------------------------------

    /// Broadcasts a proposal that reached its threshold. On acceptance the
    /// proposal's monitor is started and returned.
    pub async fn submit_proposal(&self, id: u64) -> EngineResult<(Proposal, Option<MonitorTask>)> {
        let proposal = self.proposals.submit(id, self.chain.as_ref()).await?;
        let task = (proposal.status == ProposalStatus::Submitted)
            .then(|| self.monitor.spawn_proposal(id));
        Ok((proposal, task))
    }

    // -- Balance and history --------------------------------------------------

    pub async fn refresh_balance(&self, address: &str) -> EngineResult<Option<Account>> {
        Ok(self.reconciler.refresh(address).await?)
    }

    pub async fn decrypt(&self, address: &str, seed: &SecretSeed) -> EngineResult<DecryptReport> {
        Ok(self.reconciler.decrypt_pending(address, seed).await?)
    }

    /// Starts the history refresh loop for `address`.
    pub fn watch_history(&self, address: &str) -> HistoryHandle {
        let tokens = HistoryTokens::new();
        let history = self.history.clone();
        let owned = address.to_string();
        let task_tokens = tokens.clone();
        let join = tokio::spawn(async move { history.run(&owned, &task_tokens).await });
        HistoryHandle {
            address: address.to_string(),
            tokens,
            join,
        }
    }

    // -- Lifecycle ------------------------------------------------------------

    /// Resumes monitoring of everything the store still has in flight.
    pub fn listen_for_transaction_status(&self) -> EngineResult<Vec<MonitorTask>> {
        Ok(self.monitor.listen_for_transaction_status()?)
    }

    /// Aborts every status monitor. History loops are stopped through their
    /// own handles.
    pub fn shutdown(&self) {
        self.monitor.poller().cancel_all();
        info!("status monitors cancelled");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{
        DecryptError, HistoryPage, ObservedEncryptedState, TransactionOutcome,
    };
    use crate::storage::MemoryStore;
    use crate::transaction::builder::TransactionBuilder;
    use crate::transaction::serialization::CanonicalSerializer;
    use crate::transaction::types::{Amount, CredentialIndex, EncryptedAmount, TransactionKind};
    use async_trait::async_trait;

    /// Accepts or refuses every broadcast; transactions never leave the
    /// pending pool.
    struct Node {
        accept: bool,
    }

    #[async_trait]
    impl ChainStatus for Node {
        async fn transaction_outcome(
            &self,
            _hash: &TransactionHash,
        ) -> Result<TransactionOutcome, ChainError> {
            Ok(TransactionOutcome::received())
        }

        async fn account_history(
            &self,
            _address: &str,
            _since_id: u64,
            _limit: u32,
        ) -> Result<HistoryPage, ChainError> {
            Ok(HistoryPage::default())
        }

        async fn send_transaction(&self, _bytes: &[u8]) -> Result<bool, ChainError> {
            Ok(self.accept)
        }

        async fn encrypted_state(
            &self,
            _address: &str,
        ) -> Result<ObservedEncryptedState, ChainError> {
            Err(ChainError::Unreachable("not scripted".into()))
        }
    }

    struct NoDecrypt;

    #[async_trait]
    impl Decryptor for NoDecrypt {
        async fn decrypt_batch(
            &self,
            _ciphertexts: &[EncryptedAmount],
            _seed: &SecretSeed,
            _credential_index: CredentialIndex,
        ) -> Result<Vec<Amount>, DecryptError> {
            Err(DecryptError("not used".into()))
        }
    }

    fn engine(accept: bool) -> Engine {
        Engine::new(
            EngineConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(Node { accept }),
            Arc::new(NoDecrypt),
            Arc::new(CanonicalSerializer),
        )
    }

    fn transfer() -> AccountTransactionWithSignature {
        let tx = TransactionBuilder::new(TransactionKind::SimpleTransfer)
            .sender("alice")
            .recipient("bob")
            .amount(Amount(10))
            .build()
            .unwrap();
        AccountTransactionWithSignature::unsigned(tx)
    }

    #[tokio::test]
    async fn refused_transaction_is_not_recorded() {
        let engine = engine(false);
        let err = engine.submit_transaction(&transfer()).await.unwrap_err();
        assert!(matches!(err, EngineError::SubmissionRejected(_)));
        assert!(engine.store().pending_transactions().unwrap().is_empty());
    }

    #[tokio::test]
    async fn accepted_transaction_is_pending_and_monitored() {
        let engine = engine(true);
        let (record, task) = engine.submit_transaction(&transfer()).await.unwrap();

        let stored = engine.store().transaction(&record.local_id).unwrap().unwrap();
        assert_eq!(stored, record);
        assert_eq!(task.target, transaction_target(record.transaction_hash.as_ref().unwrap()));

        task.token.abort();
        task.join.await.unwrap();
        assert!(task.token.is_finished());
    }

    #[tokio::test]
    async fn pending_account_gets_deployment_monitor() {
        let engine = engine(true);
        let account = Account::pending("carol", TransactionHash::from_bytes(&[9; 32]));
        let task = engine.add_account(&account).unwrap().unwrap();
        assert_eq!(task.target, "deployment:carol");
        task.token.abort();
        task.join.await.unwrap();

        let confirmed = Account::new("dave", AccountStatus::Confirmed);
        assert!(engine.add_account(&confirmed).unwrap().is_none());
    }

    #[test]
    fn tracking_unknown_transaction_fails() {
        let engine = engine(true);
        assert!(matches!(
            engine.track_transaction(Uuid::new_v4()),
            Err(EngineError::TransactionNotFound(_))
        ));
    }
}
