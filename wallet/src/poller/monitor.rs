//! Chain-outcome monitors.
//!
//! One [`TransactionMonitor`] drives every status poll the engine runs:
//! pending transfers, submitted proposals, and accounts waiting on their
//! deployment transaction. Each monitor resolves its record exactly once
//! through the record's own transition function; a record that is already
//! terminal is reported as is, without querying the chain.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::cancellation::CancellationToken;
use super::status::{OnUnreachable, PollError, PollOutcome, StatusPoller};
use crate::account::Account;
use crate::balance::BalanceReconciler;
use crate::chain::{ChainStatus, TerminalOutcome};
use crate::events::{EngineEvent, EventBus};
use crate::multisig::proposal::{Proposal, ProposalStatus};
use crate::multisig::store::{ProposalError, ProposalStore};
use crate::storage::{Store, StoreError};
use crate::transaction::record::TransferTransaction;
use crate::transaction::types::{AccountStatus, TransactionHash, TransactionStatus};

pub fn transaction_target(hash: &TransactionHash) -> String {
    format!("transaction:{hash}")
}

pub fn proposal_target(id: u64) -> String {
    format!("proposal:{id}")
}

pub fn deployment_target(address: &str) -> String {
    format!("deployment:{address}")
}

/// A monitor running in the background.
#[derive(Debug)]
pub struct MonitorTask {
    pub target: String,
    pub token: CancellationToken,
    pub join: JoinHandle<()>,
}

pub struct TransactionMonitor {
    store: Arc<dyn Store>,
    chain: Arc<dyn ChainStatus>,
    proposals: Arc<ProposalStore>,
    reconciler: Arc<BalanceReconciler>,
    poller: StatusPoller,
    events: EventBus,
}

async fn terminal_outcome(
    chain: Arc<dyn ChainStatus>,
    hash: TransactionHash,
) -> Result<Option<TerminalOutcome>, PollError> {
    Ok(chain.transaction_outcome(&hash).await?.terminal()?)
}

impl TransactionMonitor {
    pub fn new(
        store: Arc<dyn Store>,
        chain: Arc<dyn ChainStatus>,
        proposals: Arc<ProposalStore>,
        reconciler: Arc<BalanceReconciler>,
        poller: StatusPoller,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            chain,
            proposals,
            reconciler,
            poller,
            events,
        }
    }

    pub fn poller(&self) -> &StatusPoller {
        &self.poller
    }

    // -- Transfers ------------------------------------------------------------

    /// Polls a pending transfer until it is finalized, failed, or rejected.
    /// An unreachable node ends the poll with [`PollError::Unreachable`].
    pub async fn monitor_transaction(
        &self,
        local_id: Uuid,
        token: &CancellationToken,
    ) -> Result<PollOutcome<TransferTransaction>, PollError> {
        self.watch_transaction(local_id, token, OnUnreachable::Stop)
            .await
    }

    async fn watch_transaction(
        &self,
        local_id: Uuid,
        token: &CancellationToken,
        on_unreachable: OnUnreachable,
    ) -> Result<PollOutcome<TransferTransaction>, PollError> {
        let record = self
            .store
            .transaction(&local_id)?
            .ok_or_else(|| PollError::NotFound(format!("transaction {local_id}")))?;
        if record.status.is_terminal() {
            token.finish();
            return Ok(PollOutcome::Completed(record));
        }
        let hash = record
            .transaction_hash
            .clone()
            .ok_or_else(|| PollError::NotFound(format!("hash of transaction {local_id}")))?;

        let chain = self.chain.clone();
        self.poller
            .poll_with(
                &transaction_target(&hash),
                token,
                on_unreachable,
                || terminal_outcome(chain.clone(), hash.clone()),
                |outcome| self.resolve_transaction(local_id, &outcome),
            )
            .await
    }

    fn resolve_transaction(
        &self,
        local_id: Uuid,
        outcome: &TerminalOutcome,
    ) -> Result<TransferTransaction, PollError> {
        let committed = self
            .store
            .update_transaction(&local_id, &mut |current| current.apply_terminal(outcome))?;

        let Some(updated) = committed else {
            debug!(%local_id, "transaction already terminal");
            return self
                .store
                .transaction(&local_id)?
                .ok_or_else(|| PollError::NotFound(format!("transaction {local_id}")));
        };

        info!(
            %local_id,
            hash = ?updated.transaction_hash,
            status = %updated.status,
            cost = ?updated.cost,
            "transaction resolved"
        );
        self.events.emit(EngineEvent::TransactionStatusChanged {
            local_id,
            hash: updated.transaction_hash.clone(),
            status: updated.status,
        });

        if updated.status == TransactionStatus::Finalized {
            self.reconciler.apply_shielded_consequence(&updated)?;
        }
        Ok(updated)
    }

    // -- Proposals ------------------------------------------------------------

    /// Polls a submitted proposal's transaction until it resolves.
    pub async fn monitor_proposal(
        &self,
        id: u64,
        token: &CancellationToken,
    ) -> Result<PollOutcome<Proposal>, PollError> {
        self.watch_proposal(id, token, OnUnreachable::Stop).await
    }

    async fn watch_proposal(
        &self,
        id: u64,
        token: &CancellationToken,
        on_unreachable: OnUnreachable,
    ) -> Result<PollOutcome<Proposal>, PollError> {
        let proposal = self.proposals.get(id)?;
        if proposal.status.is_terminal() {
            token.finish();
            return Ok(PollOutcome::Completed(proposal));
        }
        if proposal.status != ProposalStatus::Submitted {
            return Err(ProposalError::InvalidTransition {
                from: proposal.status,
                to: ProposalStatus::Finalized,
            }
            .into());
        }
        let hash = proposal
            .transaction_hash
            .clone()
            .ok_or_else(|| PollError::NotFound(format!("hash of proposal {id}")))?;

        let chain = self.chain.clone();
        self.poller
            .poll_with(
                &proposal_target(id),
                token,
                on_unreachable,
                || terminal_outcome(chain.clone(), hash.clone()),
                |outcome| match self.proposals.apply_outcome(id, &outcome)? {
                    Some(resolved) => Ok(resolved),
                    None => Ok(self.proposals.get(id)?),
                },
            )
            .await
    }

    // -- Account deployment ---------------------------------------------------

    /// Polls the deployment transaction of a pending account. The account
    /// becomes `Confirmed` if it finalizes successfully, `Rejected`
    /// otherwise.
    pub async fn monitor_account_deployment(
        &self,
        address: &str,
        token: &CancellationToken,
    ) -> Result<PollOutcome<Account>, PollError> {
        self.watch_account_deployment(address, token, OnUnreachable::Stop)
            .await
    }

    async fn watch_account_deployment(
        &self,
        address: &str,
        token: &CancellationToken,
        on_unreachable: OnUnreachable,
    ) -> Result<PollOutcome<Account>, PollError> {
        let account = self
            .store
            .account(address)?
            .ok_or_else(|| PollError::NotFound(format!("account {address}")))?;
        if account.status != AccountStatus::Pending {
            token.finish();
            return Ok(PollOutcome::Completed(account));
        }
        let hash = account
            .deployment_transaction_hash
            .clone()
            .ok_or_else(|| PollError::NotFound(format!("deployment of account {address}")))?;

        let chain = self.chain.clone();
        self.poller
            .poll_with(
                &deployment_target(address),
                token,
                on_unreachable,
                || terminal_outcome(chain.clone(), hash.clone()),
                |outcome| self.resolve_deployment(address, &outcome),
            )
            .await
    }

    fn resolve_deployment(
        &self,
        address: &str,
        outcome: &TerminalOutcome,
    ) -> Result<Account, PollError> {
        let status = match outcome {
            TerminalOutcome::Finalized { .. } => AccountStatus::Confirmed,
            TerminalOutcome::Failed { .. } | TerminalOutcome::Rejected => AccountStatus::Rejected,
        };
        let committed = self
            .store
            .update_account(address, &mut |current| {
                (current.status == AccountStatus::Pending).then(|| Account {
                    status,
                    deployment_transaction_hash: None,
                    ..current.clone()
                })
            })
            .map_err(|e| match e {
                StoreError::NotFound(_) => PollError::NotFound(format!("account {address}")),
                other => other.into(),
            })?;

        match committed {
            Some(account) => {
                info!(address, status = %account.status, "account deployment resolved");
                self.events.emit(EngineEvent::AccountStatusChanged {
                    address: address.to_string(),
                    status: account.status,
                });
                Ok(account)
            }
            None => self
                .store
                .account(address)?
                .ok_or_else(|| PollError::NotFound(format!("account {address}"))),
        }
    }

    // -- Background tasks -----------------------------------------------------
    //
    // Spawned monitors wait out an unreachable node and only stop on a
    // terminal outcome, an abort, or a non-transient error.

    pub fn spawn_transaction(self: &Arc<Self>, local_id: Uuid, target: String) -> MonitorTask {
        let token = CancellationToken::new();
        let monitor = Arc::clone(self);
        let task_token = token.clone();
        let join = tokio::spawn(async move {
            let result = monitor
                .watch_transaction(local_id, &task_token, OnUnreachable::Retry)
                .await;
            log_result(&format!("transaction {local_id}"), result.map(|o| o.map(|_| ())));
        });
        MonitorTask {
            target,
            token,
            join,
        }
    }

    pub fn spawn_proposal(self: &Arc<Self>, id: u64) -> MonitorTask {
        let token = CancellationToken::new();
        let monitor = Arc::clone(self);
        let task_token = token.clone();
        let join = tokio::spawn(async move {
            let result = monitor
                .watch_proposal(id, &task_token, OnUnreachable::Retry)
                .await;
            log_result(&format!("proposal {id}"), result.map(|o| o.map(|_| ())));
        });
        MonitorTask {
            target: proposal_target(id),
            token,
            join,
        }
    }

    pub fn spawn_account_deployment(self: &Arc<Self>, address: &str) -> MonitorTask {
        let token = CancellationToken::new();
        let monitor = Arc::clone(self);
        let task_token = token.clone();
        let owned = address.to_string();
        let join = tokio::spawn(async move {
            let result = monitor
                .watch_account_deployment(&owned, &task_token, OnUnreachable::Retry)
                .await;
            log_result(&format!("account {owned}"), result.map(|o| o.map(|_| ())));
        });
        MonitorTask {
            target: deployment_target(address),
            token,
            join,
        }
    }

    /// Starts a monitor for every pending transfer, submitted proposal, and
    /// pending account in the store. Targets already being polled are
    /// skipped, so calling this again is harmless.
    pub fn listen_for_transaction_status(self: &Arc<Self>) -> Result<Vec<MonitorTask>, PollError> {
        let mut tasks = Vec::new();

        for transaction in self.store.pending_transactions()? {
            let Some(hash) = &transaction.transaction_hash else {
                continue;
            };
            let target = transaction_target(hash);
            if !self.poller.is_polling(&target) {
                tasks.push(self.spawn_transaction(transaction.local_id, target));
            }
        }

        for proposal in self.proposals.submitted()? {
            if !self.poller.is_polling(&proposal_target(proposal.id)) {
                tasks.push(self.spawn_proposal(proposal.id));
            }
        }

        for account in self.store.accounts()? {
            let waiting = account.status == AccountStatus::Pending
                && account.deployment_transaction_hash.is_some();
            if waiting && !self.poller.is_polling(&deployment_target(&account.address)) {
                tasks.push(self.spawn_account_deployment(&account.address));
            }
        }

        info!(started = tasks.len(), "status monitors started");
        Ok(tasks)
    }
}

fn log_result(what: &str, result: Result<PollOutcome<()>, PollError>) {
    match result {
        Ok(PollOutcome::Completed(())) => debug!(what, "monitor completed"),
        Ok(PollOutcome::Cancelled) => debug!(what, "monitor cancelled"),
        Ok(PollOutcome::AlreadyPolling) => debug!(what, "monitor already running"),
        Err(e) => warn!(what, error = %e, "monitor stopped"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{
        ChainError, DecryptError, Decryptor, ExecutionEffect, ExecutionResult, HistoryPage,
        ObservedEncryptedState, SecretSeed, TransactionOutcome,
    };
    use crate::multisig::interchange::AccountTransactionWithSignature;
    use crate::storage::MemoryStore;
    use crate::transaction::builder::TransactionBuilder;
    use crate::transaction::serialization::CanonicalSerializer;
    use crate::transaction::types::{Amount, CredentialIndex, EncryptedAmount, TransactionKind};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Replays scripted outcomes; the last one repeats.
    struct Script {
        outcomes: Mutex<VecDeque<Result<TransactionOutcome, ChainError>>>,
        queries: AtomicUsize,
    }

    impl Script {
        fn new(outcomes: Vec<Result<TransactionOutcome, ChainError>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                queries: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ChainStatus for Script {
        async fn transaction_outcome(
            &self,
            _hash: &TransactionHash,
        ) -> Result<TransactionOutcome, ChainError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            let mut outcomes = self.outcomes.lock();
            if outcomes.len() > 1 {
                outcomes.pop_front().unwrap_or_else(|| Ok(TransactionOutcome::received()))
            } else {
                outcomes
                    .front()
                    .cloned()
                    .unwrap_or_else(|| Ok(TransactionOutcome::received()))
            }
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
            Ok(true)
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

    fn finalized(cost: u64) -> TransactionOutcome {
        TransactionOutcome::finalized(
            "block",
            ExecutionResult {
                cost: Amount(cost),
                result: ExecutionEffect::Success,
            },
        )
    }

    fn harness(chain: Arc<Script>) -> (Arc<MemoryStore>, Arc<TransactionMonitor>) {
        let store = Arc::new(MemoryStore::new());
        let events = EventBus::default();
        let proposals = Arc::new(ProposalStore::new(
            store.clone(),
            Arc::new(CanonicalSerializer),
            events.clone(),
        ));
        let reconciler = Arc::new(BalanceReconciler::new(
            store.clone(),
            chain.clone(),
            Arc::new(NoDecrypt),
            events.clone(),
        ));
        let monitor = Arc::new(TransactionMonitor::new(
            store.clone(),
            chain,
            proposals,
            reconciler,
            StatusPoller::new(Duration::from_millis(5)),
            events,
        ));
        (store, monitor)
    }

    fn pending_transfer(store: &MemoryStore) -> TransferTransaction {
        let tx = TransactionBuilder::new(TransactionKind::SimpleTransfer)
            .sender("alice")
            .recipient("bob")
            .amount(Amount(100))
            .build()
            .unwrap();
        let record = TransferTransaction::from_submission(
            &AccountTransactionWithSignature::unsigned(tx),
            TransactionHash::from_bytes(&[3; 32]),
        );
        store.put_transaction(&record).unwrap();
        record
    }

    #[tokio::test]
    async fn pending_transfer_finalizes_with_cost() {
        let chain = Script::new(vec![
            Ok(TransactionOutcome::received()),
            Ok(finalized(1)),
        ]);
        let (store, monitor) = harness(chain.clone());
        let record = pending_transfer(&store);
        let token = CancellationToken::new();

        let outcome = monitor
            .monitor_transaction(record.local_id, &token)
            .await
            .unwrap();
        let PollOutcome::Completed(done) = outcome else {
            panic!("expected completion");
        };
        assert_eq!(done.status, TransactionStatus::Finalized);
        assert_eq!(done.cost, Some(Amount(1)));
        assert_eq!(done.reject_reason, None);
        assert_eq!(chain.queries.load(Ordering::SeqCst), 2);
        assert!(token.is_finished());
    }

    #[tokio::test]
    async fn terminal_record_is_not_polled_again() {
        let chain = Script::new(vec![Ok(finalized(1))]);
        let (store, monitor) = harness(chain.clone());
        let record = pending_transfer(&store);

        monitor
            .monitor_transaction(record.local_id, &CancellationToken::new())
            .await
            .unwrap();
        let outcome = monitor
            .monitor_transaction(record.local_id, &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(outcome, PollOutcome::Completed(_)));
        assert_eq!(chain.queries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unreachable_node_leaves_record_pending() {
        let chain = Script::new(vec![Err(ChainError::Unreachable("offline".into()))]);
        let (store, monitor) = harness(chain);
        let record = pending_transfer(&store);

        let err = monitor
            .monitor_transaction(record.local_id, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_unreachable());
        assert_eq!(
            store.transaction(&record.local_id).unwrap().unwrap().status,
            TransactionStatus::Pending
        );
    }

    #[tokio::test]
    async fn spawned_monitor_retries_after_unreachable_node() {
        let chain = Script::new(vec![
            Err(ChainError::Unreachable("offline".into())),
            Ok(finalized(1)),
        ]);
        let (store, monitor) = harness(chain.clone());
        let record = pending_transfer(&store);
        let hash = record.transaction_hash.clone().unwrap();

        let task = monitor.spawn_transaction(record.local_id, transaction_target(&hash));
        tokio::time::timeout(Duration::from_secs(5), task.join)
            .await
            .unwrap()
            .unwrap();

        let stored = store.transaction(&record.local_id).unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Finalized);
        assert_eq!(stored.cost, Some(Amount(1)));
        assert_eq!(chain.queries.load(Ordering::SeqCst), 2);
        assert!(task.token.is_finished());
    }

    #[tokio::test]
    async fn spawned_monitor_stops_waiting_when_aborted() {
        let chain = Script::new(vec![Err(ChainError::Unreachable("offline".into()))]);
        let (store, monitor) = harness(chain);
        let record = pending_transfer(&store);
        let hash = record.transaction_hash.clone().unwrap();

        let task = monitor.spawn_transaction(record.local_id, transaction_target(&hash));
        while !monitor.poller().is_polling(&task.target) {
            tokio::task::yield_now().await;
        }
        task.token.abort();
        tokio::time::timeout(Duration::from_secs(5), task.join)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            store.transaction(&record.local_id).unwrap().unwrap().status,
            TransactionStatus::Pending
        );
        assert!(!monitor.poller().is_polling(&task.target));
    }

    #[tokio::test]
    async fn absent_transaction_is_rejected() {
        let chain = Script::new(vec![Ok(TransactionOutcome::absent())]);
        let (store, monitor) = harness(chain);
        let record = pending_transfer(&store);

        monitor
            .monitor_transaction(record.local_id, &CancellationToken::new())
            .await
            .unwrap();
        let stored = store.transaction(&record.local_id).unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Rejected);
        assert_eq!(stored.cost, None);
    }

    #[tokio::test]
    async fn deployment_confirms_or_rejects_account() {
        let chain = Script::new(vec![Ok(finalized(0))]);
        let (store, monitor) = harness(chain);
        store
            .put_account(&Account::pending("fresh", TransactionHash::from_bytes(&[8; 32])))
            .unwrap();

        monitor
            .monitor_account_deployment("fresh", &CancellationToken::new())
            .await
            .unwrap();
        let account = store.account("fresh").unwrap().unwrap();
        assert_eq!(account.status, AccountStatus::Confirmed);
        assert_eq!(account.deployment_transaction_hash, None);

        let chain = Script::new(vec![Ok(TransactionOutcome::absent())]);
        let (store, monitor) = harness(chain);
        store
            .put_account(&Account::pending("fresh", TransactionHash::from_bytes(&[8; 32])))
            .unwrap();
        monitor
            .monitor_account_deployment("fresh", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            store.account("fresh").unwrap().unwrap().status,
            AccountStatus::Rejected
        );
    }

    #[tokio::test]
    async fn listen_resumes_pending_work_once() {
        let chain = Script::new(vec![Ok(TransactionOutcome::received())]);
        let (store, monitor) = harness(chain);
        pending_transfer(&store);
        store
            .put_account(&Account::pending("fresh", TransactionHash::from_bytes(&[8; 32])))
            .unwrap();

        let first = monitor.listen_for_transaction_status().unwrap();
        assert_eq!(first.len(), 2);
        for task in &first {
            while !monitor.poller().is_polling(&task.target) {
                tokio::task::yield_now().await;
            }
        }

        let second = monitor.listen_for_transaction_status().unwrap();
        assert!(second.is_empty());

        for task in first {
            task.token.abort();
            task.join.await.unwrap();
        }
    }
}
