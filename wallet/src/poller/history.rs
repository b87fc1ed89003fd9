//! Account history refresh.
//!
//! The refresh loop pages through an account's remote history from the
//! highest id it has already reflected, folds every entry into the local
//! transaction records, and keeps going. Two tokens describe it:
//!
//! - `fetch` controls the loop itself. Abort it to stop; it is finished
//!   once the loop has exited.
//! - `stale` tells observers whether the visible history is known to be
//!   behind. It is `Active` while the node reports more pages and
//!   `Finished` once a page says there is nothing more or the loop stops.
//!
//! The loop is the only writer of `Account::max_observed_transaction_id`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::cancellation::CancellationToken;
use super::status::PollError;
use crate::account::Account;
use crate::balance::BalanceReconciler;
use crate::chain::{ChainStatus, HistoryPage};
use crate::config::EngineConfig;
use crate::events::{EngineEvent, EventBus};
use crate::storage::{Store, StoreError};
use crate::transaction::record::TransferTransaction;

/// The two tokens of one history loop.
#[derive(Debug, Clone, Default)]
pub struct HistoryTokens {
    pub fetch: CancellationToken,
    pub stale: CancellationToken,
}

impl HistoryTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_catching_up(&self) -> bool {
        self.stale.is_active()
    }
}

/// Result of folding one history page into the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub entries: usize,
    /// Entries not previously known locally.
    pub inserted: usize,
    /// Entries carrying shielded ciphertexts.
    pub encrypted: usize,
    pub max_id: Option<u64>,
}

pub struct HistoryRefresher {
    store: Arc<dyn Store>,
    chain: Arc<dyn ChainStatus>,
    reconciler: Arc<BalanceReconciler>,
    events: EventBus,
    page_size: u32,
    refresh_interval: Duration,
    catch_up_delay: Duration,
}

impl HistoryRefresher {
    pub fn new(
        store: Arc<dyn Store>,
        chain: Arc<dyn ChainStatus>,
        reconciler: Arc<BalanceReconciler>,
        events: EventBus,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            chain,
            reconciler,
            events,
            page_size: config.history_page_size,
            refresh_interval: config.history_refresh_interval(),
            catch_up_delay: config.history_catch_up_delay(),
        }
    }

    /// Runs the refresh loop for `address` until `tokens.fetch` is aborted
    /// or a non-transient error occurs. Unreachable nodes are retried after
    /// the refresh interval.
    pub async fn run(&self, address: &str, tokens: &HistoryTokens) -> Result<(), PollError> {
        tokens.fetch.start();
        info!(address, "history refresh started");

        let result = self.run_loop(address, tokens).await;

        self.mark_caught_up(address, &tokens.stale);
        tokens.fetch.finish();
        info!(address, "history refresh stopped");
        result
    }

    async fn run_loop(&self, address: &str, tokens: &HistoryTokens) -> Result<(), PollError> {
        loop {
            if tokens.fetch.is_aborted() {
                return Ok(());
            }

            let since_id = self.max_observed(address)?;
            let fetched = self
                .chain
                .account_history(address, since_id, self.page_size)
                .await;

            if tokens.fetch.is_aborted() {
                debug!(address, "history refresh cancelled during fetch");
                return Ok(());
            }

            let delay = match fetched {
                Ok(page) => {
                    let summary = self.ingest(address, &page)?;
                    if summary.encrypted > 0 {
                        if let Err(e) = self.reconciler.refresh(address).await {
                            warn!(address, error = %e, "shielded state refresh failed");
                        }
                    }
                    if page.has_more {
                        self.mark_stale(address, &tokens.stale);
                        self.catch_up_delay
                    } else {
                        self.mark_caught_up(address, &tokens.stale);
                        self.refresh_interval
                    }
                }
                Err(e) => {
                    let e = PollError::from(e);
                    if !e.is_unreachable() {
                        return Err(e);
                    }
                    warn!(address, error = %e, "history fetch failed, retrying later");
                    self.refresh_interval
                }
            };

            debug!(address, delay_ms = delay.as_millis() as u64, "next history fetch scheduled");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = tokens.fetch.cancelled() => {}
            }
        }
    }

    /// Fetches and folds in a single page.
    pub async fn fetch_once(&self, address: &str) -> Result<IngestSummary, PollError> {
        let since_id = self.max_observed(address)?;
        let page = self
            .chain
            .account_history(address, since_id, self.page_size)
            .await?;
        self.ingest(address, &page)
    }

    /// Folds a history page into the store.
    ///
    /// Entries already known by hash are merged into their record, which
    /// keeps a locally submitted transaction from showing up twice; the
    /// rest are inserted. Status of existing records is left to the status
    /// poller.
    pub fn ingest(&self, address: &str, page: &HistoryPage) -> Result<IngestSummary, PollError> {
        let mut summary = IngestSummary {
            entries: page.transactions.len(),
            max_id: page.max_id(),
            ..IngestSummary::default()
        };
        let mut undecrypted = false;

        for remote in &page.transactions {
            let record = match self.store.transaction_by_hash(&remote.transaction_hash)? {
                Some(existing) => self
                    .store
                    .update_transaction(&existing.local_id, &mut |current| {
                        let mut next = current.clone();
                        next.merge_remote(remote);
                        (next != *current).then_some(next)
                    })?
                    .unwrap_or(existing),
                None => {
                    let record = TransferTransaction::from_remote(remote);
                    self.store.put_transaction(&record)?;
                    summary.inserted += 1;
                    record
                }
            };
            if remote.encrypted.is_some() {
                summary.encrypted += 1;
            }
            undecrypted |= record.needs_decryption();
        }

        if let Some(max_id) = summary.max_id {
            self.store
                .update_account(address, &mut |account| {
                    (max_id > account.max_observed_transaction_id).then(|| Account {
                        max_observed_transaction_id: max_id,
                        ..account.clone()
                    })
                })
                .map_err(|e| match e {
                    StoreError::NotFound(_) => PollError::NotFound(format!("account {address}")),
                    other => other.into(),
                })?;
        }
        if undecrypted {
            self.reconciler.mark_undecrypted(address)?;
        }

        if summary.entries > 0 {
            debug!(
                address,
                entries = summary.entries,
                inserted = summary.inserted,
                max_id = ?summary.max_id,
                "history page ingested"
            );
            self.events.emit(EngineEvent::AccountUpdated {
                address: address.to_string(),
            });
        }
        Ok(summary)
    }

    fn max_observed(&self, address: &str) -> Result<u64, PollError> {
        self.store
            .account(address)?
            .map(|a| a.max_observed_transaction_id)
            .ok_or_else(|| PollError::NotFound(format!("account {address}")))
    }

    fn mark_stale(&self, address: &str, stale: &CancellationToken) {
        if stale.start() {
            self.events.emit(EngineEvent::HistoryCatchingUp {
                address: address.to_string(),
            });
        }
    }

    fn mark_caught_up(&self, address: &str, stale: &CancellationToken) {
        if stale.finish() {
            self.events.emit(EngineEvent::HistoryCaughtUp {
                address: address.to_string(),
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{
        ChainError, DecryptError, Decryptor, EncryptedEffect, ObservedEncryptedState,
        RemoteTransaction, SecretSeed, TransactionOutcome,
    };
    use crate::multisig::interchange::AccountTransactionWithSignature;
    use crate::storage::MemoryStore;
    use crate::transaction::builder::TransactionBuilder;
    use crate::transaction::types::{
        AccountStatus, Amount, CredentialIndex, EncryptedAmount, TransactionHash,
        TransactionKind, TransactionStatus,
    };
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Serves scripted pages, then empty ones; records every `since_id`.
    struct Feed {
        pages: Mutex<VecDeque<Result<HistoryPage, ChainError>>>,
        requests: Mutex<Vec<u64>>,
    }

    impl Feed {
        fn new(pages: Vec<Result<HistoryPage, ChainError>>) -> Arc<Self> {
            Arc::new(Self {
                pages: Mutex::new(pages.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<u64> {
            self.requests.lock().clone()
        }
    }

    #[async_trait]
    impl ChainStatus for Feed {
        async fn transaction_outcome(
            &self,
            _hash: &TransactionHash,
        ) -> Result<TransactionOutcome, ChainError> {
            Ok(TransactionOutcome::received())
        }

        async fn account_history(
            &self,
            _address: &str,
            since_id: u64,
            _limit: u32,
        ) -> Result<HistoryPage, ChainError> {
            self.requests.lock().push(since_id);
            self.pages
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(HistoryPage::default()))
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

    fn remote(id: u64) -> RemoteTransaction {
        RemoteTransaction {
            id,
            transaction_hash: TransactionHash::from_bytes(&[id as u8; 32]),
            block_hash: "block".into(),
            kind: TransactionKind::SimpleTransfer,
            from_address: Some("carol".into()),
            to_address: Some("alice".into()),
            amount: Some(Amount(id)),
            cost: Some(Amount(1)),
            success: true,
            reject_reason: None,
            encrypted: None,
            memo: None,
        }
    }

    fn page(ids: &[u64], has_more: bool) -> Result<HistoryPage, ChainError> {
        Ok(HistoryPage {
            transactions: ids.iter().map(|id| remote(*id)).collect(),
            has_more,
        })
    }

    fn refresher(feed: Arc<Feed>, config: EngineConfig) -> (Arc<MemoryStore>, Arc<HistoryRefresher>) {
        let store = Arc::new(MemoryStore::new());
        store
            .put_account(&Account::new("alice", AccountStatus::Confirmed))
            .unwrap();
        let events = EventBus::default();
        let reconciler = Arc::new(BalanceReconciler::new(
            store.clone(),
            feed.clone(),
            Arc::new(NoDecrypt),
            events.clone(),
        ));
        let refresher = Arc::new(HistoryRefresher::new(
            store.clone(),
            feed,
            reconciler,
            events,
            &config,
        ));
        (store, refresher)
    }

    fn config(catch_up_ms: u64, refresh_ms: u64) -> EngineConfig {
        EngineConfig {
            history_catch_up_delay_ms: catch_up_ms,
            history_refresh_interval_ms: refresh_ms,
            ..EngineConfig::default()
        }
    }

    async fn tick() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn spawn(
        refresher: &Arc<HistoryRefresher>,
        tokens: &HistoryTokens,
    ) -> tokio::task::JoinHandle<Result<(), PollError>> {
        let refresher = refresher.clone();
        let tokens = tokens.clone();
        tokio::spawn(async move { refresher.run("alice", &tokens).await })
    }

    #[tokio::test]
    async fn cancel_before_next_fetch_stops_the_loop() {
        let feed = Feed::new(vec![page(&[3, 5, 8, 10, 12], true)]);
        let (store, refresher) = refresher(feed.clone(), config(3_600_000, 3_600_000));
        let tokens = HistoryTokens::new();

        let handle = spawn(&refresher, &tokens);
        while !tokens.is_catching_up() {
            tick().await;
        }
        assert_eq!(
            store.account("alice").unwrap().unwrap().max_observed_transaction_id,
            12
        );

        tokens.fetch.abort();
        handle.await.unwrap().unwrap();

        assert_eq!(feed.requests(), vec![0]);
        assert!(tokens.fetch.is_finished());
        assert!(tokens.stale.is_finished());
    }

    #[tokio::test]
    async fn next_fetch_starts_after_highest_id() {
        let feed = Feed::new(vec![page(&[3, 5, 8, 10, 12], true), page(&[13], false)]);
        let (_, refresher) = refresher(feed.clone(), config(1, 3_600_000));
        let tokens = HistoryTokens::new();

        let handle = spawn(&refresher, &tokens);
        while feed.requests().len() < 2 {
            tick().await;
        }
        // Second page said there is nothing more: caught up, waiting out the long interval.
        while tokens.is_catching_up() {
            tick().await;
        }
        tokens.fetch.abort();
        handle.await.unwrap().unwrap();

        assert_eq!(feed.requests(), vec![0, 12]);
    }

    #[tokio::test]
    async fn last_page_waits_for_the_refresh_interval() {
        let feed = Feed::new(vec![page(&[1, 2], false)]);
        let (store, refresher) = refresher(feed.clone(), config(1, 3_600_000));
        let tokens = HistoryTokens::new();
        let mut events = refresher.events.subscribe();

        let handle = spawn(&refresher, &tokens);
        while store.account("alice").unwrap().unwrap().max_observed_transaction_id < 2 {
            tick().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(feed.requests(), vec![0]);
        assert!(!tokens.is_catching_up());
        tokens.fetch.abort();
        handle.await.unwrap().unwrap();

        let alice = "alice".to_string();
        while let Ok(event) = events.try_recv() {
            assert_ne!(event, EngineEvent::HistoryCatchingUp { address: alice.clone() });
        }
    }

    #[tokio::test]
    async fn stale_token_tracks_catching_up() {
        let feed = Feed::new(vec![page(&[1], true)]);
        let (_, refresher) = refresher(feed.clone(), config(3_600_000, 3_600_000));
        let tokens = HistoryTokens::new();
        let mut events = refresher.events.subscribe();

        let handle = spawn(&refresher, &tokens);
        while !tokens.is_catching_up() {
            tick().await;
        }
        tokens.fetch.abort();
        handle.await.unwrap().unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        let alice = || "alice".to_string();
        assert!(seen.contains(&EngineEvent::HistoryCatchingUp { address: alice() }));
        assert_eq!(
            seen.last(),
            Some(&EngineEvent::HistoryCaughtUp { address: alice() })
        );
    }

    #[tokio::test]
    async fn unreachable_node_is_retried() {
        let feed = Feed::new(vec![Err(ChainError::Unreachable("offline".into())), page(&[4], false)]);
        let (store, refresher) = refresher(feed.clone(), config(3_600_000, 1));
        let tokens = HistoryTokens::new();

        let handle = spawn(&refresher, &tokens);
        while store.account("alice").unwrap().unwrap().max_observed_transaction_id < 4 {
            tick().await;
        }
        tokens.fetch.abort();
        handle.await.unwrap().unwrap();
        assert_eq!(&feed.requests()[..2], &[0, 0]);
    }

    #[test]
    fn known_transaction_is_merged_not_duplicated() {
        let feed = Feed::new(vec![]);
        let (store, refresher) = refresher(feed, EngineConfig::default());

        let tx = TransactionBuilder::new(TransactionKind::SimpleTransfer)
            .sender("alice")
            .recipient("bob")
            .amount(Amount(5))
            .build()
            .unwrap();
        let mut local = TransferTransaction::from_submission(
            &AccountTransactionWithSignature::unsigned(tx),
            TransactionHash::from_bytes(&[7; 32]),
        );
        local.status = TransactionStatus::Pending;
        store.put_transaction(&local).unwrap();

        let mut entry = remote(7);
        entry.from_address = Some("alice".into());
        entry.to_address = Some("bob".into());
        let summary = refresher
            .ingest(
                "alice",
                &HistoryPage {
                    transactions: vec![entry],
                    has_more: false,
                },
            )
            .unwrap();

        assert_eq!(summary.inserted, 0);
        let all = store.transactions_for_account("alice").unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].remote_id, Some(7));
        assert_eq!(all[0].status, TransactionStatus::Pending);
    }

    #[test]
    fn undecrypted_transfer_flips_all_decrypted() {
        let feed = Feed::new(vec![]);
        let (store, refresher) = refresher(feed, EngineConfig::default());
        let mut entry = remote(2);
        entry.kind = TransactionKind::EncryptedTransfer;
        entry.amount = None;
        entry.encrypted = Some(EncryptedEffect::Incoming {
            encrypted_amount: EncryptedAmount::new("c2"),
        });

        refresher
            .ingest(
                "alice",
                &HistoryPage {
                    transactions: vec![entry],
                    has_more: false,
                },
            )
            .unwrap();
        assert!(!store.account("alice").unwrap().unwrap().all_decrypted);
    }
}
