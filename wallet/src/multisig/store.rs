//! Proposal lifecycle.
//!
//! [`ProposalStore`] owns every status change of a [`Proposal`]:
//!
//! - creation (`Open`),
//! - signature accumulation through the [`SignatureCollector`],
//! - broadcast once quorum is reached (`Submitted`, or `Failed` if the node
//!   refuses it),
//! - the terminal outcome reported by the status poller.
//!
//! All writes go through [`Store::update_proposal`], so two concurrent
//! callers cannot both move the same proposal out of a given state.

use std::sync::Arc;

use ed25519_dalek::VerifyingKey;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::collector::{ImportError, SignatureCollector};
use super::interchange::{decode_signature_file, SignedTransaction};
use super::proposal::{Proposal, ProposalFailure, ProposalStatus};
use crate::chain::{ChainError, ChainStatus, TerminalOutcome};
use crate::events::{EngineEvent, EventBus};
use crate::storage::{Store, StoreError};
use crate::transaction::builder::Payload;
use crate::transaction::serialization::{SerializationError, TransactionSerializer};
use crate::transaction::signing::{sign_transaction, KeyPath, Signer, SignerError};

#[derive(Debug, Error)]
pub enum ProposalError {
    #[error("proposal {0} not found")]
    NotFound(u64),

    #[error("proposal cannot move from {from} to {to}")]
    InvalidTransition {
        from: ProposalStatus,
        to: ProposalStatus,
    },

    #[error("quorum not reached: {have} of {need} signatures")]
    QuorumNotReached { have: usize, need: u32 },

    #[error("a proposal needs a threshold of at least one signature")]
    ZeroThreshold,

    #[error(transparent)]
    Import(#[from] ImportError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error(transparent)]
    Signer(#[from] SignerError),
}

impl ProposalError {
    /// Transient failure; nothing was changed and the call may be retried.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Chain(ChainError::Unreachable(_)))
    }
}

pub struct ProposalStore {
    store: Arc<dyn Store>,
    serializer: Arc<dyn TransactionSerializer>,
    collector: SignatureCollector,
    events: EventBus,
}

impl ProposalStore {
    pub fn new(
        store: Arc<dyn Store>,
        serializer: Arc<dyn TransactionSerializer>,
        events: EventBus,
    ) -> Self {
        Self {
            collector: SignatureCollector::new(serializer.clone()),
            store,
            serializer,
            events,
        }
    }

    /// Requires imported update-instruction signatures to verify against
    /// these keys.
    pub fn with_authorization_keys(mut self, keys: Vec<VerifyingKey>) -> Self {
        self.collector = self.collector.with_authorization_keys(keys);
        self
    }

    /// Opens a proposal for `transaction`. Signatures already present on it
    /// count towards the threshold.
    pub fn create(
        &self,
        transaction: SignedTransaction,
        threshold: u32,
    ) -> Result<Proposal, ProposalError> {
        if threshold == 0 {
            return Err(ProposalError::ZeroThreshold);
        }
        let id = self.store.next_proposal_id()?;
        let proposal = Proposal::new(id, transaction, threshold);
        self.store.put_proposal(&proposal)?;

        info!(
            proposal_id = id,
            shape = proposal.transaction.shape_name(),
            threshold,
            "proposal created"
        );
        self.events.emit(EngineEvent::ProposalStatusChanged {
            id,
            status: proposal.status,
        });
        Ok(proposal)
    }

    pub fn get(&self, id: u64) -> Result<Proposal, ProposalError> {
        self.store.proposal(id)?.ok_or(ProposalError::NotFound(id))
    }

    pub fn list(&self) -> Result<Vec<Proposal>, ProposalError> {
        Ok(self.store.proposals()?)
    }

    /// Proposals waiting on a chain outcome.
    pub fn submitted(&self) -> Result<Vec<Proposal>, ProposalError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|p| p.status == ProposalStatus::Submitted)
            .collect())
    }

    /// Decodes a signature file and merges its signature into proposal `id`.
    /// On any error the stored proposal is left exactly as it was.
    pub fn import_signature_file(&self, id: u64, bytes: &[u8]) -> Result<Proposal, ProposalError> {
        let imported = decode_signature_file(bytes)?;
        self.add_signature(id, &imported)
    }

    pub fn add_signature(
        &self,
        id: u64,
        imported: &SignedTransaction,
    ) -> Result<Proposal, ProposalError> {
        let mut failure = None;
        let merged = self.store.update_proposal(id, &mut |current| {
            match self.collector.merge(current, imported) {
                Ok(merged) => Some(merged),
                Err(e) => {
                    failure = Some(e);
                    None
                }
            }
        });

        let merged = match merged {
            Err(StoreError::NotFound(_)) => return Err(ProposalError::NotFound(id)),
            other => other?,
        };
        if let Some(e) = failure {
            warn!(proposal_id = id, error = %e, "signature import rejected");
            return Err(e.into());
        }
        let proposal = merged.ok_or(ProposalError::NotFound(id))?;

        info!(
            proposal_id = id,
            signatures = proposal.signature_count(),
            threshold = proposal.threshold,
            "signature added to proposal"
        );
        Ok(proposal)
    }

    /// Signs proposal `id` with a local key and merges the signature.
    pub async fn sign_with(
        &self,
        id: u64,
        signer: &dyn Signer,
        key_path: &KeyPath,
        authorization_key_index: u32,
    ) -> Result<Proposal, ProposalError> {
        let proposal = self.get(id)?;
        let signed = sign_transaction(
            signer,
            self.serializer.as_ref(),
            &proposal.transaction,
            key_path,
            authorization_key_index,
        )
        .await?;
        self.add_signature(id, &signed)
    }

    /// Broadcasts proposal `id` once it has enough signatures.
    ///
    /// An accepted broadcast moves it to `Submitted`; a refused one to
    /// `Failed`, with no automatic retry. If the node is unreachable the
    /// error is returned and the proposal stays `Open`.
    pub async fn submit(
        &self,
        id: u64,
        chain: &dyn ChainStatus,
    ) -> Result<Proposal, ProposalError> {
        let proposal = self.get(id)?;
        if proposal.status != ProposalStatus::Open {
            return Err(ProposalError::InvalidTransition {
                from: proposal.status,
                to: ProposalStatus::Submitted,
            });
        }
        if !proposal.has_quorum() {
            return Err(ProposalError::QuorumNotReached {
                have: proposal.signature_count(),
                need: proposal.threshold,
            });
        }

        let bytes = self.serializer.serialize(&proposal.transaction)?;
        let hash = self.serializer.transaction_hash(&proposal.transaction)?;

        let accepted = chain.send_transaction(&bytes).await.map_err(|e| {
            warn!(proposal_id = id, error = %e, "proposal broadcast failed");
            e
        })?;

        let (status, failure) = if accepted {
            (ProposalStatus::Submitted, None)
        } else {
            (ProposalStatus::Failed, Some(ProposalFailure::BroadcastRejected))
        };
        let submitted = self.transition(id, status, |p| {
            p.transaction_hash = Some(hash.clone());
            p.failure = failure.clone();
        })?;

        info!(proposal_id = id, hash = %hash, status = %status, "proposal broadcast");
        Ok(submitted)
    }

    /// Applies the chain outcome of a submitted proposal.
    ///
    /// Returns `None` when the proposal is already terminal. A finalized
    /// credential update also updates the sending account's threshold and
    /// credentials.
    pub(crate) fn apply_outcome(
        &self,
        id: u64,
        outcome: &TerminalOutcome,
    ) -> Result<Option<Proposal>, ProposalError> {
        let current = self.get(id)?;
        if current.status.is_terminal() {
            debug!(proposal_id = id, status = %current.status, "outcome already applied");
            return Ok(None);
        }

        let next = match outcome {
            TerminalOutcome::Finalized { .. } => ProposalStatus::Finalized,
            TerminalOutcome::Failed { .. } => ProposalStatus::Failed,
            TerminalOutcome::Rejected => ProposalStatus::Rejected,
        };
        let updated = match self.transition(id, next, |p| match outcome {
            TerminalOutcome::Finalized { cost, .. } => p.cost = Some(*cost),
            TerminalOutcome::Failed {
                cost,
                reject_reason,
                ..
            } => {
                p.cost = Some(*cost);
                p.failure = Some(ProposalFailure::Execution(reject_reason.clone()));
            }
            TerminalOutcome::Rejected => {}
        }) {
            Ok(updated) => updated,
            // Lost a race with another observer of the same outcome.
            Err(ProposalError::InvalidTransition { from, .. }) if from.is_terminal() => {
                return Ok(None)
            }
            Err(e) => return Err(e),
        };

        if updated.status == ProposalStatus::Finalized {
            self.apply_credential_update(&updated)?;
        }
        info!(proposal_id = id, status = %updated.status, "proposal resolved");
        Ok(Some(updated))
    }

    /// Bare file bytes of the proposal's transaction and signatures.
    pub fn export(&self, id: u64) -> Result<Vec<u8>, ProposalError> {
        let proposal = self.get(id)?;
        proposal
            .transaction
            .to_file_bytes()
            .map_err(|e| ProposalError::Serialization(e.into()))
    }

    fn transition(
        &self,
        id: u64,
        to: ProposalStatus,
        mut edit: impl FnMut(&mut Proposal),
    ) -> Result<Proposal, ProposalError> {
        let mut from = None;
        let updated = self.store.update_proposal(id, &mut |current| {
            if !current.status.can_transition_to(to) {
                from = Some(current.status);
                return None;
            }
            let mut next = current.clone();
            next.status = to;
            edit(&mut next);
            Some(next)
        })?;

        match (updated, from) {
            (Some(updated), _) => {
                self.events.emit(EngineEvent::ProposalStatusChanged { id, status: to });
                Ok(updated)
            }
            (None, Some(from)) => Err(ProposalError::InvalidTransition { from, to }),
            (None, None) => Err(ProposalError::NotFound(id)),
        }
    }

    fn apply_credential_update(&self, proposal: &Proposal) -> Result<(), ProposalError> {
        let SignedTransaction::AccountTransaction(signed) = &proposal.transaction else {
            return Ok(());
        };
        let Payload::UpdateCredentials {
            added_credentials,
            removed_cred_ids,
            threshold,
            ..
        } = &signed.transaction.payload
        else {
            return Ok(());
        };

        let address = &signed.transaction.sender;
        let result = self.store.update_account(address, &mut |account| {
            let mut account = account.clone();
            account.apply_credential_update(
                *threshold,
                added_credentials
                    .iter()
                    .map(|c| (c.index, c.credential_id.clone())),
                removed_cred_ids,
            );
            Some(account)
        });

        match result {
            Ok(_) => {
                info!(
                    address = %address,
                    threshold,
                    added = added_credentials.len(),
                    removed = removed_cred_ids.len(),
                    "credential update applied"
                );
                self.events.emit(EngineEvent::AccountUpdated {
                    address: address.clone(),
                });
                Ok(())
            }
            Err(StoreError::NotFound(_)) => {
                warn!(address = %address, "credential update for an account not held locally");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Account;
    use crate::chain::{HistoryPage, ObservedEncryptedState, TransactionOutcome};
    use crate::multisig::interchange::AccountTransactionWithSignature;
    use crate::storage::MemoryStore;
    use crate::transaction::builder::TransactionBuilder;
    use crate::transaction::reject_reason::RejectReasonTag;
    use crate::transaction::serialization::CanonicalSerializer;
    use crate::transaction::types::{
        AccountStatus, Amount, SignatureBytes, TransactionHash, TransactionKind,
    };
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers every broadcast with a fixed verdict.
    struct Broadcast {
        verdict: Result<bool, ChainError>,
        calls: AtomicUsize,
    }

    impl Broadcast {
        fn new(verdict: Result<bool, ChainError>) -> Self {
            Self {
                verdict,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ChainStatus for Broadcast {
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
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.verdict.clone()
        }

        async fn encrypted_state(
            &self,
            _address: &str,
        ) -> Result<ObservedEncryptedState, ChainError> {
            Err(ChainError::Unreachable("not used".into()))
        }
    }

    fn proposals() -> (Arc<MemoryStore>, ProposalStore) {
        let store = Arc::new(MemoryStore::new());
        let proposals = ProposalStore::new(
            store.clone(),
            Arc::new(CanonicalSerializer),
            EventBus::default(),
        );
        (store, proposals)
    }

    fn credential_update() -> AccountTransactionWithSignature {
        let tx = TransactionBuilder::new(TransactionKind::UpdateCredentials)
            .sender("shared")
            .add_credential(2, "cred-2")
            .remove_credential("cred-1")
            .threshold(2)
            .current_number_of_credentials(2)
            .nonce(4)
            .expiry(4_000_000_000)
            .build()
            .unwrap();
        AccountTransactionWithSignature::unsigned(tx)
    }

    fn signature_file(credential: u32, byte: u8) -> Vec<u8> {
        let mut tx = credential_update();
        tx.signatures
            .insert(credential, BTreeMap::from([(0, SignatureBytes(vec![byte; 64]))]));
        SignedTransaction::AccountTransaction(tx)
            .to_file_bytes()
            .unwrap()
    }

    fn open(proposals: &ProposalStore) -> Proposal {
        proposals
            .create(SignedTransaction::AccountTransaction(credential_update()), 2)
            .unwrap()
    }

    fn quorate(proposals: &ProposalStore) -> Proposal {
        let p = open(proposals);
        proposals.import_signature_file(p.id, &signature_file(0, 1)).unwrap();
        proposals.import_signature_file(p.id, &signature_file(1, 2)).unwrap()
    }

    #[test]
    fn zero_threshold_is_refused() {
        let (_, proposals) = proposals();
        let tx = SignedTransaction::AccountTransaction(credential_update());
        assert!(matches!(
            proposals.create(tx, 0),
            Err(ProposalError::ZeroThreshold)
        ));
    }

    #[test]
    fn duplicate_import_leaves_stored_proposal_alone() {
        let (_, proposals) = proposals();
        let p = open(&proposals);
        proposals.import_signature_file(p.id, &signature_file(0, 1)).unwrap();

        let err = proposals
            .import_signature_file(p.id, &signature_file(0, 7))
            .unwrap_err();
        assert!(matches!(
            err,
            ProposalError::Import(ImportError::DuplicateCredential(_))
        ));

        let stored = proposals.get(p.id).unwrap();
        assert_eq!(stored.status, ProposalStatus::Open);
        assert_eq!(stored.signature_count(), 1);
    }

    #[test]
    fn garbage_file_is_invalid_format() {
        let (_, proposals) = proposals();
        let p = open(&proposals);
        let err = proposals
            .import_signature_file(p.id, br#"{"hello":"world"}"#)
            .unwrap_err();
        assert!(matches!(
            err,
            ProposalError::Import(ImportError::InvalidFormat(_))
        ));
    }

    #[test]
    fn import_into_missing_proposal_is_not_found() {
        let (_, proposals) = proposals();
        let err = proposals
            .import_signature_file(42, &signature_file(0, 1))
            .unwrap_err();
        assert!(matches!(err, ProposalError::NotFound(42)));
    }

    // -- Submission -----------------------------------------------------------

    #[tokio::test]
    async fn submit_requires_quorum() {
        let (_, proposals) = proposals();
        let p = open(&proposals);
        let chain = Broadcast::new(Ok(true));
        let err = proposals.submit(p.id, &chain).await.unwrap_err();
        assert!(matches!(
            err,
            ProposalError::QuorumNotReached { have: 0, need: 2 }
        ));
        assert_eq!(chain.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn accepted_broadcast_submits() {
        let (_, proposals) = proposals();
        let p = quorate(&proposals);
        let submitted = proposals.submit(p.id, &Broadcast::new(Ok(true))).await.unwrap();
        assert_eq!(submitted.status, ProposalStatus::Submitted);
        assert!(submitted.transaction_hash.is_some());

        let err = proposals
            .submit(p.id, &Broadcast::new(Ok(true)))
            .await
            .unwrap_err();
        assert!(matches!(err, ProposalError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn refused_broadcast_fails_the_proposal() {
        let (_, proposals) = proposals();
        let p = quorate(&proposals);
        let failed = proposals.submit(p.id, &Broadcast::new(Ok(false))).await.unwrap();
        assert_eq!(failed.status, ProposalStatus::Failed);
        assert_eq!(failed.failure, Some(ProposalFailure::BroadcastRejected));
    }

    #[tokio::test]
    async fn unreachable_node_changes_nothing() {
        let (_, proposals) = proposals();
        let p = quorate(&proposals);
        let chain = Broadcast::new(Err(ChainError::Unreachable("offline".into())));
        let err = proposals.submit(p.id, &chain).await.unwrap_err();
        assert!(err.is_unreachable());
        assert_eq!(proposals.get(p.id).unwrap().status, ProposalStatus::Open);
    }

    // -- Outcomes -------------------------------------------------------------

    async fn submitted(proposals: &ProposalStore) -> Proposal {
        let p = quorate(proposals);
        proposals.submit(p.id, &Broadcast::new(Ok(true))).await.unwrap()
    }

    #[tokio::test]
    async fn finalized_credential_update_reaches_the_account() {
        let (store, proposals) = proposals();
        let mut account = Account::new("shared", AccountStatus::Confirmed);
        account.credentials.insert(0, "cred-0".into());
        account.credentials.insert(1, "cred-1".into());
        store.put_account(&account).unwrap();

        let p = submitted(&proposals).await;
        let done = proposals
            .apply_outcome(
                p.id,
                &TerminalOutcome::Finalized {
                    block_hash: "b".into(),
                    cost: Amount(1_500),
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(done.status, ProposalStatus::Finalized);
        assert_eq!(done.cost, Some(Amount(1_500)));

        let account = store.account("shared").unwrap().unwrap();
        assert_eq!(account.signature_threshold, 2);
        assert_eq!(
            account.credentials,
            BTreeMap::from([(0, "cred-0".to_string()), (2, "cred-2".to_string())])
        );
    }

    #[tokio::test]
    async fn failed_outcome_keeps_unknown_reason_verbatim() {
        let (_, proposals) = proposals();
        let p = submitted(&proposals).await;
        let failed = proposals
            .apply_outcome(
                p.id,
                &TerminalOutcome::Failed {
                    block_hash: "b".into(),
                    cost: Amount(3),
                    reject_reason: RejectReasonTag::parse("FutureReason"),
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(
            failed.failure,
            Some(ProposalFailure::Execution(RejectReasonTag::Unknown(
                "FutureReason".into()
            )))
        );
    }

    #[tokio::test]
    async fn second_outcome_is_a_no_op() {
        let (_, proposals) = proposals();
        let p = submitted(&proposals).await;
        proposals
            .apply_outcome(p.id, &TerminalOutcome::Rejected)
            .unwrap()
            .unwrap();

        let again = proposals
            .apply_outcome(
                p.id,
                &TerminalOutcome::Finalized {
                    block_hash: "b".into(),
                    cost: Amount(1),
                },
            )
            .unwrap();
        assert!(again.is_none());
        let stored = proposals.get(p.id).unwrap();
        assert_eq!(stored.status, ProposalStatus::Rejected);
        assert_eq!(stored.cost, None);
    }

    #[test]
    fn outcome_for_open_proposal_is_invalid() {
        let (_, proposals) = proposals();
        let p = open(&proposals);
        let err = proposals
            .apply_outcome(p.id, &TerminalOutcome::Rejected)
            .unwrap_err();
        assert!(matches!(
            err,
            ProposalError::InvalidTransition {
                from: ProposalStatus::Open,
                to: ProposalStatus::Rejected
            }
        ));
    }

    #[test]
    fn export_round_trips_through_import() {
        let (_, proposals) = proposals();
        let p = open(&proposals);
        proposals.import_signature_file(p.id, &signature_file(3, 1)).unwrap();
        let bytes = proposals.export(p.id).unwrap();

        let other = open(&proposals);
        let merged = proposals.import_signature_file(other.id, &bytes).unwrap();
        assert_eq!(merged.signature_count(), 1);
    }
}
