//! Generic interval-driven status polling.
//!
//! [`StatusPoller::poll`] repeatedly runs a status check until it reports a
//! terminal value, applies that value once, and finishes the token. The
//! poller keeps a registry of running targets so the same transaction or
//! proposal is never polled by two loops at once.

use std::future::Future;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, warn};

use super::cancellation::CancellationToken;
use crate::balance::ReconcileError;
use crate::chain::ChainError;
use crate::multisig::store::ProposalError;
use crate::storage::StoreError;

#[derive(Debug, Error)]
pub enum PollError {
    /// The node could not be reached. Nothing was changed; poll again later.
    #[error("unable to reach node: {0}")]
    Unreachable(String),

    #[error("malformed response from node: {0}")]
    Malformed(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error(transparent)]
    Proposal(#[from] ProposalError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

impl From<ChainError> for PollError {
    fn from(e: ChainError) -> Self {
        match e {
            ChainError::Unreachable(msg) => Self::Unreachable(msg),
            ChainError::Malformed(msg) => Self::Malformed(msg),
        }
    }
}

impl PollError {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// A terminal status was observed and applied.
    Completed(T),
    /// The token was aborted before a terminal status was applied.
    Cancelled,
    /// Another loop is already polling this target.
    AlreadyPolling,
}

/// What a loop does when the node cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnUnreachable {
    /// Return [`PollError::Unreachable`] to the caller.
    Stop,
    /// Wait one interval and query again. Stored state is left alone.
    Retry,
}

impl<T> PollOutcome<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> PollOutcome<U> {
        match self {
            Self::Completed(value) => PollOutcome::Completed(f(value)),
            Self::Cancelled => PollOutcome::Cancelled,
            Self::AlreadyPolling => PollOutcome::AlreadyPolling,
        }
    }
}

pub struct StatusPoller {
    interval: Duration,
    active: DashMap<String, CancellationToken>,
}

/// Removes a registry entry when its loop exits, however it exits.
struct Registration<'a> {
    active: &'a DashMap<String, CancellationToken>,
    target: String,
    token: CancellationToken,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.active
            .remove_if(&self.target, |_, token| token.same_as(&self.token));
    }
}

impl StatusPoller {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            active: DashMap::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Polls `target` until `check` yields a terminal value, then hands it
    /// to `apply` and finishes `token`.
    ///
    /// The token is checked before every query and again after it returns,
    /// so an abort that lands while a query is in flight is honoured before
    /// anything is applied. Any error from `check` ends the loop and is
    /// returned as is; stored state is untouched.
    pub async fn poll<T, R, F, Fut, A>(
        &self,
        target: &str,
        token: &CancellationToken,
        check: F,
        apply: A,
    ) -> Result<PollOutcome<R>, PollError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>, PollError>>,
        A: FnOnce(T) -> Result<R, PollError>,
    {
        self.poll_with(target, token, OnUnreachable::Stop, check, apply)
            .await
    }

    /// Like [`poll`](Self::poll), but `on_unreachable` decides whether an
    /// unreachable node ends the loop or is waited out. A retrying loop
    /// keeps its registration while it waits.
    pub async fn poll_with<T, R, F, Fut, A>(
        &self,
        target: &str,
        token: &CancellationToken,
        on_unreachable: OnUnreachable,
        mut check: F,
        apply: A,
    ) -> Result<PollOutcome<R>, PollError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>, PollError>>,
        A: FnOnce(T) -> Result<R, PollError>,
    {
        let _registration = match self.register(target, token) {
            Some(registration) => registration,
            None => {
                debug!(key = target, "already polling");
                return Ok(PollOutcome::AlreadyPolling);
            }
        };
        token.start();

        loop {
            if token.is_aborted() {
                debug!(key = target, "poll cancelled");
                token.finish();
                return Ok(PollOutcome::Cancelled);
            }

            let status = check().await;

            if token.is_aborted() {
                debug!(key = target, "poll cancelled during status query");
                token.finish();
                return Ok(PollOutcome::Cancelled);
            }

            match status {
                Ok(Some(terminal)) => {
                    let applied = apply(terminal);
                    token.finish();
                    return applied.map(PollOutcome::Completed);
                }
                Ok(None) => {
                    debug!(
                        key = target,
                        interval_ms = self.interval.as_millis() as u64,
                        "still pending"
                    );
                }
                Err(e) if e.is_unreachable() && on_unreachable == OnUnreachable::Retry => {
                    warn!(
                        key = target,
                        error = %e,
                        retry_ms = self.interval.as_millis() as u64,
                        "node unreachable, will retry"
                    );
                }
                Err(e) => {
                    warn!(key = target, error = %e, "status poll stopped");
                    token.finish();
                    return Err(e);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = token.cancelled() => {}
            }
        }
    }

    pub fn is_polling(&self, target: &str) -> bool {
        self.active.contains_key(target)
    }

    /// Aborts the loop polling `target`, if any.
    pub fn cancel(&self, target: &str) -> bool {
        match self.active.get(target) {
            Some(token) => {
                token.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for entry in self.active.iter() {
            entry.value().abort();
        }
    }

    fn register(&self, target: &str, token: &CancellationToken) -> Option<Registration<'_>> {
        match self.active.entry(target.to_string()) {
            Entry::Occupied(_) => return None,
            Entry::Vacant(slot) => {
                slot.insert(token.clone());
            }
        }
        Some(Registration {
            active: &self.active,
            target: target.to_string(),
            token: token.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
