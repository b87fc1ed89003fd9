//! Cooperative cancellation.
//!
//! A [`CancellationToken`] never interrupts anything by itself. Loops check
//! [`CancellationToken::is_aborted`] at their re-entry points and race their
//! sleeps against [`CancellationToken::cancelled`]; whoever owns the loop
//! calls [`CancellationToken::finish`] on the way out, which wakes anyone
//! waiting in [`CancellationToken::finished`].
//!
//! ```text
//! Idle ──start──▶ Active ──finish──▶ Finished
//!                   ▲                   │
//!                   └──────start────────┘
//! ```
//!
//! Aborting is orthogonal to the state: it is a sticky flag that can be
//! raised at any time, even before the loop starts.

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Idle,
    Active,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Snapshot {
    state: TokenState,
    aborted: bool,
}

/// Shared handle; clones observe and control the same token.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    inner: Arc<watch::Sender<Snapshot>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(Snapshot {
            state: TokenState::Idle,
            aborted: false,
        });
        Self {
            inner: Arc::new(sender),
        }
    }

    /// Moves the token to `Active`. Returns false if it already was.
    pub fn start(&self) -> bool {
        self.inner.send_if_modified(|s| {
            if s.state == TokenState::Active {
                return false;
            }
            s.state = TokenState::Active;
            true
        })
    }

    /// Marks the token `Finished`. Finishing twice is harmless; returns
    /// false if it already was.
    pub fn finish(&self) -> bool {
        self.inner.send_if_modified(|s| {
            if s.state == TokenState::Finished {
                return false;
            }
            s.state = TokenState::Finished;
            true
        })
    }

    /// Asks the owning loop to stop at its next check.
    pub fn abort(&self) {
        self.inner.send_if_modified(|s| !std::mem::replace(&mut s.aborted, true));
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.borrow().aborted
    }

    pub fn state(&self) -> TokenState {
        self.inner.borrow().state
    }

    pub fn is_active(&self) -> bool {
        self.state() == TokenState::Active
    }

    pub fn is_finished(&self) -> bool {
        self.state() == TokenState::Finished
    }

    /// Resolves once [`abort`](Self::abort) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.inner.subscribe();
        let _ = rx.wait_for(|s| s.aborted).await;
    }

    /// Resolves once the token is `Finished`.
    pub async fn finished(&self) {
        let mut rx = self.inner.subscribe();
        let _ = rx.wait_for(|s| s.state == TokenState::Finished).await;
    }

    /// Aborts and waits for the owning loop to acknowledge.
    pub async fn abort_and_wait(&self) {
        self.abort();
        self.finished().await;
    }

    /// Whether both handles control the same token.
    pub fn same_as(&self, other: &CancellationToken) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
