//! # Status Polling
//!
//! Background loops that watch the chain on behalf of the wallet: one per
//! pending transaction, submitted proposal, or deploying account, plus one
//! history refresh loop per watched account.
//!
//! ## Architecture
//!
//! ```text
//! cancellation.rs  CancellationToken: Idle -> Active -> Finished, sticky abort
//! status.rs        StatusPoller: at most one loop per target, cooperative cancel
//! monitor.rs       TransactionMonitor: transaction, proposal, deployment loops
//! history.rs       HistoryRefresher: paged history with fetch and stale tokens
//! ```
//!
//! Loops only ever stop at a check point: before a request, after a request
//! returns, or while sleeping. An aborted loop never writes the result of a
//! request that was in flight when it was aborted.

pub mod cancellation;
pub mod history;
pub mod monitor;
pub mod status;

pub use cancellation::{CancellationToken, TokenState};
pub use history::{HistoryRefresher, HistoryTokens, IngestSummary};
pub use monitor::{MonitorTask, TransactionMonitor};
pub use status::{OnUnreachable, PollError, PollOutcome, StatusPoller};
