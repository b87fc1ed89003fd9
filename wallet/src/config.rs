//! # Engine Configuration & Constants
//!
//! Every magic number the wallet engine relies on lives here: polling
//! cadences, page sizes, transaction limits, and the energy cost model
//! constants. The cost constants must track the chain's own cost schedule;
//! if the chain changes them, the estimates here drift and transactions
//! start running out of energy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Polling
// ---------------------------------------------------------------------------

/// How often a pending transaction or submitted proposal is re-checked
/// against the chain. Two seconds matches the block time, so polling faster
/// only burns requests.
pub const DEFAULT_STATUS_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Cadence of the account history refresh loop once it has caught up.
pub const DEFAULT_HISTORY_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Delay between history fetches while the remote side still reports more
/// pages. Short on purpose: the view is known to be stale.
pub const DEFAULT_HISTORY_CATCH_UP_DELAY: Duration = Duration::from_millis(250);

/// Number of history entries requested per page.
pub const DEFAULT_HISTORY_PAGE_SIZE: u32 = 100;

/// Capacity of the domain event broadcast channel. Slow subscribers lag
/// (and are told so) instead of blocking the engine.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Transaction Limits
// ---------------------------------------------------------------------------

/// Default time-to-live of a freshly built transaction.
pub const DEFAULT_TRANSACTION_EXPIRY: Duration = Duration::from_secs(60 * 60);

/// Maximum memo size in bytes.
pub const MAX_MEMO_SIZE: usize = 256;

/// Maximum number of releases in a scheduled transfer.
pub const MAX_SCHEDULE_LENGTH: usize = 255;

/// Maximum number of credential signatures accepted from a single imported
/// signature file. Exported files only ever carry one.
pub const MAX_SIGNATURES_PER_IMPORT: usize = 1;

// ---------------------------------------------------------------------------
// Energy Cost Model
// ---------------------------------------------------------------------------

/// Energy charged per signature on the transaction.
pub const COST_PER_SIGNATURE: u64 = 100;

/// Energy charged per byte of header plus payload.
pub const COST_PER_BYTE: u64 = 1;

/// Serialized header size: sender (32) + nonce (8) + energy (8) +
/// payload size (4) + expiry (8).
pub const TRANSACTION_HEADER_SIZE: u64 = 32 + 8 + 8 + 4 + 8;

pub const SIMPLE_TRANSFER_COST: u64 = 300;
pub const ENCRYPTED_TRANSFER_COST: u64 = 27_000;
pub const TRANSFER_TO_ENCRYPTED_COST: u64 = 600;
pub const TRANSFER_TO_PUBLIC_COST: u64 = 14_850;
pub const SCHEDULED_TRANSFER_PER_RELEASE_COST: u64 = 300 + 64;
pub const UPDATE_CREDENTIALS_BASE_COST: u64 = 500;
pub const UPDATE_CREDENTIALS_PER_EXISTING_COST: u64 = 500;
pub const UPDATE_CREDENTIALS_PER_NEW_COST: u64 = 54_000 + 100;
pub const REGISTER_DATA_COST: u64 = 300;

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Runtime tunables for the engine.
///
/// Loaded from a JSON file by the operator tool, or built with
/// `EngineConfig::default()` and tweaked field by field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Interval between status checks of a pending transaction or proposal.
    pub status_poll_interval_ms: u64,
    /// Interval between history refreshes once caught up.
    pub history_refresh_interval_ms: u64,
    /// Delay between history fetches while more pages are pending.
    pub history_catch_up_delay_ms: u64,
    /// Page size requested from the history endpoint.
    pub history_page_size: u32,
    /// Capacity of the domain event channel.
    pub event_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            status_poll_interval_ms: DEFAULT_STATUS_POLL_INTERVAL.as_millis() as u64,
            history_refresh_interval_ms: DEFAULT_HISTORY_REFRESH_INTERVAL.as_millis() as u64,
            history_catch_up_delay_ms: DEFAULT_HISTORY_CATCH_UP_DELAY.as_millis() as u64,
            history_page_size: DEFAULT_HISTORY_PAGE_SIZE,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl EngineConfig {
    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms)
    }

    pub fn history_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.history_refresh_interval_ms)
    }

    pub fn history_catch_up_delay(&self) -> Duration {
        Duration::from_millis(self.history_catch_up_delay_ms)
    }
}
