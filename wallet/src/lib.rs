// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # NOVA Wallet — Transaction Lifecycle Engine
//!
//! The client-side half of getting money moved: turn an intent into a
//! signed transaction, get it to a node, and keep watching until the chain
//! has said its final word. For accounts that need several signatures, the
//! engine also runs the proposal book-keeping that lets co-signers on
//! separate, offline machines contribute signatures by exchanging files.
//!
//! ## Architecture
//!
//! - **transaction** — Builder, energy cost model, canonical encoding,
//!   signing, and the local record of every transaction we care about.
//! - **multisig** — Proposals, the signature-file format, and the collector
//!   that decides which imported signatures count.
//! - **poller** — Background status and history loops with cooperative
//!   cancellation.
//! - **balance** — Keeps the shielded balance honest while local and remote
//!   changes race each other; decrypts in batches.
//! - **chain** — The traits the engine consumes: node access and decryption.
//! - **storage** — In-memory and sled-backed persistence.
//! - **events** — Domain events for whoever draws the UI.
//! - **engine** — Wires everything together.
//! - **config** — Constants and runtime tunables.
//!
//! ## Ground Rules
//!
//! 1. A terminal status is written once. Later observations are no-ops.
//! 2. Background loops never write back a stale copy of a record.
//! 3. An unreachable node is a reason to wait, never a reason to fail a
//!    transaction.

pub mod account;
pub mod balance;
pub mod chain;
pub mod config;
pub mod engine;
pub mod events;
pub mod multisig;
pub mod poller;
pub mod storage;
pub mod transaction;

pub use engine::{Engine, EngineError, HistoryHandle};
