//! # CLI Interface
//!
//! Command-line structure for `nova-cosign` using `clap` derive. Every
//! command works on the local proposal database; nothing here talks to a
//! node, so the tool can run on an air-gapped machine.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::logging::LogFormat;

/// NOVA multi-signature proposal tool.
///
/// Creates proposals from unsigned transactions, signs them with local
/// keys, and moves signatures between machines as files.
#[derive(Parser, Debug)]
#[command(
    name = "nova-cosign",
    about = "Air-gapped multi-signature proposal tool",
    version,
    propagate_version = true
)]
pub struct CosignCli {
    /// Directory holding the proposal database.
    #[arg(
        long,
        short = 'd',
        global = true,
        env = "NOVA_COSIGN_DATA_DIR",
        default_value = ".nova-cosign"
    )]
    pub data_dir: PathBuf,

    /// Engine configuration file (JSON). Missing fields take defaults.
    #[arg(long, short = 'c', global = true, env = "NOVA_COSIGN_CONFIG")]
    pub config: Option<PathBuf>,

    /// JSON array of hex-encoded Ed25519 authorization keys. When given,
    /// imported update-instruction signatures must verify against them.
    #[arg(long, global = true, env = "NOVA_COSIGN_AUTHORIZATION_KEYS")]
    pub authorization_keys: Option<PathBuf>,

    /// Log output format.
    #[arg(
        long,
        global = true,
        value_enum,
        env = "NOVA_COSIGN_LOG_FORMAT",
        default_value_t = LogFormat::Pretty
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Open a proposal for an unsigned transaction file.
    Create(CreateArgs),
    /// Sign a proposal with a local key.
    Sign(SignArgs),
    /// Merge a co-signer's signature file into a proposal.
    Import(ImportArgs),
    /// Print a proposal.
    Show(ShowArgs),
    /// List every proposal.
    List(ListArgs),
    /// Write a proposal's transaction and signatures to a file.
    Export(ExportArgs),
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Transaction file: an account transaction or update instruction,
    /// optionally already carrying signatures.
    #[arg(long, short = 't')]
    pub transaction: PathBuf,

    /// Number of signatures required before submission.
    #[arg(long, default_value_t = 1)]
    pub threshold: u32,
}

#[derive(Args, Debug)]
pub struct SignArgs {
    /// Proposal to sign.
    #[arg(long)]
    pub id: u64,

    /// File containing the hex-encoded 32-byte Ed25519 secret key.
    #[arg(long, short = 'k', env = "NOVA_COSIGN_KEY_FILE")]
    pub key_file: PathBuf,

    #[arg(long, default_value_t = 0)]
    pub identity_index: u32,

    /// Credential the key belongs to (account transactions).
    #[arg(long, default_value_t = 0)]
    pub credential_index: u32,

    #[arg(long, default_value_t = 0)]
    pub key_index: u32,

    /// Authorization key index (update instructions).
    #[arg(long, default_value_t = 0)]
    pub authorization_key_index: u32,

    /// Also write a signature file carrying only this signature.
    #[arg(long, short = 'o')]
    pub out: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    #[arg(long)]
    pub id: u64,

    /// Signature file produced by `sign --out` or `export` on another machine.
    #[arg(long, short = 'f')]
    pub file: PathBuf,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    #[arg(long)]
    pub id: u64,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Print JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    #[arg(long)]
    pub id: u64,

    #[arg(long, short = 'o')]
    pub out: PathBuf,
}
