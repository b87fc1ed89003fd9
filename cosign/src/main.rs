// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # NOVA Cosign
//!
//! Entry point for the `nova-cosign` binary: proposal handling for accounts
//! whose transactions need several signatures, on machines that never talk
//! to a node.
//!
//! A typical round:
//!
//! 1. The coordinator runs `create` with the unsigned transaction and
//!    hands the same transaction file to every co-signer.
//! 2. Each co-signer runs `create` then `sign --out sig.json` on their own
//!    machine and sends back `sig.json`.
//! 3. The coordinator runs `import` for every file received. Once the
//!    threshold is met, the proposal is ready for the online wallet.

mod cli;
mod logging;

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::SecondsFormat;
use clap::Parser;
use ed25519_dalek::{SigningKey, VerifyingKey};
use serde::Serialize;
use tracing::info;

use nova_wallet::config::EngineConfig;
use nova_wallet::events::EventBus;
use nova_wallet::multisig::{decode_signature_file, Proposal, ProposalStore};
use nova_wallet::storage::{SledStore, Store};
use nova_wallet::transaction::{sign_transaction, CanonicalSerializer, Ed25519Signer, KeyPath};

use cli::{Commands, CosignCli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = CosignCli::parse();
    logging::init_logging(logging::DEFAULT_DIRECTIVE, cli.log_format);

    let config = load_config(cli.config.as_deref())?;

    let db_path = cli.data_dir.join("db");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;
    let store = Arc::new(
        SledStore::open(&db_path)
            .with_context(|| format!("failed to open database at {}", db_path.display()))?,
    );
    info!(path = %db_path.display(), "proposal database opened");

    let mut proposals = ProposalStore::new(
        store.clone() as Arc<dyn Store>,
        Arc::new(CanonicalSerializer),
        EventBus::new(config.event_channel_capacity),
    );
    if let Some(path) = &cli.authorization_keys {
        let keys = read_authorization_keys(path)?;
        info!(count = keys.len(), "authorization keys loaded");
        proposals = proposals.with_authorization_keys(keys);
    }

    let result = run(cli.command, &proposals).await;
    store.flush().context("failed to flush proposal database")?;
    result
}

async fn run(command: Commands, proposals: &ProposalStore) -> Result<()> {
    match command {
        Commands::Create(args) => {
            let bytes = read_file(&args.transaction)?;
            let transaction = decode_signature_file(&bytes)
                .with_context(|| format!("cannot use {}", args.transaction.display()))?;
            let proposal = proposals.create(transaction, args.threshold)?;
            println!("Proposal {} created.", proposal.id);
            print_progress(&proposal);
        }
        Commands::Sign(args) => {
            let key = read_signing_key(&args.key_file)?;
            let path = KeyPath::new(args.identity_index, args.credential_index, args.key_index);
            let signer = Ed25519Signer::new().with_key(path, key);

            let proposal = proposals.get(args.id)?;
            let signed = sign_transaction(
                &signer,
                &CanonicalSerializer,
                &proposal.transaction,
                &path,
                args.authorization_key_index,
            )
            .await
            .context("signing failed")?;
            let proposal = proposals.add_signature(args.id, &signed)?;

            if let Some(out) = &args.out {
                let bytes = signed.to_file_bytes()?;
                std::fs::write(out, bytes)
                    .with_context(|| format!("failed to write {}", out.display()))?;
                println!("Signature written to {}.", out.display());
            }
            print_progress(&proposal);
        }
        Commands::Import(args) => {
            let bytes = read_file(&args.file)?;
            let proposal = proposals
                .import_signature_file(args.id, &bytes)
                .with_context(|| format!("cannot import {}", args.file.display()))?;
            print_progress(&proposal);
        }
        Commands::Show(args) => {
            let proposal = proposals.get(args.id)?;
            println!("{}", serde_json::to_string_pretty(&proposal)?);
        }
        Commands::List(args) => {
            let summaries: Vec<ProposalSummary> =
                proposals.list()?.iter().map(ProposalSummary::from).collect();
            if args.json {
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else {
                println!("{:>6}  {:<10}  {:>10}  {}", "ID", "STATUS", "SIGNATURES", "CREATED");
                for s in &summaries {
                    println!(
                        "{:>6}  {:<10}  {:>10}  {}",
                        s.id,
                        s.status,
                        format!("{}/{}", s.signatures, s.threshold),
                        s.created_at
                    );
                }
            }
        }
        Commands::Export(args) => {
            let bytes = proposals.export(args.id)?;
            std::fs::write(&args.out, bytes)
                .with_context(|| format!("failed to write {}", args.out.display()))?;
            println!("Proposal {} exported to {}.", args.id, args.out.display());
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct ProposalSummary {
    id: u64,
    status: String,
    signatures: usize,
    threshold: u32,
    transaction_hash: Option<String>,
    created_at: String,
}

impl From<&Proposal> for ProposalSummary {
    fn from(p: &Proposal) -> Self {
        Self {
            id: p.id,
            status: p.status.to_string(),
            signatures: p.signature_count(),
            threshold: p.threshold,
            transaction_hash: p.transaction_hash.as_ref().map(|h| h.to_string()),
            created_at: p.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

fn print_progress(proposal: &Proposal) {
    println!(
        "Proposal {}: {} with {}/{} signatures{}",
        proposal.id,
        proposal.status,
        proposal.signature_count(),
        proposal.threshold,
        if proposal.has_quorum() {
            ", ready to submit"
        } else {
            ""
        }
    );
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let bytes = read_file(path)?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("invalid configuration in {}", path.display()))
}

fn decode_key_bytes(hex_key: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(hex_key.trim()).context("key is not valid hex")?;
    match <[u8; 32]>::try_from(bytes.as_slice()) {
        Ok(array) => Ok(array),
        Err(_) => bail!("expected a 32-byte key, got {} bytes", bytes.len()),
    }
}

fn read_signing_key(path: &Path) -> Result<SigningKey> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read key file {}", path.display()))?;
    let bytes = decode_key_bytes(&contents)
        .with_context(|| format!("invalid key file {}", path.display()))?;
    Ok(SigningKey::from_bytes(&bytes))
}

fn read_authorization_keys(path: &Path) -> Result<Vec<VerifyingKey>> {
    let bytes = read_file(path)?;
    let encoded: Vec<String> = serde_json::from_slice(&bytes)
        .with_context(|| format!("{} is not a JSON array of keys", path.display()))?;
    encoded
        .iter()
        .enumerate()
        .map(|(i, key)| {
            let bytes = decode_key_bytes(key).with_context(|| format!("authorization key {i}"))?;
            VerifyingKey::from_bytes(&bytes).with_context(|| format!("authorization key {i}"))
        })
        .collect()
}
