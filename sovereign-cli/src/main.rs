//! sovereign
//!
//! Operator CLI for an offline wallet node. Every invocation opens the
//! node's ledger under `data_dir`, performs one command and flushes.
//!
//! Ledger commands reserve and settle funds; `vote`, `vault` and `identity`
//! drive the secure-computation pipeline; `demo-transfer` runs a peer
//! transfer against an in-process loopback peer.

mod config;
mod node;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use sovereign_ledger::{
    AssumeConfirmed, Direction, FundLockManager, Reconciler, TransactionId, TransactionStatus,
};
use sovereign_mpc::{ComputationOutcome, IdentityProofFlow, VaultAccessFlow, VoteFlow};
use sovereign_p2p::{CoordinatorConfig, CoordinatorEvent, LoopbackTransport, PeerTransferCoordinator};
use tracing::info;

use crate::config::NodeConfig;
use crate::node::Node;

#[derive(Parser)]
#[command(name = "sovereign", about = "Offline wallet node", version)]
struct Cli {
    /// Configuration file (defaults to ./sovereign.toml when present).
    #[arg(long, global = true, env = "SOVEREIGN_CONFIG")]
    config: Option<PathBuf>,
    /// Override the configured data directory.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// Emit logs as JSON.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set the opening balance of an empty ledger.
    Init {
        #[arg(long)]
        balance: u64,
    },
    /// Show balance totals.
    Balance,
    /// Credit funds received outside a peer transfer.
    Receive {
        #[arg(long)]
        amount: u64,
        #[arg(long = "from")]
        source: String,
    },
    /// Reserve funds for an outgoing transfer.
    Lock(LockArgs),
    /// Hand a reserved transaction to reconciliation.
    Handoff {
        #[arg(long)]
        id: String,
        #[arg(long)]
        to: String,
        /// Proof bytes as hex.
        #[arg(long)]
        proof: Option<String>,
    },
    /// Settle a reserved transaction.
    Settle {
        #[arg(long)]
        id: String,
        #[arg(long, value_enum)]
        status: Settlement,
    },
    /// List every transaction.
    History,
    /// Show or clear the activity log.
    Activity {
        #[arg(long)]
        clear: bool,
    },
    /// Cast a private vote.
    Vote {
        #[arg(long)]
        proposal: String,
        #[arg(long)]
        choice: String,
    },
    /// Request access to health records.
    Vault {
        #[arg(long)]
        scope: String,
    },
    /// Prove an identity attribute.
    Identity {
        #[arg(long)]
        attribute: String,
        /// Encrypted identity seed as hex.
        #[arg(long, default_value = "")]
        seed: String,
    },
    /// Settle pending transactions against the network.
    Reconcile {
        /// Keep running, reconciling every N seconds until Ctrl-C.
        #[arg(long)]
        watch: Option<u64>,
    },
    /// Send funds to an in-process loopback peer.
    DemoTransfer {
        #[arg(long)]
        amount: u64,
        /// Proof bytes as hex.
        #[arg(long)]
        proof: Option<String>,
    },
}

#[derive(Args)]
struct LockArgs {
    #[arg(long)]
    amount: u64,
    /// Caller-chosen id; repeating a lock with the same id is idempotent.
    #[arg(long)]
    id: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Settlement {
    Confirmed,
    Failed,
}

impl From<Settlement> for TransactionStatus {
    fn from(value: Settlement) -> Self {
        match value {
            Settlement::Confirmed => TransactionStatus::Confirmed,
            Settlement::Failed => TransactionStatus::Failed,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.json);

    let mut config = NodeConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    let node = Node::open(config)?;
    let result = run(&node, cli.command).await;
    node.flush()?;
    result
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "sovereign=info".into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(node: &Node, command: Commands) -> Result<()> {
    let ledger = &node.ledger;
    match command {
        Commands::Init { balance } => {
            ledger.seed_balance(balance)?;
            println!("Opening balance set to {balance}");
        }
        Commands::Balance => {
            let snapshot = ledger.snapshot()?;
            println!("available: {}", snapshot.available);
            println!("reserved:  {}", snapshot.reserved);
            println!("spent:     {}", snapshot.spent);
            println!("received:  {}", snapshot.received);
            println!("issued:    {}", snapshot.issued_total);
            snapshot.verify()?;
        }
        Commands::Receive { amount, source } => {
            let id = ledger.receive_funds(amount, &source)?;
            println!("Received {amount} from {source} as {id}");
        }
        Commands::Lock(args) => {
            let id = match args.id {
                Some(id) => ledger.lock_funds_with_id(TransactionId::from(id), args.amount)?,
                None => ledger.lock_funds(args.amount)?,
            };
            println!("Locked {} as {id}", args.amount);
        }
        Commands::Handoff { id, to, proof } => {
            let proof = proof.as_deref().map(decode_hex).transpose()?;
            let tx = ledger.mark_pending_sync(&TransactionId::from(id), Some(to), proof)?;
            println!("{} is {}", tx.id, tx.status);
        }
        Commands::Settle { id, status } => {
            let tx = ledger.settle(&TransactionId::from(id), status.into())?;
            println!("{} settled as {}", tx.id, tx.status);
        }
        Commands::History => {
            for tx in ledger.history()? {
                let direction = match tx.direction {
                    Direction::Outgoing => "out",
                    Direction::Incoming => "in",
                };
                println!(
                    "{:>4}  {}  {:<3}  {:<12}  {:>10}  {}",
                    tx.sequence,
                    tx.created_at.format("%Y-%m-%d %H:%M:%S"),
                    direction,
                    tx.status.as_str(),
                    tx.amount,
                    tx.counterparty.as_deref().unwrap_or("-"),
                );
            }
        }
        Commands::Activity { clear } => {
            if clear {
                node.activity.clear()?;
                println!("Activity log cleared");
            } else {
                for entry in node.activity.entries()? {
                    println!(
                        "{:>4}  {}  {:<17}  {}",
                        entry.id,
                        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        entry.kind.as_str(),
                        entry.reference
                    );
                }
            }
        }
        Commands::Vote { proposal, choice } => {
            let flow = VoteFlow::new(node.pipeline()?, Arc::new(node.authenticator()?))
                .with_activity_log(node.activity.clone());
            let outcome = flow.cast_vote(&proposal, &choice).await?;
            print_outcome(&outcome);
        }
        Commands::Vault { scope } => {
            let flow = VaultAccessFlow::new(node.pipeline()?, Arc::new(node.authenticator()?))
                .with_activity_log(node.activity.clone());
            let access = flow.unlock(&scope).await?;
            print_outcome(&access.outcome);
            println!(
                "Vault {}: {}",
                access.scope,
                if access.granted { "unlocked" } else { "locked" }
            );
        }
        Commands::Identity { attribute, seed } => {
            let flow = IdentityProofFlow::new(node.pipeline()?)
                .with_activity_log(node.activity.clone());
            let outcome = flow.prove_attribute(&attribute, decode_hex(&seed)?).await?;
            print_outcome(&outcome);
        }
        Commands::Reconcile { watch } => {
            let reconciler = Reconciler::new(ledger.clone(), Arc::new(AssumeConfirmed));
            match watch {
                None => {
                    let report = reconciler.run_once().await;
                    println!(
                        "examined {}, confirmed {}, failed {}, pending {}, errors {}",
                        report.examined,
                        report.confirmed,
                        report.failed,
                        report.pending,
                        report.errors
                    );
                }
                Some(0) => bail!("--watch interval must be at least one second"),
                Some(secs) => {
                    let handle = reconciler.spawn(Duration::from_secs(secs));
                    tokio::signal::ctrl_c().await?;
                    info!("Shutting down reconciler...");
                    handle.stop().await;
                }
            }
        }
        Commands::DemoTransfer { amount, proof } => {
            let proof = proof.as_deref().map(decode_hex).transpose()?;
            demo_transfer(node, amount, proof).await?;
        }
    }
    Ok(())
}

async fn demo_transfer(node: &Node, amount: u64, proof: Option<Vec<u8>>) -> Result<()> {
    let ((local, local_events), (remote, remote_events)) =
        LoopbackTransport::pair("this-device", "demo-peer");

    let peer_ledger = FundLockManager::in_memory();
    let peer = PeerTransferCoordinator::spawn(
        peer_ledger.clone(),
        Arc::new(remote),
        remote_events,
        CoordinatorConfig::default(),
    );
    let coordinator = PeerTransferCoordinator::spawn(
        node.ledger.clone(),
        Arc::new(local),
        local_events,
        node.config.coordinator_config(),
    );
    let mut events = coordinator.subscribe();

    peer.start_receiving().await?;
    let result = coordinator.send_funds(amount, proof).await;
    coordinator.stop().await?;
    peer.stop().await?;

    while let Ok(event) = events.try_recv() {
        if let CoordinatorEvent::StatusChanged { status } = event {
            println!("  {}", status.message());
        }
    }

    let outcome = result?;
    println!("Sent {amount} to {} as {} ({})", outcome.peer, outcome.tx_id, outcome.status);
    println!("Peer balance: {}", peer_ledger.available()?);
    Ok(())
}

fn print_outcome(outcome: &ComputationOutcome) {
    println!("request:  {}", outcome.request_id);
    println!("result:   {}", outcome.state.message());
    if outcome.used_fallback {
        println!("network:  simulated (live network unavailable)");
    }
    if let Some(proof) = &outcome.proof {
        println!("proof:    {}", sovereign_common::proof_digest(proof));
    }
    if let Some(reason) = &outcome.reason {
        println!("reason:   {reason}");
    }
}

fn decode_hex(value: &str) -> Result<Vec<u8>> {
    hex::decode(value).with_context(|| format!("Invalid hex: {value}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "sovereign",
            "lock",
            "--amount",
            "25",
            "--id",
            "tx_retry",
            "--data-dir",
            "/tmp/node",
        ])
        .unwrap();
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/node")));
        match cli.command {
            Commands::Lock(args) => {
                assert_eq!(args.amount, 25);
                assert_eq!(args.id.as_deref(), Some("tx_retry"));
            }
            _ => panic!("expected lock"),
        }
    }

    #[tokio::test]
    async fn commands_drive_the_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let node = Node::open(NodeConfig {
            data_dir: dir.path().to_path_buf(),
            pipeline: crate::config::PipelineSettings { instant: true },
            ..NodeConfig::default()
        })
        .unwrap();

        run(&node, Commands::Init { balance: 100 }).await.unwrap();
        run(
            &node,
            Commands::Lock(LockArgs {
                amount: 30,
                id: Some("tx_cli".into()),
            }),
        )
        .await
        .unwrap();
        run(
            &node,
            Commands::Settle {
                id: "tx_cli".into(),
                status: Settlement::Failed,
            },
        )
        .await
        .unwrap();
        run(&node, Commands::DemoTransfer { amount: 40, proof: None })
            .await
            .unwrap();
        run(
            &node,
            Commands::Vote {
                proposal: "proposal_ubi_001".into(),
                choice: "YES".into(),
            },
        )
        .await
        .unwrap();

        let snapshot = node.ledger.snapshot().unwrap();
        assert_eq!(snapshot.available, 60);
        assert_eq!(snapshot.spent, 40);
        snapshot.verify().unwrap();
        assert!(node.activity.entries().unwrap().len() >= 2);
    }
}
