use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use vaultsync::bootstrap::tracing::init_tracing_subscriber;
use vaultsync::simulate::{self, SimulationOptions};
use vaultsync::{load_config, AppConfig};
use vs_core::network::channel_name;
use vs_core::reconciliation::wire;
use vs_core::{Device, LocalReplica};

#[derive(Parser, Debug)]
#[command(name = "vaultsync")]
#[command(about = "Peer-to-peer vault synchronization tools", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Command {
    /// Print the negotiation channel two replicas agree on
    ChannelName {
        /// Id of the local replica
        #[arg(long)]
        local_id: String,
        /// Creation time of the local replica (ms since epoch)
        #[arg(long)]
        local_created_at: i64,
        /// Id of the linked device
        #[arg(long)]
        remote_id: String,
        /// Time the device was linked (ms since epoch)
        #[arg(long)]
        remote_linked_at: i64,
        /// Channel namespace; defaults to the configured default relay's
        #[arg(long)]
        namespace: Option<String>,
    },
    /// Decode a hex-encoded reconciliation frame
    Decode {
        /// Frame bytes as hex
        hex: String,
    },
    /// Run two in-process replicas through a catch-up exchange
    Simulate {
        /// Credentials seeded into the first replica
        #[arg(long, default_value_t = 3)]
        credentials: usize,
        /// Synthetic network candidates per transport
        #[arg(long, default_value_t = 1)]
        candidates: usize,
        /// Give up after this many seconds
        #[arg(long, default_value_t = 5)]
        timeout_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };
    init_tracing_subscriber(&config.logging).context("Failed to initialize tracing")?;

    match cli.command {
        Command::ChannelName {
            local_id,
            local_created_at,
            remote_id,
            remote_linked_at,
            namespace,
        } => {
            let namespace =
                namespace.unwrap_or_else(|| config.sync.default_relay.channel_namespace.clone());
            let local = LocalReplica::new(local_id, local_created_at);
            let remote = Device::new(remote_id, "", remote_linked_at, remote_linked_at);
            let (name, role) = channel_name(&namespace, &local, &remote);
            println!("{name} ({role:?})");
        }
        Command::Decode { hex } => {
            let bytes = hex::decode(hex.trim()).context("input is not valid hex")?;
            let message = wire::decode(&bytes, config.sync.max_message_bytes)?;
            println!("{} id={}", message.command_name(), message.id());
            println!("{message:#?}");
        }
        Command::Simulate {
            credentials,
            candidates,
            timeout_secs,
        } => {
            let report = simulate::run(SimulationOptions {
                credentials,
                candidates,
                timeout: Duration::from_secs(timeout_secs),
            })
            .await?;
            for (replica, event) in &report.events {
                println!("[{replica}] {event:?}");
            }
            println!(
                "converged={} credentials: {}={} {}={}",
                report.converged,
                simulate::REPLICA_A,
                report.credentials_a,
                simulate::REPLICA_B,
                report.credentials_b
            );
            if !report.converged {
                anyhow::bail!("replicas did not converge");
            }
        }
    }
    Ok(())
}
