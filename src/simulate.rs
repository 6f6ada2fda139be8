//! Two replicas in one process
//!
//! Replica A holds a few credentials, replica B starts empty. Both connect
//! over the loopback relay and transport, and the run ends once each side
//! reports a synchronized vault (or the timeout passes).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use vs_core::{
    Credential, Device, DeviceId, LocalReplica, ReconcileOutcome, RelayConfig, SyncConfig,
    SyncEvent,
    TransportStatus,
};
use vs_infra::{InMemoryVault, Sha256HashDiff};
use vs_platform::{LoopbackNetwork, LoopbackRelayServer};

use crate::bootstrap::wiring::{spawn_replica, Transports};

pub const REPLICA_A: &str = "replica-a";
pub const REPLICA_B: &str = "replica-b";

#[derive(Debug, Clone)]
pub struct SimulationOptions {
    /// Credentials seeded into replica A.
    pub credentials: usize,
    /// Synthetic candidates gathered per transport.
    pub candidates: usize,
    pub timeout: Duration,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            credentials: 3,
            candidates: 1,
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug)]
pub struct SimulationReport {
    /// Every broadcast event, tagged with the replica that emitted it.
    pub events: Vec<(DeviceId, SyncEvent)>,
    pub converged: bool,
    pub credentials_a: usize,
    pub credentials_b: usize,
}

fn loopback_config() -> SyncConfig {
    SyncConfig {
        default_relay: RelayConfig {
            id: "loopback".into(),
            host: "loopback".to_string(),
            use_tls: false,
            ..RelayConfig::default()
        },
        default_ice_servers: Vec::new(),
        ..SyncConfig::default()
    }
}

#[derive(Default)]
struct Progress {
    synchronized: Vec<DeviceId>,
    failed: bool,
}

impl Progress {
    fn observe(&mut self, replica: &DeviceId, event: &SyncEvent) {
        match event {
            SyncEvent::Reconciliation {
                outcome: ReconcileOutcome::Synchronized { .. },
                ..
            } if !self.synchronized.contains(replica) => self.synchronized.push(replica.clone()),
            SyncEvent::TransportStatusChanged {
                status: TransportStatus::Failed,
                ..
            } => self.failed = true,
            _ => {}
        }
    }

    fn done(&self) -> bool {
        self.failed || self.synchronized.len() == 2
    }
}

pub async fn run(options: SimulationOptions) -> Result<SimulationReport> {
    let server = LoopbackRelayServer::new();
    let network = LoopbackNetwork::with_candidates(options.candidates);
    let transports = Transports::loopback(&server, &network);

    let vault_a = Arc::new(
        InMemoryVault::new(LocalReplica::new(REPLICA_A, 1_000))
            .with_devices(vec![Device::new(REPLICA_B, "replica b", 2_000, 2_000)]),
    );
    let vault_b = Arc::new(
        InMemoryVault::new(LocalReplica::new(REPLICA_B, 2_000))
            .with_devices(vec![Device::new(REPLICA_A, "replica a", 1_000, 2_000)]),
    );

    let engine = Sha256HashDiff::new();
    let seed = (0..options.credentials)
        .map(|index| {
            engine.upsert(Credential::new(
                format!("credential-{index}"),
                format!("sealed-{index}").into_bytes(),
            ))
        })
        .collect::<Result<Vec<_>, _>>()
        .context("failed to build seed diffs")?;
    vault_a.edit(&engine, &seed).await?;

    let (task_a, handle_a) = spawn_replica(loopback_config(), vault_a.clone(), transports.clone());
    let (task_b, handle_b) = spawn_replica(loopback_config(), vault_b.clone(), transports);

    let (tx, mut rx) = mpsc::unbounded_channel();
    for (replica, handle) in [(REPLICA_A, &handle_a), (REPLICA_B, &handle_b)] {
        let tx = tx.clone();
        let replica = DeviceId::from(replica);
        handle.events().subscribe_all(move |event| {
            let _ = tx.send((replica.clone(), event.clone()));
        });
    }
    drop(tx);

    handle_a.connect_device(REPLICA_B).await?;
    handle_b.connect_device(REPLICA_A).await?;

    let mut events = Vec::new();
    let mut progress = Progress::default();
    let wait = async {
        while let Some((replica, event)) = rx.recv().await {
            progress.observe(&replica, &event);
            events.push((replica, event));
            if progress.done() {
                break;
            }
        }
    };
    if tokio::time::timeout(options.timeout, wait).await.is_err() {
        tracing::warn!(timeout = ?options.timeout, "simulation timed out");
    }

    handle_a.shutdown().await?;
    handle_b.shutdown().await?;
    task_a.await.context("replica a task failed")?;
    task_b.await.context("replica b task failed")?;

    Ok(SimulationReport {
        converged: !progress.failed && progress.synchronized.len() == 2,
        events,
        credentials_a: vault_a.credentials().await.len(),
        credentials_b: vault_b.credentials().await.len(),
    })
}
