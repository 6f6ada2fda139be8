//! End-to-end synchronization between two runtimes over the loopback relay
//! and transport.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use vaultsync::{spawn_replica, Transports};
use vs_app::{ConnectError, SendError, SyncHandle};
use vs_core::{
    Credential, Device, Diff, LocalReplica, ReconcileOutcome, RelayConfig, SyncConfig, SyncEvent,
    TransportStatus,
};
use vs_infra::{InMemoryVault, Sha256HashDiff};
use vs_platform::{LoopbackNetwork, LoopbackRelayServer};

const A: &str = "replica-a";
const B: &str = "replica-b";
const RELAY: &str = "loopback";
const WAIT: Duration = Duration::from_secs(5);

struct Replica {
    handle: SyncHandle,
    task: JoinHandle<()>,
    vault: Arc<InMemoryVault>,
    events: UnboundedReceiver<SyncEvent>,
}

impl Replica {
    /// Wait for the first event matching `predicate`, consuming the ones before it.
    async fn wait_for<F>(&mut self, predicate: F) -> SyncEvent
    where
        F: Fn(&SyncEvent) -> bool,
    {
        let events = &mut self.events;
        tokio::time::timeout(WAIT, async {
            loop {
                let event = events.recv().await.expect("event stream closed");
                if predicate(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    async fn wait_synchronized(&mut self) {
        self.wait_for(|event| {
            matches!(
                event,
                SyncEvent::Reconciliation {
                    outcome: ReconcileOutcome::Synchronized { .. },
                    ..
                }
            )
        })
        .await;
    }

    fn drain(&mut self) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    async fn stop(self) {
        self.handle.shutdown().await.unwrap();
        self.task.await.unwrap();
    }
}

fn config() -> SyncConfig {
    SyncConfig {
        default_relay: RelayConfig {
            id: RELAY.into(),
            use_tls: false,
            ..RelayConfig::default()
        },
        default_ice_servers: Vec::new(),
        ..SyncConfig::default()
    }
}

fn credential(id: &str) -> Credential {
    Credential::new(id, format!("sealed {id}").into_bytes())
}

fn upserts(credentials: &[Credential]) -> Vec<Diff> {
    let engine = Sha256HashDiff::new();
    credentials
        .iter()
        .map(|credential| engine.upsert(credential.clone()).unwrap())
        .collect()
}

async fn replica(
    local: &str,
    created_at: i64,
    remote: Device,
    seed: &[Credential],
    transports: Transports,
) -> Replica {
    let vault = Arc::new(
        InMemoryVault::new(LocalReplica::new(local, created_at)).with_devices(vec![remote]),
    );
    if !seed.is_empty() {
        vault.edit(&Sha256HashDiff::new(), &upserts(seed)).await.unwrap();
    }
    let (task, handle) = spawn_replica(config(), vault.clone(), transports);
    let (_subscription, events) = handle.events().subscribe_channel();
    Replica {
        handle,
        task,
        vault,
        events,
    }
}

/// Two replicas linked to each other. A subscribes first and so initiates.
async fn linked_pair(
    network: LoopbackNetwork,
    seed_a: &[Credential],
    seed_b: &[Credential],
) -> (Replica, Replica, LoopbackRelayServer) {
    let server = LoopbackRelayServer::new();
    let transports = Transports::loopback(&server, &network);

    let a = replica(A, 1_000, Device::new(B, "b", 2_000, 2_000), seed_a, transports.clone()).await;
    let b = replica(B, 2_000, Device::new(A, "a", 1_000, 2_000), seed_b, transports).await;

    a.handle.connect_device(B).await.unwrap();
    b.handle.connect_device(A).await.unwrap();
    (a, b, server)
}

#[tokio::test]
async fn empty_replica_catches_up() {
    let seed = [credential("mail"), credential("bank"), credential("wifi")];
    let (mut a, mut b, _server) = linked_pair(LoopbackNetwork::new(), &seed, &[]).await;

    let update = b
        .wait_for(|event| matches!(event, SyncEvent::VaultUpdated { .. }))
        .await;
    match update {
        SyncEvent::VaultUpdated { source, credentials } => {
            assert_eq!(source.as_ref().map(|id| id.as_str()), Some(A));
            assert_eq!(credentials.len(), 3);
        }
        other => panic!("unexpected event {other:?}"),
    }
    b.wait_synchronized().await;
    a.wait_synchronized().await;

    let mut credentials_a = a.vault.credentials().await;
    let mut credentials_b = b.vault.credentials().await;
    credentials_a.sort_by(|x, y| x.id.cmp(&y.id));
    credentials_b.sort_by(|x, y| x.id.cmp(&y.id));
    assert_eq!(credentials_a, credentials_b);

    let state = b.handle.sync_state(A).await.unwrap().unwrap();
    assert!(state.synchronized);
    assert!(state.last_synced_hash.is_some());
    assert_eq!(a.handle.peer_status(B).await.unwrap(), Some(TransportStatus::Connected));

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn identical_replicas_converge_without_commits() {
    let seed = [credential("mail"), credential("bank")];
    let (mut a, mut b, _server) = linked_pair(LoopbackNetwork::new(), &seed, &seed).await;

    b.wait_synchronized().await;
    a.wait_synchronized().await;

    let events: Vec<SyncEvent> = a.drain().into_iter().chain(b.drain()).collect();
    assert!(!events
        .iter()
        .any(|event| matches!(event, SyncEvent::VaultUpdated { .. })));
    assert_eq!(b.vault.credentials().await.len(), 2);

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn diverged_replicas_resolve_through_manual_merge() {
    let only_a = [credential("mail")];
    let only_b = [credential("bank")];
    let (mut a, mut b, _server) = linked_pair(LoopbackNetwork::new(), &only_a, &only_b).await;

    let merge = a
        .wait_for(|event| {
            matches!(
                event,
                SyncEvent::Reconciliation {
                    outcome: ReconcileOutcome::ManualMergeNeeded { .. },
                    ..
                }
            )
        })
        .await;
    let remote_state = match merge {
        SyncEvent::Reconciliation {
            outcome: ReconcileOutcome::ManualMergeNeeded { diffs },
            ..
        } => diffs,
        other => panic!("unexpected event {other:?}"),
    };
    // Nothing is applied until someone resolves the merge.
    assert_eq!(a.vault.credentials().await.len(), 1);

    // Resolve as a union: take B's entries locally, send ours to B.
    let merged = a.handle.apply_manual_synchronization(remote_state).await.unwrap();
    a.handle.submit_manual_solve(B, upserts(&only_a)).await.unwrap();

    b.wait_for(|event| matches!(event, SyncEvent::VaultUpdated { source: Some(_), .. }))
        .await;
    a.wait_synchronized().await;

    assert_eq!(a.vault.credentials().await.len(), 2);
    assert_eq!(b.vault.credentials().await.len(), 2);
    let state = a.handle.sync_state(B).await.unwrap().unwrap();
    assert_eq!(state.last_synced_hash, Some(merged));

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn transport_without_candidates_fails() {
    let (mut a, b, _server) =
        linked_pair(LoopbackNetwork::with_candidates(0), &[credential("mail")], &[]).await;

    a.wait_for(|event| {
        matches!(
            event,
            SyncEvent::TransportStatusChanged {
                status: TransportStatus::Failed,
                ..
            }
        )
    })
    .await;
    assert_eq!(a.handle.peer_status(B).await.unwrap(), Some(TransportStatus::Failed));

    let err = a.handle.request_sync(B).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SendError>(),
        Some(SendError::NoOpenChannel(_))
    ));
    assert!(b.vault.credentials().await.is_empty());

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn connect_is_refused_while_a_session_is_active() {
    let seed = [credential("mail")];
    let (mut a, mut b, _server) = linked_pair(LoopbackNetwork::new(), &seed, &[]).await;
    b.wait_synchronized().await;
    a.wait_synchronized().await;

    let err = a.handle.connect_device(B).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConnectError>(),
        Some(ConnectError::AlreadyActive { .. })
    ));
    assert_eq!(a.handle.peer_status(B).await.unwrap(), Some(TransportStatus::Connected));

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn disconnecting_the_last_device_releases_the_relay() {
    let (mut a, mut b, server) =
        linked_pair(LoopbackNetwork::new(), &[credential("mail")], &[]).await;
    b.wait_synchronized().await;
    a.wait_synchronized().await;
    assert!(a.handle.relay_status(RELAY).await.unwrap().is_some());

    assert!(a.handle.disconnect_device(B).await.unwrap());
    assert!(!a.handle.disconnect_device(B).await.unwrap());

    assert_eq!(a.handle.peer_status(B).await.unwrap(), None);
    assert_eq!(a.handle.relay_status(RELAY).await.unwrap(), None);
    assert_eq!(server.session_count(), 1);

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn unknown_device_is_refused() {
    let server = LoopbackRelayServer::new();
    let transports = Transports::loopback(&server, &LoopbackNetwork::new());
    let a = replica(A, 1_000, Device::new(B, "b", 2_000, 2_000), &[], transports).await;

    let err = a.handle.connect_device("replica-z").await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConnectError>(),
        Some(ConnectError::UnknownDevice(_))
    ));
    assert_eq!(server.session_count(), 0);

    a.stop().await;
}
