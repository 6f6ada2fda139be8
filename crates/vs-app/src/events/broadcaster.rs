//! Typed publish/subscribe registry for [`SyncEvent`]s.
//!
//! Subscribers register a callback scoped to everything, one relay, or one
//! device, and keep the returned [`SubscriptionId`] to remove it again.
//! Nothing is cleaned up implicitly.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use vs_core::{DeviceId, RelayId, SubscriptionId, SyncEvent};

pub type EventCallback = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Scope {
    All,
    Relay(RelayId),
    Device(DeviceId),
}

impl Scope {
    fn matches(&self, event: &SyncEvent) -> bool {
        match self {
            Scope::All => true,
            Scope::Relay(id) => event.relay_id() == Some(id),
            Scope::Device(id) => event.device_id() == Some(id),
        }
    }
}

struct Subscriber {
    scope: Scope,
    callback: EventCallback,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    // Ordered by id so delivery follows subscription order.
    subscribers: BTreeMap<u64, Subscriber>,
}

#[derive(Clone, Default)]
pub struct EventBroadcaster {
    registry: Arc<Mutex<Registry>>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn add(&self, scope: Scope, callback: EventCallback) -> SubscriptionId {
        let mut registry = self.registry();
        registry.next_id += 1;
        let id = registry.next_id;
        registry.subscribers.insert(id, Subscriber { scope, callback });
        SubscriptionId::from_raw(id)
    }

    /// Receive every event.
    pub fn subscribe_all<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.add(Scope::All, Arc::new(callback))
    }

    /// Receive negotiation status events of one relay.
    pub fn subscribe_relay<F>(&self, relay_id: RelayId, callback: F) -> SubscriptionId
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.add(Scope::Relay(relay_id), Arc::new(callback))
    }

    /// Receive transport and reconciliation events of one device.
    pub fn subscribe_device<F>(&self, device_id: DeviceId, callback: F) -> SubscriptionId
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.add(Scope::Device(device_id), Arc::new(callback))
    }

    /// Forward every event into a channel.
    pub fn subscribe_channel(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<SyncEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe_all(move |event| {
            let _ = tx.send(event.clone());
        });
        (id, rx)
    }

    /// Returns whether the subscription existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.registry().subscribers.remove(&id.raw()).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry().subscribers.len()
    }

    pub fn publish(&self, event: SyncEvent) {
        // Callbacks run outside the lock so they may (un)subscribe.
        let targets: Vec<EventCallback> = self
            .registry()
            .subscribers
            .values()
            .filter(|subscriber| subscriber.scope.matches(&event))
            .map(|subscriber| subscriber.callback.clone())
            .collect();

        tracing::trace!(?event, subscribers = targets.len(), "broadcasting event");

        for callback in targets {
            callback(&event);
        }
    }
}
