use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Fan-out of committed engine events, per barber and shop-wide.
///
/// Slow receivers lag (see `broadcast::error::RecvError::Lagged`); senders
/// never wait.
pub struct NotifyHub {
    per_resource: DashMap<Ulid, broadcast::Sender<Event>>,
    all: broadcast::Sender<Event>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            per_resource: DashMap::new(),
            all: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Events touching one resource's calendar.
    pub fn subscribe(&self, resource_id: Ulid) -> broadcast::Receiver<Event> {
        self.per_resource
            .entry(resource_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Every event, services included.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Event> {
        self.all.subscribe()
    }

    /// No-op for channels nobody listens on.
    pub fn send(&self, event: &Event) {
        for resource_id in event.resource_id().into_iter().chain(event.moved_to()) {
            if let Some(sender) = self.per_resource.get(&resource_id) {
                let _ = sender.send(event.clone());
            }
        }
        let _ = self.all.send(event.clone());
    }
}
