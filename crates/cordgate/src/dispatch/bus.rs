//! Publish/subscribe by canonical event name.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use super::CanonicalEvent;
use super::names::prefixes;

/// Subscribers keyed by canonical name or name prefix.
///
/// Publishing never blocks: a subscriber whose queue is full misses that
/// event, and a subscriber that went away is removed. Neither affects the
/// others.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    subscribers: Arc<DashMap<String, Vec<mpsc::Sender<Arc<CanonicalEvent>>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every event named `name` or nested under it.
    pub fn subscribe(
        &self,
        name: impl Into<String>,
        capacity: usize,
    ) -> mpsc::Receiver<Arc<CanonicalEvent>> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.subscribers.entry(name.into()).or_default().push(tx);
        rx
    }

    pub fn subscriber_count(&self, name: &str) -> usize {
        self.subscribers.get(name).map_or(0, |subs| subs.len())
    }

    /// Deliver `event` to subscribers of each prefix of its name, least
    /// specific first. Returns the number of deliveries.
    pub fn publish(&self, event: Arc<CanonicalEvent>) -> usize {
        let mut delivered = 0;
        for prefix in prefixes(&event.name) {
            let Some(mut subs) = self.subscribers.get_mut(prefix) else {
                continue;
            };
            subs.retain(|tx| match tx.try_send(Arc::clone(&event)) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    warn!(
                        subscription = %prefix,
                        event = %event.name,
                        "Subscriber queue full, dropping event"
                    );
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(subscription = %prefix, "Removing closed subscriber");
                    false
                }
            });
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn event(name: &str) -> Arc<CanonicalEvent> {
        Arc::new(CanonicalEvent::new(String::new(), name, Map::new()))
    }

    #[tokio::test]
    async fn test_fan_out_by_prefix() {
        let bus = EventBus::new();
        let mut all = bus.subscribe("message", 8);
        let mut guild = bus.subscribe("message.guild", 8);
        let mut create = bus.subscribe("message.guild.create", 8);
        let mut other = bus.subscribe("message.direct", 8);

        assert_eq!(bus.publish(event("message.guild.create")), 3);

        for rx in [&mut all, &mut guild, &mut create] {
            let got = rx.recv().await.unwrap();
            assert_eq!(got.name, "message.guild.create");
            assert!(rx.try_recv().is_err());
        }
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_subscriber_does_not_block_others() {
        let bus = EventBus::new();
        let _slow = bus.subscribe("guild", 1);
        let mut fast = bus.subscribe("guild", 8);

        bus.publish(event("guild.create"));
        bus.publish(event("guild.update"));

        assert_eq!(fast.recv().await.unwrap().name, "guild.create");
        assert_eq!(fast.recv().await.unwrap().name, "guild.update");
        assert_eq!(bus.subscriber_count("guild"), 2);
    }

    #[test]
    fn test_closed_subscriber_is_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe("guild", 1);
        drop(rx);
        assert_eq!(bus.publish(event("guild.create")), 0);
        assert_eq!(bus.subscriber_count("guild"), 0);
    }
}
