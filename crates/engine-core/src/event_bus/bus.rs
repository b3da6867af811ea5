use model::events::Event;
use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};

type SenderMap = HashMap<u64, Box<dyn Any + Send + Sync>>;

/// Handle returned by [`EventBus::subscribe`]; pass back to unsubscribe.
#[derive(Debug, Clone)]
pub struct Subscription {
    event_type_id: TypeId,
    subscriber_id: u64,
}

/// Typed fan-out of migration lifecycle events. Delivery never blocks the
/// publisher: a full subscriber channel drops the event for that subscriber.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<HashMap<TypeId, SenderMap>>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe<E>(&self, sender: mpsc::Sender<Arc<E>>) -> Subscription
    where
        E: Event + Clone,
    {
        let event_type_id = TypeId::of::<E>();
        let subscriber_id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.subscribers
            .write()
            .await
            .entry(event_type_id)
            .or_default()
            .insert(subscriber_id, Box::new(sender));

        debug!(
            event_type = std::any::type_name::<E>(),
            subscriber_id, "Subscribed to event"
        );

        Subscription {
            event_type_id,
            subscriber_id,
        }
    }

    /// Subscribes with a fresh bounded channel.
    pub async fn channel<E>(&self, capacity: usize) -> (Subscription, mpsc::Receiver<Arc<E>>)
    where
        E: Event + Clone,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (self.subscribe(tx).await, rx)
    }

    /// Returns how many subscribers accepted the event.
    pub async fn publish<E>(&self, event: E) -> usize
    where
        E: Event + Clone,
    {
        let subscribers = self.subscribers.read().await;
        let Some(type_subscribers) = subscribers.get(&TypeId::of::<E>()) else {
            return 0;
        };

        let event = Arc::new(event);
        let mut delivered = 0;
        for (subscriber_id, boxed) in type_subscribers {
            let Some(sender) = boxed.downcast_ref::<mpsc::Sender<Arc<E>>>() else {
                warn!(subscriber_id, "Subscriber registered with a mismatched channel type");
                continue;
            };
            match sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    event_type = event.event_type(),
                    subscriber_id,
                    error = %e,
                    "Dropped event for subscriber"
                ),
            }
        }
        delivered
    }

    pub async fn unsubscribe(&self, subscription: Subscription) {
        let mut subscribers = self.subscribers.write().await;
        if let Some(type_subscribers) = subscribers.get_mut(&subscription.event_type_id) {
            type_subscribers.remove(&subscription.subscriber_id);
            if type_subscribers.is_empty() {
                subscribers.remove(&subscription.event_type_id);
            }
        }
    }

    pub async fn subscriber_count<E: Event>(&self) -> usize {
        self.subscribers
            .read()
            .await
            .get(&TypeId::of::<E>())
            .map_or(0, HashMap::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{core::identifiers::AdapterId, events::MigrationAborted};

    fn aborted() -> MigrationAborted {
        MigrationAborted {
            adapter_id: AdapterId::new("dir"),
            timestamp: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn delivers_to_every_subscriber_of_the_type() {
        let bus = EventBus::new();
        let (_a, mut rx_a) = bus.channel::<MigrationAborted>(4).await;
        let (_b, mut rx_b) = bus.channel::<MigrationAborted>(4).await;

        assert_eq!(bus.publish(aborted()).await, 2);
        assert_eq!(rx_a.recv().await.unwrap().adapter_id.as_str(), "dir");
        assert!(rx_b.recv().await.is_some());
    }

    #[tokio::test]
    async fn full_channels_drop_instead_of_blocking() {
        let bus = EventBus::new();
        let (_sub, _rx) = bus.channel::<MigrationAborted>(1).await;

        assert_eq!(bus.publish(aborted()).await, 1);
        assert_eq!(bus.publish(aborted()).await, 0);
    }

    #[tokio::test]
    async fn unsubscribe_removes_the_sender() {
        let bus = EventBus::new();
        let (sub, _rx) = bus.channel::<MigrationAborted>(1).await;
        bus.unsubscribe(sub).await;

        assert_eq!(bus.subscriber_count::<MigrationAborted>().await, 0);
        assert_eq!(bus.publish(aborted()).await, 0);
    }
}
