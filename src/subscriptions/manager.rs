//! Event bus for broadcasting collection events.

use crossbeam_channel::{bounded, Sender};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::types::{DropReason, EventConfig, EventHandle, EventSubscriptionId, SyncEvent};

/// Internal subscription state.
struct Subscription {
    config: EventConfig,
    sender: Sender<SyncEvent>,
}

impl Subscription {
    /// Try to send an event. Returns false if buffer is full (subscriber will be dropped).
    fn try_send(&self, event: SyncEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(crossbeam_channel::TrySendError::Full(_)) => false,
            Err(crossbeam_channel::TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Fans side-channel events out to bounded per-subscriber channels.
pub struct EventBus {
    /// Active subscriptions by ID.
    subscriptions: RwLock<HashMap<EventSubscriptionId, Subscription>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self, config: EventConfig) -> EventHandle {
        let id = EventSubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(config.buffer_size.max(1));

        self.subscriptions
            .write()
            .insert(id, Subscription { config, sender });

        EventHandle { id, receiver }
    }

    /// Unsubscribe and clean up.
    pub fn unsubscribe(&self, id: EventSubscriptionId) {
        if let Some(sub) = self.subscriptions.write().remove(&id) {
            // Best effort
            let _ = sub.sender.try_send(SyncEvent::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }

    /// Drop every subscriber, telling each why.
    pub fn close(&self) {
        let subs: Vec<Subscription> = self.subscriptions.write().drain().map(|(_, s)| s).collect();
        for sub in subs {
            let _ = sub.sender.try_send(SyncEvent::Dropped {
                reason: DropReason::Closed,
            });
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Deliver `event` to every subscriber whose filter accepts it. Drops
    /// subscribers that fail to receive.
    pub fn publish(&self, event: SyncEvent) {
        let mut to_remove = Vec::new();

        {
            let subs = self.subscriptions.read();
            for (id, sub) in subs.iter() {
                if sub.config.filter.accepts(&event) && !sub.try_send(event.clone()) {
                    to_remove.push(*id);
                }
            }
        }

        if !to_remove.is_empty() {
            let mut subs = self.subscriptions.write();
            for id in to_remove {
                if let Some(sub) = subs.remove(&id) {
                    tracing::warn!(subscription = id.0, "dropping slow event subscriber");
                    let _ = sub.sender.try_send(SyncEvent::Dropped {
                        reason: DropReason::BufferOverflow,
                    });
                }
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::subscriptions::types::{EventFilter, EventOrigin};
    use crate::types::{CollectionStatus, RecordId};
    use std::time::Duration;

    fn failure(origin: EventOrigin) -> SyncEvent {
        SyncEvent::Failed {
            table: "kpis".into(),
            origin,
            error: SyncError::NotFound(RecordId::from("1")),
        }
    }

    #[test]
    fn test_subscribe_unsubscribe() {
        let bus = EventBus::new();

        let handle = bus.subscribe(EventConfig::default());
        assert_eq!(bus.subscription_count(), 1);

        bus.unsubscribe(handle.id);
        assert_eq!(bus.subscription_count(), 0);
        assert!(matches!(
            handle.try_recv(),
            Ok(SyncEvent::Dropped {
                reason: DropReason::Unsubscribed
            })
        ));
    }

    #[test]
    fn test_default_filter_skips_background_failures() {
        let bus = EventBus::new();
        let handle = bus.subscribe(EventConfig::default());

        bus.publish(failure(EventOrigin::Background));
        bus.publish(SyncEvent::StatusChanged {
            table: "kpis".into(),
            status: CollectionStatus::Ready,
        });
        assert!(handle.recv_timeout(Duration::from_millis(20)).is_err());

        bus.publish(failure(EventOrigin::User));
        assert!(matches!(
            handle.recv_timeout(Duration::from_millis(100)).unwrap(),
            SyncEvent::Failed {
                origin: EventOrigin::User,
                ..
            }
        ));
    }

    #[test]
    fn test_drop_slow_subscriber() {
        let bus = EventBus::new();
        let _handle = bus.subscribe(EventConfig {
            buffer_size: 2,
            filter: EventFilter::all(),
        });

        for _ in 0..10 {
            bus.publish(failure(EventOrigin::User));
        }

        assert_eq!(bus.subscription_count(), 0);
    }

    #[test]
    fn test_close_drops_everyone() {
        let bus = EventBus::new();
        let a = bus.subscribe(EventConfig::default());
        let b = bus.subscribe(EventConfig::with_filter(EventFilter::all()));

        bus.close();

        assert_eq!(bus.subscription_count(), 0);
        for handle in [a, b] {
            assert!(matches!(
                handle.drain().last(),
                Some(SyncEvent::Dropped {
                    reason: DropReason::Closed
                })
            ));
        }
    }
}
