//! Subscriber registry for channel events.
//!
//! Delivery takes a snapshot of the registrations and then calls each one
//! outside the registry lock, so a callback may subscribe or unsubscribe
//! (itself or others) while a message is being delivered:
//!
//! - a subscriber removed before its turn is skipped;
//! - a subscriber added during delivery only sees later messages;
//! - a callback that delivers another event does not receive it itself.

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::telemetry::channel::ChannelEvent;

/// Handle returned by a subscription, used to remove it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Callback = Arc<Mutex<dyn FnMut(&ChannelEvent) + Send>>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: Vec<(SubscriptionId, Callback)>,
}

/// Shared set of event callbacks.
///
/// Cloning yields another handle to the same set.
#[derive(Clone, Default)]
pub struct Subscribers {
    inner: Arc<Mutex<Registry>>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for every event delivered from now on
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: FnMut(&ChannelEvent) + Send + 'static,
    {
        let mut registry = self.inner.lock();
        registry.next_id += 1;
        let id = SubscriptionId(registry.next_id);
        let callback: Callback = Arc::new(Mutex::new(callback));
        registry.entries.push((id, callback));
        id
    }

    /// Register a stream subscription backed by an unbounded channel.
    ///
    /// The registration removes itself once the receiver is dropped.
    pub fn subscribe_stream(&self) -> (SubscriptionId, Receiver<ChannelEvent>) {
        let (tx, rx): (Sender<ChannelEvent>, Receiver<ChannelEvent>) =
            crossbeam_channel::unbounded();
        // Weak handle so the registry does not keep itself alive
        let registry = Arc::downgrade(&self.inner);
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let own_id = Arc::clone(&slot);

        let id = self.subscribe(move |event| {
            if tx.send(event.clone()).is_err() {
                if let (Some(id), Some(inner)) = (*own_id.lock(), registry.upgrade()) {
                    Subscribers { inner }.unsubscribe(id);
                }
            }
        });
        *slot.lock() = Some(id);
        (id, rx)
    }

    /// Remove a registration. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.inner.lock();
        let before = registry.entries.len();
        registry.entries.retain(|(sid, _)| *sid != id);
        registry.entries.len() != before
    }

    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.inner.lock().entries.iter().any(|(sid, _)| *sid == id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an event to every current subscriber exactly once.
    ///
    /// May be called from inside a callback. The nested event reaches every
    /// other subscriber, but not the callback that is still running.
    pub fn deliver(&self, event: &ChannelEvent) {
        let snapshot: Vec<(SubscriptionId, Callback)> = self.inner.lock().entries.clone();

        for (id, callback) in snapshot {
            if !self.contains(id) {
                continue;
            }
            match callback.try_lock() {
                Some(mut callback) => (&mut *callback)(event),
                None => tracing::debug!("Subscriber {:?} is busy, skipping nested event", id),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::channel::{ChannelEvent, ConnectionStatus};

    fn raw(text: &str) -> ChannelEvent {
        ChannelEvent::Raw(text.to_string())
    }

    fn recorder(subs: &Subscribers) -> (SubscriptionId, Arc<Mutex<Vec<ChannelEvent>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let id = subs.subscribe(move |e| sink.lock().push(e.clone()));
        (id, log)
    }

    #[test]
    fn test_each_subscriber_gets_each_event_in_order() {
        let subs = Subscribers::new();
        let (_, a) = recorder(&subs);
        let (_, b) = recorder(&subs);

        subs.deliver(&raw("1"));
        subs.deliver(&raw("2"));

        assert_eq!(*a.lock(), vec![raw("1"), raw("2")]);
        assert_eq!(*b.lock(), vec![raw("1"), raw("2")]);
    }

    #[test]
    fn test_late_subscriber_and_removed_subscriber() {
        let subs = Subscribers::new();
        let (early, early_log) = recorder(&subs);

        subs.deliver(&raw("1"));
        let (_, late_log) = recorder(&subs);
        assert!(subs.unsubscribe(early));
        assert!(!subs.unsubscribe(early));
        subs.deliver(&raw("2"));

        assert_eq!(*early_log.lock(), vec![raw("1")]);
        assert_eq!(*late_log.lock(), vec![raw("2")]);
    }

    #[test]
    fn test_unsubscribe_during_delivery_skips_removed() {
        let subs = Subscribers::new();
        let victim_slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));

        let handle = subs.clone();
        let slot = Arc::clone(&victim_slot);
        subs.subscribe(move |_| {
            if let Some(id) = slot.lock().take() {
                handle.unsubscribe(id);
            }
        });
        let (victim, victim_log) = recorder(&subs);
        *victim_slot.lock() = Some(victim);

        subs.deliver(&raw("1"));
        subs.deliver(&raw("2"));

        assert!(victim_log.lock().is_empty());
        assert_eq!(subs.len(), 1);
    }

    #[test]
    fn test_subscribe_during_delivery_sees_only_later_events() {
        let subs = Subscribers::new();
        let added_log = Arc::new(Mutex::new(Vec::new()));

        let handle = subs.clone();
        let log = Arc::clone(&added_log);
        let mut added = false;
        subs.subscribe(move |_| {
            if !added {
                added = true;
                let sink = Arc::clone(&log);
                handle.subscribe(move |e: &ChannelEvent| sink.lock().push(e.clone()));
            }
        });

        subs.deliver(&raw("1"));
        subs.deliver(&raw("2"));

        assert_eq!(*added_log.lock(), vec![raw("2")]);
    }

    #[test]
    fn test_self_unsubscribe() {
        let subs = Subscribers::new();
        let handle = subs.clone();
        let own: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let own_inner = Arc::clone(&own);
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);

        let id = subs.subscribe(move |_| {
            *counter.lock() += 1;
            if let Some(id) = *own_inner.lock() {
                handle.unsubscribe(id);
            }
        });
        *own.lock() = Some(id);

        subs.deliver(&raw("1"));
        subs.deliver(&raw("2"));
        assert_eq!(*calls.lock(), 1);
        assert!(subs.is_empty());
    }

    #[test]
    fn test_stream_subscription() {
        let subs = Subscribers::new();
        let (id, rx) = subs.subscribe_stream();

        subs.deliver(&ChannelEvent::Connection(ConnectionStatus::Connected));
        subs.deliver(&raw("x"));

        assert_eq!(
            rx.try_recv().unwrap(),
            ChannelEvent::Connection(ConnectionStatus::Connected)
        );
        assert_eq!(rx.try_recv().unwrap(), raw("x"));
        assert!(subs.contains(id));

        drop(rx);
        subs.deliver(&raw("y"));
        assert!(!subs.contains(id));
    }

    #[test]
    fn test_nested_delivery_skips_running_callback() {
        let subs = Subscribers::new();
        let handle = subs.clone();
        let relay_log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&relay_log);

        subs.subscribe(move |e: &ChannelEvent| {
            sink.lock().push(e.clone());
            if *e == raw("ping") {
                handle.deliver(&raw("pong"));
            }
        });
        let (_, other_log) = recorder(&subs);

        subs.deliver(&raw("ping"));

        assert_eq!(*relay_log.lock(), vec![raw("ping")]);
        assert_eq!(*other_log.lock(), vec![raw("pong"), raw("ping")]);
    }

    #[test]
    fn test_random_interleavings_reach_current_subscribers_once() {
        use rand::prelude::*;

        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let subs = Subscribers::new();
            let mut live: Vec<SubscriptionId> = Vec::new();
            let mut logs: Vec<(SubscriptionId, Arc<Mutex<Vec<ChannelEvent>>>)> = Vec::new();
            let mut expected: std::collections::HashMap<SubscriptionId, Vec<ChannelEvent>> =
                std::collections::HashMap::new();

            for step in 0..200 {
                match rng.random_range(0..10) {
                    0..=2 => {
                        let (id, log) = recorder(&subs);
                        live.push(id);
                        logs.push((id, log));
                        expected.insert(id, Vec::new());
                    }
                    3 if !live.is_empty() => {
                        let id = live.remove(rng.random_range(0..live.len()));
                        assert!(subs.unsubscribe(id));
                    }
                    _ => {
                        let event = raw(&format!("{}-{}", seed, step));
                        subs.deliver(&event);
                        for id in &live {
                            if let Some(log) = expected.get_mut(id) {
                                log.push(event.clone());
                            }
                        }
                    }
                }
            }

            assert_eq!(subs.len(), live.len(), "seed {}", seed);
            for (id, log) in &logs {
                assert_eq!(*log.lock(), expected[id], "seed {} subscriber {:?}", seed, id);
            }
        }
    }
}
