//! Notification channel dispatching events to subscribed callbacks.

use crate::error::{MapError, Result, SubscriberError};
use crossbeam_channel::{bounded, Receiver, TrySendError};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace, warn};

use super::types::{Notification, SubscriptionHandle, SubscriptionId};

/// Subscription ids are drawn process-wide, so a handle never matches a
/// subscription on another channel.
static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

type Callback<E> = Rc<dyn Fn(&E) -> std::result::Result<(), SubscriberError>>;

/// Internal subscription state.
struct Subscriber<E> {
    id: SubscriptionId,
    callback: Callback<E>,
}

/// Registry of callbacks keyed by event kind, with synchronous delivery.
///
/// The channel is single-threaded: it is neither `Send` nor `Sync`, and all
/// methods take `&self` so that callbacks can reach back into it while a
/// dispatch is running.
pub struct NotificationChannel<E: Notification> {
    /// Subscribers per kind, in registration order.
    subscribers: RefCell<HashMap<E::Kind, Vec<Subscriber<E>>>>,
}

impl<E: Notification> NotificationChannel<E> {
    /// Create an empty channel.
    pub fn new() -> Self {
        Self {
            subscribers: RefCell::new(HashMap::new()),
        }
    }

    /// Register `callback` for events of `kind`.
    ///
    /// The callback runs on every later emission of that kind until the
    /// returned handle is passed to [`unsubscribe`](Self::unsubscribe).
    pub fn subscribe<F>(&self, kind: E::Kind, callback: F) -> SubscriptionHandle<E::Kind>
    where
        F: Fn(&E) -> std::result::Result<(), SubscriberError> + 'static,
    {
        self.register(kind, Rc::new(callback))
    }

    /// Register one callback for several kinds at once.
    ///
    /// Returns one handle per kind, in iteration order.
    pub fn subscribe_many<I, F>(&self, kinds: I, callback: F) -> Vec<SubscriptionHandle<E::Kind>>
    where
        I: IntoIterator<Item = E::Kind>,
        F: Fn(&E) -> std::result::Result<(), SubscriberError> + 'static,
    {
        let callback: Callback<E> = Rc::new(callback);
        kinds
            .into_iter()
            .map(|kind| self.register(kind, Rc::clone(&callback)))
            .collect()
    }

    /// Forward clones of events of `kind` into a bounded channel.
    ///
    /// The channel holds `buffer_size` events; a `buffer_size` of 0 is
    /// raised to 1. When the buffer is full the emission fails with a
    /// subscriber error. Once the receiver is dropped, events are discarded silently; call
    /// [`unsubscribe`](Self::unsubscribe) to stop cloning them.
    pub fn subscribe_channel(
        &self,
        kind: E::Kind,
        buffer_size: usize,
    ) -> (SubscriptionHandle<E::Kind>, Receiver<E>)
    where
        E: Clone + 'static,
    {
        // A zero-capacity channel would reject every try_send.
        let capacity = buffer_size.max(1);
        let (sender, receiver) = bounded(capacity);

        let handle = self.subscribe(kind, move |event: &E| {
            match sender.try_send(event.clone()) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => {
                    Err(format!("receiver buffer of {} events is full", capacity).into())
                }
                Err(TrySendError::Disconnected(_)) => {
                    trace!("receiver dropped, discarding event");
                    Ok(())
                }
            }
        });

        (handle, receiver)
    }

    fn register(&self, kind: E::Kind, callback: Callback<E>) -> SubscriptionHandle<E::Kind> {
        let id = SubscriptionId(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed));

        self.subscribers
            .borrow_mut()
            .entry(kind)
            .or_default()
            .push(Subscriber { id, callback });

        debug!(subscription = %id, %kind, "subscribed");
        SubscriptionHandle { id, kind }
    }

    /// Cancel a subscription.
    ///
    /// Returns false if it was already cancelled or belongs to another
    /// channel. Calling this from inside a callback does not change which
    /// callbacks run for the emission in progress.
    pub fn unsubscribe(&self, handle: SubscriptionHandle<E::Kind>) -> bool {
        let mut subs = self.subscribers.borrow_mut();
        let Some(list) = subs.get_mut(&handle.kind) else {
            return false;
        };

        let before = list.len();
        list.retain(|sub| sub.id != handle.id);
        let removed = list.len() != before;

        if list.is_empty() {
            subs.remove(&handle.kind);
        }
        if removed {
            debug!(subscription = %handle.id, kind = %handle.kind, "unsubscribed");
        }
        removed
    }

    /// Whether the subscription behind `handle` is still registered.
    pub fn is_subscribed(&self, handle: SubscriptionHandle<E::Kind>) -> bool {
        self.subscribers
            .borrow()
            .get(&handle.kind)
            .is_some_and(|list| list.iter().any(|sub| sub.id == handle.id))
    }

    /// Number of subscriptions for `kind`.
    pub fn subscriber_count(&self, kind: E::Kind) -> usize {
        self.subscribers.borrow().get(&kind).map_or(0, Vec::len)
    }

    /// Number of subscriptions across all kinds.
    pub fn total_subscribers(&self) -> usize {
        self.subscribers.borrow().values().map(Vec::len).sum()
    }

    /// Deliver `event` to every callback subscribed to its kind.
    ///
    /// The subscriber list is captured before the first callback runs.
    /// Delivery stops at the first callback that returns an error, and that
    /// error is returned wrapped in [`MapError::SubscriberFailure`].
    pub fn emit(&self, event: &E) -> Result<()> {
        let kind = event.kind();

        // Snapshot so callbacks may (un)subscribe without holding the borrow.
        let pass: Vec<(SubscriptionId, Callback<E>)> = self
            .subscribers
            .borrow()
            .get(&kind)
            .map(|list| {
                list.iter()
                    .map(|sub| (sub.id, Rc::clone(&sub.callback)))
                    .collect()
            })
            .unwrap_or_default();

        trace!(%kind, subscribers = pass.len(), "emitting event");

        for (id, callback) in pass {
            if let Err(source) = callback(event) {
                warn!(subscription = %id, %kind, error = %source, "subscriber failed");
                return Err(MapError::SubscriberFailure {
                    subscription: id,
                    kind: kind.to_string(),
                    source,
                });
            }
        }

        Ok(())
    }
}

impl<E: Notification> Default for NotificationChannel<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Notification> fmt::Debug for NotificationChannel<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationChannel")
            .field("subscribers", &self.total_subscribers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventKind, MapEvent};
    use std::cell::Cell;

    type Event = MapEvent<&'static str, i32>;

    fn inserted(key: &'static str, value: i32) -> Event {
        MapEvent::Inserted { key, value }
    }

    #[test]
    fn test_subscribe_unsubscribe() {
        let channel = NotificationChannel::<Event>::new();

        let handle = channel.subscribe(EventKind::Inserted, |_| Ok(()));
        assert_eq!(channel.subscriber_count(EventKind::Inserted), 1);
        assert!(channel.is_subscribed(handle));

        assert!(channel.unsubscribe(handle));
        assert_eq!(channel.total_subscribers(), 0);
        assert!(!channel.is_subscribed(handle));

        // Second cancel is a no-op
        assert!(!channel.unsubscribe(handle));
    }

    #[test]
    fn test_handle_from_other_channel_is_rejected() {
        let first = NotificationChannel::<Event>::new();
        let second = NotificationChannel::<Event>::new();
        let hits = Rc::new(Cell::new(0));

        let foreign = first.subscribe(EventKind::Inserted, |_| Ok(()));
        let counter = Rc::clone(&hits);
        let own = second.subscribe(EventKind::Inserted, move |_| {
            counter.set(counter.get() + 1);
            Ok(())
        });
        assert_ne!(foreign.id(), own.id());

        assert!(!second.is_subscribed(foreign));
        assert!(!second.unsubscribe(foreign));
        assert!(second.is_subscribed(own));

        second.emit(&inserted("x", 1)).unwrap();
        assert_eq!(hits.get(), 1);
        assert!(first.is_subscribed(foreign));
    }

    #[test]
    fn test_emit_to_matching_kind_only() {
        let channel = NotificationChannel::<Event>::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let sink = Rc::clone(&seen);
        channel.subscribe(EventKind::Erased, move |event| {
            sink.borrow_mut().push(event.clone());
            Ok(())
        });

        channel.emit(&inserted("a", 1)).unwrap();
        assert!(seen.borrow().is_empty());

        let erased = MapEvent::Erased {
            key: "a",
            old_value: 1,
        };
        channel.emit(&erased).unwrap();
        assert_eq!(*seen.borrow(), vec![erased]);
    }

    #[test]
    fn test_emit_in_registration_order() {
        let channel = NotificationChannel::<Event>::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = Rc::clone(&order);
            channel.subscribe(EventKind::Inserted, move |_| {
                order.borrow_mut().push(tag);
                Ok(())
            });
        }

        channel.emit(&inserted("k", 0)).unwrap();
        assert_eq!(*order.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_failure_stops_delivery() {
        let channel = NotificationChannel::<Event>::new();
        let reached = Rc::new(Cell::new(false));

        let failing = channel.subscribe(EventKind::Inserted, |_| Err("boom".into()));
        let flag = Rc::clone(&reached);
        channel.subscribe(EventKind::Inserted, move |_| {
            flag.set(true);
            Ok(())
        });

        let err = channel.emit(&inserted("k", 0)).unwrap_err();
        match err {
            MapError::SubscriberFailure {
                subscription,
                kind,
                source,
            } => {
                assert_eq!(subscription, failing.id());
                assert_eq!(kind, "inserted");
                assert_eq!(source.to_string(), "boom");
            }
            other => panic!("Expected SubscriberFailure, got {:?}", other),
        }
        assert!(!reached.get());
    }

    #[test]
    fn test_unsubscribe_later_subscriber_during_dispatch() {
        let channel = Rc::new(NotificationChannel::<Event>::new());
        let later = Rc::new(Cell::new(None));
        let runs = Rc::new(Cell::new(0));

        let ch = Rc::clone(&channel);
        let target = Rc::clone(&later);
        channel.subscribe(EventKind::Inserted, move |_| {
            if let Some(handle) = target.get() {
                ch.unsubscribe(handle);
            }
            Ok(())
        });

        let counter = Rc::clone(&runs);
        later.set(Some(channel.subscribe(EventKind::Inserted, move |_| {
            counter.set(counter.get() + 1);
            Ok(())
        })));

        // Captured before the first callback removed it
        channel.emit(&inserted("k", 0)).unwrap();
        assert_eq!(runs.get(), 1);

        channel.emit(&inserted("k", 0)).unwrap();
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_subscribe_during_dispatch_waits_for_next_emit() {
        let channel = Rc::new(NotificationChannel::<Event>::new());
        let late_runs = Rc::new(Cell::new(0));

        let ch = Rc::clone(&channel);
        let counter = Rc::clone(&late_runs);
        let once = Cell::new(false);
        channel.subscribe(EventKind::Inserted, move |_| {
            if !once.replace(true) {
                let counter = Rc::clone(&counter);
                ch.subscribe(EventKind::Inserted, move |_| {
                    counter.set(counter.get() + 1);
                    Ok(())
                });
            }
            Ok(())
        });

        channel.emit(&inserted("k", 0)).unwrap();
        assert_eq!(late_runs.get(), 0);

        channel.emit(&inserted("k", 0)).unwrap();
        assert_eq!(late_runs.get(), 1);
    }

    #[test]
    fn test_subscribe_many_shares_callback() {
        let channel = NotificationChannel::<Event>::new();
        let count = Rc::new(Cell::new(0));

        let counter = Rc::clone(&count);
        let handles = channel.subscribe_many(EventKind::ALL, move |_| {
            counter.set(counter.get() + 1);
            Ok(())
        });
        assert_eq!(handles.len(), EventKind::ALL.len());

        channel.emit(&inserted("k", 1)).unwrap();
        channel.emit(&MapEvent::Cleared).unwrap();
        channel.emit(&MapEvent::Reserved { new_capacity: 8 }).unwrap();
        assert_eq!(count.get(), 3);

        channel.unsubscribe(handles[0]);
        channel.emit(&inserted("k", 1)).unwrap();
        assert_eq!(count.get(), 3);
    }

    #[test]
    fn test_channel_subscriber_receives_clones() {
        let channel = NotificationChannel::<Event>::new();
        let (_handle, receiver) = channel.subscribe_channel(EventKind::Inserted, 4);

        channel.emit(&inserted("a", 1)).unwrap();
        channel.emit(&inserted("b", 2)).unwrap();

        assert_eq!(receiver.try_recv().unwrap(), inserted("a", 1));
        assert_eq!(receiver.try_recv().unwrap(), inserted("b", 2));
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn test_channel_subscriber_overflow_fails() {
        let channel = NotificationChannel::<Event>::new();
        let (handle, _receiver) = channel.subscribe_channel(EventKind::Inserted, 2);

        channel.emit(&inserted("a", 1)).unwrap();
        channel.emit(&inserted("b", 2)).unwrap();

        let err = channel.emit(&inserted("c", 3)).unwrap_err();
        assert!(matches!(
            err,
            MapError::SubscriberFailure { subscription, .. } if subscription == handle.id()
        ));
    }

    #[test]
    fn test_channel_subscriber_zero_buffer_holds_one() {
        let channel = NotificationChannel::<Event>::new();
        let (_handle, receiver) = channel.subscribe_channel(EventKind::Inserted, 0);

        channel.emit(&inserted("a", 1)).unwrap();
        assert!(channel.emit(&inserted("b", 2)).is_err());
        assert_eq!(receiver.try_recv().unwrap(), inserted("a", 1));
    }

    #[test]
    fn test_channel_subscriber_ignores_dropped_receiver() {
        let channel = NotificationChannel::<Event>::new();
        let (handle, receiver) = channel.subscribe_channel(EventKind::Inserted, 1);
        drop(receiver);

        channel.emit(&inserted("a", 1)).unwrap();
        channel.emit(&inserted("b", 2)).unwrap();
        assert!(channel.is_subscribed(handle));
    }
}
