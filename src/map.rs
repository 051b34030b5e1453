//! Observable map tying storage and notification together.

use crate::error::{MapError, Result, SubscriberError};
use crate::subscriptions::{NotificationChannel, SubscriptionHandle};
use crate::types::{EventKind, MapEvent};
use crossbeam_channel::Receiver;
use std::borrow::Borrow;
use std::cell::{Ref, RefCell};
use std::collections::hash_map::{Entry, RandomState};
use std::collections::HashMap;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use tracing::debug;

/// What the overwrite paths announce when they replace or add an entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OverwritePolicy {
    /// `insert_or_overwrite` emits nothing; `upsert` emits only `Inserted`.
    #[default]
    Silent,
    /// Replacing emits `Updated`, adding emits `Inserted`.
    Notify,
}

/// Map configuration.
#[derive(Clone, Debug)]
pub struct MapConfig {
    /// Capacity requested at construction.
    pub initial_capacity: usize,

    /// Events for `insert_or_overwrite` and `upsert`.
    pub overwrite_policy: OverwritePolicy,

    /// Emit `Updated` from `update_if_present` and `modify`.
    pub emit_on_update: bool,

    /// Emit `Rehashed` and `Reserved`. Off by default.
    pub emit_capacity_events: bool,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 0,
            overwrite_policy: OverwritePolicy::Silent,
            emit_on_update: false,
            emit_capacity_events: false,
        }
    }
}

/// A hash map that reports its changes to subscribers.
///
/// Every mutation is applied first and then announced through the owned
/// [`NotificationChannel`], synchronously, before the call returns. A
/// subscriber that calls back into the map therefore sees the state after
/// the change.
///
/// All methods take `&self`; share the map as `Rc<ObservableMap<..>>` and
/// hand subscribers a `Weak` to let them read or mutate it re-entrantly.
/// The guards returned by [`lookup`](Self::lookup) and
/// [`get_existing`](Self::get_existing) borrow the storage: holding one
/// across a mutation panics.
///
/// # Subscriber failures
///
/// When a subscriber returns an error, the mutation that triggered the event
/// is **not** rolled back. The caller receives
/// [`MapError::SubscriberFailure`] even though the map already holds the
/// new state, and subscribers registered after the failing one were not
/// told about it.
pub struct ObservableMap<K, V, S = RandomState> {
    config: MapConfig,
    entries: RefCell<HashMap<K, V, S>>,
    channel: NotificationChannel<MapEvent<K, V>>,
}

impl<K, V> ObservableMap<K, V, RandomState>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create an empty map with the default configuration.
    pub fn new() -> Self {
        Self::with_config(MapConfig::default())
    }

    pub fn with_config(config: MapConfig) -> Self {
        Self::with_config_and_hasher(config, RandomState::new())
    }
}

impl<K, V> Default for ObservableMap<K, V, RandomState>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> ObservableMap<K, V, S>
where
    K: Eq + Hash + Clone,
    V: Clone,
    S: BuildHasher,
{
    pub fn with_config_and_hasher(config: MapConfig, hasher: S) -> Self {
        let entries = HashMap::with_capacity_and_hasher(config.initial_capacity, hasher);
        Self {
            config,
            entries: RefCell::new(entries),
            channel: NotificationChannel::new(),
        }
    }

    pub fn config(&self) -> &MapConfig {
        &self.config
    }

    /// The channel this map emits on.
    pub fn channel(&self) -> &NotificationChannel<MapEvent<K, V>> {
        &self.channel
    }

    // --- Subscriptions ---

    /// Register `callback` for events of `kind`. See
    /// [`NotificationChannel::subscribe`].
    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> SubscriptionHandle<EventKind>
    where
        F: Fn(&MapEvent<K, V>) -> std::result::Result<(), SubscriberError> + 'static,
    {
        self.channel.subscribe(kind, callback)
    }

    pub fn subscribe_many<I, F>(&self, kinds: I, callback: F) -> Vec<SubscriptionHandle<EventKind>>
    where
        I: IntoIterator<Item = EventKind>,
        F: Fn(&MapEvent<K, V>) -> std::result::Result<(), SubscriberError> + 'static,
    {
        self.channel.subscribe_many(kinds, callback)
    }

    /// Forward events of `kind` into a bounded channel. See
    /// [`NotificationChannel::subscribe_channel`].
    pub fn subscribe_channel(
        &self,
        kind: EventKind,
        buffer_size: usize,
    ) -> (SubscriptionHandle<EventKind>, Receiver<MapEvent<K, V>>)
    where
        K: 'static,
        V: 'static,
    {
        self.channel.subscribe_channel(kind, buffer_size)
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle<EventKind>) -> bool {
        self.channel.unsubscribe(handle)
    }

    // --- Lookup ---

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Current storage capacity.
    pub fn capacity(&self) -> usize {
        self.entries.borrow().capacity()
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.borrow().contains_key(key)
    }

    /// Borrow the value for `key`, if present.
    pub fn lookup<Q>(&self, key: &Q) -> Option<Ref<'_, V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        Ref::filter_map(self.entries.borrow(), |entries| entries.get(key)).ok()
    }

    /// Borrow the value for `key`, failing with [`MapError::KeyNotFound`]
    /// when it is absent.
    pub fn get_existing<Q>(&self, key: &Q) -> Result<Ref<'_, V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + fmt::Debug + ?Sized,
    {
        self.lookup(key)
            .ok_or_else(|| MapError::KeyNotFound(format!("{:?}", key)))
    }

    /// Snapshot of all keys, in arbitrary order.
    pub fn keys(&self) -> Vec<K> {
        self.entries.borrow().keys().cloned().collect()
    }

    /// Snapshot of all entries, in arbitrary order.
    pub fn snapshot(&self) -> Vec<(K, V)> {
        self.entries
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Visit every entry. The storage stays borrowed while `f` runs, so `f`
    /// must not mutate the map.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V),
    {
        for (k, v) in self.entries.borrow().iter() {
            f(k, v);
        }
    }

    // --- Mutation ---

    /// Insert `value` unless `key` is already present.
    ///
    /// Emits `Inserted` only when the entry was added. Returns whether it
    /// was added; an existing value is left untouched and `value` dropped.
    pub fn insert_if_absent(&self, key: K, value: V) -> Result<bool> {
        let (event, old_capacity, new_capacity) = {
            let mut entries = self.entries.borrow_mut();
            let old_capacity = entries.capacity();

            let event = match entries.entry(key) {
                Entry::Occupied(_) => return Ok(false),
                Entry::Vacant(slot) => {
                    let event = MapEvent::Inserted {
                        key: slot.key().clone(),
                        value: value.clone(),
                    };
                    slot.insert(value);
                    event
                }
            };

            (event, old_capacity, entries.capacity())
        };

        self.channel.emit(&event)?;
        self.emit_rehash(old_capacity, new_capacity)?;
        Ok(true)
    }

    /// Insert or replace the value for `key`, returning the previous value.
    ///
    /// Under [`OverwritePolicy::Silent`] no entry event is emitted; under
    /// [`OverwritePolicy::Notify`] adding emits `Inserted` and replacing
    /// emits `Updated`.
    pub fn insert_or_overwrite(&self, key: K, value: V) -> Result<Option<V>> {
        let announce_insert = self.config.overwrite_policy == OverwritePolicy::Notify;
        self.put(key, value, announce_insert)
    }

    /// Insert or replace the value for `key`, always taking `value`.
    ///
    /// Emits `Inserted` when the key is new. Replacing emits `Updated` only
    /// under [`OverwritePolicy::Notify`]. Returns true if the key was new.
    pub fn upsert(&self, key: K, value: V) -> Result<bool> {
        Ok(self.put(key, value, true)?.is_none())
    }

    fn put(&self, key: K, value: V, announce_insert: bool) -> Result<Option<V>> {
        let announce_update = self.config.overwrite_policy == OverwritePolicy::Notify;

        let (event, previous, old_capacity, new_capacity) = {
            let mut entries = self.entries.borrow_mut();
            let old_capacity = entries.capacity();

            let (event, previous) = match entries.entry(key) {
                Entry::Occupied(mut slot) => {
                    let old_value = slot.insert(value);
                    let event = announce_update.then(|| MapEvent::Updated {
                        key: slot.key().clone(),
                        old_value: old_value.clone(),
                        new_value: slot.get().clone(),
                    });
                    (event, Some(old_value))
                }
                Entry::Vacant(slot) => {
                    let event = announce_insert.then(|| MapEvent::Inserted {
                        key: slot.key().clone(),
                        value: value.clone(),
                    });
                    slot.insert(value);
                    (event, None)
                }
            };

            (event, previous, old_capacity, entries.capacity())
        };

        if let Some(event) = event {
            self.channel.emit(&event)?;
        }
        self.emit_rehash(old_capacity, new_capacity)?;
        Ok(previous)
    }

    /// Replace the value for `key` only if it is present.
    ///
    /// Emits `Updated` when [`MapConfig::emit_on_update`] is set. Returns
    /// whether a value was replaced.
    pub fn update_if_present(&self, key: K, new_value: V) -> Result<bool> {
        let event = {
            let mut entries = self.entries.borrow_mut();
            let Some(slot) = entries.get_mut(&key) else {
                return Ok(false);
            };
            let old_value = std::mem::replace(slot, new_value);

            self.config.emit_on_update.then(|| MapEvent::Updated {
                key,
                old_value,
                new_value: slot.clone(),
            })
        };

        if let Some(event) = event {
            self.channel.emit(&event)?;
        }
        Ok(true)
    }

    /// Mutate the value for `key` in place.
    ///
    /// `f` runs while the storage is borrowed and must not touch the map.
    /// Emits `Updated` when [`MapConfig::emit_on_update`] is set. Returns
    /// whether the key was present.
    pub fn modify<F>(&self, key: K, f: F) -> Result<bool>
    where
        F: FnOnce(&mut V),
    {
        let event = {
            let mut entries = self.entries.borrow_mut();
            let Some(slot) = entries.get_mut(&key) else {
                return Ok(false);
            };

            let old_value = self.config.emit_on_update.then(|| slot.clone());
            f(slot);

            old_value.map(|old_value| MapEvent::Updated {
                key,
                old_value,
                new_value: slot.clone(),
            })
        };

        if let Some(event) = event {
            self.channel.emit(&event)?;
        }
        Ok(true)
    }

    /// Remove `key`, emitting `Erased` with the removed value.
    ///
    /// Returns the number of entries removed (0 or 1).
    pub fn remove<Q>(&self, key: &Q) -> Result<usize>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let removed = self.entries.borrow_mut().remove_entry(key);
        let Some((key, old_value)) = removed else {
            return Ok(0);
        };

        self.channel.emit(&MapEvent::Erased { key, old_value })?;
        Ok(1)
    }

    /// Remove every entry. Emits `Cleared` even when the map was empty.
    pub fn clear(&self) -> Result<()> {
        let removed = {
            let mut entries = self.entries.borrow_mut();
            let removed = entries.len();
            entries.clear();
            removed
        };

        debug!(removed, "cleared map");
        self.channel.emit(&MapEvent::Cleared)
    }

    /// Ensure room for at least `capacity` entries in total.
    ///
    /// With [`MapConfig::emit_capacity_events`] set, emits `Reserved`, then
    /// `Rehashed` if the storage grew.
    pub fn reserve(&self, capacity: usize) -> Result<()> {
        let (old_capacity, new_capacity) = {
            let mut entries = self.entries.borrow_mut();
            let old_capacity = entries.capacity();
            let additional = capacity.saturating_sub(entries.len());
            entries.reserve(additional);
            (old_capacity, entries.capacity())
        };

        self.emit_reserved(capacity, old_capacity, new_capacity)
    }

    /// Like [`reserve`](Self::reserve), but allocation failure returns
    /// [`MapError::CapacityExhausted`] instead of aborting.
    pub fn try_reserve(&self, capacity: usize) -> Result<()> {
        let (old_capacity, new_capacity) = {
            let mut entries = self.entries.borrow_mut();
            let old_capacity = entries.capacity();
            let additional = capacity.saturating_sub(entries.len());
            entries.try_reserve(additional)?;
            (old_capacity, entries.capacity())
        };

        self.emit_reserved(capacity, old_capacity, new_capacity)
    }

    fn emit_reserved(&self, requested: usize, old_capacity: usize, new_capacity: usize) -> Result<()> {
        if self.config.emit_capacity_events {
            self.channel.emit(&MapEvent::Reserved {
                new_capacity: requested,
            })?;
        }
        self.emit_rehash(old_capacity, new_capacity)
    }

    fn emit_rehash(&self, old_capacity: usize, new_capacity: usize) -> Result<()> {
        if !self.config.emit_capacity_events || old_capacity == new_capacity {
            return Ok(());
        }
        self.channel.emit(&MapEvent::Rehashed {
            old_capacity,
            new_capacity,
        })
    }
}

impl<K: fmt::Debug, V: fmt::Debug, S> fmt::Debug for ObservableMap<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableMap")
            .field("entries", &*self.entries.borrow())
            .field("channel", &self.channel)
            .field("config", &self.config)
            .finish()
    }
}
