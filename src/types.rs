//! Core event types for the observable map.

use crate::subscriptions::Notification;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a [`MapEvent`], used as the subscription key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Inserted,
    Updated,
    Erased,
    Cleared,
    Rehashed,
    Reserved,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [EventKind; 6] = [
        EventKind::Inserted,
        EventKind::Updated,
        EventKind::Erased,
        EventKind::Cleared,
        EventKind::Rehashed,
        EventKind::Reserved,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Inserted => "inserted",
            EventKind::Updated => "updated",
            EventKind::Erased => "erased",
            EventKind::Cleared => "cleared",
            EventKind::Rehashed => "rehashed",
            EventKind::Reserved => "reserved",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single state transition of an [`ObservableMap`](crate::ObservableMap).
///
/// Keys and values are owned snapshots taken at the moment of the
/// transition. `old_value` is captured before the mutation, `value` and
/// `new_value` after it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MapEvent<K, V> {
    /// A new key was added.
    Inserted { key: K, value: V },

    /// An existing key's value was replaced.
    Updated { key: K, old_value: V, new_value: V },

    /// A key was removed.
    Erased { key: K, old_value: V },

    /// All entries were removed at once.
    Cleared,

    /// Backing storage capacity changed. No entry-level effect.
    Rehashed {
        old_capacity: usize,
        new_capacity: usize,
    },

    /// A capacity increase was requested.
    Reserved { new_capacity: usize },
}

impl<K, V> MapEvent<K, V> {
    pub fn kind(&self) -> EventKind {
        match self {
            MapEvent::Inserted { .. } => EventKind::Inserted,
            MapEvent::Updated { .. } => EventKind::Updated,
            MapEvent::Erased { .. } => EventKind::Erased,
            MapEvent::Cleared => EventKind::Cleared,
            MapEvent::Rehashed { .. } => EventKind::Rehashed,
            MapEvent::Reserved { .. } => EventKind::Reserved,
        }
    }

    /// The key this event concerns, if it is an entry-level event.
    pub fn key(&self) -> Option<&K> {
        match self {
            MapEvent::Inserted { key, .. }
            | MapEvent::Updated { key, .. }
            | MapEvent::Erased { key, .. } => Some(key),
            _ => None,
        }
    }
}

impl<K, V> Notification for MapEvent<K, V> {
    type Kind = EventKind;

    fn kind(&self) -> EventKind {
        MapEvent::kind(self)
    }
}
