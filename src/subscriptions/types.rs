//! Subscription types for synchronous change notification.

use std::fmt;
use std::hash::Hash;

/// An event that can be routed by kind through a
/// [`NotificationChannel`](super::NotificationChannel).
pub trait Notification {
    /// Discriminant used as the subscription key.
    type Kind: Copy + Eq + Hash + fmt::Debug + fmt::Display;

    fn kind(&self) -> Self::Kind;
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle to cancel a subscription.
///
/// Handles are plain values: copying one does not duplicate the
/// subscription, and dropping one does not cancel it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle<K> {
    pub(crate) id: SubscriptionId,
    pub(crate) kind: K,
}

impl<K: Copy> SubscriptionHandle<K> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The event kind this subscription listens to.
    pub fn kind(&self) -> K {
        self.kind
    }
}
