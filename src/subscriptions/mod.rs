//! Subscription system for synchronous change notification.
//!
//! A [`NotificationChannel`] keeps callbacks per event kind and runs them on
//! the emitting thread, in registration order, before `emit` returns:
//! - Callbacks receive the event by shared reference
//! - The first failing callback stops delivery and its error is returned
//! - Subscribing or unsubscribing from inside a callback is allowed; the
//!   running dispatch pass is unaffected
//!
//! # Example
//!
//! ```ignore
//! let channel = NotificationChannel::<MapEvent<String, u32>>::new();
//!
//! let handle = channel.subscribe(EventKind::Inserted, |event| {
//!     println!("inserted: {:?}", event.key());
//!     Ok(())
//! });
//!
//! channel.emit(&MapEvent::Inserted { key: "a".into(), value: 1 })?;
//! channel.unsubscribe(handle);
//! ```

mod channel;
mod types;

pub use channel::NotificationChannel;
pub use types::{Notification, SubscriptionHandle, SubscriptionId};
