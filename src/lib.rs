//! # Reactive Map
//!
//! A hash map that tells subscribers about every change to its contents,
//! synchronously and in subscription order.
//!
//! ## Core Concepts
//!
//! - **ObservableMap**: Key-unique storage whose mutations emit events
//! - **Events**: Owned snapshots of one transition (`Inserted`, `Updated`,
//!   `Erased`, `Cleared`, `Rehashed`, `Reserved`)
//! - **NotificationChannel**: Per-kind callback registry owned by the map
//!
//! Events are emitted after the mutation is applied. If a subscriber fails,
//! the error reaches the caller of the mutation but the mutation stays.
//!
//! ## Example
//!
//! ```ignore
//! use reactive_map::{EventKind, MapEvent, ObservableMap};
//!
//! let map = ObservableMap::<String, u32>::new();
//!
//! let handle = map.subscribe(EventKind::Inserted, |event| {
//!     if let MapEvent::Inserted { key, value } = event {
//!         println!("{key} -> {value}");
//!     }
//!     Ok(())
//! });
//!
//! map.insert_if_absent("answer".to_string(), 42)?; // Emits Inserted
//! map.remove("answer")?;                            // Emits Erased
//! map.unsubscribe(handle);
//! ```

pub mod error;
pub mod map;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use error::{MapError, Result, SubscriberError};
pub use map::{MapConfig, ObservableMap, OverwritePolicy};
pub use subscriptions::{Notification, NotificationChannel, SubscriptionHandle, SubscriptionId};
pub use types::{EventKind, MapEvent};
