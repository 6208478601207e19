//! Change notifications.
//!
//! Every committed transaction is delivered once, as a [`StoreChange`]
//! carrying the net diff, its source and the new epoch:
//! - callback listeners run synchronously on the committing thread
//! - channel subscriptions receive events over a bounded channel and are
//!   dropped when they fall behind
//!
//! Both can filter by change source and record kind.
//!
//! # Example
//!
//! ```ignore
//! let handle = store.subscribe(SubscriptionConfig {
//!     filter: ChangeFilter::local(),
//!     ..Default::default()
//! });
//!
//! loop {
//!     match handle.recv() {
//!         Ok(StoreEvent::Change { change }) => send_to_peers(&change.diff),
//!         Ok(StoreEvent::Dropped { .. }) | Err(_) => break,
//!     }
//! }
//! ```

mod manager;
mod types;

pub use manager::{ListenerFn, SubscriptionManager};
pub use types::{
    ChangeFilter, DropReason, ListenerId, StoreChange, StoreEvent, SubscriptionConfig,
    SubscriptionHandle,
};
