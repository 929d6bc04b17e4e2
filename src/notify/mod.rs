//! Ownership-safe publish/subscribe.
//!
//! - [`Callback`] / [`WeakCallback`]: strong and weak handles to a function
//!   object. Dropping the last strong handle unsubscribes everywhere.
//! - [`Notifier`]: a subscription list that delivers each notification
//!   inline or through an event loop, per subscriber.

mod callback;
mod notifier;

pub use callback::{Callback, WeakCallback};
pub use notifier::{Delivery, Notified, Notifier, SubscribeMode};
