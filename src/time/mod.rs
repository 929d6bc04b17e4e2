//! Time-based awaitables.
//!
//! [`sleep`] and [`sleep_until`] suspend a [`Task`](crate::task::Task) until
//! a deadline, using a one-shot timer on the calling thread's
//! [`Loop`](crate::runtime::Loop).

mod sleep;

pub use sleep::{sleep, sleep_until, Sleep};
