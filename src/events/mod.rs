//! Change Notifications
//!
//! - `types`: the [`Event`] enum (`added`, `updated`, `deleted`, `expired`)
//! - `bus`: the queue and dispatch task delivering events to listeners

pub mod bus;
pub mod types;

pub use bus::{Listener, ListenerId, NotificationBus};
pub use types::Event;
