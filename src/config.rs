//! Store Configuration
//!
//! Everything a store needs at construction: where its snapshot lives, the
//! key it is sealed with, and how the background machinery behaves.
//!
//! ```
//! use sealkv::config::{LoadMode, PersistMode, StoreConfig};
//! use std::time::Duration;
//!
//! let config = StoreConfig::new("data.db")
//!     .with_encryption_key(b"0123456789abcdef")
//!     .with_global_ttl(Duration::from_secs(10))
//!     .with_sweep_interval(Duration::from_secs(5))
//!     .with_load_mode(LoadMode::Eager)
//!     .with_persist_mode(PersistMode::OnStop);
//!
//! assert_eq!(config.global_ttl, Some(Duration::from_secs(10)));
//! ```

use crate::codec::EncryptionKey;
use std::path::PathBuf;
use std::time::Duration;

/// Default interval between expiry sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Default notification queue depth.
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 10;

/// When the snapshot file is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadMode {
    /// Read on first access; opening never touches the disk.
    #[default]
    Lazy,
    /// Read while opening; a bad file fails `Store::open`.
    Eager,
}

/// When the snapshot file is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PersistMode {
    /// Only at `Store::stop`.
    OnStop,
    /// On each sweeper tick if anything changed, and at stop.
    #[default]
    Periodic,
    /// After every mutation, and at stop.
    EveryMutation,
}

/// What a producer does when the notification queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Wait for the dispatcher to make room.
    #[default]
    Block,
    /// Discard the event and count it as dropped.
    Drop,
    /// Never fill up: use an unbounded queue.
    Grow,
}

/// Configuration for the notification bus.
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    /// Queue depth for `Block` and `Drop` (at least 1)
    pub capacity: usize,

    /// Behaviour when the queue is full
    pub overflow: OverflowPolicy,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_NOTIFICATION_CAPACITY,
            overflow: OverflowPolicy::Block,
        }
    }
}

/// Configuration for a [`Store`](crate::Store).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Snapshot file location
    pub path: PathBuf,

    /// Snapshot key; empty disables encryption
    pub encryption_key: EncryptionKey,

    /// Interval between expiry sweeps
    pub sweep_interval: Duration,

    /// TTL applied when `set` is given none
    pub global_ttl: Option<Duration>,

    pub load_mode: LoadMode,

    pub persist_mode: PersistMode,

    pub notifications: NotificationConfig,
}

impl StoreConfig {
    /// Creates a configuration with defaults for everything but the path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            encryption_key: EncryptionKey::none(),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            global_ttl: None,
            load_mode: LoadMode::default(),
            persist_mode: PersistMode::default(),
            notifications: NotificationConfig::default(),
        }
    }

    pub fn with_encryption_key(mut self, key: impl Into<EncryptionKey>) -> Self {
        self.encryption_key = key.into();
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Sets the global TTL. A zero duration means "no global TTL".
    pub fn with_global_ttl(mut self, ttl: Duration) -> Self {
        self.global_ttl = Some(ttl).filter(|ttl| !ttl.is_zero());
        self
    }

    pub fn with_load_mode(mut self, mode: LoadMode) -> Self {
        self.load_mode = mode;
        self
    }

    pub fn with_persist_mode(mut self, mode: PersistMode) -> Self {
        self.persist_mode = mode;
        self
    }

    pub fn with_notifications(mut self, notifications: NotificationConfig) -> Self {
        self.notifications = notifications;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::new("store.db");
        assert_eq!(config.path, PathBuf::from("store.db"));
        assert!(config.encryption_key.is_empty());
        assert_eq!(config.sweep_interval, DEFAULT_SWEEP_INTERVAL);
        assert_eq!(config.global_ttl, None);
        assert_eq!(config.load_mode, LoadMode::Lazy);
        assert_eq!(config.persist_mode, PersistMode::Periodic);
        assert_eq!(config.notifications.capacity, 10);
        assert_eq!(config.notifications.overflow, OverflowPolicy::Block);
    }

    #[test]
    fn test_zero_global_ttl_is_none() {
        let config = StoreConfig::new("store.db").with_global_ttl(Duration::ZERO);
        assert_eq!(config.global_ttl, None);
    }
}
