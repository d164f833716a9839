//! # sealkv - An Embeddable, Versioned, Encrypted Key-Value Store
//!
//! sealkv is an in-process key-value store that keeps the full history of
//! every key, expires keys on a TTL, notifies listeners of changes, and
//! persists to a single compressed and encrypted snapshot file.
//!
//! ## Features
//!
//! - **Version History**: every write is kept with its timestamp
//! - **Compare-and-Swap**: atomic conditional updates
//! - **TTL Support**: per-write or store-wide expiry with background cleanup
//! - **Change Notifications**: `added`, `updated`, `deleted` and `expired`
//!   events delivered in order on a background task
//! - **Encrypted Snapshots**: zlib + AES-GCM + base64, with key rotation
//! - **Legacy Upgrade**: older single-value snapshot files load transparently
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               sealkv                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌──────────────────────────────┐    ┌────────────┐  │
//! │  │   caller    │───>│            Store             │───>│Notification│  │
//! │  │   tasks     │    │  RwLock<versions, expiries>  │    │    Bus     │  │
//! │  └─────────────┘    └──────────────┬───────────────┘    └─────┬──────┘  │
//! │                            ▲       │ load / save              │         │
//! │                            │       ▼                          ▼         │
//! │  ┌─────────────────────────┴┐  ┌─────────────────────┐  ┌───────────┐   │
//! │  │      ExpirySweeper       │  │  codec: json, zlib, │  │ listeners │   │
//! │  │  (Background Tokio Task) │  │  AES-GCM, base64    │  └───────────┘   │
//! │  └──────────────────────────┘  └──────────┬──────────┘                  │
//! │                                           ▼                             │
//! │                                     snapshot file                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use sealkv::{Store, StoreConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), sealkv::StoreError> {
//!     let config = StoreConfig::new("data.db")
//!         .with_encryption_key(b"0123456789abcdef0123456789abcdef")
//!         .with_global_ttl(Duration::from_secs(3600));
//!     let store = Store::open(config).await?;
//!
//!     store.register_listener(|event| println!("{}", event));
//!
//!     store.set("name", "Ariz", None).await?;
//!     let swapped = store.compare_and_swap("name", "Ariz", "Ariz K", None).await?;
//!     assert!(swapped);
//!
//!     store.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`storage`]: the [`Store`], key rotation and the expiry sweeper
//! - [`codec`]: snapshot serialization, compression and encryption
//! - [`events`]: change events and the notification bus
//! - [`config`]: store configuration
//! - [`error`]: the [`StoreError`] type
//!
//! ## Design Highlights
//!
//! ### Lazy + Active Expiry
//!
//! Keys with TTL are expired in two ways:
//! 1. **Lazy**: `get` refuses a key whose deadline has passed
//! 2. **Active**: a background task removes such keys and emits `expired`
//!
//! ### Crash-safe Snapshots
//!
//! Snapshots are written to a temporary file and renamed into place, so a
//! crash mid-write leaves the previous snapshot intact.

pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod storage;

// Re-export commonly used types for convenience
pub use codec::EncryptionKey;
pub use config::{LoadMode, NotificationConfig, OverflowPolicy, PersistMode, StoreConfig};
pub use error::{StoreError, StoreResult};
pub use events::{Event, ListenerId};
pub use storage::{Store, StoreStats, Version};

/// Version of sealkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
