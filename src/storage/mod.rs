//! Storage Engine Module
//!
//! This module provides the store itself: the versioned map with TTL
//! support, key rotation, and the background expiry sweeper.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Store                              │
//! │   RwLock<State>  ──load/save──>  snapshot file (envelope)   │
//! │        │                                                    │
//! │        └── publish ──> NotificationBus ──> listeners        │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │ Weak<Store>
//!              ┌─────────────┴─────────────┐
//!              │     ExpirySweeper         │
//!              │  (Background Tokio Task)  │
//!              └───────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Version History**: every write is kept with its timestamp
//! - **Compare-and-Swap**: atomic conditional append
//! - **TTL Support**: per-call or global time-to-live
//! - **Lazy Expiry**: `get` refuses expired keys on access
//! - **Active Expiry**: the sweeper removes them and emits `expired`
//! - **Key Rotation**: re-seal the snapshot under a new key

pub mod engine;
pub mod expiry;
mod rotation;

// Re-export commonly used types
pub use engine::{Store, StoreStats, Version};
pub use expiry::ExpirySweeper;
