//! Versioned Store Engine
//!
//! This module implements the core of sealkv: a map from keys to their full
//! version history, an expiration index, and the persistence and
//! notification hooks around them.
//!
//! ## Design Decisions
//!
//! 1. **Append-only versions**: every `set` or successful compare-and-swap
//!    appends a `(value, timestamp)` record; records are never edited.
//! 2. **Expiry is per key, not per version**: the expiration index says when
//!    the key as a whole stops being servable.
//! 3. **Lazy + active expiry**: `get` refuses expired keys immediately, while
//!    the background sweeper removes them physically.
//! 4. **One lock**: a single `RwLock` guards map, expiry index, key and load
//!    state, so reads see a consistent snapshot and every mutation of a key is
//!    ordered by lock acquisition.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Store                              │
//! │  ┌───────────────────────────────────────────────────────┐  │
//! │  │ RwLock<State>                                         │  │
//! │  │   data: key -> [Version, ...]   expirations: key -> t │  │
//! │  │   key (snapshot secret)         loaded / dirty flags  │  │
//! │  └───────────────────────────────────────────────────────┘  │
//! │        ▲ write              ▲ write             │ publish   │
//! │  ┌─────┴──────┐     ┌───────┴──────┐     ┌──────▼───────┐   │
//! │  │  callers   │     │ ExpirySweeper│     │NotificationBus│  │
//! │  └────────────┘     └──────────────┘     └──────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Events are published while the write lock is still held, so a listener
//! observes the events of one key in the same order the mutations happened.

use crate::codec::{snapshot, EncryptionKey, Snapshot, SnapshotFormat, VersionMap};
use crate::config::{LoadMode, PersistMode, StoreConfig};
use crate::error::{StoreError, StoreResult};
use crate::events::{Event, ListenerId, NotificationBus};
use crate::storage::expiry::ExpirySweeper;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OnceCell, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, info, trace};

/// One historical value of a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Version {
    /// The value written
    pub value: String,
    /// When it was written
    pub timestamp: DateTime<Utc>,
}

impl Version {
    pub fn new(value: String, timestamp: DateTime<Utc>) -> Self {
        Self { value, timestamp }
    }
}

/// Everything guarded by the store lock.
pub(super) struct State {
    pub(super) data: VersionMap,
    pub(super) expirations: HashMap<String, Instant>,
    pub(super) key: EncryptionKey,
    pub(super) loaded: bool,
    pub(super) dirty: bool,
}

impl State {
    fn new(key: EncryptionKey) -> Self {
        Self {
            data: HashMap::new(),
            expirations: HashMap::new(),
            key,
            loaded: false,
            dirty: false,
        }
    }

    fn versions(&self, key: &str) -> StoreResult<&[Version]> {
        self.data
            .get(key)
            .map(Vec::as_slice)
            .filter(|versions| !versions.is_empty())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn current(&self, key: &str) -> StoreResult<&Version> {
        self.data
            .get(key)
            .and_then(|versions| versions.last())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    #[inline]
    fn is_expired(&self, key: &str, now: Instant) -> bool {
        self.expirations
            .get(key)
            .map(|exp| now >= *exp)
            .unwrap_or(false)
    }

    /// Replaces the map with a decoded snapshot.
    ///
    /// Expiry deadlines already in memory are kept for keys that survive;
    /// wall-clock deadlines carried by the snapshot are converted to instants.
    pub(super) fn install(&mut self, snapshot: Snapshot) {
        let now = Instant::now();
        let wall_now = Utc::now();
        for (key, at) in snapshot.expirations {
            let remaining = (at - wall_now).to_std().unwrap_or(Duration::ZERO);
            if let Some(deadline) = now.checked_add(remaining) {
                self.expirations.insert(key, deadline);
            }
        }

        self.data = snapshot.data;
        self.data.retain(|_, versions| !versions.is_empty());

        let data = &self.data;
        self.expirations.retain(|key, _| data.contains_key(key));
    }
}

/// Operation counters.
#[derive(Debug, Default)]
pub(super) struct Counters {
    gets: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    cas_swaps: AtomicU64,
    cas_misses: AtomicU64,
    expired: AtomicU64,
    snapshots: AtomicU64,
    pub(super) rotations: AtomicU64,
}

/// Store statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Total `get` calls
    pub get_ops: u64,
    /// Total `set` calls
    pub set_ops: u64,
    /// Total successful `delete` calls
    pub del_ops: u64,
    /// Compare-and-swap calls that swapped
    pub cas_swaps: u64,
    /// Compare-and-swap calls whose expected value did not match
    pub cas_misses: u64,
    /// Keys evicted by the sweeper
    pub expired: u64,
    /// Snapshot files written
    pub snapshots: u64,
    /// Successful key rotations
    pub rotations: u64,
}

/// An embeddable, versioned key-value store.
///
/// Open one with [`Store::open`] inside a Tokio runtime, share the returned
/// `Arc` between tasks, and call [`Store::stop`] before exiting to write the
/// final snapshot.
///
/// # Example
///
/// ```no_run
/// use sealkv::{Store, StoreConfig};
/// use std::time::Duration;
///
/// # async fn demo() -> Result<(), sealkv::StoreError> {
/// let store = Store::open(
///     StoreConfig::new("data.db").with_encryption_key(b"0123456789abcdef"),
/// )
/// .await?;
///
/// store.set("name", "John", None).await?;
/// store.set("name", "Jane", Some(Duration::from_secs(60))).await?;
///
/// assert_eq!(store.get("name").await?, "Jane");
/// assert_eq!(store.get_all_versions("name").await?, vec!["John", "Jane"]);
///
/// store.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct Store {
    pub(super) state: RwLock<State>,
    pub(super) path: PathBuf,
    global_ttl: Option<Duration>,
    persist_mode: PersistMode,
    bus: NotificationBus,
    sweeper: parking_lot::Mutex<Option<ExpirySweeper>>,
    stopped: OnceCell<()>,
    pub(super) counters: Counters,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .field("global_ttl", &self.global_ttl)
            .field("persist_mode", &self.persist_mode)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Store {
    /// Opens a store bound to `config.path`.
    ///
    /// With [`LoadMode::Eager`] the snapshot is read here and any failure
    /// (wrong key, corrupt file) is returned. With [`LoadMode::Lazy`] the
    /// first operation reads it instead. A missing file is an empty store.
    ///
    /// Starts the expiry sweeper and the notification dispatcher, so this
    /// must run inside a Tokio runtime.
    pub async fn open(config: StoreConfig) -> StoreResult<Arc<Self>> {
        config.encryption_key.validate()?;

        let encrypted = !config.encryption_key.is_empty();
        let store = Arc::new(Self {
            state: RwLock::new(State::new(config.encryption_key)),
            path: config.path,
            global_ttl: config.global_ttl.filter(|ttl| !ttl.is_zero()),
            persist_mode: config.persist_mode,
            bus: NotificationBus::start(&config.notifications),
            sweeper: parking_lot::Mutex::new(None),
            stopped: OnceCell::new(),
            counters: Counters::default(),
        });

        if config.load_mode == LoadMode::Eager {
            let mut state = store.state.write().await;
            store.load(&mut state).await?;
        }

        let sweeper = ExpirySweeper::start(Arc::downgrade(&store), config.sweep_interval);
        *store.sweeper.lock() = Some(sweeper);

        info!(
            path = %store.path.display(),
            encrypted,
            load_mode = ?config.load_mode,
            persist_mode = ?store.persist_mode,
            "Store opened"
        );

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn persist_mode(&self) -> PersistMode {
        self.persist_mode
    }

    /// Returns true once the snapshot has been read.
    pub async fn is_loaded(&self) -> bool {
        self.state.read().await.loaded
    }

    /// Reads the snapshot file into `state`.
    async fn load(&self, state: &mut State) -> StoreResult<()> {
        let Some(text) = snapshot::read_file(&self.path).await? else {
            info!(path = %self.path.display(), "No snapshot file, starting empty");
            state.loaded = true;
            return Ok(());
        };

        let sealed = snapshot::decode_envelope(&text)?;
        let decoded = snapshot::unpack(&sealed, &state.key)?;

        if decoded.format != SnapshotFormat::Versioned {
            info!(format = ?decoded.format, "Upgrading legacy snapshot to the versioned format");
            state.dirty = true;
        }

        state.install(decoded);
        state.loaded = true;

        info!(keys = state.data.len(), "Snapshot loaded");
        Ok(())
    }

    /// Read access, loading the snapshot first if needed.
    ///
    /// The loaded flag is checked under the read lock, then re-checked under
    /// the write lock before the one-time load.
    async fn read_state(&self) -> StoreResult<RwLockReadGuard<'_, State>> {
        let state = self.state.read().await;
        if state.loaded {
            return Ok(state);
        }
        drop(state);

        let mut state = self.state.write().await;
        if !state.loaded {
            self.load(&mut state).await?;
        }
        Ok(state.downgrade())
    }

    /// Write access, loading the snapshot first if needed.
    pub(super) async fn write_state(&self) -> StoreResult<RwLockWriteGuard<'_, State>> {
        let mut state = self.state.write().await;
        if !state.loaded {
            self.load(&mut state).await?;
        }
        Ok(state)
    }

    /// Effective expiry: the call's TTL, else the global TTL, else none.
    /// A TTL too large to represent never expires.
    fn expiry_for(&self, now: Instant, ttl: Option<Duration>) -> Option<Instant> {
        ttl.filter(|ttl| !ttl.is_zero())
            .or(self.global_ttl)
            .and_then(|ttl| now.checked_add(ttl))
    }

    /// Appends a version and recomputes the key's expiry.
    ///
    /// Returns `true` if the key had no versions before.
    fn append(&self, state: &mut State, key: &str, value: String, ttl: Option<Duration>) -> bool {
        let now = Instant::now();

        let versions = state.data.entry(key.to_string()).or_default();
        let is_new = versions.is_empty();
        versions.push(Version::new(value, Utc::now()));

        match self.expiry_for(now, ttl) {
            Some(at) => {
                state.expirations.insert(key.to_string(), at);
            }
            None => {
                state.expirations.remove(key);
            }
        }

        state.dirty = true;
        is_new
    }

    /// Persists after a mutation when configured to.
    async fn after_mutation(&self, state: &mut State) -> StoreResult<()> {
        if self.persist_mode == PersistMode::EveryMutation {
            self.persist_locked(state).await?;
        }
        Ok(())
    }

    /// Writes a snapshot of `state`, evicting expired keys first.
    /// Never writes a store that was not loaded.
    async fn persist_locked(&self, state: &mut State) -> StoreResult<()> {
        if !state.loaded {
            debug!("Snapshot skipped, store was never loaded");
            return Ok(());
        }

        // Snapshots carry no deadlines, so expired keys must not reach disk
        self.purge_locked(state).await;

        let sealed = snapshot::pack(&state.data, &state.key)?;
        let envelope = snapshot::encode_envelope(&sealed);
        snapshot::write_file(&self.path, envelope.as_bytes()).await?;

        state.dirty = false;
        self.counters.snapshots.fetch_add(1, Ordering::Relaxed);
        debug!(keys = state.data.len(), bytes = envelope.len(), "Snapshot written");
        Ok(())
    }

    // ========================================================================
    // OPERATIONS
    // ========================================================================

    /// Appends a new version of `key`.
    ///
    /// The key expires after `ttl` if given and non-zero, else after the
    /// global TTL if one is configured; otherwise any previous expiry is
    /// cleared. Emits `added:<key>` for a new key, `updated:<key>` otherwise.
    pub async fn set(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        self.counters.sets.fetch_add(1, Ordering::Relaxed);
        let key = key.into();

        let mut state = self.write_state().await?;
        let is_new = self.append(&mut state, &key, value.into(), ttl);
        trace!(key = %key, is_new, "Set");

        let event = if is_new {
            Event::Added(key)
        } else {
            Event::Updated(key)
        };
        self.bus.publish(event).await;

        self.after_mutation(&mut state).await
    }

    /// Returns the latest value of `key`.
    ///
    /// Fails with `Expired` once the key's deadline has passed, even if the
    /// sweeper has not removed it yet.
    pub async fn get(&self, key: &str) -> StoreResult<String> {
        self.counters.gets.fetch_add(1, Ordering::Relaxed);

        let state = self.read_state().await?;
        let current = state.current(key)?;
        if state.is_expired(key, Instant::now()) {
            return Err(StoreError::Expired(key.to_string()));
        }
        Ok(current.value.clone())
    }

    /// Returns the value at zero-based version `index`. Ignores expiry.
    pub async fn get_version(&self, key: &str, index: usize) -> StoreResult<String> {
        let state = self.read_state().await?;
        let versions = state.versions(key)?;
        versions
            .get(index)
            .map(|version| version.value.clone())
            .ok_or_else(|| StoreError::VersionNotFound {
                key: key.to_string(),
                index,
                versions: versions.len(),
            })
    }

    /// Returns every value of `key`, oldest first. Ignores expiry.
    pub async fn get_all_versions(&self, key: &str) -> StoreResult<Vec<String>> {
        let state = self.read_state().await?;
        Ok(state
            .versions(key)?
            .iter()
            .map(|version| version.value.clone())
            .collect())
    }

    /// Returns every version of `key` with its timestamp, oldest first.
    /// Ignores expiry.
    pub async fn get_history(&self, key: &str) -> StoreResult<Vec<Version>> {
        let state = self.read_state().await?;
        Ok(state.versions(key)?.to_vec())
    }

    /// Removes one version, keeping the others in order.
    ///
    /// The key's expiry is left alone. Removing the only remaining version
    /// removes the key and emits `deleted:<key>`.
    pub async fn remove_version(&self, key: &str, index: usize) -> StoreResult<()> {
        let mut state = self.write_state().await?;

        let versions = state
            .data
            .get_mut(key)
            .filter(|versions| !versions.is_empty())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        if index >= versions.len() {
            return Err(StoreError::VersionNotFound {
                key: key.to_string(),
                index,
                versions: versions.len(),
            });
        }
        versions.remove(index);
        let emptied = versions.is_empty();
        state.dirty = true;
        trace!(key = %key, index, "Version removed");

        if emptied {
            state.data.remove(key);
            state.expirations.remove(key);
            self.bus.publish(Event::Deleted(key.to_string())).await;
        }

        self.after_mutation(&mut state).await
    }

    /// Appends `new` only if the latest value of `key` equals `expected`.
    ///
    /// The comparison and the append happen under one write lock. Returns
    /// `Ok(false)` without changing anything on a mismatch, and `NotFound`
    /// if the key has no versions. A swap recomputes expiry exactly like
    /// [`set`](Self::set) and emits `updated:<key>`.
    pub async fn compare_and_swap(
        &self,
        key: impl Into<String>,
        expected: &str,
        new: impl Into<String>,
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        let key = key.into();
        let mut state = self.write_state().await?;

        let current = state.current(&key)?;
        if current.value != expected {
            self.counters.cas_misses.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Compare-and-swap mismatch");
            return Ok(false);
        }

        self.append(&mut state, &key, new.into(), ttl);
        self.counters.cas_swaps.fetch_add(1, Ordering::Relaxed);
        trace!(key = %key, "Compare-and-swap applied");

        self.bus.publish(Event::Updated(key)).await;
        self.after_mutation(&mut state).await?;
        Ok(true)
    }

    /// Removes `key`, all its versions and its expiry. Emits `deleted:<key>`.
    pub async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut state = self.write_state().await?;

        if state.data.remove(key).is_none() {
            return Err(StoreError::NotFound(key.to_string()));
        }
        state.expirations.remove(key);
        state.dirty = true;
        self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        trace!(key = %key, "Deleted");

        self.bus.publish(Event::Deleted(key.to_string())).await;
        self.after_mutation(&mut state).await
    }

    /// Returns all keys in the map.
    ///
    /// Keys past their deadline are included until the sweeper removes them.
    pub async fn keys(&self) -> StoreResult<Vec<String>> {
        let state = self.read_state().await?;
        Ok(state.data.keys().cloned().collect())
    }

    /// Number of keys, counted the same way as [`keys`](Self::keys).
    pub async fn len(&self) -> StoreResult<usize> {
        Ok(self.read_state().await?.data.len())
    }

    pub async fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Removes every key whose deadline has passed and emits `expired:<key>`
    /// for each.
    ///
    /// This is what the background sweeper runs on each tick. It does not
    /// trigger a lazy load: an unloaded store has nothing to expire.
    ///
    /// # Returns
    ///
    /// Returns the number of keys that were removed.
    pub async fn purge_expired(&self) -> usize {
        let mut state = self.state.write().await;
        self.purge_locked(&mut state).await
    }

    /// Evicts expired keys from `state` and publishes their events.
    pub(super) async fn purge_locked(&self, state: &mut State) -> usize {
        if !state.loaded || state.expirations.is_empty() {
            return 0;
        }

        let now = Instant::now();
        let expired: Vec<String> = state
            .expirations
            .iter()
            .filter(|(_, at)| now >= **at)
            .map(|(key, _)| key.clone())
            .collect();

        if expired.is_empty() {
            return 0;
        }

        for key in &expired {
            state.expirations.remove(key);
            state.data.remove(key);
            trace!(key = %key, "Key expired");
        }
        state.dirty = true;
        self.counters
            .expired
            .fetch_add(expired.len() as u64, Ordering::Relaxed);

        let count = expired.len();
        for key in expired {
            self.bus.publish(Event::Expired(key)).await;
        }
        count
    }

    /// Writes a snapshot now.
    ///
    /// Keys past their deadline are evicted first. A store that has not been loaded yet is left untouched on disk.
    pub async fn save(&self) -> StoreResult<()> {
        let mut state = self.state.write().await;
        self.persist_locked(&mut state).await
    }

    /// Writes a snapshot if anything changed since the last one.
    ///
    /// # Returns
    ///
    /// Returns `true` if a snapshot was written.
    pub(crate) async fn persist_if_dirty(&self) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        if !state.loaded || !state.dirty {
            return Ok(false);
        }
        self.persist_locked(&mut state).await?;
        Ok(true)
    }

    /// Registers a change listener. See [`NotificationBus::register`].
    pub fn register_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.bus.register(listener)
    }

    pub fn unregister_listener(&self, id: ListenerId) -> bool {
        self.bus.unregister(id)
    }

    /// The notification bus, for its delivery counters.
    pub fn notifications(&self) -> &NotificationBus {
        &self.bus
    }

    /// Returns operation statistics.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            get_ops: self.counters.gets.load(Ordering::Relaxed),
            set_ops: self.counters.sets.load(Ordering::Relaxed),
            del_ops: self.counters.deletes.load(Ordering::Relaxed),
            cas_swaps: self.counters.cas_swaps.load(Ordering::Relaxed),
            cas_misses: self.counters.cas_misses.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
            snapshots: self.counters.snapshots.load(Ordering::Relaxed),
            rotations: self.counters.rotations.load(Ordering::Relaxed),
        }
    }

    /// Shuts the store down.
    ///
    /// Stops the sweeper and waits for it to exit, writes the final snapshot,
    /// then stops notification delivery. Only the first call does anything;
    /// concurrent callers wait for it to finish. A failed final snapshot is
    /// logged, not returned.
    pub async fn stop(&self) {
        self.stopped
            .get_or_init(|| async {
                info!(path = %self.path.display(), "Stopping store");

                let sweeper = self.sweeper.lock().take();
                if let Some(sweeper) = sweeper {
                    sweeper.shutdown().await;
                }

                if let Err(err) = self.save().await {
                    error!(error = %err, path = %self.path.display(), "Failed to write final snapshot");
                }

                self.bus.stop().await;
                info!("Store stopped");
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NotificationConfig, OverflowPolicy};
    use tempfile::TempDir;
    use tokio::sync::mpsc;
    use tokio_test::{assert_err, assert_ok};

    const KEY: &[u8; 32] = b"0123456789abcdef0123456789abcdef";

    /// A config whose sweeper never fires during a test.
    fn config(dir: &TempDir) -> StoreConfig {
        StoreConfig::new(dir.path().join("store.db"))
            .with_encryption_key(KEY)
            .with_sweep_interval(Duration::from_secs(3600))
            .with_persist_mode(PersistMode::OnStop)
    }

    async fn open(dir: &TempDir) -> Arc<Store> {
        Store::open(config(dir)).await.unwrap()
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;

        assert_ok!(store.set("key", "value", None).await);
        assert_eq!(store.get("key").await.unwrap(), "value");
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;

        let err = assert_err!(store.get("missing").await);
        assert!(matches!(err, StoreError::NotFound(k) if k == "missing"));
        assert!(store.get_all_versions("missing").await.is_err());
        assert!(store.get_history("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_versions_accumulate() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;

        store.set("k", "v1", None).await.unwrap();
        store.set("k", "v2", None).await.unwrap();

        assert_eq!(store.get("k").await.unwrap(), "v2");
        assert_eq!(store.get_all_versions("k").await.unwrap(), vec!["v1", "v2"]);
        assert_eq!(store.get_version("k", 0).await.unwrap(), "v1");
        assert_eq!(store.get_version("k", 1).await.unwrap(), "v2");

        let history = store.get_history("k").await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].timestamp <= history[1].timestamp);
        assert_eq!(history[1].value, "v2");
    }

    #[tokio::test]
    async fn test_get_version_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;
        store.set("k", "v1", None).await.unwrap();

        let err = assert_err!(store.get_version("k", 1).await);
        assert!(matches!(
            err,
            StoreError::VersionNotFound { index: 1, versions: 1, .. }
        ));
        assert!(matches!(
            store.get_version("nope", 0).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_version() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;
        for v in ["a", "b", "c"] {
            store.set("k", v, None).await.unwrap();
        }

        store.remove_version("k", 1).await.unwrap();
        assert_eq!(store.get_all_versions("k").await.unwrap(), vec!["a", "c"]);

        assert!(matches!(
            store.remove_version("k", 2).await,
            Err(StoreError::VersionNotFound { .. })
        ));
        assert!(matches!(
            store.remove_version("nope", 0).await,
            Err(StoreError::NotFound(_))
        ));

        // Removing the current version exposes the previous one
        store.remove_version("k", 1).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), "a");

        // Removing the last version removes the key
        store.remove_version("k", 0).await.unwrap();
        assert!(matches!(store.get("k").await, Err(StoreError::NotFound(_))));
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_version_keeps_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;
        store.set("k", "a", None).await.unwrap();
        store
            .set("k", "b", Some(Duration::from_millis(50)))
            .await
            .unwrap();

        store.remove_version("k", 0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(matches!(store.get("k").await, Err(StoreError::Expired(_))));
    }

    #[tokio::test]
    async fn test_compare_and_swap() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;
        store.set("k", "old", None).await.unwrap();

        assert!(store.compare_and_swap("k", "old", "new", None).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), "new");

        // Stale guess: no error, no mutation
        assert!(!store.compare_and_swap("k", "old", "newer", None).await.unwrap());
        assert_eq!(store.get_all_versions("k").await.unwrap(), vec!["old", "new"]);

        let stats = store.stats();
        assert_eq!(stats.cas_swaps, 1);
        assert_eq!(stats.cas_misses, 1);
    }

    #[tokio::test]
    async fn test_compare_and_swap_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;

        assert!(matches!(
            store.compare_and_swap("k", "", "v", None).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_compare_and_swap_sets_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;
        store.set("k", "a", None).await.unwrap();

        assert!(store
            .compare_and_swap("k", "a", "b", Some(Duration::from_millis(50)))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(matches!(store.get("k").await, Err(StoreError::Expired(_))));
    }

    #[tokio::test]
    async fn test_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;

        store.set("k", "v", Some(Duration::from_secs(60))).await.unwrap();
        assert_ok!(store.delete("k").await);
        assert!(matches!(store.get("k").await, Err(StoreError::NotFound(_))));
        assert!(matches!(store.delete("k").await, Err(StoreError::NotFound(_))));

        // A fresh set after delete starts a new history
        store.set("k", "again", None).await.unwrap();
        assert_eq!(store.get_all_versions("k").await.unwrap(), vec!["again"]);
    }

    #[tokio::test]
    async fn test_keys_and_len() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;
        assert!(store.is_empty().await.unwrap());

        store.set("a", "1", None).await.unwrap();
        store.set("b", "2", None).await.unwrap();
        store.set("b", "3", None).await.unwrap();

        let mut keys = store.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(store.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_expiry_is_lazy_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;

        store
            .set("temp", "data", Some(Duration::from_millis(50)))
            .await
            .unwrap();
        assert_eq!(store.get("temp").await.unwrap(), "data");

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(matches!(store.get("temp").await, Err(StoreError::Expired(_))));
        // Still physically present until swept, and history stays readable
        assert_eq!(store.keys().await.unwrap(), vec!["temp"]);
        assert_eq!(store.get_version("temp", 0).await.unwrap(), "data");
    }

    #[tokio::test]
    async fn test_set_without_ttl_clears_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;

        store
            .set("k", "short", Some(Duration::from_millis(50)))
            .await
            .unwrap();
        store.set("k", "forever", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.get("k").await.unwrap(), "forever");
    }

    #[tokio::test]
    async fn test_global_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(config(&dir).with_global_ttl(Duration::from_millis(50)))
            .await
            .unwrap();

        store.set("implicit", "v", None).await.unwrap();
        store.set("zero", "v", Some(Duration::ZERO)).await.unwrap();
        store
            .set("explicit", "v", Some(Duration::from_secs(60)))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(matches!(store.get("implicit").await, Err(StoreError::Expired(_))));
        assert!(matches!(store.get("zero").await, Err(StoreError::Expired(_))));
        assert_eq!(store.get("explicit").await.unwrap(), "v");
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;

        for i in 0..10 {
            store
                .set(format!("key{}", i), "value", Some(Duration::from_millis(20)))
                .await
                .unwrap();
        }
        store.set("persistent", "value", None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(store.purge_expired().await, 10);
        assert_eq!(store.keys().await.unwrap(), vec!["persistent"]);
        assert_eq!(store.purge_expired().await, 0);
        assert_eq!(store.stats().expired, 10);
    }

    #[tokio::test]
    async fn test_notification_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        store.register_listener(move |event| {
            let _ = tx.send(event.to_string());
        });

        store.set("k", "v1", None).await.unwrap();
        store.set("k", "v2", None).await.unwrap();
        assert!(store.compare_and_swap("k", "v2", "v3", None).await.unwrap());
        store.delete("k").await.unwrap();

        let mut received = Vec::new();
        for _ in 0..4 {
            let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            received.push(event);
        }
        assert_eq!(received, vec!["added:k", "updated:k", "updated:k", "deleted:k"]);
    }

    #[tokio::test]
    async fn test_notification_counters() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        store.register_listener(move |event| {
            let _ = tx.send(event.to_string());
        });

        store.set("k", "v", None).await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, "added:k");

        // stop() joins the dispatcher, so the counters are settled afterwards
        store.stop().await;
        assert_eq!(store.notifications().delivered(), 1);
        assert_eq!(store.notifications().dropped(), 0);

        // Mutations after stop still apply, but their events go nowhere
        store.set("k", "v2", None).await.unwrap();
        assert_eq!(store.notifications().dropped(), 1);
        assert_eq!(store.notifications().delivered(), 1);
        assert_eq!(store.get("k").await.unwrap(), "v2");
    }

    #[tokio::test]
    async fn test_purge_emits_expired_events() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        store.register_listener(move |event| {
            if let Event::Expired(key) = event {
                let _ = tx.send(key.clone());
            }
        });

        store
            .set("session", "abc", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        store.purge_expired().await;

        let key = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(key, "session");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sets_and_gets() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(config(&dir).with_notifications(NotificationConfig {
            capacity: 10,
            overflow: OverflowPolicy::Grow,
        }))
        .await
        .unwrap();

        let mut handles = Vec::new();
        for i in 0..100 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .set(format!("key{}", i), format!("value{}", i), None)
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let mut handles = Vec::new();
        for i in 0..100 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                (i, store.get(&format!("key{}", i)).await)
            }));
        }
        for handle in handles {
            let (i, value) = handle.await.unwrap();
            assert_eq!(value.unwrap(), format!("value{}", i));
        }

        assert_eq!(store.len().await.unwrap(), 100);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_compare_and_swap() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;
        store.set("counter", "initial", None).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..10 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .compare_and_swap("counter", "initial", format!("new{}", i), None)
                    .await
            }));
        }

        let mut swapped = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() {
                swapped += 1;
            }
        }
        assert_eq!(swapped, 1);

        let value = store.get("counter").await.unwrap();
        assert!(value.starts_with("new"));
        assert_eq!(store.get_all_versions("counter").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_key_length() {
        let dir = tempfile::tempdir().unwrap();
        let result = Store::open(config(&dir).with_encryption_key("encryptionKey")).await;
        assert!(matches!(result, Err(StoreError::InvalidKeyLength(13))));
    }

    #[tokio::test]
    async fn test_stats() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;

        store.set("k", "v", None).await.unwrap();
        let _ = store.get("k").await;
        let _ = store.get("missing").await;
        store.delete("k").await.unwrap();

        let stats = store.stats();
        assert_eq!(stats.set_ops, 1);
        assert_eq!(stats.get_ops, 2);
        assert_eq!(stats.del_ops, 1);
        assert_eq!(stats.snapshots, 0);
    }
}
