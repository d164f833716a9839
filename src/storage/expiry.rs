//! Background Expiry Sweeper
//!
//! A Tokio task that wakes on a fixed interval and removes keys whose
//! deadline has passed ("active expiry"), as opposed to the check `get`
//! performs on access ("lazy expiry").
//!
//! Lazy expiry alone would keep a key that is never read again in memory,
//! and in the snapshot, forever.
//!
//! ## Design
//!
//! On each tick the sweeper:
//! 1. Upgrades its weak handle to the store (exits if the store is gone)
//! 2. Purges expired keys, which emits `expired:<key>` for each
//! 3. In [`PersistMode::Periodic`], writes a snapshot if anything changed
//!
//! A failed periodic snapshot is logged and retried on the next tick.

use crate::config::PersistMode;
use crate::storage::Store;
use std::sync::Weak;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Shortest interval the sweeper will run at.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// A handle to the running expiry sweeper.
///
/// When this handle is dropped, the sweeper task will be stopped.
#[derive(Debug)]
pub struct ExpirySweeper {
    /// Sender to signal shutdown
    shutdown_tx: watch::Sender<bool>,

    handle: Option<JoinHandle<()>>,
}

impl ExpirySweeper {
    /// Starts the expiry sweeper as a background task.
    ///
    /// # Arguments
    ///
    /// * `store` - The store to sweep; the sweeper never keeps it alive
    /// * `interval` - Time between sweeps
    ///
    /// # Returns
    ///
    /// Returns a handle that can be used to stop the sweeper.
    /// The sweeper will automatically stop when the handle is dropped.
    pub fn start(store: Weak<Store>, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let interval = interval.max(MIN_INTERVAL);

        let handle = tokio::spawn(sweeper_loop(store, interval, shutdown_rx));

        info!(interval_ms = interval.as_millis() as u64, "Background expiry sweeper started");

        Self {
            shutdown_tx,
            handle: Some(handle),
        }
    }

    /// Signals the sweeper to stop without waiting for it.
    ///
    /// This is called automatically when the handle is dropped.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Stops the sweeper and waits until its task has exited.
    ///
    /// A tick already in progress finishes first.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "Expiry sweeper task failed");
            }
        }
        info!("Background expiry sweeper stopped");
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The main sweeper loop.
async fn sweeper_loop(
    store: Weak<Store>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        // Wait for the interval or shutdown signal
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper received shutdown signal");
                    return;
                }
            }
        }

        let Some(store) = store.upgrade() else {
            debug!("Store dropped, expiry sweeper exiting");
            return;
        };

        let expired = store.purge_expired().await;
        if expired > 0 {
            debug!(expired, "Expired keys cleaned up");
        }

        if store.persist_mode() == PersistMode::Periodic {
            match store.persist_if_dirty().await {
                Ok(true) => trace!("Periodic snapshot written"),
                Ok(false) => {}
                Err(err) => {
                    warn!(error = %err, "Periodic snapshot failed, retrying next tick");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{PersistMode, StoreConfig};
    use crate::error::StoreError;
    use crate::storage::Store;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn config(dir: &tempfile::TempDir, interval: Duration) -> StoreConfig {
        StoreConfig::new(dir.path().join("sweep.db"))
            .with_sweep_interval(interval)
            .with_persist_mode(PersistMode::OnStop)
    }

    #[tokio::test]
    async fn test_sweeper_cleans_expired_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(config(&dir, Duration::from_millis(10)))
            .await
            .unwrap();

        // Add some keys with short TTL
        for i in 0..10 {
            store
                .set(format!("key{}", i), "value", Some(Duration::from_millis(50)))
                .await
                .unwrap();
        }

        // Add a persistent key
        store.set("persistent", "value", None).await.unwrap();
        assert_eq!(store.len().await.unwrap(), 11);

        // Wait for keys to expire and be cleaned up
        tokio::time::sleep(Duration::from_millis(200)).await;

        // Only the persistent key should remain
        assert_eq!(store.keys().await.unwrap(), vec!["persistent"]);
        assert!(matches!(
            store.get("key0").await,
            Err(StoreError::NotFound(_))
        ));
        assert_eq!(store.stats().expired, 10);
    }

    #[tokio::test]
    async fn test_sweeper_emits_expired() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(config(&dir, Duration::from_millis(10)))
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        store.register_listener(move |event| {
            let _ = tx.send(event.to_string());
        });

        store
            .set("session", "token", Some(Duration::from_millis(20)))
            .await
            .unwrap();

        let mut seen = Vec::new();
        while seen.len() < 2 {
            let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            seen.push(event);
        }
        assert_eq!(seen, vec!["added:session", "expired:session"]);
    }

    #[tokio::test]
    async fn test_sweeper_halts_after_stop() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(config(&dir, Duration::from_millis(10)))
            .await
            .unwrap();

        store.stop().await;

        // Keys set after the sweeper stopped are never swept
        store
            .set("key", "value", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(store.keys().await.unwrap(), vec!["key"]);
        // but get() still refuses them
        assert!(matches!(store.get("key").await, Err(StoreError::Expired(_))));
    }

    #[tokio::test]
    async fn test_periodic_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(
            config(&dir, Duration::from_millis(10)).with_persist_mode(PersistMode::Periodic),
        )
        .await
        .unwrap();

        store.set("k", "v", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(store.path().exists());
        let written = store.stats().snapshots;
        assert!(written >= 1);

        // Nothing changed, so no further snapshots
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.stats().snapshots, written);
    }

    #[tokio::test]
    async fn test_sweeper_does_not_keep_store_alive() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(config(&dir, Duration::from_millis(10)))
            .await
            .unwrap();
        let weak = Arc::downgrade(&store);

        drop(store);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(weak.upgrade().is_none());
    }
}
