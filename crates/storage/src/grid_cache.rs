//! Build-once cache keyed on grid fingerprint.
//!
//! Building a spatial index over the 1.9M-cell HRRR grid takes far longer
//! than reading a message, while every file in a run shares the same
//! geometry. Entries are built at most once per fingerprint: concurrent
//! callers for the same key wait on one construction, callers for other
//! keys proceed independently, and a failed build leaves the slot empty so
//! the next caller retries.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use projection::{GridFingerprint, GridIndex, ProjectionError};
use tokio::sync::OnceCell;
use tracing::debug;

/// Statistics for a fingerprint cache.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Completed constructions; at most one per fingerprint
    pub builds: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

type Slot<V> = Arc<OnceCell<Arc<V>>>;

/// Process-wide map from grid fingerprint to a shared, immutable value.
pub struct FingerprintCache<V> {
    slots: Mutex<HashMap<GridFingerprint, Slot<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    builds: AtomicU64,
}

/// Cache of nearest-neighbour indexes.
pub type GridIndexCache = FingerprintCache<GridIndex>;

impl<V> Default for FingerprintCache<V> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            builds: AtomicU64::new(0),
        }
    }
}

impl<V> FingerprintCache<V>
where
    V: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, fingerprint: GridFingerprint) -> Slot<V> {
        // A panic while holding the lock cannot leave the map inconsistent
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.entry(fingerprint).or_default().clone()
    }

    /// Return the cached value, running `build` if this fingerprint has none yet.
    pub async fn get_or_try_build<F, Fut, E>(
        &self,
        fingerprint: GridFingerprint,
        build: F,
    ) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let slot = self.slot(fingerprint);

        if let Some(value) = slot.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value.clone());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let value = slot
            .get_or_try_init(|| async {
                debug!(fingerprint = %fingerprint.short(), "Building cache entry");
                let value = build().await?;
                self.builds.fetch_add(1, Ordering::Relaxed);
                Ok::<_, E>(Arc::new(value))
            })
            .await?;

        Ok(value.clone())
    }

    /// Value for `fingerprint` if it has already been built.
    pub fn get(&self, fingerprint: &GridFingerprint) -> Option<Arc<V>> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.get(fingerprint).and_then(|slot| slot.get().cloned())
    }

    pub fn stats(&self) -> CacheStats {
        let entries = {
            let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.values().filter(|slot| slot.initialized()).count()
        };
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            builds: self.builds.load(Ordering::Relaxed),
            entries,
        }
    }
}

impl GridIndexCache {
    /// Return the index for `fingerprint`, building it from explicit
    /// coordinates on a blocking thread if needed.
    pub async fn get_or_build(
        &self,
        fingerprint: GridFingerprint,
        ni: usize,
        nj: usize,
        lats: Vec<f64>,
        lons: Vec<f64>,
    ) -> Result<Arc<GridIndex>, ProjectionError> {
        self.get_or_try_build(fingerprint, || async move {
            tokio::task::spawn_blocking(move || GridIndex::build(fingerprint, ni, nj, lats, lons))
                .await
                .unwrap_or_else(|e| Err(ProjectionError::Aborted(e.to_string())))
        })
        .await
    }
}
