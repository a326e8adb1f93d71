//! Per-request batch loader
//!
//! `load` only registers a key and hands back a [`LoadHandle`]. Nothing is
//! fetched until some handle is awaited; at that point every key registered
//! so far goes to the store in a single [`BatchFn::load_batch`] call. Results
//! (errors included) are cached for the lifetime of the loader, which is
//! one request.

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use holocron_core::{Error, Result};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt::Debug;
use std::future::IntoFuture;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Fetches values for many keys at once
#[async_trait]
pub trait BatchFn: Send + Sync {
    type Key: Clone + Eq + Hash + Ord + Debug + Send + Sync;
    type Value: Clone + Send + Sync;

    /// Keys missing from the returned map resolve to an empty sequence
    async fn load_batch(&self, keys: &[Self::Key]) -> Result<HashMap<Self::Key, Vec<Self::Value>>>;
}

/// Counters for one loader
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoaderStats {
    /// `load_batch` calls issued
    pub batches: usize,
    /// Distinct keys sent to the store
    pub keys_fetched: usize,
    /// `load` calls answered from the cache or an already pending key
    pub cache_hits: usize,
}

type Cached<V> = Result<Arc<Vec<V>>>;

struct LoaderState<K, V> {
    pending: BTreeSet<K>,
    cache: HashMap<K, Cached<V>>,
    stats: LoaderStats,
}

/// Coalesces lookups into batches and caches the results
pub struct BatchLoader<F: BatchFn> {
    batch_fn: F,
    max_batch_size: Option<usize>,
    state: Mutex<LoaderState<F::Key, F::Value>>,
    // Held across a fetch so a concurrent awaiter waits for the in-flight
    // batch instead of issuing its own
    dispatch: tokio::sync::Mutex<()>,
}

impl<F: BatchFn + 'static> BatchLoader<F> {
    pub fn new(batch_fn: F) -> Self {
        Self {
            batch_fn,
            max_batch_size: None,
            state: Mutex::new(LoaderState {
                pending: BTreeSet::new(),
                cache: HashMap::new(),
                stats: LoaderStats::default(),
            }),
            dispatch: tokio::sync::Mutex::new(()),
        }
    }

    /// Split batches larger than `size` keys into several fetches
    pub fn with_max_batch_size(mut self, size: Option<usize>) -> Self {
        self.max_batch_size = size.filter(|s| *s > 0);
        self
    }

    // The state lock is never held across an await, so a poisoned lock can
    // only hold fully written data
    fn state(&self) -> MutexGuard<'_, LoaderState<F::Key, F::Value>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a key for the next batch. Never touches the store.
    pub fn load(self: &Arc<Self>, key: F::Key) -> LoadHandle<F> {
        let mut state = self.state();
        if state.cache.contains_key(&key) || state.pending.contains(&key) {
            state.stats.cache_hits += 1;
        } else {
            state.pending.insert(key.clone());
        }
        LoadHandle {
            loader: Arc::clone(self),
            key,
        }
    }

    /// Seed the cache with a value the caller already holds
    pub fn prime(&self, key: F::Key, values: Vec<F::Value>) {
        let mut state = self.state();
        state.pending.remove(&key);
        state.cache.entry(key).or_insert_with(|| Ok(Arc::new(values)));
    }

    pub fn stats(&self) -> LoaderStats {
        self.state().stats
    }

    fn cached(&self, key: &F::Key) -> Option<Cached<F::Value>> {
        self.state().cache.get(key).cloned()
    }

    async fn get(&self, key: F::Key) -> Cached<F::Value> {
        if let Some(hit) = self.cached(&key) {
            return hit;
        }

        let _dispatch = self.dispatch.lock().await;
        // A batch that finished while we waited may already hold the key
        if let Some(hit) = self.cached(&key) {
            return hit;
        }

        let keys: Vec<F::Key> = {
            let mut state = self.state();
            state.pending.insert(key.clone());
            std::mem::take(&mut state.pending).into_iter().collect()
        };
        self.flush(keys).await;

        self.cached(&key).unwrap_or_else(|| {
            Err(Error::Internal(format!(
                "batch loader lost key {:?}",
                key
            )))
        })
    }

    async fn flush(&self, keys: Vec<F::Key>) {
        let chunk_size = self.max_batch_size.unwrap_or(keys.len()).max(1);

        for chunk in keys.chunks(chunk_size) {
            tracing::trace!("Dispatching batch of {} keys", chunk.len());
            let outcome = self.batch_fn.load_batch(chunk).await;

            let mut state = self.state();
            state.stats.batches += 1;
            state.stats.keys_fetched += chunk.len();
            match outcome {
                Ok(mut found) => {
                    for key in chunk {
                        let values = found.remove(key).unwrap_or_default();
                        state.cache.insert(key.clone(), Ok(Arc::new(values)));
                    }
                }
                Err(e) => {
                    tracing::debug!("Batch of {} keys failed: {}", chunk.len(), e);
                    for key in chunk {
                        state.cache.insert(key.clone(), Err(e.clone()));
                    }
                }
            }
        }
    }
}

/// A registered, not yet resolved key. Await it to get the values.
pub struct LoadHandle<F: BatchFn> {
    loader: Arc<BatchLoader<F>>,
    key: F::Key,
}

impl<F: BatchFn + 'static> LoadHandle<F> {
    pub fn key(&self) -> &F::Key {
        &self.key
    }
}

impl<F: BatchFn + 'static> IntoFuture for LoadHandle<F> {
    type Output = Cached<F::Value>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        async move { self.loader.get(self.key).await }.boxed()
    }
}
