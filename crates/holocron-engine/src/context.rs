//! Per-request state

use crate::batch::{LoaderKind, StoreBatch};
use crate::loader::{BatchLoader, LoaderStats};
use holocron_core::{EntityKind, Relationship};
use holocron_storage::StorageBackend;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use ulid::Ulid;

pub type StoreLoader<S> = BatchLoader<StoreBatch<S>>;

/// Owns the loaders of one request
///
/// Created at the start of a request and dropped at its end, so no cached
/// row outlives the request that read it.
pub struct RequestContext<S: StorageBackend + ?Sized + 'static> {
    id: Ulid,
    storage: Arc<S>,
    max_batch_size: Option<usize>,
    loaders: Mutex<HashMap<LoaderKind, Arc<StoreLoader<S>>>>,
}

impl<S: StorageBackend + ?Sized + 'static> RequestContext<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            id: Ulid::new(),
            storage,
            max_batch_size: None,
            loaders: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_max_batch_size(mut self, size: Option<usize>) -> Self {
        self.max_batch_size = size;
        self
    }

    pub fn id(&self) -> Ulid {
        self.id
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Loader for a relationship, created on first use
    pub fn register(&self, relationship: Relationship) -> Arc<StoreLoader<S>> {
        self.loader(LoaderKind::Related(relationship))
    }

    /// Loader for rows of one kind by id
    pub fn entities(&self, kind: EntityKind) -> Arc<StoreLoader<S>> {
        self.loader(LoaderKind::ById(kind))
    }

    fn loader(&self, kind: LoaderKind) -> Arc<StoreLoader<S>> {
        let mut loaders = self.loaders.lock().unwrap_or_else(PoisonError::into_inner);
        let loader = loaders.entry(kind).or_insert_with(|| {
            tracing::trace!("Request {} registered loader {}", self.id, kind);
            Arc::new(
                BatchLoader::new(StoreBatch::new(Arc::clone(&self.storage), kind))
                    .with_max_batch_size(self.max_batch_size),
            )
        });
        Arc::clone(loader)
    }

    /// Counters of every loader this request used
    pub fn stats(&self) -> BTreeMap<LoaderKind, LoaderStats> {
        let loaders = self.loaders.lock().unwrap_or_else(PoisonError::into_inner);
        loaders
            .iter()
            .map(|(kind, loader)| (*kind, loader.stats()))
            .collect()
    }

    /// Stats for one loader, zero if it was never used
    pub fn stats_for(&self, kind: LoaderKind) -> LoaderStats {
        self.stats().remove(&kind).unwrap_or_default()
    }

    /// Total batches issued across every loader
    pub fn batch_count(&self) -> usize {
        self.stats().values().map(|s| s.batches).sum()
    }
}
