//! Storage backend trait definitions

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use holocron_core::{
    invariants, Dataset, Direction, EdgePair, EdgeType, Entity, EntityId, EntityKind, Predicate,
};

/// Trait for storage backend implementations
///
/// The read side lives here. All writes go through a [`UnitOfWork`]
/// obtained from [`StorageBackend::begin`], so a caller can never change one
/// table without the chance to roll the whole step back.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Initialize the storage (create tables, etc.)
    async fn initialize(&self) -> StorageResult<()>;

    /// Close the storage; later calls fail with `Unavailable`
    async fn close(&self) -> StorageResult<()>;

    /// Health check
    async fn health_check(&self) -> StorageResult<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // Row Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Get a row by id, `NotFound` if absent
    async fn get_by_id(&self, kind: EntityKind, id: &EntityId) -> StorageResult<Entity>;

    /// Get many rows by id in one call; absent ids are skipped
    async fn get_many(&self, kind: EntityKind, ids: &[EntityId]) -> StorageResult<Vec<Entity>>;

    /// All rows matching a predicate, ordered by id
    async fn find_by_predicate(
        &self,
        kind: EntityKind,
        predicate: &Predicate,
    ) -> StorageResult<Vec<Entity>>;

    /// All rows of a kind, ordered by id
    async fn list(&self, kind: EntityKind) -> StorageResult<Vec<Entity>> {
        self.find_by_predicate(kind, &Predicate::All).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Edge Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Edge pairs whose `direction` source is one of `ids`
    async fn edges(
        &self,
        edge_type: EdgeType,
        direction: Direction,
        ids: &[EntityId],
    ) -> StorageResult<Vec<EdgePair>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Transactions
    // ─────────────────────────────────────────────────────────────────────────

    /// Monotonic version, bumped by every commit
    async fn version(&self) -> StorageResult<u64>;

    /// Open a unit of work. Units are serialized: a second caller waits
    /// until the first commits or rolls back.
    async fn begin(&self) -> StorageResult<Box<dyn UnitOfWork>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Bulk Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Load every row and edge
    async fn load_dataset(&self) -> StorageResult<Dataset> {
        let mut dataset = Dataset::new();
        for kind in EntityKind::ALL {
            for entity in self.list(kind).await? {
                match entity {
                    Entity::Character(c) => dataset.characters.push(c),
                    Entity::Planet(p) => dataset.planets.push(p),
                    Entity::Starship(s) => dataset.starships.push(s),
                    Entity::Film(f) => dataset.films.push(f),
                    Entity::Kill(k) => dataset.kills.push(k),
                }
            }
        }
        let character_ids: Vec<EntityId> =
            dataset.characters.iter().map(|c| c.id.clone()).collect();
        dataset.pilots = self
            .edges(EdgeType::Piloting, Direction::Outgoing, &character_ids)
            .await?;
        dataset.appearances = self
            .edges(EdgeType::Appearance, Direction::Outgoing, &character_ids)
            .await?;
        Ok(dataset)
    }

    /// Import a dataset as a single unit of work (all or nothing)
    async fn import_dataset(&self, dataset: &Dataset) -> StorageResult<u64> {
        let violations = invariants::audit(dataset);
        if !violations.is_empty() {
            return Err(StorageError::Inconsistent(violations));
        }

        let mut uow = self.begin().await?;
        match apply_dataset(uow.as_mut(), dataset).await {
            Ok(()) => uow.commit().await,
            Err(e) => {
                uow.rollback().await?;
                Err(e)
            }
        }
    }
}

async fn apply_dataset(uow: &mut dyn UnitOfWork, dataset: &Dataset) -> StorageResult<()> {
    // Referenced rows first so every foreign key resolves on insert
    for planet in &dataset.planets {
        uow.insert(planet.clone().into()).await?;
    }
    for starship in &dataset.starships {
        uow.insert(starship.clone().into()).await?;
    }
    for film in &dataset.films {
        uow.insert(film.clone().into()).await?;
    }
    for character in &dataset.characters {
        uow.insert(character.clone().into()).await?;
    }
    for kill in &dataset.kills {
        uow.insert(kill.clone().into()).await?;
    }
    for edge_type in EdgeType::ALL {
        for pair in dataset.edges(edge_type) {
            uow.add_edge(edge_type, &pair.character_id, &pair.target_id)
                .await?;
        }
    }
    Ok(())
}

/// One transactional unit of store writes
///
/// Reads through the unit see its own uncommitted writes. Nothing becomes
/// visible to other readers until [`UnitOfWork::commit`]. Dropping a unit
/// without committing discards it.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    /// Get a row by id, including rows inserted by this unit
    async fn get_by_id(&self, kind: EntityKind, id: &EntityId) -> StorageResult<Entity>;

    /// Whether a row exists
    async fn exists(&self, kind: EntityKind, id: &EntityId) -> StorageResult<bool> {
        match self.get_by_id(kind, id).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// All rows matching a predicate, ordered by id
    async fn find_by_predicate(
        &self,
        kind: EntityKind,
        predicate: &Predicate,
    ) -> StorageResult<Vec<Entity>>;

    /// Whether an edge pair is present
    async fn has_edge(&self, edge_type: EdgeType, pair: &EdgePair) -> StorageResult<bool>;

    /// Insert a row. An empty id is replaced with a fresh one; a supplied id
    /// must be unused. Returns the row's id.
    async fn insert(&mut self, entity: Entity) -> StorageResult<EntityId>;

    /// Add an edge to both directions of an edge set in one step.
    /// Idempotent: returns `false` when the pair already existed.
    async fn add_edge(
        &mut self,
        edge_type: EdgeType,
        character_id: &EntityId,
        target_id: &EntityId,
    ) -> StorageResult<bool>;

    /// Set one scalar field of a row
    async fn update_scalar(
        &mut self,
        kind: EntityKind,
        id: &EntityId,
        field: &str,
        value: serde_json::Value,
    ) -> StorageResult<Entity>;

    /// Publish every write atomically; returns the new store version
    async fn commit(self: Box<Self>) -> StorageResult<u64>;

    /// Discard every write of this unit
    async fn rollback(self: Box<Self>) -> StorageResult<()>;
}
