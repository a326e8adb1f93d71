//! In-memory storage backend
//!
//! Units of work are copy-on-write: `begin` takes the writer lock and clones
//! the live tables into a shadow, every write lands in the shadow, and
//! `commit` swaps the shadow in under the table lock. Readers therefore see
//! either the state before a mutation or the state after it, never a
//! half-applied one, and rollback is simply dropping the shadow.

use crate::edge_table::EdgeTable;
use crate::error::{StorageError, StorageResult};
use crate::traits::{StorageBackend, UnitOfWork};
use async_trait::async_trait;
use holocron_core::invariants::{self, Violation, ViolationCode};
use holocron_core::{
    Dataset, Direction, EdgePair, EdgeType, Entity, EntityId, EntityKind, KillEvent, Predicate,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Configuration for [`MemoryStorage`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// How long `begin` waits for the writer lock before reporting a conflict
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_lock_timeout_ms() -> u64 {
    2000
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl StorageConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[derive(Debug, Clone, Default)]
struct Tables {
    rows: BTreeMap<EntityKind, BTreeMap<EntityId, Entity>>,
    pilots: EdgeTable,
    appearances: EdgeTable,
    version: u64,
}

impl Tables {
    /// Build tables from an already audited dataset
    fn from_dataset(dataset: &Dataset) -> Self {
        let mut tables = Self::default();
        for kind in EntityKind::ALL {
            let table = tables.rows.entry(kind).or_default();
            for entity in dataset.entities(kind) {
                table.insert(entity.id().clone(), entity);
            }
        }
        for edge_type in EdgeType::ALL {
            for pair in dataset.edges(edge_type) {
                tables.edges_mut(edge_type).insert(pair.clone());
            }
        }
        tables
    }

    fn to_dataset(&self) -> Dataset {
        let mut dataset = Dataset::new();
        for entity in self.rows.values().flat_map(|t| t.values()).cloned() {
            match entity {
                Entity::Character(c) => dataset.characters.push(c),
                Entity::Planet(p) => dataset.planets.push(p),
                Entity::Starship(s) => dataset.starships.push(s),
                Entity::Film(f) => dataset.films.push(f),
                Entity::Kill(k) => dataset.kills.push(k),
            }
        }
        dataset.pilots = self.pilots.pairs();
        dataset.appearances = self.appearances.pairs();
        dataset
    }

    fn get(&self, kind: EntityKind, id: &EntityId) -> Option<&Entity> {
        self.rows.get(&kind).and_then(|t| t.get(id))
    }

    fn contains(&self, kind: EntityKind, id: &EntityId) -> bool {
        self.get(kind, id).is_some()
    }

    fn require(&self, kind: EntityKind, id: &EntityId) -> StorageResult<&Entity> {
        self.get(kind, id)
            .ok_or_else(|| StorageError::not_found(kind, id))
    }

    fn find(&self, kind: EntityKind, predicate: &Predicate) -> Vec<Entity> {
        match predicate {
            // Point lookups instead of a scan
            Predicate::IdIn(ids) => ids
                .iter()
                .filter_map(|id| self.get(kind, id))
                .cloned()
                .collect(),
            _ => self
                .rows
                .get(&kind)
                .map(|t| t.values().filter(|e| predicate.matches(e)).cloned().collect())
                .unwrap_or_default(),
        }
    }

    fn edges(&self, edge_type: EdgeType) -> &EdgeTable {
        match edge_type {
            EdgeType::Piloting => &self.pilots,
            EdgeType::Appearance => &self.appearances,
        }
    }

    fn edges_mut(&mut self, edge_type: EdgeType) -> &mut EdgeTable {
        match edge_type {
            EdgeType::Piloting => &mut self.pilots,
            EdgeType::Appearance => &mut self.appearances,
        }
    }

    fn death_of(&self, victim_id: &EntityId) -> Option<&KillEvent> {
        self.rows
            .get(&EntityKind::Kill)?
            .values()
            .filter_map(Entity::as_kill)
            .find(|k| &k.victim_id == victim_id)
    }

    /// Next unused id for a kind: one past the largest numeric id
    fn next_id(&self, kind: EntityKind) -> EntityId {
        let max = self
            .rows
            .get(&kind)
            .map(|t| t.keys().filter_map(EntityId::numeric).max().unwrap_or(0))
            .unwrap_or(0);
        // Past u64::MAX, wrap and take the first free number from 1
        let mut candidate = max.checked_add(1).unwrap_or(1);
        while self.contains(kind, &EntityId::new(candidate.to_string())) {
            candidate = candidate.checked_add(1).unwrap_or(1);
        }
        EntityId::new(candidate.to_string())
    }

    /// Row-level integrity rules, enforced on every insert and update
    fn check_row(&self, entity: &Entity) -> Result<(), Violation> {
        match entity {
            Entity::Character(c) => {
                invariants::validate_name(&c.name)?;
                if let Some(homeworld) = &c.homeworld_id {
                    invariants::require_reference(
                        EntityKind::Planet,
                        homeworld,
                        self.contains(EntityKind::Planet, homeworld),
                    )?;
                }
            }
            Entity::Planet(p) => {
                invariants::validate_name(&p.name)?;
                if let Some(population) = p.population {
                    invariants::check_population(&p.id, population)?;
                }
            }
            Entity::Starship(s) => invariants::validate_name(&s.name)?,
            Entity::Film(f) => invariants::validate_name(&f.title)?,
            Entity::Kill(k) => {
                for id in [&k.killer_id, &k.victim_id] {
                    invariants::require_reference(
                        EntityKind::Character,
                        id,
                        self.contains(EntityKind::Character, id),
                    )?;
                }
                invariants::check_not_self_kill(&k.killer_id, &k.victim_id)?;
                let prior = self.death_of(&k.victim_id).filter(|prior| prior.id != k.id);
                invariants::check_no_prior_death(&k.victim_id, prior)?;
            }
        }
        Ok(())
    }

    fn insert(&mut self, mut entity: Entity) -> StorageResult<EntityId> {
        let kind = entity.kind();
        if entity.id().as_str().is_empty() {
            entity.set_id(self.next_id(kind));
        } else if self.contains(kind, entity.id()) {
            return Err(Violation::new(
                ViolationCode::DuplicateId,
                format!("{} id {} is already in use", kind, entity.id()),
            )
            .with_subject(kind, entity.id().clone())
            .into());
        }
        self.check_row(&entity)?;

        let id = entity.id().clone();
        self.rows.entry(kind).or_default().insert(id.clone(), entity);
        Ok(id)
    }

    fn add_edge(
        &mut self,
        edge_type: EdgeType,
        character_id: &EntityId,
        target_id: &EntityId,
    ) -> StorageResult<bool> {
        invariants::require_reference(
            EntityKind::Character,
            character_id,
            self.contains(EntityKind::Character, character_id),
        )?;
        let target_kind = edge_type.target_kind();
        invariants::require_reference(
            target_kind,
            target_id,
            self.contains(target_kind, target_id),
        )?;

        Ok(self
            .edges_mut(edge_type)
            .insert(EdgePair::new(character_id.clone(), target_id.clone())))
    }

    fn update_scalar(
        &mut self,
        kind: EntityKind,
        id: &EntityId,
        field: &str,
        value: serde_json::Value,
    ) -> StorageResult<Entity> {
        let current = self.require(kind, id)?.clone();

        // Kill events are append-only
        if field == "id" || kind == EntityKind::Kill {
            return Err(Violation::new(
                ViolationCode::ImmutableField,
                format!("{}.{} cannot be changed", kind, field),
            )
            .with_subject(kind, id.clone())
            .into());
        }
        if !kind.has_scalar(field) {
            return Err(Violation::new(
                ViolationCode::UnknownField,
                format!("{} has no field '{}'", kind, field),
            )
            .with_subject(kind, id.clone())
            .into());
        }

        let mut json = serde_json::to_value(&current)?;
        if let Some(object) = json.as_object_mut() {
            object.insert(field.to_string(), value);
        }
        let updated: Entity = serde_json::from_value(json).map_err(|e| {
            Violation::new(
                ViolationCode::InvalidValue,
                format!("Invalid value for {}.{}: {}", kind, field, e),
            )
            .with_subject(kind, id.clone())
        })?;
        self.check_row(&updated)?;

        self.rows
            .entry(kind)
            .or_default()
            .insert(id.clone(), updated.clone());
        Ok(updated)
    }
}

/// In-memory storage backend
///
/// Serves as the reference backend and the one used by tests.
pub struct MemoryStorage {
    tables: Arc<RwLock<Tables>>,
    writer: Arc<Mutex<()>>,
    closed: Arc<AtomicBool>,
    fetches: AtomicU64,
    config: StorageConfig,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::with_config(StorageConfig::default())
    }

    pub fn with_config(config: StorageConfig) -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            writer: Arc::new(Mutex::new(())),
            closed: Arc::new(AtomicBool::new(false)),
            fetches: AtomicU64::new(0),
            config,
        }
    }

    /// Build a store holding `dataset`, rejecting it if any invariant fails
    pub fn from_dataset(dataset: &Dataset) -> StorageResult<Self> {
        Self::from_dataset_with_config(dataset, StorageConfig::default())
    }

    pub fn from_dataset_with_config(
        dataset: &Dataset,
        config: StorageConfig,
    ) -> StorageResult<Self> {
        let violations = invariants::audit(dataset);
        if !violations.is_empty() {
            return Err(StorageError::Inconsistent(violations));
        }
        let storage = Self::with_config(config);
        {
            let mut tables = storage
                .tables
                .write()
                .map_err(|e| StorageError::Database(format!("Lock error: {}", e)))?;
            *tables = Tables::from_dataset(dataset);
        }
        tracing::debug!("Seeded memory storage with {} rows", dataset.row_count());
        Ok(storage)
    }

    /// Number of row/edge reads served, for observing batching
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("memory storage is closed".to_string()));
        }
        Ok(())
    }

    fn read_tables(&self) -> StorageResult<RwLockReadGuard<'_, Tables>> {
        self.ensure_open()?;
        self.tables
            .read()
            .map_err(|e| StorageError::Database(format!("Lock error: {}", e)))
    }

    fn fetch_tables(&self) -> StorageResult<RwLockReadGuard<'_, Tables>> {
        let tables = self.read_tables()?;
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(tables)
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn initialize(&self) -> StorageResult<()> {
        self.ensure_open()
    }

    async fn close(&self) -> StorageResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        tracing::debug!("Memory storage closed");
        Ok(())
    }

    async fn health_check(&self) -> StorageResult<bool> {
        Ok(!self.closed.load(Ordering::SeqCst))
    }

    // Row operations

    async fn get_by_id(&self, kind: EntityKind, id: &EntityId) -> StorageResult<Entity> {
        let tables = self.fetch_tables()?;
        tables.require(kind, id).cloned()
    }

    async fn get_many(&self, kind: EntityKind, ids: &[EntityId]) -> StorageResult<Vec<Entity>> {
        let tables = self.fetch_tables()?;
        let unique: BTreeSet<&EntityId> = ids.iter().collect();
        Ok(unique
            .into_iter()
            .filter_map(|id| tables.get(kind, id))
            .cloned()
            .collect())
    }

    async fn find_by_predicate(
        &self,
        kind: EntityKind,
        predicate: &Predicate,
    ) -> StorageResult<Vec<Entity>> {
        let tables = self.fetch_tables()?;
        Ok(tables.find(kind, predicate))
    }

    // Edge operations

    async fn edges(
        &self,
        edge_type: EdgeType,
        direction: Direction,
        ids: &[EntityId],
    ) -> StorageResult<Vec<EdgePair>> {
        let tables = self.fetch_tables()?;
        let table = tables.edges(edge_type);
        let unique: BTreeSet<&EntityId> = ids.iter().collect();
        Ok(unique
            .into_iter()
            .flat_map(|id| table.lookup(direction, id))
            .collect())
    }

    // Transactions

    async fn version(&self) -> StorageResult<u64> {
        Ok(self.read_tables()?.version)
    }

    async fn begin(&self) -> StorageResult<Box<dyn UnitOfWork>> {
        self.ensure_open()?;
        let timeout = self.config.lock_timeout();
        let guard = tokio::time::timeout(timeout, self.writer.clone().lock_owned())
            .await
            .map_err(|_| {
                StorageError::Conflict(format!(
                    "another mutation held the store for more than {}ms",
                    self.config.lock_timeout_ms
                ))
            })?;

        let shadow = self.read_tables()?.clone();
        let base_version = shadow.version;
        tracing::debug!("Began unit of work at version {}", base_version);

        Ok(Box::new(MemoryUnitOfWork {
            tables: self.tables.clone(),
            closed: self.closed.clone(),
            shadow,
            base_version,
            writes: 0,
            _guard: guard,
        }))
    }

    // Bulk operations

    async fn load_dataset(&self) -> StorageResult<Dataset> {
        Ok(self.read_tables()?.to_dataset())
    }
}

/// Copy-on-write unit of work over [`MemoryStorage`]
struct MemoryUnitOfWork {
    tables: Arc<RwLock<Tables>>,
    closed: Arc<AtomicBool>,
    shadow: Tables,
    base_version: u64,
    writes: usize,
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn get_by_id(&self, kind: EntityKind, id: &EntityId) -> StorageResult<Entity> {
        self.shadow.require(kind, id).cloned()
    }

    async fn find_by_predicate(
        &self,
        kind: EntityKind,
        predicate: &Predicate,
    ) -> StorageResult<Vec<Entity>> {
        Ok(self.shadow.find(kind, predicate))
    }

    async fn has_edge(&self, edge_type: EdgeType, pair: &EdgePair) -> StorageResult<bool> {
        Ok(self.shadow.edges(edge_type).contains(pair))
    }

    async fn insert(&mut self, entity: Entity) -> StorageResult<EntityId> {
        let id = self.shadow.insert(entity)?;
        self.writes += 1;
        Ok(id)
    }

    async fn add_edge(
        &mut self,
        edge_type: EdgeType,
        character_id: &EntityId,
        target_id: &EntityId,
    ) -> StorageResult<bool> {
        let added = self.shadow.add_edge(edge_type, character_id, target_id)?;
        if added {
            self.writes += 1;
        }
        Ok(added)
    }

    async fn update_scalar(
        &mut self,
        kind: EntityKind,
        id: &EntityId,
        field: &str,
        value: serde_json::Value,
    ) -> StorageResult<Entity> {
        let entity = self.shadow.update_scalar(kind, id, field, value)?;
        self.writes += 1;
        Ok(entity)
    }

    async fn commit(self: Box<Self>) -> StorageResult<u64> {
        let MemoryUnitOfWork {
            tables,
            closed,
            mut shadow,
            base_version,
            writes,
            _guard,
        } = *self;

        if closed.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("memory storage is closed".to_string()));
        }

        let mut live = tables
            .write()
            .map_err(|e| StorageError::Database(format!("Lock error: {}", e)))?;
        if live.version != base_version {
            return Err(StorageError::Conflict(format!(
                "store moved from version {} to {} during the unit of work",
                base_version, live.version
            )));
        }
        shadow.version = base_version + 1;
        let version = shadow.version;
        *live = shadow;
        drop(live);

        tracing::debug!("Committed {} write(s) at version {}", writes, version);
        Ok(version)
    }

    async fn rollback(self: Box<Self>) -> StorageResult<()> {
        tracing::debug!(
            "Rolled back {} write(s) on top of version {}",
            self.writes,
            self.base_version
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use holocron_core::{Character, Film, Planet, Starship};

    fn seeded() -> MemoryStorage {
        let dataset = Dataset::new()
            .with_planets(vec![Planet::new("1", "Tatooine"), Planet::new("2", "Alderaan")])
            .with_characters(vec![
                Character::new("1", "Luke Skywalker").with_homeworld("1"),
                Character::new("2", "Darth Vader").with_homeworld("1"),
                Character::new("3", "Leia Organa").with_homeworld("2"),
            ])
            .with_starships(vec![Starship::new("1", "X-wing")])
            .with_films(vec![Film::new("1", "A New Hope", 4)]);
        MemoryStorage::from_dataset(&dataset).unwrap()
    }

    fn violation_code(err: StorageError) -> ViolationCode {
        match err {
            StorageError::Constraint(v) => v.code,
            other => panic!("expected constraint violation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_insert_assigns_fresh_id() {
        let storage = seeded();
        let mut uow = storage.begin().await.unwrap();
        let id = uow
            .insert(Character::new("", "Han Solo").into())
            .await
            .unwrap();
        assert_eq!(id.as_str(), "4");
        uow.commit().await.unwrap();

        let han = storage.get_by_id(EntityKind::Character, &id).await.unwrap();
        assert_eq!(han.name(), Some("Han Solo"));
    }

    #[tokio::test]
    async fn test_insert_after_largest_possible_id() {
        let dataset = Dataset::new().with_characters(vec![
            Character::new(u64::MAX.to_string(), "Max"),
            Character::new("1", "Luke Skywalker"),
        ]);
        let storage = MemoryStorage::from_dataset(&dataset).unwrap();
        let mut uow = storage.begin().await.unwrap();

        let id = uow.insert(Character::new("", "Rey").into()).await.unwrap();
        assert_eq!(id.as_str(), "2");
        uow.commit().await.unwrap();

        let rey = storage.get_by_id(EntityKind::Character, &id).await.unwrap();
        assert_eq!(rey.name(), Some("Rey"));
    }

    #[tokio::test]
    async fn test_insert_rejects_used_id_and_dangling_homeworld() {
        let storage = seeded();
        let mut uow = storage.begin().await.unwrap();

        let err = uow
            .insert(Character::new("1", "Impostor").into())
            .await
            .unwrap_err();
        assert_eq!(violation_code(err), ViolationCode::DuplicateId);

        let err = uow
            .insert(Character::new("", "Lost").with_homeworld("99").into())
            .await
            .unwrap_err();
        assert_eq!(violation_code(err), ViolationCode::DanglingReference);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let storage = seeded();
        let err = storage
            .get_by_id(EntityKind::Planet, &"42".into())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound { kind: EntityKind::Planet, .. }));
    }

    #[tokio::test]
    async fn test_add_edge_is_symmetric_and_idempotent() {
        let storage = seeded();
        let mut uow = storage.begin().await.unwrap();
        assert!(uow
            .add_edge(EdgeType::Piloting, &"1".into(), &"1".into())
            .await
            .unwrap());
        assert!(!uow
            .add_edge(EdgeType::Piloting, &"1".into(), &"1".into())
            .await
            .unwrap());
        uow.commit().await.unwrap();

        let starships = storage
            .edges(EdgeType::Piloting, Direction::Outgoing, &["1".into()])
            .await
            .unwrap();
        let pilots = storage
            .edges(EdgeType::Piloting, Direction::Incoming, &["1".into()])
            .await
            .unwrap();
        assert_eq!(starships, vec![EdgePair::new("1", "1")]);
        assert_eq!(pilots, starships);
    }

    #[tokio::test]
    async fn test_add_edge_rejects_dangling_endpoint() {
        let storage = seeded();
        let mut uow = storage.begin().await.unwrap();
        let err = uow
            .add_edge(EdgeType::Appearance, &"1".into(), &"7".into())
            .await
            .unwrap_err();
        assert_eq!(violation_code(err), ViolationCode::DanglingReference);
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let storage = seeded();
        let mut uow = storage.begin().await.unwrap();
        let id = uow
            .insert(Character::new("", "Han Solo").into())
            .await
            .unwrap();

        // Visible inside the unit, not outside
        assert!(uow.exists(EntityKind::Character, &id).await.unwrap());
        assert!(storage.get_by_id(EntityKind::Character, &id).await.is_err());

        uow.rollback().await.unwrap();
        assert!(storage.get_by_id(EntityKind::Character, &id).await.is_err());
        assert_eq!(storage.version().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_commit_bumps_version() {
        let storage = seeded();
        let mut uow = storage.begin().await.unwrap();
        uow.update_scalar(
            EntityKind::Planet,
            &"2".into(),
            "population",
            serde_json::json!(2_000_000_000.0),
        )
        .await
        .unwrap();
        assert_eq!(uow.commit().await.unwrap(), 1);
        assert_eq!(storage.version().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_writer_lock_times_out_as_conflict() {
        let storage = MemoryStorage::with_config(StorageConfig { lock_timeout_ms: 20 });
        let _first = storage.begin().await.unwrap();

        match storage.begin().await {
            Err(StorageError::Conflict(_)) => {}
            Err(other) => panic!("expected conflict, got {:?}", other),
            Ok(_) => panic!("second unit of work should not start"),
        }
    }

    #[tokio::test]
    async fn test_dropped_unit_releases_writer_lock() {
        let storage = MemoryStorage::with_config(StorageConfig { lock_timeout_ms: 20 });
        {
            let mut uow = storage.begin().await.unwrap();
            uow.insert(Planet::new("", "Hoth").into()).await.unwrap();
        }
        assert!(storage.begin().await.is_ok());
        assert!(storage.list(EntityKind::Planet).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_scalar_rules() {
        let storage = seeded();
        let mut uow = storage.begin().await.unwrap();

        let err = uow
            .update_scalar(EntityKind::Planet, &"1".into(), "id", serde_json::json!("9"))
            .await
            .unwrap_err();
        assert_eq!(violation_code(err), ViolationCode::ImmutableField);

        let err = uow
            .update_scalar(EntityKind::Planet, &"1".into(), "moons", serde_json::json!(2))
            .await
            .unwrap_err();
        assert_eq!(violation_code(err), ViolationCode::UnknownField);

        let err = uow
            .update_scalar(EntityKind::Planet, &"1".into(), "population", serde_json::json!("many"))
            .await
            .unwrap_err();
        assert_eq!(violation_code(err), ViolationCode::InvalidValue);

        let err = uow
            .update_scalar(EntityKind::Planet, &"1".into(), "population", serde_json::json!(-5))
            .await
            .unwrap_err();
        assert_eq!(violation_code(err), ViolationCode::NegativePopulation);

        let updated = uow
            .update_scalar(EntityKind::Planet, &"1".into(), "climate", serde_json::json!("arid"))
            .await
            .unwrap();
        match updated {
            Entity::Planet(p) => assert_eq!(p.climate.as_deref(), Some("arid")),
            other => panic!("expected planet, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_kill_rows_enforce_single_death() {
        let storage = seeded();
        let mut uow = storage.begin().await.unwrap();
        uow.insert(KillEvent::new("", "2", "1").into()).await.unwrap();

        let err = uow
            .insert(KillEvent::new("", "3", "1").into())
            .await
            .unwrap_err();
        assert_eq!(violation_code(err), ViolationCode::DuplicateDeath);

        let err = uow
            .update_scalar(EntityKind::Kill, &"1".into(), "method", serde_json::json!("Blaster"))
            .await
            .unwrap_err();
        assert_eq!(violation_code(err), ViolationCode::ImmutableField);
    }

    #[tokio::test]
    async fn test_find_residents_by_homeworld() {
        let storage = seeded();
        let residents = storage
            .find_by_predicate(EntityKind::Character, &Predicate::homeworld_in(["1", "5"]))
            .await
            .unwrap();
        let names: Vec<_> = residents.iter().filter_map(|e| e.name()).collect();
        assert_eq!(names, vec!["Luke Skywalker", "Darth Vader"]);
        assert_eq!(storage.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_closed_store_is_unavailable() {
        let storage = seeded();
        storage.close().await.unwrap();

        assert!(!storage.health_check().await.unwrap());
        assert!(matches!(
            storage.list(EntityKind::Planet).await,
            Err(StorageError::Unavailable(_))
        ));
        assert!(matches!(storage.begin().await, Err(StorageError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_from_dataset_rejects_inconsistent_data() {
        let dataset = Dataset::new()
            .with_characters(vec![Character::new("1", "Luke Skywalker").with_homeworld("404")]);
        assert!(matches!(
            MemoryStorage::from_dataset(&dataset),
            Err(StorageError::Inconsistent(_))
        ));

        let dataset = Dataset::new().with_planets(vec![Planet::new("1", "")]);
        assert!(matches!(
            MemoryStorage::from_dataset(&dataset),
            Err(StorageError::Inconsistent(_))
        ));
    }

    #[tokio::test]
    async fn test_import_dataset_is_all_or_nothing() {
        let storage = MemoryStorage::new();
        let dataset = Dataset::new()
            .with_planets(vec![Planet::new("1", "Tatooine")])
            .with_characters(vec![Character::new("1", "Luke Skywalker").with_homeworld("1")])
            .with_starships(vec![Starship::new("1", "X-wing")])
            .with_pilots(vec![EdgePair::new("1", "1")]);

        storage.import_dataset(&dataset).await.unwrap();
        let loaded = storage.load_dataset().await.unwrap();
        assert_eq!(loaded.characters, dataset.characters);
        assert_eq!(loaded.pilots, dataset.pilots);
        assert!(invariants::audit(&loaded).is_empty());

        // A second import collides on every id and leaves nothing behind
        let before = storage.version().await.unwrap();
        assert!(storage.import_dataset(&dataset).await.is_err());
        assert_eq!(storage.version().await.unwrap(), before);
        assert_eq!(storage.load_dataset().await.unwrap(), loaded);
    }
}
