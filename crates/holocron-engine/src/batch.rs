//! Batch functions backed by a [`StorageBackend`]
//!
//! One [`StoreBatch`] exists per loader in a request. Keys are always parent
//! ids; each batch issues a fixed number of store calls no matter how many
//! keys it carries.

use crate::loader::BatchFn;
use crate::order::{sort_entities, OrderBy};
use async_trait::async_trait;
use holocron_core::{
    Direction, EdgeType, Entity, EntityId, EntityKind, Error, Predicate, Relationship, Result,
};
use holocron_storage::StorageBackend;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// What a loader fetches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LoaderKind {
    /// Rows of one kind by id
    ById(EntityKind),
    /// Related rows of a relationship, keyed by parent id
    Related(Relationship),
}

impl std::fmt::Display for LoaderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ById(kind) => write!(f, "{}.byId", kind),
            Self::Related(relationship) => write!(f, "{}", relationship),
        }
    }
}

type Grouped = HashMap<EntityId, Vec<Entity>>;

pub struct StoreBatch<S: ?Sized> {
    storage: Arc<S>,
    kind: LoaderKind,
}

impl<S: StorageBackend + ?Sized> StoreBatch<S> {
    pub fn new(storage: Arc<S>, kind: LoaderKind) -> Self {
        Self { storage, kind }
    }

    pub fn kind(&self) -> LoaderKind {
        self.kind
    }

    async fn by_id(&self, kind: EntityKind, keys: &[EntityId]) -> Result<Grouped> {
        let rows = self.storage.get_many(kind, keys).await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.id().clone(), vec![row]))
            .collect())
    }

    /// Follow a foreign key on each parent row to one child row
    async fn follow(
        &self,
        parent_kind: EntityKind,
        child_kind: EntityKind,
        keys: &[EntityId],
        foreign_key: fn(&Entity) -> Option<EntityId>,
    ) -> Result<Grouped> {
        let parents = self.storage.get_many(parent_kind, keys).await?;
        let links: Vec<(EntityId, EntityId)> = parents
            .iter()
            .filter_map(|p| foreign_key(p).map(|fk| (p.id().clone(), fk)))
            .collect();
        if links.is_empty() {
            return Ok(Grouped::new());
        }

        let targets: BTreeSet<EntityId> = links.iter().map(|(_, fk)| fk.clone()).collect();
        let targets: Vec<EntityId> = targets.into_iter().collect();
        let children = index_by_id(self.storage.get_many(child_kind, &targets).await?);

        let mut grouped = Grouped::new();
        for (parent_id, fk) in links {
            if let Some(child) = children.get(&fk) {
                grouped.entry(parent_id).or_default().push(child.clone());
            }
        }
        Ok(grouped)
    }

    /// Rows of `kind` matching `predicate`, grouped by the column that
    /// points back at the parent
    async fn group(
        &self,
        kind: EntityKind,
        predicate: Predicate,
        parent_of: fn(&Entity) -> Option<EntityId>,
    ) -> Result<Grouped> {
        let rows = self.storage.find_by_predicate(kind, &predicate).await?;
        let mut grouped = Grouped::new();
        for row in rows {
            if let Some(parent_id) = parent_of(&row) {
                grouped.entry(parent_id).or_default().push(row);
            }
        }
        Ok(grouped)
    }

    /// Walk an edge set from the parents and fetch the far endpoints
    async fn traverse(
        &self,
        edge_type: EdgeType,
        direction: Direction,
        child_kind: EntityKind,
        keys: &[EntityId],
    ) -> Result<Grouped> {
        let pairs = self.storage.edges(edge_type, direction, keys).await?;
        if pairs.is_empty() {
            return Ok(Grouped::new());
        }

        let targets: BTreeSet<EntityId> = pairs
            .iter()
            .map(|pair| pair.destination(direction).clone())
            .collect();
        let targets: Vec<EntityId> = targets.into_iter().collect();
        let children = index_by_id(self.storage.get_many(child_kind, &targets).await?);

        let mut grouped = Grouped::new();
        for pair in &pairs {
            if let Some(child) = children.get(pair.destination(direction)) {
                grouped
                    .entry(pair.source(direction).clone())
                    .or_default()
                    .push(child.clone());
            }
        }
        Ok(grouped)
    }

    async fn related(&self, relationship: Relationship, keys: &[EntityId]) -> Result<Grouped> {
        let key_set = || keys.iter().cloned().collect::<BTreeSet<_>>();

        let mut grouped = match relationship {
            Relationship::CharacterHomeworld => {
                self.follow(EntityKind::Character, EntityKind::Planet, keys, homeworld_of)
                    .await?
            }
            Relationship::KillKiller => {
                self.follow(EntityKind::Kill, EntityKind::Character, keys, killer_of)
                    .await?
            }
            Relationship::KillVictim => {
                self.follow(EntityKind::Kill, EntityKind::Character, keys, victim_of)
                    .await?
            }
            Relationship::PlanetResidents => {
                self.group(
                    EntityKind::Character,
                    Predicate::HomeworldIn(key_set()),
                    homeworld_of,
                )
                .await?
            }
            Relationship::CharacterKills | Relationship::CharacterKillCount => {
                self.group(EntityKind::Kill, Predicate::KillerIn(key_set()), killer_of)
                    .await?
            }
            Relationship::CharacterDeath => {
                self.group(EntityKind::Kill, Predicate::VictimIn(key_set()), victim_of)
                    .await?
            }
            Relationship::CharacterStarships
            | Relationship::CharacterFilms
            | Relationship::StarshipPilots
            | Relationship::FilmCharacters => {
                let (edge_type, direction) = relationship.edge().ok_or_else(|| {
                    Error::Internal(format!("{} is not backed by an edge set", relationship))
                })?;
                self.traverse(edge_type, direction, relationship.child_kind(), keys)
                    .await?
            }
        };

        let order = OrderBy::for_relationship(relationship);
        for values in grouped.values_mut() {
            sort_entities(values, order);
        }
        Ok(grouped)
    }
}

#[async_trait]
impl<S: StorageBackend + ?Sized + 'static> BatchFn for StoreBatch<S> {
    type Key = EntityId;
    type Value = Entity;

    async fn load_batch(&self, keys: &[EntityId]) -> Result<HashMap<EntityId, Vec<Entity>>> {
        tracing::debug!("Loading {} for {} keys", self.kind, keys.len());
        match self.kind {
            LoaderKind::ById(kind) => self.by_id(kind, keys).await,
            LoaderKind::Related(relationship) => self.related(relationship, keys).await,
        }
    }
}

fn index_by_id(rows: Vec<Entity>) -> HashMap<EntityId, Entity> {
    rows.into_iter().map(|row| (row.id().clone(), row)).collect()
}

fn homeworld_of(entity: &Entity) -> Option<EntityId> {
    entity.as_character().and_then(|c| c.homeworld_id.clone())
}

fn killer_of(entity: &Entity) -> Option<EntityId> {
    entity.as_kill().map(|k| k.killer_id.clone())
}

fn victim_of(entity: &Entity) -> Option<EntityId> {
    entity.as_kill().map(|k| k.victim_id.clone())
}
