//! Relationship resolution
//!
//! Resolution is split in two so callers can fan out: [`Resolver::prepare`]
//! registers the parent and related keys with the request's loaders without
//! touching the store, and [`PendingField::resolve`] awaits them. Preparing
//! every field of a level before resolving any of them is what lets a whole
//! level collapse into one batch per relationship.

use crate::batch::StoreBatch;
use crate::config::EngineConfig;
use crate::context::RequestContext;
use crate::loader::LoadHandle;
use holocron_core::{Cardinality, Entity, EntityId, EntityKind, Error, Relationship, Result};
use holocron_storage::StorageBackend;
use std::sync::Arc;

/// A resolved relationship value
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    /// To-one; `None` when the reference is unset
    One(Option<Entity>),
    /// To-many, ordered by the relationship's policy
    Many(Vec<Entity>),
    /// Derived count
    Count(u64),
}

impl Resolved {
    pub fn entities(&self) -> Vec<&Entity> {
        match self {
            Self::One(one) => one.iter().collect(),
            Self::Many(many) => many.iter().collect(),
            Self::Count(_) => Vec::new(),
        }
    }

    pub fn into_one(self) -> Option<Entity> {
        match self {
            Self::One(one) => one,
            Self::Many(many) => many.into_iter().next(),
            Self::Count(_) => None,
        }
    }

    pub fn into_many(self) -> Vec<Entity> {
        match self {
            Self::One(one) => one.into_iter().collect(),
            Self::Many(many) => many,
            Self::Count(_) => Vec::new(),
        }
    }

    pub fn count(&self) -> u64 {
        match self {
            Self::Count(n) => *n,
            other => other.entities().len() as u64,
        }
    }
}

/// Registered but unresolved relationship field
pub struct PendingField<S: StorageBackend + ?Sized + 'static> {
    relationship: Relationship,
    parent_id: EntityId,
    parent: LoadHandle<StoreBatch<S>>,
    related: LoadHandle<StoreBatch<S>>,
}

impl<S: StorageBackend + ?Sized + 'static> PendingField<S> {
    pub fn relationship(&self) -> Relationship {
        self.relationship
    }

    pub async fn resolve(self) -> Result<Resolved> {
        let parent = self.parent.await?;
        if parent.is_empty() {
            return Err(Error::not_found(
                self.relationship.parent_kind(),
                self.parent_id,
            ));
        }

        let related = self.related.await?;
        Ok(match self.relationship.cardinality() {
            Cardinality::One => Resolved::One(related.first().cloned()),
            Cardinality::Many => Resolved::Many(related.to_vec()),
            Cardinality::Count => Resolved::Count(related.len() as u64),
        })
    }
}

/// Resolves relationship fields through per-request loaders
pub struct Resolver<S: StorageBackend + ?Sized + 'static> {
    storage: Arc<S>,
    max_batch_size: Option<usize>,
}

impl<S: StorageBackend + ?Sized + 'static> Clone for Resolver<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            max_batch_size: self.max_batch_size,
        }
    }
}

impl<S: StorageBackend + ?Sized + 'static> Resolver<S> {
    pub fn new(storage: Arc<S>, config: &EngineConfig) -> Self {
        Self {
            storage,
            max_batch_size: config.max_batch_size,
        }
    }

    /// Fresh context for one request
    pub fn context(&self) -> RequestContext<S> {
        RequestContext::new(Arc::clone(&self.storage)).with_max_batch_size(self.max_batch_size)
    }

    /// Register a field by name. Fails at once for names the parent kind
    /// does not have.
    pub fn prepare(
        &self,
        ctx: &RequestContext<S>,
        parent_kind: EntityKind,
        parent_id: &EntityId,
        name: &str,
    ) -> Result<PendingField<S>> {
        let relationship = Relationship::parse(parent_kind, name)
            .ok_or_else(|| Error::unknown_relationship(parent_kind, name))?;
        Ok(self.prepare_relationship(ctx, relationship, parent_id))
    }

    pub fn prepare_relationship(
        &self,
        ctx: &RequestContext<S>,
        relationship: Relationship,
        parent_id: &EntityId,
    ) -> PendingField<S> {
        // killCount counts the same rows `kills` returns and shares its loader
        let source = match relationship {
            Relationship::CharacterKillCount => Relationship::CharacterKills,
            other => other,
        };

        PendingField {
            relationship,
            parent_id: parent_id.clone(),
            parent: ctx.entities(relationship.parent_kind()).load(parent_id.clone()),
            related: ctx.register(source).load(parent_id.clone()),
        }
    }

    /// Resolve one field of one parent
    pub async fn resolve(
        &self,
        parent_kind: EntityKind,
        parent_id: &EntityId,
        name: &str,
        ctx: &RequestContext<S>,
    ) -> Result<Resolved> {
        self.prepare(ctx, parent_kind, parent_id, name)?
            .resolve()
            .await
    }

    /// Resolve the same field for many parents in one batch
    pub async fn resolve_all(
        &self,
        parent_kind: EntityKind,
        parent_ids: &[EntityId],
        name: &str,
        ctx: &RequestContext<S>,
    ) -> Result<Vec<Result<Resolved>>> {
        let pending = parent_ids
            .iter()
            .map(|id| self.prepare(ctx, parent_kind, id, name))
            .collect::<Result<Vec<_>>>()?;
        Ok(futures::future::join_all(pending.into_iter().map(PendingField::resolve)).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::LoaderKind;
    use holocron_core::{Character, Dataset, EdgePair, KillEvent, Planet, Starship};
    use holocron_storage::MemoryStorage;

    fn setup(planets: usize) -> (Arc<MemoryStorage>, Resolver<MemoryStorage>) {
        let mut dataset = Dataset::new()
            .with_starships(vec![Starship::new("10", "Millennium Falcon")])
            .with_pilots(vec![EdgePair::new("1", "10"), EdgePair::new("2", "10")]);
        for p in 1..=planets {
            dataset.planets.push(Planet::new(p.to_string(), format!("Planet {}", p)));
            dataset
                .characters
                .push(Character::new(p.to_string(), format!("Resident {}", p)).with_homeworld(p.to_string()));
        }
        dataset.kills.push(KillEvent::new("1", "1", "2"));

        let storage = Arc::new(MemoryStorage::from_dataset(&dataset).unwrap());
        let resolver = Resolver::new(Arc::clone(&storage), &EngineConfig::default());
        (storage, resolver)
    }

    #[tokio::test]
    async fn test_pilot_edges_are_symmetric() {
        let (_, resolver) = setup(2);
        let ctx = resolver.context();

        let pilots = resolver
            .resolve(EntityKind::Starship, &"10".into(), "pilots", &ctx)
            .await
            .unwrap()
            .into_many();
        assert_eq!(pilots.len(), 2);

        for pilot in pilots {
            let starships = resolver
                .resolve(EntityKind::Character, pilot.id(), "starships", &ctx)
                .await
                .unwrap()
                .into_many();
            assert!(starships.iter().any(|s| s.id().as_str() == "10"));
        }
    }

    #[tokio::test]
    async fn test_residents_of_many_planets_in_one_batch() {
        let (storage, resolver) = setup(25);
        let ctx = resolver.context();
        let ids: Vec<EntityId> = (1..=25).map(|p| EntityId::new(p.to_string())).collect();
        let before = storage.fetch_count();

        let results = resolver
            .resolve_all(EntityKind::Planet, &ids, "residents", &ctx)
            .await
            .unwrap();

        assert_eq!(results.len(), 25);
        for (planet, result) in ids.iter().zip(&results) {
            let residents = result.as_ref().unwrap().entities();
            assert_eq!(residents.len(), 1);
            assert_eq!(residents[0].id(), planet);
        }

        let residents = ctx.stats_for(LoaderKind::Related(Relationship::PlanetResidents));
        assert_eq!(residents.batches, 1);
        assert_eq!(residents.keys_fetched, 25);
        // one parent check plus one residents fetch
        assert_eq!(storage.fetch_count() - before, 2);
    }

    #[tokio::test]
    async fn test_missing_parent_is_not_found() {
        let (_, resolver) = setup(2);
        let ctx = resolver.context();

        let err = resolver
            .resolve(EntityKind::Planet, &"404".into(), "residents", &ctx)
            .await
            .unwrap_err();
        assert_eq!(err, Error::not_found(EntityKind::Planet, "404"));
    }

    #[tokio::test]
    async fn test_unknown_relationship_fails_before_fetch() {
        let (storage, resolver) = setup(2);
        let ctx = resolver.context();
        let before = storage.fetch_count();

        let err = resolver
            .resolve(EntityKind::Planet, &"1".into(), "moons", &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_RELATIONSHIP");
        assert_eq!(storage.fetch_count(), before);
    }

    #[tokio::test]
    async fn test_to_one_and_count() {
        let (_, resolver) = setup(2);
        let ctx = resolver.context();

        let homeworld = resolver
            .resolve(EntityKind::Character, &"2".into(), "homeworld", &ctx)
            .await
            .unwrap()
            .into_one()
            .unwrap();
        assert_eq!(homeworld.name(), Some("Planet 2"));

        let kill_count = resolver
            .resolve(EntityKind::Character, &"1".into(), "killCount", &ctx)
            .await
            .unwrap();
        assert_eq!(kill_count, Resolved::Count(1));

        let death = resolver
            .resolve(EntityKind::Character, &"1".into(), "death", &ctx)
            .await
            .unwrap();
        assert_eq!(death, Resolved::One(None));
    }

    #[tokio::test]
    async fn test_closed_store_is_unavailable() {
        let (storage, resolver) = setup(2);
        storage.close().await.unwrap();
        let ctx = resolver.context();

        let err = resolver
            .resolve(EntityKind::Planet, &"1".into(), "residents", &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "STORE_UNAVAILABLE");
    }
}
