//! Root query fields

use crate::order::{sort_entities, OrderBy};
use holocron_core::{Entity, EntityId, EntityKind, Predicate, Result};
use holocron_storage::{StorageBackend, StorageError};
use std::sync::Arc;

/// Entry points of a read. Relationship fields below the roots go through
/// the [`Resolver`](crate::Resolver).
pub struct QueryRoot<S: StorageBackend + ?Sized> {
    storage: Arc<S>,
}

impl<S: StorageBackend + ?Sized> Clone for QueryRoot<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
        }
    }
}

impl<S: StorageBackend + ?Sized> QueryRoot<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// One row by id, `None` when absent
    pub async fn entity(&self, kind: EntityKind, id: &EntityId) -> Result<Option<Entity>> {
        match self.storage.get_by_id(kind, id).await {
            Ok(entity) => Ok(Some(entity)),
            Err(StorageError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Every row of a kind, ordered by id
    pub async fn list(&self, kind: EntityKind) -> Result<Vec<Entity>> {
        let mut rows = self.storage.list(kind).await?;
        sort_entities(&mut rows, OrderBy::Id);
        Ok(rows)
    }

    pub async fn character(&self, id: &EntityId) -> Result<Option<Entity>> {
        self.entity(EntityKind::Character, id).await
    }

    pub async fn planet(&self, id: &EntityId) -> Result<Option<Entity>> {
        self.entity(EntityKind::Planet, id).await
    }

    pub async fn starship(&self, id: &EntityId) -> Result<Option<Entity>> {
        self.entity(EntityKind::Starship, id).await
    }

    pub async fn film(&self, id: &EntityId) -> Result<Option<Entity>> {
        self.entity(EntityKind::Film, id).await
    }

    pub async fn kill(&self, id: &EntityId) -> Result<Option<Entity>> {
        self.entity(EntityKind::Kill, id).await
    }

    /// Characters whose name contains `text`, case-insensitive, by name.
    /// The text is matched as given, so an empty string matches everyone.
    pub async fn search_characters(&self, text: &str) -> Result<Vec<Entity>> {
        let mut found = self
            .storage
            .find_by_predicate(EntityKind::Character, &Predicate::name_contains(text))
            .await?;
        sort_entities(&mut found, OrderBy::Name);
        tracing::debug!("Character search '{}' matched {}", text, found.len());
        Ok(found)
    }

    /// Films in episode order
    pub async fn films_by_episode(&self) -> Result<Vec<Entity>> {
        let mut films = self.storage.list(EntityKind::Film).await?;
        sort_entities(&mut films, OrderBy::Episode);
        Ok(films)
    }

    /// Kill events, optionally filtered by exact method and location,
    /// ordered by when they occurred
    pub async fn kills(
        &self,
        method: Option<String>,
        location: Option<String>,
    ) -> Result<Vec<Entity>> {
        let predicate = match (&method, &location) {
            (None, None) => Predicate::All,
            _ => Predicate::KillMatches { method, location },
        };
        let mut kills = self
            .storage
            .find_by_predicate(EntityKind::Kill, &predicate)
            .await?;
        sort_entities(&mut kills, OrderBy::OccurredAt);
        Ok(kills)
    }
}
