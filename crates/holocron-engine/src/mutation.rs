//! Mutation coordination
//!
//! Every mutation runs as one unit of work and walks a fixed state machine:
//!
//! ```text
//! PENDING -> VALIDATING -> APPLYING -> COMMITTED
//!    |           |            |
//!    +-----------+-> REJECTED +-> FAILED -> ROLLED_BACK
//! ```
//!
//! Validation reads through the unit, so it sees exactly the state the
//! writes will land on. A rejected mutation never wrote anything. A failed
//! one is rolled back and the store is re-audited before the error is
//! returned.

use crate::resolver::Resolver;
use crate::view::{self, CharacterView, KillView, PlanetView, StarshipView};
use async_trait::async_trait;
use holocron_core::invariants;
use holocron_core::{
    Character, EdgeType, Entity, EntityId, EntityKind, Error, KillEvent, NewCharacter, NewKill,
    Predicate, Result,
};
use holocron_storage::{StorageBackend, UnitOfWork};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use ulid::Ulid;

/// Unique id of one mutation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct MutationId(pub Ulid);

impl MutationId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for MutationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MutationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MutationPhase {
    Pending,
    Validating,
    Applying,
    Committed,
    Rejected,
    Failed,
    RolledBack,
}

impl MutationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Validating => "VALIDATING",
            Self::Applying => "APPLYING",
            Self::Committed => "COMMITTED",
            Self::Rejected => "REJECTED",
            Self::Failed => "FAILED",
            Self::RolledBack => "ROLLED_BACK",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Rejected | Self::RolledBack)
    }

    /// Legal transitions. `PENDING -> REJECTED` covers a mutation that could
    /// not open its unit of work.
    pub fn can_advance_to(&self, next: MutationPhase) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Validating)
                | (Self::Pending, Self::Rejected)
                | (Self::Validating, Self::Applying)
                | (Self::Validating, Self::Rejected)
                | (Self::Applying, Self::Committed)
                | (Self::Applying, Self::Failed)
                | (Self::Failed, Self::RolledBack)
        )
    }
}

impl std::fmt::Display for MutationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phases one mutation went through
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationTrace {
    pub id: MutationId,
    pub operation: &'static str,
    pub phases: Vec<MutationPhase>,
    /// Store version published by the commit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

impl MutationTrace {
    pub fn new(operation: &'static str) -> Self {
        Self {
            id: MutationId::new(),
            operation,
            phases: vec![MutationPhase::Pending],
            version: None,
        }
    }

    pub fn phase(&self) -> MutationPhase {
        self.phases
            .last()
            .copied()
            .unwrap_or(MutationPhase::Pending)
    }

    fn advance(&mut self, next: MutationPhase) {
        let current = self.phase();
        if !current.can_advance_to(next) {
            tracing::error!(
                "Mutation {} ({}) made illegal transition {} -> {}",
                self.id,
                self.operation,
                current,
                next
            );
        }
        tracing::debug!("Mutation {} ({}): {}", self.id, self.operation, next);
        self.phases.push(next);
    }
}

/// One write operation, split into its read-only checks and its writes
#[async_trait]
pub trait Mutation: Send + Sync {
    fn name(&self) -> &'static str;

    /// Check every precondition through the unit. Must not write.
    async fn validate(&self, uow: &dyn UnitOfWork) -> Result<()>;

    /// Perform the writes. Returns the id of the entity the mutation
    /// answers with.
    async fn apply(&self, uow: &mut dyn UnitOfWork) -> Result<EntityId>;
}

async fn require(uow: &dyn UnitOfWork, kind: EntityKind, id: &EntityId) -> Result<()> {
    if uow.exists(kind, id).await? {
        Ok(())
    } else {
        Err(Error::not_found(kind, id.clone()))
    }
}

async fn require_reference(uow: &dyn UnitOfWork, kind: EntityKind, id: &EntityId) -> Result<()> {
    let exists = uow.exists(kind, id).await?;
    invariants::require_reference(kind, id, exists)?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Operations
// ─────────────────────────────────────────────────────────────────────────────

/// Create a character with its homeworld, piloting and appearance edges
pub struct AddCharacter(pub NewCharacter);

#[async_trait]
impl Mutation for AddCharacter {
    fn name(&self) -> &'static str {
        "addCharacter"
    }

    async fn validate(&self, uow: &dyn UnitOfWork) -> Result<()> {
        let input = &self.0;
        invariants::validate_name(&input.name)?;
        invariants::validate_related_count("starshipIds", input.starship_ids.len())?;
        invariants::validate_related_count("filmIds", input.film_ids.len())?;

        if let Some(planet_id) = &input.homeworld_id {
            require_reference(uow, EntityKind::Planet, planet_id).await?;
        }
        for starship_id in &input.starship_ids {
            require_reference(uow, EntityKind::Starship, starship_id).await?;
        }
        for film_id in &input.film_ids {
            require_reference(uow, EntityKind::Film, film_id).await?;
        }
        Ok(())
    }

    async fn apply(&self, uow: &mut dyn UnitOfWork) -> Result<EntityId> {
        let input = &self.0;
        let mut character = Character::new(EntityId::default(), input.name.clone());
        character.height = input.height;
        character.mass = input.mass;
        character.homeworld_id = input.homeworld_id.clone();

        let id = uow.insert(character.into()).await?;
        for starship_id in &input.starship_ids {
            uow.add_edge(EdgeType::Piloting, &id, starship_id).await?;
        }
        for film_id in &input.film_ids {
            uow.add_edge(EdgeType::Appearance, &id, film_id).await?;
        }
        Ok(id)
    }
}

/// Add a piloting edge; assigning an existing pilot again changes nothing
pub struct AssignPilot {
    pub starship_id: EntityId,
    pub character_id: EntityId,
}

#[async_trait]
impl Mutation for AssignPilot {
    fn name(&self) -> &'static str {
        "assignPilot"
    }

    async fn validate(&self, uow: &dyn UnitOfWork) -> Result<()> {
        require(uow, EntityKind::Starship, &self.starship_id).await?;
        require(uow, EntityKind::Character, &self.character_id).await
    }

    async fn apply(&self, uow: &mut dyn UnitOfWork) -> Result<EntityId> {
        let added = uow
            .add_edge(EdgeType::Piloting, &self.character_id, &self.starship_id)
            .await?;
        if !added {
            tracing::debug!(
                "Character {} already pilots starship {}",
                self.character_id,
                self.starship_id
            );
        }
        Ok(self.starship_id.clone())
    }
}

pub struct UpdatePlanetPopulation {
    pub planet_id: EntityId,
    pub population: f64,
}

#[async_trait]
impl Mutation for UpdatePlanetPopulation {
    fn name(&self) -> &'static str {
        "updatePlanetPopulation"
    }

    async fn validate(&self, uow: &dyn UnitOfWork) -> Result<()> {
        require(uow, EntityKind::Planet, &self.planet_id).await?;
        invariants::check_population(&self.planet_id, self.population)?;
        Ok(())
    }

    async fn apply(&self, uow: &mut dyn UnitOfWork) -> Result<EntityId> {
        uow.update_scalar(
            EntityKind::Planet,
            &self.planet_id,
            "population",
            serde_json::Value::from(self.population),
        )
        .await?;
        Ok(self.planet_id.clone())
    }
}

/// Append a kill event
pub struct RecordKill(pub NewKill);

#[async_trait]
impl Mutation for RecordKill {
    fn name(&self) -> &'static str {
        "recordKill"
    }

    async fn validate(&self, uow: &dyn UnitOfWork) -> Result<()> {
        let input = &self.0;
        // Checked first so X killing X is rejected whether or not X exists
        invariants::check_not_self_kill(&input.killer_id, &input.victim_id)?;
        require(uow, EntityKind::Character, &input.killer_id).await?;
        require(uow, EntityKind::Character, &input.victim_id).await?;

        let prior = uow
            .find_by_predicate(
                EntityKind::Kill,
                &Predicate::VictimIn([input.victim_id.clone()].into_iter().collect()),
            )
            .await?;
        invariants::check_no_prior_death(&input.victim_id, prior.first().and_then(Entity::as_kill))?;
        Ok(())
    }

    async fn apply(&self, uow: &mut dyn UnitOfWork) -> Result<EntityId> {
        let input = &self.0;
        let mut kill = KillEvent::new(
            EntityId::default(),
            input.killer_id.clone(),
            input.victim_id.clone(),
        );
        kill.method = input.method.clone();
        kill.location = input.location.clone();
        kill.description = input.description.clone();
        kill.occurred_at = input.occurred_at.clone();

        Ok(uow.insert(kill.into()).await?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Coordinator
// ─────────────────────────────────────────────────────────────────────────────

/// Runs mutations one at a time against a store
pub struct MutationCoordinator<S: StorageBackend + ?Sized + 'static> {
    storage: Arc<S>,
    resolver: Resolver<S>,
    last_trace: Mutex<Option<MutationTrace>>,
}

impl<S: StorageBackend + ?Sized + 'static> MutationCoordinator<S> {
    pub fn new(storage: Arc<S>, resolver: Resolver<S>) -> Self {
        Self {
            storage,
            resolver,
            last_trace: Mutex::new(None),
        }
    }

    /// Trace of the most recent mutation, whatever its outcome
    pub fn last_trace(&self) -> Option<MutationTrace> {
        self.last_trace
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn add_character(&self, input: NewCharacter) -> Result<CharacterView> {
        let id = self.run(&AddCharacter(input)).await?;
        view::character_view(&self.resolver, &id).await
    }

    pub async fn assign_pilot(
        &self,
        starship_id: impl Into<EntityId>,
        character_id: impl Into<EntityId>,
    ) -> Result<StarshipView> {
        let id = self
            .run(&AssignPilot {
                starship_id: starship_id.into(),
                character_id: character_id.into(),
            })
            .await?;
        view::starship_view(&self.resolver, &id).await
    }

    pub async fn update_planet_population(
        &self,
        planet_id: impl Into<EntityId>,
        population: f64,
    ) -> Result<PlanetView> {
        let id = self
            .run(&UpdatePlanetPopulation {
                planet_id: planet_id.into(),
                population,
            })
            .await?;
        view::planet_view(&self.resolver, &id).await
    }

    pub async fn record_kill(&self, input: NewKill) -> Result<KillView> {
        let id = self.run(&RecordKill(input)).await?;
        view::kill_view(&self.resolver, &id).await
    }

    /// Run any mutation through the state machine. Returns the id of the
    /// entity it answers with.
    pub async fn run<M: Mutation + ?Sized>(&self, mutation: &M) -> Result<EntityId> {
        let mut trace = MutationTrace::new(mutation.name());
        let result = self.drive(mutation, &mut trace).await;

        match &result {
            Ok(id) => tracing::info!(
                "Mutation {} ({}) committed {} at version {:?}",
                trace.id,
                trace.operation,
                id,
                trace.version
            ),
            Err(e) => tracing::warn!(
                "Mutation {} ({}) ended {}: {}",
                trace.id,
                trace.operation,
                trace.phase(),
                e
            ),
        }

        *self
            .last_trace
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(trace);
        result
    }

    async fn drive<M: Mutation + ?Sized>(
        &self,
        mutation: &M,
        trace: &mut MutationTrace,
    ) -> Result<EntityId> {
        let mut uow = match self.storage.begin().await {
            Ok(uow) => uow,
            Err(e) => {
                trace.advance(MutationPhase::Rejected);
                return Err(e.into());
            }
        };
        // The unit holds the writer lock, so nothing else moves the version
        // until it commits or rolls back
        let base_version = match self.storage.version().await {
            Ok(version) => version,
            Err(e) => {
                trace.advance(MutationPhase::Rejected);
                discard(uow).await;
                return Err(e.into());
            }
        };

        trace.advance(MutationPhase::Validating);
        if let Err(e) = mutation.validate(uow.as_ref()).await {
            trace.advance(MutationPhase::Rejected);
            discard(uow).await;
            return Err(e);
        }

        trace.advance(MutationPhase::Applying);
        let id = match mutation.apply(uow.as_mut()).await {
            Ok(id) => id,
            Err(e) => {
                trace.advance(MutationPhase::Failed);
                self.roll_back(trace, base_version, Some(uow)).await?;
                return Err(e);
            }
        };

        match uow.commit().await {
            Ok(version) => {
                trace.version = Some(version);
                trace.advance(MutationPhase::Committed);
                Ok(id)
            }
            Err(e) => {
                // A failed commit published nothing and consumed the unit
                trace.advance(MutationPhase::Failed);
                self.roll_back(trace, base_version, None).await?;
                Err(e.into())
            }
        }
    }

    /// Roll back and check the store is exactly as it was. The version is
    /// compared while the unit still holds the writer lock; once it is
    /// released other writers may legitimately move it.
    async fn roll_back(
        &self,
        trace: &mut MutationTrace,
        base_version: u64,
        uow: Option<Box<dyn UnitOfWork>>,
    ) -> Result<()> {
        // A unit whose commit failed is already gone, and so is its lock
        if let Some(uow) = uow {
            let version = self.storage.version().await?;
            uow.rollback().await?;
            if version != base_version {
                return Err(Error::Internal(format!(
                    "store moved from version {} to {} before rollback of {}",
                    base_version, version, trace.id
                )));
            }
        }

        let snapshot = self.storage.load_dataset().await?;
        let violations = invariants::audit(&snapshot);
        if let Some(first) = violations.first() {
            tracing::error!(
                "Store inconsistent after rollback of {}: {} violation(s)",
                trace.id,
                violations.len()
            );
            return Err(Error::Internal(format!(
                "store inconsistent after rollback: {}",
                first
            )));
        }

        trace.advance(MutationPhase::RolledBack);
        Ok(())
    }
}

async fn discard(uow: Box<dyn UnitOfWork>) {
    if let Err(e) = uow.rollback().await {
        tracing::warn!("Discarding unit of work failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use holocron_core::{Dataset, EdgePair, Film, Planet, Starship, ViolationCode};
    use holocron_storage::{MemoryStorage, StorageConfig, StorageError, StorageResult};

    fn dataset() -> Dataset {
        Dataset::new()
            .with_planets(vec![Planet::new("1", "Tatooine"), Planet::new("2", "Alderaan")])
            .with_starships(vec![
                Starship::new("10", "Millennium Falcon"),
                Starship::new("12", "X-wing"),
            ])
            .with_films(vec![Film::new("1", "A New Hope", 4)])
            .with_characters(vec![
                Character::new("1", "Luke Skywalker").with_homeworld("1"),
                Character::new("4", "Darth Vader").with_homeworld("1"),
                Character::new("5", "Leia Organa").with_homeworld("2"),
                Character::new("7", "Obi-Wan Kenobi"),
                Character::new("14", "Han Solo"),
            ])
            .with_pilots(vec![EdgePair::new("14", "10")])
    }

    fn coordinator_for<S: StorageBackend + 'static>(storage: Arc<S>) -> MutationCoordinator<S> {
        let resolver = Resolver::new(Arc::clone(&storage), &EngineConfig::default());
        MutationCoordinator::new(storage, resolver)
    }

    fn setup() -> (Arc<MemoryStorage>, MutationCoordinator<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::from_dataset(&dataset()).unwrap());
        (Arc::clone(&storage), coordinator_for(storage))
    }

    fn phases<S: StorageBackend + 'static>(coordinator: &MutationCoordinator<S>) -> Vec<MutationPhase> {
        coordinator.last_trace().unwrap().phases
    }

    #[tokio::test]
    async fn test_add_character_resolves_everything() {
        let (_, coordinator) = setup();

        let view = coordinator
            .add_character(
                NewCharacter::new("Biggs Darklighter")
                    .with_homeworld("1")
                    .with_starship("12")
                    .with_film("1"),
            )
            .await
            .unwrap();

        assert_eq!(view.character.id.as_str(), "15");
        assert_eq!(view.homeworld.unwrap().name, "Tatooine");
        assert_eq!(view.starships[0].name, "X-wing");
        assert_eq!(view.films[0].title, "A New Hope");
        assert_eq!(view.kill_count, 0);
        assert!(view.death.is_none());
        assert_eq!(
            phases(&coordinator),
            vec![
                MutationPhase::Pending,
                MutationPhase::Validating,
                MutationPhase::Applying,
                MutationPhase::Committed
            ]
        );
    }

    #[tokio::test]
    async fn test_add_character_with_missing_homeworld_writes_nothing() {
        let (storage, coordinator) = setup();
        let before = storage.load_dataset().await.unwrap();
        let version = storage.version().await.unwrap();

        let err = coordinator
            .add_character(NewCharacter::new("Nobody").with_homeworld("999"))
            .await
            .unwrap_err();

        assert_eq!(
            err.violation().map(|v| v.code),
            Some(ViolationCode::DanglingReference)
        );
        assert_eq!(storage.load_dataset().await.unwrap(), before);
        assert_eq!(storage.version().await.unwrap(), version);
        assert_eq!(phases(&coordinator).last(), Some(&MutationPhase::Rejected));
    }

    #[tokio::test]
    async fn test_add_character_rejects_blank_name() {
        let (_, coordinator) = setup();

        let err = coordinator
            .add_character(NewCharacter::new("   "))
            .await
            .unwrap_err();
        assert_eq!(err.violation().map(|v| v.code), Some(ViolationCode::EmptyName));
    }

    #[tokio::test]
    async fn test_assign_pilot_is_symmetric_and_idempotent() {
        let (storage, coordinator) = setup();

        let first = coordinator.assign_pilot("10", "1").await.unwrap();
        let snapshot = storage.load_dataset().await.unwrap();
        let second = coordinator.assign_pilot("10", "1").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(storage.load_dataset().await.unwrap(), snapshot);
        let pilots: Vec<_> = second.pilots.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(pilots, vec!["Han Solo", "Luke Skywalker"]);

        let luke = view::character_view(&coordinator.resolver, &"1".into())
            .await
            .unwrap();
        assert!(luke.starships.iter().any(|s| s.id.as_str() == "10"));
    }

    #[tokio::test]
    async fn test_assign_pilot_missing_ids_not_found() {
        let (_, coordinator) = setup();

        let err = coordinator.assign_pilot("99", "1").await.unwrap_err();
        assert_eq!(err, Error::not_found(EntityKind::Starship, "99"));

        let err = coordinator.assign_pilot("10", "99").await.unwrap_err();
        assert_eq!(err, Error::not_found(EntityKind::Character, "99"));
    }

    #[tokio::test]
    async fn test_add_character_after_largest_possible_id() {
        let dataset =
            Dataset::new().with_characters(vec![Character::new(u64::MAX.to_string(), "Max")]);
        let coordinator =
            coordinator_for(Arc::new(MemoryStorage::from_dataset(&dataset).unwrap()));

        let rey = coordinator.add_character(NewCharacter::new("Rey")).await.unwrap();
        assert_eq!(rey.character.id.as_str(), "1");
        assert_eq!(rey.character.name, "Rey");
    }

    #[tokio::test]
    async fn test_add_character_name_limit_counts_chars() {
        let (_, coordinator) = setup();

        let name = "é".repeat(200);
        let view = coordinator.add_character(NewCharacter::new(name.clone())).await.unwrap();
        assert_eq!(view.character.name, name);

        let err = coordinator
            .add_character(NewCharacter::new("é".repeat(257)))
            .await
            .unwrap_err();
        assert_eq!(err.violation().map(|v| v.code), Some(ViolationCode::NameTooLong));
    }

    #[tokio::test]
    async fn test_assign_pilot_with_clashing_ids() {
        let dataset = Dataset::new()
            .with_starships(vec![Starship::new("1", "Slave I")])
            .with_characters(vec![Character::new("1", "Boba Fett")]);
        let coordinator =
            coordinator_for(Arc::new(MemoryStorage::from_dataset(&dataset).unwrap()));

        let starship = coordinator.assign_pilot("1", "1").await.unwrap();
        let pilots: Vec<_> = starship.pilots.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(pilots, vec!["1"]);

        let boba = view::character_view(&coordinator.resolver, &"1".into())
            .await
            .unwrap();
        let starships: Vec<_> = boba.starships.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(starships, vec!["1"]);
        assert_eq!(boba.homeworld, None);
    }

    #[tokio::test]
    async fn test_update_population() {
        let (_, coordinator) = setup();

        let view = coordinator
            .update_planet_population("1", 200_000.0)
            .await
            .unwrap();
        assert_eq!(view.planet.population, Some(200_000.0));
        let residents: Vec<_> = view.residents.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(residents, vec!["Darth Vader", "Luke Skywalker"]);

        let err = coordinator
            .update_planet_population("1", -5.0)
            .await
            .unwrap_err();
        assert_eq!(
            err.violation().map(|v| v.code),
            Some(ViolationCode::NegativePopulation)
        );

        let err = coordinator
            .update_planet_population("1", f64::NAN)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_FAILED");

        let err = coordinator
            .update_planet_population("404", 1.0)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_record_kill_and_duplicate_death() {
        let (storage, coordinator) = setup();

        let kill = coordinator
            .record_kill(
                NewKill::new("4", "7")
                    .with_method("lightsaber")
                    .with_location("Death Star"),
            )
            .await
            .unwrap();
        assert_eq!(kill.killer.name, "Darth Vader");
        assert_eq!(kill.victim.name, "Obi-Wan Kenobi");

        let before = storage.load_dataset().await.unwrap();
        let err = coordinator
            .record_kill(NewKill::new("14", "7"))
            .await
            .unwrap_err();
        assert_eq!(
            err.violation().map(|v| v.code),
            Some(ViolationCode::DuplicateDeath)
        );
        assert_eq!(storage.load_dataset().await.unwrap(), before);

        let vader = view::character_view(&coordinator.resolver, &"4".into())
            .await
            .unwrap();
        assert_eq!(vader.kill_count, 1);
        let obi_wan = view::character_view(&coordinator.resolver, &"7".into())
            .await
            .unwrap();
        assert_eq!(obi_wan.death.unwrap().id, kill.kill.id);
    }

    #[tokio::test]
    async fn test_self_kill_rejected_for_any_id() {
        let (storage, coordinator) = setup();

        for id in ["1", "4", "999", ""] {
            let err = coordinator
                .record_kill(NewKill::new(id, id))
                .await
                .unwrap_err();
            assert_eq!(err.violation().map(|v| v.code), Some(ViolationCode::SelfKill));
        }
        assert!(storage.load_dataset().await.unwrap().kills.is_empty());
    }

    #[tokio::test]
    async fn test_lock_timeout_is_retryable() {
        let storage = Arc::new(
            MemoryStorage::from_dataset_with_config(
                &dataset(),
                StorageConfig { lock_timeout_ms: 20 },
            )
            .unwrap(),
        );
        let coordinator = coordinator_for(Arc::clone(&storage));

        let held = storage.begin().await.unwrap();
        let err = coordinator.assign_pilot("10", "1").await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(
            phases(&coordinator),
            vec![MutationPhase::Pending, MutationPhase::Rejected]
        );

        held.rollback().await.unwrap();
        assert!(coordinator.assign_pilot("10", "1").await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_mutations_serialize() {
        let (storage, coordinator) = setup();
        let version = storage.version().await.unwrap();

        let (a, b) = tokio::join!(
            coordinator.assign_pilot("12", "1"),
            coordinator.assign_pilot("12", "5"),
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(storage.version().await.unwrap(), version + 2);
        let view = view::starship_view(&coordinator.resolver, &"12".into())
            .await
            .unwrap();
        assert_eq!(view.pilots.len(), 2);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Apply-phase failure
    // ─────────────────────────────────────────────────────────────────────────

    /// Memory storage whose units fail every edge write
    /// Lets `edge_writes` edge writes through per unit, then fails
    struct BrokenEdges {
        inner: MemoryStorage,
        edge_writes: usize,
    }

    struct BrokenEdgesUnit {
        inner: Box<dyn UnitOfWork>,
        remaining: usize,
    }

    #[async_trait]
    impl StorageBackend for BrokenEdges {
        async fn initialize(&self) -> StorageResult<()> {
            self.inner.initialize().await
        }

        async fn close(&self) -> StorageResult<()> {
            self.inner.close().await
        }

        async fn health_check(&self) -> StorageResult<bool> {
            self.inner.health_check().await
        }

        async fn get_by_id(&self, kind: EntityKind, id: &EntityId) -> StorageResult<Entity> {
            self.inner.get_by_id(kind, id).await
        }

        async fn get_many(
            &self,
            kind: EntityKind,
            ids: &[EntityId],
        ) -> StorageResult<Vec<Entity>> {
            self.inner.get_many(kind, ids).await
        }

        async fn find_by_predicate(
            &self,
            kind: EntityKind,
            predicate: &Predicate,
        ) -> StorageResult<Vec<Entity>> {
            self.inner.find_by_predicate(kind, predicate).await
        }

        async fn edges(
            &self,
            edge_type: EdgeType,
            direction: holocron_core::Direction,
            ids: &[EntityId],
        ) -> StorageResult<Vec<EdgePair>> {
            self.inner.edges(edge_type, direction, ids).await
        }

        async fn version(&self) -> StorageResult<u64> {
            self.inner.version().await
        }

        async fn begin(&self) -> StorageResult<Box<dyn UnitOfWork>> {
            Ok(Box::new(BrokenEdgesUnit {
                inner: self.inner.begin().await?,
                remaining: self.edge_writes,
            }))
        }

        async fn load_dataset(&self) -> StorageResult<Dataset> {
            self.inner.load_dataset().await
        }
    }

    #[async_trait]
    impl UnitOfWork for BrokenEdgesUnit {
        async fn get_by_id(&self, kind: EntityKind, id: &EntityId) -> StorageResult<Entity> {
            self.inner.get_by_id(kind, id).await
        }

        async fn find_by_predicate(
            &self,
            kind: EntityKind,
            predicate: &Predicate,
        ) -> StorageResult<Vec<Entity>> {
            self.inner.find_by_predicate(kind, predicate).await
        }

        async fn has_edge(&self, edge_type: EdgeType, pair: &EdgePair) -> StorageResult<bool> {
            self.inner.has_edge(edge_type, pair).await
        }

        async fn insert(&mut self, entity: Entity) -> StorageResult<EntityId> {
            self.inner.insert(entity).await
        }

        async fn add_edge(
            &mut self,
            edge_type: EdgeType,
            character_id: &EntityId,
            target_id: &EntityId,
        ) -> StorageResult<bool> {
            if self.remaining == 0 {
                return Err(StorageError::Database("edge table offline".to_string()));
            }
            self.remaining -= 1;
            self.inner.add_edge(edge_type, character_id, target_id).await
        }

        async fn update_scalar(
            &mut self,
            kind: EntityKind,
            id: &EntityId,
            field: &str,
            value: serde_json::Value,
        ) -> StorageResult<Entity> {
            self.inner.update_scalar(kind, id, field, value).await
        }

        async fn commit(self: Box<Self>) -> StorageResult<u64> {
            self.inner.commit().await
        }

        async fn rollback(self: Box<Self>) -> StorageResult<()> {
            self.inner.rollback().await
        }
    }

    #[tokio::test]
    async fn test_apply_failure_rolls_back_partial_writes() {
        let storage = Arc::new(BrokenEdges {
            inner: MemoryStorage::from_dataset(&dataset()).unwrap(),
            edge_writes: 1,
        });
        let coordinator = coordinator_for(Arc::clone(&storage));
        let before = storage.load_dataset().await.unwrap();
        let version = storage.version().await.unwrap();

        // The row and the first pilot edge land in the unit, then the
        // second edge write fails
        let err = coordinator
            .add_character(
                NewCharacter::new("Wedge Antilles")
                    .with_starship("10")
                    .with_starship("12"),
            )
            .await
            .unwrap_err();

        assert_eq!(err.code(), "INTERNAL");
        assert_eq!(storage.load_dataset().await.unwrap(), before);
        assert_eq!(storage.version().await.unwrap(), version);
        assert!(storage
            .find_by_predicate(EntityKind::Character, &Predicate::name_contains("Wedge"))
            .await
            .unwrap()
            .is_empty());
        let falcon_pilots = storage
            .edges(
                EdgeType::Piloting,
                holocron_core::Direction::Incoming,
                &["10".into()],
            )
            .await
            .unwrap();
        assert_eq!(falcon_pilots, vec![EdgePair::new("14", "10")]);
        assert_eq!(
            phases(&coordinator),
            vec![
                MutationPhase::Pending,
                MutationPhase::Validating,
                MutationPhase::Applying,
                MutationPhase::Failed,
                MutationPhase::RolledBack
            ]
        );

        // Mutations without edge writes still go through
        assert!(coordinator.update_planet_population("2", 0.0).await.is_ok());
    }

    #[test]
    fn test_phase_transitions() {
        use MutationPhase::*;
        assert!(Pending.can_advance_to(Validating));
        assert!(Failed.can_advance_to(RolledBack));
        assert!(!Committed.can_advance_to(RolledBack));
        assert!(!Validating.can_advance_to(Committed));
        assert!(RolledBack.is_terminal());
        assert!(!Failed.is_terminal());
    }
}
