//! Consistency invariants over entities and edges
//!
//! Every predicate here is pure: callers gather the facts (does a row exist,
//! is there a prior death) and the predicate decides. Each failure names the
//! rule it defends through a [`ViolationCode`].

use crate::dataset::Dataset;
use crate::entity::{EntityId, EntityKind, KillEvent};
use crate::relation::EdgeType;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Maximum length for entity names (256 chars)
pub const MAX_NAME_LEN: usize = 256;

/// Maximum related ids in a single mutation input (100)
pub const MAX_RELATED_IDS: usize = 100;

/// Stable code naming the violated rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationCode {
    EmptyName,
    NameTooLong,
    TooManyReferences,
    DanglingReference,
    SelfKill,
    DuplicateDeath,
    NegativePopulation,
    DuplicateId,
    UnknownField,
    ImmutableField,
    InvalidValue,
}

impl ViolationCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmptyName => "EMPTY_NAME",
            Self::NameTooLong => "NAME_TOO_LONG",
            Self::TooManyReferences => "TOO_MANY_REFERENCES",
            Self::DanglingReference => "DANGLING_REFERENCE",
            Self::SelfKill => "SELF_KILL",
            Self::DuplicateDeath => "DUPLICATE_DEATH",
            Self::NegativePopulation => "NEGATIVE_POPULATION",
            Self::DuplicateId => "DUPLICATE_ID",
            Self::UnknownField => "UNKNOWN_FIELD",
            Self::ImmutableField => "IMMUTABLE_FIELD",
            Self::InvalidValue => "INVALID_VALUE",
        }
    }
}

impl std::fmt::Display for ViolationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A broken invariant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub code: ViolationCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<EntityKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
}

impl Violation {
    pub fn new(code: ViolationCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            kind: None,
            id: None,
        }
    }

    /// Attach the offending row
    pub fn with_subject(mut self, kind: EntityKind, id: impl Into<EntityId>) -> Self {
        self.kind = Some(kind);
        self.id = Some(id.into());
        self
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for Violation {}

/// Validate a character (or other entity) name
pub fn validate_name(name: &str) -> Result<(), Violation> {
    if name.trim().is_empty() {
        return Err(Violation::new(
            ViolationCode::EmptyName,
            "Name cannot be empty",
        ));
    }
    let chars = name.chars().count();
    if chars > MAX_NAME_LEN {
        return Err(Violation::new(
            ViolationCode::NameTooLong,
            format!("Name too long: {} chars (max {})", chars, MAX_NAME_LEN),
        ));
    }
    Ok(())
}

/// Validate how many related ids one input may carry
pub fn validate_related_count(field: &str, count: usize) -> Result<(), Violation> {
    if count > MAX_RELATED_IDS {
        return Err(Violation::new(
            ViolationCode::TooManyReferences,
            format!("Too many ids in {}: {} (max {})", field, count, MAX_RELATED_IDS),
        ));
    }
    Ok(())
}

/// Referential integrity: `id` must name an existing `kind` row
pub fn require_reference(kind: EntityKind, id: &EntityId, exists: bool) -> Result<(), Violation> {
    if exists {
        Ok(())
    } else {
        Err(Violation::new(
            ViolationCode::DanglingReference,
            format!("{} {} does not exist", kind, id),
        )
        .with_subject(kind, id.clone()))
    }
}

/// A kill event's killer and victim differ
pub fn check_not_self_kill(killer_id: &EntityId, victim_id: &EntityId) -> Result<(), Violation> {
    if killer_id == victim_id {
        return Err(Violation::new(
            ViolationCode::SelfKill,
            format!("Character {} cannot kill itself", killer_id),
        )
        .with_subject(EntityKind::Character, killer_id.clone()));
    }
    Ok(())
}

/// A character dies at most once
pub fn check_no_prior_death(
    victim_id: &EntityId,
    prior: Option<&KillEvent>,
) -> Result<(), Violation> {
    match prior {
        Some(kill) => Err(Violation::new(
            ViolationCode::DuplicateDeath,
            format!(
                "Character {} already has a recorded death (kill {})",
                victim_id, kill.id
            ),
        )
        .with_subject(EntityKind::Character, victim_id.clone())),
        None => Ok(()),
    }
}

/// Planet population is a finite, non-negative number
pub fn check_population(planet_id: &EntityId, population: f64) -> Result<(), Violation> {
    if !population.is_finite() {
        return Err(Violation::new(
            ViolationCode::InvalidValue,
            format!("Population must be a finite number, got {}", population),
        )
        .with_subject(EntityKind::Planet, planet_id.clone()));
    }
    if population < 0.0 {
        return Err(Violation::new(
            ViolationCode::NegativePopulation,
            format!("Population cannot be negative, got {}", population),
        )
        .with_subject(EntityKind::Planet, planet_id.clone()));
    }
    Ok(())
}

/// Check every invariant over a full snapshot
///
/// Returns all violations found; an empty vector means the snapshot is
/// consistent.
pub fn audit(dataset: &Dataset) -> Vec<Violation> {
    let mut violations = Vec::new();

    let characters = collect_ids(
        EntityKind::Character,
        dataset.characters.iter().map(|c| &c.id),
        &mut violations,
    );
    let planets = collect_ids(
        EntityKind::Planet,
        dataset.planets.iter().map(|p| &p.id),
        &mut violations,
    );
    let starships = collect_ids(
        EntityKind::Starship,
        dataset.starships.iter().map(|s| &s.id),
        &mut violations,
    );
    let films = collect_ids(
        EntityKind::Film,
        dataset.films.iter().map(|f| &f.id),
        &mut violations,
    );
    collect_ids(
        EntityKind::Kill,
        dataset.kills.iter().map(|k| &k.id),
        &mut violations,
    );

    for character in &dataset.characters {
        if let Err(v) = validate_name(&character.name) {
            violations.push(v.with_subject(EntityKind::Character, character.id.clone()));
        }
        if let Some(homeworld) = &character.homeworld_id {
            if let Err(v) =
                require_reference(EntityKind::Planet, homeworld, planets.contains(homeworld))
            {
                violations.push(v);
            }
        }
    }

    let names = dataset
        .planets
        .iter()
        .map(|p| (EntityKind::Planet, &p.id, &p.name))
        .chain(dataset.starships.iter().map(|s| (EntityKind::Starship, &s.id, &s.name)))
        .chain(dataset.films.iter().map(|f| (EntityKind::Film, &f.id, &f.title)));
    for (kind, id, name) in names {
        if let Err(v) = validate_name(name) {
            violations.push(v.with_subject(kind, id.clone()));
        }
    }

    for planet in &dataset.planets {
        if let Some(population) = planet.population {
            if let Err(v) = check_population(&planet.id, population) {
                violations.push(v);
            }
        }
    }

    for edge_type in EdgeType::ALL {
        let targets = match edge_type {
            EdgeType::Piloting => &starships,
            EdgeType::Appearance => &films,
        };
        for pair in dataset.edges(edge_type) {
            let character_ok = characters.contains(&pair.character_id);
            if let Err(v) = require_reference(EntityKind::Character, &pair.character_id, character_ok) {
                violations.push(v);
            }
            let target_ok = targets.contains(&pair.target_id);
            if let Err(v) = require_reference(edge_type.target_kind(), &pair.target_id, target_ok) {
                violations.push(v);
            }
        }
    }

    let mut deaths: HashMap<&EntityId, &KillEvent> = HashMap::new();
    for kill in &dataset.kills {
        for id in [&kill.killer_id, &kill.victim_id] {
            if let Err(v) = require_reference(EntityKind::Character, id, characters.contains(id)) {
                violations.push(v);
            }
        }
        if let Err(v) = check_not_self_kill(&kill.killer_id, &kill.victim_id) {
            violations.push(v);
        }
        if let Err(v) = check_no_prior_death(&kill.victim_id, deaths.get(&kill.victim_id).copied()) {
            violations.push(v);
        }
        deaths.entry(&kill.victim_id).or_insert(kill);
    }

    if !violations.is_empty() {
        tracing::debug!("Audit found {} violation(s)", violations.len());
    }
    violations
}

fn collect_ids<'a>(
    kind: EntityKind,
    ids: impl Iterator<Item = &'a EntityId>,
    violations: &mut Vec<Violation>,
) -> HashSet<EntityId> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id.clone()) {
            violations.push(
                Violation::new(
                    ViolationCode::DuplicateId,
                    format!("{} id {} is used more than once", kind, id),
                )
                .with_subject(kind, id.clone()),
            );
        }
    }
    seen
}
