//! Entity (row) types for the store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Unique identifier for an entity
///
/// Ids are opaque strings. When both sides are numeric they compare as
/// numbers, so `"2"` sorts before `"10"`; numeric ids sort before any
/// non-numeric id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric value of the id, if it is a plain unsigned integer
    pub fn numeric(&self) -> Option<u64> {
        self.0.parse().ok()
    }
}

impl Ord for EntityId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.numeric(), other.numeric()) {
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for EntityId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Entity kind (table)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Character,
    Planet,
    Starship,
    Film,
    Kill,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Character,
        EntityKind::Planet,
        EntityKind::Starship,
        EntityKind::Film,
        EntityKind::Kill,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Character => "Character",
            Self::Planet => "Planet",
            Self::Starship => "Starship",
            Self::Film => "Film",
            Self::Kill => "Kill",
        }
    }

    /// Wire names of the scalar columns, `id` included
    pub fn scalar_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Character => &["id", "name", "height", "mass", "homeworldId"],
            Self::Planet => &["id", "name", "population", "climate", "terrain"],
            Self::Starship => &[
                "id",
                "name",
                "model",
                "manufacturer",
                "length",
                "crew",
                "passengers",
            ],
            Self::Film => &["id", "title", "episodeId", "releaseDate", "director"],
            Self::Kill => &[
                "id",
                "killerId",
                "victimId",
                "method",
                "location",
                "description",
                "occurredAt",
                "recordedAt",
            ],
        }
    }

    pub fn has_scalar(&self, field: &str) -> bool {
        self.scalar_fields().iter().any(|known| *known == field)
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A character
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Character {
    pub id: EntityId,
    pub name: String,
    /// Height in centimeters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<i32>,
    /// Mass in kilograms
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mass: Option<i32>,
    #[serde(default)]
    pub homeworld_id: Option<EntityId>,
}

impl Character {
    pub fn new(id: impl Into<EntityId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            height: None,
            mass: None,
            homeworld_id: None,
        }
    }

    pub fn with_homeworld(mut self, planet_id: impl Into<EntityId>) -> Self {
        self.homeworld_id = Some(planet_id.into());
        self
    }
}

/// A planet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Planet {
    pub id: EntityId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub population: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub climate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terrain: Option<String>,
}

impl Planet {
    pub fn new(id: impl Into<EntityId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            population: None,
            climate: None,
            terrain: None,
        }
    }
}

/// A starship
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Starship {
    pub id: EntityId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    /// Length in meters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crew: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passengers: Option<i64>,
}

impl Starship {
    pub fn new(id: impl Into<EntityId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            model: None,
            manufacturer: None,
            length: None,
            crew: None,
            passengers: None,
        }
    }
}

/// A film
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Film {
    pub id: EntityId,
    pub title: String,
    pub episode_id: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub director: Option<String>,
}

impl Film {
    pub fn new(id: impl Into<EntityId>, title: impl Into<String>, episode_id: i32) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            episode_id,
            release_date: None,
            director: None,
        }
    }
}

/// A recorded kill between two characters. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KillEvent {
    pub id: EntityId,
    pub killer_id: EntityId,
    pub victim_id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// In-universe time, ISO 8601 or free text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurred_at: Option<String>,
    /// When the store appended the row
    #[serde(default = "Utc::now")]
    pub recorded_at: DateTime<Utc>,
}

impl KillEvent {
    pub fn new(
        id: impl Into<EntityId>,
        killer_id: impl Into<EntityId>,
        victim_id: impl Into<EntityId>,
    ) -> Self {
        Self {
            id: id.into(),
            killer_id: killer_id.into(),
            victim_id: victim_id.into(),
            method: None,
            location: None,
            description: None,
            occurred_at: None,
            recorded_at: Utc::now(),
        }
    }
}

/// Any stored row, tagged by kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "__typename")]
pub enum Entity {
    Character(Character),
    Planet(Planet),
    Starship(Starship),
    Film(Film),
    Kill(KillEvent),
}

impl Entity {
    pub fn id(&self) -> &EntityId {
        match self {
            Self::Character(c) => &c.id,
            Self::Planet(p) => &p.id,
            Self::Starship(s) => &s.id,
            Self::Film(f) => &f.id,
            Self::Kill(k) => &k.id,
        }
    }

    pub fn set_id(&mut self, id: EntityId) {
        match self {
            Self::Character(c) => c.id = id,
            Self::Planet(p) => p.id = id,
            Self::Starship(s) => s.id = id,
            Self::Film(f) => f.id = id,
            Self::Kill(k) => k.id = id,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Character(_) => EntityKind::Character,
            Self::Planet(_) => EntityKind::Planet,
            Self::Starship(_) => EntityKind::Starship,
            Self::Film(_) => EntityKind::Film,
            Self::Kill(_) => EntityKind::Kill,
        }
    }

    /// Display name (film title for films, none for kill events)
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Character(c) => Some(&c.name),
            Self::Planet(p) => Some(&p.name),
            Self::Starship(s) => Some(&s.name),
            Self::Film(f) => Some(&f.title),
            Self::Kill(_) => None,
        }
    }

    /// Convert into a concrete record type
    pub fn into_record<R: Record>(self) -> Option<R> {
        R::from_entity(self)
    }

    pub fn as_character(&self) -> Option<&Character> {
        match self {
            Self::Character(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_kill(&self) -> Option<&KillEvent> {
        match self {
            Self::Kill(k) => Some(k),
            _ => None,
        }
    }
}

/// A concrete row type stored under one [`EntityKind`]
pub trait Record: Clone + Into<Entity> {
    const KIND: EntityKind;

    fn id(&self) -> &EntityId;

    fn from_entity(entity: Entity) -> Option<Self>;
}

impl Record for Character {
    const KIND: EntityKind = EntityKind::Character;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn from_entity(entity: Entity) -> Option<Self> {
        match entity {
            Entity::Character(c) => Some(c),
            _ => None,
        }
    }
}

impl Record for Planet {
    const KIND: EntityKind = EntityKind::Planet;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn from_entity(entity: Entity) -> Option<Self> {
        match entity {
            Entity::Planet(p) => Some(p),
            _ => None,
        }
    }
}

impl Record for Starship {
    const KIND: EntityKind = EntityKind::Starship;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn from_entity(entity: Entity) -> Option<Self> {
        match entity {
            Entity::Starship(s) => Some(s),
            _ => None,
        }
    }
}

impl Record for Film {
    const KIND: EntityKind = EntityKind::Film;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn from_entity(entity: Entity) -> Option<Self> {
        match entity {
            Entity::Film(f) => Some(f),
            _ => None,
        }
    }
}

impl Record for KillEvent {
    const KIND: EntityKind = EntityKind::Kill;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn from_entity(entity: Entity) -> Option<Self> {
        match entity {
            Entity::Kill(k) => Some(k),
            _ => None,
        }
    }
}

impl From<Character> for Entity {
    fn from(c: Character) -> Self {
        Self::Character(c)
    }
}

impl From<Planet> for Entity {
    fn from(p: Planet) -> Self {
        Self::Planet(p)
    }
}

impl From<Starship> for Entity {
    fn from(s: Starship) -> Self {
        Self::Starship(s)
    }
}

impl From<Film> for Entity {
    fn from(f: Film) -> Self {
        Self::Film(f)
    }
}

impl From<KillEvent> for Entity {
    fn from(k: KillEvent) -> Self {
        Self::Kill(k)
    }
}

/// Input for creating a new character
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCharacter {
    pub name: String,
    #[serde(default)]
    pub height: Option<i32>,
    #[serde(default)]
    pub mass: Option<i32>,
    #[serde(default)]
    pub homeworld_id: Option<EntityId>,
    #[serde(default)]
    pub starship_ids: Vec<EntityId>,
    #[serde(default)]
    pub film_ids: Vec<EntityId>,
}

impl NewCharacter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_homeworld(mut self, planet_id: impl Into<EntityId>) -> Self {
        self.homeworld_id = Some(planet_id.into());
        self
    }

    pub fn with_starship(mut self, starship_id: impl Into<EntityId>) -> Self {
        self.starship_ids.push(starship_id.into());
        self
    }

    pub fn with_film(mut self, film_id: impl Into<EntityId>) -> Self {
        self.film_ids.push(film_id.into());
        self
    }
}

/// Input for recording a kill event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewKill {
    pub killer_id: EntityId,
    pub victim_id: EntityId,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub occurred_at: Option<String>,
}

impl NewKill {
    pub fn new(killer_id: impl Into<EntityId>, victim_id: impl Into<EntityId>) -> Self {
        Self {
            killer_id: killer_id.into(),
            victim_id: victim_id.into(),
            method: None,
            location: None,
            description: None,
            occurred_at: None,
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_ordering_is_numeric_aware() {
        let mut ids: Vec<EntityId> = vec!["10".into(), "2".into(), "b".into(), "1".into(), "a".into()];
        ids.sort();
        let ordered: Vec<&str> = ids.iter().map(|id| id.as_str()).collect();
        assert_eq!(ordered, vec!["1", "2", "10", "a", "b"]);
    }

    #[test]
    fn test_entity_wire_names() {
        let character = Character::new("5", "Yoda");
        let json = serde_json::to_value(Entity::from(character)).unwrap();

        assert_eq!(json["__typename"], "Character");
        assert_eq!(json["name"], "Yoda");
        assert!(json["homeworldId"].is_null());
    }

    #[test]
    fn test_into_record() {
        let entity = Entity::from(Planet::new("1", "Tatooine"));
        assert_eq!(entity.kind(), EntityKind::Planet);
        assert!(entity.clone().into_record::<Character>().is_none());

        let planet: Planet = entity.into_record().unwrap();
        assert_eq!(planet.name, "Tatooine");
    }

    #[test]
    fn test_new_character_input_defaults() {
        let input: NewCharacter = serde_json::from_str(r#"{"name": "Rey"}"#).unwrap();
        assert_eq!(input.name, "Rey");
        assert!(input.homeworld_id.is_none());
        assert!(input.starship_ids.is_empty());
        assert!(input.film_ids.is_empty());
    }
}
