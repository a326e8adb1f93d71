//! Edge types and the relationship catalogue

use crate::entity::{EntityId, EntityKind};
use serde::{Deserialize, Serialize};

/// Many-to-many edge set between characters and another kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeType {
    /// Character pilots a starship
    Piloting,
    /// Character appears in a film
    Appearance,
}

impl EdgeType {
    pub const ALL: [EdgeType; 2] = [EdgeType::Piloting, EdgeType::Appearance];

    /// Kind on the non-character side of the edge
    pub fn target_kind(&self) -> EntityKind {
        match self {
            Self::Piloting => EntityKind::Starship,
            Self::Appearance => EntityKind::Film,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Piloting => "piloting",
            Self::Appearance => "appearance",
        }
    }
}

impl std::fmt::Display for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of an edge a lookup starts from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// From the character to the target
    Outgoing,
    /// From the target back to the character
    Incoming,
}

/// A single many-to-many edge
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgePair {
    pub character_id: EntityId,
    pub target_id: EntityId,
}

impl EdgePair {
    pub fn new(character_id: impl Into<EntityId>, target_id: impl Into<EntityId>) -> Self {
        Self {
            character_id: character_id.into(),
            target_id: target_id.into(),
        }
    }

    /// The end a lookup in `direction` starts from
    pub fn source(&self, direction: Direction) -> &EntityId {
        match direction {
            Direction::Outgoing => &self.character_id,
            Direction::Incoming => &self.target_id,
        }
    }

    /// The end a lookup in `direction` arrives at
    pub fn destination(&self, direction: Direction) -> &EntityId {
        match direction {
            Direction::Outgoing => &self.target_id,
            Direction::Incoming => &self.character_id,
        }
    }
}

/// How many values a relationship resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
    Count,
}

/// Every relationship field the resolver knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Relationship {
    CharacterHomeworld,
    CharacterStarships,
    CharacterFilms,
    CharacterKills,
    CharacterDeath,
    CharacterKillCount,
    PlanetResidents,
    StarshipPilots,
    FilmCharacters,
    KillKiller,
    KillVictim,
}

impl Relationship {
    pub const ALL: [Relationship; 11] = [
        Relationship::CharacterHomeworld,
        Relationship::CharacterStarships,
        Relationship::CharacterFilms,
        Relationship::CharacterKills,
        Relationship::CharacterDeath,
        Relationship::CharacterKillCount,
        Relationship::PlanetResidents,
        Relationship::StarshipPilots,
        Relationship::FilmCharacters,
        Relationship::KillKiller,
        Relationship::KillVictim,
    ];

    /// Look up a relationship by parent kind and field name
    pub fn parse(parent: EntityKind, name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|r| r.parent_kind() == parent && r.field_name() == name)
    }

    pub fn parent_kind(&self) -> EntityKind {
        match self {
            Self::CharacterHomeworld
            | Self::CharacterStarships
            | Self::CharacterFilms
            | Self::CharacterKills
            | Self::CharacterDeath
            | Self::CharacterKillCount => EntityKind::Character,
            Self::PlanetResidents => EntityKind::Planet,
            Self::StarshipPilots => EntityKind::Starship,
            Self::FilmCharacters => EntityKind::Film,
            Self::KillKiller | Self::KillVictim => EntityKind::Kill,
        }
    }

    /// Kind of the related entities
    pub fn child_kind(&self) -> EntityKind {
        match self {
            Self::CharacterHomeworld => EntityKind::Planet,
            Self::CharacterStarships => EntityKind::Starship,
            Self::CharacterFilms => EntityKind::Film,
            Self::CharacterKills | Self::CharacterDeath | Self::CharacterKillCount => {
                EntityKind::Kill
            }
            Self::PlanetResidents
            | Self::StarshipPilots
            | Self::FilmCharacters
            | Self::KillKiller
            | Self::KillVictim => EntityKind::Character,
        }
    }

    pub fn field_name(&self) -> &'static str {
        match self {
            Self::CharacterHomeworld => "homeworld",
            Self::CharacterStarships => "starships",
            Self::CharacterFilms => "films",
            Self::CharacterKills => "kills",
            Self::CharacterDeath => "death",
            Self::CharacterKillCount => "killCount",
            Self::PlanetResidents => "residents",
            Self::StarshipPilots => "pilots",
            Self::FilmCharacters => "characters",
            Self::KillKiller => "killer",
            Self::KillVictim => "victim",
        }
    }

    pub fn cardinality(&self) -> Cardinality {
        match self {
            Self::CharacterHomeworld | Self::CharacterDeath | Self::KillKiller | Self::KillVictim => {
                Cardinality::One
            }
            Self::CharacterKillCount => Cardinality::Count,
            _ => Cardinality::Many,
        }
    }

    /// Edge set and lookup direction backing a many-to-many relationship
    pub fn edge(&self) -> Option<(EdgeType, Direction)> {
        match self {
            Self::CharacterStarships => Some((EdgeType::Piloting, Direction::Outgoing)),
            Self::StarshipPilots => Some((EdgeType::Piloting, Direction::Incoming)),
            Self::CharacterFilms => Some((EdgeType::Appearance, Direction::Outgoing)),
            Self::FilmCharacters => Some((EdgeType::Appearance, Direction::Incoming)),
            _ => None,
        }
    }
}

impl std::fmt::Display for Relationship {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.parent_kind(), self.field_name())
    }
}
