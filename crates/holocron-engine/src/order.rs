//! Deterministic ordering of resolved sequences
//!
//! Every policy breaks ties by id, so identical store state always yields
//! identical output.

use holocron_core::{Entity, Relationship};
use std::cmp::Ordering;

/// Sort key for a sequence of entities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderBy {
    Id,
    /// Name, title for films
    Name,
    /// Film episode number
    Episode,
    /// Kill `occurredAt`, rows without one last
    OccurredAt,
}

impl OrderBy {
    /// Ordering policy for a relationship's results
    pub fn for_relationship(relationship: Relationship) -> Self {
        match relationship {
            Relationship::PlanetResidents
            | Relationship::StarshipPilots
            | Relationship::FilmCharacters => Self::Name,
            Relationship::CharacterFilms => Self::Episode,
            Relationship::CharacterKills | Relationship::CharacterDeath => Self::OccurredAt,
            _ => Self::Id,
        }
    }

    fn compare(&self, a: &Entity, b: &Entity) -> Ordering {
        let primary = match self {
            Self::Id => Ordering::Equal,
            Self::Name => a.name().cmp(&b.name()),
            Self::Episode => episode(a).cmp(&episode(b)),
            Self::OccurredAt => occurred_at(a).cmp(&occurred_at(b)),
        };
        primary.then_with(|| a.id().cmp(b.id()))
    }
}

fn episode(entity: &Entity) -> Option<i32> {
    match entity {
        Entity::Film(f) => Some(f.episode_id),
        _ => None,
    }
}

// (missing, value) so rows without a timestamp sort after every dated row
fn occurred_at(entity: &Entity) -> (bool, Option<&str>) {
    let at = entity.as_kill().and_then(|k| k.occurred_at.as_deref());
    (at.is_none(), at)
}

/// Sort in place by the given policy
pub fn sort_entities(entities: &mut [Entity], order: OrderBy) {
    entities.sort_by(|a, b| order.compare(a, b));
}
