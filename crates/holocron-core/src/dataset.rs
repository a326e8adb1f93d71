//! Full snapshot of every table and edge set

use crate::entity::{Character, Entity, EntityKind, Film, KillEvent, Planet, Starship};
use crate::error::Result;
use crate::relation::{EdgePair, EdgeType};
use serde::{Deserialize, Serialize};

/// Every row and edge in a store
///
/// Used to seed a store, to export one, and as the input to
/// [`crate::invariants::audit`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    #[serde(default)]
    pub characters: Vec<Character>,
    #[serde(default)]
    pub planets: Vec<Planet>,
    #[serde(default)]
    pub starships: Vec<Starship>,
    #[serde(default)]
    pub films: Vec<Film>,
    #[serde(default)]
    pub kills: Vec<KillEvent>,
    /// Character–starship pilot assignments
    #[serde(default)]
    pub pilots: Vec<EdgePair>,
    /// Character–film appearances
    #[serde(default)]
    pub appearances: Vec<EdgePair>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a dataset from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn with_characters(mut self, characters: Vec<Character>) -> Self {
        self.characters = characters;
        self
    }

    pub fn with_planets(mut self, planets: Vec<Planet>) -> Self {
        self.planets = planets;
        self
    }

    pub fn with_starships(mut self, starships: Vec<Starship>) -> Self {
        self.starships = starships;
        self
    }

    pub fn with_films(mut self, films: Vec<Film>) -> Self {
        self.films = films;
        self
    }

    pub fn with_kills(mut self, kills: Vec<KillEvent>) -> Self {
        self.kills = kills;
        self
    }

    pub fn with_pilots(mut self, pilots: Vec<EdgePair>) -> Self {
        self.pilots = pilots;
        self
    }

    pub fn with_appearances(mut self, appearances: Vec<EdgePair>) -> Self {
        self.appearances = appearances;
        self
    }

    /// Edge pairs of one edge set
    pub fn edges(&self, edge_type: EdgeType) -> &[EdgePair] {
        match edge_type {
            EdgeType::Piloting => &self.pilots,
            EdgeType::Appearance => &self.appearances,
        }
    }

    /// Rows of one kind as tagged entities
    pub fn entities(&self, kind: EntityKind) -> Vec<Entity> {
        match kind {
            EntityKind::Character => self.characters.iter().cloned().map(Entity::from).collect(),
            EntityKind::Planet => self.planets.iter().cloned().map(Entity::from).collect(),
            EntityKind::Starship => self.starships.iter().cloned().map(Entity::from).collect(),
            EntityKind::Film => self.films.iter().cloned().map(Entity::from).collect(),
            EntityKind::Kill => self.kills.iter().cloned().map(Entity::from).collect(),
        }
    }

    /// Total number of rows across all kinds
    pub fn row_count(&self) -> usize {
        self.characters.len()
            + self.planets.len()
            + self.starships.len()
            + self.films.len()
            + self.kills.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_builder() {
        let dataset = Dataset::new()
            .with_characters(vec![Character::new("1", "Luke Skywalker")])
            .with_starships(vec![Starship::new("1", "X-wing")])
            .with_pilots(vec![EdgePair::new("1", "1")]);

        assert_eq!(dataset.row_count(), 2);
        assert_eq!(dataset.edges(EdgeType::Piloting).len(), 1);
        assert!(dataset.edges(EdgeType::Appearance).is_empty());
        assert_eq!(dataset.entities(EntityKind::Starship)[0].name(), Some("X-wing"));
    }

    #[test]
    fn test_dataset_from_json() {
        let json = r#"{
            "characters": [{"id": "5", "name": "Yoda", "homeworldId": null}],
            "films": [{"id": "2", "title": "The Empire Strikes Back", "episodeId": 5}],
            "appearances": [{"characterId": "5", "targetId": "2"}]
        }"#;

        let dataset = Dataset::from_json(json).unwrap();
        assert_eq!(dataset.characters[0].name, "Yoda");
        assert!(dataset.characters[0].homeworld_id.is_none());
        assert_eq!(dataset.films[0].episode_id, 5);
        assert_eq!(dataset.appearances[0], EdgePair::new("5", "2"));
    }

    #[test]
    fn test_dataset_from_bad_json() {
        let err = Dataset::from_json("{ not json").unwrap_err();
        assert_eq!(err.code(), "SERIALIZATION");
    }
}
