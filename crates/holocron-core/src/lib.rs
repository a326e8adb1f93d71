//! Holocron Core - Entity model for the relationship engine
//!
//! This crate provides the row types, relationship catalogue, error
//! taxonomy and pure invariant checks shared by the storage backends and
//! the resolution engine.

pub mod dataset;
pub mod entity;
pub mod error;
pub mod invariants;
pub mod query;
pub mod relation;

pub use dataset::Dataset;
pub use entity::{
    Character, Entity, EntityId, EntityKind, Film, KillEvent, NewCharacter, NewKill, Planet,
    Record, Starship,
};
pub use error::{Error, Result};
pub use invariants::{Violation, ViolationCode};
pub use query::{Operation, OperationKind, Predicate, Selection};
pub use relation::{Cardinality, Direction, EdgePair, EdgeType, Relationship};
