//! Holocron Engine - Relationship resolution and mutation coordination
//!
//! Resolves relationship fields through per-request batch loaders, runs
//! mutations as single units of work, and executes pre-validated operation
//! trees against any [`holocron_storage::StorageBackend`].

pub mod batch;
pub mod config;
pub mod context;
pub mod executor;
pub mod loader;
pub mod mutation;
pub mod order;
pub mod queries;
pub mod resolver;
pub mod view;

pub use batch::{LoaderKind, StoreBatch};
pub use config::{ConfigError, EngineConfig};
pub use context::RequestContext;
pub use executor::{Executor, FieldError, Response};
pub use loader::{BatchFn, BatchLoader, LoadHandle, LoaderStats};
pub use mutation::{
    AddCharacter, AssignPilot, Mutation, MutationCoordinator, MutationId, MutationPhase,
    MutationTrace, RecordKill, UpdatePlanetPopulation,
};
pub use order::OrderBy;
pub use queries::QueryRoot;
pub use resolver::{PendingField, Resolved, Resolver};
pub use view::{CharacterView, KillView, PlanetView, StarshipView};
