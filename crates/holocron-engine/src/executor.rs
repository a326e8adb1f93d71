//! Operation execution
//!
//! Queries are completed breadth-first: for each level of the selection tree
//! every parent's relationship fields are registered before any is awaited,
//! then the children of all parents are completed together. A field that
//! fails yields `null` plus a [`FieldError`] at its path; its siblings still
//! resolve.

use crate::config::EngineConfig;
use crate::context::RequestContext;
use crate::mutation::{
    AddCharacter, AssignPilot, MutationCoordinator, RecordKill, UpdatePlanetPopulation,
};
use crate::queries::QueryRoot;
use crate::resolver::{PendingField, Resolved, Resolver};
use futures::future::{BoxFuture, FutureExt};
use holocron_core::{
    Entity, EntityId, EntityKind, Error, NewCharacter, NewKill, Operation, OperationKind,
    Relationship, Result, Selection, ViolationCode,
};
use holocron_storage::StorageBackend;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

type Path = Vec<Value>;

/// Error attached to one response field
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldError {
    /// Response keys and list indices from the root to the field
    pub path: Path,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violation: Option<ViolationCode>,
}

impl FieldError {
    pub fn new(path: Path, error: &Error) -> Self {
        Self {
            path,
            code: error.code().to_string(),
            message: error.to_string(),
            violation: error.violation().map(|v| v.code),
        }
    }
}

/// Result of one operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub data: Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
}

impl Response {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// First error whose path matches, keys as strings and indices as numbers
    pub fn error_at(&self, path: &[Value]) -> Option<&FieldError> {
        self.errors.iter().find(|e| e.path == path)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Where one parent's field value sits in the completed child list
enum Slot {
    Done(Value),
    One(usize),
    Many(usize, usize),
}

/// Executes pre-validated operations against a store
pub struct Executor<S: StorageBackend + ?Sized + 'static> {
    queries: QueryRoot<S>,
    resolver: Resolver<S>,
    coordinator: MutationCoordinator<S>,
    config: EngineConfig,
}

impl<S: StorageBackend + ?Sized + 'static> Executor<S> {
    pub fn new(storage: Arc<S>, config: EngineConfig) -> Self {
        let resolver = Resolver::new(Arc::clone(&storage), &config);
        Self {
            queries: QueryRoot::new(Arc::clone(&storage)),
            coordinator: MutationCoordinator::new(storage, resolver.clone()),
            resolver,
            config,
        }
    }

    pub fn queries(&self) -> &QueryRoot<S> {
        &self.queries
    }

    pub fn resolver(&self) -> &Resolver<S> {
        &self.resolver
    }

    pub fn coordinator(&self) -> &MutationCoordinator<S> {
        &self.coordinator
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn execute(&self, operation: &Operation) -> Response {
        let depth = operation.depth();
        if depth > self.config.max_selection_depth {
            let error = Error::InvalidArgument(format!(
                "Selection depth {} exceeds the limit of {}",
                depth, self.config.max_selection_depth
            ));
            return Response {
                data: Value::Null,
                errors: vec![FieldError::new(Vec::new(), &error)],
            };
        }

        let response = match operation.kind {
            OperationKind::Query => self.execute_query(&operation.selections).await,
            OperationKind::Mutation => self.execute_mutation(&operation.selections).await,
        };
        tracing::debug!(
            "Executed {} {} with {} error(s)",
            match operation.kind {
                OperationKind::Query => "query",
                OperationKind::Mutation => "mutation",
            },
            operation.name.as_deref().unwrap_or("<anonymous>"),
            response.errors.len()
        );
        response
    }

    /// Run a query and also hand back its request context, for inspecting
    /// loader statistics
    pub async fn execute_with_context(
        &self,
        selections: &[Selection],
    ) -> (Response, RequestContext<S>) {
        let ctx = self.resolver.context();
        let mut data = Map::new();
        let mut errors = Vec::new();

        for selection in selections {
            let key = selection.response_key().to_string();
            let path = vec![Value::from(key.clone())];
            let value = match self.root_field(selection).await {
                Ok(root) => self.complete(&ctx, root, selection, path, &mut errors).await,
                Err(e) => {
                    errors.push(FieldError::new(path, &e));
                    Value::Null
                }
            };
            data.insert(key, value);
        }

        tracing::debug!(
            "Request {} used {} batch(es)",
            ctx.id(),
            ctx.batch_count()
        );
        (
            Response {
                data: Value::Object(data),
                errors,
            },
            ctx,
        )
    }

    async fn execute_query(&self, selections: &[Selection]) -> Response {
        self.execute_with_context(selections).await.0
    }

    // Mutations run one after another, each answered from a fresh context
    // so no field sees state cached before the write
    async fn execute_mutation(&self, selections: &[Selection]) -> Response {
        let mut data = Map::new();
        let mut errors = Vec::new();

        for selection in selections {
            let key = selection.response_key().to_string();
            let path = vec![Value::from(key.clone())];
            let value = match self.mutation_field(selection).await {
                Ok(entity) => {
                    let ctx = self.resolver.context();
                    self.complete(&ctx, Resolved::One(entity), selection, path, &mut errors)
                        .await
                }
                Err(e) => {
                    errors.push(FieldError::new(path, &e));
                    Value::Null
                }
            };
            data.insert(key, value);
        }

        Response {
            data: Value::Object(data),
            errors,
        }
    }

    async fn root_field(&self, selection: &Selection) -> Result<Resolved> {
        let queries = &self.queries;
        Ok(match selection.name.as_str() {
            "character" => Resolved::One(queries.character(&id_arg(selection, "id")?).await?),
            "planet" => Resolved::One(queries.planet(&id_arg(selection, "id")?).await?),
            "starship" => Resolved::One(queries.starship(&id_arg(selection, "id")?).await?),
            "film" => Resolved::One(queries.film(&id_arg(selection, "id")?).await?),
            "kill" => Resolved::One(queries.kill(&id_arg(selection, "id")?).await?),
            "characters" => Resolved::Many(queries.list(EntityKind::Character).await?),
            "planets" => Resolved::Many(queries.list(EntityKind::Planet).await?),
            "starships" => Resolved::Many(queries.list(EntityKind::Starship).await?),
            "films" => Resolved::Many(queries.list(EntityKind::Film).await?),
            "searchCharacters" => {
                Resolved::Many(queries.search_characters(&str_arg(selection, "name")?).await?)
            }
            "filmsByEpisode" => Resolved::Many(queries.films_by_episode().await?),
            "kills" => Resolved::Many(
                queries
                    .kills(
                        opt_str_arg(selection, "method")?,
                        opt_str_arg(selection, "location")?,
                    )
                    .await?,
            ),
            other => {
                return Err(Error::InvalidArgument(format!(
                    "Unknown query field '{}'",
                    other
                )))
            }
        })
    }

    async fn mutation_field(&self, selection: &Selection) -> Result<Option<Entity>> {
        let coordinator = &self.coordinator;
        let (kind, id) = match selection.name.as_str() {
            "addCharacter" => {
                let input: NewCharacter = input_arg(selection, "input")?;
                let id = coordinator.run(&AddCharacter(input)).await?;
                (EntityKind::Character, id)
            }
            "assignPilot" => {
                let mutation = AssignPilot {
                    starship_id: id_arg(selection, "starshipId")?,
                    character_id: id_arg(selection, "characterId")?,
                };
                (EntityKind::Starship, coordinator.run(&mutation).await?)
            }
            "updatePlanetPopulation" => {
                let mutation = UpdatePlanetPopulation {
                    planet_id: id_arg(selection, "planetId")?,
                    population: f64_arg(selection, "population")?,
                };
                (EntityKind::Planet, coordinator.run(&mutation).await?)
            }
            "recordKill" => {
                let input: NewKill = input_arg(selection, "input")?;
                (EntityKind::Kill, coordinator.run(&RecordKill(input)).await?)
            }
            other => {
                return Err(Error::InvalidArgument(format!(
                    "Unknown mutation field '{}'",
                    other
                )))
            }
        };
        self.queries.entity(kind, &id).await
    }

    /// Turn a resolved value into response JSON under `selection`
    async fn complete(
        &self,
        ctx: &RequestContext<S>,
        value: Resolved,
        selection: &Selection,
        path: Path,
        errors: &mut Vec<FieldError>,
    ) -> Value {
        match value {
            Resolved::Count(n) => Value::from(n),
            Resolved::One(None) => Value::Null,
            Resolved::One(Some(entity)) => self
                .complete_level(ctx, vec![entity], &selection.children, vec![path], errors)
                .await
                .pop()
                .unwrap_or(Value::Null),
            Resolved::Many(entities) => {
                let paths = (0..entities.len()).map(|i| child_path(&path, i)).collect();
                Value::Array(
                    self.complete_level(ctx, entities, &selection.children, paths, errors)
                        .await,
                )
            }
        }
    }

    /// Complete one level: `entities[i]` lives at `paths[i]`
    fn complete_level<'a>(
        &'a self,
        ctx: &'a RequestContext<S>,
        entities: Vec<Entity>,
        selections: &'a [Selection],
        paths: Vec<Path>,
        errors: &'a mut Vec<FieldError>,
    ) -> BoxFuture<'a, Vec<Value>> {
        async move {
            if entities.is_empty() {
                return Vec::new();
            }

            // Parents are already in hand; seed the by-id loaders so the
            // existence check inside each field costs nothing
            for entity in &entities {
                ctx.entities(entity.kind())
                    .prime(entity.id().clone(), vec![entity.clone()]);
            }

            let rows: Vec<Map<String, Value>> = entities.iter().map(scalar_row).collect();
            let mut objects: Vec<Map<String, Value>> = vec![Map::new(); entities.len()];
            // `None` marks a scalar, already written into its object
            let mut related: Vec<(&Selection, Vec<Option<Result<PendingField<S>>>>)> = Vec::new();

            for selection in selections {
                let key = selection.response_key();
                if selection.name == "__typename" {
                    for (object, entity) in objects.iter_mut().zip(&entities) {
                        object.insert(key.to_string(), Value::from(entity.kind().as_str()));
                    }
                    continue;
                }

                let mut planned = Vec::with_capacity(entities.len());
                for (i, entity) in entities.iter().enumerate() {
                    let kind = entity.kind();
                    if let Some(relationship) = Relationship::parse(kind, &selection.name) {
                        planned.push(Some(Ok(self.resolver.prepare_relationship(
                            ctx,
                            relationship,
                            entity.id(),
                        ))));
                    } else if kind.has_scalar(&selection.name) {
                        let value = rows[i].get(&selection.name).cloned().unwrap_or(Value::Null);
                        objects[i].insert(key.to_string(), value);
                        planned.push(None);
                    } else {
                        planned.push(Some(Err(Error::unknown_relationship(
                            kind,
                            selection.name.as_str(),
                        ))));
                    }
                }
                if planned.iter().any(Option::is_some) {
                    related.push((selection, planned));
                }
            }

            for (selection, planned) in related {
                let key = selection.response_key();
                let results = futures::future::join_all(planned.into_iter().map(|plan| async move {
                    match plan {
                        Some(Ok(field)) => Some(field.resolve().await),
                        Some(Err(e)) => Some(Err(e)),
                        None => None,
                    }
                }))
                .await;

                let mut children = Vec::new();
                let mut child_paths = Vec::new();
                let mut slots = Vec::with_capacity(results.len());
                for (i, result) in results.into_iter().enumerate() {
                    let field_path = child_path(&paths[i], key);
                    let slot = match result {
                        None => None,
                        Some(Err(e)) => {
                            errors.push(FieldError::new(field_path, &e));
                            Some(Slot::Done(Value::Null))
                        }
                        Some(Ok(Resolved::Count(n))) => Some(Slot::Done(Value::from(n))),
                        Some(Ok(Resolved::One(None))) => Some(Slot::Done(Value::Null)),
                        Some(Ok(Resolved::One(Some(child)))) => {
                            children.push(child);
                            child_paths.push(field_path);
                            Some(Slot::One(children.len() - 1))
                        }
                        Some(Ok(Resolved::Many(list))) => {
                            let start = children.len();
                            for (j, child) in list.into_iter().enumerate() {
                                children.push(child);
                                child_paths.push(child_path(&field_path, j));
                            }
                            Some(Slot::Many(start, children.len() - start))
                        }
                    };
                    slots.push(slot);
                }

                let completed = self
                    .complete_level(ctx, children, &selection.children, child_paths, errors)
                    .await;
                for (object, slot) in objects.iter_mut().zip(slots) {
                    let value = match slot {
                        None => continue,
                        Some(Slot::Done(value)) => value,
                        Some(Slot::One(index)) => completed.get(index).cloned().unwrap_or(Value::Null),
                        Some(Slot::Many(start, len)) => Value::Array(
                            completed
                                .get(start..start + len)
                                .map(<[Value]>::to_vec)
                                .unwrap_or_default(),
                        ),
                    };
                    object.insert(key.to_string(), value);
                }
            }

            objects.into_iter().map(Value::Object).collect()
        }
        .boxed()
    }
}

fn scalar_row(entity: &Entity) -> Map<String, Value> {
    match serde_json::to_value(entity) {
        Ok(Value::Object(row)) => row,
        _ => Map::new(),
    }
}

fn child_path(path: &[Value], segment: impl Into<Value>) -> Path {
    let mut child = path.to_vec();
    child.push(segment.into());
    child
}

// ─────────────────────────────────────────────────────────────────────────────
// Arguments
// ─────────────────────────────────────────────────────────────────────────────

fn argument<'a>(selection: &'a Selection, name: &str) -> Result<&'a Value> {
    selection
        .arguments
        .get(name)
        .filter(|v| !v.is_null())
        .ok_or_else(|| {
            Error::InvalidArgument(format!(
                "Missing argument '{}' on '{}'",
                name, selection.name
            ))
        })
}

fn invalid(selection: &Selection, name: &str, expected: &str) -> Error {
    Error::InvalidArgument(format!(
        "Argument '{}' on '{}' must be {}",
        name, selection.name, expected
    ))
}

fn id_arg(selection: &Selection, name: &str) -> Result<EntityId> {
    match argument(selection, name)? {
        Value::String(s) => Ok(EntityId::new(s.clone())),
        Value::Number(n) => Ok(EntityId::new(n.to_string())),
        _ => Err(invalid(selection, name, "an id")),
    }
}

fn str_arg(selection: &Selection, name: &str) -> Result<String> {
    argument(selection, name)?
        .as_str()
        .map(String::from)
        .ok_or_else(|| invalid(selection, name, "a string"))
}

fn opt_str_arg(selection: &Selection, name: &str) -> Result<Option<String>> {
    match selection.arguments.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => str_arg(selection, name).map(Some),
    }
}

fn f64_arg(selection: &Selection, name: &str) -> Result<f64> {
    argument(selection, name)?
        .as_f64()
        .ok_or_else(|| invalid(selection, name, "a number"))
}

fn input_arg<T: DeserializeOwned>(selection: &Selection, name: &str) -> Result<T> {
    serde_json::from_value(argument(selection, name)?.clone())
        .map_err(|e| Error::InvalidArgument(format!("Invalid '{}': {}", name, e)))
}
