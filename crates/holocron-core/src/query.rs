//! Declarative row predicates and the pre-validated request tree

use crate::entity::{Entity, EntityId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Row filter understood by every storage backend
///
/// Kept declarative so a relational backend can translate it into a
/// `WHERE` clause; the in-memory backend evaluates [`Predicate::matches`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Predicate {
    /// Every row of the kind
    #[default]
    All,
    /// Rows whose id is in the set
    IdIn(BTreeSet<EntityId>),
    /// Case-insensitive substring match on name (title for films)
    NameContains(String),
    /// Characters whose homeworld is in the set
    HomeworldIn(BTreeSet<EntityId>),
    /// Kill events whose killer is in the set
    KillerIn(BTreeSet<EntityId>),
    /// Kill events whose victim is in the set
    VictimIn(BTreeSet<EntityId>),
    /// Kill events matching every given field exactly
    KillMatches {
        #[serde(default)]
        method: Option<String>,
        #[serde(default)]
        location: Option<String>,
    },
}

impl Predicate {
    pub fn ids<I, T>(ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<EntityId>,
    {
        Self::IdIn(ids.into_iter().map(Into::into).collect())
    }

    pub fn homeworld_in<I, T>(ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<EntityId>,
    {
        Self::HomeworldIn(ids.into_iter().map(Into::into).collect())
    }

    pub fn name_contains(text: impl Into<String>) -> Self {
        Self::NameContains(text.into())
    }

    /// Evaluate against one row. Predicates that do not apply to the row's
    /// kind never match.
    pub fn matches(&self, entity: &Entity) -> bool {
        match self {
            Self::All => true,
            Self::IdIn(ids) => ids.contains(entity.id()),
            Self::NameContains(text) => entity
                .name()
                .map(|name| name.to_lowercase().contains(&text.to_lowercase()))
                .unwrap_or(false),
            Self::HomeworldIn(ids) => match entity {
                Entity::Character(c) => c
                    .homeworld_id
                    .as_ref()
                    .map(|h| ids.contains(h))
                    .unwrap_or(false),
                _ => false,
            },
            Self::KillerIn(ids) => entity
                .as_kill()
                .map(|k| ids.contains(&k.killer_id))
                .unwrap_or(false),
            Self::VictimIn(ids) => entity
                .as_kill()
                .map(|k| ids.contains(&k.victim_id))
                .unwrap_or(false),
            Self::KillMatches { method, location } => match entity.as_kill() {
                Some(kill) => {
                    let method_ok = method.is_none() || kill.method == *method;
                    let location_ok = location.is_none() || kill.location == *location;
                    method_ok && location_ok
                }
                None => false,
            },
        }
    }
}

/// Whether an operation reads or writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    #[default]
    Query,
    Mutation,
}

/// One requested field with its arguments and child fields
///
/// The tree arrives already type-checked against the schema; arguments are
/// plain JSON values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default)]
    pub arguments: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub children: Vec<Selection>,
}

impl Selection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.arguments.insert(name.into(), value.into());
        self
    }

    pub fn with_child(mut self, child: Selection) -> Self {
        self.children.push(child);
        self
    }

    /// Add several leaf children at once
    pub fn with_fields(mut self, names: &[&str]) -> Self {
        self.children.extend(names.iter().map(|n| Selection::new(*n)));
        self
    }

    /// Key the value appears under in the response
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Depth of the deepest leaf, counting this node as 1
    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(Selection::depth).max().unwrap_or(0)
    }
}

/// A named, pre-validated operation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(default)]
    pub kind: OperationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub selections: Vec<Selection>,
}

impl Operation {
    pub fn query(selections: Vec<Selection>) -> Self {
        Self {
            kind: OperationKind::Query,
            name: None,
            selections,
        }
    }

    pub fn mutation(selections: Vec<Selection>) -> Self {
        Self {
            kind: OperationKind::Mutation,
            name: None,
            selections,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn depth(&self) -> usize {
        self.selections.iter().map(Selection::depth).max().unwrap_or(0)
    }
}
