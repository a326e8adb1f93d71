//! Many-to-many edge set keyed by entity pair

use holocron_core::{Direction, EdgePair, EntityId};
use std::collections::{BTreeMap, BTreeSet};

/// One edge set, looked up from either end
///
/// `outgoing` is the table of record (character → targets); `incoming` is an
/// index derived from it. Both are private and only [`EdgeTable::insert`]
/// writes them, so the two views cannot drift apart.
#[derive(Debug, Clone, Default)]
pub struct EdgeTable {
    outgoing: BTreeMap<EntityId, BTreeSet<EntityId>>,
    incoming: BTreeMap<EntityId, BTreeSet<EntityId>>,
    len: usize,
}

impl EdgeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pair; returns `false` if it was already present
    pub fn insert(&mut self, pair: EdgePair) -> bool {
        let added = self
            .outgoing
            .entry(pair.character_id.clone())
            .or_default()
            .insert(pair.target_id.clone());
        if added {
            self.incoming
                .entry(pair.target_id)
                .or_default()
                .insert(pair.character_id);
            self.len += 1;
        }
        added
    }

    pub fn contains(&self, pair: &EdgePair) -> bool {
        self.outgoing
            .get(&pair.character_id)
            .map(|targets| targets.contains(&pair.target_id))
            .unwrap_or(false)
    }

    /// Ids on the far side of `id`, ordered
    pub fn neighbors(&self, direction: Direction, id: &EntityId) -> impl Iterator<Item = &EntityId> {
        let index = match direction {
            Direction::Outgoing => &self.outgoing,
            Direction::Incoming => &self.incoming,
        };
        index.get(id).into_iter().flat_map(|set| set.iter())
    }

    /// Pairs touching `id` from the given side
    pub fn lookup(&self, direction: Direction, id: &EntityId) -> Vec<EdgePair> {
        self.neighbors(direction, id)
            .map(|other| match direction {
                Direction::Outgoing => EdgePair::new(id.clone(), other.clone()),
                Direction::Incoming => EdgePair::new(other.clone(), id.clone()),
            })
            .collect()
    }

    /// Every pair, ordered by character then target
    pub fn pairs(&self) -> Vec<EdgePair> {
        self.outgoing
            .iter()
            .flat_map(|(character, targets)| {
                targets
                    .iter()
                    .map(move |target| EdgePair::new(character.clone(), target.clone()))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether `incoming` mirrors `outgoing` exactly
    pub fn is_consistent(&self) -> bool {
        let forward: usize = self.outgoing.values().map(BTreeSet::len).sum();
        let backward: usize = self.incoming.values().map(BTreeSet::len).sum();
        forward == self.len
            && backward == self.len
            && self.outgoing.iter().all(|(character, targets)| {
                targets.iter().all(|target| {
                    self.incoming
                        .get(target)
                        .map(|chars| chars.contains(character))
                        .unwrap_or(false)
                })
            })
    }
}
