//! Causal clocks: per-replica logical clocks, tags, and the context algebra.

use crate::types::Replica;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Logical clock for causal ordering. Scoped to one replica; the first event
/// a replica produces carries clock 1.
pub type Clock = u64;

/// Unique label assigned to a single add event.
///
/// Tags order by replica first and clock second, which is the order cloud
/// compaction folds them into the context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tag {
    /// The replica that produced this event.
    pub replica: Replica,
    /// The logical clock value at production time.
    pub clock: Clock,
}

impl Tag {
    /// Create a new tag.
    pub fn new(replica: impl Into<Replica>, clock: Clock) -> Self {
        Self {
            replica: replica.into(),
            clock,
        }
    }
}

/// Per-replica summary of contiguously observed clocks.
///
/// `context.get(r) == c` asserts that every tag `(r, 1..=c)` is accounted
/// for: either still present in the value store or already observed removed.
/// Unknown replicas read as clock zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context(BTreeMap<Replica, Clock>);

impl Context {
    /// An empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Largest contiguous clock observed from `replica`, zero if none.
    pub fn get(&self, replica: &str) -> Clock {
        self.0.get(replica).copied().unwrap_or(0)
    }

    pub(crate) fn insert(&mut self, replica: Replica, clock: Clock) {
        self.0.insert(replica, clock);
    }

    pub(crate) fn remove(&mut self, replica: &str) {
        self.0.remove(replica);
    }

    /// True when this context has absorbed `tag`.
    pub fn covers(&self, tag: &Tag) -> bool {
        self.get(&tag.replica) >= tag.clock
    }

    /// Pointwise maximum over the union of both sides' replicas.
    pub fn upperbound(&self, other: &Context) -> Context {
        let mut merged = self.0.clone();
        for (replica, &clock) in &other.0 {
            let entry = merged.entry(replica.clone()).or_insert(0);
            if clock > *entry {
                *entry = clock;
            }
        }
        Context(merged)
    }

    /// Pointwise minimum over the replicas known to both sides. Replicas
    /// missing on either side are absent from the result.
    pub fn lowerbound(&self, other: &Context) -> Context {
        let mut merged = BTreeMap::new();
        for (replica, &clock) in &self.0 {
            if let Some(&theirs) = other.0.get(replica) {
                merged.insert(replica.clone(), clock.min(theirs));
            }
        }
        Context(merged)
    }

    /// True iff `self[r] >= other[r]` for every replica present in `other`.
    /// Replicas absent from `other` are vacuously satisfied.
    pub fn dominates_or_equal(&self, other: &Context) -> bool {
        other
            .0
            .iter()
            .all(|(replica, &clock)| self.get(replica) >= clock)
    }

    /// The context restricted to a single replica.
    pub(crate) fn project(&self, replica: &str) -> Context {
        let mut projected = BTreeMap::new();
        if let Some(&clock) = self.0.get(replica) {
            projected.insert(replica.to_string(), clock);
        }
        Context(projected)
    }

    /// True if no replica has been observed.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over `(replica, clock)` pairs in replica order.
    pub fn iter(&self) -> impl Iterator<Item = (&Replica, Clock)> {
        self.0.iter().map(|(replica, &clock)| (replica, clock))
    }
}

impl FromIterator<(Replica, Clock)> for Context {
    fn from_iter<T: IntoIterator<Item = (Replica, Clock)>>(iter: T) -> Self {
        Context(iter.into_iter().collect())
    }
}
