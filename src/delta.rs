//! Delta summaries accumulated between gossip rounds.

use crate::clock::{Context, Tag};
use crate::error::DeltaError;
use crate::types::{ExtractedValues, Payload, Replica};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Incremental change summary: pending adds plus observed removals recorded
/// since the last reset, bracketed by the clock window they cover.
///
/// A delta is a reduced replica state. Its `values` map carries pending adds
/// keyed by tag; its `cloud` carries the tags of pending adds *and* of
/// observed removals, so a tag that is in the cloud but not in the values is
/// exactly an "I saw this element and it is gone" marker. The `(start, end)`
/// range records, per replica, the clock window the delta spans; two deltas
/// can only be concatenated when their windows touch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    replica: Replica,
    values: ExtractedValues,
    cloud: BTreeSet<Tag>,
    start: Context,
    end: Context,
}

impl Delta {
    pub(crate) fn new(replica: Replica, window: Context) -> Self {
        Self {
            replica,
            values: ExtractedValues::new(),
            cloud: BTreeSet::new(),
            start: window.clone(),
            end: window,
        }
    }

    /// The replica that accumulated this delta.
    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    /// The `(start, end)` contexts bracketing the clock window this delta
    /// covers for each replica.
    pub fn range(&self) -> (&Context, &Context) {
        (&self.start, &self.end)
    }

    /// True when no add or removal has been recorded since the last reset.
    pub fn is_empty(&self) -> bool {
        self.cloud.is_empty()
    }

    /// Number of events this delta summarises: observed removals plus
    /// pending adds.
    pub fn size(&self) -> usize {
        self.cloud.len() + self.values.len()
    }

    pub(crate) fn values(&self) -> &ExtractedValues {
        &self.values
    }

    pub(crate) fn cloud(&self) -> &BTreeSet<Tag> {
        &self.cloud
    }

    /// Whether `tag` is known to this delta, as a pending add or an observed
    /// removal.
    fn knows(&self, tag: &Tag) -> bool {
        self.cloud.contains(tag)
    }

    /// Record a locally produced tag and advance the window end to its
    /// clock.
    pub(crate) fn observe_local(&mut self, tag: Tag) {
        self.end.insert(tag.replica.clone(), tag.clock);
        self.cloud.insert(tag);
    }

    /// Record a pending add.
    pub(crate) fn record_add(&mut self, tag: Tag, payload: Payload) {
        self.cloud.insert(tag.clone());
        self.values.insert(tag, payload);
    }

    /// Record an observed removal: the tag stays in the cloud, the pending
    /// add (if any) is withdrawn.
    pub(crate) fn record_removal(&mut self, tag: &Tag) {
        self.values.remove(tag);
        self.cloud.insert(tag.clone());
    }

    /// Drop every trace of `replica` from this delta.
    pub(crate) fn strip_replica(&mut self, replica: &str) {
        self.values.retain(|tag, _| tag.replica != replica);
        self.cloud.retain(|tag| tag.replica != replica);
        self.start.remove(replica);
        self.end.remove(replica);
    }

    /// Concatenate this delta with a later one into a single summary
    /// covering both windows, so several gossip rounds can ride one
    /// envelope.
    ///
    /// Local entries the remote has observed removed are dropped; remote
    /// entries this delta has already seen (added or removed) are not
    /// re-added. The merged delta keeps this delta's replica and emits no
    /// joins/leaves, since concatenation never touches an authoritative
    /// store.
    ///
    /// # Errors
    ///
    /// Returns [`DeltaError::NotContiguous`] when this delta's end does not
    /// dominate the remote's start, i.e. stitching them would leave a gap in
    /// some replica's history. The caller should fall back to a full-state
    /// exchange or wait for an overlapping delta.
    pub fn merge(&self, remote: &Delta) -> Result<Delta, DeltaError> {
        if !self.end.dominates_or_equal(&remote.start) {
            return Err(DeltaError::NotContiguous);
        }

        let start = self.start.lowerbound(&remote.start);
        let end = self.end.upperbound(&remote.end);

        let mut cloud = self.cloud.clone();
        cloud.extend(remote.cloud.iter().cloned());

        let mut values: ExtractedValues = self
            .values
            .iter()
            .filter(|(tag, _)| remote.values.contains_key(tag) || !remote.knows(tag))
            .map(|(tag, payload)| (tag.clone(), payload.clone()))
            .collect();
        for (tag, payload) in &remote.values {
            if !values.contains_key(tag) && !self.knows(tag) {
                values.insert(tag.clone(), payload.clone());
            }
        }

        Ok(Delta {
            replica: self.replica.clone(),
            values,
            cloud,
            start,
            end,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::State;
    use crate::types::{Meta, Owner};

    fn owner(id: u64) -> Owner {
        Owner::new(id)
    }

    #[test]
    fn size_counts_adds_and_removals() {
        let mut state = State::new("r1");
        state.join(owner(1), "room:a", "user:1", Meta::default());
        state.join(owner(1), "room:a", "user:2", Meta::default());
        state.leave(owner(1), "room:a", "user:1");

        // Three cloud tags (two adds, one removal bump) and one surviving
        // pending add.
        let delta = state.reset_delta();
        assert_eq!(delta.size(), 4);
        assert_eq!(delta.values().len(), 1);
        assert!(!delta.is_empty());
    }

    #[test]
    fn contiguous_deltas_concatenate() {
        let mut state = State::new("r1");
        state.join(owner(1), "room:a", "user:1", Meta::default());
        state.join(owner(1), "room:a", "user:2", Meta::default());
        let first = state.reset_delta();

        state.join(owner(1), "room:a", "user:3", Meta::default());
        let second = state.reset_delta();

        let merged = first.merge(&second).expect("windows touch");
        assert_eq!(merged.values().len(), 3);
        let (start, end) = merged.range();
        assert_eq!(start.get("r1"), 0);
        assert_eq!(end.get("r1"), 3);
    }

    #[test]
    fn gapped_deltas_are_rejected() {
        let mut state = State::new("r1");
        state.join(owner(1), "room:a", "user:1", Meta::default());
        let first = state.reset_delta();

        state.join(owner(1), "room:a", "user:2", Meta::default());
        let _skipped = state.reset_delta();

        state.join(owner(1), "room:a", "user:3", Meta::default());
        let third = state.reset_delta();

        assert_eq!(first.merge(&third), Err(DeltaError::NotContiguous));
    }

    #[test]
    fn removal_in_later_delta_wins() {
        let mut state = State::new("r1");
        state.join(owner(1), "room:a", "user:1", Meta::default());
        let first = state.reset_delta();

        state.leave(owner(1), "room:a", "user:1");
        let second = state.reset_delta();

        let merged = first.merge(&second).expect("windows touch");
        assert!(merged.values().is_empty());
        assert!(merged.cloud().contains(&crate::clock::Tag::new("r1", 1)));
    }

    #[test]
    fn concatenated_delta_equals_sequential_merges() {
        let mut source = State::new("r1");
        source.join(owner(1), "room:a", "user:1", Meta::default());
        source.join(owner(2), "room:a", "user:2", Meta::default());
        let first = source.reset_delta();

        source.leave(owner(1), "room:a", "user:1");
        source.join(owner(3), "room:b", "user:3", Meta::default());
        let second = source.reset_delta();

        let merged = first.merge(&second).expect("windows touch");

        let mut sequential = State::new("r2");
        sequential.merge_delta(&first);
        sequential.merge_delta(&second);

        let mut batched = State::new("r2");
        batched.merge_delta(&merged);

        let mut seq_list = sequential.online_list();
        let mut bat_list = batched.online_list();
        seq_list.sort_by(|a, b| a.tag.cmp(&b.tag));
        bat_list.sort_by(|a, b| a.tag.cmp(&b.tag));
        assert_eq!(seq_list, bat_list);
        assert_eq!(sequential.context(), batched.context());
    }
}
