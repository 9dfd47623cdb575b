//! Replica state: the observed-remove set and its merge engine.

use crate::clock::{Context, Tag};
use crate::delta::Delta;
use crate::store::ValueStore;
use crate::types::{
    Diff, ExtractedValues, Key, Meta, Owner, Presence, Replica, ReplicaStatus, Topic,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Replicated presence state for one replica.
///
/// The state is an observed-remove set without tombstones: every membership
/// is labelled with a unique [`Tag`], removal is represented by causal
/// knowledge (the context plus the cloud of outstanding tags) rather than
/// per-element markers, and concurrent add/remove resolves add-wins. A
/// [`Delta`] buffer accumulates local changes between gossip rounds.
///
/// All operations are synchronous and CPU-bound; the state must be owned by
/// a single thread of control (a message loop, an actor, or a mutex).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    replica: Replica,
    context: Context,
    cloud: BTreeSet<Tag>,
    values: ValueStore,
    replicas: HashMap<Replica, ReplicaStatus>,
    delta: Delta,
}

impl State {
    /// Create fresh state for the given replica. The local replica starts
    /// up, with an empty store and an empty delta window anchored at clock
    /// zero.
    pub fn new(replica: impl Into<Replica>) -> Self {
        let replica = replica.into();
        let mut context = Context::new();
        context.insert(replica.clone(), 0);
        let delta = Delta::new(replica.clone(), context.project(&replica));
        Self {
            replica: replica.clone(),
            context,
            cloud: BTreeSet::new(),
            values: ValueStore::default(),
            replicas: HashMap::from([(replica, ReplicaStatus::Up)]),
            delta,
        }
    }

    /// Our replica name.
    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    /// The causal context: largest contiguous clock observed per replica.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Causal summary for anti-entropy: our replica name and context.
    pub fn clocks(&self) -> (&Replica, &Context) {
        (&self.replica, &self.context)
    }

    /// The delta accumulated since the last [`reset_delta`](State::reset_delta).
    pub fn delta(&self) -> &Delta {
        &self.delta
    }

    /// Number of live elements in the store, regardless of replica status.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if the store holds no elements.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    // =========================================================================
    // Local mutation
    // =========================================================================

    /// Register a presence. Bumps the local clock, stores the element, and
    /// records the add in the delta. Returns the tag assigned to it.
    pub fn join(
        &mut self,
        owner: Owner,
        topic: impl Into<Topic>,
        key: impl Into<Key>,
        meta: Meta,
    ) -> Tag {
        let tag = self.bump_clock();
        let element = Presence {
            owner,
            topic: topic.into(),
            key: key.into(),
            meta,
            tag: tag.clone(),
        };
        self.delta.record_add(tag.clone(), element.payload());
        self.values.insert(element);
        self.compact();
        tracing::trace!(replica = %self.replica, clock = tag.clock, "presence joined");
        tag
    }

    /// Remove every element of `owner` under `(topic, key)`. Metadata is not
    /// consulted when matching. Returns the removed elements; removals are
    /// recorded in the delta so peers drop the elements too.
    pub fn leave(&mut self, owner: Owner, topic: &str, key: &str) -> Vec<Presence> {
        let removed = self.values.remove_key(owner, topic, key);
        self.observe_local_removals(&removed);
        removed
    }

    /// Remove every element registered by `owner`, across all topics.
    pub fn leave_all(&mut self, owner: Owner) -> Vec<Presence> {
        let removed = self.values.remove_owner(owner);
        self.observe_local_removals(&removed);
        removed
    }

    fn observe_local_removals(&mut self, removed: &[Presence]) {
        if removed.is_empty() {
            return;
        }
        for element in removed {
            self.cloud.remove(&element.tag);
            self.delta.record_removal(&element.tag);
        }
        // A removal still advances our clock so downstream deltas can
        // summarise it.
        self.bump_clock();
        self.compact();
        tracing::trace!(replica = %self.replica, count = removed.len(), "presences left");
    }

    /// Advance the local clock and thread the new tag through the cloud and
    /// the delta window.
    fn bump_clock(&mut self) -> Tag {
        let clock = self.context.get(&self.replica) + 1;
        self.context.insert(self.replica.clone(), clock);
        let tag = Tag::new(self.replica.clone(), clock);
        self.cloud.insert(tag.clone());
        self.delta.observe_local(tag.clone());
        tag
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Every element whose tagging replica is currently up. Liveness is
    /// evaluated at call time, so a flapping replica is reflected without
    /// rewriting the store.
    pub fn online_list(&self) -> Vec<Presence> {
        let mut list: Vec<Presence> = self
            .values
            .iter()
            .filter(|element| self.is_replica_up(&element.tag.replica))
            .cloned()
            .collect();
        list.sort_by(|a, b| a.tag.cmp(&b.tag));
        list
    }

    /// Elements under `topic` whose tagging replica is currently up.
    pub fn get_by_topic(&self, topic: &str) -> Vec<Presence> {
        let mut list: Vec<Presence> = self
            .values
            .topic_elements(topic)
            .into_iter()
            .filter(|element| self.is_replica_up(&element.tag.replica))
            .cloned()
            .collect();
        list.sort_by(|a, b| a.tag.cmp(&b.tag));
        list
    }

    /// Every element registered by `owner`, ignoring replica status (used
    /// for owner cleanup).
    pub fn get_by_owner(&self, owner: Owner) -> Vec<Presence> {
        let mut list: Vec<Presence> = self
            .values
            .owner_elements(owner)
            .into_iter()
            .cloned()
            .collect();
        list.sort_by(|a, b| a.tag.cmp(&b.tag));
        list
    }

    /// Elements for `(owner, topic, key)`, ignoring replica status.
    pub fn get_by_key(&self, owner: Owner, topic: &str, key: &str) -> Vec<Presence> {
        let mut list: Vec<Presence> = self
            .values
            .key_elements(owner, topic, key)
            .into_iter()
            .cloned()
            .collect();
        list.sort_by(|a, b| a.tag.cmp(&b.tag));
        list
    }

    /// Whether `replica` counts as up. Replicas never introduced via
    /// [`replica_down`](State::replica_down) count as up.
    pub fn is_replica_up(&self, replica: &str) -> bool {
        !matches!(self.replicas.get(replica), Some(ReplicaStatus::Down))
    }

    // =========================================================================
    // Delta handling
    // =========================================================================

    /// True when the delta buffer has recorded changes since the last reset.
    pub fn has_delta(&self) -> bool {
        !self.delta.is_empty()
    }

    /// Detach the accumulated delta for gossip and open a fresh window
    /// anchored at the current local clock.
    pub fn reset_delta(&mut self) -> Delta {
        let window = self.context.project(&self.replica);
        std::mem::replace(&mut self.delta, Delta::new(self.replica.clone(), window))
    }

    /// Snapshot this state for transport: a copy with an empty store and a
    /// fresh delta (so the buffer is never transitively transmitted), plus
    /// the store flattened into a tag-keyed payload map.
    pub fn extract(&self) -> (State, ExtractedValues) {
        let map = self.values.extract();
        let mut snapshot = self.clone();
        snapshot.values = ValueStore::default();
        snapshot.delta = Delta::new(self.replica.clone(), self.context.project(&self.replica));
        (snapshot, map)
    }

    // =========================================================================
    // Merge engine
    // =========================================================================

    /// Merge a remote full-state snapshot, as produced by
    /// [`extract`](State::extract).
    ///
    /// Elements the remote lists under tags we have never seen become joins;
    /// local elements whose tags the remote knows but no longer lists have
    /// been observed removed there and become leaves. The contexts are
    /// upperbounded, the clouds unioned, and the result compacted.
    ///
    /// Merging does not register the remote in the replica membership map;
    /// callers that want down-filtering for a peer must introduce it via
    /// [`replica_up`](State::replica_up).
    pub fn merge(&mut self, remote: &State, remote_map: &ExtractedValues) -> Diff {
        let diff = self.merge_parts(&remote.context, &remote.cloud, remote_map);
        tracing::debug!(
            replica = %self.replica,
            remote = %remote.replica,
            joins = diff.joins.len(),
            leaves = diff.leaves.len(),
            "merged remote state"
        );
        diff
    }

    /// Merge a remote delta. The delta's cloud covers both pending adds and
    /// observed removals, so a tag in the cloud but absent from the values
    /// is treated as a removal.
    pub fn merge_delta(&mut self, delta: &Delta) -> Diff {
        let diff = self.merge_parts(&Context::new(), delta.cloud(), delta.values());
        tracing::debug!(
            replica = %self.replica,
            remote = %delta.replica(),
            joins = diff.joins.len(),
            leaves = diff.leaves.len(),
            "merged remote delta"
        );
        diff
    }

    fn merge_parts(
        &mut self,
        remote_context: &Context,
        remote_cloud: &BTreeSet<Tag>,
        remote_map: &ExtractedValues,
    ) -> Diff {
        let remote_knows =
            |tag: &Tag| remote_context.covers(tag) || remote_cloud.contains(tag);

        // New elements: listed remotely under tags we have never seen.
        let mut joins = Vec::new();
        for (tag, payload) in remote_map {
            if !self.knows(tag) {
                joins.push(Presence::from_payload(tag.clone(), payload.clone()));
            }
        }

        // Observed removals: local elements the remote knows about but no
        // longer lists.
        let mut leaves = Vec::new();
        for element in self.values.iter() {
            if remote_knows(&element.tag) && !remote_map.contains_key(&element.tag) {
                leaves.push(element.clone());
            }
        }

        self.cloud.extend(remote_cloud.iter().cloned());
        for element in &leaves {
            self.values.remove_element(element);
            self.cloud.remove(&element.tag);
            self.delta.record_removal(&element.tag);
        }
        for element in &joins {
            self.values.insert(element.clone());
        }

        self.context = self.context.upperbound(remote_context);
        self.compact();

        Diff { joins, leaves }
    }

    /// Whether `tag` is accounted for here: absorbed into the context or
    /// outstanding in the cloud.
    fn knows(&self, tag: &Tag) -> bool {
        self.context.covers(tag) || self.cloud.contains(tag)
    }

    /// Fold contiguous runs of cloud tags into the context. Tags at or below
    /// the context are redundant and dropped; the rest stay outstanding.
    fn compact(&mut self) {
        let cloud = std::mem::take(&mut self.cloud);
        for tag in cloud {
            let seen = self.context.get(&tag.replica);
            if tag.clock == seen + 1 {
                self.context.insert(tag.replica, tag.clock);
            } else if tag.clock > seen {
                self.cloud.insert(tag);
            }
        }
    }

    // =========================================================================
    // Replica membership
    // =========================================================================

    /// Mark `replica` up and return its elements as joins so the host can
    /// replay them. The store itself is untouched.
    pub fn replica_up(&mut self, replica: &str) -> Diff {
        tracing::info!(replica = %replica, "replica up");
        self.replicas
            .insert(replica.to_string(), ReplicaStatus::Up);
        Diff {
            joins: self.replica_elements(replica),
            leaves: Vec::new(),
        }
    }

    /// Mark `replica` down and return its elements as leaves. The store
    /// itself is untouched; [`replica_up`](State::replica_up) makes the same
    /// elements visible again.
    pub fn replica_down(&mut self, replica: &str) -> Diff {
        tracing::info!(replica = %replica, "replica down");
        self.replicas
            .insert(replica.to_string(), ReplicaStatus::Down);
        Diff {
            joins: Vec::new(),
            leaves: self.replica_elements(replica),
        }
    }

    /// Hard-evict a departed replica: delete its elements and drop its
    /// clocks from the context, the cloud, and the delta (values, cloud, and
    /// both range endpoints).
    pub fn remove_down_replicas(&mut self, replica: &str) {
        debug_assert!(
            replica != self.replica,
            "cannot evict the local replica"
        );
        let removed = self.values.remove_replica(replica);
        self.context.remove(replica);
        self.cloud.retain(|tag| tag.replica != replica);
        self.delta.strip_replica(replica);
        self.replicas.remove(replica);
        tracing::info!(replica = %replica, removed = removed.len(), "evicted down replica");
    }

    fn replica_elements(&self, replica: &str) -> Vec<Presence> {
        let mut list: Vec<Presence> = self
            .values
            .replica_elements(replica)
            .into_iter()
            .cloned()
            .collect();
        list.sort_by(|a, b| a.tag.cmp(&b.tag));
        list
    }
}
