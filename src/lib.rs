//! Convergent presence roster for distributed trackers.
//!
//! `roster` is the replicated core of a presence tracker: a set of
//! `(owner, topic, key, meta)` memberships contributed by many replicas
//! that converges under arbitrary message reordering, loss, and
//! duplication. It is an observed-remove set without tombstones: each add
//! event carries a unique tag, and removal is expressed through causal
//! knowledge (a per-replica context plus a cloud of outstanding tags)
//! instead of per-element markers. Concurrent add and remove resolves
//! add-wins.
//!
//! # Architecture
//!
//! - [`State`] owns the element store, the causal context, the cloud, and a
//!   replica membership map used to filter queries.
//! - [`Delta`] accumulates local adds and observed removals between gossip
//!   rounds; contiguous deltas can be concatenated so several rounds ride
//!   one envelope.
//! - Merging a remote snapshot or delta yields a [`Diff`] of joins and
//!   leaves for the surrounding system to act on.
//!
//! Transport, gossip scheduling, and subscriber dispatch live outside this
//! crate: the host delivers remote payloads to [`State::merge`] /
//! [`State::merge_delta`], consumes the returned diffs, and reports peer
//! liveness through [`State::replica_up`] / [`State::replica_down`]. The
//! state itself is single-threaded; wrap it in whatever serialisation the
//! host already has (a message loop, an actor, or a mutex).
//!
//! # Example
//!
//! ```
//! use roster::{Meta, Owner, State};
//!
//! let mut a = State::new("a@host");
//! let mut b = State::new("b@host");
//!
//! a.join(Owner::new(1), "room:lobby", "user:ada", Meta::default());
//! b.join(Owner::new(7), "room:lobby", "user:brin", Meta::default());
//!
//! // Gossip B's full state into A.
//! let (snapshot, map) = b.extract();
//! let diff = a.merge(&snapshot, &map);
//! assert_eq!(diff.joins.len(), 1);
//! assert_eq!(a.online_list().len(), 2);
//!
//! // A removal converges the same way.
//! b.leave(Owner::new(7), "room:lobby", "user:brin");
//! let (snapshot, map) = b.extract();
//! let diff = a.merge(&snapshot, &map);
//! assert_eq!(diff.leaves.len(), 1);
//! assert_eq!(a.online_list().len(), 1);
//! ```

mod clock;
mod delta;
mod error;
mod state;
mod store;
mod types;

pub use clock::{Clock, Context, Tag};
pub use delta::Delta;
pub use error::DeltaError;
pub use state::State;
pub use types::{
    Diff, ExtractedValues, Key, Meta, Owner, Payload, Presence, Replica, ReplicaStatus, Topic,
};
