//! Identifier and record types for the presence roster.

use crate::clock::Tag;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::BTreeMap;
use std::fmt;

/// A replica identifier (node name).
pub type Replica = String;

/// A topic namespace, e.g. `"room:lobby"`.
pub type Topic = String;

/// The key identifying a presence within a topic, e.g. `"user:123"`.
pub type Key = String;

/// Opaque local process/connection identity that contributed a presence.
///
/// The roster never interprets owners beyond equality; they exist so the
/// host can drop every membership of a dead connection in one call.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Owner(u64);

impl Owner {
    /// Wrap a raw owner id.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw value of this owner id.
    pub const fn as_raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner#{}", self.0)
    }
}

/// Opaque metadata attached to a membership record.
///
/// Stored and compared as raw bytes. Use [`Meta::encode`] and
/// [`Meta::decode`] to move typed attribute structs in and out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Meta(Vec<u8>);

impl Meta {
    /// Serialize a typed attribute value into an opaque meta payload.
    pub fn encode<M: Serialize>(meta: &M) -> Self {
        Self(postcard::to_allocvec(meta).unwrap_or_default())
    }

    /// Decode the payload back into a typed attribute value.
    pub fn decode<M: DeserializeOwned>(&self) -> Option<M> {
        postcard::from_bytes(&self.0).ok()
    }

    /// Wrap pre-encoded bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// The raw payload bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// One tracked presence: a membership record together with the tag of the
/// add event that created it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    /// The local identity that registered this presence.
    pub owner: Owner,
    /// The topic this presence belongs to.
    pub topic: Topic,
    /// The key identifying this presence within the topic.
    pub key: Key,
    /// Opaque metadata attached at join time.
    pub meta: Meta,
    /// Unique tag of the add event.
    pub tag: Tag,
}

impl Presence {
    pub(crate) fn from_payload(tag: Tag, payload: Payload) -> Self {
        Self {
            owner: payload.owner,
            topic: payload.topic,
            key: payload.key,
            meta: payload.meta,
            tag,
        }
    }

    pub(crate) fn payload(&self) -> Payload {
        Payload {
            owner: self.owner,
            topic: self.topic.clone(),
            key: self.key.clone(),
            meta: self.meta.clone(),
        }
    }
}

/// A membership record as carried in tag-keyed payload maps: everything a
/// [`Presence`] holds except the tag, which is the map key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// The local identity that registered this presence.
    pub owner: Owner,
    /// The topic this presence belongs to.
    pub topic: Topic,
    /// The key identifying this presence within the topic.
    pub key: Key,
    /// Opaque metadata attached at join time.
    pub meta: Meta,
}

/// A value store flattened by tag, as shipped in full-state snapshots and
/// carried inside deltas.
pub type ExtractedValues = BTreeMap<Tag, Payload>;

/// The observable difference produced by a merge or a replica membership
/// transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    /// Elements that became live.
    pub joins: Vec<Presence>,
    /// Elements that became absent.
    pub leaves: Vec<Presence>,
}

impl Diff {
    /// Check whether the operation had any observable effect.
    pub fn is_empty(&self) -> bool {
        self.joins.is_empty() && self.leaves.is_empty()
    }
}

/// Replica liveness used to filter queries. The local replica is always up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReplicaStatus {
    /// Replica is up; its elements are visible to queries.
    #[default]
    Up,
    /// Replica is down; its elements are hidden until it comes back.
    Down,
}
