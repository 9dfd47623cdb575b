//! Indexed storage for live presence elements.
//!
//! The store is owned exclusively by its [`State`](crate::State). The
//! primary multimap keys elements by `(Owner, Topic)`; secondary indexes
//! keep the pattern queries the roster needs cheap: all elements of an
//! owner, of a topic, or tagged by a replica.

use crate::types::{ExtractedValues, Owner, Presence, Replica, Topic};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct ValueStore {
    /// Primary multimap; a bucket may hold several entries for the same key
    /// when an owner re-joins before the old tag is observed removed.
    values: HashMap<(Owner, Topic), Vec<Presence>>,
    /// Owner -> topics currently holding at least one of its elements.
    owners: HashMap<Owner, HashSet<Topic>>,
    /// Topic -> owners currently present in it.
    topics: HashMap<Topic, HashSet<Owner>>,
    /// Tagging replica -> buckets holding at least one of its elements.
    replicas: HashMap<Replica, HashSet<(Owner, Topic)>>,
}

impl ValueStore {
    pub(crate) fn insert(&mut self, element: Presence) {
        let bucket = (element.owner, element.topic.clone());
        self.owners
            .entry(element.owner)
            .or_default()
            .insert(element.topic.clone());
        self.topics
            .entry(element.topic.clone())
            .or_default()
            .insert(element.owner);
        self.replicas
            .entry(element.tag.replica.clone())
            .or_default()
            .insert(bucket.clone());
        self.values.entry(bucket).or_default().push(element);
    }

    /// Remove every element of `owner` under `topic` matching `key`.
    pub(crate) fn remove_key(&mut self, owner: Owner, topic: &str, key: &str) -> Vec<Presence> {
        let bucket = (owner, topic.to_string());
        let mut removed = Vec::new();
        if let Some(entries) = self.values.get_mut(&bucket) {
            entries.retain(|element| {
                if element.key == key {
                    removed.push(element.clone());
                    false
                } else {
                    true
                }
            });
        }
        self.unindex_removed(&bucket, &removed);
        removed
    }

    /// Remove every element registered by `owner`, across all topics.
    pub(crate) fn remove_owner(&mut self, owner: Owner) -> Vec<Presence> {
        let Some(topics) = self.owners.get(&owner) else {
            return Vec::new();
        };
        let topics: Vec<Topic> = topics.iter().cloned().collect();
        let mut removed = Vec::new();
        for topic in topics {
            let bucket = (owner, topic);
            if let Some(entries) = self.values.remove(&bucket) {
                self.unindex_removed(&bucket, &entries);
                removed.extend(entries);
            }
        }
        removed
    }

    /// Remove the single entry carrying `element`'s tag, if still present.
    pub(crate) fn remove_element(&mut self, element: &Presence) -> Option<Presence> {
        let bucket = (element.owner, element.topic.clone());
        let entries = self.values.get_mut(&bucket)?;
        let idx = entries.iter().position(|e| e.tag == element.tag)?;
        let removed = [entries.remove(idx)];
        self.unindex_removed(&bucket, &removed);
        let [removed] = removed;
        Some(removed)
    }

    /// Remove every element tagged by `replica`.
    pub(crate) fn remove_replica(&mut self, replica: &str) -> Vec<Presence> {
        let Some(buckets) = self.replicas.get(replica) else {
            return Vec::new();
        };
        let buckets: Vec<(Owner, Topic)> = buckets.iter().cloned().collect();
        let mut removed = Vec::new();
        for bucket in buckets {
            let mut dropped = Vec::new();
            if let Some(entries) = self.values.get_mut(&bucket) {
                entries.retain(|element| {
                    if element.tag.replica == replica {
                        dropped.push(element.clone());
                        false
                    } else {
                        true
                    }
                });
            }
            self.unindex_removed(&bucket, &dropped);
            removed.extend(dropped);
        }
        removed
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Presence> {
        self.values.values().flatten()
    }

    pub(crate) fn owner_elements(&self, owner: Owner) -> Vec<&Presence> {
        let Some(topics) = self.owners.get(&owner) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for topic in topics {
            if let Some(entries) = self.values.get(&(owner, topic.clone())) {
                out.extend(entries.iter());
            }
        }
        out
    }

    pub(crate) fn topic_elements(&self, topic: &str) -> Vec<&Presence> {
        let Some(owners) = self.topics.get(topic) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for owner in owners {
            if let Some(entries) = self.values.get(&(*owner, topic.to_string())) {
                out.extend(entries.iter());
            }
        }
        out
    }

    pub(crate) fn key_elements(&self, owner: Owner, topic: &str, key: &str) -> Vec<&Presence> {
        self.values
            .get(&(owner, topic.to_string()))
            .map(|entries| entries.iter().filter(|e| e.key == key).collect())
            .unwrap_or_default()
    }

    pub(crate) fn replica_elements(&self, replica: &str) -> Vec<&Presence> {
        let Some(buckets) = self.replicas.get(replica) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for bucket in buckets {
            if let Some(entries) = self.values.get(bucket) {
                out.extend(entries.iter().filter(|e| e.tag.replica == replica));
            }
        }
        out
    }

    pub(crate) fn len(&self) -> usize {
        self.values.values().map(Vec::len).sum()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Flatten the store into the tag-keyed payload map shipped in
    /// snapshots.
    pub(crate) fn extract(&self) -> ExtractedValues {
        self.iter()
            .map(|element| (element.tag.clone(), element.payload()))
            .collect()
    }

    /// Repair the secondary indexes for `bucket` after `removed` entries
    /// left it.
    fn unindex_removed(&mut self, bucket: &(Owner, Topic), removed: &[Presence]) {
        if removed.is_empty() {
            return;
        }
        let (owner, topic) = bucket;
        let bucket_gone = self
            .values
            .get(bucket)
            .map(|entries| entries.is_empty())
            .unwrap_or(true);
        if bucket_gone {
            self.values.remove(bucket);
            if let Some(topics) = self.owners.get_mut(owner) {
                topics.remove(topic);
                if topics.is_empty() {
                    self.owners.remove(owner);
                }
            }
            if let Some(owners) = self.topics.get_mut(topic) {
                owners.remove(owner);
                if owners.is_empty() {
                    self.topics.remove(topic);
                }
            }
        }
        let lost: HashSet<&Replica> = removed.iter().map(|e| &e.tag.replica).collect();
        for replica in lost {
            let still_tagged = self
                .values
                .get(bucket)
                .is_some_and(|entries| entries.iter().any(|e| &e.tag.replica == replica));
            if !still_tagged {
                if let Some(buckets) = self.replicas.get_mut(replica) {
                    buckets.remove(bucket);
                    if buckets.is_empty() {
                        self.replicas.remove(replica);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Tag;
    use crate::types::Meta;

    fn element(owner: u64, topic: &str, key: &str, replica: &str, clock: u64) -> Presence {
        Presence {
            owner: Owner::new(owner),
            topic: topic.to_string(),
            key: key.to_string(),
            meta: Meta::default(),
            tag: Tag::new(replica, clock),
        }
    }

    #[test]
    fn insert_and_query_by_owner_topic_key() {
        let mut store = ValueStore::default();
        store.insert(element(1, "room:a", "user:1", "r1", 1));
        store.insert(element(1, "room:b", "user:1", "r1", 2));
        store.insert(element(2, "room:a", "user:2", "r2", 1));

        assert_eq!(store.len(), 3);
        assert_eq!(store.owner_elements(Owner::new(1)).len(), 2);
        assert_eq!(store.topic_elements("room:a").len(), 2);
        assert_eq!(store.key_elements(Owner::new(1), "room:a", "user:1").len(), 1);
        assert_eq!(store.key_elements(Owner::new(1), "room:a", "user:9").len(), 0);
        assert_eq!(store.replica_elements("r2").len(), 1);
    }

    #[test]
    fn remove_key_prunes_indexes() {
        let mut store = ValueStore::default();
        store.insert(element(1, "room:a", "user:1", "r1", 1));
        store.insert(element(1, "room:a", "user:2", "r1", 2));

        let removed = store.remove_key(Owner::new(1), "room:a", "user:1");
        assert_eq!(removed.len(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.topic_elements("room:a").len(), 1);
        assert_eq!(store.replica_elements("r1").len(), 1);

        let removed = store.remove_key(Owner::new(1), "room:a", "user:2");
        assert_eq!(removed.len(), 1);
        assert!(store.is_empty());
        assert!(store.topic_elements("room:a").is_empty());
        assert!(store.replica_elements("r1").is_empty());
        assert!(store.owner_elements(Owner::new(1)).is_empty());
    }

    #[test]
    fn remove_owner_spans_topics() {
        let mut store = ValueStore::default();
        store.insert(element(1, "room:a", "user:1", "r1", 1));
        store.insert(element(1, "room:b", "user:1", "r1", 2));
        store.insert(element(2, "room:a", "user:2", "r1", 3));

        let removed = store.remove_owner(Owner::new(1));
        assert_eq!(removed.len(), 2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.topic_elements("room:a").len(), 1);
        assert!(store.topic_elements("room:b").is_empty());
    }

    #[test]
    fn remove_replica_leaves_other_tags_in_bucket() {
        let mut store = ValueStore::default();
        store.insert(element(1, "room:a", "user:1", "r1", 1));
        store.insert(element(1, "room:a", "user:1", "r2", 4));

        let removed = store.remove_replica("r1");
        assert_eq!(removed.len(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.replica_elements("r1").is_empty());
        assert_eq!(store.replica_elements("r2").len(), 1);
        assert_eq!(store.key_elements(Owner::new(1), "room:a", "user:1").len(), 1);
    }

    #[test]
    fn remove_element_targets_one_tag() {
        let mut store = ValueStore::default();
        let first = element(1, "room:a", "user:1", "r1", 1);
        let second = element(1, "room:a", "user:1", "r1", 2);
        store.insert(first.clone());
        store.insert(second.clone());

        assert!(store.remove_element(&first).is_some());
        assert!(store.remove_element(&first).is_none());
        assert_eq!(store.len(), 1);
        assert_eq!(store.replica_elements("r1").len(), 1);
    }

    #[test]
    fn extract_flattens_by_tag() {
        let mut store = ValueStore::default();
        store.insert(element(1, "room:a", "user:1", "r1", 1));
        store.insert(element(2, "room:a", "user:2", "r2", 1));

        let map = store.extract();
        assert_eq!(map.len(), 2);
        let payload = &map[&Tag::new("r1", 1)];
        assert_eq!(payload.owner, Owner::new(1));
        assert_eq!(payload.key, "user:1");
    }
}
