use std::collections::{BTreeMap, HashSet, VecDeque};

/// Partition key for identities that could not be attributed to a tracked entity.
pub const UNATTRIBUTED: &str = "";

/// Set of identities of events that were already accepted for delivery.
///
/// Identities are partitioned per entity and kept in insertion order so that
/// retention can drop the oldest entries of a partition first. Membership is
/// answered from a single index across partitions.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SeenEventSet {
    partitions: BTreeMap<String, VecDeque<String>>,
    index: HashSet<String>,
}

impl SeenEventSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a set from persisted identities, attributing each one to the
    /// longest tracked entity name it starts with (`<entity>-...`).
    pub fn from_identities<I>(identities: I, entities: &[String]) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut set = Self::new();
        set.extend_attributed(identities, entities);
        set
    }

    /// Insert identities attributed the same way as [`SeenEventSet::from_identities`].
    /// Returns how many were new.
    pub fn extend_attributed<I>(&mut self, identities: I, entities: &[String]) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let mut added = 0;
        for identity in identities {
            let entity = attribute(&identity, entities).unwrap_or(UNATTRIBUTED).to_owned();
            if self.mark_seen(&entity, identity) {
                added += 1;
            }
        }
        added
    }

    pub fn seen(&self, identity: &str) -> bool {
        self.index.contains(identity)
    }

    /// Record an identity for `entity`. Returns `false` if it was already present.
    pub fn mark_seen(&mut self, entity: &str, identity: String) -> bool {
        if self.index.contains(&identity) {
            return false;
        }
        self.index.insert(identity.clone());
        self.partitions
            .entry(entity.to_owned())
            .or_default()
            .push_back(identity);
        true
    }

    /// Keep at most `per_entity` of the most recently inserted identities in
    /// each partition. Returns how many identities were dropped.
    pub fn retain_latest(&mut self, per_entity: usize) -> usize {
        let mut dropped = 0;
        for partition in self.partitions.values_mut() {
            while partition.len() > per_entity {
                if let Some(identity) = partition.pop_front() {
                    self.index.remove(&identity);
                    dropped += 1;
                }
            }
        }
        self.partitions.retain(|_, partition| !partition.is_empty());
        dropped
    }

    /// Forget every identity recorded for `entity`.
    pub fn remove_entity(&mut self, entity: &str) -> usize {
        match self.partitions.remove(entity) {
            Some(partition) => {
                for identity in &partition {
                    self.index.remove(identity);
                }
                partition.len()
            }
            None => 0,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// All identities, partition by partition, each in insertion order.
    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.partitions
            .values()
            .flat_map(|partition| partition.iter().map(String::as_str))
    }
}

fn attribute<'a>(identity: &str, entities: &'a [String]) -> Option<&'a str> {
    entities
        .iter()
        .filter(|entity| {
            identity
                .strip_prefix(entity.as_str())
                .is_some_and(|rest| rest.starts_with('-'))
        })
        .max_by_key(|entity| entity.len())
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_seen_is_idempotent() {
        let mut set = SeenEventSet::new();

        assert!(set.mark_seen("Foo", "Foo-a-1".to_owned()));
        assert!(!set.mark_seen("Foo", "Foo-a-1".to_owned()));
        assert!(set.seen("Foo-a-1"));
        assert!(!set.seen("Foo-b-1"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_retain_latest_drops_oldest_per_entity() {
        let mut set = SeenEventSet::new();
        for i in 0..5 {
            set.mark_seen("Foo", format!("Foo-{i}"));
        }
        set.mark_seen("Bar", "Bar-0".to_owned());

        assert_eq!(set.retain_latest(2), 3);
        assert!(!set.seen("Foo-0"));
        assert!(!set.seen("Foo-2"));
        assert!(set.seen("Foo-3"));
        assert!(set.seen("Foo-4"));
        assert!(set.seen("Bar-0"));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_remove_entity() {
        let mut set = SeenEventSet::new();
        set.mark_seen("Foo", "Foo-a".to_owned());
        set.mark_seen("Foo", "Foo-b".to_owned());
        set.mark_seen("Bar", "Bar-a".to_owned());

        assert_eq!(set.remove_entity("Foo"), 2);
        assert_eq!(set.remove_entity("Nobody"), 0);
        assert!(!set.seen("Foo-a"));
        assert!(set.seen("Bar-a"));
    }

    #[test]
    fn test_from_identities_attributes_longest_prefix() {
        let entities = vec!["Foo".to_owned(), "Foo Bar".to_owned()];
        let set = SeenEventSet::from_identities(
            vec![
                "Foo-Levelled up Magic.-01-Jan-2024 10:00".to_owned(),
                "Foo Bar-Levelled up Magic.-01-Jan-2024 10:00".to_owned(),
                "Zed-something-01-Jan-2024 10:00".to_owned(),
            ],
            &entities,
        );

        assert_eq!(set.len(), 3);
        let mut stripped = set.clone();
        assert_eq!(stripped.remove_entity("Foo Bar"), 1);
        assert_eq!(stripped.remove_entity("Foo"), 1);
        assert_eq!(stripped.remove_entity(UNATTRIBUTED), 1);
    }

    #[test]
    fn test_identities_keep_insertion_order_within_partition() {
        let mut set = SeenEventSet::new();
        set.mark_seen("Foo", "Foo-2".to_owned());
        set.mark_seen("Foo", "Foo-1".to_owned());
        set.mark_seen("Bar", "Bar-9".to_owned());

        let identities: Vec<&str> = set.identities().collect();
        assert_eq!(identities, vec!["Bar-9", "Foo-2", "Foo-1"]);
    }
}
