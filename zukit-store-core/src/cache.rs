//! Copy-on-write cache partitions
//!
//! The store never mutates a published [`CacheState`]. Every change builds a
//! new root and a new partition, sharing the untouched partitions, so readers
//! holding an older snapshot keep seeing it unchanged and can detect changes
//! by pointer identity.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::action::SetValue;
use crate::value::{Params, Resolved};

/// One partition of the cache: key to value.
///
/// A key missing from the map is pending; a key mapped to `null` was
/// fetched and confirmed absent.
pub type Partition = HashMap<String, Value>;

/// The whole cache of one store: partition name to partition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheState {
    partitions: HashMap<String, Arc<Partition>>,
}

impl CacheState {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cache with one empty partition.
    pub fn with_partition(partition: &str) -> Self {
        let mut partitions = HashMap::new();
        partitions.insert(partition.to_string(), Arc::new(Partition::new()));
        Self { partitions }
    }

    /// Build from a JSON object of partitions, e.g.
    /// `{"data": {"folders": {}, "svg": {}}}`.
    ///
    /// Non-object partitions are skipped.
    pub fn from_json(initial: &Value) -> Self {
        let partitions = initial
            .as_object()
            .into_iter()
            .flatten()
            .filter_map(|(name, entries)| {
                let entries = entries.as_object()?;
                let partition: Partition = entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                Some((name.clone(), Arc::new(partition)))
            })
            .collect();
        Self { partitions }
    }

    /// Snapshot as JSON, mostly for debugging and tests.
    pub fn to_json(&self) -> Value {
        let root: Map<String, Value> = self
            .partitions
            .keys()
            .map(|name| (name.clone(), self.partition_json(name)))
            .collect();
        Value::Object(root)
    }

    /// One partition as a JSON object, empty when missing.
    pub fn partition_json(&self, partition: &str) -> Value {
        let entries: Map<String, Value> = self
            .partitions
            .get(partition)
            .into_iter()
            .flat_map(|p| p.iter())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Value::Object(entries)
    }

    pub fn partition(&self, partition: &str) -> Option<&Arc<Partition>> {
        self.partitions.get(partition)
    }

    /// Raw cached value (`None` while pending).
    pub fn get(&self, partition: &str, key: &str) -> Option<&Value> {
        self.partitions.get(partition)?.get(key)
    }

    /// New state with `key` set in `partition`.
    ///
    /// The returned root and partition are fresh allocations even when the
    /// value did not change.
    pub fn with_entry(&self, partition: &str, key: &str, value: Value) -> Self {
        self.with_entries(partition, std::iter::once((key.to_string(), value)))
    }

    /// New state with every pair of `entries` set in `partition`.
    pub fn with_entries<I>(&self, partition: &str, entries: I) -> Self
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut next: Partition = self
            .partitions
            .get(partition)
            .map(|p| (**p).clone())
            .unwrap_or_default();
        next.extend(entries);

        let mut partitions = self.partitions.clone();
        partitions.insert(partition.to_string(), Arc::new(next));
        Self { partitions }
    }

    /// New state where `partition` holds exactly `values`.
    pub fn replace_partition(&self, partition: &str, values: &Map<String, Value>) -> Self {
        let next: Partition = values.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let mut partitions = self.partitions.clone();
        partitions.insert(partition.to_string(), Arc::new(next));
        Self { partitions }
    }

    /// Whether `other` shares every partition allocation with `self`.
    ///
    /// Used to detect merges that left the state alone.
    pub fn same_as(&self, other: &Self) -> bool {
        self.partitions.len() == other.partitions.len()
            && self.partitions.iter().all(|(name, p)| {
                other
                    .partitions
                    .get(name)
                    .is_some_and(|o| Arc::ptr_eq(p, o))
            })
    }
}

/// Default merge: shallow replace of `action.key` in `partition`.
pub fn apply_set(prev: &CacheState, partition: &str, action: &SetValue) -> CacheState {
    prev.with_entry(partition, &action.key, action.value.clone())
}

/// Apply confirmed writes verbatim, leaving other keys untouched.
pub fn apply_update_values(
    prev: &CacheState,
    partition: &str,
    values: &Map<String, Value>,
) -> CacheState {
    prev.with_entries(
        partition,
        values.iter().map(|(k, v)| (k.clone(), v.clone())),
    )
}

/// Default read: the value stored under `key`.
pub fn default_getter(state: &CacheState, partition: &str, key: &str, _params: &Params) -> Resolved {
    Resolved::from_cached(state.get(partition, key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seeded() -> CacheState {
        CacheState::from_json(&json!({
            "options": { "a": 1, "b": { "nested": true } },
            "data": { "folders": {} },
        }))
    }

    #[test]
    fn test_apply_set_is_copy_on_write() {
        let prev = seeded();
        let next = apply_set(&prev, "options", &SetValue::new("c", json!("new")));

        // touched partition is a new allocation
        assert!(!Arc::ptr_eq(
            prev.partition("options").unwrap(),
            next.partition("options").unwrap()
        ));
        assert!(!next.same_as(&prev));

        // previous snapshot is unchanged
        assert_eq!(prev.get("options", "c"), None);

        // siblings keep their values
        assert_eq!(next.get("options", "a"), Some(&json!(1)));
        assert_eq!(next.get("options", "b"), Some(&json!({ "nested": true })));
        assert_eq!(next.get("options", "c"), Some(&json!("new")));
        assert_eq!(next.partition("data"), prev.partition("data"));
    }

    #[test]
    fn test_apply_set_same_value_still_new_partition() {
        let prev = seeded();
        let next = apply_set(&prev, "options", &SetValue::new("a", json!(1)));
        assert!(!next.same_as(&prev));
        assert_eq!(next, prev);
    }

    #[test]
    fn test_apply_set_creates_missing_partition() {
        let next = apply_set(&CacheState::new(), "options", &SetValue::new("x", json!(1)));
        assert_eq!(next.get("options", "x"), Some(&json!(1)));
    }

    #[test]
    fn test_apply_update_values_merges() {
        let prev = seeded();
        let mut values = Map::new();
        values.insert("a".into(), json!(10));
        values.insert("z".into(), Value::Null);

        let next = apply_update_values(&prev, "options", &values);
        assert_eq!(next.get("options", "a"), Some(&json!(10)));
        assert_eq!(next.get("options", "z"), Some(&Value::Null));
        assert_eq!(next.get("options", "b"), Some(&json!({ "nested": true })));
        assert!(!Arc::ptr_eq(
            prev.partition("options").unwrap(),
            next.partition("options").unwrap()
        ));
    }

    #[test]
    fn test_replace_partition_drops_old_keys() {
        let prev = seeded();
        let mut values = Map::new();
        values.insert("a".into(), json!(2));

        let next = prev.replace_partition("options", &values);
        assert_eq!(next.get("options", "a"), Some(&json!(2)));
        assert_eq!(next.get("options", "b"), None);
        assert!(Arc::ptr_eq(
            prev.partition("data").unwrap(),
            next.partition("data").unwrap()
        ));
    }

    #[test]
    fn test_default_getter_three_states() {
        let state = seeded().with_entry("options", "gone", Value::Null);
        let params = Params::new();
        assert_eq!(default_getter(&state, "options", "a", &params), Resolved::Present(json!(1)));
        assert_eq!(default_getter(&state, "options", "gone", &params), Resolved::Absent);
        assert_eq!(default_getter(&state, "options", "never", &params), Resolved::Pending);
        assert_eq!(default_getter(&state, "nowhere", "a", &params), Resolved::Pending);
    }

    #[test]
    fn test_json_round_trip() {
        let state = seeded();
        assert_eq!(CacheState::from_json(&state.to_json()), state);
    }
}
