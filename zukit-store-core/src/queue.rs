//! Writes waiting for the next flush
//!
//! Queued writes are coalesced per key so a flush sends one value per key:
//! a later write replaces an earlier one, a write to `a` replaces pending
//! writes to `a.*`, and a write to `a.b` is folded into a pending object
//! write to `a`.

use serde_json::{Map, Value};

use crate::path::{is_path_prefix, set_path};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingWrites {
    values: Map<String, Value>,
}

impl PendingWrites {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue every entry of `values`, in order.
    pub fn push(&mut self, values: Map<String, Value>) {
        for (key, value) in values {
            self.push_one(key, value);
        }
    }

    pub fn push_one(&mut self, key: String, value: Value) {
        // an object write to an ancestor absorbs the nested write
        let parent = self
            .values
            .keys()
            .find(|pending| pending.as_str() != key && is_path_prefix(pending, &key))
            .cloned();
        if let Some(parent) = parent {
            if let Some(Value::Object(_)) = self.values.get(&parent) {
                if let Some(target) = self.values.get_mut(&parent) {
                    set_path(target, &key[parent.len() + 1..], value);
                }
                return;
            }
        }

        self.values
            .retain(|pending, _| pending == &key || !is_path_prefix(&key, pending));
        self.values.insert(key, value);
    }

    /// Take everything queued so far.
    pub fn take(&mut self) -> Map<String, Value> {
        std::mem::take(&mut self.values)
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_last_write_per_key_wins() {
        let mut pending = PendingWrites::new();
        pending.push(map(json!({ "a": 1, "b": 1 })));
        pending.push(map(json!({ "a": 2 })));

        assert_eq!(pending.len(), 2);
        assert_eq!(Value::Object(pending.take()), json!({ "a": 2, "b": 1 }));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_ancestor_write_replaces_nested() {
        let mut pending = PendingWrites::new();
        pending.push_one("colors.primary".into(), json!("red"));
        pending.push_one("colors.accent".into(), json!("blue"));
        pending.push_one("colorsx".into(), json!(1));
        pending.push_one("colors".into(), Value::Null);

        assert_eq!(
            Value::Object(pending.take()),
            json!({ "colorsx": 1, "colors": null })
        );
    }

    #[test]
    fn test_nested_write_folds_into_object() {
        let mut pending = PendingWrites::new();
        pending.push_one("colors".into(), json!({ "primary": "red" }));
        pending.push_one("colors.accent".into(), json!("blue"));

        assert_eq!(pending.len(), 1);
        assert_eq!(
            pending.values().get("colors"),
            Some(&json!({ "primary": "red", "accent": "blue" }))
        );
    }

    #[test]
    fn test_nested_write_under_scalar_stays_separate() {
        let mut pending = PendingWrites::new();
        pending.push_one("colors".into(), Value::Null);
        pending.push_one("colors.accent".into(), json!("blue"));

        assert_eq!(
            Value::Object(pending.take()),
            json!({ "colors": null, "colors.accent": "blue" })
        );
    }
}
