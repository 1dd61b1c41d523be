//! Callbacks fired after confirmed writes
//!
//! Hooks are registered under option keys, possibly dotted. For each
//! confirmed `(key, value)` at most one hook fires, chosen in this order:
//!
//! 1. a hook registered under exactly `key`, called with `value`
//! 2. when `value` is `null` (a deletion), the first hook whose key lies
//!    under `key`, called with `null`
//! 3. when `value` is an object, the first hook whose key lies under `key`
//!    and whose nested value inside `value` is not `null`, called with that
//!    nested value
//!
//! "First" means smallest hook key. "Lies under" is a path prefix match on
//! whole segments, so `colors` covers `colors.primary` but not `colorsx`.
//!
//! After the options were reset as a whole there is no list of confirmed
//! keys: [`UpdateHooks::fire_reset`] instead fires every hook whose value
//! differs between the old and the new options.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::path::{get_path_ref, is_path_prefix};
use crate::value::Confirmed;

/// Callback receiving the hook key and the value it matched.
pub type UpdateHook = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// A hook chosen for one confirmed value.
#[derive(Clone)]
pub struct HookCall {
    pub hook_key: String,
    pub value: Value,
    hook: UpdateHook,
}

impl HookCall {
    pub fn call(&self) {
        (self.hook)(&self.hook_key, &self.value);
    }
}

impl fmt::Debug for HookCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookCall")
            .field("hook_key", &self.hook_key)
            .field("value", &self.value)
            .finish_non_exhaustive()
    }
}

/// Hooks of one store, by key.
#[derive(Clone, Default)]
pub struct UpdateHooks {
    hooks: BTreeMap<String, UpdateHook>,
}

impl fmt::Debug for UpdateHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.hooks.keys()).finish()
    }
}

impl UpdateHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn on<F>(mut self, key: impl Into<String>, hook: F) -> Self
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        self.insert(key, hook);
        self
    }

    /// Register `hook` under `key`, replacing any previous one.
    pub fn insert<F>(&mut self, key: impl Into<String>, hook: F)
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        self.hooks.insert(key.into(), Arc::new(hook));
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.hooks.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Find the hook to fire for one confirmed value.
    pub fn lookup(&self, key: &str, value: &Value) -> Option<HookCall> {
        if let Some(hook) = self.hooks.get(key) {
            return Some(self.call(key, value.clone(), hook));
        }

        let mut nested = self
            .hooks
            .iter()
            .filter(|(hook_key, _)| hook_key.as_str() != key && is_path_prefix(key, hook_key));

        match value {
            Value::Null => nested
                .next()
                .map(|(hook_key, hook)| self.call(hook_key, Value::Null, hook)),
            Value::Object(_) => nested.find_map(|(hook_key, hook)| {
                let rest = hook_key.get(key.len() + 1..)?;
                match get_path_ref(value, rest) {
                    None | Some(Value::Null) => None,
                    Some(found) => Some(self.call(hook_key, found.clone(), hook)),
                }
            }),
            _ => None,
        }
    }

    /// Hooks to fire for a batch of confirmed values, in batch order.
    pub fn calls_for(&self, confirmed: &[Confirmed]) -> Vec<HookCall> {
        confirmed
            .iter()
            .filter_map(|c| self.lookup(&c.key, &c.value))
            .collect()
    }

    /// Fire the hooks for `confirmed`, returning how many ran.
    pub fn fire(&self, confirmed: &[Confirmed]) -> usize {
        let calls = self.calls_for(confirmed);
        for call in &calls {
            tracing::debug!(hook = %call.hook_key, "Firing update hook");
            call.call();
        }
        calls.len()
    }

    /// Fire every hook whose value differs between `prev` and `next`.
    ///
    /// Hooks receive their value in `next`, or `null` if the reset dropped
    /// it. Returns how many ran.
    pub fn fire_reset(&self, prev: &Value, next: &Value) -> usize {
        let mut fired = 0;
        for (key, hook) in &self.hooks {
            let before = get_path_ref(prev, key).unwrap_or(&Value::Null);
            let after = get_path_ref(next, key).unwrap_or(&Value::Null);
            if before != after {
                tracing::debug!(hook = %key, "Firing reset hook");
                hook(key, after);
                fired += 1;
            }
        }
        fired
    }

    fn call(&self, hook_key: &str, value: Value, hook: &UpdateHook) -> HookCall {
        HookCall {
            hook_key: hook_key.to_string(),
            value,
            hook: hook.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<(String, Value)>>>;

    fn recorder(log: &Log) -> impl Fn(&str, &Value) + Send + Sync + 'static {
        let log = log.clone();
        move |key, value| log.lock().unwrap().push((key.to_string(), value.clone()))
    }

    fn confirmed(key: &str, value: Value) -> Confirmed {
        Confirmed {
            key: key.to_string(),
            value,
        }
    }

    #[test]
    fn test_exact_match_wins() {
        let log = Log::default();
        let hooks = UpdateHooks::new()
            .on("colors", recorder(&log))
            .on("colors.primary", recorder(&log));

        let fired = hooks.fire(&[confirmed("colors", json!({ "primary": "red" }))]);

        assert_eq!(fired, 1);
        assert_eq!(
            *log.lock().unwrap(),
            vec![("colors".to_string(), json!({ "primary": "red" }))]
        );
    }

    #[test]
    fn test_deletion_reaches_nested_hook() {
        let log = Log::default();
        let hooks = UpdateHooks::new()
            .on("colors.secondary", recorder(&log))
            .on("colors.primary", recorder(&log));

        hooks.fire(&[confirmed("colors", Value::Null)]);

        // only the first nested hook fires
        assert_eq!(
            *log.lock().unwrap(),
            vec![("colors.primary".to_string(), Value::Null)]
        );
    }

    #[test]
    fn test_nested_value_match() {
        let log = Log::default();
        let hooks = UpdateHooks::new()
            .on("colors.accent", recorder(&log))
            .on("colors.primary", recorder(&log));

        hooks.fire(&[confirmed("colors", json!({ "primary": "red" }))]);

        assert_eq!(
            *log.lock().unwrap(),
            vec![("colors.primary".to_string(), json!("red"))]
        );
    }

    #[test]
    fn test_prefix_is_segment_aware() {
        let hooks = UpdateHooks::new().on("colorsx.primary", |_, _| {});
        assert!(hooks.lookup("colors", &Value::Null).is_none());
        assert!(hooks.lookup("colors", &json!({ "primary": 1 })).is_none());
    }

    #[test]
    fn test_scalar_without_exact_hook_fires_nothing() {
        let hooks = UpdateHooks::new().on("colors.primary", |_, _| {});
        assert!(hooks.lookup("colors", &json!("red")).is_none());
        assert!(hooks.lookup("other", &Value::Null).is_none());
    }

    #[test]
    fn test_one_hook_per_confirmed_key() {
        let log = Log::default();
        let hooks = UpdateHooks::new()
            .on("a", recorder(&log))
            .on("b.c", recorder(&log));

        let fired = hooks.fire(&[
            confirmed("a", json!(1)),
            confirmed("b", json!({ "c": true })),
            confirmed("z", json!(0)),
        ]);

        assert_eq!(fired, 2);
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_reset_fires_changed_keys_only() {
        let log = Log::default();
        let hooks = UpdateHooks::new()
            .on("same", recorder(&log))
            .on("changed", recorder(&log))
            .on("dropped", recorder(&log))
            .on("layout.columns", recorder(&log));

        let prev = json!({ "same": 1, "changed": "a", "dropped": true, "layout": { "columns": 3 } });
        let next = json!({ "same": 1, "changed": "b", "layout": { "columns": 2, "rows": 1 } });
        let fired = hooks.fire_reset(&prev, &next);

        assert_eq!(fired, 3);
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                ("changed".to_string(), json!("b")),
                ("dropped".to_string(), Value::Null),
                ("layout.columns".to_string(), json!(2)),
            ]
        );
    }

    #[test]
    fn test_remove() {
        let mut hooks = UpdateHooks::new().on("a", |_, _| {});
        assert_eq!(hooks.len(), 1);
        assert!(hooks.remove("a"));
        assert!(hooks.is_empty());
        assert!(!hooks.remove("a"));
    }
}
