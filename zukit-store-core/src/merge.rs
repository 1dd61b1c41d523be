//! Per-key merge and read rules
//!
//! A [`MergePolicy`] decides, for each key, how a fetched value enters the
//! cache and how it is read back. Most keys use plain replacement; some keys
//! hold an index keyed by request parameters (e.g. SVG markup by folder then
//! file name).
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use zukit_store_core::merge::{MergePolicy, MergeRule};
//! use zukit_store_core::{CacheState, SetValue, ValueRequest};
//!
//! let policy = MergePolicy::strict()
//!     .route("folders", MergeRule::Replace)
//!     .route("svg", MergeRule::nested(["folder", "name"]));
//! assert!(policy.validate(["folders", "svg"]).is_ok());
//!
//! let request = ValueRequest::new("svg").param("folder", "images/").param("name", "logo");
//! let action = SetValue::new("svg", json!("<svg/>")).with_params(request.params.clone());
//! let state = policy.merge(&CacheState::new(), "data", &action);
//! assert_eq!(
//!     policy.get(&state, "data", "svg", &request.params).as_value(),
//!     Some(&json!("<svg/>"))
//! );
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::action::SetValue;
use crate::cache::{apply_set, default_getter, CacheState};
use crate::error::{Error, Result};
use crate::path::{get_segments, set_segments};
use crate::value::{Params, Resolved};

/// Custom merge function: `(prev, partition, action) -> next`.
///
/// Must not mutate `prev`; return `prev.clone()` to ignore the action.
pub type Merger = fn(&CacheState, &str, &SetValue) -> CacheState;

/// Custom read function: `(state, partition, key, params) -> value`.
pub type Getter = fn(&CacheState, &str, &str, &Params) -> Resolved;

/// How one key is merged and read.
#[derive(Clone)]
pub enum MergeRule {
    /// Replace the whole value of the key.
    Replace,
    /// Store the value below the key, at the path formed by the values of
    /// the named request parameters.
    Nested { levels: Vec<String> },
    /// Drop the action; reads stay pending.
    Ignore,
    /// User supplied pair of functions.
    Custom { merge: Merger, get: Getter },
}

impl fmt::Debug for MergeRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Replace => f.write_str("Replace"),
            Self::Nested { levels } => f.debug_struct("Nested").field("levels", levels).finish(),
            Self::Ignore => f.write_str("Ignore"),
            Self::Custom { .. } => f.write_str("Custom"),
        }
    }
}

impl MergeRule {
    /// Nested rule over the given request parameter names.
    pub fn nested<I, S>(levels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Nested {
            levels: levels.into_iter().map(Into::into).collect(),
        }
    }

    pub fn merge(&self, prev: &CacheState, partition: &str, action: &SetValue) -> CacheState {
        match self {
            Self::Replace => apply_set(prev, partition, action),
            Self::Nested { levels } => {
                let Some(path) = level_path(levels, &action.params) else {
                    tracing::warn!(
                        key = %action.key,
                        levels = ?levels,
                        "Nested merge is missing a level parameter, ignoring value"
                    );
                    return prev.clone();
                };
                let mut current = prev
                    .get(partition, &action.key)
                    .cloned()
                    .unwrap_or(Value::Null);
                set_segments(
                    &mut current,
                    path.iter().map(String::as_str),
                    action.value.clone(),
                );
                prev.with_entry(partition, &action.key, current)
            }
            Self::Ignore => prev.clone(),
            Self::Custom { merge, .. } => merge(prev, partition, action),
        }
    }

    pub fn get(&self, state: &CacheState, partition: &str, key: &str, params: &Params) -> Resolved {
        match self {
            Self::Replace => default_getter(state, partition, key, params),
            Self::Nested { levels } => {
                let (Some(path), Some(root)) = (level_path(levels, params), state.get(partition, key))
                else {
                    return Resolved::Pending;
                };
                Resolved::from_cached(get_segments(root, path.iter().map(String::as_str)))
            }
            Self::Ignore => Resolved::Pending,
            Self::Custom { get, .. } => get(state, partition, key, params),
        }
    }
}

/// Values of the level parameters, in order. Strings are used as-is, other
/// scalars by their JSON text.
fn level_path(levels: &[String], params: &Params) -> Option<Vec<String>> {
    levels
        .iter()
        .map(|level| match params.get(level)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        })
        .collect()
}

/// Routing table from key to [`MergeRule`].
///
/// Keys without a route use the fallback rule. A policy without fallback
/// treats such keys as a programming error: the action is dropped and an
/// error is logged. Use [`MergePolicy::validate`] in tests to prove every
/// key the store will see has a rule.
#[derive(Debug, Clone)]
pub struct MergePolicy {
    routes: BTreeMap<String, MergeRule>,
    fallback: Option<MergeRule>,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self::replace_all()
    }
}

impl MergePolicy {
    /// Every key is replaced. The default policy.
    pub fn replace_all() -> Self {
        Self {
            routes: BTreeMap::new(),
            fallback: Some(MergeRule::Replace),
        }
    }

    /// No fallback: only routed keys are accepted.
    pub fn strict() -> Self {
        Self {
            routes: BTreeMap::new(),
            fallback: None,
        }
    }

    /// Route `key` to `rule`.
    pub fn route(mut self, key: impl Into<String>, rule: MergeRule) -> Self {
        self.routes.insert(key.into(), rule);
        self
    }

    /// Rule for keys without a route.
    pub fn fallback(mut self, rule: MergeRule) -> Self {
        self.fallback = Some(rule);
        self
    }

    pub fn rule_for(&self, key: &str) -> Option<&MergeRule> {
        self.routes.get(key).or(self.fallback.as_ref())
    }

    /// Keys with an explicit route.
    pub fn routed_keys(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    /// Check that every key in `keys` has a rule.
    pub fn validate<I, S>(&self, keys: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for key in keys {
            let key = key.as_ref();
            if self.rule_for(key).is_none() {
                return Err(Error::MergeGap {
                    key: key.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Merge `action` into `prev` by the rule for its key.
    pub fn merge(&self, prev: &CacheState, partition: &str, action: &SetValue) -> CacheState {
        match self.rule_for(&action.key) {
            Some(rule) => rule.merge(prev, partition, action),
            None => {
                tracing::error!(key = %action.key, partition, "No merge rule for key, value dropped");
                prev.clone()
            }
        }
    }

    /// Read `key` by the rule for it. Unruled keys stay pending.
    pub fn get(&self, state: &CacheState, partition: &str, key: &str, params: &Params) -> Resolved {
        self.rule_for(key)
            .map_or(Resolved::Pending, |rule| rule.get(state, partition, key, params))
    }
}

/// Keys served by the shared core data store.
pub const CORE_DATA_KEYS: [&str; 4] = ["loaders", "galleries", "folders", "svg"];

/// Policy of the read-only core data store: list-like keys are replaced,
/// `svg` is indexed by `folder` then `name`, anything else is ignored.
pub fn core_data_policy() -> MergePolicy {
    MergePolicy::strict()
        .route("loaders", MergeRule::Replace)
        .route("galleries", MergeRule::Replace)
        .route("folders", MergeRule::Replace)
        .route("svg", MergeRule::nested(["folder", "name"]))
        .fallback(MergeRule::Ignore)
}
