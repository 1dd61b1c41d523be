//! Three-state values and request identities

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Extra request parameters sent alongside a key (`folder`, `name`, ...).
///
/// Ordered so that two requests with the same parameters always produce the
/// same [`ValueRequest::request_id`].
pub type Params = BTreeMap<String, Value>;

/// What the cache knows about a key.
///
/// The distinction between `Pending` and `Absent` is what lets readers tell
/// "still loading" apart from "loaded, nothing there".
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Resolved {
    /// Never fetched, or the fetch has not completed (or failed).
    #[default]
    Pending,
    /// Fetched, and the server has no value for the key.
    Absent,
    /// Fetched value.
    Present(Value),
}

impl Resolved {
    /// Interpret a server response for a single key.
    ///
    /// The server answers `{}` when it has nothing for the key; `null` is
    /// treated the same. Empty arrays and every other value are real values.
    pub fn from_response(value: Value) -> Self {
        match value {
            Value::Null => Self::Absent,
            Value::Object(ref map) if map.is_empty() => Self::Absent,
            other => Self::Present(other),
        }
    }

    /// Interpret a value stored in the cache (`null` marks a confirmed absence).
    pub fn from_cached(value: Option<&Value>) -> Self {
        match value {
            None => Self::Pending,
            Some(Value::Null) => Self::Absent,
            Some(v) => Self::Present(v.clone()),
        }
    }

    /// Encode for storage in a partition: `Absent` becomes `null`.
    ///
    /// Returns `None` for `Pending`, which is never stored.
    pub fn into_cached(self) -> Option<Value> {
        match self {
            Self::Pending => None,
            Self::Absent => Some(Value::Null),
            Self::Present(v) => Some(v),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// `true` for both `Absent` and `Present`.
    pub fn is_resolved(&self) -> bool {
        !self.is_pending()
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Present(v) => Some(v),
            _ => None,
        }
    }

    /// The present value, or `default` when pending or absent.
    pub fn value_or(self, default: Value) -> Value {
        match self {
            Self::Present(v) => v,
            _ => default,
        }
    }

    /// JSON view used by aggregate readers: pending and absent both read as `null`.
    pub fn to_json(&self) -> Value {
        self.as_value().cloned().unwrap_or(Value::Null)
    }
}

/// One resolvable read: a key plus its extra parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueRequest {
    pub key: String,
    pub params: Params,
}

impl ValueRequest {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            params: Params::new(),
        }
    }

    /// Add a request parameter.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_params(key: impl Into<String>, params: Params) -> Self {
        Self {
            key: key.into(),
            params,
        }
    }

    /// Stable identity used for single-flight bookkeeping and task keys.
    pub fn request_id(&self) -> String {
        if self.params.is_empty() {
            return self.key.clone();
        }
        let params = serde_json::to_string(&self.params).unwrap_or_default();
        format!("{}?{}", self.key, params)
    }
}

impl fmt::Display for ValueRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.request_id())
    }
}

impl From<&str> for ValueRequest {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for ValueRequest {
    fn from(key: String) -> Self {
        Self::new(key)
    }
}

/// A write the server confirmed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Confirmed {
    pub key: String,
    pub value: Value,
}
