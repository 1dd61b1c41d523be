//! Actions: the only way store state changes

use std::fmt::Debug;

use serde_json::{Map, Value};

use crate::value::{Params, ValueRequest};

/// Marker trait for actions that can be dispatched to a store
///
/// Actions represent intents to change state. They should be:
/// - Clone: Actions may be logged, replayed, or sent to multiple handlers
/// - Debug: For debugging and logging
/// - Send + 'static: For async dispatch across threads
pub trait Action: Clone + Debug + Send + 'static {
    /// Get the action name for logging and filtering
    fn name(&self) -> &'static str;
}

/// A value arrived for a key and must be merged into the cache.
///
/// `value` is `Value::Null` when the server confirmed there is nothing for
/// the key. `params` are the request parameters the value was fetched with;
/// nested merge rules use them to place the value.
#[derive(Debug, Clone, PartialEq)]
pub struct SetValue {
    pub key: String,
    pub value: Value,
    pub params: Params,
}

impl SetValue {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
            params: Params::new(),
        }
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }
}

/// Every state transition a store understands.
///
/// `GetValue` is the intent, `SetValue` and `ValueDidError` carry the outcome
/// of the fetch back. `UpdateValues` and `ResetValues` hold values the server
/// already confirmed, so they bypass the merge policy. `FlushQueued` is sent
/// when the write queue has been quiet for the debounce window.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreAction {
    /// Issue a fetch for `request` at the resolved `path`.
    GetValue { request: ValueRequest, path: String },
    /// Merge a fetched value.
    SetValue(SetValue),
    /// Apply confirmed writes verbatim.
    UpdateValues { values: Map<String, Value> },
    /// The fetch for `request` failed; the value stays pending.
    ValueDidError { request: ValueRequest, error: String },
    /// Replace the whole partition after the options were reset.
    ResetValues { values: Map<String, Value> },
    /// Post the queued writes.
    FlushQueued,
}

impl Action for StoreAction {
    fn name(&self) -> &'static str {
        match self {
            StoreAction::GetValue { .. } => "GetValue",
            StoreAction::SetValue(_) => "SetValue",
            StoreAction::UpdateValues { .. } => "UpdateValues",
            StoreAction::ValueDidError { .. } => "ValueDidError",
            StoreAction::ResetValues { .. } => "ResetValues",
            StoreAction::FlushQueued => "FlushQueued",
        }
    }
}

impl From<SetValue> for StoreAction {
    fn from(action: SetValue) -> Self {
        StoreAction::SetValue(action)
    }
}
