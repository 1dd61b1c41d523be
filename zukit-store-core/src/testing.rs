//! Test utilities for stores
//!
//! - [`MockTransport`]: in-memory REST endpoint with call counters and a gate
//!   for holding fetches
//! - [`RecordingMiddleware`]: keeps every dispatched action
//! - Assertion macros for verifying dispatched actions
//!
//! # Example
//!
//! ```ignore
//! use zukit_store::testing::MockTransport;
//!
//! let mock = MockTransport::new().with_value("foo", json!("bar"));
//! let store = context.register(StoreConfig::options("test"), mock.clone())?;
//!
//! mock.hold();
//! assert_eq!(store.get_option("foo", json!("default")), json!("default"));
//! mock.release();
//! assert_eq!(store.resolved("foo").await, Resolved::Present(json!("bar")));
//! assert_eq!(mock.get_count_for("foo"), 1);
//! ```

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use serde_json::{json, Map, Value};
use tokio::sync::watch;
use url::form_urlencoded;

use crate::action::StoreAction;
use crate::error::{Error, Result};
use crate::path::{delete_path, get_path_ref, set_path};
use crate::store::Middleware;
use crate::transport::Transport;

#[derive(Debug, Default)]
struct MockState {
    values: Value,
    gets: Vec<String>,
    posts: Vec<(String, Value)>,
    fail_gets: bool,
    fail_posts: bool,
    post_response: Option<Value>,
}

/// Which GETs may answer.
#[derive(Debug)]
struct Gate {
    open: bool,
    held: BTreeSet<String>,
}

impl Gate {
    fn lets_through(&self, key: Option<&str>) -> bool {
        self.open && key.is_none_or(|key| !self.held.contains(key))
    }
}

#[derive(Debug)]
struct MockInner {
    state: Mutex<MockState>,
    gate: watch::Sender<Gate>,
}

impl MockInner {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn wait_open(&self, key: Option<&str>) {
        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|gate| gate.lets_through(key)).await;
    }
}

/// In-memory options endpoint.
///
/// GETs answer the stored value of the `key` query parameter, or `{}` when
/// there is none. POSTs apply `values` (dotted keys create nested objects,
/// `null` deletes) and echo the stored values of the sent keys. Clones share
/// the same server.
#[derive(Debug, Clone)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(Gate {
            open: true,
            held: BTreeSet::new(),
        });
        Self {
            inner: Arc::new(MockInner {
                state: Mutex::new(MockState {
                    values: Value::Object(Map::new()),
                    ..MockState::default()
                }),
                gate,
            }),
        }
    }

    /// Seed a server value.
    pub fn with_value(self, key: &str, value: Value) -> Self {
        self.set_value(key, value);
        self
    }

    /// Make every GET fail.
    pub fn failing_gets(self) -> Self {
        self.set_failing_gets(true);
        self
    }

    /// Make every POST fail.
    pub fn failing_posts(self) -> Self {
        self.set_failing_posts(true);
        self
    }

    pub fn set_value(&self, key: &str, value: Value) {
        set_path(&mut self.inner.state().values, key, value);
    }

    pub fn value(&self, key: &str) -> Option<Value> {
        get_path_ref(&self.inner.state().values, key).cloned()
    }

    pub fn set_failing_gets(&self, fail: bool) {
        self.inner.state().fail_gets = fail;
    }

    pub fn set_failing_posts(&self, fail: bool) {
        self.inner.state().fail_posts = fail;
    }

    /// Answer POSTs with `response` instead of applying them.
    pub fn set_post_response(&self, response: Option<Value>) {
        self.inner.state().post_response = response;
    }

    /// Hold GET responses until [`release`](Self::release). POSTs still
    /// answer right away.
    pub fn hold(&self) {
        self.inner.gate.send_modify(|gate| gate.open = false);
    }

    pub fn release(&self) {
        self.inner.gate.send_modify(|gate| gate.open = true);
    }

    /// Hold the GET responses for `key` only.
    pub fn hold_key(&self, key: &str) {
        self.inner.gate.send_modify(|gate| {
            gate.held.insert(key.to_string());
        });
    }

    pub fn release_key(&self, key: &str) {
        self.inner.gate.send_modify(|gate| {
            gate.held.remove(key);
        });
    }

    pub fn get_count(&self) -> usize {
        self.inner.state().gets.len()
    }

    /// GETs issued for `key`, whatever their other parameters.
    pub fn get_count_for(&self, key: &str) -> usize {
        self.inner
            .state()
            .gets
            .iter()
            .filter(|path| query_key(path).as_deref() == Some(key))
            .count()
    }

    pub fn get_paths(&self) -> Vec<String> {
        self.inner.state().gets.clone()
    }

    pub fn post_count(&self) -> usize {
        self.inner.state().posts.len()
    }

    /// Bodies of every POST, in order.
    pub fn posts(&self) -> Vec<Value> {
        self.inner
            .state()
            .posts
            .iter()
            .map(|(_, body)| body.clone())
            .collect()
    }

    fn answer_post(&self, body: &Value) -> Result<Value> {
        let mut state = self.inner.state();
        if state.fail_posts {
            return Err(Error::Request("POST failed".to_string()));
        }
        if let Some(response) = &state.post_response {
            return Ok(response.clone());
        }

        let values = body
            .get("values")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let mut echo = Map::new();
        for (key, value) in values {
            if value.is_null() {
                delete_path(&mut state.values, &key);
            } else {
                set_path(&mut state.values, &key, value);
            }
            let stored = get_path_ref(&state.values, &key).cloned();
            echo.insert(key, stored.unwrap_or(Value::Null));
        }
        Ok(Value::Object(echo))
    }
}

impl Transport for MockTransport {
    fn get(&self, path: &str) -> BoxFuture<'static, Result<Value>> {
        self.inner.state().gets.push(path.to_string());
        let inner = self.inner.clone();
        let path = path.to_string();
        Box::pin(async move {
            let key = query_key(&path);
            inner.wait_open(key.as_deref()).await;
            let state = inner.state();
            if state.fail_gets {
                return Err(Error::Request(format!("GET {path} failed")));
            }
            let value = key
                .and_then(|key| get_path_ref(&state.values, &key).cloned())
                .unwrap_or_else(|| json!({}));
            Ok(value)
        })
    }

    fn post(&self, path: &str, body: Value) -> BoxFuture<'static, Result<Value>> {
        self.inner
            .state()
            .posts
            .push((path.to_string(), body.clone()));
        let answer = self.answer_post(&body);
        Box::pin(async move { answer })
    }
}

fn query_key(path: &str) -> Option<String> {
    let (_, query) = path.split_once('?')?;
    form_urlencoded::parse(query.as_bytes())
        .find(|(name, _)| name == "key")
        .map(|(_, value)| value.into_owned())
}

/// Middleware that records every dispatched action.
///
/// Clones share the same record, so keep one clone for assertions.
#[derive(Debug, Clone, Default)]
pub struct RecordingMiddleware {
    actions: Arc<Mutex<Vec<StoreAction>>>,
}

impl RecordingMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far.
    pub fn actions(&self) -> Vec<StoreAction> {
        self.lock().clone()
    }

    /// Take everything recorded so far.
    pub fn drain(&self) -> Vec<StoreAction> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<StoreAction>> {
        self.actions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Middleware<StoreAction> for RecordingMiddleware {
    fn before(&mut self, action: &StoreAction) {
        self.lock().push(action.clone());
    }

    fn after(&mut self, _action: &StoreAction, _state_changed: bool) {}
}

/// Unwrap a JSON object literal into a map.
///
/// # Panics
///
/// Panics if `value` is not an object.
pub fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// Pause the Tokio clock (requires the `testing-time` feature and a
/// current-thread runtime).
#[cfg(feature = "testing-time")]
pub fn pause_time() {
    tokio::time::pause();
}

/// Move the paused clock forward, running timers that expire.
#[cfg(feature = "testing-time")]
pub async fn advance_time(duration: std::time::Duration) {
    tokio::time::advance(duration).await;
}

#[cfg(feature = "testing-time")]
pub fn resume_time() {
    tokio::time::resume();
}

/// Assert that a specific action was dispatched.
///
/// # Example
///
/// ```ignore
/// let actions = recorder.actions();
/// assert_emitted!(actions, StoreAction::GetValue { .. });
/// ```
#[macro_export]
macro_rules! assert_emitted {
    ($actions:expr, $pattern:pat $(if $guard:expr)?) => {
        assert!(
            $actions.iter().any(|a| matches!(a, $pattern $(if $guard)?)),
            "Expected action matching `{}` to be emitted, but got: {:?}",
            stringify!($pattern),
            $actions
        );
    };
}

/// Assert that a specific action was NOT dispatched.
#[macro_export]
macro_rules! assert_not_emitted {
    ($actions:expr, $pattern:pat $(if $guard:expr)?) => {
        assert!(
            !$actions.iter().any(|a| matches!(a, $pattern $(if $guard)?)),
            "Expected action matching `{}` NOT to be emitted, but it was: {:?}",
            stringify!($pattern),
            $actions
        );
    };
}

/// Find and return the first action matching a pattern.
///
/// # Example
///
/// ```ignore
/// if let Some(StoreAction::SetValue(set)) = find_emitted!(actions, StoreAction::SetValue(_)) {
///     assert_eq!(set.value, json!("bar"));
/// }
/// ```
#[macro_export]
macro_rules! find_emitted {
    ($actions:expr, $pattern:pat $(if $guard:expr)?) => {
        $actions.iter().find(|a| matches!(a, $pattern $(if $guard)?))
    };
}

/// Count how many actions match a pattern.
#[macro_export]
macro_rules! count_emitted {
    ($actions:expr, $pattern:pat $(if $guard:expr)?) => {
        $actions.iter().filter(|a| matches!(a, $pattern $(if $guard)?)).count()
    };
}
