//! Store state, reducer and middleware
//!
//! [`Store`] is the synchronous half of a store: it owns the cache snapshot
//! and the resolution bookkeeping, and turns actions into state changes plus
//! effects. Running effects and sharing the store between readers is the job
//! of [`StoreHandle`](crate::handle::StoreHandle).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::action::{Action, StoreAction};
use crate::cache::{apply_update_values, CacheState};
use crate::effect::{DispatchResult, Effect};
use crate::merge::MergePolicy;
use crate::value::{Resolved, ValueRequest};

/// Progress of the resolution of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// A fetch has been issued and has not answered yet.
    Started,
    /// The fetch answered (with a value or with "nothing").
    Finished,
    /// The fetch failed; only a new subscription retries it.
    Failed,
    /// A confirmed write or a reset provided the value.
    Confirmed,
}

impl Resolution {
    /// Whether a value (possibly absent) is known.
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Finished | Self::Confirmed)
    }
}

/// Everything a store remembers.
#[derive(Debug, Clone, Default)]
pub struct StoreState {
    cache: Arc<CacheState>,
    resolutions: HashMap<String, Resolution>,
}

impl StoreState {
    pub fn new(cache: CacheState) -> Self {
        Self {
            cache: Arc::new(cache),
            resolutions: HashMap::new(),
        }
    }

    /// Current cache snapshot.
    pub fn cache(&self) -> &Arc<CacheState> {
        &self.cache
    }

    pub fn resolution(&self, request: &ValueRequest) -> Option<Resolution> {
        self.resolutions.get(&request.request_id()).copied()
    }

    /// Forget a failed resolution so that the next read fetches again.
    ///
    /// Returns `true` if there was a failure to forget.
    pub fn clear_failed(&mut self, request: &ValueRequest) -> bool {
        let id = request.request_id();
        if self.resolutions.get(&id) == Some(&Resolution::Failed) {
            self.resolutions.remove(&id);
            return true;
        }
        false
    }
}

/// The store reducer.
///
/// `changed` is reported for any change of [`StoreState`], including
/// resolution bookkeeping, so that waiters on resolutions are woken too.
pub fn reduce(
    state: &mut StoreState,
    partition: &str,
    policy: &MergePolicy,
    action: StoreAction,
) -> DispatchResult<Effect> {
    match action {
        StoreAction::GetValue { request, path } => {
            let id = request.request_id();
            match state.resolutions.get(&id) {
                Some(Resolution::Failed) | None => {
                    state.resolutions.insert(id, Resolution::Started);
                    DispatchResult::changed_with(Effect::Fetch { request, path })
                }
                // single flight: already fetching or already known
                Some(_) => DispatchResult::unchanged(),
            }
        }

        StoreAction::SetValue(set) => {
            let id = ValueRequest::with_params(set.key.clone(), set.params.clone()).request_id();
            if state.resolutions.get(&id) == Some(&Resolution::Confirmed) {
                // a confirmed write landed while the fetch was in flight
                tracing::debug!(key = %set.key, "Dropping fetched value older than confirmed write");
                return DispatchResult::unchanged();
            }
            state.resolutions.insert(id, Resolution::Finished);
            let next = policy.merge(&state.cache, partition, &set);
            if !next.same_as(&state.cache) {
                state.cache = Arc::new(next);
            }
            DispatchResult::changed()
        }

        StoreAction::UpdateValues { values } => {
            if values.is_empty() {
                return DispatchResult::unchanged();
            }
            for key in values.keys() {
                state.resolutions.insert(key.clone(), Resolution::Confirmed);
            }
            state.cache = Arc::new(apply_update_values(&state.cache, partition, &values));
            DispatchResult::changed()
        }

        StoreAction::ResetValues { values } => {
            // keys missing from the reset are fetched again on next read
            state.resolutions.clear();
            for key in values.keys() {
                state.resolutions.insert(key.clone(), Resolution::Confirmed);
            }
            state.cache = Arc::new(state.cache.replace_partition(partition, &values));
            DispatchResult::changed()
        }

        StoreAction::FlushQueued => DispatchResult::effect(Effect::Flush),

        StoreAction::ValueDidError { request, error } => {
            tracing::warn!(request = %request, %error, "Value fetch failed, value stays pending");
            state
                .resolutions
                .insert(request.request_id(), Resolution::Failed);
            DispatchResult::changed()
        }
    }
}

/// Synchronous store: state, merge policy and middleware.
pub struct Store {
    state: StoreState,
    partition: String,
    policy: MergePolicy,
    middleware: Box<dyn Middleware<StoreAction> + Send>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("partition", &self.partition)
            .field("policy", &self.policy)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Create a store over `partition`.
    ///
    /// Entries already in `cache` are shown to readers right away but are
    /// still fetched on their first read.
    pub fn new(partition: impl Into<String>, policy: MergePolicy, cache: CacheState) -> Self {
        Self {
            state: StoreState::new(cache),
            partition: partition.into(),
            policy,
            middleware: Box::new(NoopMiddleware),
        }
    }

    pub fn with_middleware<M>(mut self, middleware: M) -> Self
    where
        M: Middleware<StoreAction> + Send + 'static,
    {
        self.middleware = Box::new(middleware);
        self
    }

    /// Dispatch an action through middleware and reducer.
    pub fn dispatch(&mut self, action: StoreAction) -> DispatchResult<Effect> {
        self.middleware.before(&action);
        let result = reduce(&mut self.state, &self.partition, &self.policy, action.clone());
        self.middleware.after(&action, result.changed);
        result
    }

    /// Read `request` through the merge policy.
    pub fn select(&self, request: &ValueRequest) -> Resolved {
        self.policy
            .get(&self.state.cache, &self.partition, &request.key, &request.params)
    }

    pub fn state(&self) -> &StoreState {
        &self.state
    }

    /// Use sparingly - prefer dispatching actions for state changes.
    pub fn state_mut(&mut self) -> &mut StoreState {
        &mut self.state
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    pub fn policy(&self) -> &MergePolicy {
        &self.policy
    }
}

/// Middleware trait for intercepting actions
///
/// Implement this trait to add logging, persistence, or other
/// cross-cutting concerns to your store.
pub trait Middleware<A: Action> {
    /// Called before the action is dispatched to the reducer
    fn before(&mut self, action: &A);

    /// Called after the action is processed by the reducer
    fn after(&mut self, action: &A, state_changed: bool);
}

/// A no-op middleware that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMiddleware;

impl<A: Action> Middleware<A> for NoopMiddleware {
    fn before(&mut self, _action: &A) {}
    fn after(&mut self, _action: &A, _state_changed: bool) {}
}

/// Middleware that logs actions (for debugging)
#[derive(Debug, Clone, Default)]
pub struct LoggingMiddleware {
    /// Whether to log before dispatch
    pub log_before: bool,
    /// Whether to log after dispatch
    pub log_after: bool,
}

impl LoggingMiddleware {
    /// Create a new logging middleware with default settings (log after only)
    pub fn new() -> Self {
        Self {
            log_before: false,
            log_after: true,
        }
    }

}

impl<A: Action> Middleware<A> for LoggingMiddleware {
    fn before(&mut self, action: &A) {
        if self.log_before {
            tracing::debug!(action = %action.name(), "Dispatching action");
        }
    }

    fn after(&mut self, action: &A, state_changed: bool) {
        if self.log_after {
            tracing::debug!(
                action = %action.name(),
                state_changed = state_changed,
                "Action processed"
            );
        }
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::SetValue;
    use crate::merge::core_data_policy;
    use crate::testing::RecordingMiddleware;
    use crate::{assert_emitted, count_emitted};
    use serde_json::{json, Map, Value};

    fn options_store() -> Store {
        Store::new("options", MergePolicy::default(), CacheState::with_partition("options"))
    }

    fn get(key: &str) -> StoreAction {
        StoreAction::GetValue {
            request: ValueRequest::new(key),
            path: format!("/zukit/v1/option/?key={key}"),
        }
    }

    #[test]
    fn test_get_value_emits_fetch_once() {
        let mut store = options_store();

        let first = store.dispatch(get("foo"));
        assert!(first.changed);
        assert_eq!(first.effects.len(), 1);

        let second = store.dispatch(get("foo"));
        assert!(!second.changed);
        assert!(second.effects.is_empty());

        assert_eq!(
            store.state().resolution(&ValueRequest::new("foo")),
            Some(Resolution::Started)
        );
    }

    #[test]
    fn test_set_value_finishes_resolution() {
        let mut store = options_store();
        store.dispatch(get("foo"));
        store.dispatch(SetValue::new("foo", json!("bar")).into());

        let request = ValueRequest::new("foo");
        assert_eq!(store.select(&request), Resolved::Present(json!("bar")));
        assert!(store.state().resolution(&request).unwrap().is_finished());

        // finished requests are cache hits
        assert!(store.dispatch(get("foo")).effects.is_empty());
    }

    #[test]
    fn test_absent_value_is_finished_but_not_present() {
        let mut store = options_store();
        store.dispatch(get("missing"));
        store.dispatch(SetValue::new("missing", Value::Null).into());

        let request = ValueRequest::new("missing");
        assert_eq!(store.select(&request), Resolved::Absent);
        assert_eq!(store.state().resolution(&request), Some(Resolution::Finished));
    }

    #[test]
    fn test_failed_fetch_keeps_value_pending() {
        let mut store = options_store();
        store.dispatch(get("foo"));
        store.dispatch(StoreAction::ValueDidError {
            request: ValueRequest::new("foo"),
            error: "timeout".into(),
        });

        let request = ValueRequest::new("foo");
        assert_eq!(store.select(&request), Resolved::Pending);
        assert_eq!(store.state().resolution(&request), Some(Resolution::Failed));

        // a failed resolution can be started again
        assert_eq!(store.dispatch(get("foo")).effects.len(), 1);
    }

    #[test]
    fn test_update_values_wins_over_late_fetch() {
        let mut store = options_store();
        store.dispatch(get("foo"));

        let mut values = Map::new();
        values.insert("foo".into(), json!("baz"));
        store.dispatch(StoreAction::UpdateValues { values });

        // fetch started before the write answers late
        let late = store.dispatch(SetValue::new("foo", json!("bar")).into());
        assert!(!late.changed);
        assert_eq!(store.select(&ValueRequest::new("foo")), Resolved::Present(json!("baz")));
    }

    #[test]
    fn test_out_of_order_responses_touch_only_their_keys() {
        let mut store = options_store();
        store.dispatch(get("a"));
        store.dispatch(get("b"));
        store.dispatch(SetValue::new("b", json!(2)).into());
        store.dispatch(SetValue::new("a", json!(1)).into());

        assert_eq!(store.select(&ValueRequest::new("a")), Resolved::Present(json!(1)));
        assert_eq!(store.select(&ValueRequest::new("b")), Resolved::Present(json!(2)));
    }

    #[test]
    fn test_empty_update_is_unchanged() {
        let mut store = options_store();
        let result = store.dispatch(StoreAction::UpdateValues { values: Map::new() });
        assert!(!result.changed);
    }

    #[test]
    fn test_initial_entries_are_shown_and_still_fetched() {
        let cache = CacheState::from_json(&json!({ "options": { "seeded": true } }));
        let mut store = Store::new("options", MergePolicy::default(), cache);
        assert_eq!(store.select(&ValueRequest::new("seeded")), Resolved::Present(json!(true)));
        assert_eq!(store.state().resolution(&ValueRequest::new("seeded")), None);

        let first = store.dispatch(get("seeded"));
        assert_eq!(first.effects.len(), 1);
        assert!(store.dispatch(get("seeded")).effects.is_empty());
    }

    #[test]
    fn test_reset_values_replaces_partition() {
        let mut store = options_store();
        store.dispatch(get("a"));
        store.dispatch(SetValue::new("a", json!(1)).into());
        store.dispatch(get("b"));
        store.dispatch(SetValue::new("b", json!(2)).into());

        let mut values = Map::new();
        values.insert("a".into(), json!(0));
        let result = store.dispatch(StoreAction::ResetValues { values });
        assert!(result.changed);

        assert_eq!(store.select(&ValueRequest::new("a")), Resolved::Present(json!(0)));
        assert_eq!(
            store.state().resolution(&ValueRequest::new("a")),
            Some(Resolution::Confirmed)
        );
        // dropped by the reset, read again from the server
        assert_eq!(store.select(&ValueRequest::new("b")), Resolved::Pending);
        assert_eq!(store.dispatch(get("b")).effects.len(), 1);
    }

    #[test]
    fn test_flush_queued_asks_for_flush() {
        let mut store = options_store();
        let result = store.dispatch(StoreAction::FlushQueued);
        assert!(!result.changed);
        assert_eq!(result.effects, vec![Effect::Flush]);
    }

    #[test]
    fn test_core_policy_through_store() {
        let mut store = Store::new("data", core_data_policy(), CacheState::with_partition("data"));
        let request = ValueRequest::new("svg")
            .param("folder", "images/")
            .param("name", "logo");
        store.dispatch(StoreAction::GetValue {
            request: request.clone(),
            path: "/p".into(),
        });
        store.dispatch(
            SetValue::new("svg", json!("<svg/>"))
                .with_params(request.params.clone())
                .into(),
        );

        assert_eq!(store.select(&request), Resolved::Present(json!("<svg/>")));
        assert_eq!(store.state().resolution(&request), Some(Resolution::Finished));
        // a different file in the same folder is still unknown
        let other = ValueRequest::new("svg")
            .param("folder", "images/")
            .param("name", "other");
        assert_eq!(store.select(&other), Resolved::Pending);
        assert_eq!(store.state().resolution(&other), None);
    }

    #[test]
    fn test_middleware_sees_every_action() {
        let recorder = RecordingMiddleware::new();
        let mut store = options_store().with_middleware(recorder.clone());

        store.dispatch(get("foo"));
        store.dispatch(get("foo"));
        store.dispatch(SetValue::new("foo", json!(1)).into());

        let actions = recorder.actions();
        assert_eq!(count_emitted!(actions, StoreAction::GetValue { .. }), 2);
        assert_emitted!(actions, StoreAction::SetValue(SetValue { key, .. }) if key == "foo");
    }
}
