//! Running stores and the registry that owns them
//!
//! A [`StoreHandle`] is a cheap clone of a running store. Reads go through
//! the cache and start at most one fetch per request; writes post to the
//! REST endpoint and apply what the server confirmed. Fetches and delayed
//! flushes run on the store's [`TaskManager`]; their results come back
//! through an action channel drained by a runner task, which stops once the
//! last handle is dropped.
//!
//! Every method that may start a fetch or a flush must be called within a
//! Tokio runtime.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};

use crate::action::{SetValue, StoreAction};
use crate::cache::CacheState;
use crate::config::{RestConfig, StoreConfig, CORE_STORE};
use crate::effect::Effect;
use crate::error::{Error, Result};
use crate::hooks::UpdateHooks;
use crate::queue::PendingWrites;
use crate::routes::{route_path, value_url, RestRoutes, UpdateBody};
use crate::store::{lock, LoggingMiddleware, Middleware, Resolution, Store};
use crate::subscribe::{OptionsSubscription, SyncedOptions};
use crate::tasks::{TaskKey, TaskManager};
use crate::transport::Transport;
use crate::value::{Confirmed, Resolved, ValueRequest};

/// Registry of the stores of one application.
///
/// Created once at startup and passed to whoever needs a store.
pub struct StoreContext {
    rest: RestConfig,
    stores: Mutex<BTreeMap<String, StoreHandle>>,
}

impl fmt::Debug for StoreContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreContext")
            .field("rest", &self.rest)
            .field("stores", &self.names())
            .finish()
    }
}

impl StoreContext {
    pub fn new(rest: RestConfig) -> Self {
        Self {
            rest,
            stores: Mutex::new(BTreeMap::new()),
        }
    }

    /// Context for the bootstrap object printed into the page.
    pub fn from_basics(data: &Value) -> Result<Self> {
        Ok(Self::new(RestConfig::from_basics(data)?))
    }

    pub fn rest(&self) -> &RestConfig {
        &self.rest
    }

    /// Register and start a store with action logging.
    pub fn register<T: Transport>(&self, config: StoreConfig, transport: T) -> Result<StoreHandle> {
        self.register_with(config, transport, LoggingMiddleware::new())
    }

    /// Register and start a store with custom middleware.
    ///
    /// Fails with [`Error::DuplicateStore`] if the name is taken.
    pub fn register_with<T, M>(
        &self,
        config: StoreConfig,
        transport: T,
        middleware: M,
    ) -> Result<StoreHandle>
    where
        T: Transport,
        M: Middleware<StoreAction> + Send + 'static,
    {
        config.validate()?;
        let mut stores = lock(&self.stores);
        if stores.contains_key(&config.name) {
            return Err(Error::DuplicateStore(config.name));
        }
        let name = config.name.clone();
        let handle = StoreHandle::start(config, &self.rest, Arc::new(transport), middleware);
        tracing::debug!(store = %name, partition = %handle.partition(), "Registered store");
        stores.insert(name, handle.clone());
        Ok(handle)
    }

    /// Handle of a registered store.
    pub fn store(&self, name: &str) -> Result<StoreHandle> {
        lock(&self.stores)
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownStore(name.to_string()))
    }

    /// The shared core data store, if registered.
    pub fn core(&self) -> Result<StoreHandle> {
        self.store(CORE_STORE)
    }

    pub fn names(&self) -> Vec<String> {
        lock(&self.stores).keys().cloned().collect()
    }

    /// Remove a store from the registry. It keeps running while other
    /// handles exist.
    pub fn unregister(&self, name: &str) -> Option<StoreHandle> {
        lock(&self.stores).remove(name)
    }
}

struct Inner {
    name: String,
    partition: String,
    api_base: String,
    router: Option<String>,
    routes: RestRoutes,
    with_setters: bool,
    debounce: Duration,
    transport: Arc<dyn Transport>,
    store: Mutex<Store>,
    tasks: Mutex<TaskManager<StoreAction>>,
    snapshot: watch::Sender<Arc<CacheState>>,
    hooks: Mutex<UpdateHooks>,
    pending: Mutex<PendingWrites>,
}

/// Shared handle to a running store.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<Inner>,
}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHandle")
            .field("name", &self.inner.name)
            .field("partition", &self.inner.partition)
            .field("router", &self.inner.router)
            .finish_non_exhaustive()
    }
}

impl StoreHandle {
    /// Build a store and spawn its task runner.
    pub fn start<M>(
        config: StoreConfig,
        rest: &RestConfig,
        transport: Arc<dyn Transport>,
        middleware: M,
    ) -> Self
    where
        M: Middleware<StoreAction> + Send + 'static,
    {
        let debounce = config.debounce();
        let cache = match &config.initial_state {
            Some(initial) => CacheState::from_json(initial),
            None => CacheState::with_partition(&config.partition),
        };
        let store = Store::new(config.partition.clone(), config.policy, cache)
            .with_middleware(middleware);
        let (snapshot, _) = watch::channel(store.state().cache().clone());
        let (action_tx, action_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            name: config.name,
            partition: config.partition,
            api_base: rest.api_base(),
            router: config.router.or_else(|| rest.router.clone()),
            routes: config.routes,
            with_setters: config.with_setters,
            debounce,
            transport,
            store: Mutex::new(store),
            tasks: Mutex::new(TaskManager::new(action_tx)),
            snapshot,
            hooks: Mutex::new(UpdateHooks::new()),
            pending: Mutex::new(PendingWrites::new()),
        });
        tokio::spawn(run_tasks(Arc::downgrade(&inner), action_rx));
        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn partition(&self) -> &str {
        &self.inner.partition
    }

    pub fn router(&self) -> Option<&str> {
        self.inner.router.as_deref()
    }

    pub fn is_writable(&self) -> bool {
        self.inner.with_setters
    }

    /// Dispatch an action, run its effects and publish the new snapshot.
    ///
    /// Returns whether the store state changed.
    pub fn dispatch(&self, action: StoreAction) -> bool {
        let confirmed = match &action {
            StoreAction::UpdateValues { values } => confirmed_list(values),
            _ => Vec::new(),
        };
        let reset = matches!(action, StoreAction::ResetValues { .. });

        let (result, prev, cache) = {
            let mut store = lock(&self.inner.store);
            let prev = store.state().cache().clone();
            let result = store.dispatch(action);
            (result, prev, store.state().cache().clone())
        };

        if result.changed {
            self.inner.snapshot.send_replace(cache.clone());
        }
        for effect in result.effects {
            self.run(effect);
        }
        if result.changed && reset {
            let hooks = lock(&self.inner.hooks).clone();
            hooks.fire_reset(
                &prev.partition_json(&self.inner.partition),
                &cache.partition_json(&self.inner.partition),
            );
        } else if result.changed && !confirmed.is_empty() {
            let hooks = lock(&self.inner.hooks).clone();
            hooks.fire(&confirmed);
        }
        result.changed
    }

    fn run(&self, effect: Effect) {
        match effect {
            Effect::Fetch { request, path } => {
                tracing::debug!(store = %self.inner.name, %request, "Resolving value");
                let fetch = self.inner.transport.get(&path);
                let key = TaskKey::for_request(&request);
                lock(&self.inner.tasks).spawn(key, async move {
                    match fetch.await {
                        Ok(response) => {
                            let value = Resolved::from_response(response)
                                .into_cached()
                                .unwrap_or(Value::Null);
                            SetValue::new(request.key, value)
                                .with_params(request.params)
                                .into()
                        }
                        Err(error) => StoreAction::ValueDidError {
                            request,
                            error: error.to_string(),
                        },
                    }
                });
            }
            Effect::Flush => {
                let values = lock(&self.inner.pending).take();
                if values.is_empty() {
                    return;
                }
                tracing::debug!(store = %self.inner.name, keys = values.len(), "Flushing queued writes");
                // detached: the flush key is free for the next debounce window
                let handle = self.clone();
                tokio::spawn(async move { handle.post_queued(values).await });
            }
        }
    }

    /// Apply an action produced by a task.
    fn complete(&self, action: StoreAction) {
        let key = match &action {
            StoreAction::SetValue(set) => Some(TaskKey::for_request(&ValueRequest::with_params(
                set.key.clone(),
                set.params.clone(),
            ))),
            StoreAction::ValueDidError { request, .. } => Some(TaskKey::for_request(request)),
            StoreAction::FlushQueued => Some(TaskKey::flush()),
            _ => None,
        };
        if let Some(key) = key {
            lock(&self.inner.tasks).finish(&key);
        }
        self.dispatch(action);
    }

    // ── Reads ───────────────────────────────────────────────────────

    /// Read `request` through the cache, starting its fetch if it was
    /// never asked for.
    pub fn resolve(&self, request: impl Into<ValueRequest>) -> Resolved {
        let request = request.into();
        let (value, resolution) = {
            let store = lock(&self.inner.store);
            (store.select(&request), store.state().resolution(&request))
        };
        if resolution.is_none() {
            let path = self.value_path(&request);
            self.dispatch(StoreAction::GetValue { request, path });
        }
        value
    }

    /// Cached value of `key`, or `default` while pending or when absent.
    pub fn get_option(&self, key: &str, default: Value) -> Value {
        self.resolve(key).value_or(default)
    }

    /// Wait until `request` has resolved.
    ///
    /// Returns [`Resolved::Pending`] if its fetch failed.
    pub async fn resolved(&self, request: impl Into<ValueRequest>) -> Resolved {
        let request = request.into();
        let mut rx = self.watch();
        loop {
            let value = self.resolve(request.clone());
            match self.resolution(&request) {
                Some(Resolution::Started) | None => {}
                Some(_) => return value,
            }
            if rx.changed().await.is_err() {
                return value;
            }
        }
    }

    /// Read without starting a fetch.
    pub fn peek(&self, request: &ValueRequest) -> Resolved {
        lock(&self.inner.store).select(request)
    }

    pub fn resolution(&self, request: &ValueRequest) -> Option<Resolution> {
        lock(&self.inner.store).state().resolution(request)
    }

    /// Whether the value of `request` is known, even if known to be absent.
    ///
    /// A request can be finished and still read as [`Resolved::Pending`]:
    /// the server answered, but the merge policy does not keep the key
    /// (see [`MergeRule::Ignore`](crate::merge::MergeRule::Ignore)). Such a
    /// request is never fetched again.
    pub fn has_finished_resolution(&self, request: &ValueRequest) -> bool {
        self.resolution(request).is_some_and(Resolution::is_finished)
    }

    /// Allow a failed request to be fetched again on its next read.
    pub fn retry_failed(&self, request: &ValueRequest) -> bool {
        let cleared = lock(&self.inner.store).state_mut().clear_failed(request);
        if cleared {
            tracing::debug!(store = %self.inner.name, %request, "Retrying failed resolution");
        }
        cleared
    }

    pub fn snapshot(&self) -> Arc<CacheState> {
        self.inner.snapshot.borrow().clone()
    }

    /// Receiver notified on every state change.
    pub fn watch(&self) -> watch::Receiver<Arc<CacheState>> {
        self.inner.snapshot.subscribe()
    }

    /// Aggregate subscription over `keys`.
    pub fn subscribe<I, S>(&self, keys: I, wait_all: bool) -> OptionsSubscription
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        OptionsSubscription::new(self, keys, wait_all)
    }

    /// Local copy of `keys`, filled once they all arrived.
    pub fn synced<I, S>(&self, keys: I) -> SyncedOptions
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SyncedOptions::new(self, keys)
    }

    fn value_path(&self, request: &ValueRequest) -> String {
        value_url(
            &self.inner.api_base,
            &self.inner.routes.get,
            request,
            self.inner.router.as_deref(),
        )
    }

    // ── Writes ──────────────────────────────────────────────────────

    /// Post `values` in one request and apply what the server confirmed.
    ///
    /// A falsy acknowledgment confirms nothing and returns an empty list.
    pub async fn update_values(&self, values: Map<String, Value>) -> Result<Vec<Confirmed>> {
        self.ensure_writable()?;
        if values.is_empty() {
            return Ok(Vec::new());
        }
        let confirmed = self.post(values).await?;
        let list = confirmed_list(&confirmed);
        if !confirmed.is_empty() {
            self.dispatch(StoreAction::UpdateValues { values: confirmed });
        }
        Ok(list)
    }

    /// Convenience for a single key.
    pub async fn update_value(&self, key: impl Into<String>, value: Value) -> Result<Vec<Confirmed>> {
        let mut values = Map::new();
        values.insert(key.into(), value);
        self.update_values(values).await
    }

    /// Queue `values` for the next delayed flush.
    ///
    /// Each call restarts the debounce window; the flush posts everything
    /// queued by then as one request.
    pub fn queue_update(&self, values: Map<String, Value>) -> Result<()> {
        self.ensure_writable()?;
        if values.is_empty() {
            return Ok(());
        }
        lock(&self.inner.pending).push(values);
        lock(&self.inner.tasks).debounce(TaskKey::flush(), self.inner.debounce, async {
            StoreAction::FlushQueued
        });
        Ok(())
    }

    async fn post_queued(&self, values: Map<String, Value>) {
        match self.post(values).await {
            Ok(confirmed) if !confirmed.is_empty() => {
                self.dispatch(StoreAction::UpdateValues { values: confirmed });
            }
            Ok(_) => {}
            Err(error) => {
                tracing::warn!(store = %self.inner.name, %error, "Queued update failed");
            }
        }
    }

    /// Post queued writes now instead of waiting for the debounce.
    pub async fn flush(&self) -> Result<Vec<Confirmed>> {
        let values = lock(&self.inner.pending).take();
        self.update_values(values).await
    }

    /// Number of keys waiting for the next flush.
    pub fn pending_len(&self) -> usize {
        lock(&self.inner.pending).len()
    }

    /// Whether a delayed flush is waiting for its debounce window.
    pub fn flush_scheduled(&self) -> bool {
        lock(&self.inner.tasks).is_running(&TaskKey::flush())
    }

    /// Fetch and flush tasks whose action has not come back yet.
    pub fn in_flight(&self) -> usize {
        lock(&self.inner.tasks).len()
    }

    /// Replace the cached options with `values` after the plugin options
    /// were reset on the server.
    ///
    /// Keys missing from `values` are fetched again on their next read.
    /// Fires every hook whose value changed.
    pub fn reset_values(&self, values: Map<String, Value>) -> Result<()> {
        self.ensure_writable()?;
        tracing::info!(store = %self.inner.name, keys = values.len(), "Resetting options");
        self.dispatch(StoreAction::ResetValues { values });
        Ok(())
    }

    /// Register a hook fired after confirmed writes to `key`.
    pub fn on_update<F>(&self, key: impl Into<String>, hook: F)
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        lock(&self.inner.hooks).insert(key, hook);
    }

    pub fn set_hooks(&self, hooks: UpdateHooks) {
        *lock(&self.inner.hooks) = hooks;
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.inner.with_setters {
            Ok(())
        } else {
            Err(Error::ReadOnly(self.inner.name.clone()))
        }
    }

    async fn post(&self, values: Map<String, Value>) -> Result<Map<String, Value>> {
        let body = UpdateBody::new(self.inner.router.as_deref(), values);
        let path = route_path(&self.inner.api_base, &self.inner.routes.update);
        let ack = self
            .inner
            .transport
            .post(&path, serde_json::to_value(&body)?)
            .await?;

        let confirmed = confirm(ack, &body.values);
        if confirmed.is_empty() {
            tracing::warn!(store = %self.inner.name, keys = ?body.keys, "Server did not confirm update");
        }
        Ok(confirmed)
    }
}

async fn run_tasks(inner: Weak<Inner>, mut action_rx: mpsc::UnboundedReceiver<StoreAction>) {
    while let Some(action) = action_rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        StoreHandle { inner }.complete(action);
    }
    tracing::debug!("Store task runner stopped");
}

/// Values the server confirmed for a write of `sent`.
///
/// An object echoing any sent key is authoritative for the keys it echoes.
/// Any other truthy acknowledgment confirms `sent` as-is; a falsy one
/// (`null`, `false`, `0`, `""`, `[]`, `{}`) confirms nothing.
pub fn confirm(ack: Value, sent: &Map<String, Value>) -> Map<String, Value> {
    match ack {
        Value::Object(echo) if sent.keys().any(|k| echo.contains_key(k)) => sent
            .keys()
            .filter_map(|k| echo.get(k).map(|v| (k.clone(), v.clone())))
            .collect(),
        ack if is_truthy(&ack) => sent.clone(),
        _ => Map::new(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn confirmed_list(values: &Map<String, Value>) -> Vec<Confirmed> {
    values
        .iter()
        .map(|(key, value)| Confirmed {
            key: key.clone(),
            value: value.clone(),
        })
        .collect()
}
