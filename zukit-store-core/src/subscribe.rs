//! Aggregate reads over several keys
//!
//! [`OptionsSubscription`] keeps a local "known value" per key and fills it
//! from the cache as values arrive. Once a key is known it stays known; a
//! new subscription is needed to ask again. [`SyncedOptions`] builds on it to
//! hold an editable copy that is filled exactly once and kept in line with
//! confirmed writes.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::watch;

use crate::cache::CacheState;
use crate::error::Result;
use crate::handle::StoreHandle;
use crate::path::{delete_path, is_path_prefix, set_path};
use crate::value::{Confirmed, Resolved, ValueRequest};

/// Subscription to a fixed set of keys of one store.
///
/// With `wait_all`, [`options`](Self::options) stays `None` until every key
/// has arrived. Without it, keys not arrived yet read as `null`.
pub struct OptionsSubscription {
    handle: StoreHandle,
    keys: Vec<String>,
    wait_all: bool,
    known: BTreeMap<String, Resolved>,
    revision: u64,
    rx: watch::Receiver<Arc<CacheState>>,
}

impl fmt::Debug for OptionsSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptionsSubscription")
            .field("store", &self.handle.name())
            .field("keys", &self.keys)
            .field("wait_all", &self.wait_all)
            .field("revision", &self.revision)
            .finish()
    }
}

impl OptionsSubscription {
    /// Subscribe to `keys` and read them through the cache once.
    ///
    /// Keys whose earlier fetch failed are fetched again.
    pub fn new<I, S>(handle: &StoreHandle, keys: I, wait_all: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let keys: Vec<String> = keys
            .into_iter()
            .map(Into::into)
            .filter(|key| seen.insert(key.clone()))
            .collect();

        for key in &keys {
            handle.retry_failed(&ValueRequest::new(key.as_str()));
        }

        let mut subscription = Self {
            rx: handle.watch(),
            handle: handle.clone(),
            known: keys.iter().map(|k| (k.clone(), Resolved::Pending)).collect(),
            keys,
            wait_all,
            revision: 0,
        };
        subscription.evaluate();
        subscription
    }

    /// Read every key still pending through the cache.
    ///
    /// All values found are folded in at once. Returns `true` when
    /// [`options`](Self::options) changed, which bumps the revision.
    pub fn evaluate(&mut self) -> bool {
        let arrived: Vec<(String, Resolved)> = self
            .keys
            .iter()
            .filter(|key| self.known.get(*key).is_some_and(Resolved::is_pending))
            .filter_map(|key| {
                let value = self.handle.resolve(key.as_str());
                value.is_resolved().then(|| (key.clone(), value))
            })
            .collect();
        if arrived.is_empty() {
            return false;
        }

        tracing::debug!(
            store = %self.handle.name(),
            keys = ?arrived.iter().map(|(k, _)| k).collect::<Vec<_>>(),
            "Options arrived"
        );
        self.known.extend(arrived);

        if self.wait_all && !self.is_complete() {
            return false;
        }
        self.revision += 1;
        true
    }

    /// Current aggregate: `None` without keys or while gated by `wait_all`.
    ///
    /// Without `wait_all`, a key still pending and a key known to be absent
    /// both read as `null`. Use [`get`](Self::get) to tell them apart.
    pub fn options(&self) -> Option<Map<String, Value>> {
        if self.keys.is_empty() || (self.wait_all && !self.is_complete()) {
            return None;
        }
        Some(
            self.keys
                .iter()
                .map(|key| {
                    let value = self.known.get(key).map(Resolved::to_json);
                    (key.clone(), value.unwrap_or(Value::Null))
                })
                .collect(),
        )
    }

    /// Local state of one key: [`Resolved::Pending`] until it arrived,
    /// then [`Resolved::Absent`] or [`Resolved::Present`].
    pub fn get(&self, key: &str) -> Option<&Resolved> {
        self.known.get(key)
    }

    /// Whether every key has arrived.
    pub fn is_complete(&self) -> bool {
        self.known.values().all(Resolved::is_resolved)
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn handle(&self) -> &StoreHandle {
        &self.handle
    }

    /// Wait for the next change of [`options`](Self::options).
    pub async fn changed(&mut self) -> Option<Map<String, Value>> {
        loop {
            if self.rx.changed().await.is_err() {
                return self.options();
            }
            if self.evaluate() {
                return self.options();
            }
        }
    }

    /// Wait until [`options`](Self::options) is available.
    pub async fn ready(&mut self) -> Map<String, Value> {
        loop {
            if let Some(options) = self.options() {
                return options;
            }
            if let Some(options) = self.changed().await {
                return options;
            }
        }
    }
}

/// Editable local copy of some options, seeded once they all arrived.
pub struct SyncedOptions {
    subscription: OptionsSubscription,
    local: Option<Map<String, Value>>,
    on_synced: Option<Box<dyn FnOnce(&Map<String, Value>) + Send>>,
}

impl fmt::Debug for SyncedOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncedOptions")
            .field("subscription", &self.subscription)
            .field("local", &self.local)
            .finish_non_exhaustive()
    }
}

impl SyncedOptions {
    pub fn new<I, S>(handle: &StoreHandle, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            subscription: OptionsSubscription::new(handle, keys, true),
            local: None,
            on_synced: None,
        }
    }

    /// Callback receiving the full snapshot the first time every key is
    /// available. Fires at most once.
    pub fn on_synced<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&Map<String, Value>) + Send + 'static,
    {
        self.on_synced = Some(Box::new(callback));
        self
    }

    pub fn is_synced(&self) -> bool {
        self.local.is_some()
    }

    /// The local copy, once synced.
    pub fn options(&self) -> Option<&Map<String, Value>> {
        self.local.as_ref()
    }

    /// Re-read the store and sync if everything arrived.
    pub fn poll(&mut self) -> bool {
        self.subscription.evaluate();
        self.try_sync()
    }

    /// Wait until every key is available and return the local copy.
    pub async fn synced(&mut self) -> Map<String, Value> {
        while !self.try_sync() {
            self.subscription.changed().await;
        }
        self.local.clone().unwrap_or_default()
    }

    /// Edit the local copy without writing to the server.
    pub fn set_local(&mut self, key: &str, value: Value) {
        let local = self.local.get_or_insert_with(Map::new);
        fold(local, key, value);
    }

    /// Write `values` and fold what the server confirmed into the local copy.
    pub async fn update(&mut self, values: Map<String, Value>) -> Result<Vec<Confirmed>> {
        let confirmed = self.subscription.handle().update_values(values).await?;
        if let Some(local) = self.local.as_mut() {
            for c in &confirmed {
                fold(local, &c.key, c.value.clone());
            }
        }
        Ok(confirmed)
    }

    fn try_sync(&mut self) -> bool {
        if self.local.is_some() {
            return true;
        }
        let Some(options) = self.subscription.options() else {
            return false;
        };
        tracing::debug!(store = %self.subscription.handle().name(), "Options synced");
        if let Some(callback) = self.on_synced.take() {
            callback(&options);
        }
        self.local = Some(options);
        true
    }
}

/// Store `value` at a possibly dotted `key` of `local`.
///
/// A dotted key whose first part is a subscribed key is written inside it;
/// `null` under such a key deletes the nested entry.
fn fold(local: &mut Map<String, Value>, key: &str, value: Value) {
    let parent = local
        .keys()
        .find(|k| k.as_str() != key && is_path_prefix(k, key))
        .cloned();
    match parent.and_then(|p| local.get_mut(&p).map(|target| (p, target))) {
        Some((parent, target)) => {
            let rest = &key[parent.len() + 1..];
            if value.is_null() {
                delete_path(target, rest);
            } else {
                set_path(target, rest, value);
            }
        }
        None => {
            local.insert(key.to_string(), value);
        }
    }
}
