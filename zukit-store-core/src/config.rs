//! Store and REST configuration
//!
//! Both structs deserialize from the JSON the server prints into the page,
//! with every field optional. Code that builds them by hand uses the
//! `with_*` setters.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::merge::{core_data_policy, MergePolicy};
use crate::routes::RestRoutes;

/// Name of the shared read-only core data store.
pub const CORE_STORE: &str = "zukit/core";

/// Where the REST API lives and who is asking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestConfig {
    /// Namespace root (`/<root>/v<version>/`).
    pub root: String,
    pub version: u32,
    /// Plugin instance that should answer requests.
    pub router: Option<String>,
    /// Site REST endpoint, e.g. `https://example.com/wp-json`.
    pub base_url: Option<String>,
    /// Value for the `X-WP-Nonce` header.
    pub nonce: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            root: "zukit".to_string(),
            version: 1,
            router: None,
            base_url: None,
            nonce: None,
            timeout_secs: 30,
        }
    }
}

impl RestConfig {
    /// Read the bootstrap object `{ "rest": { "router", "root", "version" }, "router" }`.
    ///
    /// The router is taken from `rest.router`, then from the top-level
    /// `router`. Missing fields keep their defaults.
    pub fn from_basics(data: &Value) -> Result<Self> {
        let mut config = match data.get("rest") {
            Some(rest) => Self::deserialize(rest)
                .map_err(|e| Error::Config(format!("invalid rest settings: {e}")))?,
            None => Self::default(),
        };
        if config.router.is_none() {
            config.router = data
                .get("router")
                .and_then(Value::as_str)
                .map(str::to_string);
        }
        Ok(config)
    }

    /// `/<root>/v<version>/`
    pub fn api_base(&self) -> String {
        format!("/{}/v{}/", self.root.trim_matches('/'), self.version)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn with_router(mut self, router: impl Into<String>) -> Self {
        self.router = Some(router.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self
    }
}

/// Everything needed to register one store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Registry name, unique per context.
    pub name: String,
    /// Partition the store reads and writes (`"options"`, `"data"`).
    pub partition: String,
    pub routes: RestRoutes,
    /// Whether writes are allowed.
    pub with_setters: bool,
    /// Initial cache contents, as `{ "<partition>": { key: value } }`.
    /// Shown until each key's first fetch answers.
    pub initial_state: Option<Value>,
    /// Overrides the REST router for this store.
    pub router: Option<String>,
    /// Window for coalescing queued writes, in milliseconds.
    pub debounce_ms: u64,
    #[serde(skip)]
    pub policy: MergePolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            partition: "options".to_string(),
            routes: RestRoutes::default(),
            with_setters: true,
            initial_state: None,
            router: None,
            debounce_ms: 500,
            policy: MergePolicy::default(),
        }
    }
}

impl StoreConfig {
    /// Read-write options store named `name`.
    pub fn options(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// The shared read-only data store (loaders, galleries, folders, svg).
    ///
    /// Starts with empty placeholders, which readers see until the first
    /// fetch of each key answers.
    pub fn core_data() -> Self {
        Self {
            name: CORE_STORE.to_string(),
            partition: "data".to_string(),
            routes: RestRoutes::single("zudata"),
            with_setters: false,
            initial_state: Some(json!({
                "data": { "folders": {}, "loaders": {}, "galleries": {}, "svg": {} }
            })),
            policy: core_data_policy(),
            ..Self::default()
        }
    }

    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = partition.into();
        self
    }

    pub fn with_routes(mut self, routes: RestRoutes) -> Self {
        self.routes = routes;
        self
    }

    pub fn with_setters(mut self, with_setters: bool) -> Self {
        self.with_setters = with_setters;
        self
    }

    pub fn with_initial_state(mut self, initial_state: Value) -> Self {
        self.initial_state = Some(initial_state);
        self
    }

    pub fn with_router(mut self, router: impl Into<String>) -> Self {
        self.router = Some(router.into());
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce_ms = u64::try_from(debounce.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_policy(mut self, policy: MergePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Reject configs a store cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Config("store name is empty".to_string()));
        }
        if self.partition.is_empty() {
            return Err(Error::Config(format!(
                "store {} has an empty partition",
                self.name
            )));
        }
        Ok(())
    }
}
