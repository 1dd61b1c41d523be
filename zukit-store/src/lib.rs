//! zukit-store: option and data stores synchronized with a REST backend
//!
//! Reads go through a shared copy-on-write cache and fetch each key at most
//! once; writes are posted in batches and only what the server confirmed
//! lands in the cache.
//!
//! # Example
//! ```ignore
//! use zukit_store::prelude::*;
//!
//! let context = StoreContext::new(RestConfig::default().with_base_url("https://example.com/wp-json"));
//! let transport = HttpTransport::new(context.rest())?;
//! let store = context.register(StoreConfig::options("zuplus/options"), transport)?;
//!
//! let mut synced = store.synced(["color", "layout"]).on_synced(|options| {
//!     println!("loaded {options:?}");
//! });
//! let options = synced.synced().await;
//! synced.update(json!({ "color": "blue" }).as_object().cloned().unwrap_or_default()).await?;
//! ```

// Re-export everything from core
pub use zukit_store_core::*;

/// Prelude for convenient imports
pub mod prelude {
    // Stores
    pub use zukit_store_core::{
        RestConfig, RestRoutes, StoreConfig, StoreContext, StoreHandle, CORE_STORE,
    };

    // Values
    pub use zukit_store_core::{Confirmed, Resolved, ValueRequest};

    // Core data
    pub use zukit_store_core::{CoreData, FolderOption};

    // Subscriptions and hooks
    pub use zukit_store_core::{OptionsSubscription, SyncedOptions, UpdateHooks};

    // Reducer and middleware
    pub use zukit_store_core::{
        Action, CacheState, LoggingMiddleware, MergePolicy, MergeRule, Middleware, Resolution,
        SetValue, StoreAction,
    };

    // Transports
    pub use zukit_store_core::{HttpTransport, Transport};

    pub use zukit_store_core::{Error, Result};
}
