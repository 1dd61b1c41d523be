//! Core types for zukit-store
//!
//! A keyed async cache for the options and data of a WordPress plugin,
//! following a Redux/Elm-inspired architecture: every change goes through an
//! action, a reducer turns actions into a new copy-on-write snapshot plus
//! effects, and effects run as background tasks whose results come back as
//! actions.
//!
//! # Core Concepts
//!
//! - **Cache**: [`CacheState`], partitions of key to value, never mutated in
//!   place. A key is pending until fetched, then present or absent.
//! - **Merge policy**: how a fetched value lands in the cache
//!   ([`MergePolicy`]), per key.
//! - **Resolvers**: the first read of a key issues one GET; concurrent
//!   readers share it.
//! - **Write-back**: [`StoreHandle::update_values`] posts a batch and applies
//!   what the server confirmed, then fires [`UpdateHooks`].
//! - **Subscriptions**: [`OptionsSubscription`] and [`SyncedOptions`] read
//!   several keys at once.
//! - **Core data**: [`CoreData`] reads folders, galleries, loaders and SVG
//!   files from the shared read-only store.
//!
//! # Example
//!
//! ```ignore
//! use zukit_store_core::prelude::*;
//!
//! let context = StoreContext::from_basics(&json!({ "router": "zuplus" }))?;
//! let transport = HttpTransport::new(&context.rest().clone().with_base_url(site))?;
//! let options = context.register(StoreConfig::options("zuplus/options"), transport)?;
//!
//! // first read starts the fetch and shows the default
//! let color = options.get_option("color", json!("red"));
//!
//! // or wait for it
//! let color = options.resolved("color").await;
//!
//! options.update_value("color", json!("blue")).await?;
//! ```

pub mod action;
pub mod cache;
pub mod config;
pub mod core_data;
pub mod effect;
pub mod error;
pub mod handle;
pub mod hooks;
pub mod merge;
pub mod path;
pub mod queue;
pub mod routes;
pub mod store;
pub mod subscribe;
pub mod tasks;
pub mod testing;
pub mod transport;
pub mod value;

// Core exports
pub use action::{Action, SetValue, StoreAction};
pub use cache::{CacheState, Partition};
pub use error::{Error, Result};
pub use value::{Confirmed, Params, Resolved, ValueRequest};

// Store exports
pub use effect::{DispatchResult, Effect};
pub use merge::{core_data_policy, MergePolicy, MergeRule};
pub use store::{LoggingMiddleware, Middleware, NoopMiddleware, Resolution, Store, StoreState};

// Runtime exports
pub use config::{RestConfig, StoreConfig, CORE_STORE};
pub use core_data::{CoreData, FolderOption};
pub use handle::{StoreContext, StoreHandle};
pub use hooks::UpdateHooks;
pub use routes::RestRoutes;
pub use subscribe::{OptionsSubscription, SyncedOptions};
pub use tasks::{TaskKey, TaskManager};
pub use transport::{HttpTransport, Transport};

// Testing exports
pub use testing::{MockTransport, RecordingMiddleware};

#[cfg(feature = "testing-time")]
pub use testing::{advance_time, pause_time, resume_time};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::action::{Action, SetValue, StoreAction};
    pub use crate::cache::CacheState;
    pub use crate::config::{RestConfig, StoreConfig};
    pub use crate::core_data::{CoreData, FolderOption};
    pub use crate::error::{Error, Result};
    pub use crate::handle::{StoreContext, StoreHandle};
    pub use crate::hooks::UpdateHooks;
    pub use crate::merge::{MergePolicy, MergeRule};
    pub use crate::routes::RestRoutes;
    pub use crate::store::{LoggingMiddleware, Middleware, Resolution};
    pub use crate::subscribe::{OptionsSubscription, SyncedOptions};
    pub use crate::transport::{HttpTransport, Transport};
    pub use crate::value::{Confirmed, Resolved, ValueRequest};
}
