//! Effects declared by the reducer
//!
//! The reducer never performs I/O. When an action needs network work, the
//! reducer returns an [`Effect`] next to the state change and the store
//! handle runs it:
//!
//! ```ignore
//! fn reduce(state: &mut StoreState, action: StoreAction) -> DispatchResult<Effect>
//! ```
//!
//! A fetch runs on the task manager and its outcome comes back as another
//! action (`SetValue` or `ValueDidError`). A flush posts the write queue.

use crate::value::ValueRequest;

/// Outcome of one reducer step: whether [`StoreState`](crate::store::StoreState)
/// changed, and the work to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchResult<E> {
    pub changed: bool,
    pub effects: Vec<E>,
}

impl<E> DispatchResult<E> {
    /// Nothing changed, nothing to run.
    pub fn unchanged() -> Self {
        Self {
            changed: false,
            effects: Vec::new(),
        }
    }

    pub fn changed() -> Self {
        Self {
            changed: true,
            effects: Vec::new(),
        }
    }

    /// Work to run without a state change.
    pub fn effect(effect: E) -> Self {
        Self {
            changed: false,
            effects: vec![effect],
        }
    }

    pub fn changed_with(effect: E) -> Self {
        Self {
            changed: true,
            effects: vec![effect],
        }
    }
}

/// Side effects a store reducer can request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// GET `path` and feed the answer back as the value of `request`.
    Fetch { request: ValueRequest, path: String },
    /// Post everything in the write queue as one batch.
    Flush,
}
