//! Background work of a store
//!
//! Every fetch and every delayed write flush runs as a keyed task whose
//! outcome is sent back to the store as an action:
//!
//! - fetches are keyed by request id, so one request has at most one task
//! - the write flush uses a single key and is debounced, so a burst of
//!   queued writes turns into one POST
//!
//! ```ignore
//! let (action_tx, action_rx) = tokio::sync::mpsc::unbounded_channel();
//! let mut tasks = TaskManager::new(action_tx);
//!
//! tasks.spawn(TaskKey::for_request(&request), async move {
//!     match transport.get(&path).await {
//!         Ok(value) => StoreAction::SetValue(SetValue::new(request.key, value)),
//!         Err(e) => StoreAction::ValueDidError { request, error: e.to_string() },
//!     }
//! });
//!
//! tasks.debounce(TaskKey::flush(), Duration::from_millis(500), flush_pending());
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};

use crate::action::Action;
use crate::value::ValueRequest;

/// Identifies a task for cancellation and replacement.
///
/// Spawning a task under a key that is still registered cancels the
/// previous one.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TaskKey(String);

impl TaskKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Key of the fetch resolving `request`.
    pub fn for_request(request: &ValueRequest) -> Self {
        Self(format!("get:{}", request.request_id()))
    }

    /// Key of the delayed write flush.
    pub fn flush() -> Self {
        Self::new("flush")
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for TaskKey {
    fn from(s: &'static str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TaskKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Registry of a store's running tasks.
///
/// Finished tasks stay registered until [`finish`](Self::finish) or
/// [`cancel`](Self::cancel) removes them. Dropping the manager aborts
/// everything still registered.
pub struct TaskManager<A> {
    tasks: HashMap<TaskKey, AbortHandle>,
    action_tx: mpsc::UnboundedSender<A>,
}

impl<A> std::fmt::Debug for TaskManager<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("tasks", &self.tasks.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<A> TaskManager<A>
where
    A: Action,
{
    /// `action_tx` receives the action each task resolves to.
    pub fn new(action_tx: mpsc::UnboundedSender<A>) -> Self {
        Self {
            tasks: HashMap::new(),
            action_tx,
        }
    }

    /// Spawn a task, cancelling any existing task with the same key.
    ///
    /// If the task is cancelled before completion, no action is sent.
    /// Must be called within a Tokio runtime.
    pub fn spawn<F>(&mut self, key: impl Into<TaskKey>, future: F) -> &mut Self
    where
        F: Future<Output = A> + Send + 'static,
    {
        let key = key.into();
        self.cancel(&key);

        let tx = self.action_tx.clone();
        let handle: JoinHandle<()> = tokio::spawn(async move {
            let action = future.await;
            let _ = tx.send(action);
        });

        self.tasks.insert(key, handle.abort_handle());
        self
    }

    /// Spawn a task that starts after `duration` of quiet.
    ///
    /// Calling again with the same key before the delay expires cancels the
    /// pending task and restarts the timer. The future is not polled before
    /// the delay ends.
    pub fn debounce<F>(
        &mut self,
        key: impl Into<TaskKey>,
        duration: Duration,
        future: F,
    ) -> &mut Self
    where
        F: Future<Output = A> + Send + 'static,
    {
        let key = key.into();
        self.cancel(&key);

        let tx = self.action_tx.clone();
        let handle: JoinHandle<()> = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let action = future.await;
            let _ = tx.send(action);
        });

        self.tasks.insert(key, handle.abort_handle());
        self
    }

    /// Cancel a task by key. No-op for unknown keys.
    pub fn cancel(&mut self, key: &TaskKey) {
        if let Some(handle) = self.tasks.remove(key) {
            handle.abort();
        }
    }

    /// Forget a task whose action has been received, without aborting it.
    pub fn finish(&mut self, key: &TaskKey) {
        self.tasks.remove(key);
    }

    /// Whether a task is registered under `key`.
    pub fn is_running(&self, key: &TaskKey) -> bool {
        self.tasks.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl<A> Drop for TaskManager<A> {
    fn drop(&mut self) {
        for (_, handle) in self.tasks.drain() {
            handle.abort();
        }
    }
}
