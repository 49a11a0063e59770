use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::cancellation::{CancellationHandle, CancellationToken, Never};

/// An immutable bag of key/value metadata plus a cancellation token,
/// threaded explicitly through every call that may suspend.
///
/// This replaces the teacher's opaque `context::Context` (itself inspired
/// by Go's `context.Context`): headers like `Vine-Id`/`Vine-Service` and
/// user-supplied metadata all travel in `metadata`, and deadlines/explicit
/// cancellation travel in `cancellation`. Cloning a `Context` is cheap (an
/// `Arc` clone of the metadata map, and a `Clone` of the cancellation
/// handle which is itself reference counted).
#[derive(Clone)]
pub struct Context {
    metadata: Arc<HashMap<String, String>>,
    cancellation: Arc<dyn CancellationToken>,
}

impl Context {
    pub fn background() -> Self {
        Self {
            metadata: Arc::new(HashMap::new()),
            cancellation: Arc::new(Never),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            metadata: Arc::new(HashMap::new()),
            cancellation: Arc::new(CancellationHandle::with_deadline(timeout)),
        }
    }

    /// Returns a new context with `key`/`value` merged into the metadata
    /// bag (existing keys are overwritten). The cancellation token is
    /// shared with `self` — cancelling the parent cancels every child.
    pub fn with_metadata(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut map = (*self.metadata).clone();
        map.insert(key.into(), value.into());
        Self {
            metadata: Arc::new(map),
            cancellation: self.cancellation.clone(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(|s| s.as_str())
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    pub fn cancellation(&self) -> &dyn CancellationToken {
        self.cancellation.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}
