//! Per-client registry of controller-registered callback functions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use marionette_proto::{Pointer, ResponseFlags};

/// What a callback handler returns to the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallbackResponse {
    pub return_value: Pointer,
    pub flags: ResponseFlags,
}

impl From<Pointer> for CallbackResponse {
    fn from(return_value: Pointer) -> Self {
        CallbackResponse {
            return_value,
            flags: ResponseFlags::NONE,
        }
    }
}

/// A registered callback handler. Invoked on the dispatch worker
/// thread with the agent-supplied argument vector.
pub type CallbackHandler = Arc<dyn Fn(&[Pointer]) -> CallbackResponse + Send + Sync>;

struct FunctionEntry {
    handler: CallbackHandler,
    /// Trampoline address the agent assigned to this function.
    address: Pointer,
}

/// Name-keyed handler registry, shared between the client facade
/// (writers) and the dispatch worker (reader) under one lock.
#[derive(Default)]
pub(crate) struct FunctionRegistry {
    inner: Mutex<HashMap<String, FunctionEntry>>,
}

impl FunctionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    pub(crate) fn insert(&self, name: String, handler: CallbackHandler, address: Pointer) {
        self.lock().insert(name, FunctionEntry { handler, address });
    }

    /// Remove a registration. Returns whether the name was present.
    pub(crate) fn remove(&self, name: &str) -> bool {
        self.lock().remove(name).is_some()
    }

    /// Handler for `name`, cloned out so the lock is not held during
    /// invocation (handlers may call back into the client).
    pub(crate) fn handler(&self, name: &str) -> Option<CallbackHandler> {
        self.lock().get(name).map(|entry| Arc::clone(&entry.handler))
    }

    pub(crate) fn address(&self, name: &str) -> Option<Pointer> {
        self.lock().get(name).map(|entry| entry.address)
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub(crate) fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, FunctionEntry>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
