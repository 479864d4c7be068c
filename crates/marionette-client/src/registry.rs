//! Process-wide client cache.
//!
//! An explicit object owned by the composing application — there is no
//! hidden global. The registry lock is its own, distinct from any
//! client's operation lock, so lookups never contend with in-flight
//! control transactions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::client::{Client, ClientConfig};
use crate::error::Result;

/// Cache of [`Client`]s keyed by target process id, enforcing at most
/// one live client per target.
#[derive(Default)]
pub struct ClientRegistry {
    config: ClientConfig,
    clients: Mutex<HashMap<u32, Arc<Client>>>,
}

impl ClientRegistry {
    /// Registry using the default endpoint base directory.
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    /// Registry with explicit client construction settings.
    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            config,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// The cached client for `pid`, connecting one if none exists.
    ///
    /// A cached client observed disposed is stale — someone disposed
    /// it without going through [`dispose`](Self::dispose) — and is
    /// evicted and replaced by a fresh connection.
    pub fn get_or_connect(&self, pid: u32) -> Result<Arc<Client>> {
        let mut clients = self.lock();

        if let Some(existing) = clients.get(&pid) {
            if !existing.is_disposed() {
                return Ok(Arc::clone(existing));
            }
            debug!(pid, "evicting stale disposed client");
            clients.remove(&pid);
        }

        let client = Arc::new(Client::connect(&self.config, pid)?);
        clients.insert(pid, Arc::clone(&client));
        Ok(client)
    }

    /// Dispose the client for `pid` (if any) and evict it.
    ///
    /// Returns whether a client was present.
    pub fn dispose(&self, pid: u32) -> bool {
        let removed = self.lock().remove(&pid);
        match removed {
            Some(client) => {
                client.dispose();
                true
            }
            None => false,
        }
    }

    /// Number of cached clients.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the registry holds no clients.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u32, Arc<Client>>> {
        self.clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
