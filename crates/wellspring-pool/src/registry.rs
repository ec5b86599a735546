//! Registry of pools published by name

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::manager::ConnectionManager;

/// Name-keyed registry of connection managers.
///
/// An explicit handle rather than process-global state: the factory side
/// looks pools up here before constructing new ones from a reference.
pub struct PoolRegistry {
    pools: RwLock<HashMap<String, Arc<ConnectionManager>>>,
}

impl PoolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
        }
    }

    /// Publish a pool under its data-source name.
    pub fn bind(&self, pool: Arc<ConnectionManager>) {
        let name = pool.name().to_string();
        tracing::info!(pool = %name, "binding pool");
        if self.pools.write().insert(name.clone(), pool).is_some() {
            tracing::warn!(pool = %name, "a pool was already bound under this name");
        }
    }

    /// Remove a pool binding. Returns the pool if one was bound.
    pub fn unbind(&self, name: &str) -> Option<Arc<ConnectionManager>> {
        tracing::info!(pool = %name, "unbinding pool");
        self.pools.write().remove(name)
    }

    /// Look a pool up by name.
    pub fn lookup(&self, name: &str) -> Option<Arc<ConnectionManager>> {
        let pool = self.pools.read().get(name).cloned();
        if pool.is_none() {
            tracing::debug!(pool = %name, "pool not found in registry");
        }
        pool
    }

    /// Whether a pool is bound under this name.
    pub fn has(&self, name: &str) -> bool {
        self.pools.read().contains_key(name)
    }

    /// Names of all bound pools.
    pub fn names(&self) -> Vec<String> {
        self.pools.read().keys().cloned().collect()
    }
}

impl Default for PoolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
