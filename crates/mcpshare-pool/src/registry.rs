//! Named collection of facades over one shared pool

use std::collections::BTreeMap;
use std::sync::Arc;

use mcpshare_core::{PoolError, PoolResult, ServerConfig};
use parking_lot::{RwLock, RwLockWriteGuard};
use tracing::debug;

use crate::facade::ServerFacade;
use crate::pool::{ConnectionPool, ToolListing};

pub struct ServerRegistry {
    pool: Arc<ConnectionPool>,
    servers: RwLock<BTreeMap<String, ServerFacade>>,
}

impl ServerRegistry {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self {
            pool,
            servers: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Register the config with the pool and create its facade
    pub fn add(&self, config: ServerConfig) -> PoolResult<ServerFacade> {
        let name = config.name().to_string();
        let mut servers = self.servers.write();
        self.pool.add_server(config)?;

        let facade = ServerFacade::new(name.clone(), Arc::clone(&self.pool));
        servers.insert(name.clone(), facade.clone());
        debug!(server = %name, "Added facade");
        Ok(facade)
    }

    pub fn get(&self, name: &str) -> PoolResult<ServerFacade> {
        self.live()
            .get(name)
            .cloned()
            .ok_or_else(|| PoolError::NotFound(name.to_string()))
    }

    /// Drop the facade and unregister the server from the pool
    pub async fn remove(&self, name: &str) -> PoolResult<()> {
        if self.servers.write().remove(name).is_none() {
            return Err(PoolError::NotFound(name.to_string()));
        }
        self.pool.remove_server(name).await
    }

    pub fn names(&self) -> Vec<String> {
        self.live().keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.live().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.live().len()
    }

    pub fn is_empty(&self) -> bool {
        self.live().is_empty()
    }

    /// Facades whose server is still registered in the pool.
    ///
    /// Servers removed through the pool directly are dropped here.
    fn live(&self) -> RwLockWriteGuard<'_, BTreeMap<String, ServerFacade>> {
        let mut servers = self.servers.write();
        servers.retain(|name, _| {
            let registered = self.pool.contains(name);
            if !registered {
                debug!(server = %name, "Dropped facade for removed server");
            }
            registered
        });
        servers
    }

    pub async fn get_all_tools(&self) -> ToolListing {
        self.pool.get_all_tools().await
    }
}
