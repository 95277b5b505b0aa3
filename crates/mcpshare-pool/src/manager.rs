//! McpManager - one object owning the pool and its registry

use std::sync::Arc;

use mcpshare_core::{PoolResult, PoolSettings, ServerConfig};
use rmcp::model::{CallToolResult, JsonObject};
use tracing::info;

use crate::facade::ServerFacade;
use crate::pool::{ConnectionPool, PoolStats, PooledSession, ToolListing};
use crate::registry::ServerRegistry;
use crate::transport::Launcher;

pub struct McpManager {
    pool: Arc<ConnectionPool>,
    registry: ServerRegistry,
}

impl McpManager {
    pub fn new(settings: PoolSettings) -> Self {
        Self::from_pool(Arc::new(ConnectionPool::new(settings)))
    }

    pub fn with_launcher(settings: PoolSettings, launcher: Arc<dyn Launcher>) -> Self {
        Self::from_pool(Arc::new(ConnectionPool::with_launcher(settings, launcher)))
    }

    /// Bind to an existing pool, e.g. the process-wide one from [`crate::global`]
    pub fn from_pool(pool: Arc<ConnectionPool>) -> Self {
        let registry = ServerRegistry::new(Arc::clone(&pool));
        Self { pool, registry }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    pub fn start(&self) -> PoolResult<()> {
        self.pool.start()?;
        info!(servers = self.registry.len(), "McpManager started");
        Ok(())
    }

    pub async fn stop(&self) -> PoolResult<()> {
        let result = self.pool.stop().await;
        info!("McpManager stopped");
        result
    }

    pub fn is_running(&self) -> bool {
        self.pool.is_running()
    }

    pub fn add_server(&self, config: ServerConfig) -> PoolResult<ServerFacade> {
        self.registry.add(config)
    }

    pub async fn remove_server(&self, name: &str) -> PoolResult<()> {
        self.registry.remove(name).await
    }

    pub fn get_server(&self, name: &str) -> PoolResult<ServerFacade> {
        self.registry.get(name)
    }

    pub fn server_names(&self) -> Vec<String> {
        self.registry.names()
    }

    pub async fn get_session(&self, name: &str) -> PoolResult<PooledSession> {
        self.pool.acquire(name).await
    }

    pub async fn get_all_tools(&self) -> ToolListing {
        self.registry.get_all_tools().await
    }

    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Option<JsonObject>,
    ) -> PoolResult<CallToolResult> {
        self.pool.call_tool(server, tool, arguments).await
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }
}
