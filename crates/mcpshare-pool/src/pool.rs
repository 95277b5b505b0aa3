//! Connection pool
//!
//! Maps server names to validated configs and lazily created connections.
//! Every consumer path goes through [`ConnectionPool::acquire`], which hands
//! out a [`PooledSession`] holding one counted reference.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use mcpshare_core::{
    CloseFailure, ConfigError, IdlePolicy, PoolError, PoolResult, PoolSettings, ServerConfig,
    ServerDefinition,
};
use parking_lot::RwLock;
use rmcp::model::{
    CallToolResult, GetPromptResult, JsonObject, Prompt, ReadResourceResult, Resource, Tool,
};
use serde::Serialize;
use tokio::sync::MutexGuard;
use tracing::{debug, error, info, warn};

use crate::connection::{Connection, ConnectionSnapshot, ConnectionState, Lease, Retirement};
use crate::session::Session;
use crate::transport::{Launcher, RmcpLauncher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Running,
    Closed,
}

/// Pool statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub servers: usize,
    pub connections: usize,
    pub ready: usize,
    pub connecting: usize,
    pub failed: usize,
    pub total_refs: usize,
}

/// Tools from every server, with per-server failures kept separate
#[derive(Debug, Clone, Default)]
pub struct ToolListing {
    pub tools: BTreeMap<String, Vec<Tool>>,
    pub failures: BTreeMap<String, PoolError>,
}

impl ToolListing {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn tool_count(&self) -> usize {
        self.tools.values().map(Vec::len).sum()
    }
}

pub struct ConnectionPool {
    settings: PoolSettings,
    launcher: Arc<dyn Launcher>,
    configs: RwLock<HashMap<String, Arc<ServerConfig>>>,
    connections: DashMap<String, Arc<Connection>>,
    lifecycle: RwLock<Lifecycle>,
}

impl ConnectionPool {
    /// Create a pool that connects through rmcp
    pub fn new(settings: PoolSettings) -> Self {
        Self::with_launcher(settings, Arc::new(RmcpLauncher::new()))
    }

    pub fn with_launcher(settings: PoolSettings, launcher: Arc<dyn Launcher>) -> Self {
        Self {
            settings,
            launcher,
            configs: RwLock::new(HashMap::new()),
            connections: DashMap::new(),
            lifecycle: RwLock::new(Lifecycle::Created),
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// Register a server. No connection is made until the first acquire.
    pub fn add_server(&self, config: ServerConfig) -> PoolResult<()> {
        let mut configs = self.configs.write();
        if *self.lifecycle.read() == Lifecycle::Closed {
            return Err(PoolError::PoolClosed);
        }
        if configs.contains_key(config.name()) {
            return Err(ConfigError::DuplicateServer(config.name().to_string()).into());
        }

        info!(server = %config.name(), target = %config.describe(), "Registered server");
        configs.insert(config.name().to_string(), Arc::new(config));
        Ok(())
    }

    /// Validate and register a raw definition
    pub fn add_definition(&self, definition: ServerDefinition) -> PoolResult<()> {
        self.add_server(ServerConfig::new(definition)?)
    }

    /// Unregister a server, force-closing its connection if one exists.
    ///
    /// Sessions acquired before removal fail with a connection error on next use.
    pub async fn remove_server(&self, name: &str) -> PoolResult<()> {
        let connection = {
            let mut configs = self.configs.write();
            if configs.remove(name).is_none() {
                return Err(PoolError::NotFound(name.to_string()));
            }
            self.connections.remove(name).map(|(_, connection)| connection)
        };

        if let Some(connection) = connection {
            if let Some(closing) = connection.retire(Retirement::Removed) {
                // Failure is logged by close(); the server is gone either way
                let _ = connection.close(closing).await;
            }
        }

        info!(server = %name, "Removed server");
        Ok(())
    }

    pub fn config(&self, name: &str) -> PoolResult<Arc<ServerConfig>> {
        self.configs
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| PoolError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.configs.read().contains_key(name)
    }

    /// Registered server names, sorted
    pub fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.configs.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Begin serving acquisitions. Connects stay lazy.
    pub fn start(&self) -> PoolResult<()> {
        {
            let mut lifecycle = self.lifecycle.write();
            match *lifecycle {
                Lifecycle::Created => *lifecycle = Lifecycle::Running,
                Lifecycle::Running => return Ok(()),
                Lifecycle::Closed => return Err(PoolError::PoolClosed),
            }
        }
        info!(servers = self.configs.read().len(), "Connection pool started");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        *self.lifecycle.read() == Lifecycle::Running
    }

    pub fn is_closed(&self) -> bool {
        *self.lifecycle.read() == Lifecycle::Closed
    }

    /// Close every connection regardless of reference count and refuse all
    /// further acquisitions.
    ///
    /// Close failures are collected and reported together once every
    /// connection has been attempted.
    pub async fn stop(&self) -> PoolResult<()> {
        {
            let mut lifecycle = self.lifecycle.write();
            if *lifecycle == Lifecycle::Closed {
                return Ok(());
            }
            *lifecycle = Lifecycle::Closed;
        }

        let names: Vec<String> = self
            .connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        let connections: Vec<Arc<Connection>> = names
            .iter()
            .filter_map(|name| self.connections.remove(name).map(|(_, c)| c))
            .collect();

        let closing: Vec<_> = connections
            .into_iter()
            .filter_map(|connection| {
                let session = connection.retire(Retirement::PoolClosed)?;
                Some((connection, session))
            })
            .collect();
        let count = closing.len();

        let failures: Vec<CloseFailure> = join_all(
            closing
                .into_iter()
                .map(|(connection, session)| async move { connection.close(session).await }),
        )
        .await
        .into_iter()
        .filter_map(Result::err)
        .collect();

        if failures.is_empty() {
            info!(closed = count, "Connection pool stopped");
            Ok(())
        } else {
            error!(
                closed = count,
                failed = failures.len(),
                "Connection pool stopped with close failures"
            );
            Err(PoolError::Teardown { failures })
        }
    }

    fn connection_for(&self, name: &str) -> PoolResult<(Arc<Connection>, Arc<ServerConfig>)> {
        let configs = self.configs.read();
        let config = configs
            .get(name)
            .cloned()
            .ok_or_else(|| PoolError::NotFound(name.to_string()))?;

        // Inserting under the lifecycle read lock keeps stop() from missing an entry
        let lifecycle = self.lifecycle.read();
        match *lifecycle {
            Lifecycle::Created => return Err(PoolError::NotRunning),
            Lifecycle::Closed => return Err(PoolError::PoolClosed),
            Lifecycle::Running => {}
        }

        let connection = self
            .connections
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Connection::new(name, self.settings.idle_policy)))
            .clone();
        Ok((connection, config))
    }

    /// Acquire a counted reference to the named server's session, connecting
    /// first if no READY connection exists.
    pub async fn acquire(&self, name: &str) -> PoolResult<PooledSession> {
        let (connection, config) = self.connection_for(name)?;
        let timeout = config
            .connect_timeout()
            .unwrap_or(self.settings.default_connect_timeout);
        let serialize = config.serialize_requests();

        let lease = connection
            .acquire(config, Arc::clone(&self.launcher), timeout)
            .await?;
        Ok(PooledSession {
            connection,
            lease,
            serialize,
            released: false,
        })
    }

    /// Give back a reference taken with [`PooledSession::detach`]
    pub async fn release(&self, name: &str) -> PoolResult<()> {
        if !self.contains(name) {
            return Err(PoolError::NotFound(name.to_string()));
        }
        let Some(connection) = self.connections.get(name).map(|entry| Arc::clone(entry.value()))
        else {
            if self.is_closed() {
                return Err(PoolError::PoolClosed);
            }
            error!(server = %name, "Release for a server that was never acquired");
            return Err(PoolError::invariant(name, "release without a matching acquire"));
        };

        if let Some(closing) = connection.release()? {
            let _ = connection.close(closing).await;
        }
        Ok(())
    }

    pub async fn list_tools(&self, server: &str) -> PoolResult<Vec<Tool>> {
        let session = self.acquire(server).await?;
        let result = session.list_tools().await;
        session.release().await?;
        result
    }

    pub async fn list_resources(&self, server: &str) -> PoolResult<Vec<Resource>> {
        let session = self.acquire(server).await?;
        let result = session.list_resources().await;
        session.release().await?;
        result
    }

    pub async fn list_prompts(&self, server: &str) -> PoolResult<Vec<Prompt>> {
        let session = self.acquire(server).await?;
        let result = session.list_prompts().await;
        session.release().await?;
        result
    }

    /// Call a tool on a server, releasing on every exit path
    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Option<JsonObject>,
    ) -> PoolResult<CallToolResult> {
        let session = self.acquire(server).await?;
        let result = session.call_tool(tool, arguments).await;
        session.release().await?;
        result
    }

    pub async fn read_resource(&self, server: &str, uri: &str) -> PoolResult<ReadResourceResult> {
        let session = self.acquire(server).await?;
        let result = session.read_resource(uri).await;
        session.release().await?;
        result
    }

    pub async fn get_prompt(
        &self,
        server: &str,
        prompt: &str,
        arguments: Option<JsonObject>,
    ) -> PoolResult<GetPromptResult> {
        let session = self.acquire(server).await?;
        let result = session.get_prompt(prompt, arguments).await;
        session.release().await?;
        result
    }

    /// List tools on every registered server concurrently.
    ///
    /// One server failing does not stop the others from being listed.
    pub async fn get_all_tools(&self) -> ToolListing {
        let names = self.server_names();
        let results = join_all(names.into_iter().map(|name| async move {
            let result = self.list_tools(&name).await;
            (name, result)
        }))
        .await;

        let mut listing = ToolListing::default();
        for (name, result) in results {
            match result {
                Ok(tools) => {
                    debug!(server = %name, count = tools.len(), "Listed tools");
                    listing.tools.insert(name, tools);
                }
                Err(e) => {
                    warn!(server = %name, error = %e, "Failed to list tools");
                    listing.failures.insert(name, e);
                }
            }
        }
        listing
    }

    /// Number of connections currently READY
    pub fn active_connections(&self) -> usize {
        self.connections
            .iter()
            .filter(|entry| entry.value().state() == ConnectionState::Ready)
            .count()
    }

    pub fn connection_info(&self, name: &str) -> Option<ConnectionSnapshot> {
        self.connections
            .get(name)
            .map(|entry| entry.value().snapshot())
    }

    pub fn stats(&self) -> PoolStats {
        let mut stats = PoolStats {
            servers: self.configs.read().len(),
            ..Default::default()
        };
        for entry in self.connections.iter() {
            let snapshot = entry.value().snapshot();
            stats.connections += 1;
            stats.total_refs += snapshot.ref_count;
            match snapshot.state {
                ConnectionState::Ready => stats.ready += 1,
                ConnectionState::Connecting => stats.connecting += 1,
                ConnectionState::Failed => stats.failed += 1,
                _ => {}
            }
        }
        stats
    }

    /// Close connections that have sat unreferenced past the idle timeout.
    ///
    /// Only does anything under [`IdlePolicy::IdleTimeout`]. Returns the
    /// number of connections closed.
    pub async fn cleanup_idle(&self) -> usize {
        let IdlePolicy::IdleTimeout(max_idle) = self.settings.idle_policy else {
            return 0;
        };

        let expired: Vec<_> = self
            .connections
            .iter()
            .filter_map(|entry| {
                let connection = Arc::clone(entry.value());
                let closing = connection.take_if_idle(max_idle)?;
                Some((connection, closing))
            })
            .collect();

        let mut removed = 0;
        for (connection, closing) in expired {
            // Counted even if close() reports an error; the session is detached
            let _ = connection.close(closing).await;
            removed += 1;
        }
        if removed > 0 {
            info!(removed, "Cleaned up idle connections");
        }
        removed
    }
}

/// One counted reference to a server's shared session.
///
/// Call [`release`](Self::release) when done. If the handle is dropped instead
/// (early return, error, cancelled task) the reference is released on drop.
pub struct PooledSession {
    connection: Arc<Connection>,
    lease: Lease,
    serialize: bool,
    released: bool,
}

impl std::fmt::Debug for PooledSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSession")
            .field("server", &self.connection.server())
            .field("generation", &self.lease.generation)
            .field("released", &self.released)
            .finish()
    }
}

impl PooledSession {
    pub fn server(&self) -> &str {
        self.connection.server()
    }

    pub fn generation(&self) -> u64 {
        self.lease.generation
    }

    async fn request_guard(&self) -> Option<MutexGuard<'_, ()>> {
        if self.serialize {
            Some(self.connection.request_lock().lock().await)
        } else {
            None
        }
    }

    fn live(&self) -> PoolResult<Arc<dyn Session>> {
        self.connection.session_for(self.lease)
    }

    fn remote_error(&self, operation: &str, error: anyhow::Error) -> PoolError {
        PoolError::tool_call(self.server(), operation, format!("{:#}", error))
    }

    pub async fn list_tools(&self) -> PoolResult<Vec<Tool>> {
        let _guard = self.request_guard().await;
        let session = self.live()?;
        session
            .list_tools()
            .await
            .map_err(|e| self.remote_error("tools/list", e))
    }

    pub async fn list_resources(&self) -> PoolResult<Vec<Resource>> {
        let _guard = self.request_guard().await;
        let session = self.live()?;
        session
            .list_resources()
            .await
            .map_err(|e| self.remote_error("resources/list", e))
    }

    pub async fn list_prompts(&self) -> PoolResult<Vec<Prompt>> {
        let _guard = self.request_guard().await;
        let session = self.live()?;
        session
            .list_prompts()
            .await
            .map_err(|e| self.remote_error("prompts/list", e))
    }

    pub async fn call_tool(
        &self,
        tool: &str,
        arguments: Option<JsonObject>,
    ) -> PoolResult<CallToolResult> {
        let _guard = self.request_guard().await;
        let session = self.live()?;
        session
            .call_tool(tool, arguments)
            .await
            .map_err(|e| self.remote_error(tool, e))
    }

    pub async fn read_resource(&self, uri: &str) -> PoolResult<ReadResourceResult> {
        let _guard = self.request_guard().await;
        let session = self.live()?;
        session
            .read_resource(uri)
            .await
            .map_err(|e| self.remote_error("resources/read", e))
    }

    pub async fn get_prompt(
        &self,
        prompt: &str,
        arguments: Option<JsonObject>,
    ) -> PoolResult<GetPromptResult> {
        let _guard = self.request_guard().await;
        let session = self.live()?;
        session
            .get_prompt(prompt, arguments)
            .await
            .map_err(|e| self.remote_error("prompts/get", e))
    }

    /// Give the reference back
    pub async fn release(mut self) -> PoolResult<()> {
        self.released = true;
        if let Some(closing) = self.connection.release_lease(self.lease)? {
            let _ = self.connection.close(closing).await;
        }
        Ok(())
    }

    /// Keep the reference but drop the handle. The caller then owes one
    /// [`ConnectionPool::release`] for this server.
    pub fn detach(mut self) -> String {
        self.released = true;
        self.server().to_string()
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match self.connection.release_lease(self.lease) {
            Ok(Some(closing)) => self.connection.spawn_close(closing),
            Ok(None) => {}
            Err(e) => error!(server = %self.server(), error = %e, "Release on drop failed"),
        }
    }
}
