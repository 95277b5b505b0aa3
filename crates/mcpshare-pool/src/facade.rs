//! Single-server convenience wrapper
//!
//! Each call is acquire, operate, release. Use [`ServerFacade::session`] to
//! hold one reference across several calls.

use std::sync::Arc;

use mcpshare_core::{PoolResult, ServerConfig};
use rmcp::model::{
    CallToolResult, GetPromptResult, JsonObject, Prompt, ReadResourceResult, Resource, Tool,
};

use crate::pool::{ConnectionPool, PooledSession};

#[derive(Clone)]
pub struct ServerFacade {
    name: String,
    pool: Arc<ConnectionPool>,
}

impl std::fmt::Debug for ServerFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerFacade")
            .field("name", &self.name)
            .finish()
    }
}

impl ServerFacade {
    pub fn new(name: impl Into<String>, pool: Arc<ConnectionPool>) -> Self {
        Self {
            name: name.into(),
            pool,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> PoolResult<Arc<ServerConfig>> {
        self.pool.config(&self.name)
    }

    /// Scoped acquisition for callers that make several requests
    pub async fn session(&self) -> PoolResult<PooledSession> {
        self.pool.acquire(&self.name).await
    }

    pub async fn list_tools(&self) -> PoolResult<Vec<Tool>> {
        self.pool.list_tools(&self.name).await
    }

    pub async fn list_resources(&self) -> PoolResult<Vec<Resource>> {
        self.pool.list_resources(&self.name).await
    }

    pub async fn list_prompts(&self) -> PoolResult<Vec<Prompt>> {
        self.pool.list_prompts(&self.name).await
    }

    pub async fn call_tool(
        &self,
        tool: &str,
        arguments: Option<JsonObject>,
    ) -> PoolResult<CallToolResult> {
        self.pool.call_tool(&self.name, tool, arguments).await
    }

    pub async fn read_resource(&self, uri: &str) -> PoolResult<ReadResourceResult> {
        self.pool.read_resource(&self.name, uri).await
    }

    pub async fn get_prompt(
        &self,
        prompt: &str,
        arguments: Option<JsonObject>,
    ) -> PoolResult<GetPromptResult> {
        self.pool.get_prompt(&self.name, prompt, arguments).await
    }
}
