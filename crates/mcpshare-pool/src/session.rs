//! Session seam
//!
//! `Session` is the narrow interface the pool needs from a live MCP
//! connection. `McpSession` implements it on top of an rmcp client; tests
//! substitute their own implementations.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rmcp::model::{
    CallToolRequestParams, CallToolResult, ClientCapabilities, ClientInfo, GetPromptRequestParams,
    GetPromptResult, Implementation, JsonObject, Prompt, ReadResourceRequestParams,
    ReadResourceResult, Resource, Tool,
};
use rmcp::service::{Peer, RunningService};
use rmcp::RoleClient;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// A live, stateful channel to one server.
///
/// Every method is a remote round-trip that can fail independently of the
/// pool's view of the connection.
#[async_trait]
pub trait Session: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<Tool>>;

    async fn list_resources(&self) -> Result<Vec<Resource>>;

    async fn list_prompts(&self) -> Result<Vec<Prompt>>;

    async fn call_tool(&self, name: &str, arguments: Option<JsonObject>) -> Result<CallToolResult>;

    async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult>;

    async fn get_prompt(&self, name: &str, arguments: Option<JsonObject>)
        -> Result<GetPromptResult>;

    /// Shut the session down. Calling it again is a no-op.
    async fn close(&self) -> Result<()>;
}

/// Type alias for a connected MCP client
pub type McpClient = RunningService<RoleClient, McpClientHandler>;

/// Client handler announcing McpShare to backend servers
#[derive(Clone)]
pub struct McpClientHandler {
    info: ClientInfo,
    server: String,
}

impl std::fmt::Debug for McpClientHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClientHandler")
            .field("server", &self.server)
            .finish()
    }
}

impl McpClientHandler {
    pub fn new(server: &str) -> Self {
        Self {
            info: ClientInfo {
                protocol_version: Default::default(),
                capabilities: ClientCapabilities::default(),
                client_info: Implementation {
                    name: format!("mcpshare-{}", server),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    title: Some("McpShare".to_string()),
                    icons: None,
                    website_url: None,
                    ..Default::default()
                },
                meta: None,
            },
            server: server.to_string(),
        }
    }
}

impl rmcp::ClientHandler for McpClientHandler {
    fn get_info(&self) -> ClientInfo {
        self.info.clone()
    }
}

/// `Session` backed by an rmcp client
pub struct McpSession {
    server: String,
    peer: Peer<RoleClient>,
    /// Taken on close; requests go through `peer`
    service: Mutex<Option<McpClient>>,
}

impl McpSession {
    pub fn new(server: impl Into<String>, client: McpClient) -> Self {
        let server = server.into();
        debug!(server = %server, peer_info = ?client.peer_info(), "Wrapped MCP client");
        Self {
            peer: client.peer().clone(),
            service: Mutex::new(Some(client)),
            server,
        }
    }

    pub fn into_shared(self) -> Arc<dyn Session> {
        Arc::new(self)
    }
}

#[async_trait]
impl Session for McpSession {
    async fn list_tools(&self) -> Result<Vec<Tool>> {
        self.peer
            .list_all_tools()
            .await
            .context("Failed to list tools")
    }

    async fn list_resources(&self) -> Result<Vec<Resource>> {
        self.peer
            .list_all_resources()
            .await
            .context("Failed to list resources")
    }

    async fn list_prompts(&self) -> Result<Vec<Prompt>> {
        self.peer
            .list_all_prompts()
            .await
            .context("Failed to list prompts")
    }

    async fn call_tool(&self, name: &str, arguments: Option<JsonObject>) -> Result<CallToolResult> {
        debug!(server = %self.server, tool = %name, "Calling tool");
        self.peer
            .call_tool(CallToolRequestParams {
                name: name.to_string().into(),
                arguments,
                task: None,
                meta: None,
            })
            .await
            .context("Tool call failed")
    }

    async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult> {
        self.peer
            .read_resource(ReadResourceRequestParams {
                uri: uri.into(),
                meta: None,
            })
            .await
            .context("Failed to read resource")
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> Result<GetPromptResult> {
        self.peer
            .get_prompt(GetPromptRequestParams {
                name: name.into(),
                arguments,
                meta: None,
            })
            .await
            .context("Failed to get prompt")
    }

    async fn close(&self) -> Result<()> {
        let Some(client) = self.service.lock().await.take() else {
            return Ok(());
        };
        info!(server = %self.server, "Disconnecting from MCP server");
        client
            .cancel()
            .await
            .context("Failed to cancel service")?;
        Ok(())
    }
}
