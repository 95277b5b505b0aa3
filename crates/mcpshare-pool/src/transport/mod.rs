//! Transport abstraction for MCP connections
//!
//! `Launcher` is the seam the pool connects through: given a validated
//! `ServerConfig`, produce a live `Session`. `RmcpLauncher` is the production
//! implementation; it picks a `Transport` through `TransportFactory` and
//! wraps the connected client in an `McpSession`.

mod http;
mod stdio;

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use mcpshare_core::{ServerConfig, TransportType};
use tracing::info;

pub use http::HttpTransport;
pub use stdio::{configure_child_process_platform, StdioTransport};

use crate::session::{McpClient, McpClientHandler, McpSession, Session};

/// Establishes sessions. Potentially slow; the pool may cancel it.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, config: &ServerConfig) -> Result<Arc<dyn Session>>;
}

/// Transport trait for MCP connections
///
/// Each transport implementation handles the specifics of connecting
/// to an MCP server using a particular protocol.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Spawn/open the channel and run the MCP handshake
    async fn connect(&self) -> Result<McpClient>;

    fn transport_type(&self) -> TransportType;

    /// Get a description for logging
    fn description(&self) -> String;
}

/// Factory for creating transport instances
pub struct TransportFactory;

impl TransportFactory {
    pub fn create(config: &ServerConfig) -> Result<Box<dyn Transport>> {
        match config.transport() {
            TransportType::Stdio => Ok(Box::new(StdioTransport::new(config))),
            TransportType::StreamableHttp => Ok(Box::new(HttpTransport::new(config)?)),
            TransportType::Sse => bail!(
                "Server '{}' uses the sse transport, which this client does not support; \
                 configure it as streamable_http if the server offers it",
                config.name()
            ),
        }
    }
}

/// Create an MCP client handler for a server
pub fn create_client_handler(server: &str) -> McpClientHandler {
    McpClientHandler::new(server)
}

/// Launcher backed by rmcp transports
#[derive(Debug, Clone, Copy, Default)]
pub struct RmcpLauncher;

impl RmcpLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Launcher for RmcpLauncher {
    async fn launch(&self, config: &ServerConfig) -> Result<Arc<dyn Session>> {
        let transport = TransportFactory::create(config)?;
        info!(
            server = %config.name(),
            transport = ?transport.transport_type(),
            target = %transport.description(),
            "Launching MCP server"
        );
        let client = transport.connect().await?;
        Ok(McpSession::new(config.name(), client).into_shared())
    }
}
