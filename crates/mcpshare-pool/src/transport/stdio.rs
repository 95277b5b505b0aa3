//! STDIO transport for MCP servers
//!
//! Handles connecting to MCP servers that run as child processes
//! communicating over stdin/stdout.

use std::collections::HashMap;
use std::process::Stdio;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use mcpshare_core::{ServerConfig, TransportType};
use rmcp::transport::{ConfigureCommandExt, TokioChildProcess};
use rmcp::ServiceExt;
use tokio::process::Command;
use tracing::{debug, error, info};

use super::{create_client_handler, Transport};
use crate::session::McpClient;

/// Platform-specific child process isolation.
///
/// Windows: suppress the console window a GUI-subsystem parent would
/// otherwise allocate for each console-subsystem child.
///
/// Unix: put the child in its own process group so terminal signals
/// (SIGINT, SIGTSTP) aimed at the parent don't reach MCP servers.
pub fn configure_child_process_platform(cmd: &mut Command) {
    #[cfg(windows)]
    {
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    #[cfg(unix)]
    {
        cmd.process_group(0);
    }
}

/// STDIO transport for child process MCP servers
pub struct StdioTransport {
    server: String,
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
}

impl StdioTransport {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            server: config.name().to_string(),
            command: config.command().to_string(),
            args: config.args().to_vec(),
            env: config.env().clone(),
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn connect(&self) -> Result<McpClient> {
        info!(
            server = %self.server,
            command = %self.command,
            args = ?self.args,
            "Connecting to STDIO server"
        );

        let command_path = which::which(&self.command)
            .or_else(|_| which::which(format!("{}.exe", &self.command)))
            .map_err(|_| {
                let err = format!(
                    "Command not found: {}. Ensure it's installed and in PATH.",
                    self.command
                );
                error!(server = %self.server, "{}", err);
                anyhow!(err)
            })?;

        debug!(server = %self.server, path = ?command_path, "Found command");

        let args = self.args.clone();
        let env = self.env.clone();
        let transport = TokioChildProcess::new(Command::new(&command_path).configure(move |cmd| {
            cmd.args(&args)
                .envs(&env)
                .stderr(Stdio::null())
                .kill_on_drop(true);
            configure_child_process_platform(cmd);
        }))
        .with_context(|| format!("Failed to spawn process: {}", self.command))?;

        let client = create_client_handler(&self.server)
            .serve(transport)
            .await
            .context("MCP handshake failed")?;

        info!(server = %self.server, "STDIO server connected");
        Ok(client)
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Stdio
    }

    fn description(&self) -> String {
        format!("stdio:{}", self.command)
    }
}
