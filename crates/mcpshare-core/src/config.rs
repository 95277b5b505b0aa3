//! Server configuration
//!
//! `ServerDefinition` is the raw, serde-friendly shape a host application
//! builds or loads. `ServerConfig::new` is the only way to turn it into a
//! `ServerConfig`, and it rejects anything the pool could not launch.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

/// How the pool reaches a server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportType {
    /// Child process speaking over stdin/stdout
    #[default]
    Stdio,
    /// Legacy HTTP + server-sent events
    Sse,
    /// Streamable HTTP
    #[serde(alias = "http", alias = "streamable-http")]
    StreamableHttp,
}

impl TransportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportType::Stdio => "stdio",
            TransportType::Sse => "sse",
            TransportType::StreamableHttp => "streamable_http",
        }
    }

    /// Whether this transport is addressed by url rather than by command
    pub fn is_remote(&self) -> bool {
        !matches!(self, TransportType::Stdio)
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stdio" => Ok(TransportType::Stdio),
            "sse" => Ok(TransportType::Sse),
            "streamable_http" | "streamable-http" | "http" => Ok(TransportType::StreamableHttp),
            other => Err(ConfigError::InvalidTransport(other.to_string())),
        }
    }
}

/// Unvalidated server description
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerDefinition {
    pub name: String,
    pub transport: TransportType,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub url: Option<String>,
    pub headers: HashMap<String, String>,
    pub connect_timeout_ms: Option<u64>,
    /// Wrap every request in a per-connection mutex so calls never interleave
    pub serialize_requests: bool,
}

impl ServerDefinition {
    /// Definition for a child-process server
    pub fn stdio(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            ..Default::default()
        }
    }

    /// Definition for a streamable HTTP server
    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportType::StreamableHttp,
            url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn transport(mut self, transport: TransportType) -> Self {
        self.transport = transport;
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = Some(timeout.as_millis().min(u128::from(u64::MAX)) as u64);
        self
    }

    pub fn serialize_requests(mut self, serialize: bool) -> Self {
        self.serialize_requests = serialize;
        self
    }

    /// Validate into a `ServerConfig`
    pub fn build(self) -> Result<ServerConfig, ConfigError> {
        ServerConfig::new(self)
    }
}

/// Validated, immutable description of how to reach one named server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    name: String,
    transport: TransportType,
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    url: Option<String>,
    headers: HashMap<String, String>,
    connect_timeout: Option<Duration>,
    serialize_requests: bool,
}

impl ServerConfig {
    pub fn new(definition: ServerDefinition) -> Result<Self, ConfigError> {
        let name = definition.name.trim().to_string();
        if name.is_empty() {
            return Err(ConfigError::EmptyName);
        }

        let connect_timeout = match definition.connect_timeout_ms {
            Some(0) => return Err(ConfigError::InvalidTimeout { server: name }),
            Some(ms) => Some(Duration::from_millis(ms)),
            None => None,
        };

        let (command, args, url) = match definition.transport {
            TransportType::Stdio => {
                let (command, args) =
                    split_command(&name, definition.command.trim(), definition.args)?;
                (command, args, None)
            }
            transport => {
                let raw = definition
                    .url
                    .as_deref()
                    .map(str::trim)
                    .filter(|u| !u.is_empty())
                    .ok_or_else(|| ConfigError::MissingUrl {
                        server: name.clone(),
                        transport: transport.to_string(),
                    })?;
                let parsed = url::Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
                    server: name.clone(),
                    reason: e.to_string(),
                })?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(ConfigError::InvalidUrl {
                        server: name,
                        reason: format!("unsupported scheme '{}'", parsed.scheme()),
                    });
                }
                (definition.command, definition.args, Some(raw.to_string()))
            }
        };

        Ok(Self {
            name,
            transport: definition.transport,
            command,
            args,
            env: definition.env,
            url,
            headers: definition.headers,
            connect_timeout,
            serialize_requests: definition.serialize_requests,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transport(&self) -> TransportType {
        self.transport
    }

    /// Executable to spawn (stdio transport)
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Environment overrides applied on top of the parent environment
    pub fn env(&self) -> &HashMap<String, String> {
        &self.env
    }

    /// Endpoint for remote transports
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }

    pub fn serialize_requests(&self) -> bool {
        self.serialize_requests
    }

    /// Short description for logging, e.g. `stdio:npx` or `streamable_http:https://...`
    pub fn describe(&self) -> String {
        match &self.url {
            Some(url) => format!("{}:{}", self.transport, url),
            None => format!("{}:{}", self.transport, self.command),
        }
    }
}

/// Split a command that carries its own arguments (e.g. `"npx -y @scope/server"`).
///
/// Only applies when no separate args were given; otherwise the command is
/// taken to be a bare executable.
fn split_command(
    server: &str,
    command: &str,
    args: Vec<String>,
) -> Result<(String, Vec<String>), ConfigError> {
    if command.is_empty() {
        return Err(ConfigError::EmptyCommand {
            server: server.to_string(),
        });
    }
    if !args.is_empty() || !command.contains(char::is_whitespace) {
        return Ok((command.to_string(), args));
    }

    let mut parts = shell_words::split(command).map_err(|e| ConfigError::InvalidCommand {
        server: server.to_string(),
        reason: e.to_string(),
    })?;
    if parts.is_empty() {
        return Err(ConfigError::EmptyCommand {
            server: server.to_string(),
        });
    }
    let executable = parts.remove(0);
    debug!(server = %server, executable = %executable, args = ?parts, "Split embedded command arguments");
    Ok((executable, parts))
}

/// One entry of an `mcpServers` document
#[derive(Debug, Deserialize)]
struct ServerEntry {
    #[serde(default)]
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default, alias = "transport")]
    r#type: Option<String>,
    #[serde(default, rename = "connectTimeoutMs", alias = "connect_timeout_ms")]
    connect_timeout_ms: Option<u64>,
    #[serde(default, rename = "serializeRequests", alias = "serialize_requests")]
    serialize_requests: bool,
}

#[derive(Debug, Deserialize)]
struct ServersDocument {
    #[serde(rename = "mcpServers", alias = "servers")]
    servers: serde_json::Map<String, serde_json::Value>,
}

/// Parse a `{"mcpServers": {"name": {...}}}` document into validated configs.
///
/// Entries without an explicit type are stdio unless they carry a url.
/// Configs are returned sorted by name.
pub fn parse_servers_json(json: &str) -> Result<Vec<ServerConfig>, ConfigError> {
    let document: ServersDocument =
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let mut configs = Vec::with_capacity(document.servers.len());
    for (name, value) in document.servers {
        let entry: ServerEntry = serde_json::from_value(value)
            .map_err(|e| ConfigError::Parse(format!("server '{}': {}", name, e)))?;

        let transport = match entry.r#type.as_deref() {
            Some(kind) => kind.parse()?,
            None if entry.url.is_some() => TransportType::StreamableHttp,
            None => TransportType::Stdio,
        };

        configs.push(ServerConfig::new(ServerDefinition {
            name,
            transport,
            command: entry.command,
            args: entry.args,
            env: entry.env,
            url: entry.url,
            headers: entry.headers,
            connect_timeout_ms: entry.connect_timeout_ms,
            serialize_requests: entry.serialize_requests,
        })?);
    }
    configs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(configs)
}
