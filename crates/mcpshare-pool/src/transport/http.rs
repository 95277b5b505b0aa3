//! HTTP transport for MCP servers
//!
//! Handles connecting to MCP servers over Streamable HTTP. Configured headers
//! are installed as default headers on the underlying reqwest client so they
//! go out with every request.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use mcpshare_core::{ServerConfig, TransportType};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::ServiceExt;
use tracing::{debug, info};

use super::{create_client_handler, Transport};
use crate::session::McpClient;

/// HTTP transport for Streamable HTTP MCP servers
pub struct HttpTransport {
    server: String,
    url: String,
    headers: HeaderMap,
}

impl HttpTransport {
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let url = config
            .url()
            .ok_or_else(|| anyhow!("Server '{}' has no url", config.name()))?
            .to_string();

        let mut headers = HeaderMap::new();
        for (key, value) in config.headers() {
            let name = HeaderName::from_bytes(key.as_bytes())
                .with_context(|| format!("Invalid header name: {}", key))?;
            let value = HeaderValue::from_str(value)
                .with_context(|| format!("Invalid value for header {}", key))?;
            headers.insert(name, value);
        }

        Ok(Self {
            server: config.name().to_string(),
            url,
            headers,
        })
    }

    fn build_http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .default_headers(self.headers.clone())
            .build()
            .context("Failed to build HTTP client")
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn connect(&self) -> Result<McpClient> {
        debug!(
            server = %self.server,
            header_count = self.headers.len(),
            "Connecting to HTTP server"
        );

        let client = self.build_http_client()?;
        let transport_config = StreamableHttpClientTransportConfig::with_uri(self.url.as_str());
        let transport = StreamableHttpClientTransport::with_client(client, transport_config);

        let client = create_client_handler(&self.server)
            .serve(transport)
            .await
            .with_context(|| format!("HTTP connection to {} failed", self.url))?;

        info!(server = %self.server, url = %self.url, "HTTP server connected");
        Ok(client)
    }

    fn transport_type(&self) -> TransportType {
        TransportType::StreamableHttp
    }

    fn description(&self) -> String {
        format!("http:{}", self.url)
    }
}
