//! # McpShare Pool
//!
//! Shares a small number of long-lived MCP sessions between any number of
//! concurrent consumers.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         McpManager                              │
//! │   ┌────────────────────────┐      ┌──────────────────────────┐  │
//! │   │     ServerRegistry     │─────▶│      ConnectionPool      │  │
//! │   │  name → ServerFacade   │      │  name → ServerConfig     │  │
//! │   └────────────────────────┘      │  name → Connection       │  │
//! │                                   │   (state, refs, session) │  │
//! │                                   └────────────┬─────────────┘  │
//! └────────────────────────────────────────────────┼────────────────┘
//!                                                  ▼
//!                                  ┌──────────────────────────────┐
//!                                  │   Launcher (RmcpLauncher)    │
//!                                  │  StdioTransport  HttpTransport│
//!                                  └──────────────────────────────┘
//! ```
//!
//! Every path ends in [`ConnectionPool::acquire`]: the first acquisition for a
//! server spawns exactly one connect attempt, concurrent acquisitions wait on
//! it, and later ones reuse the READY session while bumping its reference count.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mcpshare_pool::{McpManager, ServerDefinition};
//!
//! let manager = McpManager::new(Default::default());
//! manager.add_server(
//!     ServerDefinition::stdio("filesystem", "npx")
//!         .args(["-y", "@modelcontextprotocol/server-filesystem", "/tmp"])
//!         .build()?,
//! )?;
//! manager.start()?;
//!
//! let tools = manager.get_all_tools().await;
//! let result = manager
//!     .call_tool("filesystem", "read_file", Some(args))
//!     .await?;
//!
//! manager.stop().await?;
//! ```

mod connection;
pub mod facade;
pub mod global;
pub mod logging;
pub mod manager;
pub mod pool;
pub mod registry;
pub mod session;
pub mod transport;

pub use connection::{ConnectionSnapshot, ConnectionState};
pub use facade::ServerFacade;
pub use manager::McpManager;
pub use pool::{ConnectionPool, PoolStats, PooledSession, ToolListing};
pub use registry::ServerRegistry;
pub use session::{McpClient, McpClientHandler, McpSession, Session};
pub use transport::{Launcher, RmcpLauncher, Transport, TransportFactory};

pub use mcpshare_core::{
    parse_servers_json, CloseFailure, ConfigError, ErrorKind, IdlePolicy, PoolError, PoolResult,
    PoolSettings, ServerConfig, ServerDefinition, TransportType,
};
