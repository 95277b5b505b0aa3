//! # McpShare Core Library
//!
//! Domain types shared by the connection pool and its consumers.
//!
//! ## Modules
//!
//! - `config` - Validated server configuration (`ServerConfig`) and its raw form
//! - `settings` - Pool-wide settings, including the idle connection policy
//! - `error` - Configuration and pool error types

pub mod config;
pub mod error;
pub mod settings;

pub use config::{parse_servers_json, ServerConfig, ServerDefinition, TransportType};
pub use error::{CloseFailure, ConfigError, ErrorKind, PoolError, PoolResult};
pub use settings::{IdlePolicy, PoolSettings, DEFAULT_CONNECT_TIMEOUT, DEFAULT_IDLE_TIMEOUT};
