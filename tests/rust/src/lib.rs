//! Shared test utilities and fixtures for McpShare integration tests.

use std::sync::Arc;
use std::time::Duration;

pub use mcpshare_core::{
    ConfigError, ErrorKind, IdlePolicy, PoolError, PoolSettings, ServerConfig, ServerDefinition,
};
pub use mcpshare_pool::{ConnectionPool, ConnectionState, McpManager};

pub use mocks::{MockLauncher, MockSession, SessionOptions, FAILING_TOOL};

/// A valid stdio config; the mock launcher never spawns it
pub fn stdio(name: &str) -> ServerConfig {
    ServerDefinition::stdio(name, "npx")
        .args(["-y", format!("@test/{}", name).as_str()])
        .build()
        .unwrap()
}

/// A started pool over `launcher` with `servers` registered
pub fn running_pool(
    launcher: &Arc<MockLauncher>,
    settings: PoolSettings,
    servers: &[&str],
) -> Arc<ConnectionPool> {
    mcpshare_pool::logging::try_init_for_tests();
    let pool = Arc::new(ConnectionPool::with_launcher(settings, launcher.clone()));
    for name in servers {
        pool.add_server(stdio(name)).unwrap();
    }
    pool.start().unwrap();
    pool
}

/// Poll `condition` until it holds, panicking after five seconds
pub async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within 5s"
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Text of the first content block of a tool result
pub fn first_text(result: &rmcp::model::CallToolResult) -> Option<String> {
    result
        .content
        .first()
        .and_then(|content| content.as_text())
        .map(|text| text.text.clone())
}
