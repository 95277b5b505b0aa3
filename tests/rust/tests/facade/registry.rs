//! ServerRegistry tests

use mcpshare_pool::ServerRegistry;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tests::{
    running_pool, stdio, ConfigError, ErrorKind, MockLauncher, PoolError, PoolSettings,
    SessionOptions,
};

fn registry(launcher: &Arc<MockLauncher>) -> ServerRegistry {
    ServerRegistry::new(running_pool(launcher, PoolSettings::default(), &[]))
}

#[tokio::test]
async fn test_add_registers_with_pool() {
    let launcher = MockLauncher::new();
    let registry = registry(&launcher);

    registry.add(stdio("git")).unwrap();
    registry.add(stdio("fs")).unwrap();

    assert_eq!(registry.names(), ["fs", "git"]);
    assert_eq!(registry.pool().server_names(), ["fs", "git"]);
    assert!(registry.contains("fs"));
    assert_eq!(registry.len(), 2);
    assert_eq!(launcher.total_launches(), 0);
}

#[tokio::test]
async fn test_duplicate_add_fails() {
    let launcher = MockLauncher::new();
    let registry = registry(&launcher);

    registry.add(stdio("fs")).unwrap();
    assert_eq!(
        registry.add(stdio("fs")).unwrap_err(),
        PoolError::Config(ConfigError::DuplicateServer("fs".to_string()))
    );
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_get_unknown_is_not_found() {
    let launcher = MockLauncher::new();
    let registry = registry(&launcher);

    assert_eq!(
        registry.get("nope").unwrap_err(),
        PoolError::NotFound("nope".to_string())
    );
}

#[tokio::test]
async fn test_get_all_tools_isolates_failures() {
    let launcher = MockLauncher::new();
    launcher.session_options(
        "fs",
        SessionOptions {
            tools: vec!["read_file".into(), "write_file".into()],
            ..Default::default()
        },
    );
    launcher.session_options(
        "git",
        SessionOptions {
            tools: vec!["log".into()],
            ..Default::default()
        },
    );
    launcher.fail("broken", "spawn failed");

    let registry = registry(&launcher);
    for name in ["fs", "git", "broken"] {
        registry.add(stdio(name)).unwrap();
    }

    let listing = registry.get_all_tools().await;

    assert!(!listing.is_complete());
    assert_eq!(listing.tool_count(), 3);
    assert_eq!(
        listing.tools.keys().map(String::as_str).collect::<Vec<_>>(),
        ["fs", "git"]
    );
    assert_eq!(listing.tools["git"][0].name, "log");
    assert_eq!(listing.failures.len(), 1);
    assert_eq!(listing.failures["broken"].kind(), ErrorKind::Connection);

    // Listing releases everything it acquired
    assert_eq!(registry.pool().stats().total_refs, 0);
}

#[tokio::test]
async fn test_remove_unregisters_and_closes() {
    let launcher = MockLauncher::new();
    let registry = registry(&launcher);
    let facade = registry.add(stdio("fs")).unwrap();
    facade.list_tools().await.unwrap();

    registry.remove("fs").await.unwrap();

    assert!(!registry.contains("fs"));
    assert!(!registry.pool().contains("fs"));
    assert_eq!(launcher.last_session("fs").unwrap().closes(), 1);
    assert_eq!(
        registry.remove("fs").await.unwrap_err(),
        PoolError::NotFound("fs".to_string())
    );
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_pool_level_removal_drops_facade() {
    let launcher = MockLauncher::new();
    let registry = registry(&launcher);
    registry.add(stdio("fs")).unwrap();
    registry.add(stdio("git")).unwrap();

    registry.pool().remove_server("fs").await.unwrap();

    assert_eq!(registry.names(), ["git"]);
    assert!(!registry.contains("fs"));
    assert_eq!(registry.len(), 1);
    assert_eq!(
        registry.get("fs").unwrap_err(),
        PoolError::NotFound("fs".to_string())
    );
}
