//! mcpServers document tests

use mcpshare_core::{parse_servers_json, TransportType};
use pretty_assertions::assert_eq;
use std::time::Duration;
use tests::{ConfigError, ErrorKind, McpManager, MockLauncher, PoolError, PoolSettings};

const DESKTOP_CONFIG: &str = r#"{
    "mcpServers": {
        "filesystem": {
            "command": "npx",
            "args": ["-y", "@modelcontextprotocol/server-filesystem", "/tmp"],
            "env": { "DEBUG": "1" }
        },
        "docs": {
            "url": "https://docs.example.com/mcp",
            "headers": { "Authorization": "Bearer token" },
            "connectTimeoutMs": 5000
        },
        "sqlite": {
            "command": "uvx mcp-server-sqlite --db-path \"/tmp/test db.sqlite\"",
            "serializeRequests": true
        }
    }
}"#;

#[test]
fn test_desktop_document() {
    let configs = parse_servers_json(DESKTOP_CONFIG).unwrap();
    let names: Vec<_> = configs.iter().map(|c| c.name()).collect();
    assert_eq!(names, ["docs", "filesystem", "sqlite"]);

    let docs = &configs[0];
    assert_eq!(docs.transport(), TransportType::StreamableHttp);
    assert_eq!(docs.url(), Some("https://docs.example.com/mcp"));
    assert_eq!(docs.connect_timeout(), Some(Duration::from_secs(5)));
    assert_eq!(
        docs.headers().get("Authorization").map(String::as_str),
        Some("Bearer token")
    );

    let fs = &configs[1];
    assert_eq!(fs.transport(), TransportType::Stdio);
    assert_eq!(fs.command(), "npx");
    assert_eq!(fs.args().len(), 3);
    assert!(!fs.serialize_requests());

    let sqlite = &configs[2];
    assert_eq!(sqlite.command(), "uvx");
    assert_eq!(
        sqlite.args(),
        ["mcp-server-sqlite", "--db-path", "/tmp/test db.sqlite"]
    );
    assert!(sqlite.serialize_requests());
}

#[test]
fn test_explicit_type_is_validated() {
    let err = parse_servers_json(r#"{"mcpServers": {"x": {"type": "carrier-pigeon", "command": "a"}}}"#)
        .unwrap_err();
    assert_eq!(err, ConfigError::InvalidTransport("carrier-pigeon".to_string()));

    let err = parse_servers_json(r#"{"mcpServers": {"events": {"type": "sse"}}}"#).unwrap_err();
    assert!(matches!(err, ConfigError::MissingUrl { .. }));

    let err = parse_servers_json(r#"{"mcpServers": {"x": {"url": "ftp://example.com"}}}"#)
        .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidUrl { .. }));
}

#[test]
fn test_malformed_document() {
    let err = parse_servers_json("{ not json").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
    assert_eq!(PoolError::from(err).kind(), ErrorKind::Config);
}

#[tokio::test]
async fn test_document_loads_into_manager() {
    let launcher = MockLauncher::new();
    let manager = McpManager::with_launcher(PoolSettings::default(), launcher.clone());
    for config in parse_servers_json(DESKTOP_CONFIG).unwrap() {
        manager.add_server(config).unwrap();
    }
    manager.start().unwrap();

    assert_eq!(manager.server_names(), ["docs", "filesystem", "sqlite"]);
    let listing = manager.get_all_tools().await;
    assert!(listing.is_complete());
    assert_eq!(launcher.total_launches(), 3);
    manager.stop().await.unwrap();
}
