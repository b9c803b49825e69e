// Integration tests for the multi-server registry against mock TCP servers

use std::collections::HashMap;
use std::time::Duration;

use serde_json::{json, Value};
use talon::{ConnectionOptions, McpError, McpRegistry, ServerConfig, TransportConfig};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

/// Mock server: answers the handshake, declares `tools`, and answers
/// tools/call with "ok:<tool>" text - or a "boom" isError result when the
/// arguments carry `"fail": true`. Serves one connection, then exits.
async fn spawn_tool_server(tools: Vec<Value>) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        loop {
            let mut line = String::new();
            match reader.read_line(&mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let message: Value = match serde_json::from_str(line.trim()) {
                Ok(value) => value,
                Err(_) => continue,
            };
            let Some(id) = message.get("id") else {
                continue; // notification
            };

            let response = match message["method"].as_str().unwrap_or_default() {
                "initialize" => json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {
                        "protocolVersion": "2025-06-18",
                        "capabilities": {},
                        "serverInfo": {"name": "mock", "version": "1.0.0"}
                    }
                }),
                "tools/list" => json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {"tools": tools}
                }),
                "tools/call" => {
                    let name = message["params"]["name"].as_str().unwrap_or_default();
                    if message["params"]["arguments"]["fail"] == json!(true) {
                        json!({
                            "jsonrpc": "2.0",
                            "id": id,
                            "result": {
                                "content": [{"type": "text", "text": "boom"}],
                                "isError": true
                            }
                        })
                    } else {
                        json!({
                            "jsonrpc": "2.0",
                            "id": id,
                            "result": {"content": [{"type": "text", "text": format!("ok:{}", name)}]}
                        })
                    }
                }
                _ => json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": -32601, "message": "Method not found"}
                }),
            };

            let mut out = response.to_string();
            out.push('\n');
            if write_half.write_all(out.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    port
}

fn tool(name: &str) -> Value {
    json!({"name": name, "description": format!("The {} tool", name), "inputSchema": {"type": "object"}})
}

fn tcp_config(port: u16) -> TransportConfig {
    TransportConfig::Tcp {
        host: "127.0.0.1".to_string(),
        port,
    }
}

fn registry() -> McpRegistry {
    McpRegistry::with_options(ConnectionOptions {
        call_timeout: Duration::from_secs(5),
    })
}

#[tokio::test]
async fn test_add_server_discovers_tools() {
    let port = spawn_tool_server(vec![tool("fetch"), tool("search")]).await;

    let registry = registry();
    registry.add_server("a", &tcp_config(port)).await.unwrap();

    assert!(registry.contains("a").await);
    let tools = registry.tools_for("a").await.unwrap();
    assert_eq!(tools.len(), 2);
    // Order within one server matches its discovery result
    assert_eq!(tools[0].name, "fetch");
    assert_eq!(tools[1].name, "search");

    registry.close_all().await.unwrap();
}

#[tokio::test]
async fn test_add_duplicate_name_leaves_first_registration_intact() {
    let port = spawn_tool_server(vec![tool("fetch")]).await;

    let registry = registry();
    registry.add_server("a", &tcp_config(port)).await.unwrap();

    let err = registry
        .add_server("a", &tcp_config(port))
        .await
        .expect_err("duplicate name must be rejected");
    assert!(err.to_string().contains("already exists"), "{}", err);

    // First registration untouched
    let tools = registry.tools_for("a").await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "fetch");

    registry.close_all().await.unwrap();
}

#[tokio::test]
async fn test_add_server_connect_failure_registers_nothing() {
    // Nothing listening on this port
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let registry = registry();
    let err = registry.add_server("dead", &tcp_config(port)).await;
    assert!(err.is_err());
    assert!(!registry.contains("dead").await);
    assert!(registry.servers().await.is_empty());
}

#[tokio::test]
async fn test_remove_server() {
    let port = spawn_tool_server(vec![tool("fetch")]).await;

    let registry = registry();
    registry.add_server("a", &tcp_config(port)).await.unwrap();
    registry.remove_server("a").await.unwrap();
    assert!(!registry.contains("a").await);

    let err = registry
        .remove_server("a")
        .await
        .expect_err("removing a missing server must fail");
    assert!(err.to_string().contains("not found"), "{}", err);
}

#[tokio::test]
async fn test_all_tools_aggregates_across_servers() {
    let port_a = spawn_tool_server(vec![tool("fetch"), tool("search")]).await;
    let port_b = spawn_tool_server(vec![tool("read")]).await;

    let registry = registry();
    registry.add_server("a", &tcp_config(port_a)).await.unwrap();
    registry.add_server("b", &tcp_config(port_b)).await.unwrap();

    let mut names: Vec<_> = registry
        .all_tools()
        .await
        .into_iter()
        .map(|tool| tool.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["fetch", "read", "search"]);

    registry.close_all().await.unwrap();
}

#[tokio::test]
async fn test_execute_tool_returns_text() {
    let port = spawn_tool_server(vec![tool("fetch")]).await;

    let registry = registry();
    registry.add_server("a", &tcp_config(port)).await.unwrap();

    let output = registry
        .execute_tool("a/fetch", json!({"url": "http://x"}))
        .await
        .unwrap();
    assert_eq!(output, "ok:fetch");

    registry.close_all().await.unwrap();
}

#[tokio::test]
async fn test_execute_tool_surfaces_is_error_as_failure() {
    let port = spawn_tool_server(vec![tool("fetch")]).await;

    let registry = registry();
    registry.add_server("a", &tcp_config(port)).await.unwrap();

    let err = registry
        .execute_tool("a/fetch", json!({"url": "http://x", "fail": true}))
        .await
        .expect_err("isError result must become a failure");

    match err.downcast_ref::<McpError>() {
        Some(McpError::ToolFailed(message)) => assert_eq!(message, "boom"),
        other => panic!("Expected ToolFailed, got {:?}", other),
    }

    registry.close_all().await.unwrap();
}

#[tokio::test]
async fn test_execute_tool_rejects_unqualified_name() {
    let registry = registry();
    let err = registry.execute_tool("fetch", json!({})).await.unwrap_err();
    assert!(err.to_string().contains("Invalid qualified tool name"));
}

#[tokio::test]
async fn test_execute_tool_unknown_server() {
    let registry = registry();
    let err = registry
        .execute_tool("ghost/fetch", json!({}))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not found"));
}

#[tokio::test]
async fn test_close_all_empties_registry() {
    let port_a = spawn_tool_server(vec![tool("fetch")]).await;
    let port_b = spawn_tool_server(vec![tool("read")]).await;

    let registry = registry();
    registry.add_server("a", &tcp_config(port_a)).await.unwrap();
    registry.add_server("b", &tcp_config(port_b)).await.unwrap();

    registry.close_all().await.unwrap();
    assert!(registry.servers().await.is_empty());

    // Closing an already-empty registry is fine
    registry.close_all().await.unwrap();
}

#[tokio::test]
async fn test_from_config_skips_disabled_and_failed() {
    let port = spawn_tool_server(vec![tool("fetch")]).await;

    // A dead port for the failing entry
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_port = listener.local_addr().unwrap().port();
    drop(listener);

    let mut configs = HashMap::new();
    configs.insert(
        "good".to_string(),
        ServerConfig {
            transport: tcp_config(port),
            enabled: true,
        },
    );
    configs.insert(
        "off".to_string(),
        ServerConfig {
            transport: tcp_config(port),
            enabled: false,
        },
    );
    configs.insert(
        "dead".to_string(),
        ServerConfig {
            transport: tcp_config(dead_port),
            enabled: true,
        },
    );

    let registry = McpRegistry::from_config(&configs).await;

    let servers = registry.servers().await;
    assert_eq!(servers, vec!["good".to_string()]);

    registry.close_all().await.unwrap();
}
