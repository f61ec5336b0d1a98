//! MCP Server example for Scriptorium
//!
//! Run with: cargo run --example mcp_server
//!
//! Set `SCRIPTORIUM_CATALOG` to an `llms.txt` URL or path, and
//! `SCRIPTORIUM_ALLOWED_DOMAINS` to the domains it may fetch from.

use scriptorium::cache::CacheConfig;
use scriptorium::engine::EngineConfig;
use scriptorium::server::{ScriptoriumServer, ServerConfig, TransportType};
use std::time::Duration;

fn env_list(name: &str, default: &str) -> Vec<String> {
    std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays a clean JSON-RPC stream
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    eprintln!("📚 Starting Scriptorium MCP Server\n");

    let config = ServerConfig {
        engine: EngineConfig {
            allowed_domains: env_list("SCRIPTORIUM_ALLOWED_DOMAINS", "docs.rs"),
            catalog_sources: env_list("SCRIPTORIUM_CATALOG", "https://docs.rs/llms.txt"),
            cache: CacheConfig {
                ttl: Some(Duration::from_secs(3600)), // refetch hourly
            },
            ..Default::default()
        },
        ..Default::default()
    };

    let server = ScriptoriumServer::new(config)?;

    // Choose transport based on environment or arguments
    let transport = if std::env::var("USE_SSE").is_ok() {
        eprintln!("Starting SSE server on http://127.0.0.1:3000");
        TransportType::Sse {
            port: 3000,
            host: [127, 0, 0, 1],
        }
    } else {
        eprintln!("Starting STDIO server (for MCP clients)");
        TransportType::Stdio
    };

    server.run(transport).await?;

    Ok(())
}
