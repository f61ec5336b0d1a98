//! MCP server implementation for Scriptorium.
//!
//! This module exposes the engine's `search` and `fetch` operations as MCP
//! tools over STDIO or SSE/HTTP transports.

use crate::engine::{DocsEngine, EngineConfig};
use crate::types::{
    FetchArgs, ScriptoriumError, ScriptoriumResult, SearchArgs, fetch_args_schema,
    search_args_schema,
};
use crate::{SERVER_NAME, VERSION};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

/// MCP Protocol version
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Default name of the search tool
pub const DEFAULT_SEARCH_TOOL: &str = "search_docs";

/// Default name of the fetch tool
pub const DEFAULT_FETCH_TOOL: &str = "fetch_doc";

/// Transport type for the MCP server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportType {
    /// Standard input/output transport
    #[default]
    Stdio,
    /// Server-Sent Events over HTTP
    Sse {
        /// Port to listen on
        port: u16,
        /// Host to bind to
        host: [u8; 4],
    },
}

/// Configuration for the Scriptorium server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Engine configuration
    pub engine: EngineConfig,

    /// Name under which the search tool is published
    pub search_tool_name: String,

    /// Name under which the fetch tool is published
    pub fetch_tool_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            search_tool_name: DEFAULT_SEARCH_TOOL.to_string(),
            fetch_tool_name: DEFAULT_FETCH_TOOL.to_string(),
        }
    }
}

/// JSON-RPC 2.0 Request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,
    /// Request ID (None for notifications)
    pub id: Option<Value>,
    /// Method name
    pub method: String,
    /// Method parameters
    #[serde(default)]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Whether this message expects no response
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,
    /// Request ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Success result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 Error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code
    pub code: i32,
    /// Error message
    pub message: String,
    /// Additional error data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    /// Create a success response
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message,
                data: None,
            }),
        }
    }
}

/// MCP Tool definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpTool {
    /// Tool name
    pub name: String,
    /// Tool description
    pub description: Option<String>,
    /// JSON Schema for input
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

fn tool_result(text: String, is_error: bool) -> Value {
    json!({
        "content": [{ "type": "text", "text": text }],
        "isError": is_error
    })
}

/// Tool handler implementation
#[derive(Clone)]
pub struct ScriptoriumHandler {
    engine: Arc<DocsEngine>,
    search_tool_name: String,
    fetch_tool_name: String,
    initialized: Arc<RwLock<bool>>,
}

impl ScriptoriumHandler {
    /// Create a handler with an HTTP-backed engine
    pub fn new(config: ServerConfig) -> ScriptoriumResult<Self> {
        let engine = Arc::new(DocsEngine::new(config.engine.clone())?);
        Ok(Self::with_engine(engine, &config))
    }

    /// Create a handler over an existing engine
    pub fn with_engine(engine: Arc<DocsEngine>, config: &ServerConfig) -> Self {
        Self {
            engine,
            search_tool_name: config.search_tool_name.clone(),
            fetch_tool_name: config.fetch_tool_name.clone(),
            initialized: Arc::new(RwLock::new(false)),
        }
    }

    /// The engine behind the tools
    pub fn engine(&self) -> &Arc<DocsEngine> {
        &self.engine
    }

    /// Get server information for initialization
    pub fn get_server_info(&self) -> Value {
        json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {
                "tools": {}
            },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": VERSION
            }
        })
    }

    /// List available tools
    pub fn list_tools(&self) -> Vec<McpTool> {
        vec![
            McpTool {
                name: self.search_tool_name.clone(),
                description: Some(
                    "Search the documentation catalog. Returns ranked results with url, title, relevance score and a query-relevant snippet."
                        .to_string(),
                ),
                input_schema: search_args_schema(),
            },
            McpTool {
                name: self.fetch_tool_name.clone(),
                description: Some(
                    "Fetch a documentation page by URI and return its full text as Markdown. Only allow-listed domains can be fetched."
                        .to_string(),
                ),
                input_schema: fetch_args_schema(),
            },
        ]
    }

    /// Handle a JSON-RPC request
    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        debug!(method = %request.method, "Handling request");

        match request.method.as_str() {
            "initialize" => {
                let mut initialized = self.initialized.write().await;
                *initialized = true;
                JsonRpcResponse::success(request.id, self.get_server_info())
            },

            "initialized" | "notifications/initialized" => {
                // Notification acknowledgment
                JsonRpcResponse::success(request.id, json!({}))
            },

            "tools/list" => {
                let tools = self.list_tools();
                JsonRpcResponse::success(request.id, json!({ "tools": tools }))
            },

            "tools/call" => {
                let params = match request.params {
                    Some(p) => p,
                    None => {
                        return JsonRpcResponse::error(
                            request.id,
                            -32602,
                            "Missing parameters".to_string(),
                        );
                    },
                };

                let tool_name = params
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

                self.call_tool(request.id, tool_name, arguments).await
            },

            "ping" => JsonRpcResponse::success(request.id, json!({})),

            _ => JsonRpcResponse::error(
                request.id,
                -32601,
                format!("Method not found: {}", request.method),
            ),
        }
    }

    /// Call a specific tool
    #[instrument(skip(self, id, arguments))]
    async fn call_tool(&self, id: Option<Value>, name: &str, arguments: Value) -> JsonRpcResponse {
        info!(tool = %name, "Executing tool");

        if name == self.search_tool_name {
            let args: SearchArgs = match serde_json::from_value(arguments) {
                Ok(a) => a,
                Err(e) => {
                    return JsonRpcResponse::error(
                        id,
                        -32602,
                        format!("Invalid search arguments: {}", e),
                    );
                },
            };

            let results = self.engine.search(&args.query, args.k).await;
            match serde_json::to_string_pretty(&results) {
                Ok(text) => JsonRpcResponse::success(id, tool_result(text, false)),
                Err(e) => JsonRpcResponse::error(id, -32603, ScriptoriumError::from(e).to_string()),
            }
        } else if name == self.fetch_tool_name {
            let args: FetchArgs = match serde_json::from_value(arguments) {
                Ok(a) => a,
                Err(e) => {
                    return JsonRpcResponse::error(
                        id,
                        -32602,
                        format!("Invalid fetch arguments: {}", e),
                    );
                },
            };

            let response = self.engine.fetch(&args.uri).await;
            if response.is_error() {
                warn!(uri = %args.uri, "Fetch tool returned an error");
            }
            match serde_json::to_string_pretty(&response) {
                Ok(text) => JsonRpcResponse::success(id, tool_result(text, response.is_error())),
                Err(e) => JsonRpcResponse::error(id, -32603, ScriptoriumError::from(e).to_string()),
            }
        } else {
            JsonRpcResponse::error(id, -32601, format!("Unknown tool: {}", name))
        }
    }
}

/// Main Scriptorium MCP server
pub struct ScriptoriumServer {
    handler: ScriptoriumHandler,
}

impl ScriptoriumServer {
    /// Create a new Scriptorium server with the given configuration
    pub fn new(config: ServerConfig) -> ScriptoriumResult<Self> {
        Ok(Self {
            handler: ScriptoriumHandler::new(config)?,
        })
    }

    /// Create a server over an existing engine
    pub fn with_engine(engine: Arc<DocsEngine>, config: &ServerConfig) -> Self {
        Self {
            handler: ScriptoriumHandler::with_engine(engine, config),
        }
    }

    /// The request handler
    pub fn handler(&self) -> &ScriptoriumHandler {
        &self.handler
    }

    /// Load the catalog, then run the server with the specified transport
    #[instrument(skip(self))]
    pub async fn run(self, transport: TransportType) -> ScriptoriumResult<()> {
        info!(
            server = SERVER_NAME,
            version = VERSION,
            "Starting Scriptorium MCP server"
        );

        let load = self.handler.engine.load_catalog().await;
        for (source, error) in &load.failures {
            warn!(source = %source, error = %error, "Catalog source unavailable");
        }

        match transport {
            TransportType::Stdio => self.run_stdio().await,
            TransportType::Sse { port, host } => self.run_sse(host, port).await,
        }
    }

    /// Run the server with STDIO transport
    async fn run_stdio(self) -> ScriptoriumResult<()> {
        info!("Starting STDIO transport");

        let stdin = tokio::io::stdin();
        let mut stdout = tokio::io::stdout();
        let reader = BufReader::new(stdin);
        let mut lines = reader.lines();

        // Process JSON-RPC messages line by line
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }

            debug!(request = %line, "Received request");

            let response = match serde_json::from_str::<JsonRpcRequest>(&line) {
                Ok(request) if request.is_notification() => {
                    debug!(method = %request.method, "Received notification");
                    continue;
                },
                Ok(request) => self.handler.handle_request(request).await,
                Err(e) => JsonRpcResponse::error(None, -32700, format!("Parse error: {}", e)),
            };

            let response_str = serde_json::to_string(&response)?;
            debug!(response = %response_str, "Sending response");
            stdout.write_all(response_str.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }

        info!("STDIO server stopped");
        Ok(())
    }

    /// Run the server with SSE transport
    async fn run_sse(self, host: [u8; 4], port: u16) -> ScriptoriumResult<()> {
        use axum::{
            Json, Router,
            extract::State,
            response::sse::{Event, Sse},
            routing::{get, post},
        };
        use futures::stream::{self, Stream};
        use std::convert::Infallible;
        use tower_http::cors::CorsLayer;

        info!(host = ?host, port = port, "Starting SSE transport");

        let handler = Arc::new(self.handler);

        // Health check endpoint
        async fn health() -> &'static str {
            "OK"
        }

        // SSE endpoint for server-to-client messages
        async fn sse_handler() -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
            let stream = stream::once(async { Ok(Event::default().data("connected")) });
            Sse::new(stream)
        }

        // JSON-RPC endpoint
        async fn rpc_handler(
            State(handler): State<Arc<ScriptoriumHandler>>,
            Json(request): Json<JsonRpcRequest>,
        ) -> Json<JsonRpcResponse> {
            let response = handler.handle_request(request).await;
            Json(response)
        }

        let app = Router::new()
            .route("/health", get(health))
            .route("/sse", get(sse_handler))
            .route("/rpc", post(rpc_handler))
            .layer(CorsLayer::permissive())
            .with_state(handler);

        let addr = std::net::SocketAddr::from((host, port));
        let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
            ScriptoriumError::ServerError(format!("Failed to bind to {}: {}", addr, e))
        })?;

        info!("SSE server listening on http://{}", addr);

        axum::serve(listener, app)
            .await
            .map_err(|e| ScriptoriumError::ServerError(format!("Server error: {}", e)))?;

        Ok(())
    }
}
