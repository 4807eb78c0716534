//! MCP protocol implementation for JSON-RPC 2.0 communication.
//!
//! This module provides the core MCP server implementation including:
//! - JSON-RPC 2.0 request/response handling
//! - Tool definitions and schemas
//! - Stdio-based server communication

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info};

use super::{handle_tool_call, SharedState};
use crate::error::{McpError, McpResult};

#[cfg(test)]
#[path = "mcp_tests.rs"]
mod mcp_tests;

/// JSON-RPC 2.0 request structure.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (must be "2.0").
    pub jsonrpc: String,
    /// Request identifier (None for notifications).
    pub id: Option<Value>,
    /// The method name to invoke.
    pub method: String,
    /// Optional parameters for the method.
    #[serde(default)]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 response structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version (always "2.0").
    pub jsonrpc: String,
    /// Request identifier (null for parse errors).
    pub id: Value,
    /// The result on success (mutually exclusive with error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// The error on failure (mutually exclusive with result).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    /// Error code (negative for predefined errors).
    pub code: i32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional error data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// MCP server information returned during initialization.
#[derive(Debug, Serialize)]
pub struct ServerInfo {
    /// The server name identifier.
    pub name: String,
    /// The server version string.
    pub version: String,
}

/// MCP server capabilities advertised to clients.
#[derive(Debug, Serialize)]
pub struct Capabilities {
    /// Tool-related capabilities.
    pub tools: ToolCapabilities,
}

/// Tool-specific capabilities.
#[derive(Debug, Serialize)]
pub struct ToolCapabilities {
    /// Whether the tool list can change dynamically.
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

/// Result of the MCP initialize handshake.
#[derive(Debug, Serialize)]
pub struct InitializeResult {
    /// The MCP protocol version supported.
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Server capabilities.
    pub capabilities: Capabilities,
    /// Server identification information.
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

/// MCP tool definition with JSON Schema.
#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    /// Unique tool name (used in tool calls).
    pub name: String,
    /// Human-readable description of the tool.
    pub description: String,
    /// JSON Schema for the tool's input parameters.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Parameters for a tools/call request.
#[derive(Debug, Deserialize)]
pub struct ToolCallParams {
    /// The name of the tool to invoke.
    pub name: String,
    /// Optional arguments for the tool.
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// Content item within a tool result.
#[derive(Debug, Serialize)]
pub struct ToolResultContent {
    /// The content type (e.g., "text").
    #[serde(rename = "type")]
    pub content_type: String,
    /// The text content of the result.
    pub text: String,
}

/// Result of a tool invocation.
#[derive(Debug, Serialize)]
pub struct ToolCallResult {
    /// The result content items.
    pub content: Vec<ToolResultContent>,
    /// Whether the result represents an error.
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl ToolCallResult {
    /// Wrap a handler outcome.
    ///
    /// String results are passed through as text, other values are
    /// pretty-printed JSON. Actionable failures render as
    /// `{"error": ..., "suggestion": ...}`.
    pub fn from_outcome(outcome: McpResult<Value>) -> Self {
        let (text, is_error) = match outcome {
            Ok(Value::String(text)) => (text, None),
            Ok(result) => (
                serde_json::to_string_pretty(&result).unwrap_or_else(|e| {
                    error!(error = %e, "Failed to serialize tool result");
                    format!("{{\"error\": \"Serialization failed: {}\"}}", e)
                }),
                None,
            ),
            Err(McpError::ToolFailed {
                message,
                suggestion,
            }) => (
                serde_json::json!({ "error": message, "suggestion": suggestion }).to_string(),
                Some(true),
            ),
            Err(e) => (format!("Error: {}", e), Some(true)),
        };

        Self {
            content: vec![ToolResultContent {
                content_type: "text".to_string(),
                text,
            }],
            is_error,
        }
    }
}

impl JsonRpcResponse {
    /// Create a success response
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// MCP Server running over stdio.
///
/// Handles JSON-RPC 2.0 messages over stdin/stdout for MCP protocol
/// communication with clients.
pub struct McpServer {
    /// Shared application state.
    state: SharedState,
}

impl McpServer {
    /// Create a new MCP server
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    /// Run the server using async stdio
    pub async fn run(&self) -> std::io::Result<()> {
        info!("MCP Nous Compose Server starting...");

        let stdin = tokio::io::stdin();
        let mut stdout = tokio::io::stdout();
        let mut reader = BufReader::new(stdin);
        let mut line = String::new();

        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line).await?;

            // EOF reached
            if bytes_read == 0 {
                info!("EOF received, shutting down");
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            debug!(request = %trimmed, "Received request");

            let response = match serde_json::from_str::<JsonRpcRequest>(trimmed) {
                Ok(request) => self.handle_request(request).await,
                Err(e) => {
                    error!(error = %e, "Failed to parse request");
                    Some(JsonRpcResponse::error(
                        None,
                        -32700,
                        format!("Parse error: {}", e),
                    ))
                }
            };

            // Notifications get no response
            if let Some(response) = response {
                let response_json = serde_json::to_string(&response)?;
                debug!(response = %response_json, "Sending response");

                stdout.write_all(response_json.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
        }

        Ok(())
    }

    /// Handle a single JSON-RPC request.
    ///
    /// Returns None for notifications (requests without id).
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let is_notification = request.id.is_none();

        match request.method.as_str() {
            "initialize" => Some(self.handle_initialize(request.id)),
            "initialized" | "notifications/initialized" => {
                debug!("Received initialized notification");
                None
            }
            "notifications/cancelled" => {
                debug!("Received cancelled notification");
                None
            }
            "tools/list" => Some(self.handle_tools_list(request.id)),
            "tools/call" => Some(self.handle_tool_call(request.id, request.params).await),
            "ping" => Some(JsonRpcResponse::success(
                request.id,
                Value::Object(Default::default()),
            )),
            method => {
                if is_notification {
                    debug!(method = %method, "Unknown notification, ignoring");
                    None
                } else {
                    error!(method = %method, "Unknown method");
                    Some(JsonRpcResponse::error(
                        request.id,
                        -32601,
                        format!("Method not found: {}", method),
                    ))
                }
            }
        }
    }

    /// Handle initialize request
    fn handle_initialize(&self, id: Option<Value>) -> JsonRpcResponse {
        info!("Handling initialize request");

        let result = InitializeResult {
            protocol_version: "2024-11-05".to_string(),
            capabilities: Capabilities {
                tools: ToolCapabilities {
                    list_changed: false,
                },
            },
            server_info: ServerInfo {
                name: "mcp-nous-compose".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        match serde_json::to_value(result) {
            Ok(val) => JsonRpcResponse::success(id, val),
            Err(e) => {
                error!(error = %e, "Failed to serialize initialize result");
                JsonRpcResponse::error(id, -32603, format!("Internal error: {}", e))
            }
        }
    }

    /// Handle tools/list request
    fn handle_tools_list(&self, id: Option<Value>) -> JsonRpcResponse {
        info!("Handling tools/list request");

        JsonRpcResponse::success(
            id,
            serde_json::json!({
                "tools": all_tools()
            }),
        )
    }

    /// Handle tools/call request
    async fn handle_tool_call(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let params: ToolCallParams = match params {
            Some(p) => match serde_json::from_value(p) {
                Ok(p) => p,
                Err(e) => {
                    return JsonRpcResponse::error(id, -32602, format!("Invalid params: {}", e));
                }
            },
            None => {
                return JsonRpcResponse::error(id, -32602, "Missing params");
            }
        };

        info!(tool = %params.name, "Handling tool call");

        let outcome = handle_tool_call(&self.state, &params.name, params.arguments).await;
        let tool_result = ToolCallResult::from_outcome(outcome);

        match serde_json::to_value(tool_result) {
            Ok(val) => JsonRpcResponse::success(id, val),
            Err(e) => {
                error!(error = %e, "Failed to serialize tool call result");
                JsonRpcResponse::error(id, -32603, format!("Internal error: {}", e))
            }
        }
    }
}

/// Every tool the server advertises.
pub fn all_tools() -> Vec<Tool> {
    vec![
        get_placement_tool(),
        get_impact_tool(),
        get_user_domain_tool(),
        get_compose_tool(),
        get_feedback_tool(),
        get_accuracy_tool(),
        get_remember_tool(),
        get_add_practice_tool(),
        get_add_antipattern_tool(),
        get_learn_pattern_tool(),
        get_import_project_tool(),
        get_add_dependency_tool(),
        get_record_change_tool(),
    ]
}

fn single_query_schema(description: &str) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "query": {
                "type": "string",
                "description": description
            }
        },
        "required": ["query"],
        "additionalProperties": false
    })
}

fn get_placement_tool() -> Tool {
    Tool {
        name: "nous_placement".to_string(),
        description: "Recommend where new code should go, with confidence and alternatives drawn from memories, the code tree, learned patterns, inference and cross-project experience.".to_string(),
        input_schema: single_query_schema("What you want to place, e.g. 'Where should the logging helper go?'"),
    }
}

fn get_impact_tool() -> Tool {
    Tool {
        name: "nous_impact".to_string(),
        description: "Assess what is affected if something changes, with confidence and alternatives.".to_string(),
        input_schema: single_query_schema("The change to assess, e.g. 'What breaks if parse_config changes?'"),
    }
}

fn get_user_domain_tool() -> Tool {
    Tool {
        name: "nous_user_domain".to_string(),
        description: "Identify who a feature or module serves, with confidence and alternatives.".to_string(),
        input_schema: single_query_schema("The feature to place in its user domain"),
    }
}

fn get_compose_tool() -> Tool {
    Tool {
        name: "nous_compose".to_string(),
        description: "Full composition: recommendation, five-factor confidence breakdown, ranked alternatives and citation trail as JSON.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The question"
                },
                "query_type": {
                    "type": "string",
                    "enum": ["placement", "impact", "user_domain", "general"],
                    "description": "Kind of question (default: general)"
                },
                "sources": {
                    "type": "array",
                    "items": {
                        "type": "string",
                        "enum": ["memory", "code", "pattern", "reasoning", "experience"]
                    },
                    "description": "Evidence sources to consult (default: all)"
                },
                "min_alternatives": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Minimum number of alternatives"
                },
                "max_results": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Maximum number of alternatives"
                },
                "min_confidence": {
                    "type": "number",
                    "minimum": 0,
                    "maximum": 1,
                    "description": "Minimum confidence for the primary recommendation"
                },
                "show_reasoning": {
                    "type": "boolean",
                    "description": "Include the citation trail (default: true)"
                },
                "show_alternatives": {
                    "type": "boolean",
                    "description": "Include alternatives (default: true)"
                }
            },
            "required": ["query"],
            "additionalProperties": false
        }),
    }
}

fn get_feedback_tool() -> Tool {
    Tool {
        name: "nous_feedback".to_string(),
        description: "Report whether a recommendation was accepted, rejected or modified. Calibrates future confidence for that query type.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "query_id": {
                    "type": "string",
                    "description": "Query ID returned with the recommendation"
                },
                "outcome": {
                    "type": "string",
                    "enum": ["accepted", "rejected", "modified"]
                },
                "recommended": {
                    "type": "string",
                    "description": "Recommendation text, if not the retained one"
                },
                "actual_choice": {
                    "type": "string",
                    "description": "What was done instead"
                },
                "explanation": {
                    "type": "string",
                    "description": "Why"
                },
                "submitter": {
                    "type": "string"
                }
            },
            "required": ["query_id", "outcome"],
            "additionalProperties": false
        }),
    }
}

fn get_accuracy_tool() -> Tool {
    Tool {
        name: "nous_accuracy".to_string(),
        description: "Historical accuracy of recommendations per query type.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "query_type": {
                    "type": "string",
                    "enum": ["placement", "impact", "user_domain", "general"],
                    "description": "One type; omit for all"
                }
            },
            "additionalProperties": false
        }),
    }
}

fn get_remember_tool() -> Tool {
    Tool {
        name: "nous_remember".to_string(),
        description: "Store a memory (decision, fact, convention) that later queries can cite.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "content": {
                    "type": "string",
                    "description": "What to remember"
                },
                "location": {
                    "type": "string",
                    "description": "Path the memory is about, e.g. src/util/log.rs"
                },
                "tags": {
                    "type": "array",
                    "items": { "type": "string" }
                }
            },
            "required": ["content"],
            "additionalProperties": false
        }),
    }
}

fn get_add_practice_tool() -> Tool {
    Tool {
        name: "nous_add_practice".to_string(),
        description: "Add a best practice to the knowledge base.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "name": { "type": "string" },
                "description": { "type": "string" },
                "rationale": { "type": "string" },
                "category": {
                    "type": "string",
                    "description": "e.g. error_handling, safety, organization"
                }
            },
            "required": ["name", "description", "category"],
            "additionalProperties": false
        }),
    }
}

fn get_add_antipattern_tool() -> Tool {
    Tool {
        name: "nous_add_antipattern".to_string(),
        description: "Add an anti-pattern to the knowledge base. Matching queries cite it as a warning.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "name": { "type": "string" },
                "description": { "type": "string" },
                "why_bad": { "type": "string" },
                "consequences": {
                    "type": "array",
                    "items": { "type": "string" }
                },
                "better_alternative": { "type": "string" }
            },
            "required": ["name", "description", "why_bad"],
            "additionalProperties": false
        }),
    }
}

fn get_learn_pattern_tool() -> Tool {
    Tool {
        name: "nous_learn_pattern".to_string(),
        description: "Teach a project convention. Learned patterns feed PATTERN evidence immediately.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "type": {
                    "type": "string",
                    "enum": [
                        "naming", "organization", "error_handling", "memory",
                        "api_design", "testing", "documentation"
                    ]
                },
                "name": { "type": "string" },
                "description": { "type": "string" },
                "rationale": { "type": "string" },
                "examples": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "location": { "type": "string" },
                            "snippet": { "type": "string" }
                        },
                        "required": ["location"]
                    }
                },
                "exceptions": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "location": { "type": "string" },
                            "snippet": { "type": "string" },
                            "reason": { "type": "string" },
                            "justified": { "type": "boolean" }
                        },
                        "required": ["location"]
                    }
                }
            },
            "required": ["type", "name", "description"],
            "additionalProperties": false
        }),
    }
}

fn get_import_project_tool() -> Tool {
    Tool {
        name: "nous_import_project".to_string(),
        description: "Record a successful project and derive a best practice for its domain.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "name": { "type": "string" },
                "domain": {
                    "type": "string",
                    "description": "Category the derived practice is filed under"
                },
                "quality": {
                    "type": "number",
                    "minimum": 0,
                    "maximum": 1
                }
            },
            "required": ["name", "domain", "quality"],
            "additionalProperties": false
        }),
    }
}

fn get_add_dependency_tool() -> Tool {
    Tool {
        name: "nous_add_dependency".to_string(),
        description: "Record that one component depends on another. Impact queries naming the target cite its dependents.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "source": {
                    "type": "string",
                    "description": "The dependent component"
                },
                "target": {
                    "type": "string",
                    "description": "The component depended on"
                },
                "type": {
                    "type": "string",
                    "enum": [
                        "function_call", "data_access", "include",
                        "symbol_reference", "indirect"
                    ]
                },
                "strength": {
                    "type": "number",
                    "minimum": 0,
                    "maximum": 1,
                    "default": 0.5
                }
            },
            "required": ["source", "target", "type"],
            "additionalProperties": false
        }),
    }
}

fn get_record_change_tool() -> Tool {
    Tool {
        name: "nous_record_change".to_string(),
        description: "Log a completed change and whether it succeeded. Change history calibrates impact risk and confidence.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "description": { "type": "string" },
                "files_changed": {
                    "type": "array",
                    "items": { "type": "string" }
                },
                "functions_affected": {
                    "type": "array",
                    "items": { "type": "string" }
                },
                "successful": { "type": "boolean" },
                "issues": { "type": "string" }
            },
            "required": ["description", "successful"],
            "additionalProperties": false
        }),
    }
}
