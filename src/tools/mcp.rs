//! MCP server tools over JSON-RPC

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::ToolInvoker;
use crate::error::{EngineError, EngineResult};
use crate::events::QueryScope;

const MCP_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    id: u64,
    method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

/// A tool advertised by an MCP server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ListToolsResult {
    tools: Vec<McpTool>,
}

#[derive(Debug, Deserialize)]
struct CallToolResult {
    #[serde(default)]
    content: Vec<ContentItem>,
    #[serde(rename = "isError", default)]
    is_error: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ContentItem {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: Option<String>,
}

/// JSON-RPC client for one MCP server endpoint
pub struct McpClient {
    http: reqwest::Client,
    endpoint: String,
    headers: HashMap<String, String>,
    request_id: AtomicU64,
}

impl McpClient {
    /// Create a client for the given endpoint with connection headers
    pub fn new(endpoint: impl Into<String>, headers: HashMap<String, String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(MCP_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            http,
            endpoint: endpoint.into(),
            headers,
            request_id: AtomicU64::new(0),
        }
    }

    async fn send_request(&self, method: &str, params: Option<Value>) -> EngineResult<Value> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.request_id.fetch_add(1, Ordering::Relaxed) + 1,
            method: method.to_string(),
            params,
        };

        let mut builder = self.http.post(&self.endpoint).json(&request);
        for (name, value) in &self.headers {
            builder = builder.header(name, value);
        }

        let response = builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Dependency(format!(
                "mcp server returned status {}: {}",
                status.as_u16(),
                body
            )));
        }

        let rpc: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| EngineError::ProtocolParse(format!("malformed mcp response: {}", e)))?;

        if let Some(error) = rpc.error {
            return Err(EngineError::Dependency(format!(
                "mcp error [{}] {}",
                error.code, error.message
            )));
        }

        rpc.result.ok_or_else(|| {
            EngineError::ProtocolParse("mcp response missing result".to_string())
        })
    }

    /// List the tools the server advertises
    pub async fn list_tools(&self) -> EngineResult<Vec<McpTool>> {
        let result = self.send_request("tools/list", None).await?;
        let listed: ListToolsResult = serde_json::from_value(result)
            .map_err(|e| EngineError::ProtocolParse(format!("malformed tool list: {}", e)))?;
        Ok(listed.tools)
    }

    /// Call a tool and fold its text content into one string
    pub async fn call_tool(&self, name: &str, arguments: Value) -> EngineResult<String> {
        let params = json!({ "name": name, "arguments": arguments });
        let result = self.send_request("tools/call", Some(params)).await?;

        let call_result: CallToolResult = serde_json::from_value(result)
            .map_err(|e| EngineError::ProtocolParse(format!("malformed tool result: {}", e)))?;

        let mut output = String::new();
        for item in &call_result.content {
            if item.content_type == "text" {
                if let Some(text) = &item.text {
                    if !output.is_empty() {
                        output.push('\n');
                    }
                    output.push_str(text);
                }
            }
        }

        if call_result.is_error.unwrap_or(false) {
            return Err(EngineError::Dependency(format!(
                "mcp tool {} failed: {}",
                name, output
            )));
        }

        Ok(output)
    }
}

/// Invoker routing a single named tool to its MCP server
pub struct McpToolInvoker {
    client: Arc<McpClient>,
    tool_name: String,
}

impl McpToolInvoker {
    /// Create an invoker for one server tool
    pub fn new(client: Arc<McpClient>, tool_name: String) -> Self {
        Self { client, tool_name }
    }
}

#[async_trait]
impl ToolInvoker for McpToolInvoker {
    async fn invoke(&self, _scope: &QueryScope, arguments: Value) -> EngineResult<String> {
        self.client.call_tool(&self.tool_name, arguments).await
    }
}
