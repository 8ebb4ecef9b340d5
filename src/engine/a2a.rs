//! A2A (agent-to-agent) JSON-RPC engine
//!
//! Executes agents whose implementation lives on a remote agent server.
//! The synchronous path submits a message and converts the response
//! text into one assistant message; long-running task status is the
//! poller's concern via [`A2aEngine::get_task`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::domain::{A2aServerSpec, Message};
use crate::error::{EngineError, EngineResult};
use crate::events::{operation_data, OperationTracker, QueryScope};
use crate::model::{ChunkChoice, ChunkDelta, CompletionChunk, CompletionSink};
use crate::store::ResourceStore;

/// Annotation carrying the A2A server resource name
pub const A2A_SERVER_NAME_ANNOTATION: &str = "a2a-server-name";
/// Annotation carrying the A2A server address
pub const A2A_SERVER_ADDRESS_ANNOTATION: &str = "a2a-server-address";

const A2A_TIMEOUT: Duration = Duration::from_secs(300);

/// How many history entries a task poll requests
const TASK_HISTORY_LENGTH: u32 = 100;

/// Lifecycle state of a remote A2A task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    #[serde(alias = "submitted")]
    Pending,
    Assigned,
    #[serde(alias = "working")]
    Running,
    Completed,
    Failed,
    #[serde(alias = "canceled")]
    Cancelled,
}

impl TaskState {
    /// Whether the task can no longer change state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// A polled remote task
#[derive(Debug, Clone)]
pub struct A2aTask {
    pub id: String,
    pub state: TaskState,
    pub status_message: Option<String>,
}

/// Engine delegating execution to a remote A2A server
pub struct A2aEngine {
    store: Arc<dyn ResourceStore>,
    http: reqwest::Client,
    tracker: OperationTracker,
}

impl A2aEngine {
    /// Create an engine
    pub fn new(store: Arc<dyn ResourceStore>, tracker: OperationTracker) -> Self {
        let http = reqwest::Client::builder()
            .timeout(A2A_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            store,
            http,
            tracker,
        }
    }

    /// Execute a user message against the agent's A2A server
    ///
    /// The response becomes a single assistant message; when a sink is
    /// supplied the same content is emitted as one terminal chunk with
    /// `finish_reason="stop"`.
    pub async fn execute(
        &self,
        scope: &QueryScope,
        agent_name: &str,
        namespace: &str,
        annotations: &HashMap<String, String>,
        user_input: &Message,
        sink: Option<&dyn CompletionSink>,
    ) -> EngineResult<Vec<Message>> {
        let address = annotations
            .get(A2A_SERVER_ADDRESS_ANNOTATION)
            .filter(|a| !a.is_empty())
            .ok_or_else(|| {
                EngineError::Validation(format!(
                    "A2A agent missing {} annotation",
                    A2A_SERVER_ADDRESS_ANNOTATION
                ))
            })?;
        let server_name = annotations
            .get(A2A_SERVER_NAME_ANNOTATION)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                EngineError::Validation(format!(
                    "A2A agent missing {} annotation",
                    A2A_SERVER_NAME_ANNOTATION
                ))
            })?;

        let data = operation_data([
            ("a2aServer", server_name.clone()),
            ("serverAddr", address.clone()),
            ("protocol", "a2a-jsonrpc".to_string()),
        ]);
        let op_scope = self.tracker.start(
            scope,
            "A2AExecution",
            &format!("Executing A2A agent {}", agent_name),
            data.clone(),
        );

        let result = async {
            let server = self.store.get_a2a_server(server_name, namespace).await?;
            self.execute_against_server(&op_scope, &server, address, user_input)
                .await
        }
        .await;

        let content = match result {
            Ok(content) => content,
            Err(err) => {
                let mut failure_data = data.clone();
                failure_data.insert("failureClass".to_string(), classify(&err).to_string());
                self.tracker.fail(
                    &op_scope,
                    "A2AExecution",
                    &format!("A2A execution failed: {}", err),
                    &err,
                    failure_data,
                );
                return Err(err);
            }
        };

        if let Some(sink) = sink {
            let chunk = terminal_chunk(&op_scope, agent_name, &content);
            if let Err(err) = sink.stream_chunk(&op_scope, chunk).await {
                tracing::warn!(error = %err, "failed to send A2A response chunk to sink");
            }
        }

        self.tracker.complete(
            &op_scope,
            "A2AExecution",
            "A2A execution completed successfully",
            data,
        );

        Ok(vec![Message::assistant(content)])
    }

    async fn execute_against_server(
        &self,
        scope: &QueryScope,
        server: &A2aServerSpec,
        address: &str,
        user_input: &Message,
    ) -> EngineResult<String> {
        let headers = self.resolve_headers(server).await?;

        let content = match user_input {
            Message::User { content } => content.clone(),
            other => other.content().unwrap_or_default().to_string(),
        };

        let params = json!({
            "message": {
                "role": "user",
                "parts": [{ "kind": "text", "text": content }],
                "messageId": uuid::Uuid::new_v4().to_string(),
                "contextId": scope.session_id(),
            }
        });

        let request = self.send_rpc(address, &headers, "message/send", params);

        let result = match parse_timeout(server.timeout.as_deref())? {
            Some(deadline) => tokio::time::timeout(deadline, request)
                .await
                .map_err(|_| {
                    EngineError::Transport(format!(
                        "a2a server {} timed out after {:?}",
                        server.name, deadline
                    ))
                })??,
            None => request.await?,
        };

        extract_text(&result).ok_or_else(|| {
            EngineError::ProtocolParse("a2a response carries no text content".to_string())
        })
    }

    /// Poll a remote task's status (`tasks/get`)
    pub async fn get_task(
        &self,
        _scope: &QueryScope,
        server_name: &str,
        namespace: &str,
        task_id: &str,
    ) -> EngineResult<A2aTask> {
        let server = self.store.get_a2a_server(server_name, namespace).await?;
        let address = server
            .status
            .last_resolved_address
            .clone()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| EngineError::unresolved("a2a server", server_name.to_string()))?;

        let headers = self.resolve_headers(&server).await?;
        let params = json!({ "id": task_id, "historyLength": TASK_HISTORY_LENGTH });

        let result = self
            .send_rpc(&address, &headers, "tasks/get", params)
            .await?;

        let task: TaskResult = serde_json::from_value(result)
            .map_err(|e| EngineError::ProtocolParse(format!("malformed a2a task: {}", e)))?;

        Ok(A2aTask {
            id: task.id,
            state: task.status.state,
            status_message: task.status.message.as_ref().and_then(message_text),
        })
    }

    async fn resolve_headers(
        &self,
        server: &A2aServerSpec,
    ) -> EngineResult<HashMap<String, String>> {
        let mut headers = HashMap::new();
        for (name, source) in &server.headers {
            let value = self
                .store
                .resolve_value_source(source, &server.namespace)
                .await
                .map_err(|e| {
                    EngineError::Validation(format!(
                        "failed to resolve a2a header {}: {}",
                        name, e
                    ))
                })?;
            headers.insert(name.clone(), value);
        }
        Ok(headers)
    }

    async fn send_rpc(
        &self,
        address: &str,
        headers: &HashMap<String, String>,
        method: &str,
        params: Value,
    ) -> EngineResult<Value> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": uuid::Uuid::new_v4().to_string(),
            "method": method,
            "params": params,
        });

        let mut builder = self.http.post(address).json(&request);
        for (name, value) in headers {
            builder = builder.header(name, value);
        }

        let response = builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Dependency(format!(
                "a2a server returned status {}: {}",
                status.as_u16(),
                body
            )));
        }

        let rpc: RpcResponse = response
            .json()
            .await
            .map_err(|e| EngineError::ProtocolParse(format!("malformed a2a response: {}", e)))?;

        if let Some(error) = rpc.error {
            return Err(EngineError::Dependency(format!(
                "a2a error [{}] {}",
                error.code, error.message
            )));
        }

        rpc.result.ok_or_else(|| {
            EngineError::ProtocolParse("a2a response missing result".to_string())
        })
    }
}

/// Map an error to the diagnostic failure class surfaced on events
pub(super) fn classify(err: &EngineError) -> &'static str {
    match err {
        EngineError::Transport(_) => "connection",
        EngineError::ProtocolParse(_) => "parse",
        EngineError::Validation(message) if message.contains("header") => "header-resolution",
        EngineError::Validation(_) => "message",
        _ => "message",
    }
}

fn terminal_chunk(scope: &QueryScope, agent_name: &str, content: &str) -> CompletionChunk {
    // All chunks of one query share the query id as completion id; the
    // model id uses the agent/<name> form of OpenAI-compatible surfaces.
    let completion_id = scope
        .query_details()
        .map(|d| d.query_id.clone())
        .unwrap_or_default();

    CompletionChunk {
        id: completion_id,
        object: "chat.completion.chunk".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: format!("agent/{}", agent_name),
        choices: vec![ChunkChoice {
            index: 0,
            delta: ChunkDelta {
                role: Some("assistant".to_string()),
                content: Some(content.to_string()),
                tool_calls: None,
            },
            finish_reason: Some("stop".to_string()),
        }],
        usage: None,
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct TaskResult {
    id: String,
    status: TaskStatus,
}

#[derive(Debug, Deserialize)]
struct TaskStatus {
    state: TaskState,
    #[serde(default)]
    message: Option<Value>,
}

fn message_text(message: &Value) -> Option<String> {
    let parts = message.get("parts")?.as_array()?;
    let text: Vec<&str> = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();
    if text.is_empty() {
        None
    } else {
        Some(text.join("\n"))
    }
}

/// Pull the response text out of a `message/send` result, which may be
/// a message, a task carrying a status message, or a task with
/// artifacts
pub(super) fn extract_text(result: &Value) -> Option<String> {
    if let Some(text) = message_text(result) {
        return Some(text);
    }
    if let Some(status_message) = result.pointer("/status/message") {
        if let Some(text) = message_text(status_message) {
            return Some(text);
        }
    }
    if let Some(artifacts) = result.get("artifacts").and_then(Value::as_array) {
        let text: Vec<String> = artifacts.iter().filter_map(message_text).collect();
        if !text.is_empty() {
            return Some(text.join("\n"));
        }
    }
    None
}

/// Parse an optional duration string with Go-style suffixes
/// (`"500ms"`, `"30s"`, `"5m"`, `"1h"`)
pub(super) fn parse_timeout(timeout: Option<&str>) -> EngineResult<Option<Duration>> {
    let Some(raw) = timeout.filter(|t| !t.is_empty()) else {
        return Ok(None);
    };

    let (number, unit) = raw
        .find(|c: char| c.is_alphabetic())
        .map(|i| raw.split_at(i))
        .ok_or_else(|| {
            EngineError::Validation(format!("failed to parse a2a server timeout {:?}", raw))
        })?;

    let value: f64 = number.parse().map_err(|_| {
        EngineError::Validation(format!("failed to parse a2a server timeout {:?}", raw))
    })?;

    let duration = match unit {
        "ms" => Duration::from_secs_f64(value / 1000.0),
        "s" => Duration::from_secs_f64(value),
        "m" => Duration::from_secs_f64(value * 60.0),
        "h" => Duration::from_secs_f64(value * 3600.0),
        _ => {
            return Err(EngineError::Validation(format!(
                "failed to parse a2a server timeout {:?}",
                raw
            )))
        }
    };

    Ok(Some(duration))
}
