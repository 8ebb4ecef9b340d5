//! Chat-completion model handle
//!
//! [`Model`] wraps an OpenAI-compatible endpoint with retries,
//! streaming, structured-output schemas and token accounting. The
//! provider wire types live here; the HTTP specifics are in
//! [`openai`].

mod openai;

pub use openai::OpenAiClient;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Message, ModelSpec, TokenUsage, ToolCall};
use crate::error::{EngineError, EngineResult};
use crate::events::{operation_data, OperationTracker, QueryScope};
use crate::store::ResourceStore;
use crate::tools::ToolDefinition;

/// Model name used when an agent carries no model reference
pub const DEFAULT_MODEL_NAME: &str = "default";

/// A complete chat-completion response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub id: String,
    #[serde(default)]
    pub model: String,
    pub choices: Vec<Choice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

/// One completion choice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    pub message: ResponseMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// The assistant message inside a completion choice
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ResponseMessage {
    /// Convert into a named assistant message for the transcript
    pub fn into_assistant(self, agent_name: &str) -> Message {
        Message::assistant_named(agent_name, self.content, self.tool_calls)
    }
}

/// A streamed completion chunk in provider shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionChunk {
    pub id: String,
    #[serde(default = "chunk_object")]
    pub object: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

fn chunk_object() -> String {
    "chat.completion.chunk".to_string()
}

/// One choice delta within a streamed chunk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub delta: ChunkDelta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Incremental assistant content within a chunk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

/// Partial tool-call update carried by a streamed chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallDelta {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionDelta>,
}

/// Partial function name/arguments within a tool-call delta
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// Caller-supplied sink receiving streamed chunks
///
/// Implementations must be safe to call from the executing task; the
/// engine itself never calls a sink concurrently within one query.
#[async_trait]
pub trait CompletionSink: Send + Sync {
    async fn stream_chunk(&self, scope: &QueryScope, chunk: CompletionChunk) -> EngineResult<()>;
}

/// Result of probing a model for availability
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub available: bool,
    pub message: String,
    pub detailed_error: Option<String>,
}

/// A resolved chat-completion model bound to one endpoint
pub struct Model {
    pub name: String,
    pub namespace: String,
    /// Provider model identifier sent on every request
    pub model_id: String,
    /// Structured-output schema applied to completions, if any
    pub output_schema: Option<Value>,
    /// Schema name, truncated to 64 characters at request time
    pub schema_name: Option<String>,
    client: OpenAiClient,
    tracker: OperationTracker,
}

impl Model {
    /// Namespace/name identity of this model
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Issue a chat completion, optionally streaming chunks to `sink`
    ///
    /// The assembled result of a streamed call is identical to the
    /// non-streaming response: same completion id, choices and finish
    /// reason. Usage is added to the scope's token accumulator.
    pub async fn chat_completion(
        &self,
        scope: &QueryScope,
        messages: &[Message],
        sink: Option<&dyn CompletionSink>,
        n: u32,
        tools: &[ToolDefinition],
    ) -> EngineResult<ChatCompletion> {
        let data = operation_data([("model", self.full_name())]);
        let op_scope = self.tracker.start(
            scope,
            "ChatCompletion",
            &format!("Calling model {}", self.full_name()),
            data.clone(),
        );

        let result = self
            .client
            .chat_completion(
                &op_scope,
                &self.model_id,
                messages,
                tools,
                self.output_schema.as_ref(),
                self.schema_name.as_deref(),
                n,
                sink,
            )
            .await;

        match result {
            Ok(completion) => {
                if completion.choices.is_empty() {
                    let err =
                        EngineError::Dependency("provider returned empty response".to_string());
                    self.tracker
                        .fail(&op_scope, "ChatCompletion", "Model call failed", &err, data);
                    return Err(err);
                }

                if let Some(usage) = &completion.usage {
                    scope.add_usage(usage);
                }

                self.tracker.complete(
                    &op_scope,
                    "ChatCompletion",
                    "Model call completed",
                    data,
                );
                Ok(completion)
            }
            Err(err) => {
                self.tracker
                    .fail(&op_scope, "ChatCompletion", "Model call failed", &err, data);
                Err(err)
            }
        }
    }

    /// Issue a minimal completion to test availability
    ///
    /// Used by the model reconciler to surface readiness without
    /// executing a real query.
    pub async fn probe(&self, scope: &QueryScope) -> ProbeResult {
        let messages = [Message::user("ping")];
        match self
            .client
            .chat_completion(scope, &self.model_id, &messages, &[], None, None, 1, None)
            .await
        {
            Ok(_) => ProbeResult {
                available: true,
                message: format!("model {} is available", self.full_name()),
                detailed_error: None,
            },
            Err(err) => ProbeResult {
                available: false,
                message: format!("model {} is unavailable", self.full_name()),
                detailed_error: Some(err.to_string()),
            },
        }
    }
}

/// Resolve a model reference into a bound [`Model`]
///
/// A missing reference resolves to the model named "default" in the
/// caller's namespace. Extra headers (from overrides) are merged over
/// the model's own headers.
pub async fn load_model(
    store: &Arc<dyn ResourceStore>,
    tracker: &OperationTracker,
    model_ref: Option<&str>,
    namespace: &str,
    extra_headers: &HashMap<String, String>,
) -> EngineResult<Model> {
    let model_name = match model_ref {
        Some(name) if !name.is_empty() => name,
        _ => DEFAULT_MODEL_NAME,
    };

    let spec: ModelSpec = store.get_model(model_name, namespace).await?;

    let base_url = store
        .resolve_value_source(&spec.address, namespace)
        .await?;
    let api_key = match &spec.api_key {
        Some(source) => Some(store.resolve_value_source(source, namespace).await?),
        None => None,
    };

    let mut headers = spec.headers.clone();
    for (k, v) in extra_headers {
        headers.insert(k.clone(), v.clone());
    }

    Ok(Model {
        name: spec.name,
        namespace: spec.namespace,
        model_id: spec.model,
        output_schema: None,
        schema_name: None,
        client: OpenAiClient::new(base_url, api_key, headers),
        tracker: tracker.clone(),
    })
}
