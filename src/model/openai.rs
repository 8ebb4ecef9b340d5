//! OpenAI-compatible chat-completion client

use std::collections::HashMap;
use std::time::Duration;

use futures::StreamExt;
use serde_json::{json, Value};

use super::{ChatCompletion, Choice, CompletionChunk, CompletionSink, ResponseMessage};
use crate::domain::{Message, ToolCall};
use crate::error::{EngineError, EngineResult};
use crate::events::QueryScope;
use crate::tools::ToolDefinition;

/// Default end-to-end timeout for one completion request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Retries for transport-level failures before giving up
const DEFAULT_MAX_RETRIES: u32 = 2;

const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

/// HTTP client for an OpenAI-compatible `/chat/completions` endpoint
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    headers: HashMap<String, String>,
    max_retries: u32,
}

impl OpenAiClient {
    /// Create a client for the given base URL
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        headers: HashMap<String, String>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            headers,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Override how many transport failures are retried
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[allow(clippy::too_many_arguments)]
    pub(super) async fn chat_completion(
        &self,
        scope: &QueryScope,
        model_id: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
        output_schema: Option<&Value>,
        schema_name: Option<&str>,
        n: u32,
        sink: Option<&dyn CompletionSink>,
    ) -> EngineResult<ChatCompletion> {
        let streaming = sink.is_some();
        let body = build_request_body(
            model_id,
            messages,
            tools,
            output_schema,
            schema_name,
            n,
            streaming,
        );

        let mut attempt = 0;
        loop {
            scope.check_cancelled()?;

            let result = if let Some(sink) = sink {
                self.stream_completion(scope, &body, sink).await
            } else {
                self.complete(&body).await
            };

            match result {
                Err(EngineError::Transport(message)) if attempt < self.max_retries => {
                    attempt += 1;
                    tracing::debug!(attempt, error = %message, "retrying model request");
                    tokio::time::sleep(RETRY_BASE_DELAY * 2u32.pow(attempt - 1)).await;
                }
                other => return other,
            }
        }
    }

    async fn send_request(&self, body: &Value) -> EngineResult<reqwest::Response> {
        let mut request = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Content-Type", "application/json");

        if let Some(api_key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", api_key));
        }
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }

        let response = request.json(body).send().await.map_err(|e| {
            EngineError::Transport(format!("provider unavailable: {}", e))
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body_text = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            Err(EngineError::Transport(format!(
                "provider unavailable: status {}: {}",
                status.as_u16(),
                body_text
            )))
        } else {
            Err(EngineError::Dependency(format!(
                "provider rejected request: status {}: {}",
                status.as_u16(),
                body_text
            )))
        }
    }

    async fn complete(&self, body: &Value) -> EngineResult<ChatCompletion> {
        let response = self.send_request(body).await?;
        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| EngineError::ProtocolParse(format!("malformed completion: {}", e)))?;
        Ok(completion)
    }

    /// Stream a completion, forwarding each chunk to the sink and
    /// assembling the final response with identical semantics to a
    /// non-streaming call
    async fn stream_completion(
        &self,
        scope: &QueryScope,
        body: &Value,
        sink: &dyn CompletionSink,
    ) -> EngineResult<ChatCompletion> {
        let response = self.send_request(body).await?;

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut assembler = ChunkAssembler::default();

        while let Some(chunk_result) = stream.next().await {
            scope.check_cancelled()?;

            let bytes = chunk_result
                .map_err(|e| EngineError::Transport(format!("stream interrupted: {}", e)))?;
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(pos) = buffer.find('\n') {
                let line = buffer[..pos].trim().to_string();
                buffer.drain(..=pos);

                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                if data == "[DONE]" {
                    return Ok(assembler.finish());
                }

                let chunk: CompletionChunk = serde_json::from_str(data).map_err(|e| {
                    EngineError::ProtocolParse(format!("malformed stream chunk: {}", e))
                })?;

                assembler.apply(&chunk);
                if let Err(e) = sink.stream_chunk(scope, chunk).await {
                    tracing::warn!(error = %e, "completion sink rejected chunk");
                }
            }
        }

        Ok(assembler.finish())
    }
}

/// Accumulates streamed chunks into a final [`ChatCompletion`]
#[derive(Default)]
struct ChunkAssembler {
    id: String,
    model: String,
    content: String,
    tool_calls: Vec<ToolCallBuilder>,
    finish_reason: Option<String>,
    usage: Option<crate::domain::TokenUsage>,
}

#[derive(Default)]
struct ToolCallBuilder {
    id: String,
    name: String,
    arguments: String,
}

impl ChunkAssembler {
    fn apply(&mut self, chunk: &CompletionChunk) {
        if self.id.is_empty() {
            self.id = chunk.id.clone();
        }
        if self.model.is_empty() {
            self.model = chunk.model.clone();
        }
        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }

        let Some(choice) = chunk.choices.first() else {
            return;
        };

        if let Some(content) = &choice.delta.content {
            self.content.push_str(content);
        }
        if let Some(reason) = &choice.finish_reason {
            self.finish_reason = Some(reason.clone());
        }

        for delta in choice.delta.tool_calls.iter().flatten() {
            while self.tool_calls.len() <= delta.index {
                self.tool_calls.push(ToolCallBuilder::default());
            }
            let builder = &mut self.tool_calls[delta.index];
            if let Some(id) = &delta.id {
                builder.id.push_str(id);
            }
            if let Some(function) = &delta.function {
                if let Some(name) = &function.name {
                    builder.name.push_str(name);
                }
                if let Some(arguments) = &function.arguments {
                    builder.arguments.push_str(arguments);
                }
            }
        }
    }

    fn finish(self) -> ChatCompletion {
        let tool_calls: Vec<ToolCall> = self
            .tool_calls
            .into_iter()
            .filter(|b| !b.id.is_empty() && !b.name.is_empty())
            .map(|b| ToolCall::new(b.id, b.name, b.arguments))
            .collect();

        ChatCompletion {
            id: self.id,
            model: self.model,
            choices: vec![Choice {
                index: 0,
                message: ResponseMessage {
                    content: if self.content.is_empty() && !tool_calls.is_empty() {
                        None
                    } else {
                        Some(self.content)
                    },
                    tool_calls: if tool_calls.is_empty() {
                        None
                    } else {
                        Some(tool_calls)
                    },
                },
                finish_reason: self.finish_reason,
            }],
            usage: self.usage,
        }
    }
}

fn build_request_body(
    model_id: &str,
    messages: &[Message],
    tools: &[ToolDefinition],
    output_schema: Option<&Value>,
    schema_name: Option<&str>,
    n: u32,
    stream: bool,
) -> Value {
    let mut body = json!({
        "model": model_id,
        "messages": messages.iter().map(Message::to_wire).collect::<Vec<_>>(),
    });

    if n > 1 {
        body["n"] = json!(n);
    }

    if !tools.is_empty() {
        body["tools"] = json!(tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": normalize_parameters(&t.parameters),
                    }
                })
            })
            .collect::<Vec<_>>());
    }

    if let Some(schema) = output_schema {
        // The schema name is purely an identifier; providers cap it at
        // 64 characters.
        let name: String = schema_name
            .unwrap_or("output")
            .chars()
            .take(64)
            .collect();
        body["response_format"] = json!({
            "type": "json_schema",
            "json_schema": { "name": name, "schema": schema },
        });
    }

    if stream {
        body["stream"] = json!(true);
        body["stream_options"] = json!({ "include_usage": true });
    }

    body
}

/// Providers require at minimum `{"type": "object"}` for function
/// parameters; fill in what sparse tool schemas leave out
fn normalize_parameters(parameters: &Value) -> Value {
    if parameters.is_null()
        || parameters
            .as_object()
            .map_or(true, |obj| obj.is_empty())
    {
        return json!({ "type": "object", "properties": {}, "required": [] });
    }
    if parameters.get("type").is_none() {
        let mut patched = parameters.clone();
        if let Some(obj) = patched.as_object_mut() {
            obj.insert("type".to_string(), json!("object"));
        }
        return patched;
    }
    parameters.clone()
}
