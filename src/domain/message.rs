//! Chat message and token usage types

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A message in a conversation, discriminated by role
///
/// Serializes to the provider wire shape: `{"role": "...", "content": ...}`
/// with `tool_calls`/`tool_call_id` on the relevant variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    /// Instructions to the model
    System { content: String },
    /// End-user input
    User { content: String },
    /// Model output, possibly carrying tool calls
    Assistant {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<ToolCall>>,
    },
    /// Result of a tool invocation, answering a specific tool call
    Tool {
        content: String,
        tool_call_id: String,
    },
}

impl Message {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            name: None,
            content: Some(content.into()),
            tool_calls: None,
        }
    }

    /// Create a named assistant message with optional tool calls
    pub fn assistant_named(
        name: impl Into<String>,
        content: Option<String>,
        tool_calls: Option<Vec<ToolCall>>,
    ) -> Self {
        Self::Assistant {
            name: Some(name.into()),
            content,
            tool_calls: tool_calls.filter(|tc| !tc.is_empty()),
        }
    }

    /// Create a tool result message
    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self::Tool {
            content: content.into(),
            tool_call_id: tool_call_id.into(),
        }
    }

    /// Role string for this message
    pub fn role(&self) -> &'static str {
        match self {
            Self::System { .. } => "system",
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
            Self::Tool { .. } => "tool",
        }
    }

    /// Textual content, if any
    pub fn content(&self) -> Option<&str> {
        match self {
            Self::System { content } | Self::User { content } | Self::Tool { content, .. } => {
                Some(content.as_str())
            }
            Self::Assistant { content, .. } => content.as_deref(),
        }
    }

    /// Tool calls carried by an assistant message
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Self::Assistant {
                tool_calls: Some(calls),
                ..
            } => calls.as_slice(),
            _ => &[],
        }
    }

    /// Convert to the provider wire representation
    pub fn to_wire(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| {
            serde_json::json!({ "role": self.role(), "content": self.content().unwrap_or("") })
        })
    }

    /// Parse a message from provider JSON, accepting either the
    /// discriminated form or a permissive `{role, content}` fallback
    ///
    /// Unknown roles coerce to `user`; a tool message missing its
    /// `tool_call_id` degrades to `assistant`.
    pub fn from_wire(value: &Value) -> crate::error::EngineResult<Self> {
        if let Ok(message) = serde_json::from_value::<Message>(value.clone()) {
            return Ok(message);
        }

        let role = value
            .get("role")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                crate::error::EngineError::ProtocolParse(
                    "message missing required 'role' field".to_string(),
                )
            })?
            .to_string();
        let content = value
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(match role.as_str() {
            "system" => Message::system(content),
            "user" => Message::user(content),
            // Tool results without a call id cannot be paired; keep the
            // content in the transcript as assistant text.
            "assistant" | "tool" => Message::assistant(content),
            other => {
                tracing::debug!(role = other, "coercing unknown message role to user");
                Message::user(content)
            }
        })
    }
}

/// A model-issued structured function invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for this call, echoed by the tool result
    pub id: String,
    /// Call type, always "function" for chat-completion providers
    #[serde(rename = "type", default = "default_call_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

fn default_call_type() -> String {
    "function".to_string()
}

/// The function half of a tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Arguments as the raw JSON string the provider produced
    pub arguments: String,
}

impl ToolCall {
    /// Create a new tool call
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            call_type: default_call_type(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    /// Generate a unique id for a locally-created tool call
    pub fn generate_id() -> String {
        format!(
            "call_{}",
            &uuid::Uuid::new_v4().to_string().replace('-', "")[..24]
        )
    }

    /// Parse the arguments string as a JSON object
    pub fn arguments_value(&self) -> crate::error::EngineResult<Value> {
        if self.function.arguments.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        serde_json::from_str(&self.function.arguments).map_err(|e| {
            crate::error::EngineError::Validation(format!(
                "tool call {} has malformed arguments: {}",
                self.function.name, e
            ))
        })
    }
}

/// Token usage counters, additive within a query scope
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: i64,
    #[serde(default)]
    pub completion_tokens: i64,
    #[serde(default)]
    pub total_tokens: i64,
}

impl TokenUsage {
    /// Add another usage record into this one
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }

    /// Whether no tokens have been recorded
    pub fn is_zero(&self) -> bool {
        self.prompt_tokens == 0 && self.completion_tokens == 0 && self.total_tokens == 0
    }
}
