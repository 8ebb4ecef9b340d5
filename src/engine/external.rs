//! External HTTP execution engine client

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::Agent;
use crate::domain::{EngineRef, Message, Parameter, TokenUsage};
use crate::error::{EngineError, EngineResult};
use crate::events::{operation_data, OperationTracker, QueryScope};
use crate::store::ResourceStore;
use crate::tools::ToolDefinition;

/// Default timeout for one engine execution
const ENGINE_TIMEOUT: Duration = Duration::from_secs(300);

/// A chat message in the flattened shape engines exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineMessage {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// The request body sent to `POST {engine}/execute`
#[derive(Debug, Serialize)]
pub struct EngineRequest {
    pub agent: AgentConfig,
    #[serde(rename = "userInput")]
    pub user_input: EngineMessage,
    pub history: Vec<EngineMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

/// Agent configuration shipped to the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    pub namespace: String,
    pub prompt: String,
    pub description: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub parameters: Vec<Parameter>,
    pub model: EngineModel,
    #[serde(
        rename = "outputSchema",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub output_schema: Option<Value>,
}

/// Model binding shipped to the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineModel {
    pub name: String,
    #[serde(rename = "type")]
    pub model_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}

/// The response body returned by an engine
#[derive(Debug, Deserialize)]
pub struct EngineResponse {
    #[serde(default)]
    pub messages: Vec<EngineMessage>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub token_usage: Option<TokenUsage>,
}

/// Flatten a message to the engine wire shape; tool calls do not cross
/// the engine boundary
pub fn to_engine_message(message: &Message) -> EngineMessage {
    EngineMessage {
        role: message.role().to_string(),
        content: message.content().unwrap_or_default().to_string(),
        name: None,
    }
}

/// Re-import an engine message; tool messages degrade to assistant
/// (engines carry no tool-call ids) and unknown roles coerce to user
pub fn from_engine_message(message: &EngineMessage) -> Message {
    match message.role.as_str() {
        "user" => Message::user(&message.content),
        "system" => Message::system(&message.content),
        "assistant" | "tool" => Message::assistant(&message.content),
        _ => Message::user(&message.content),
    }
}

/// Build the agent configuration shipped to an engine
pub fn build_agent_config(agent: &Agent) -> EngineResult<AgentConfig> {
    let model = agent.model.as_ref().ok_or_else(|| {
        EngineError::Validation(format!(
            "agent {} has no model configured",
            agent.full_name()
        ))
    })?;

    let parameters = agent
        .parameters
        .iter()
        .filter(|p| !p.value.is_empty())
        .cloned()
        .collect();

    Ok(AgentConfig {
        name: agent.name.clone(),
        namespace: agent.namespace.clone(),
        prompt: agent.prompt.clone(),
        description: agent.description.clone(),
        parameters,
        model: EngineModel {
            name: model.model_id.clone(),
            model_type: "openai".to_string(),
            config: None,
        },
        output_schema: agent.output_schema.clone(),
    })
}

/// Client for external execution engines
pub struct ExecutionEngineClient {
    store: Arc<dyn ResourceStore>,
    http: reqwest::Client,
    tracker: OperationTracker,
}

impl ExecutionEngineClient {
    /// Create a client with the default 300 s timeout
    pub fn new(store: Arc<dyn ResourceStore>, tracker: OperationTracker) -> Self {
        Self::with_timeout(store, tracker, ENGINE_TIMEOUT)
    }

    /// Create a client with a collaborator-configured timeout
    pub fn with_timeout(
        store: Arc<dyn ResourceStore>,
        tracker: OperationTracker,
        timeout: Duration,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            store,
            http,
            tracker,
        }
    }

    /// Execute an agent on the referenced engine and re-import the
    /// resulting messages
    pub async fn execute(
        &self,
        scope: &QueryScope,
        engine_ref: &EngineRef,
        agent_config: AgentConfig,
        user_input: &Message,
        history: &[Message],
        tools: &[ToolDefinition],
    ) -> EngineResult<Vec<Message>> {
        let data = operation_data([
            ("engineName", engine_ref.name.clone()),
            ("agentName", agent_config.name.clone()),
        ]);
        let op_scope = self.tracker.start(
            scope,
            "ExecutionEngine",
            &format!("Executing agent via execution engine {}", engine_ref.name),
            data.clone(),
        );

        let result = self
            .execute_inner(&op_scope, engine_ref, agent_config, user_input, history, tools)
            .await;

        match result {
            Ok(messages) => {
                self.tracker.complete(
                    &op_scope,
                    "ExecutionEngine",
                    "Execution engine completed successfully",
                    data,
                );
                Ok(messages)
            }
            Err(err) => {
                self.tracker.fail(
                    &op_scope,
                    "ExecutionEngine",
                    &format!("Execution engine failed: {}", err),
                    &err,
                    data,
                );
                Err(err)
            }
        }
    }

    async fn execute_inner(
        &self,
        scope: &QueryScope,
        engine_ref: &EngineRef,
        agent_config: AgentConfig,
        user_input: &Message,
        history: &[Message],
        tools: &[ToolDefinition],
    ) -> EngineResult<Vec<Message>> {
        let address = self.resolve_address(engine_ref, &agent_config.namespace).await?;

        let request = EngineRequest {
            agent: agent_config,
            user_input: to_engine_message(user_input),
            history: history.iter().map(to_engine_message).collect(),
            tools: tools.to_vec(),
        };

        let response = self
            .http
            .post(format!("{}/execute", address.trim_end_matches('/')))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Dependency(format!(
                "execution engine returned error status: {}",
                status.as_u16()
            )));
        }

        let body: EngineResponse = response.json().await.map_err(|e| {
            EngineError::ProtocolParse(format!("malformed execution engine response: {}", e))
        })?;

        if let Some(error) = body.error.filter(|e| !e.is_empty()) {
            return Err(EngineError::Dependency(format!(
                "execution engine error: {}",
                error
            )));
        }

        if let Some(usage) = &body.token_usage {
            scope.add_usage(usage);
        }

        Ok(body.messages.iter().map(from_engine_message).collect())
    }

    async fn resolve_address(
        &self,
        engine_ref: &EngineRef,
        default_namespace: &str,
    ) -> EngineResult<String> {
        let namespace = engine_ref.namespace.as_deref().unwrap_or(default_namespace);
        let engine = self
            .store
            .get_execution_engine(&engine_ref.name, namespace)
            .await?;

        engine
            .status
            .last_resolved_address
            .filter(|a| !a.is_empty())
            .ok_or_else(|| EngineError::unresolved("execution engine", engine_ref.name.clone()))
    }
}
