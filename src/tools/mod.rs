//! Tool resolution and invocation
//!
//! Each agent gets its own [`ToolRegistry`], built from the agent's
//! tool bindings: engine built-ins, HTTP tools, MCP server tools,
//! other agents wrapped as tools, and partial facades with pre-filled
//! parameters. The registry exposes a uniform invocation interface and
//! guarantees that every invocation yields a tool message, even on
//! failure.

mod agent_tool;
mod http;
mod mcp;

pub use mcp::McpClient;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{
    default_parameters_schema, AgentSpec, Message, Parameter, Query, ToolBinding, ToolCall,
    ToolKind,
};
use crate::error::{EngineError, EngineResult};
use crate::events::{operation_data, OperationTracker, QueryScope};
use crate::store::ResourceStore;

/// Name of the built-in tool that terminates the enclosing team
pub const TERMINATE_TOOL_NAME: &str = "terminate";

/// A tool definition as exposed to the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the tool's parameters
    pub parameters: Value,
}

impl ToolDefinition {
    /// Create a new tool definition
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Settings applied to an MCP server connection, keyed by
/// `"namespace/server"` at the registry level
#[derive(Debug, Clone, Default)]
pub struct McpSettings {
    pub headers: HashMap<String, String>,
}

/// Executes one tool with already-merged arguments
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, scope: &QueryScope, arguments: Value) -> EngineResult<String>;
}

/// The outcome of a tool invocation
///
/// The tool message is always present so the caller can append it to
/// the transcript before propagating any error; subsequent completions
/// then see a well-formed conversation.
#[derive(Debug)]
pub struct ToolOutcome {
    pub message: Message,
    pub error: Option<EngineError>,
}

struct RegisteredTool {
    definition: ToolDefinition,
    invoker: Arc<dyn ToolInvoker>,
    /// Pre-filled arguments of a partial facade; these win over
    /// model-supplied values on key collision
    prefill: Option<Map<String, Value>>,
}

/// Per-agent collection of invokable tools
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    tracker: OperationTracker,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new(tracker: OperationTracker) -> Self {
        Self {
            tools: Vec::new(),
            tracker,
        }
    }

    /// Definitions of all registered tools, in registration order
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition.clone()).collect()
    }

    /// Whether no tools are registered
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    fn find(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.iter().find(|t| t.definition.name == name)
    }

    /// Register a tool, enforcing per-agent name uniqueness
    ///
    /// Partial facades shadow an existing tool of the same name; any
    /// other collision is a configuration error.
    fn register(&mut self, tool: RegisteredTool) -> EngineResult<()> {
        if let Some(existing) = self
            .tools
            .iter_mut()
            .find(|t| t.definition.name == tool.definition.name)
        {
            if tool.prefill.is_some() {
                *existing = tool;
                return Ok(());
            }
            return Err(EngineError::Validation(format!(
                "duplicate tool name: {}",
                tool.definition.name
            )));
        }
        self.tools.push(tool);
        Ok(())
    }

    /// Invoke the named tool for a model-issued call
    ///
    /// The returned outcome always carries a tool message answering
    /// `call.id`; on failure the message content is the stringified
    /// error and the error rides alongside for the caller to propagate.
    pub async fn execute_tool(&self, scope: &QueryScope, call: &ToolCall) -> ToolOutcome {
        let tool_name = call.function.name.clone();
        let data = operation_data([
            ("toolName", tool_name.clone()),
            ("toolCallId", call.id.clone()),
        ]);
        let op_scope = self.tracker.start(
            scope,
            "ToolCall",
            &format!("Executing tool {}", tool_name),
            data.clone(),
        );

        let result = self.invoke(&op_scope, call).await;

        match result {
            Ok(content) => {
                self.tracker
                    .complete(&op_scope, "ToolCall", "Tool call completed", data);
                ToolOutcome {
                    message: Message::tool(content, &call.id),
                    error: None,
                }
            }
            Err(err) => {
                if !err.is_terminate() {
                    self.tracker
                        .fail(&op_scope, "ToolCall", "Tool call failed", &err, data);
                }
                ToolOutcome {
                    message: Message::tool(err.to_string(), &call.id),
                    error: Some(err),
                }
            }
        }
    }

    async fn invoke(&self, scope: &QueryScope, call: &ToolCall) -> EngineResult<String> {
        let tool = self.find(&call.function.name).ok_or_else(|| {
            EngineError::not_found("tool", call.function.name.clone())
        })?;

        let mut arguments = match call.arguments_value()? {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(EngineError::Validation(format!(
                    "tool {} arguments must be an object, got {}",
                    call.function.name, other
                )))
            }
        };

        if let Some(prefill) = &tool.prefill {
            for (k, v) in prefill {
                arguments.insert(k.clone(), v.clone());
            }
        }

        tool.invoker.invoke(scope, Value::Object(arguments)).await
    }
}

struct TerminateInvoker;

#[async_trait]
impl ToolInvoker for TerminateInvoker {
    async fn invoke(&self, _scope: &QueryScope, _arguments: Value) -> EngineResult<String> {
        Err(EngineError::Terminate)
    }
}

fn terminate_tool() -> RegisteredTool {
    RegisteredTool {
        definition: ToolDefinition::new(
            TERMINATE_TOOL_NAME,
            "Terminate the conversation when the objective has been met",
            default_parameters_schema(),
        ),
        invoker: Arc::new(TerminateInvoker),
        prefill: None,
    }
}

fn invoker_for_kind(kind: &ToolKind) -> Arc<dyn ToolInvoker> {
    match kind {
        ToolKind::Http {
            address,
            method,
            headers,
        } => Arc::new(http::HttpToolInvoker::new(
            address.clone(),
            method.clone(),
            headers.clone(),
        )),
        ToolKind::Terminate => Arc::new(TerminateInvoker),
    }
}

fn prefill_map(parameters: &[Parameter]) -> Map<String, Value> {
    parameters
        .iter()
        .map(|p| (p.name.clone(), Value::String(p.value.clone())))
        .collect()
}

/// Build a registry exposing a single Tool resource, used when a query
/// targets a tool directly
pub fn registry_for_tool(tracker: &OperationTracker, spec: &crate::domain::ToolSpec) -> ToolRegistry {
    let mut registry = ToolRegistry::new(tracker.clone());
    registry.tools.push(RegisteredTool {
        definition: ToolDefinition::new(&spec.name, &spec.description, spec.parameters.clone()),
        invoker: invoker_for_kind(&spec.kind),
        prefill: None,
    });
    registry
}

/// Build the tool registry for one agent from its bindings
pub async fn build_registry(
    store: &Arc<dyn ResourceStore>,
    tracker: &OperationTracker,
    spec: &AgentSpec,
    mcp_settings: &HashMap<String, McpSettings>,
    query: &Query,
) -> EngineResult<ToolRegistry> {
    let mut registry = ToolRegistry::new(tracker.clone());

    for binding in &spec.tools {
        match binding {
            ToolBinding::Builtin { name } => {
                if name != TERMINATE_TOOL_NAME {
                    return Err(EngineError::Validation(format!(
                        "unknown builtin tool: {}",
                        name
                    )));
                }
                registry.register(terminate_tool())?;
            }
            ToolBinding::Custom { name } => {
                let tool = store.get_tool(name, &spec.namespace).await?;
                registry.register(RegisteredTool {
                    definition: ToolDefinition::new(
                        &tool.name,
                        &tool.description,
                        tool.parameters.clone(),
                    ),
                    invoker: invoker_for_kind(&tool.kind),
                    prefill: None,
                })?;
            }
            ToolBinding::Mcp { server, tool } => {
                let server_spec = store.get_mcp_server(server, &spec.namespace).await?;
                let address = server_spec
                    .status
                    .last_resolved_address
                    .clone()
                    .filter(|a| !a.is_empty())
                    .ok_or_else(|| EngineError::unresolved("mcp server", server.clone()))?;

                let settings_key = format!("{}/{}", spec.namespace, server);
                let headers = mcp_settings
                    .get(&settings_key)
                    .map(|s| s.headers.clone())
                    .unwrap_or_default();

                let client = Arc::new(McpClient::new(address, headers));
                let listed = client.list_tools().await?;

                for mcp_tool in listed {
                    if let Some(wanted) = tool {
                        if &mcp_tool.name != wanted {
                            continue;
                        }
                    }
                    registry.register(RegisteredTool {
                        definition: ToolDefinition::new(
                            &mcp_tool.name,
                            mcp_tool.description.clone().unwrap_or_default(),
                            mcp_tool
                                .input_schema
                                .clone()
                                .unwrap_or_else(default_parameters_schema),
                        ),
                        invoker: Arc::new(mcp::McpToolInvoker::new(
                            client.clone(),
                            mcp_tool.name.clone(),
                        )),
                        prefill: None,
                    })?;
                }
            }
            ToolBinding::Agent { name } => {
                let agent =
                    crate::agent::resolve_agent(store, tracker, name, &spec.namespace, query, mcp_settings)
                        .await?;
                registry.register(agent_tool::registered_agent_tool(agent))?;
            }
            ToolBinding::Partial {
                name,
                tool,
                parameters,
            } => {
                let underlying = store.get_tool(tool, &spec.namespace).await?;
                registry.register(RegisteredTool {
                    definition: ToolDefinition::new(
                        name,
                        &underlying.description,
                        underlying.parameters.clone(),
                    ),
                    invoker: invoker_for_kind(&underlying.kind),
                    prefill: Some(prefill_map(parameters)),
                })?;
            }
        }
    }

    Ok(registry)
}
