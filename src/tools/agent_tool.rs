//! Agents exposed as single-call tools

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{RegisteredTool, ToolDefinition, ToolInvoker};
use crate::agent::Agent;
use crate::domain::{Message, Parameter};
use crate::error::{EngineError, EngineResult};
use crate::events::QueryScope;

/// Build a registry entry wrapping another agent as a tool
///
/// The input schema is derived from the wrapped agent's declared
/// parameters: each becomes a string property, required when it has no
/// default value, plus the mandatory `input` message.
pub(super) fn registered_agent_tool(agent: Arc<Agent>) -> RegisteredTool {
    let description = if agent.description.is_empty() {
        format!("Delegate to agent {}", agent.name)
    } else {
        agent.description.clone()
    };

    RegisteredTool {
        definition: ToolDefinition::new(
            agent.name.clone(),
            description,
            input_schema(&agent.parameters),
        ),
        invoker: Arc::new(AgentToolInvoker { agent }),
        prefill: None,
    }
}

fn input_schema(parameters: &[Parameter]) -> Value {
    let mut properties = serde_json::Map::new();
    properties.insert(
        "input".to_string(),
        json!({ "type": "string", "description": "Input message for the agent" }),
    );
    let mut required = vec![json!("input")];

    for parameter in parameters {
        properties.insert(
            parameter.name.clone(),
            json!({ "type": "string", "description": format!("Value for the {} parameter", parameter.name) }),
        );
        if parameter.value.is_empty() {
            required.push(json!(parameter.name));
        }
    }

    json!({ "type": "object", "properties": properties, "required": required })
}

struct AgentToolInvoker {
    agent: Arc<Agent>,
}

#[async_trait]
impl ToolInvoker for AgentToolInvoker {
    async fn invoke(&self, scope: &QueryScope, arguments: Value) -> EngineResult<String> {
        let object = arguments.as_object().cloned().unwrap_or_default();

        let input = object
            .get("input")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                EngineError::Validation(format!(
                    "agent tool {} requires an 'input' argument",
                    self.agent.name
                ))
            })?;

        let overrides: Vec<Parameter> = object
            .iter()
            .filter(|(name, _)| name.as_str() != "input")
            .map(|(name, value)| {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                Parameter::new(name.clone(), value)
            })
            .collect();

        let result = self
            .agent
            .execute_with_parameters(scope, &Message::user(input), &[], None, None, &overrides)
            .await;

        if let Some(error) = result.error {
            return Err(error);
        }

        // The last assistant message is the delegated agent's answer.
        let answer = result
            .messages
            .iter()
            .rev()
            .find_map(|m| match m {
                Message::Assistant { content, .. } => content.clone(),
                _ => None,
            })
            .unwrap_or_default();

        Ok(answer)
    }
}
