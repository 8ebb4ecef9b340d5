//! Shared fixtures for end-to-end tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use troupe::domain::{
    AgentSpec, Message, ModelSpec, Query, QueryTarget, TargetKind, ToolBinding, ValueSource,
};
use troupe::store::InMemoryResourceStore;

pub const NAMESPACE: &str = "default";

/// A query with a single target
pub fn query(kind: TargetKind, target: &str) -> Query {
    Query {
        name: "test-query".to_string(),
        namespace: NAMESPACE.to_string(),
        uid: "query-uid-1".to_string(),
        input: "ping".to_string(),
        targets: vec![QueryTarget::new(kind, target)],
        session_id: None,
        parameters: Vec::new(),
        overrides: Vec::new(),
        memory: None,
    }
}

/// A minimal agent bound to the named model
pub fn agent_spec(name: &str, model: &str) -> AgentSpec {
    AgentSpec {
        name: name.to_string(),
        namespace: NAMESPACE.to_string(),
        prompt: "echo".to_string(),
        description: String::new(),
        parameters: Vec::new(),
        model_ref: Some(model.to_string()),
        execution_engine: None,
        tools: Vec::new(),
        output_schema: None,
        annotations: HashMap::new(),
    }
}

/// A model resource pointing at the mock provider
pub fn model_spec(name: &str, uri: &str) -> ModelSpec {
    ModelSpec {
        name: name.to_string(),
        namespace: NAMESPACE.to_string(),
        model: name.to_string(),
        address: ValueSource::Value(uri.to_string()),
        api_key: None,
        headers: HashMap::new(),
    }
}

/// Register an agent plus its model against the mock provider
pub async fn register_agent(
    store: &Arc<InMemoryResourceStore>,
    provider: &MockServer,
    agent: &str,
    tools: Vec<ToolBinding>,
) {
    let model = format!("model-{}", agent);
    store.insert_model(model_spec(&model, &provider.uri())).await;
    let mut spec = agent_spec(agent, &model);
    spec.tools = tools;
    store.insert_agent(spec).await;
}

/// Provider completion body with plain content
pub fn completion(content: &str, usage: (i64, i64, i64)) -> Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "model": "mock",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop",
        }],
        "usage": {
            "prompt_tokens": usage.0,
            "completion_tokens": usage.1,
            "total_tokens": usage.2,
        },
    })
}

/// Provider completion body carrying one tool call
pub fn tool_call_completion(call_id: &str, tool: &str, arguments: &str, usage: (i64, i64, i64)) -> Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "model": "mock",
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": call_id,
                    "type": "function",
                    "function": { "name": tool, "arguments": arguments },
                }],
            },
            "finish_reason": "tool_calls",
        }],
        "usage": {
            "prompt_tokens": usage.0,
            "completion_tokens": usage.1,
            "total_tokens": usage.2,
        },
    })
}

/// Mount a one-shot completion response for the given model id
pub async fn mount_completion_once(provider: &MockServer, model: &str, body: Value) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({ "model": format!("model-{}", model) })))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .up_to_n_times(1)
        .mount(provider)
        .await;
}

/// Mount a standing completion response for the given model id
pub async fn mount_completion(provider: &MockServer, model: &str, body: Value) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({ "model": format!("model-{}", model) })))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(provider)
        .await;
}

/// Names of the assistant messages in a transcript, in order
pub fn assistant_names(messages: &[Message]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|m| match m {
            Message::Assistant { name, .. } => Some(name.clone().unwrap_or_default()),
            _ => None,
        })
        .collect()
}
