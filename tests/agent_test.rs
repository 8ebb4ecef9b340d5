//! End-to-end agent execution against mock collaborators

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::*;
use troupe::domain::{
    AddressStatus, EngineRef, EngineSpec, MemorySpec, Message, Parameter, TargetKind,
    ToolBinding, ToolSpec, ToolKind, ValueSource,
};
use troupe::events::{MemoryEmitter, NoopEmitter, OperationTracker};
use troupe::model::load_model;
use troupe::query::QueryDriver;
use troupe::store::{InMemoryResourceStore, ResourceStore};

fn driver(store: &Arc<InMemoryResourceStore>) -> QueryDriver {
    QueryDriver::new(store.clone(), Arc::new(NoopEmitter))
}

#[tokio::test]
async fn test_single_agent_no_tools() {
    let provider = MockServer::start().await;
    let store = InMemoryResourceStore::shared();
    register_agent(&store, &provider, "a", Vec::new()).await;

    mount_completion(&provider, "a", completion("hi", (3, 1, 4))).await;

    let result = driver(&store)
        .execute(&query(TargetKind::Agent, "a"), CancellationToken::new())
        .await;

    assert!(result.error.is_none(), "unexpected error: {:?}", result.error);
    assert_eq!(result.messages.len(), 1);
    assert_eq!(
        result.messages[0],
        Message::assistant_named("a", Some("hi".to_string()), None)
    );
    assert_eq!(result.responses.len(), 1);
    assert_eq!(result.responses[0].content, "hi");

    // The summary equals the model's one reported usage.
    assert_eq!(result.token_usage.prompt_tokens, 3);
    assert_eq!(result.token_usage.completion_tokens, 1);
    assert_eq!(result.token_usage.total_tokens, 4);
}

#[tokio::test]
async fn test_agent_with_one_tool_call() {
    let provider = MockServer::start().await;
    let tool_server = MockServer::start().await;
    let store = InMemoryResourceStore::shared();

    store
        .insert_tool(ToolSpec {
            name: "add".to_string(),
            namespace: NAMESPACE.to_string(),
            description: "Adds two numbers".to_string(),
            parameters: json!({
                "type": "object",
                "properties": { "a": { "type": "number" }, "b": { "type": "number" } },
            }),
            kind: ToolKind::Http {
                address: format!("{}/add", tool_server.uri()),
                method: None,
                headers: HashMap::new(),
            },
        })
        .await;
    register_agent(
        &store,
        &provider,
        "a",
        vec![ToolBinding::Custom {
            name: "add".to_string(),
        }],
    )
    .await;

    Mock::given(method("POST"))
        .and(path("/add"))
        .respond_with(ResponseTemplate::new(200).set_body_string("3"))
        .expect(1)
        .mount(&tool_server)
        .await;

    // First completion asks for the tool, the second answers.
    mount_completion_once(
        &provider,
        "a",
        tool_call_completion("t1", "add", r#"{"a":1,"b":2}"#, (5, 2, 7)),
    )
    .await;
    mount_completion(&provider, "a", completion("the answer is 3", (9, 4, 13))).await;

    let result = driver(&store)
        .execute(&query(TargetKind::Agent, "a"), CancellationToken::new())
        .await;

    assert!(result.error.is_none(), "unexpected error: {:?}", result.error);
    assert_eq!(result.messages.len(), 3);

    // Assistant with the call, the paired tool result, then the answer.
    assert_eq!(result.messages[0].role(), "assistant");
    assert_eq!(result.messages[0].tool_calls()[0].id, "t1");
    assert_eq!(
        result.messages[1],
        Message::tool("3", "t1"),
        "tool result must answer the call id in order"
    );
    assert_eq!(result.messages[2].content(), Some("the answer is 3"));

    // Token additivity across both completions.
    assert_eq!(result.token_usage.prompt_tokens, 14);
    assert_eq!(result.token_usage.completion_tokens, 6);
    assert_eq!(result.token_usage.total_tokens, 20);
}

#[tokio::test]
async fn test_partial_tool_prefill_is_authoritative() {
    let provider = MockServer::start().await;
    let tool_server = MockServer::start().await;
    let store = InMemoryResourceStore::shared();

    store
        .insert_tool(ToolSpec {
            name: "weather-api".to_string(),
            namespace: NAMESPACE.to_string(),
            description: "Fetches weather".to_string(),
            parameters: json!({
                "type": "object",
                "properties": { "city": { "type": "string" }, "units": { "type": "string" } },
            }),
            kind: ToolKind::Http {
                address: format!("{}/weather", tool_server.uri()),
                method: None,
                headers: HashMap::new(),
            },
        })
        .await;
    register_agent(
        &store,
        &provider,
        "a",
        vec![ToolBinding::Partial {
            name: "get-weather".to_string(),
            tool: "weather-api".to_string(),
            parameters: vec![Parameter::new("units", "celsius")],
        }],
    )
    .await;

    // The invoker must receive the merged arguments with the prefill
    // winning over anything the model supplied.
    Mock::given(method("POST"))
        .and(path("/weather"))
        .and(body_json(json!({ "city": "Paris", "units": "celsius" })))
        .respond_with(ResponseTemplate::new(200).set_body_string("sunny"))
        .expect(1)
        .mount(&tool_server)
        .await;

    mount_completion_once(
        &provider,
        "a",
        tool_call_completion("t1", "get-weather", r#"{"city":"Paris","units":"kelvin"}"#, (1, 1, 2)),
    )
    .await;
    mount_completion(&provider, "a", completion("sunny in Paris", (1, 1, 2))).await;

    let result = driver(&store)
        .execute(&query(TargetKind::Agent, "a"), CancellationToken::new())
        .await;

    assert!(result.error.is_none(), "unexpected error: {:?}", result.error);
    assert_eq!(result.messages[1], Message::tool("sunny", "t1"));
}

#[tokio::test]
async fn test_query_parameters_override_agent_parameters() {
    let provider = MockServer::start().await;
    let store = InMemoryResourceStore::shared();

    store
        .insert_model(model_spec("model-a", &provider.uri()))
        .await;
    let mut spec = agent_spec("a", "model-a");
    spec.prompt = "You are the {{role}}.".to_string();
    spec.parameters = vec![Parameter::new("role", "writer")];
    store.insert_agent(spec).await;

    mount_completion(&provider, "a", completion("ok", (1, 1, 2))).await;

    let mut query = query(TargetKind::Agent, "a");
    query.parameters = vec![Parameter::new("role", "editor")];

    let result = driver(&store).execute(&query, CancellationToken::new()).await;
    assert!(result.error.is_none(), "unexpected error: {:?}", result.error);

    let requests = provider.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][0]["content"], "You are the editor.");
}

#[tokio::test]
async fn test_output_schema_is_applied_with_truncated_name() {
    let provider = MockServer::start().await;
    let store = InMemoryResourceStore::shared();

    store
        .insert_model(model_spec("model-a", &provider.uri()))
        .await;
    let long_name = "a".repeat(80);
    let mut spec = agent_spec(&long_name, "model-a");
    spec.output_schema = Some(json!({ "type": "object", "properties": {} }));
    store.insert_agent(spec).await;

    mount_completion(&provider, "a", completion("{}", (1, 1, 2))).await;

    let result = driver(&store)
        .execute(&query(TargetKind::Agent, &long_name), CancellationToken::new())
        .await;
    assert!(result.error.is_none(), "unexpected error: {:?}", result.error);

    let requests = provider.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let schema_name = body["response_format"]["json_schema"]["name"].as_str().unwrap();
    assert_eq!(schema_name.len(), 64);
    assert!(schema_name.starts_with("namespace-default-agent-"));
    assert_eq!(body["response_format"]["type"], "json_schema");
}

#[tokio::test]
async fn test_external_execution_engine() {
    let engine_server = MockServer::start().await;
    let provider = MockServer::start().await;
    let store = InMemoryResourceStore::shared();

    store
        .insert_execution_engine(EngineSpec {
            name: "pyengine".to_string(),
            namespace: NAMESPACE.to_string(),
            address: ValueSource::Value(engine_server.uri()),
            status: AddressStatus {
                last_resolved_address: Some(engine_server.uri()),
                message: None,
            },
        })
        .await;
    store
        .insert_model(model_spec("model-a", &provider.uri()))
        .await;
    let mut spec = agent_spec("a", "model-a");
    spec.execution_engine = Some(EngineRef {
        name: "pyengine".to_string(),
        namespace: None,
    });
    store.insert_agent(spec).await;

    Mock::given(method("POST"))
        .and(path("/execute"))
        .and(body_partial_json(json!({
            "agent": { "name": "a", "namespace": NAMESPACE },
            "userInput": { "role": "user", "content": "ping" },
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "messages": [
                { "role": "assistant", "content": "from engine" },
                { "role": "tool", "content": "degraded" },
            ],
            "token_usage": { "prompt_tokens": 2, "completion_tokens": 3, "total_tokens": 5 },
        })))
        .expect(1)
        .mount(&engine_server)
        .await;

    let result = driver(&store)
        .execute(&query(TargetKind::Agent, "a"), CancellationToken::new())
        .await;

    assert!(result.error.is_none(), "unexpected error: {:?}", result.error);
    assert_eq!(result.messages[0], Message::assistant("from engine"));
    // Tool messages degrade to assistant on reimport: engines carry no
    // tool-call ids.
    assert_eq!(result.messages[1], Message::assistant("degraded"));
    assert_eq!(result.token_usage.total_tokens, 5);
}

#[tokio::test]
async fn test_external_engine_error_body_fails_the_query() {
    let engine_server = MockServer::start().await;
    let provider = MockServer::start().await;
    let store = InMemoryResourceStore::shared();

    store
        .insert_execution_engine(EngineSpec {
            name: "pyengine".to_string(),
            namespace: NAMESPACE.to_string(),
            address: ValueSource::Value(engine_server.uri()),
            status: AddressStatus {
                last_resolved_address: Some(engine_server.uri()),
                message: None,
            },
        })
        .await;
    store
        .insert_model(model_spec("model-a", &provider.uri()))
        .await;
    let mut spec = agent_spec("a", "model-a");
    spec.execution_engine = Some(EngineRef {
        name: "pyengine".to_string(),
        namespace: None,
    });
    store.insert_agent(spec).await;

    Mock::given(method("POST"))
        .and(path("/execute"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "messages": [],
            "error": "engine exploded",
        })))
        .mount(&engine_server)
        .await;

    let result = driver(&store)
        .execute(&query(TargetKind::Agent, "a"), CancellationToken::new())
        .await;

    let err = result.error.expect("expected failure");
    assert!(err.to_string().contains("engine exploded"));
}

#[tokio::test]
async fn test_a2a_agent_needs_no_model() {
    let a2a_server = MockServer::start().await;
    let store = InMemoryResourceStore::shared();

    store
        .insert_a2a_server(troupe::domain::A2aServerSpec {
            name: "remote".to_string(),
            namespace: NAMESPACE.to_string(),
            address: ValueSource::Value(a2a_server.uri()),
            headers: HashMap::new(),
            timeout: Some("30s".to_string()),
            status: AddressStatus::default(),
        })
        .await;

    // No model resource exists in the store: A2A agents never resolve
    // one.
    let mut spec = agent_spec("a", "unused");
    spec.model_ref = None;
    spec.execution_engine = Some(EngineRef {
        name: "a2a".to_string(),
        namespace: None,
    });
    spec.annotations = HashMap::from([
        ("a2a-server-name".to_string(), "remote".to_string()),
        ("a2a-server-address".to_string(), a2a_server.uri()),
    ]);
    store.insert_agent(spec).await;

    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "message/send" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": "1",
            "result": { "parts": [{ "kind": "text", "text": "remote says hi" }] },
        })))
        .expect(1)
        .mount(&a2a_server)
        .await;

    let result = driver(&store)
        .execute(&query(TargetKind::Agent, "a"), CancellationToken::new())
        .await;

    assert!(result.error.is_none(), "unexpected error: {:?}", result.error);
    assert_eq!(result.messages, vec![Message::assistant("remote says hi")]);

    // The submitted task carries the session id as context.
    let requests = a2a_server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["params"]["message"]["contextId"], "query-uid-1");
}

#[tokio::test]
async fn test_memory_is_loaded_and_appended_by_the_driver() {
    let provider = MockServer::start().await;
    let memory_server = MockServer::start().await;
    let store = InMemoryResourceStore::shared();

    register_agent(&store, &provider, "a", Vec::new()).await;
    store
        .insert_memory(MemorySpec {
            name: "mem".to_string(),
            namespace: NAMESPACE.to_string(),
            address: ValueSource::Value(memory_server.uri()),
            status: AddressStatus {
                last_resolved_address: Some(memory_server.uri()),
                message: None,
            },
        })
        .await;

    Mock::given(method("GET"))
        .and(path("/messages"))
        .and(query_param("session_id", "query-uid-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "messages": [{ "message": { "role": "user", "content": "earlier" } }],
        })))
        .expect(1)
        .mount(&memory_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(body_partial_json(json!({
            "session_id": "query-uid-1",
            "query_id": "query-uid-1",
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&memory_server)
        .await;

    mount_completion(&provider, "a", completion("hi again", (1, 1, 2))).await;

    let mut query = query(TargetKind::Agent, "a");
    query.memory = Some("mem".to_string());

    let result = driver(&store).execute(&query, CancellationToken::new()).await;
    assert!(result.error.is_none(), "unexpected error: {:?}", result.error);

    // The loaded history reached the model between system prompt and
    // the new user input.
    let requests = provider.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["messages"][1]["content"], "earlier");
    assert_eq!(body["messages"][2]["content"], "ping");
}

#[tokio::test]
async fn test_cancellation_preserves_empty_transcript() {
    let provider = MockServer::start().await;
    let store = InMemoryResourceStore::shared();
    register_agent(&store, &provider, "a", Vec::new()).await;
    mount_completion(&provider, "a", completion("hi", (1, 1, 2))).await;

    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = driver(&store)
        .execute(&query(TargetKind::Agent, "a"), cancel)
        .await;

    assert!(matches!(result.error, Some(troupe::EngineError::Cancelled)));
    assert!(result.responses.is_empty());
}

#[tokio::test]
async fn test_provider_rejection_is_not_retried() {
    let provider = MockServer::start().await;
    let store = InMemoryResourceStore::shared();
    register_agent(&store, &provider, "a", Vec::new()).await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .expect(1)
        .mount(&provider)
        .await;

    let result = driver(&store)
        .execute(&query(TargetKind::Agent, "a"), CancellationToken::new())
        .await;

    let err = result.error.expect("expected failure");
    assert!(err.to_string().contains("rejected"));
}

#[tokio::test]
async fn test_model_probe_reports_unavailability() {
    let provider = MockServer::start().await;
    let store = InMemoryResourceStore::shared();
    store.insert_model(model_spec("m", &provider.uri())).await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("downstream down"))
        .mount(&provider)
        .await;

    let store: Arc<dyn ResourceStore> = store;
    let tracker = OperationTracker::new(Arc::new(MemoryEmitter::new()));
    let model = load_model(&store, &tracker, Some("m"), NAMESPACE, &HashMap::new())
        .await
        .unwrap();

    let probe = model.probe(&troupe::events::QueryScope::new()).await;
    assert!(!probe.available);
    assert!(probe.detailed_error.unwrap().contains("unavailable"));
}

#[tokio::test]
async fn test_model_target_answers_directly() {
    let provider = MockServer::start().await;
    let store = InMemoryResourceStore::shared();
    store
        .insert_model(model_spec("model-direct", &provider.uri()))
        .await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("direct answer", (1, 1, 2))))
        .mount(&provider)
        .await;

    let result = driver(&store)
        .execute(&query(TargetKind::Model, "model-direct"), CancellationToken::new())
        .await;

    assert!(result.error.is_none(), "unexpected error: {:?}", result.error);
    assert_eq!(result.responses[0].content, "direct answer");
}

#[tokio::test]
async fn test_tool_target_invokes_directly() {
    let tool_server = MockServer::start().await;
    let store = InMemoryResourceStore::shared();

    store
        .insert_tool(ToolSpec {
            name: "lookup".to_string(),
            namespace: NAMESPACE.to_string(),
            description: String::new(),
            parameters: json!({ "type": "object" }),
            kind: ToolKind::Http {
                address: format!("{}/lookup", tool_server.uri()),
                method: None,
                headers: HashMap::new(),
            },
        })
        .await;

    Mock::given(method("POST"))
        .and(path("/lookup"))
        .and(body_json(json!({ "input": "ping" })))
        .respond_with(ResponseTemplate::new(200).set_body_string("found"))
        .expect(1)
        .mount(&tool_server)
        .await;

    let result = driver(&store)
        .execute(&query(TargetKind::Tool, "lookup"), CancellationToken::new())
        .await;

    assert!(result.error.is_none(), "unexpected error: {:?}", result.error);
    assert_eq!(result.responses[0].content, "found");
}

/// Sink that records every chunk it receives
struct CollectSink {
    chunks: std::sync::Mutex<Vec<troupe::model::CompletionChunk>>,
}

#[async_trait::async_trait]
impl troupe::model::CompletionSink for CollectSink {
    async fn stream_chunk(
        &self,
        _scope: &troupe::events::QueryScope,
        chunk: troupe::model::CompletionChunk,
    ) -> Result<(), troupe::EngineError> {
        self.chunks.lock().unwrap().push(chunk);
        Ok(())
    }
}

#[tokio::test]
async fn test_streaming_assembles_identical_completion() {
    let provider = MockServer::start().await;
    let store = InMemoryResourceStore::shared();
    register_agent(&store, &provider, "a", Vec::new()).await;

    let sse = concat!(
        "data: {\"id\":\"chatcmpl-s1\",\"object\":\"chat.completion.chunk\",\"model\":\"model-a\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"hi \"}}]}\n\n",
        "data: {\"id\":\"chatcmpl-s1\",\"object\":\"chat.completion.chunk\",\"model\":\"model-a\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"there\"},\"finish_reason\":\"stop\"}]}\n\n",
        "data: {\"id\":\"chatcmpl-s1\",\"object\":\"chat.completion.chunk\",\"model\":\"model-a\",\"choices\":[],\"usage\":{\"prompt_tokens\":2,\"completion_tokens\":3,\"total_tokens\":5}}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
        .mount(&provider)
        .await;

    let store_dyn: Arc<dyn ResourceStore> = store.clone();
    let tracker = OperationTracker::new(Arc::new(NoopEmitter));
    let query = query(TargetKind::Agent, "a");
    let agent = troupe::resolve_agent(
        &store_dyn,
        &tracker,
        "a",
        NAMESPACE,
        &query,
        &std::collections::HashMap::new(),
    )
    .await
    .unwrap();

    let sink = Arc::new(CollectSink {
        chunks: std::sync::Mutex::new(Vec::new()),
    });
    let scope = tracker.initialize_query_scope(&query).fork_token_collection();
    let result = agent
        .execute(
            &scope,
            &troupe::domain::Message::user("ping"),
            &[],
            None,
            Some(sink.clone()),
        )
        .await;

    assert!(result.error.is_none(), "unexpected error: {:?}", result.error);
    // The assembled completion matches non-streaming semantics.
    assert_eq!(
        result.messages[0],
        troupe::domain::Message::assistant_named("a", Some("hi there".to_string()), None)
    );
    assert_eq!(scope.token_summary().total_tokens, 5);

    // Every chunk reached the sink with the shared completion id.
    let chunks = sink.chunks.lock().unwrap();
    assert_eq!(chunks.len(), 3);
    assert!(chunks.iter().all(|c| c.id == "chatcmpl-s1"));
}

#[tokio::test]
async fn test_a2a_streaming_emits_one_terminal_chunk() {
    let a2a_server = MockServer::start().await;
    let store = InMemoryResourceStore::shared();

    store
        .insert_a2a_server(troupe::domain::A2aServerSpec {
            name: "remote".to_string(),
            namespace: NAMESPACE.to_string(),
            address: ValueSource::Value(a2a_server.uri()),
            headers: std::collections::HashMap::new(),
            timeout: None,
            status: AddressStatus::default(),
        })
        .await;
    let mut spec = agent_spec("a", "unused");
    spec.model_ref = None;
    spec.execution_engine = Some(EngineRef {
        name: "a2a".to_string(),
        namespace: None,
    });
    spec.annotations = std::collections::HashMap::from([
        ("a2a-server-name".to_string(), "remote".to_string()),
        ("a2a-server-address".to_string(), a2a_server.uri()),
    ]);
    store.insert_agent(spec).await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "jsonrpc": "2.0",
            "id": "1",
            "result": { "parts": [{ "kind": "text", "text": "remote answer" }] },
        })))
        .mount(&a2a_server)
        .await;

    let store_dyn: Arc<dyn ResourceStore> = store.clone();
    let tracker = OperationTracker::new(Arc::new(NoopEmitter));
    let query = query(TargetKind::Agent, "a");
    let agent = troupe::resolve_agent(
        &store_dyn,
        &tracker,
        "a",
        NAMESPACE,
        &query,
        &std::collections::HashMap::new(),
    )
    .await
    .unwrap();

    let sink = Arc::new(CollectSink {
        chunks: std::sync::Mutex::new(Vec::new()),
    });
    let scope = tracker.initialize_query_scope(&query);
    let result = agent
        .execute(
            &scope,
            &troupe::domain::Message::user("ping"),
            &[],
            None,
            Some(sink.clone()),
        )
        .await;

    assert!(result.error.is_none(), "unexpected error: {:?}", result.error);

    // Exactly one terminal chunk: completion id is the query id, the
    // model id uses the agent/<name> form, finish reason is stop.
    let chunks = sink.chunks.lock().unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].id, "query-uid-1");
    assert_eq!(chunks[0].model, "agent/a");
    assert_eq!(chunks[0].choices[0].finish_reason.as_deref(), Some("stop"));
    assert_eq!(
        chunks[0].choices[0].delta.content.as_deref(),
        Some("remote answer")
    );
}
