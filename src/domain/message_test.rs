use serde_json::json;

use super::{Message, TokenUsage, ToolCall};

#[test]
fn test_wire_shapes() {
    let system = Message::system("be brief");
    assert_eq!(system.to_wire(), json!({ "role": "system", "content": "be brief" }));

    let user = Message::user("hello");
    assert_eq!(user.to_wire(), json!({ "role": "user", "content": "hello" }));

    let tool = Message::tool("42", "call_1");
    assert_eq!(
        tool.to_wire(),
        json!({ "role": "tool", "content": "42", "tool_call_id": "call_1" })
    );
}

#[test]
fn test_assistant_wire_with_tool_calls() {
    let message = Message::assistant_named(
        "solver",
        None,
        Some(vec![ToolCall::new("t1", "add", r#"{"a":1,"b":2}"#)]),
    );

    let wire = message.to_wire();
    assert_eq!(wire["role"], "assistant");
    assert_eq!(wire["name"], "solver");
    assert_eq!(wire["tool_calls"][0]["id"], "t1");
    assert_eq!(wire["tool_calls"][0]["type"], "function");
    assert_eq!(wire["tool_calls"][0]["function"]["name"], "add");
}

#[test]
fn test_import_is_inverse_of_export() {
    let messages = vec![
        Message::system("sys"),
        Message::user("hi"),
        Message::assistant("hello"),
        Message::assistant_named("a", Some("named".to_string()), None),
    ];

    for message in messages {
        let round_tripped = Message::from_wire(&message.to_wire()).unwrap();
        assert_eq!(round_tripped, message);
    }
}

#[test]
fn test_import_permissive_fallback() {
    // Simple role/content shape without the discriminated extras.
    let imported = Message::from_wire(&json!({ "role": "user", "content": "hi" })).unwrap();
    assert_eq!(imported, Message::user("hi"));

    // Unknown roles coerce to user.
    let imported = Message::from_wire(&json!({ "role": "narrator", "content": "x" })).unwrap();
    assert_eq!(imported, Message::user("x"));

    // A user message with no content parses as empty.
    let imported = Message::from_wire(&json!({ "role": "user" })).unwrap();
    assert_eq!(imported, Message::user(""));
}

#[test]
fn test_import_tool_without_call_id_degrades_to_assistant() {
    let imported = Message::from_wire(&json!({ "role": "tool", "content": "result" })).unwrap();
    assert_eq!(imported, Message::assistant("result"));
}

#[test]
fn test_import_requires_role() {
    let err = Message::from_wire(&json!({ "content": "orphan" })).unwrap_err();
    assert!(err.to_string().contains("role"));
}

#[test]
fn test_tool_call_arguments_value() {
    let call = ToolCall::new("t1", "add", r#"{"a": 1}"#);
    assert_eq!(call.arguments_value().unwrap(), json!({ "a": 1 }));

    let empty = ToolCall::new("t2", "noop", "");
    assert_eq!(empty.arguments_value().unwrap(), json!({}));

    let bad = ToolCall::new("t3", "add", "{not json");
    assert!(bad.arguments_value().is_err());
}

#[test]
fn test_generated_call_ids_are_unique() {
    let a = ToolCall::generate_id();
    let b = ToolCall::generate_id();
    assert!(a.starts_with("call_"));
    assert_ne!(a, b);
}

#[test]
fn test_token_usage_is_additive() {
    let mut total = TokenUsage::default();
    assert!(total.is_zero());

    total.add(&TokenUsage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    });
    total.add(&TokenUsage {
        prompt_tokens: 1,
        completion_tokens: 2,
        total_tokens: 3,
    });

    assert_eq!(total.prompt_tokens, 11);
    assert_eq!(total.completion_tokens, 7);
    assert_eq!(total.total_tokens, 18);
}
