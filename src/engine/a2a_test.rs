use std::time::Duration;

use serde_json::json;

use super::a2a::{classify, extract_text, parse_timeout, TaskState};
use crate::error::EngineError;

#[test]
fn test_parse_timeout_suffixes() {
    assert_eq!(parse_timeout(None).unwrap(), None);
    assert_eq!(parse_timeout(Some("")).unwrap(), None);
    assert_eq!(
        parse_timeout(Some("500ms")).unwrap(),
        Some(Duration::from_millis(500))
    );
    assert_eq!(
        parse_timeout(Some("30s")).unwrap(),
        Some(Duration::from_secs(30))
    );
    assert_eq!(
        parse_timeout(Some("5m")).unwrap(),
        Some(Duration::from_secs(300))
    );
    assert_eq!(
        parse_timeout(Some("1h")).unwrap(),
        Some(Duration::from_secs(3600))
    );
}

#[test]
fn test_parse_timeout_rejects_malformed_values() {
    assert!(matches!(
        parse_timeout(Some("fast")),
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        parse_timeout(Some("10")),
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        parse_timeout(Some("10d")),
        Err(EngineError::Validation(_))
    ));
}

#[test]
fn test_task_states_terminality() {
    assert!(!TaskState::Pending.is_terminal());
    assert!(!TaskState::Assigned.is_terminal());
    assert!(!TaskState::Running.is_terminal());
    assert!(TaskState::Completed.is_terminal());
    assert!(TaskState::Failed.is_terminal());
    assert!(TaskState::Cancelled.is_terminal());
}

#[test]
fn test_task_state_aliases() {
    let state: TaskState = serde_json::from_value(json!("submitted")).unwrap();
    assert_eq!(state, TaskState::Pending);
    let state: TaskState = serde_json::from_value(json!("working")).unwrap();
    assert_eq!(state, TaskState::Running);
    let state: TaskState = serde_json::from_value(json!("canceled")).unwrap();
    assert_eq!(state, TaskState::Cancelled);
}

#[test]
fn test_extract_text_from_message_result() {
    let result = json!({
        "role": "agent",
        "parts": [{ "kind": "text", "text": "hello" }, { "kind": "text", "text": "world" }],
    });
    assert_eq!(extract_text(&result).unwrap(), "hello\nworld");
}

#[test]
fn test_extract_text_from_task_status() {
    let result = json!({
        "id": "task-1",
        "status": {
            "state": "completed",
            "message": { "parts": [{ "kind": "text", "text": "done" }] },
        },
    });
    assert_eq!(extract_text(&result).unwrap(), "done");
}

#[test]
fn test_extract_text_from_artifacts() {
    let result = json!({
        "id": "task-2",
        "status": { "state": "completed" },
        "artifacts": [{ "parts": [{ "kind": "text", "text": "artifact text" }] }],
    });
    assert_eq!(extract_text(&result).unwrap(), "artifact text");
}

#[test]
fn test_extract_text_missing() {
    assert!(extract_text(&json!({ "id": "task-3" })).is_none());
}

#[test]
fn test_failure_classification() {
    assert_eq!(
        classify(&EngineError::Transport("refused".to_string())),
        "connection"
    );
    assert_eq!(
        classify(&EngineError::ProtocolParse("bad json".to_string())),
        "parse"
    );
    assert_eq!(
        classify(&EngineError::Validation(
            "failed to resolve a2a header auth".to_string()
        )),
        "header-resolution"
    );
    assert_eq!(
        classify(&EngineError::Dependency("rpc error".to_string())),
        "message"
    );
}
