//! HTTP-backed conversation memory

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Memory;
use crate::domain::Message;
use crate::error::{EngineError, EngineResult};
use crate::events::{operation_data, OperationTracker, QueryScope};
use crate::store::ResourceStore;

const MEMORY_TIMEOUT: Duration = Duration::from_secs(30);

const MESSAGES_ENDPOINT: &str = "/messages";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    session_id: &'a str,
    query_id: &'a str,
    messages: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    messages: Vec<MessageRecord>,
}

#[derive(Debug, Deserialize)]
struct MessageRecord {
    message: Value,
}

/// Memory client talking to an HTTP backend
///
/// The backend address is re-resolved from the Memory resource before
/// each call; a changed address is written back through the store so
/// the control plane observes it.
pub struct HttpMemory {
    store: Arc<dyn ResourceStore>,
    http: reqwest::Client,
    base_url: Mutex<String>,
    session_id: String,
    name: String,
    namespace: String,
    tracker: OperationTracker,
}

impl HttpMemory {
    /// Create a memory client for the named Memory resource
    ///
    /// Fails when the resource has no resolved address yet. An empty
    /// session id defaults to the query scope's session at call time.
    pub async fn new(
        store: Arc<dyn ResourceStore>,
        tracker: OperationTracker,
        name: &str,
        namespace: &str,
        session_id: impl Into<String>,
    ) -> EngineResult<Self> {
        let memory = store.get_memory(name, namespace).await?;

        let base_url = memory
            .status
            .last_resolved_address
            .clone()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| EngineError::unresolved("memory", name.to_string()))?;

        let http = reqwest::Client::builder()
            .timeout(MEMORY_TIMEOUT)
            .build()
            .unwrap_or_default();

        Ok(Self {
            store,
            http,
            base_url: Mutex::new(base_url.trim_end_matches('/').to_string()),
            session_id: session_id.into(),
            name: name.to_string(),
            namespace: namespace.to_string(),
            tracker,
        })
    }

    fn base_url(&self) -> String {
        self.base_url.lock().expect("memory address poisoned").clone()
    }

    /// Re-resolve the backend address, updating the persisted status
    /// when it changed
    async fn resolve_address(&self) -> EngineResult<()> {
        let memory = self.store.get_memory(&self.name, &self.namespace).await?;

        let resolved = self
            .store
            .resolve_value_source(&memory.address, &self.namespace)
            .await
            .map_err(|e| {
                EngineError::Dependency(format!("failed to resolve memory address: {}", e))
            })?;

        let trimmed = resolved.trim_end_matches('/').to_string();
        let changed = {
            let mut current = self.base_url.lock().expect("memory address poisoned");
            let changed = *current != trimmed;
            *current = trimmed.clone();
            changed
        };

        if changed {
            if let Err(err) = self
                .store
                .update_memory_address(&self.name, &self.namespace, &resolved)
                .await
            {
                tracing::warn!(
                    memory = %self.name,
                    namespace = %self.namespace,
                    error = %err,
                    "failed to update memory status with new address"
                );
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Memory for HttpMemory {
    async fn add_messages(
        &self,
        scope: &QueryScope,
        query_id: &str,
        messages: &[Message],
    ) -> EngineResult<()> {
        if messages.is_empty() {
            return Ok(());
        }

        let data = operation_data([("messages", messages.len().to_string())]);
        let op_scope =
            self.tracker
                .start(scope, "MemoryAddMessages", "Adding messages to memory", data.clone());

        let result = self.add_messages_inner(scope, query_id, messages).await;
        match result {
            Ok(()) => {
                self.tracker.complete(
                    &op_scope,
                    "MemoryAddMessages",
                    "Memory add messages completed successfully",
                    data,
                );
                Ok(())
            }
            Err(err) => {
                self.tracker.fail(
                    &op_scope,
                    "MemoryAddMessages",
                    &format!("Memory add messages failed: {}", err),
                    &err,
                    data,
                );
                Err(err)
            }
        }
    }

    async fn get_messages(&self, scope: &QueryScope) -> EngineResult<Vec<Message>> {
        let op_scope = self.tracker.start(
            scope,
            "MemoryGetMessages",
            "Getting messages from memory",
            Default::default(),
        );

        let result = self.get_messages_inner(scope).await;
        match result {
            Ok(messages) => {
                let data = operation_data([("messages", messages.len().to_string())]);
                self.tracker.complete(
                    &op_scope,
                    "MemoryGetMessages",
                    "Memory get messages completed successfully",
                    data,
                );
                Ok(messages)
            }
            Err(err) => {
                self.tracker.fail(
                    &op_scope,
                    "MemoryGetMessages",
                    &format!("Memory get messages failed: {}", err),
                    &err,
                    Default::default(),
                );
                Err(err)
            }
        }
    }
}

impl HttpMemory {
    fn session_id<'a>(&'a self, scope: &'a QueryScope) -> &'a str {
        if self.session_id.is_empty() {
            scope.session_id()
        } else {
            &self.session_id
        }
    }

    async fn add_messages_inner(
        &self,
        scope: &QueryScope,
        query_id: &str,
        messages: &[Message],
    ) -> EngineResult<()> {
        self.resolve_address().await?;

        let request = MessagesRequest {
            session_id: self.session_id(scope),
            query_id,
            messages: messages.iter().map(Message::to_wire).collect(),
        };

        let response = self
            .http
            .post(format!("{}{}", self.base_url(), MESSAGES_ENDPOINT))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Dependency(format!(
                "memory backend returned status {}",
                status.as_u16()
            )));
        }

        Ok(())
    }

    async fn get_messages_inner(&self, scope: &QueryScope) -> EngineResult<Vec<Message>> {
        self.resolve_address().await?;

        let response = self
            .http
            .get(format!("{}{}", self.base_url(), MESSAGES_ENDPOINT))
            .query(&[("session_id", self.session_id(scope))])
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Dependency(format!(
                "memory backend returned status {}",
                status.as_u16()
            )));
        }

        let body: MessagesResponse = response.json().await.map_err(|e| {
            EngineError::ProtocolParse(format!("malformed memory response: {}", e))
        })?;

        let mut messages = Vec::with_capacity(body.messages.len());
        for (index, record) in body.messages.iter().enumerate() {
            let message = Message::from_wire(&record.message).map_err(|e| {
                EngineError::ProtocolParse(format!(
                    "failed to parse message at index {}: {}",
                    index, e
                ))
            })?;
            messages.push(message);
        }

        Ok(messages)
    }
}
