//! Per-query execution scope
//!
//! The scope is the explicit bag of values that follows a query through
//! every component: identity, the shared token accumulator, operation
//! metadata for event payloads, streaming metadata, and the
//! cancellation token. Cloning a scope shares the accumulator; forking
//! a token collection creates a fresh one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::domain::TokenUsage;
use crate::error::{EngineError, EngineResult};

/// Identity of the query being executed
#[derive(Debug, Clone)]
pub struct QueryDetails {
    pub query_id: String,
    pub query_name: String,
    pub namespace: String,
    pub session_id: String,
}

/// Context threaded through every execution step of one query
#[derive(Clone, Default)]
pub struct QueryScope {
    query: Option<Arc<QueryDetails>>,
    tokens: Option<Arc<Mutex<TokenUsage>>>,
    operation_data: Arc<HashMap<String, String>>,
    operation_start: Option<Instant>,
    metadata: Arc<HashMap<String, Value>>,
    cancel: CancellationToken,
}

impl QueryScope {
    /// Create an empty scope with its own cancellation token
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach query identity
    pub fn with_query(mut self, details: QueryDetails) -> Self {
        self.query = Some(Arc::new(details));
        self
    }

    /// Attach a cancellation token owned by the caller
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Query identity, if this scope belongs to a query
    pub fn query_details(&self) -> Option<&QueryDetails> {
        self.query.as_deref()
    }

    /// Session id, empty when no query is attached
    pub fn session_id(&self) -> &str {
        self.query.as_deref().map(|q| q.session_id.as_str()).unwrap_or("")
    }

    /// The cancellation token governing this execution
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Return `Cancelled` if the scope's token has been triggered
    pub fn check_cancelled(&self) -> EngineResult<()> {
        if self.cancel.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Begin collecting token usage in a fresh accumulator
    ///
    /// The returned scope (and all scopes derived from it) add into the
    /// new accumulator; the parent's accumulator is untouched.
    pub fn fork_token_collection(&self) -> Self {
        let mut scope = self.clone();
        scope.tokens = Some(Arc::new(Mutex::new(TokenUsage::default())));
        scope
    }

    /// Add a usage record into the active accumulator, if any
    pub fn add_usage(&self, usage: &TokenUsage) {
        if let Some(tokens) = &self.tokens {
            tokens.lock().expect("token accumulator poisoned").add(usage);
        }
    }

    /// Snapshot of the active accumulator
    pub fn token_summary(&self) -> TokenUsage {
        self.tokens
            .as_ref()
            .map(|t| *t.lock().expect("token accumulator poisoned"))
            .unwrap_or_default()
    }

    /// Derive a scope carrying operation metadata and a start instant
    pub(crate) fn with_operation(
        &self,
        data: HashMap<String, String>,
        start: Instant,
    ) -> Self {
        let mut scope = self.clone();
        scope.operation_data = Arc::new(data);
        scope.operation_start = Some(start);
        scope
    }

    /// Metadata of the nearest enclosing operation
    pub(crate) fn operation_data(&self) -> &HashMap<String, String> {
        &self.operation_data
    }

    /// Start instant of the nearest enclosing operation
    pub(crate) fn operation_start(&self) -> Option<Instant> {
        self.operation_start
    }

    /// Derive a scope with execution metadata merged in (team/agent
    /// names surfaced to streaming consumers)
    pub fn with_metadata(&self, entries: HashMap<String, Value>) -> Self {
        let mut merged = (*self.metadata).clone();
        merged.extend(entries);
        let mut scope = self.clone();
        scope.metadata = Arc::new(merged);
        scope
    }

    /// Execution metadata visible to streaming consumers
    pub fn metadata(&self) -> &HashMap<String, Value> {
        &self.metadata
    }
}
