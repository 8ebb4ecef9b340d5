//! Structured events and operation tracking
//!
//! Every non-trivial operation is bracketed as `Start -> (Complete |
//! Fail)`. Events carry a string-map payload with the query identity,
//! a timestamp, and a duration on terminal emissions. The concrete
//! sink (control-plane recorder, log forwarder) is behind the
//! [`EventEmitter`] trait.

mod scope;

pub use scope::{QueryDetails, QueryScope};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::domain::Query;
use crate::error::EngineError;

/// Severity of an emitted event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Normal,
    Warning,
}

/// A structured event describing one operation transition
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    /// Reason string, always `<Op>Start`, `<Op>Complete` or `<Op>Error`
    pub reason: String,
    pub message: String,
    /// JSON-encodable data payload
    pub annotations: HashMap<String, String>,
}

/// Sink for structured events
pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: Event);
}

/// Emitter that discards all events
#[derive(Debug, Default)]
pub struct NoopEmitter;

impl EventEmitter for NoopEmitter {
    fn emit(&self, _event: Event) {}
}

/// Emitter that records events in memory, for tests and diagnostics
#[derive(Debug, Default)]
pub struct MemoryEmitter {
    events: Mutex<Vec<Event>>,
}

impl MemoryEmitter {
    /// Create a new empty emitter
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events emitted so far
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().expect("emitter lock poisoned").clone()
    }
}

impl EventEmitter for MemoryEmitter {
    fn emit(&self, event: Event) {
        self.events.lock().expect("emitter lock poisoned").push(event);
    }
}

/// Wraps operations in start/complete/fail events with duration and
/// query-identity bookkeeping
#[derive(Clone)]
pub struct OperationTracker {
    emitter: Arc<dyn EventEmitter>,
}

impl OperationTracker {
    /// Create a tracker emitting to the given sink
    pub fn new(emitter: Arc<dyn EventEmitter>) -> Self {
        Self { emitter }
    }

    /// Build the scope for a query: identity attached, session id
    /// defaulting to the query uid
    pub fn initialize_query_scope(&self, query: &Query) -> QueryScope {
        let session_id = query
            .session_id
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| query.uid.clone());

        QueryScope::new().with_query(QueryDetails {
            query_id: query.uid.clone(),
            query_name: query.name.clone(),
            namespace: query.namespace.clone(),
            session_id,
        })
    }

    fn build_data(
        &self,
        scope: &QueryScope,
        additional: &HashMap<String, String>,
    ) -> Option<HashMap<String, String>> {
        let details = scope.query_details()?;

        let mut data = HashMap::new();
        data.insert("queryId".to_string(), details.query_id.clone());
        data.insert("queryName".to_string(), details.query_name.clone());
        data.insert("queryNamespace".to_string(), details.namespace.clone());
        data.insert("sessionId".to_string(), details.session_id.clone());

        for (k, v) in scope.operation_data() {
            data.insert(k.clone(), v.clone());
        }
        for (k, v) in additional {
            data.insert(k.clone(), v.clone());
        }
        Some(data)
    }

    fn stamp(data: &mut HashMap<String, String>, message: &str) -> String {
        let timestamp = chrono::Utc::now().to_rfc3339();
        data.insert("message".to_string(), message.to_string());
        data.insert("timestamp".to_string(), timestamp.clone());
        format!("{} (timestamp: {})", message, timestamp)
    }

    fn add_duration(scope: &QueryScope, data: &mut HashMap<String, String>) {
        if let Some(start) = scope.operation_start() {
            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
            data.insert("durationMs".to_string(), format!("{:.2}", elapsed_ms));
        }
    }

    /// Begin an operation: stamps the start instant into the returned
    /// scope and emits `<Op>Start`
    pub fn start(
        &self,
        scope: &QueryScope,
        operation: &str,
        message: &str,
        data: HashMap<String, String>,
    ) -> QueryScope {
        let scope = scope.with_operation(data, Instant::now());

        let Some(mut payload) = self.build_data(&scope, &HashMap::new()) else {
            // No query identity: the scope is still usable for nesting,
            // but nothing is emitted.
            return scope;
        };
        let message = Self::stamp(&mut payload, message);

        self.emitter.emit(Event {
            kind: EventKind::Normal,
            reason: format!("{}Start", operation),
            message,
            annotations: payload,
        });

        scope
    }

    /// Emit `<Op>Complete` with the duration since the enclosing start
    pub fn complete(
        &self,
        scope: &QueryScope,
        operation: &str,
        message: &str,
        data: HashMap<String, String>,
    ) {
        let Some(mut payload) = self.build_data(scope, &data) else {
            return;
        };
        Self::add_duration(scope, &mut payload);
        let message = Self::stamp(&mut payload, message);

        self.emitter.emit(Event {
            kind: EventKind::Normal,
            reason: format!("{}Complete", operation),
            message,
            annotations: payload,
        });
    }

    /// Emit `<Op>Error` with the duration and the error string
    pub fn fail(
        &self,
        scope: &QueryScope,
        operation: &str,
        message: &str,
        error: &EngineError,
        mut data: HashMap<String, String>,
    ) {
        data.insert("error".to_string(), error.to_string());

        let Some(mut payload) = self.build_data(scope, &data) else {
            return;
        };
        Self::add_duration(scope, &mut payload);
        let message = Self::stamp(&mut payload, message);

        self.emitter.emit(Event {
            kind: EventKind::Warning,
            reason: format!("{}Error", operation),
            message,
            annotations: payload,
        });
    }
}

/// Convenience constructor for per-operation data payloads
pub fn operation_data<const N: usize>(pairs: [(&str, String); N]) -> HashMap<String, String> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}
