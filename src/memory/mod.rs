//! Conversation memory
//!
//! An optional external store for conversation history, keyed by
//! session id. The engine never persists transcripts itself; the query
//! driver is the only writer.

mod http;

pub use http::HttpMemory;

use async_trait::async_trait;

use crate::domain::Message;
use crate::error::EngineResult;
use crate::events::QueryScope;

/// External conversation store
///
/// Not re-entrant against a single session from concurrent calls; the
/// caller serialises per session.
#[async_trait]
pub trait Memory: Send + Sync {
    /// Append messages to the session under the given query id
    async fn add_messages(
        &self,
        scope: &QueryScope,
        query_id: &str,
        messages: &[Message],
    ) -> EngineResult<()>;

    /// Load all messages recorded for the session
    async fn get_messages(&self, scope: &QueryScope) -> EngineResult<Vec<Message>>;
}
