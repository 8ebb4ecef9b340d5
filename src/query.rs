//! Query driver
//!
//! The entry point that binds a declarative [`Query`] to its targets,
//! sets up the per-query scope, loads and appends conversation memory,
//! executes each target, and reports the aggregate with a final token
//! summary. The driver is the only layer that writes to memory.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::agent::resolve_agent;
use crate::domain::{Message, Query, QueryTarget, TargetKind, TokenUsage, ToolCall};
use crate::error::{EngineError, EngineResult};
use crate::events::{operation_data, EventEmitter, OperationTracker, QueryScope};
use crate::memory::{HttpMemory, Memory};
use crate::model::load_model;
use crate::store::ResourceStore;
use crate::team::resolve_team;
use crate::tools::{registry_for_tool, McpSettings};

/// The response produced by one query target
#[derive(Debug, Clone)]
pub struct QueryResponse {
    pub target: QueryTarget,
    pub content: String,
}

/// Aggregate result of a query execution
///
/// The transcript and token summary are populated on both success and
/// failure paths; `error` carries the first failure, if any.
#[derive(Debug, Default)]
pub struct QueryResult {
    pub responses: Vec<QueryResponse>,
    /// New messages produced across all targets, in execution order
    pub messages: Vec<Message>,
    pub token_usage: TokenUsage,
    pub error: Option<EngineError>,
}

/// Executes queries against their resolved targets
pub struct QueryDriver {
    store: Arc<dyn ResourceStore>,
    tracker: OperationTracker,
}

impl QueryDriver {
    /// Create a driver emitting events to the given sink
    pub fn new(store: Arc<dyn ResourceStore>, emitter: Arc<dyn EventEmitter>) -> Self {
        Self {
            store,
            tracker: OperationTracker::new(emitter),
        }
    }

    /// Execute all targets of a query
    pub async fn execute(&self, query: &Query, cancel: CancellationToken) -> QueryResult {
        let scope = self
            .tracker
            .initialize_query_scope(query)
            .with_cancellation(cancel)
            .fork_token_collection();

        let mut data = operation_data([("targets", query.targets.len().to_string())]);
        let op_scope = self.tracker.start(
            &scope,
            "QueryExecution",
            &format!("Executing query {}/{}", query.namespace, query.name),
            data.clone(),
        );

        let mut result = self.run_targets(&op_scope, query).await;
        result.token_usage = op_scope.token_summary();

        let usage = result.token_usage;
        data.insert("promptTokens".to_string(), usage.prompt_tokens.to_string());
        data.insert(
            "completionTokens".to_string(),
            usage.completion_tokens.to_string(),
        );
        data.insert("totalTokens".to_string(), usage.total_tokens.to_string());

        match &result.error {
            None => self.tracker.complete(
                &op_scope,
                "QueryExecution",
                "Query execution completed successfully",
                data,
            ),
            Some(err) => self.tracker.fail(
                &op_scope,
                "QueryExecution",
                &format!("Query execution failed: {}", err),
                err,
                data,
            ),
        }

        result
    }

    async fn run_targets(&self, scope: &QueryScope, query: &Query) -> QueryResult {
        let mut result = QueryResult::default();
        let mcp_settings = mcp_settings_from_overrides(query);

        let memory = match self.load_memory(scope, query).await {
            Ok(memory) => memory,
            Err(err) => {
                result.error = Some(err);
                return result;
            }
        };

        let history = match &memory {
            Some(memory) => match memory.get_messages(scope).await {
                Ok(messages) => messages,
                Err(err) => {
                    result.error = Some(err);
                    return result;
                }
            },
            None => Vec::new(),
        };

        let user_input = Message::user(&query.input);

        for target in &query.targets {
            if let Err(err) = scope.check_cancelled() {
                result.error = Some(err);
                break;
            }

            let outcome = self
                .run_target(scope, query, target, &user_input, &history, &mcp_settings, &memory)
                .await;

            result.messages.extend(outcome.messages);
            if let Some(content) = outcome.content {
                result.responses.push(QueryResponse {
                    target: target.clone(),
                    content,
                });
            }
            if let Some(err) = outcome.error {
                result.error = Some(err);
                break;
            }
        }

        // Only the driver appends to memory; agents and teams read it
        // through the Memory interface.
        if let Some(memory) = &memory {
            let mut transcript = Vec::with_capacity(result.messages.len() + 1);
            transcript.push(user_input);
            transcript.extend(result.messages.iter().cloned());

            if let Err(err) = memory
                .add_messages(scope, &query.uid, &transcript)
                .await
            {
                tracing::warn!(error = %err, "failed to append messages to memory");
                result.error.get_or_insert(err);
            }
        }

        result
    }

    async fn load_memory(
        &self,
        scope: &QueryScope,
        query: &Query,
    ) -> EngineResult<Option<Arc<dyn Memory>>> {
        let Some(memory_name) = query.memory.as_deref().filter(|m| !m.is_empty()) else {
            return Ok(None);
        };

        let memory = HttpMemory::new(
            self.store.clone(),
            self.tracker.clone(),
            memory_name,
            &query.namespace,
            scope.session_id(),
        )
        .await?;

        Ok(Some(Arc::new(memory)))
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_target(
        &self,
        scope: &QueryScope,
        query: &Query,
        target: &QueryTarget,
        user_input: &Message,
        history: &[Message],
        mcp_settings: &HashMap<String, McpSettings>,
        memory: &Option<Arc<dyn Memory>>,
    ) -> TargetOutcome {
        match target.kind {
            TargetKind::Agent => {
                let agent = match resolve_agent(
                    &self.store,
                    &self.tracker,
                    &target.name,
                    &query.namespace,
                    query,
                    mcp_settings,
                )
                .await
                {
                    Ok(agent) => agent,
                    Err(err) => return TargetOutcome::failed(err),
                };

                let result = agent
                    .execute(scope, user_input, history, memory.clone(), None)
                    .await;
                TargetOutcome::from_execution(result.messages, result.error)
            }
            TargetKind::Team => {
                let team = match resolve_team(
                    &self.store,
                    &self.tracker,
                    &target.name,
                    &query.namespace,
                    query,
                    mcp_settings,
                )
                .await
                {
                    Ok(team) => team,
                    Err(err) => return TargetOutcome::failed(err),
                };

                let result = team
                    .execute(scope, user_input, history, memory.clone(), None)
                    .await;
                TargetOutcome::from_execution(result.messages, result.error)
            }
            TargetKind::Model => {
                let model = match load_model(
                    &self.store,
                    &self.tracker,
                    Some(&target.name),
                    &query.namespace,
                    &HashMap::new(),
                )
                .await
                {
                    Ok(model) => model,
                    Err(err) => return TargetOutcome::failed(err),
                };

                let messages = [user_input.clone()];
                match model.chat_completion(scope, &messages, None, 1, &[]).await {
                    Ok(completion) => {
                        let content = completion
                            .choices
                            .first()
                            .and_then(|c| c.message.content.clone())
                            .unwrap_or_default();
                        TargetOutcome {
                            messages: vec![Message::assistant(&content)],
                            content: Some(content),
                            error: None,
                        }
                    }
                    Err(err) => TargetOutcome::failed(err),
                }
            }
            TargetKind::Tool => {
                let spec = match self.store.get_tool(&target.name, &query.namespace).await {
                    Ok(spec) => spec,
                    Err(err) => return TargetOutcome::failed(err),
                };

                let arguments = tool_arguments(&query.input);
                let registry = registry_for_tool(&self.tracker, &spec);
                let call = ToolCall::new(ToolCall::generate_id(), &spec.name, arguments);

                let outcome = registry.execute_tool(scope, &call).await;
                let content = outcome.message.content().unwrap_or_default().to_string();
                TargetOutcome {
                    messages: vec![outcome.message],
                    content: Some(content),
                    error: outcome.error,
                }
            }
        }
    }
}

struct TargetOutcome {
    messages: Vec<Message>,
    content: Option<String>,
    error: Option<EngineError>,
}

impl TargetOutcome {
    fn failed(error: EngineError) -> Self {
        Self {
            messages: Vec::new(),
            content: None,
            error: Some(error),
        }
    }

    fn from_execution(messages: Vec<Message>, error: Option<EngineError>) -> Self {
        // The last assistant content is the target's answer; partial
        // transcripts still surface one when present.
        let content = messages.iter().rev().find_map(|m| match m {
            Message::Assistant {
                content: Some(content),
                ..
            } => Some(content.clone()),
            _ => None,
        });

        Self {
            messages,
            content,
            error,
        }
    }
}

/// Key the query's header overrides the way tool registries expect:
/// `"namespace/server"`
fn mcp_settings_from_overrides(query: &Query) -> HashMap<String, McpSettings> {
    query
        .overrides
        .iter()
        .map(|o| {
            (
                format!("{}/{}", query.namespace, o.target),
                McpSettings {
                    headers: o.headers.clone(),
                },
            )
        })
        .collect()
}

/// Interpret the query input as tool arguments: a JSON object passes
/// through, anything else wraps as `{"input": ...}`
fn tool_arguments(input: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(input) {
        Ok(value) if value.is_object() => input.to_string(),
        _ => serde_json::json!({ "input": input }).to_string(),
    }
}
