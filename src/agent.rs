//! Resolved agents and the local execution loop
//!
//! An [`Agent`] is the immutable runtime value bound from a declarative
//! agent resource for exactly one execution invocation. Execution is
//! routed by the agent's engine reference: the built-in
//! completion/tool loop, an external HTTP engine, or the A2A engine.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tera::{Context, Tera};

use crate::domain::{EngineRef, Message, Parameter, Query};
use crate::engine::a2a::A2aEngine;
use crate::engine::external::ExecutionEngineClient;
use crate::engine::EXECUTION_ENGINE_A2A;
use crate::error::{EngineError, EngineResult};
use crate::events::{operation_data, OperationTracker, QueryScope};
use crate::memory::Memory;
use crate::model::{load_model, CompletionSink, Model};
use crate::store::ResourceStore;
use crate::tools::{build_registry, McpSettings, ToolRegistry};

/// Member type string for agents in team events
pub const MEMBER_TYPE_AGENT: &str = "agent";
/// Member type string for teams in team events
pub const MEMBER_TYPE_TEAM: &str = "team";

/// Outcome of an agent or team execution
///
/// Messages gathered before a failure are preserved alongside the
/// error, so partial transcripts always reach the caller.
#[derive(Debug, Default)]
pub struct ExecutionResult {
    pub messages: Vec<Message>,
    pub error: Option<EngineError>,
}

impl ExecutionResult {
    /// A successful result
    pub fn ok(messages: Vec<Message>) -> Self {
        Self {
            messages,
            error: None,
        }
    }

    /// A failed result carrying the partial transcript
    pub fn failed(messages: Vec<Message>, error: EngineError) -> Self {
        Self {
            messages,
            error: Some(error),
        }
    }

    /// Whether execution completed without error
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// A resolved agent bound for one execution invocation
pub struct Agent {
    pub name: String,
    pub namespace: String,
    pub prompt: String,
    pub description: String,
    pub parameters: Vec<Parameter>,
    /// Query parameters; these override agent parameters on collision
    pub query_parameters: Vec<Parameter>,
    /// Resolved model; absent only for A2A agents
    pub model: Option<Model>,
    pub tools: ToolRegistry,
    pub execution_engine: Option<EngineRef>,
    pub annotations: HashMap<String, String>,
    pub output_schema: Option<Value>,
    store: Arc<dyn ResourceStore>,
    tracker: OperationTracker,
}

impl Agent {
    /// Namespace/name identity of this agent
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Resolve the prompt template with parameter substitution
    ///
    /// Precedence on name collision: invocation overrides, then query
    /// parameters, then the agent's own parameters.
    pub fn resolve_prompt(&self, overrides: &[Parameter]) -> EngineResult<String> {
        if !self.prompt.contains("{{") {
            return Ok(self.prompt.clone());
        }

        let mut context = Context::new();
        for parameter in self
            .parameters
            .iter()
            .chain(self.query_parameters.iter())
            .chain(overrides.iter())
        {
            context.insert(&parameter.name, &parameter.value);
        }

        Tera::one_off(&self.prompt, &context, false).map_err(|e| {
            EngineError::Validation(format!(
                "agent {} prompt resolution failed: {}",
                self.full_name(),
                e
            ))
        })
    }

    /// Execute the agent against the user input and history
    pub async fn execute(
        &self,
        scope: &QueryScope,
        user_input: &Message,
        history: &[Message],
        memory: Option<Arc<dyn Memory>>,
        sink: Option<Arc<dyn CompletionSink>>,
    ) -> ExecutionResult {
        self.execute_with_parameters(scope, user_input, history, memory, sink, &[])
            .await
    }

    /// Execute with additional parameter overrides (used when the agent
    /// is invoked as a tool)
    pub async fn execute_with_parameters(
        &self,
        scope: &QueryScope,
        user_input: &Message,
        history: &[Message],
        _memory: Option<Arc<dyn Memory>>,
        sink: Option<Arc<dyn CompletionSink>>,
        overrides: &[Parameter],
    ) -> ExecutionResult {
        let data = operation_data([("agent", self.full_name())]);
        let op_scope = self.tracker.start(
            scope,
            "AgentExecution",
            &format!("Executing agent {}", self.full_name()),
            data.clone(),
        );

        let mut messages = Vec::new();
        let result = self
            .route_execution(&op_scope, user_input, history, sink, overrides, &mut messages)
            .await;

        match result {
            Ok(()) => {
                self.tracker.complete(
                    &op_scope,
                    "AgentExecution",
                    "Agent execution completed successfully",
                    data,
                );
                ExecutionResult::ok(messages)
            }
            Err(err) => {
                if !err.is_terminate() {
                    self.tracker.fail(
                        &op_scope,
                        "AgentExecution",
                        &format!("Agent execution failed: {}", err),
                        &err,
                        data,
                    );
                }
                ExecutionResult::failed(messages, err)
            }
        }
    }

    async fn route_execution(
        &self,
        scope: &QueryScope,
        user_input: &Message,
        history: &[Message],
        sink: Option<Arc<dyn CompletionSink>>,
        overrides: &[Parameter],
        new_messages: &mut Vec<Message>,
    ) -> EngineResult<()> {
        match &self.execution_engine {
            None => {
                self.execute_locally(scope, user_input, history, sink, overrides, new_messages)
                    .await
            }
            Some(engine) if engine.name == EXECUTION_ENGINE_A2A => {
                let a2a = A2aEngine::new(self.store.clone(), self.tracker.clone());
                let messages = a2a
                    .execute(
                        scope,
                        &self.name,
                        &self.namespace,
                        &self.annotations,
                        user_input,
                        sink.as_deref(),
                    )
                    .await?;
                new_messages.extend(messages);
                Ok(())
            }
            Some(engine) => {
                self.execute_with_engine(scope, engine, user_input, history, overrides, new_messages)
                    .await
            }
        }
    }

    /// Run the built-in completion/tool loop
    async fn execute_locally(
        &self,
        scope: &QueryScope,
        user_input: &Message,
        history: &[Message],
        sink: Option<Arc<dyn CompletionSink>>,
        overrides: &[Parameter],
        new_messages: &mut Vec<Message>,
    ) -> EngineResult<()> {
        let model = self.model.as_ref().ok_or_else(|| {
            EngineError::Validation(format!(
                "agent {} has no model configured",
                self.full_name()
            ))
        })?;

        let tools = self.tools.definitions();
        let prompt = self.resolve_prompt(overrides)?;

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(prompt));
        messages.extend_from_slice(history);
        messages.push(user_input.clone());

        loop {
            scope.check_cancelled()?;

            let completion = model
                .chat_completion(scope, &messages, sink.as_deref(), 1, &tools)
                .await?;

            // Non-empty choices are guaranteed by the model client.
            let choice = completion.choices.into_iter().next().ok_or_else(|| {
                EngineError::Dependency("provider returned empty response".to_string())
            })?;

            let assistant = choice.message.into_assistant(&self.name);
            let tool_calls = assistant.tool_calls().to_vec();
            messages.push(assistant.clone());
            new_messages.push(assistant);

            if tool_calls.is_empty() {
                return Ok(());
            }

            for call in &tool_calls {
                scope.check_cancelled()?;

                let outcome = self.tools.execute_tool(scope, call).await;
                messages.push(outcome.message.clone());
                new_messages.push(outcome.message);

                if let Some(err) = outcome.error {
                    if !err.is_terminate() {
                        tracing::error!(
                            agent = %self.full_name(),
                            tool = %call.function.name,
                            error = %err,
                            "tool execution failed"
                        );
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Delegate execution to an external HTTP engine
    async fn execute_with_engine(
        &self,
        scope: &QueryScope,
        engine: &EngineRef,
        user_input: &Message,
        history: &[Message],
        overrides: &[Parameter],
        new_messages: &mut Vec<Message>,
    ) -> EngineResult<()> {
        let client = ExecutionEngineClient::new(self.store.clone(), self.tracker.clone());

        let mut config = crate::engine::external::build_agent_config(self)?;
        config.prompt = self.resolve_prompt(overrides)?;

        let messages = client
            .execute(
                scope,
                engine,
                config,
                user_input,
                history,
                &self.tools.definitions(),
            )
            .await?;
        new_messages.extend(messages);
        Ok(())
    }
}

/// Resolve a declarative agent into a bound [`Agent`]
///
/// A2A agents skip model resolution; all other agents load their model
/// (defaulting to the model named "default"). Non-reserved engine
/// references are validated for existence.
pub fn resolve_agent<'a>(
    store: &'a Arc<dyn ResourceStore>,
    tracker: &'a OperationTracker,
    name: &'a str,
    namespace: &'a str,
    query: &'a Query,
    mcp_settings: &'a HashMap<String, McpSettings>,
) -> BoxFuture<'a, EngineResult<Arc<Agent>>> {
    Box::pin(async move {
        let spec = store.get_agent(name, namespace).await?;

        let is_a2a = spec
            .execution_engine
            .as_ref()
            .is_some_and(|e| e.name == EXECUTION_ENGINE_A2A);

        if let Some(engine) = &spec.execution_engine {
            if !is_a2a {
                let engine_namespace = engine.namespace.as_deref().unwrap_or(namespace);
                store
                    .get_execution_engine(&engine.name, engine_namespace)
                    .await?;
            }
        }

        let model = if is_a2a {
            None
        } else {
            let mut model = load_model(
                store,
                tracker,
                spec.model_ref.as_deref(),
                namespace,
                &HashMap::new(),
            )
            .await
            .map_err(|e| {
                EngineError::Dependency(format!(
                    "failed to load model for agent {}/{}: {}",
                    namespace, name, e
                ))
            })?;
            model.output_schema = spec.output_schema.clone();
            model.schema_name = Some(format!("namespace-{}-agent-{}", namespace, name));
            Some(model)
        };

        let tools = build_registry(store, tracker, &spec, mcp_settings, query).await?;

        Ok(Arc::new(Agent {
            name: spec.name,
            namespace: spec.namespace,
            prompt: spec.prompt,
            description: spec.description,
            parameters: spec.parameters,
            query_parameters: query.parameters.clone(),
            model,
            tools,
            execution_engine: spec.execution_engine,
            annotations: spec.annotations,
            output_schema: spec.output_schema,
            store: store.clone(),
            tracker: tracker.clone(),
        }))
    })
}
