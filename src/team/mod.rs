//! Multi-agent team execution
//!
//! A [`Team`] coordinates its members under one of four strategies:
//! sequential, round-robin, selector, and graph. Members execute in
//! declaration order within a turn, every turn is bracketed by events,
//! and a terminate sentinel raised at any depth converts into a clean
//! early return with the messages gathered so far.

mod graph;
mod selector;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::json;

use crate::agent::{resolve_agent, Agent, ExecutionResult, MEMBER_TYPE_AGENT, MEMBER_TYPE_TEAM};
use crate::domain::{
    GraphSpec, MemberKind, Message, Query, SelectorSpec, Strategy, TeamMemberSpec,
};
use crate::error::{EngineError, EngineResult};
use crate::events::{operation_data, OperationTracker, QueryScope};
use crate::memory::Memory;
use crate::model::CompletionSink;
use crate::store::ResourceStore;
use crate::tools::McpSettings;

/// A member of a team: an agent or a nested team
#[derive(Clone)]
pub enum TeamMember {
    Agent(Arc<Agent>),
    Team(Arc<Team>),
}

impl TeamMember {
    /// Member name as referenced by strategies and graphs
    pub fn name(&self) -> &str {
        match self {
            TeamMember::Agent(agent) => &agent.name,
            TeamMember::Team(team) => &team.name,
        }
    }

    /// Member type string surfaced in events
    pub fn member_type(&self) -> &'static str {
        match self {
            TeamMember::Agent(_) => MEMBER_TYPE_AGENT,
            TeamMember::Team(_) => MEMBER_TYPE_TEAM,
        }
    }

    /// Description used in selector role listings
    pub fn description(&self) -> &str {
        match self {
            TeamMember::Agent(agent) => &agent.description,
            TeamMember::Team(team) => &team.description,
        }
    }

    /// Execute this member against the input and running transcript
    pub fn execute<'a>(
        &'a self,
        scope: &'a QueryScope,
        user_input: &'a Message,
        history: &'a [Message],
        memory: Option<Arc<dyn Memory>>,
        sink: Option<Arc<dyn CompletionSink>>,
    ) -> BoxFuture<'a, ExecutionResult> {
        match self {
            TeamMember::Agent(agent) => {
                Box::pin(agent.execute(scope, user_input, history, memory, sink))
            }
            TeamMember::Team(team) => {
                Box::pin(team.execute(scope, user_input, history, memory, sink))
            }
        }
    }
}

/// A resolved team bound for one execution invocation
pub struct Team {
    pub name: String,
    pub namespace: String,
    pub description: String,
    pub members: Vec<TeamMember>,
    pub strategy: Strategy,
    /// Turn cap; round-robin without it runs until cancelled
    pub max_turns: Option<u32>,
    pub selector: Option<SelectorSpec>,
    pub graph: Option<GraphSpec>,
    pub(crate) store: Arc<dyn ResourceStore>,
    pub(crate) tracker: OperationTracker,
    pub(crate) query: Query,
    pub(crate) mcp_settings: HashMap<String, McpSettings>,
}

impl Team {
    /// Namespace/name identity of this team
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Execute the team under its strategy
    pub async fn execute(
        &self,
        scope: &QueryScope,
        user_input: &Message,
        history: &[Message],
        memory: Option<Arc<dyn Memory>>,
        sink: Option<Arc<dyn CompletionSink>>,
    ) -> ExecutionResult {
        if self.members.is_empty() {
            return ExecutionResult::failed(
                Vec::new(),
                EngineError::Validation(format!(
                    "team {} has no members configured",
                    self.full_name()
                )),
            );
        }

        // Token usage for this run accumulates separately and folds
        // into the parent scope at the end.
        let team_scope = scope.fork_token_collection();

        let mut data = operation_data([
            ("teamName", self.name.clone()),
            ("strategy", self.strategy.to_string()),
            ("memberCount", self.members.len().to_string()),
        ]);
        let op_scope = self.tracker.start(
            &team_scope,
            "TeamExecution",
            &format!("Executing team {}", self.full_name()),
            data.clone(),
        );

        let mut messages = history.to_vec();
        let mut new_messages = Vec::new();

        let result = match self.strategy {
            Strategy::Sequential => {
                self.execute_sequential(
                    &op_scope,
                    user_input,
                    &mut messages,
                    &mut new_messages,
                    memory,
                    sink,
                )
                .await
            }
            Strategy::RoundRobin => {
                self.execute_round_robin(
                    &op_scope,
                    user_input,
                    &mut messages,
                    &mut new_messages,
                    memory,
                    sink,
                )
                .await
            }
            Strategy::Graph => {
                self.execute_graph(
                    &op_scope,
                    user_input,
                    &mut messages,
                    &mut new_messages,
                    memory,
                    sink,
                )
                .await
            }
            Strategy::Selector => {
                self.execute_selector(
                    &op_scope,
                    user_input,
                    &mut messages,
                    &mut new_messages,
                    memory,
                    sink,
                )
                .await
            }
        };

        match result {
            Ok(()) => {
                let usage = op_scope.token_summary();
                data.insert("promptTokens".to_string(), usage.prompt_tokens.to_string());
                data.insert(
                    "completionTokens".to_string(),
                    usage.completion_tokens.to_string(),
                );
                data.insert("totalTokens".to_string(), usage.total_tokens.to_string());
                self.tracker.complete(
                    &op_scope,
                    "TeamExecution",
                    "Team execution completed successfully",
                    data,
                );
                scope.add_usage(&usage);
                ExecutionResult::ok(new_messages)
            }
            Err(err) => {
                self.tracker.fail(
                    &op_scope,
                    "TeamExecution",
                    &format!("Team execution failed: {}", err),
                    &err,
                    data,
                );
                ExecutionResult::failed(new_messages, err)
            }
        }
    }

    /// Whether a turn error ends the team cleanly
    ///
    /// Terminate converts to a clean early return; everything else
    /// propagates.
    fn absorb_terminate(err: EngineError) -> EngineResult<()> {
        if err.is_terminate() {
            Ok(())
        } else {
            Err(err)
        }
    }

    /// Run one bracketed team turn for a member
    #[allow(clippy::too_many_arguments)]
    pub(super) async fn execute_turn(
        &self,
        scope: &QueryScope,
        member: &TeamMember,
        turn: u32,
        user_input: &Message,
        messages: &mut Vec<Message>,
        new_messages: &mut Vec<Message>,
        memory: Option<Arc<dyn Memory>>,
        sink: Option<Arc<dyn CompletionSink>>,
    ) -> EngineResult<()> {
        let turn_data = operation_data([
            ("teamName", self.name.clone()),
            ("strategy", self.strategy.to_string()),
            ("turn", turn.to_string()),
        ]);
        let turn_scope = self.tracker.start(
            scope,
            "TeamTurn",
            &format!("Executing turn {} for team {}", turn, self.name),
            turn_data.clone(),
        );

        let result = self
            .execute_member(&turn_scope, member, turn, user_input, messages, new_messages, memory, sink)
            .await;

        match result {
            Ok(()) => {
                self.tracker.complete(
                    &turn_scope,
                    "TeamTurn",
                    &format!("Team turn {} completed successfully", turn),
                    turn_data,
                );
                Ok(())
            }
            Err(err) => {
                self.tracker.fail(
                    &turn_scope,
                    "TeamTurn",
                    &format!("Team turn failed: {}", err),
                    &err,
                    turn_data,
                );
                Err(err)
            }
        }
    }

    /// Execute a member and accumulate its output into the running and
    /// new message lists, even when it failed partway
    #[allow(clippy::too_many_arguments)]
    async fn execute_member(
        &self,
        scope: &QueryScope,
        member: &TeamMember,
        turn: u32,
        user_input: &Message,
        messages: &mut Vec<Message>,
        new_messages: &mut Vec<Message>,
        memory: Option<Arc<dyn Memory>>,
        sink: Option<Arc<dyn CompletionSink>>,
    ) -> EngineResult<()> {
        let member_scope = scope.with_metadata(HashMap::from([
            ("team".to_string(), json!(self.name)),
            ("agent".to_string(), json!(member.name())),
        ]));

        let data = operation_data([
            ("memberType", member.member_type().to_string()),
            ("memberName", member.name().to_string()),
            ("strategy", self.strategy.to_string()),
            ("teamName", self.name.clone()),
            ("turn", turn.to_string()),
        ]);
        let member_scope = self.tracker.start(
            &member_scope,
            "TeamMember",
            &format!("Executing member {} in team {}", member.name(), self.name),
            data.clone(),
        );

        let result = member
            .execute(&member_scope, user_input, messages, memory, sink)
            .await;

        messages.extend(result.messages.iter().cloned());
        new_messages.extend(result.messages);

        match result.error {
            None => {
                self.tracker.complete(
                    &member_scope,
                    "TeamMember",
                    "Team member execution completed successfully",
                    data,
                );
                Ok(())
            }
            Some(err) => {
                self.tracker.fail(
                    &member_scope,
                    "TeamMember",
                    &format!("Team member execution failed: {}", err),
                    &err,
                    data,
                );
                Err(err)
            }
        }
    }

    /// Sequential strategy: each member speaks exactly once, in
    /// declaration order
    async fn execute_sequential(
        &self,
        scope: &QueryScope,
        user_input: &Message,
        messages: &mut Vec<Message>,
        new_messages: &mut Vec<Message>,
        memory: Option<Arc<dyn Memory>>,
        sink: Option<Arc<dyn CompletionSink>>,
    ) -> EngineResult<()> {
        for (turn, member) in self.members.iter().enumerate() {
            scope.check_cancelled()?;

            if let Err(err) = self
                .execute_turn(
                    scope,
                    member,
                    turn as u32,
                    user_input,
                    messages,
                    new_messages,
                    memory.clone(),
                    sink.clone(),
                )
                .await
            {
                return Self::absorb_terminate(err);
            }
        }

        Ok(())
    }

    /// Round-robin strategy: cyclic iteration bounded only by
    /// `max_turns`; without it the team runs until the scope is
    /// cancelled
    async fn execute_round_robin(
        &self,
        scope: &QueryScope,
        user_input: &Message,
        messages: &mut Vec<Message>,
        new_messages: &mut Vec<Message>,
        memory: Option<Arc<dyn Memory>>,
        sink: Option<Arc<dyn CompletionSink>>,
    ) -> EngineResult<()> {
        let mut message_count: u32 = 0;
        let mut member_index = 0;

        loop {
            scope.check_cancelled()?;

            if let Some(max_turns) = self.max_turns {
                if message_count >= max_turns {
                    return Ok(());
                }
            }

            let member = &self.members[member_index];
            if let Err(err) = self
                .execute_turn(
                    scope,
                    member,
                    message_count,
                    user_input,
                    messages,
                    new_messages,
                    memory.clone(),
                    sink.clone(),
                )
                .await
            {
                if err.is_terminate() {
                    return Ok(());
                }
                if err.is_cancelled() {
                    return Err(err);
                }
                return Err(EngineError::Dependency(format!(
                    "member {} failed in team {}: {}",
                    member.name(),
                    self.full_name(),
                    err
                )));
            }

            message_count += 1;
            member_index = (member_index + 1) % self.members.len();
        }
    }
}

/// Resolve a declarative team into a bound [`Team`]
///
/// Members resolve recursively; a team reachable from itself is a
/// configuration error, detected through the visited set.
pub fn resolve_team<'a>(
    store: &'a Arc<dyn ResourceStore>,
    tracker: &'a OperationTracker,
    name: &'a str,
    namespace: &'a str,
    query: &'a Query,
    mcp_settings: &'a HashMap<String, McpSettings>,
) -> BoxFuture<'a, EngineResult<Arc<Team>>> {
    resolve_team_inner(store, tracker, name, namespace, query, mcp_settings, HashSet::new())
}

fn resolve_team_inner<'a>(
    store: &'a Arc<dyn ResourceStore>,
    tracker: &'a OperationTracker,
    name: &'a str,
    namespace: &'a str,
    query: &'a Query,
    mcp_settings: &'a HashMap<String, McpSettings>,
    mut visited: HashSet<String>,
) -> BoxFuture<'a, EngineResult<Arc<Team>>> {
    Box::pin(async move {
        let key = format!("{}/{}", namespace, name);
        if !visited.insert(key.clone()) {
            return Err(EngineError::Validation(format!(
                "team member cycle detected at {}",
                key
            )));
        }

        let spec = store.get_team(name, namespace).await?;

        let mut members = Vec::with_capacity(spec.members.len());
        for member_spec in &spec.members {
            members.push(
                resolve_member(store, tracker, member_spec, namespace, query, mcp_settings, &visited)
                    .await?,
            );
        }

        Ok(Arc::new(Team {
            name: spec.name,
            namespace: spec.namespace,
            description: spec.description,
            members,
            strategy: spec.strategy,
            max_turns: spec.max_turns,
            selector: spec.selector,
            graph: spec.graph,
            store: store.clone(),
            tracker: tracker.clone(),
            query: query.clone(),
            mcp_settings: mcp_settings.clone(),
        }))
    })
}

async fn resolve_member(
    store: &Arc<dyn ResourceStore>,
    tracker: &OperationTracker,
    member_spec: &TeamMemberSpec,
    namespace: &str,
    query: &Query,
    mcp_settings: &HashMap<String, McpSettings>,
    visited: &HashSet<String>,
) -> EngineResult<TeamMember> {
    match member_spec.kind {
        MemberKind::Agent => {
            let agent =
                resolve_agent(store, tracker, &member_spec.name, namespace, query, mcp_settings)
                    .await?;
            Ok(TeamMember::Agent(agent))
        }
        MemberKind::Team => {
            let team = resolve_team_inner(
                store,
                tracker,
                &member_spec.name,
                namespace,
                query,
                mcp_settings,
                visited.clone(),
            )
            .await?;
            Ok(TeamMember::Team(team))
        }
    }
}
