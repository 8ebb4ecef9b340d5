//! Selector strategy: a designated agent picks the next speaker

use std::collections::HashMap;
use std::sync::Arc;

use tera::{Context, Tera};

use super::{Team, TeamMember};
use crate::agent::resolve_agent;
use crate::domain::Message;
use crate::error::{EngineError, EngineResult};
use crate::events::QueryScope;
use crate::memory::Memory;
use crate::model::CompletionSink;

const DEFAULT_SELECTOR_PROMPT: &str = r#"You are in a role play game. The following roles are available:
{{roles}}.
Read the following conversation. Then select the next role from {{participants}} to play. Only return the role.

{{history}}

Read the above conversation. Then select the next role from {{participants}} to play. Only return the role."#;

pub(super) fn build_history(messages: &[Message]) -> String {
    let mut history = Vec::new();
    for message in messages {
        match message {
            Message::Assistant { name, content, .. } => {
                history.push(format!(
                    "# {}:\n{}\n",
                    name.as_deref().unwrap_or("assistant"),
                    content.as_deref().unwrap_or_default()
                ));
            }
            Message::User { content } => {
                history.push(format!("# user:\n{}\n", content));
            }
            _ => {}
        }
    }
    history.join("\n")
}

pub(super) fn build_participants(members: &[TeamMember]) -> String {
    members
        .iter()
        .map(TeamMember::name)
        .collect::<Vec<_>>()
        .join(", ")
}

pub(super) fn build_roles(members: &[TeamMember]) -> String {
    members
        .iter()
        .map(|member| {
            let description = member.description();
            if description.is_empty() {
                member.name().to_string()
            } else {
                format!("{}: {}", member.name(), description)
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

impl Team {
    /// Execute with the selector agent choosing each next speaker;
    /// graph edges, when present, constrain the legal candidates
    #[allow(clippy::too_many_arguments)]
    pub(super) async fn execute_selector(
        &self,
        scope: &QueryScope,
        user_input: &Message,
        messages: &mut Vec<Message>,
        new_messages: &mut Vec<Message>,
        memory: Option<Arc<dyn Memory>>,
        sink: Option<Arc<dyn CompletionSink>>,
    ) -> EngineResult<()> {
        let prompt_template = self
            .selector
            .as_ref()
            .and_then(|s| s.selector_prompt.as_deref())
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_SELECTOR_PROMPT);

        // Legal successors per member, preserving edge declaration
        // order; edges to unknown members are dropped.
        let mut legal_transitions: HashMap<String, Vec<TeamMember>> = HashMap::new();
        if let Some(graph) = &self.graph {
            for edge in &graph.edges {
                if let Some(member) = self.members.iter().find(|m| m.name() == edge.to) {
                    legal_transitions
                        .entry(edge.from.clone())
                        .or_default()
                        .push(member.clone());
                }
            }
        }

        let mut previous_member = String::new();

        let mut turn: u32 = 0;
        loop {
            scope.check_cancelled()?;

            let next_member = match self
                .determine_next_member(scope, messages, prompt_template, &previous_member, &legal_transitions)
                .await
            {
                Ok(member) => member,
                Err(err) => return Self::absorb_terminate(err),
            };

            if let Err(err) = self
                .execute_turn(
                    scope,
                    &next_member,
                    turn,
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

            previous_member = next_member.name().to_string();

            if let Some(max_turns) = self.max_turns {
                if turn + 1 >= max_turns {
                    return Ok(());
                }
            }
            turn += 1;
        }
    }

    /// Route to the right selection logic for this turn
    async fn determine_next_member(
        &self,
        scope: &QueryScope,
        messages: &[Message],
        prompt_template: &str,
        previous_member: &str,
        legal_transitions: &HashMap<String, Vec<TeamMember>>,
    ) -> EngineResult<TeamMember> {
        if previous_member.is_empty() {
            // First turn always goes to the first member.
            return Ok(self.members[0].clone());
        }

        if legal_transitions.is_empty() {
            return self
                .select_member(scope, messages, prompt_template, previous_member, &self.members)
                .await;
        }

        let Some(legal) = legal_transitions.get(previous_member) else {
            return Ok(self.members[0].clone());
        };

        match legal.len() {
            0 => Ok(self.members[0].clone()),
            // A single legal successor needs no selector call.
            1 => Ok(legal[0].clone()),
            _ => {
                self.select_member(scope, messages, prompt_template, previous_member, legal)
                    .await
            }
        }
    }

    /// Ask the selector agent to choose among the candidates
    ///
    /// An answer matching no candidate falls back to the first one, or
    /// the second when the first equals the previous member and an
    /// alternative exists.
    async fn select_member(
        &self,
        scope: &QueryScope,
        messages: &[Message],
        prompt_template: &str,
        previous_member: &str,
        candidates: &[TeamMember],
    ) -> EngineResult<TeamMember> {
        let mut context = Context::new();
        context.insert("roles", &build_roles(candidates));
        context.insert("participants", &build_participants(candidates));
        context.insert("history", &build_history(messages));

        let rendered = Tera::one_off(prompt_template, &context, false).map_err(|e| {
            EngineError::Validation(format!(
                "selector prompt rendering failed for team {}: {}",
                self.full_name(),
                e
            ))
        })?;

        let selector_agent = self.load_selector_agent(scope).await?;

        let result = selector_agent
            .execute(
                scope,
                &Message::user("Select the next participant to respond."),
                &[Message::system(rendered)],
                None,
                None,
            )
            .await;

        if let Some(err) = result.error {
            if err.is_terminate() {
                return Err(err);
            }
            return Err(EngineError::Dependency(format!(
                "selector agent call failed: {}",
                err
            )));
        }

        let selected_name = result
            .messages
            .iter()
            .rev()
            .find_map(|m| match m {
                Message::Assistant {
                    content: Some(content),
                    ..
                } if !content.is_empty() => Some(content.trim().to_string()),
                _ => None,
            })
            .ok_or_else(|| {
                EngineError::Dependency("selector agent returned invalid response".to_string())
            })?;

        if let Some(member) = candidates.iter().find(|m| m.name() == selected_name) {
            return Ok(member.clone());
        }

        match candidates.first() {
            Some(fallback) => {
                if fallback.name() == previous_member && candidates.len() > 1 {
                    Ok(candidates[1].clone())
                } else {
                    Ok(fallback.clone())
                }
            }
            None => Err(EngineError::Validation(
                "no members available for selection".to_string(),
            )),
        }
    }

    async fn load_selector_agent(
        &self,
        _scope: &QueryScope,
    ) -> EngineResult<Arc<crate::agent::Agent>> {
        let agent_name = self
            .selector
            .as_ref()
            .map(|s| s.agent.as_str())
            .filter(|a| !a.is_empty())
            .ok_or_else(|| {
                EngineError::Validation(format!(
                    "team {} selector agent must be specified",
                    self.full_name()
                ))
            })?;

        resolve_agent(
            &self.store,
            &self.tracker,
            agent_name,
            &self.namespace,
            &self.query,
            &self.mcp_settings,
        )
        .await
    }
}
