//! Graph strategy: members follow a directed transition relation

use std::collections::HashMap;
use std::sync::Arc;

use super::Team;
use crate::domain::Message;
use crate::error::{EngineError, EngineResult};
use crate::events::QueryScope;
use crate::memory::Memory;
use crate::model::CompletionSink;

impl Team {
    /// Execute members along the graph's transitions, starting at the
    /// first member; an absent transition ends the team, `max_turns`
    /// caps the total
    #[allow(clippy::too_many_arguments)]
    pub(super) async fn execute_graph(
        &self,
        scope: &QueryScope,
        user_input: &Message,
        messages: &mut Vec<Message>,
        new_messages: &mut Vec<Message>,
        memory: Option<Arc<dyn Memory>>,
        sink: Option<Arc<dyn CompletionSink>>,
    ) -> EngineResult<()> {
        let member_map: HashMap<&str, usize> = self
            .members
            .iter()
            .enumerate()
            .map(|(index, member)| (member.name(), index))
            .collect();

        let mut transition_map: HashMap<&str, &str> = HashMap::new();
        if let Some(graph) = &self.graph {
            for edge in &graph.edges {
                transition_map.insert(edge.from.as_str(), edge.to.as_str());
            }
        }

        let mut current = self.members[0].name().to_string();

        let mut turn: u32 = 0;
        loop {
            scope.check_cancelled()?;

            let member_index = *member_map.get(current.as_str()).ok_or_else(|| {
                EngineError::Validation(format!(
                    "member {} not found in team {}",
                    current,
                    self.full_name()
                ))
            })?;
            let member = &self.members[member_index];

            if let Err(err) = self
                .execute_turn(
                    scope,
                    member,
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

            let Some(next) = transition_map.get(current.as_str()) else {
                break;
            };
            current = next.to_string();

            if let Some(max_turns) = self.max_turns {
                if turn + 1 >= max_turns {
                    return Ok(());
                }
            }
            turn += 1;
        }

        Ok(())
    }
}
