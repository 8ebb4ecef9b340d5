//! # Troupe - Agent/Team Execution Engine
//!
//! Troupe is the execution core of a declarative LLM-agent
//! orchestration platform. Given a [`domain::Query`] referencing one
//! or more agents or teams, it resolves their dependencies, drives
//! multi-turn conversations with chat-completion models, mediates tool
//! invocation, coordinates multi-agent collaboration, and emits
//! structured progress events.
//!
//! ## Features
//!
//! - **Agent loop**: prompt resolution, chat completion, tool calls,
//!   repeat until the model stops asking for tools
//! - **Four team strategies**: sequential, round-robin, selector, graph
//! - **Pluggable execution engines**: the built-in loop, external HTTP
//!   engines (`POST /execute`), and remote A2A JSON-RPC servers
//! - **Tools**: HTTP tools, MCP server tools, agents-as-tools, and
//!   partial facades with pre-filled parameters
//! - **Memory**: optional HTTP conversation store keyed by session
//! - **Accounting**: per-query token accumulation and per-operation
//!   start/complete/fail events with durations
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use tokio_util::sync::CancellationToken;
//! use troupe::domain::{Query, QueryTarget, TargetKind};
//! use troupe::events::NoopEmitter;
//! use troupe::query::QueryDriver;
//! use troupe::store::InMemoryResourceStore;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = InMemoryResourceStore::shared();
//!     let driver = QueryDriver::new(store, Arc::new(NoopEmitter));
//!
//!     let query = Query {
//!         name: "ask".into(),
//!         namespace: "default".into(),
//!         uid: "query-1".into(),
//!         input: "ping".into(),
//!         targets: vec![QueryTarget::new(TargetKind::Agent, "echo")],
//!         session_id: None,
//!         parameters: Vec::new(),
//!         overrides: Vec::new(),
//!         memory: None,
//!     };
//!
//!     let result = driver.execute(&query, CancellationToken::new()).await;
//!     println!("{:?}", result.responses);
//! }
//! ```
//!
//! ## Architecture
//!
//! - **domain**: messages, tool calls, token usage, resource shapes
//! - **store**: the consumed control-plane lookup interface
//! - **events**: operation tracking and the per-query scope
//! - **model / tools / memory**: the collaborators an agent talks to
//! - **engine**: routing to external HTTP engines and A2A servers
//! - **agent / team / query**: the execution loops, leaves first

pub mod agent;
pub mod domain;
pub mod engine;
pub mod error;
pub mod events;
pub mod memory;
pub mod model;
pub mod query;
pub mod store;
pub mod team;
pub mod tools;

pub use agent::{resolve_agent, Agent, ExecutionResult};
pub use error::{EngineError, EngineResult};
pub use query::{QueryDriver, QueryResult};
pub use team::{resolve_team, Team, TeamMember};
