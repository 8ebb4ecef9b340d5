//! Declarative resource shapes consumed by the engine
//!
//! These mirror the control-plane resources the engine executes against.
//! Reconciliation, admission and persistence of these resources live
//! outside the crate; the engine only reads them through a
//! [`crate::store::ResourceStore`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A name/value pair used for prompt template substitution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

impl Parameter {
    /// Create a new parameter
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A value supplied inline or referenced from a secret/configmap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    /// Literal value
    Value(String),
    /// Key in a named secret
    SecretRef { name: String, key: String },
    /// Key in a named configmap
    ConfigMapRef { name: String, key: String },
}

/// Address-resolution status shared by addressable resources
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_resolved_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// What kind of resource a query target names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Agent,
    Team,
    Model,
    Tool,
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetKind::Agent => write!(f, "agent"),
            TargetKind::Team => write!(f, "team"),
            TargetKind::Model => write!(f, "model"),
            TargetKind::Tool => write!(f, "tool"),
        }
    }
}

/// A single target of a query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryTarget {
    #[serde(rename = "type")]
    pub kind: TargetKind,
    pub name: String,
}

impl QueryTarget {
    /// Create a new query target
    pub fn new(kind: TargetKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

/// Per-server header overrides applied to MCP connections
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderOverride {
    /// MCP server name the headers apply to
    pub target: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// A declarative query: input routed to one or more targets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub name: String,
    pub namespace: String,
    /// Unique id assigned by the control plane
    pub uid: String,
    pub input: String,
    pub targets: Vec<QueryTarget>,
    /// Conversation session; defaults to the query uid when empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Parameters that override agent parameters on name collision
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub overrides: Vec<HeaderOverride>,
    /// Name of the Memory resource to load/append conversation history
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

/// Reference to an execution engine; the reserved name "a2a" routes to
/// the built-in A2A engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// A tool binding on an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolBinding {
    /// A tool implemented by the engine itself (e.g. "terminate")
    Builtin { name: String },
    /// Reference to a Tool resource
    Custom { name: String },
    /// Tools listed from an MCP server; `tool` narrows to one of them
    Mcp {
        server: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool: Option<String>,
    },
    /// Another agent exposed as a single-call tool
    Agent { name: String },
    /// A facade over a Tool resource with pre-filled parameters
    Partial {
        /// Facade name visible to the model
        name: String,
        /// Underlying Tool resource
        tool: String,
        /// Pre-filled arguments; these win over model-supplied values
        #[serde(default)]
        parameters: Vec<Parameter>,
    },
}

/// A declarative agent: role, prompt, model binding and tool set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    pub namespace: String,
    pub prompt: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_engine: Option<EngineRef>,
    #[serde(default)]
    pub tools: Vec<ToolBinding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    /// Free-form annotations; A2A agents carry the server name/address here
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

/// Team orchestration strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    Sequential,
    RoundRobin,
    Selector,
    Graph,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Sequential => write!(f, "sequential"),
            Strategy::RoundRobin => write!(f, "round-robin"),
            Strategy::Selector => write!(f, "selector"),
            Strategy::Graph => write!(f, "graph"),
        }
    }
}

/// What kind of member a team entry names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberKind {
    Agent,
    Team,
}

/// A member entry of a team, resolved lazily per execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamMemberSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: MemberKind,
}

/// Selector configuration: the agent that picks the next speaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorSpec {
    pub agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector_prompt: Option<String>,
}

/// A directed transition between two members
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
}

/// Directed transition relation over member names
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSpec {
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
}

/// A declarative team: members plus an orchestration strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamSpec {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub description: String,
    pub strategy: Strategy,
    pub members: Vec<TeamMemberSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<SelectorSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph: Option<GraphSpec>,
}

/// A chat-completion model endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    pub namespace: String,
    /// Provider model identifier (e.g. "gpt-4o")
    pub model: String,
    /// Base URL of the OpenAI-compatible endpoint
    pub address: ValueSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<ValueSource>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// How a Tool resource is invoked
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolKind {
    /// HTTP invoker posting the arguments to a configured address
    Http {
        address: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        method: Option<String>,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    /// Raises the terminate-team sentinel when invoked
    Terminate,
}

/// A declarative tool definition with an opaque invoker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema for the tool's parameters
    #[serde(default = "default_parameters_schema")]
    pub parameters: Value,
    pub kind: ToolKind,
}

pub(crate) fn default_parameters_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// An external conversation store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySpec {
    pub name: String,
    pub namespace: String,
    pub address: ValueSource,
    #[serde(default)]
    pub status: AddressStatus,
}

/// An MCP server exposing tools over JSON-RPC
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerSpec {
    pub name: String,
    pub namespace: String,
    pub address: ValueSource,
    #[serde(default)]
    pub status: AddressStatus,
}

/// A remote agent server speaking the A2A JSON-RPC protocol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct A2aServerSpec {
    pub name: String,
    pub namespace: String,
    pub address: ValueSource,
    #[serde(default)]
    pub headers: HashMap<String, ValueSource>,
    /// Optional per-call timeout as a duration string (e.g. "30s")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(default)]
    pub status: AddressStatus,
}

/// An external execution engine implementing `POST /execute`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSpec {
    pub name: String,
    pub namespace: String,
    pub address: ValueSource,
    #[serde(default)]
    pub status: AddressStatus,
}
