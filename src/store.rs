//! Resource lookup interface
//!
//! The control plane that persists and reconciles resources is outside
//! this crate. The engine consumes it through [`ResourceStore`]: typed
//! getters by (name, namespace), value-source resolution, and the one
//! write-back the memory client needs. [`InMemoryResourceStore`] backs
//! tests and embedders that hold resources directly.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{
    A2aServerSpec, AgentSpec, EngineSpec, McpServerSpec, MemorySpec, ModelSpec, TeamSpec,
    ToolSpec, ValueSource,
};
use crate::error::{EngineError, EngineResult};

/// Read access to declarative resources, plus the memory address
/// write-back
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get_agent(&self, name: &str, namespace: &str) -> EngineResult<AgentSpec>;
    async fn get_team(&self, name: &str, namespace: &str) -> EngineResult<TeamSpec>;
    async fn get_model(&self, name: &str, namespace: &str) -> EngineResult<ModelSpec>;
    async fn get_tool(&self, name: &str, namespace: &str) -> EngineResult<ToolSpec>;
    async fn get_memory(&self, name: &str, namespace: &str) -> EngineResult<MemorySpec>;
    async fn get_mcp_server(&self, name: &str, namespace: &str) -> EngineResult<McpServerSpec>;
    async fn get_a2a_server(&self, name: &str, namespace: &str) -> EngineResult<A2aServerSpec>;
    async fn get_execution_engine(&self, name: &str, namespace: &str)
        -> EngineResult<EngineSpec>;

    /// Resolve a value source (inline value, secret or configmap key)
    async fn resolve_value_source(
        &self,
        source: &ValueSource,
        namespace: &str,
    ) -> EngineResult<String>;

    /// Record a newly resolved memory backend address
    async fn update_memory_address(
        &self,
        name: &str,
        namespace: &str,
        address: &str,
    ) -> EngineResult<()>;
}

type Keyed<T> = RwLock<HashMap<(String, String), T>>;

fn key(name: &str, namespace: &str) -> (String, String) {
    (namespace.to_string(), name.to_string())
}

/// Resource store holding everything in process memory
#[derive(Default)]
pub struct InMemoryResourceStore {
    agents: Keyed<AgentSpec>,
    teams: Keyed<TeamSpec>,
    models: Keyed<ModelSpec>,
    tools: Keyed<ToolSpec>,
    memories: Keyed<MemorySpec>,
    mcp_servers: Keyed<McpServerSpec>,
    a2a_servers: Keyed<A2aServerSpec>,
    engines: Keyed<EngineSpec>,
    /// (namespace, secret name, key) -> value
    secrets: RwLock<HashMap<(String, String, String), String>>,
    /// (namespace, configmap name, key) -> value
    configmaps: RwLock<HashMap<(String, String, String), String>>,
}

impl InMemoryResourceStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store behind an `Arc`
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub async fn insert_agent(&self, spec: AgentSpec) {
        self.agents
            .write()
            .await
            .insert(key(&spec.name, &spec.namespace), spec);
    }

    pub async fn insert_team(&self, spec: TeamSpec) {
        self.teams
            .write()
            .await
            .insert(key(&spec.name, &spec.namespace), spec);
    }

    pub async fn insert_model(&self, spec: ModelSpec) {
        self.models
            .write()
            .await
            .insert(key(&spec.name, &spec.namespace), spec);
    }

    pub async fn insert_tool(&self, spec: ToolSpec) {
        self.tools
            .write()
            .await
            .insert(key(&spec.name, &spec.namespace), spec);
    }

    pub async fn insert_memory(&self, spec: MemorySpec) {
        self.memories
            .write()
            .await
            .insert(key(&spec.name, &spec.namespace), spec);
    }

    pub async fn insert_mcp_server(&self, spec: McpServerSpec) {
        self.mcp_servers
            .write()
            .await
            .insert(key(&spec.name, &spec.namespace), spec);
    }

    pub async fn insert_a2a_server(&self, spec: A2aServerSpec) {
        self.a2a_servers
            .write()
            .await
            .insert(key(&spec.name, &spec.namespace), spec);
    }

    pub async fn insert_execution_engine(&self, spec: EngineSpec) {
        self.engines
            .write()
            .await
            .insert(key(&spec.name, &spec.namespace), spec);
    }

    pub async fn insert_secret(
        &self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        entry: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.secrets
            .write()
            .await
            .insert((namespace.into(), name.into(), entry.into()), value.into());
    }

    pub async fn insert_configmap(
        &self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        entry: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.configmaps
            .write()
            .await
            .insert((namespace.into(), name.into(), entry.into()), value.into());
    }
}

async fn get_keyed<T: Clone>(
    map: &Keyed<T>,
    kind: &'static str,
    name: &str,
    namespace: &str,
) -> EngineResult<T> {
    map.read()
        .await
        .get(&key(name, namespace))
        .cloned()
        .ok_or_else(|| EngineError::not_found(kind, format!("{}/{}", namespace, name)))
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn get_agent(&self, name: &str, namespace: &str) -> EngineResult<AgentSpec> {
        get_keyed(&self.agents, "agent", name, namespace).await
    }

    async fn get_team(&self, name: &str, namespace: &str) -> EngineResult<TeamSpec> {
        get_keyed(&self.teams, "team", name, namespace).await
    }

    async fn get_model(&self, name: &str, namespace: &str) -> EngineResult<ModelSpec> {
        get_keyed(&self.models, "model", name, namespace).await
    }

    async fn get_tool(&self, name: &str, namespace: &str) -> EngineResult<ToolSpec> {
        get_keyed(&self.tools, "tool", name, namespace).await
    }

    async fn get_memory(&self, name: &str, namespace: &str) -> EngineResult<MemorySpec> {
        get_keyed(&self.memories, "memory", name, namespace).await
    }

    async fn get_mcp_server(&self, name: &str, namespace: &str) -> EngineResult<McpServerSpec> {
        get_keyed(&self.mcp_servers, "mcp server", name, namespace).await
    }

    async fn get_a2a_server(&self, name: &str, namespace: &str) -> EngineResult<A2aServerSpec> {
        get_keyed(&self.a2a_servers, "a2a server", name, namespace).await
    }

    async fn get_execution_engine(
        &self,
        name: &str,
        namespace: &str,
    ) -> EngineResult<EngineSpec> {
        get_keyed(&self.engines, "execution engine", name, namespace).await
    }

    async fn resolve_value_source(
        &self,
        source: &ValueSource,
        namespace: &str,
    ) -> EngineResult<String> {
        match source {
            ValueSource::Value(value) => Ok(value.clone()),
            ValueSource::SecretRef { name, key: entry } => self
                .secrets
                .read()
                .await
                .get(&(namespace.to_string(), name.clone(), entry.clone()))
                .cloned()
                .ok_or_else(|| {
                    EngineError::not_found("secret", format!("{}/{}:{}", namespace, name, entry))
                }),
            ValueSource::ConfigMapRef { name, key: entry } => self
                .configmaps
                .read()
                .await
                .get(&(namespace.to_string(), name.clone(), entry.clone()))
                .cloned()
                .ok_or_else(|| {
                    EngineError::not_found(
                        "configmap",
                        format!("{}/{}:{}", namespace, name, entry),
                    )
                }),
        }
    }

    async fn update_memory_address(
        &self,
        name: &str,
        namespace: &str,
        address: &str,
    ) -> EngineResult<()> {
        let mut memories = self.memories.write().await;
        let memory = memories.get_mut(&key(name, namespace)).ok_or_else(|| {
            EngineError::not_found("memory", format!("{}/{}", namespace, name))
        })?;
        memory.status.last_resolved_address = Some(address.to_string());
        memory.status.message = Some(format!("Address dynamically resolved to: {}", address));
        Ok(())
    }
}
