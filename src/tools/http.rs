//! HTTP tool invoker

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::ToolInvoker;
use crate::error::{EngineError, EngineResult};
use crate::events::QueryScope;

const TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Invokes a tool by sending its arguments to a configured HTTP
/// endpoint
pub struct HttpToolInvoker {
    http: reqwest::Client,
    address: String,
    method: reqwest::Method,
    headers: HashMap<String, String>,
}

impl HttpToolInvoker {
    /// Create an invoker for the given address; the method defaults to
    /// POST
    pub fn new(
        address: String,
        method: Option<String>,
        headers: HashMap<String, String>,
    ) -> Self {
        let method = method
            .as_deref()
            .and_then(|m| m.to_uppercase().parse().ok())
            .unwrap_or(reqwest::Method::POST);

        let http = reqwest::Client::builder()
            .timeout(TOOL_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            http,
            address,
            method,
            headers,
        }
    }
}

#[async_trait]
impl ToolInvoker for HttpToolInvoker {
    async fn invoke(&self, _scope: &QueryScope, arguments: Value) -> EngineResult<String> {
        let mut request = self
            .http
            .request(self.method.clone(), &self.address)
            .header("Content-Type", "application/json");
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }

        let response = request.json(&arguments).send().await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(EngineError::Dependency(format!(
                "tool endpoint returned status {}: {}",
                status.as_u16(),
                body
            )));
        }

        Ok(body)
    }
}
