use std::future::Future;
use std::time::Duration;

use agent_builder_core::compile::ExecutionRequest;
use agent_builder_core::execution::{ExecutionList, HealthStatus, WorkflowExecutionResponse};
use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api/v1/workflows".to_string(),
            api_key: None,
            timeout_secs: 120,
        }
    }
}

/// Something that can run compiled workflows and report on past runs.
pub trait ExecutionBackend: Send + Sync {
    fn execute(
        &self,
        request: &ExecutionRequest,
    ) -> impl Future<Output = Result<WorkflowExecutionResponse>> + Send;

    fn execution(
        &self,
        run_id: &str,
    ) -> impl Future<Output = Result<WorkflowExecutionResponse>> + Send;

    fn list_executions(&self) -> impl Future<Output = Result<ExecutionList>> + Send;

    fn health(&self) -> impl Future<Output = Result<HealthStatus>> + Send;
}

/// HTTP client for the workflow execution API.
pub struct ExecutionClient {
    config: ClientConfig,
    http: reqwest::Client,
}

impl ExecutionClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn send<T: DeserializeOwned>(&self, req_builder: reqwest::RequestBuilder) -> Result<T> {
        let req_builder = match &self.config.api_key {
            Some(api_key) => req_builder.bearer_auth(api_key),
            None => req_builder,
        };

        let response = req_builder
            .send()
            .await
            .context("Failed to send request to workflow API")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("{}", server_error(status, &error_text));
        }

        response
            .json()
            .await
            .context("Failed to parse workflow API response")
    }
}

impl ExecutionBackend for ExecutionClient {
    async fn execute(&self, request: &ExecutionRequest) -> Result<WorkflowExecutionResponse> {
        let url = self.url("execute");
        debug!(
            "Workflow request to {}: {} nodes",
            url,
            request.definition.nodes.len()
        );

        let response: WorkflowExecutionResponse =
            self.send(self.http.post(&url).json(request)).await?;

        info!(
            run_id = %response.run_id,
            status = %response.status,
            nodes = response.nodes.len(),
            "workflow executed"
        );
        Ok(response)
    }

    async fn execution(&self, run_id: &str) -> Result<WorkflowExecutionResponse> {
        let url = self.url(&format!("executions/{run_id}"));
        self.send(self.http.get(&url))
            .await
            .with_context(|| format!("Failed to fetch execution {run_id}"))
    }

    async fn list_executions(&self) -> Result<ExecutionList> {
        self.send(self.http.get(self.url("executions"))).await
    }

    async fn health(&self) -> Result<HealthStatus> {
        self.send(self.http.get(self.url("health"))).await
    }
}

/// `Server Error: <code> - <reason>`, followed by the body's `detail` field
/// (or the raw body) when there is one.
pub fn server_error(status: StatusCode, body: &str) -> String {
    let mut message = format!(
        "Server Error: {} - {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown Status")
    );

    let detail = match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => map.get("detail").map(|d| match d {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }),
        _ => Some(body.trim().to_string()).filter(|b| !b.is_empty()),
    };
    if let Some(detail) = detail {
        message.push_str(" - ");
        message.push_str(&detail);
    }
    message
}
