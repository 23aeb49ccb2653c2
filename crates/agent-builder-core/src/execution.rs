//! Response types returned by the workflow execution backend.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Result of one workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecutionResponse {
    pub run_id: String,
    pub workflow_id: String,
    /// `completed`, `failed` or `running`.
    pub status: String,
    pub success: bool,
    pub started_at: String,
    #[serde(default)]
    pub finished_at: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub nodes: Vec<NodeResult>,
}

impl WorkflowExecutionResponse {
    pub fn is_running(&self) -> bool {
        self.status == "running"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    pub node_id: String,
    #[serde(default)]
    pub node_name: String,
    /// `start`, `end`, `agent`, `mcp_tool`, `condition`, ...
    pub node_type: String,
    /// `success`, `failed` or `running`.
    pub status: String,
    #[serde(default)]
    pub response: Option<String>,
    /// Keys come from the node's output schema; empty when it has none.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub structured_output: Map<String, Value>,
    #[serde(default)]
    pub error: Option<String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

/// One entry of the execution history listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub run_id: String,
    #[serde(default)]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub finished_at: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionList {
    #[serde(default)]
    pub executions: Vec<ExecutionSummary>,
    #[serde(default)]
    pub total_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    #[serde(default)]
    pub status: String,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self.status.as_str(), "healthy" | "ok")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn response_tolerates_nulls_and_missing_fields() {
        let resp: WorkflowExecutionResponse = serde_json::from_value(json!({
            "run_id": "run_1",
            "workflow_id": "canvas_workflow",
            "status": "completed",
            "success": true,
            "started_at": "2024-05-01T10:00:00Z",
            "finished_at": null,
            "nodes": [{
                "node_id": "node_a",
                "node_name": "Agent",
                "node_type": "agent",
                "status": "success",
                "response": "Sunny",
                "structured_output": null,
                "error": null
            }, {
                "node_id": "node_b",
                "node_type": "end",
                "status": "success"
            }]
        }))
        .unwrap();

        assert!(resp.finished_at.is_none());
        assert!(resp.duration_seconds.is_none());
        assert!(!resp.is_running());
        assert!(resp.nodes[0].structured_output.is_empty());
        assert_eq!(resp.nodes[0].response.as_deref(), Some("Sunny"));
        assert_eq!(resp.nodes[1].node_name, "");
        assert!(resp.nodes[1].error.is_none());
    }

    #[test]
    fn health_keeps_extra_fields() {
        let health: HealthStatus =
            serde_json::from_value(json!({"status": "healthy", "version": "1.2.0"})).unwrap();
        assert!(health.is_healthy());
        assert_eq!(health.details["version"], "1.2.0");
    }

    #[test]
    fn execution_list_defaults() {
        let list: ExecutionList =
            serde_json::from_value(json!({"executions": [{"run_id": "r1", "status": "failed"}]}))
                .unwrap();
        assert_eq!(list.total_count, 0);
        assert_eq!(list.executions[0].status.as_deref(), Some("failed"));
    }
}
