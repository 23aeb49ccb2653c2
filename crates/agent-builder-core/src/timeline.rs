//! Projection of execution results into display-ready timeline items.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::execution::{NodeResult, WorkflowExecutionResponse};

pub const DEFAULT_MAX_ITEMS: usize = 50;

pub const RESPONSE_FALLBACK: &str =
    "I received your message but had trouble formatting the response. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimelineStatus {
    Progress,
    Complete,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructuredEntry {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineItem {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: TimelineStatus,
    pub icon: &'static str,
    pub node_type: String,
    pub response: Option<String>,
    pub error: Option<String>,
    pub structured_output: Vec<StructuredEntry>,
}

impl TimelineItem {
    pub fn has_structured_output(&self) -> bool {
        !self.structured_output.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineOptions {
    pub max_items: usize,
}

impl Default for TimelineOptions {
    fn default() -> Self {
        Self {
            max_items: DEFAULT_MAX_ITEMS,
        }
    }
}

/// Start first, end last, everything else in between.
fn priority(node_type: &str) -> u8 {
    match node_type {
        "start" => 0,
        "end" => 2,
        _ => 1,
    }
}

/// Build timeline items from an execution response.
///
/// Results are stably sorted by node-type priority, then truncated to
/// `options.max_items`.
pub fn project(response: &WorkflowExecutionResponse, options: &TimelineOptions) -> Vec<TimelineItem> {
    let mut ordered: Vec<&NodeResult> = response.nodes.iter().collect();
    ordered.sort_by_key(|r| priority(&r.node_type));
    ordered
        .into_iter()
        .take(options.max_items)
        .map(timeline_item)
        .collect()
}

fn timeline_item(result: &NodeResult) -> TimelineItem {
    TimelineItem {
        id: result.node_id.clone(),
        title: if result.node_name.is_empty() {
            result.node_id.clone()
        } else {
            result.node_name.clone()
        },
        description: describe(result),
        status: status_of(result),
        icon: icon_for(&result.node_type),
        node_type: result.node_type.clone(),
        response: result.response.clone(),
        error: result.error.clone(),
        structured_output: structured_entries(&result.structured_output),
    }
}

fn status_of(result: &NodeResult) -> TimelineStatus {
    if result.error.as_deref().is_some_and(|e| !e.is_empty()) {
        return TimelineStatus::Error;
    }
    match result.status.as_str() {
        "running" => TimelineStatus::Progress,
        "failed" => TimelineStatus::Error,
        _ => TimelineStatus::Complete,
    }
}

fn fallback_description(node_type: &str) -> String {
    match node_type {
        "start" => "Workflow initialization".to_string(),
        "agent" => "AI agent processing".to_string(),
        "mcp_tool" => "MCP tool execution".to_string(),
        "condition" => "Condition evaluation".to_string(),
        "unknown" => "Node execution".to_string(),
        "end" => "Workflow completion".to_string(),
        other => format!("{other} node execution"),
    }
}

fn describe(result: &NodeResult) -> String {
    let mut parts = vec![match result.response.as_deref() {
        Some(text) if !text.is_empty() => text.to_string(),
        _ => fallback_description(&result.node_type),
    }];

    if !result.structured_output.is_empty() {
        let lines: Vec<String> = result
            .structured_output
            .iter()
            .map(|(key, value)| format!("• {key}: {}", compact(value)))
            .collect();
        parts.push(format!("\n\nStructured Output:\n{}", lines.join("\n")));
    }

    parts.join(" ")
}

fn compact(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn structured_entries(output: &Map<String, Value>) -> Vec<StructuredEntry> {
    output
        .iter()
        .map(|(key, value)| StructuredEntry {
            key: key.clone(),
            value: match value {
                Value::Object(_) | Value::Array(_) => {
                    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
                }
                other => compact(other),
            },
        })
        .collect()
}

pub fn icon_for(node_type: &str) -> &'static str {
    match node_type {
        "start" => "play-circle",
        "agent" => "robot",
        "mcp_tool" => "lightning",
        "condition" => "flow-arrow",
        "end" => "stop-circle",
        _ => "circle",
    }
}

/// Human-readable duration: `450ms`, `2.5s`, `3m 5s`.
pub fn format_duration(milliseconds: f64) -> String {
    if milliseconds < 1000.0 {
        return format!("{}ms", milliseconds.round());
    }
    let seconds = milliseconds / 1000.0;
    if seconds < 60.0 {
        return format!("{seconds:.1}s");
    }
    let minutes = (seconds / 60.0).floor();
    let remaining = (seconds % 60.0).floor();
    format!("{minutes}m {remaining}s")
}

/// The text to show as the assistant's reply: the first agent node's
/// response, else the first response of any node, else a fixed apology.
pub fn extract_ai_response(response: &WorkflowExecutionResponse) -> String {
    let non_empty = |r: &&NodeResult| r.response.as_deref().is_some_and(|t| !t.is_empty());

    if let Some(text) = response
        .nodes
        .iter()
        .find(|r| r.node_type == "agent")
        .filter(non_empty)
        .and_then(|r| r.response.clone())
    {
        return text;
    }
    if let Some(text) = response
        .nodes
        .iter()
        .find(non_empty)
        .and_then(|r| r.response.clone())
    {
        return text;
    }

    warn!(run_id = %response.run_id, "no node response found in execution result");
    RESPONSE_FALLBACK.to_string()
}
