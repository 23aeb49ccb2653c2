use agent_builder_core::execution::WorkflowExecutionResponse;
use agent_builder_core::short_id;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub role: MessageRole,
    pub timestamp: DateTime<Utc>,
    /// The run behind an assistant reply, kept for the activity timeline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<WorkflowExecutionResponse>,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: format!("msg_{}", short_id()),
            content: content.into(),
            role,
            timestamp: Utc::now(),
            execution: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn with_execution(mut self, execution: WorkflowExecutionResponse) -> Self {
        self.execution = Some(execution);
        self
    }
}
