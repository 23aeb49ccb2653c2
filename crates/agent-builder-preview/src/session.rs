use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use agent_builder_client::ExecutionBackend;
use agent_builder_core::compile::{CompileOptions, compile_workflow};
use agent_builder_core::timeline::{self, TimelineItem, TimelineOptions};
use agent_builder_core::{ValidationError, Workflow, validate_for_preview};
use thiserror::Error;
use tracing::{info, warn};

use crate::message::ChatMessage;

pub const WELCOME_MESSAGE: &str = "Hello! I'm your AI Assistant. This is a preview of your workflow. Send me a message to test how your workflow responds.";

pub const ERROR_REPLY: &str = "I apologize, but I encountered an error while processing your request. This might be because the workflow execution backend isn't running or there's a configuration issue. Please check that your workflow nodes are properly configured.";

#[derive(Debug, Error)]
pub enum PreviewError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("Message cannot be empty")]
    EmptyInput,

    #[error("A message is already being processed")]
    Busy,
}

/// Clears the in-flight flag when the send finishes, fails or is dropped.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A chat conversation with the workflow on the canvas. Each message the
/// user sends compiles the current graph and runs it once.
pub struct PreviewSession<B> {
    backend: B,
    options: CompileOptions,
    messages: Mutex<Vec<ChatMessage>>,
    in_flight: AtomicBool,
}

impl<B: ExecutionBackend> PreviewSession<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            options: CompileOptions::preview(),
            messages: Mutex::new(Vec::new()),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn with_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn lock_messages(&self) -> MutexGuard<'_, Vec<ChatMessage>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.lock_messages().clone()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Start a fresh conversation. The workflow needs a start, an agent and
    /// an end node.
    pub fn open(&self, workflow: &Workflow) -> Result<(), PreviewError> {
        validate_for_preview(workflow)?;
        let mut messages = self.lock_messages();
        messages.clear();
        messages.push(ChatMessage::assistant(WELCOME_MESSAGE));
        info!(workflow = %workflow.name, "preview opened");
        Ok(())
    }

    /// Send a user message and return the assistant's reply.
    ///
    /// A send while another is in flight is rejected with
    /// [`PreviewError::Busy`]. Backend failures do not surface as errors:
    /// they become an apology message in the conversation.
    pub async fn send(&self, workflow: &Workflow, input: &str) -> Result<ChatMessage, PreviewError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(PreviewError::EmptyInput);
        }
        let _guard = InFlight::acquire(&self.in_flight).ok_or(PreviewError::Busy)?;
        validate_for_preview(workflow)?;

        self.lock_messages().push(ChatMessage::user(input));

        let request = compile_workflow(workflow, input, &self.options);
        let reply = match self.backend.execute(&request).await {
            Ok(response) => {
                info!(run_id = %response.run_id, status = %response.status, "preview run finished");
                ChatMessage::assistant(timeline::extract_ai_response(&response))
                    .with_execution(response)
            }
            Err(e) => {
                warn!("Preview execution failed: {:#}", e);
                ChatMessage::assistant(ERROR_REPLY)
            }
        };

        self.lock_messages().push(reply.clone());
        Ok(reply)
    }

    /// Timeline for the most recent run in the conversation, if any.
    pub fn latest_timeline(&self, options: &TimelineOptions) -> Vec<TimelineItem> {
        self.lock_messages()
            .iter()
            .rev()
            .find_map(|m| m.execution.as_ref())
            .map(|execution| timeline::project(execution, options))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessageRole;
    use agent_builder_core::compile::ExecutionRequest;
    use agent_builder_core::execution::{
        ExecutionList, HealthStatus, NodeResult, WorkflowExecutionResponse,
    };
    use agent_builder_core::{NodeKind, Position};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Notify;

    struct StubBackend {
        replies: Mutex<Vec<Result<WorkflowExecutionResponse, String>>>,
        calls: Mutex<Vec<ExecutionRequest>>,
        gate: Option<Arc<Notify>>,
    }

    impl StubBackend {
        fn new(replies: Vec<Result<WorkflowExecutionResponse, String>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                calls: Mutex::new(Vec::new()),
                gate: None,
            }
        }

        fn gated(reply: WorkflowExecutionResponse, gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::new(vec![Ok(reply)])
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl ExecutionBackend for StubBackend {
        async fn execute(
            &self,
            request: &ExecutionRequest,
        ) -> anyhow::Result<WorkflowExecutionResponse> {
            self.calls.lock().unwrap().push(request.clone());
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            let next = {
                let mut replies = self.replies.lock().unwrap();
                if replies.is_empty() {
                    Err("no reply queued".to_string())
                } else {
                    replies.remove(0)
                }
            };
            next.map_err(|e| anyhow::anyhow!(e))
        }

        async fn execution(&self, run_id: &str) -> anyhow::Result<WorkflowExecutionResponse> {
            anyhow::bail!("unknown run {run_id}")
        }

        async fn list_executions(&self) -> anyhow::Result<ExecutionList> {
            Ok(ExecutionList {
                executions: vec![],
                total_count: 0,
            })
        }

        async fn health(&self) -> anyhow::Result<HealthStatus> {
            Ok(serde_json::from_value(serde_json::json!({"status": "healthy"}))?)
        }
    }

    fn previewable() -> Workflow {
        let mut wf = Workflow::new("Preview");
        let s = wf.add_node(NodeKind::Start, Position::default()).id.clone();
        let a = wf.add_node(NodeKind::Agent, Position::default()).id.clone();
        let e = wf.add_node(NodeKind::End, Position::default()).id.clone();
        wf.add_connection(&s, &a).unwrap();
        wf.add_connection(&a, &e).unwrap();
        wf
    }

    fn run(reply: &str) -> WorkflowExecutionResponse {
        WorkflowExecutionResponse {
            run_id: "run_1".to_string(),
            workflow_id: "canvas_preview_workflow".to_string(),
            status: "completed".to_string(),
            success: true,
            started_at: "2024-05-01T10:00:00Z".to_string(),
            finished_at: Some("2024-05-01T10:00:02Z".to_string()),
            duration_seconds: Some(2.0),
            nodes: vec![
                NodeResult {
                    node_id: "n_end".to_string(),
                    node_name: "End".to_string(),
                    node_type: "end".to_string(),
                    status: "success".to_string(),
                    response: None,
                    structured_output: Default::default(),
                    error: None,
                },
                NodeResult {
                    node_id: "n_agent".to_string(),
                    node_name: "Agent".to_string(),
                    node_type: "agent".to_string(),
                    status: "success".to_string(),
                    response: Some(reply.to_string()),
                    structured_output: Default::default(),
                    error: None,
                },
            ],
        }
    }

    #[test]
    fn open_requires_start_agent_end() {
        let session = PreviewSession::new(StubBackend::new(vec![]));
        let err = session.open(&Workflow::default()).unwrap_err();
        assert!(matches!(
            err,
            PreviewError::Invalid(ValidationError::MissingRequiredNodes)
        ));
        assert!(session.messages().is_empty());
    }

    #[test]
    fn open_resets_and_welcomes() {
        let session = PreviewSession::new(StubBackend::new(vec![]));
        session.open(&previewable()).unwrap();
        session.open(&previewable()).unwrap();
        let messages = session.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, WELCOME_MESSAGE);
        assert_eq!(messages[0].role, MessageRole::Assistant);
        assert!(messages[0].id.starts_with("msg_"));
    }

    #[tokio::test]
    async fn send_compiles_executes_and_replies() {
        let wf = previewable();
        let session = PreviewSession::new(StubBackend::new(vec![Ok(run("Sunny, 24°C"))]));
        session.open(&wf).unwrap();

        let reply = session.send(&wf, "  Weather in Paris?  ").await.unwrap();
        assert_eq!(reply.content, "Sunny, 24°C");
        assert_eq!(reply.execution.as_ref().unwrap().run_id, "run_1");

        let messages = session.messages();
        let roles: Vec<_> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![MessageRole::Assistant, MessageRole::User, MessageRole::Assistant]
        );
        assert_eq!(messages[1].content, "Weather in Paris?");

        let calls = session.backend().calls.lock().unwrap();
        assert_eq!(calls[0].input_data.user_request, "Weather in Paris?");
        assert_eq!(calls[0].definition.id, "canvas_preview_workflow");
        drop(calls);

        let items = session.latest_timeline(&TimelineOptions::default());
        let ids: Vec<_> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["n_agent", "n_end"]);
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn backend_failure_becomes_apology() {
        let wf = previewable();
        let session = PreviewSession::new(StubBackend::new(vec![Err(
            "Server Error: 500 - Internal Server Error".to_string(),
        )]));
        let reply = session.send(&wf, "hello").await.unwrap();
        assert_eq!(reply.content, ERROR_REPLY);
        assert!(reply.execution.is_none());
        assert!(!session.is_busy());
        assert!(session.latest_timeline(&TimelineOptions::default()).is_empty());
    }

    #[tokio::test]
    async fn empty_input_is_rejected() {
        let wf = previewable();
        let session = PreviewSession::new(StubBackend::new(vec![]));
        assert!(matches!(
            session.send(&wf, "   ").await,
            Err(PreviewError::EmptyInput)
        ));
        assert_eq!(session.backend().call_count(), 0);
        assert!(session.messages().is_empty());
    }

    #[tokio::test]
    async fn concurrent_send_is_rejected_not_queued() {
        let wf = previewable();
        let gate = Arc::new(Notify::new());
        let session = PreviewSession::new(StubBackend::gated(run("first"), gate.clone()));

        let first = session.send(&wf, "one");
        tokio::pin!(first);
        // Drive the first send until it parks inside the backend.
        let parked = tokio::time::timeout(Duration::from_millis(20), &mut first).await;
        assert!(parked.is_err());
        assert!(session.is_busy());

        let second = session.send(&wf, "two").await;
        assert!(matches!(second, Err(PreviewError::Busy)));

        gate.notify_one();
        assert_eq!(first.await.unwrap().content, "first");
        assert_eq!(session.backend().call_count(), 1);
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn dropped_send_clears_in_flight() {
        let wf = previewable();
        let gate = Arc::new(Notify::new());
        let session = PreviewSession::new(StubBackend::gated(run("late"), gate));

        let pending = tokio::time::timeout(Duration::from_millis(20), session.send(&wf, "hi")).await;
        assert!(pending.is_err());
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn invalid_workflow_releases_flag() {
        let session = PreviewSession::new(StubBackend::new(vec![]));
        let result = session.send(&Workflow::default(), "hi").await;
        assert!(matches!(result, Err(PreviewError::Invalid(_))));
        assert!(!session.is_busy());
    }
}
