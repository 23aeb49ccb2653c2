//! Interactive connection drawing: press on an output handle, drag, release
//! on an input handle.

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::{Connection, GraphEvent, HandleRef, HandleType, Position, Workflow};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("A connection is already being drawn from node {0}")]
    AlreadyConnecting(String),

    #[error("Node {0} not found")]
    NodeNotFound(String),
}

/// The dashed curve shown while dragging.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransientCurve {
    pub from: Position,
    pub to: Position,
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting {
        source: HandleRef,
        curve: Option<TransientCurve>,
    },
}

impl ConnectionState {
    pub fn is_connecting(&self) -> bool {
        matches!(self, ConnectionState::Connecting { .. })
    }
}

/// What happened when the pointer was released.
#[derive(Debug, Clone, PartialEq)]
pub enum ReleaseOutcome {
    /// A new connection was committed to the graph.
    Connected(Connection),
    /// The release did not produce a connection.
    Discarded,
}

/// Owns the pointer-tracking state for one connection gesture at a time.
/// Pointer input only matters while the session is connecting.
#[derive(Debug, Default)]
pub struct ConnectionSession {
    state: ConnectionState,
}

impl ConnectionSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn is_tracking_pointer(&self) -> bool {
        self.state.is_connecting()
    }

    /// Press on a handle. Only output handles arm the session; a press on an
    /// input handle returns `Ok(false)` and changes nothing.
    pub fn begin(
        &mut self,
        workflow: &mut Workflow,
        node_id: &str,
        handle: HandleType,
    ) -> Result<bool, ConnectionError> {
        if let ConnectionState::Connecting { source, .. } = &self.state {
            return Err(ConnectionError::AlreadyConnecting(source.node_id.clone()));
        }
        if handle != HandleType::Output {
            return Ok(false);
        }
        if workflow.find_node(node_id).is_none() {
            return Err(ConnectionError::NodeNotFound(node_id.to_string()));
        }

        debug!(node_id, "connection drag started");
        self.transition(
            workflow,
            ConnectionState::Connecting {
                source: HandleRef::output(node_id),
                curve: None,
            },
        );
        Ok(true)
    }

    /// Track the pointer. Recomputes the transient curve from the source
    /// handle to `point`; the graph itself is not touched.
    pub fn pointer_moved(
        &mut self,
        workflow: &mut Workflow,
        point: Position,
    ) -> Option<&TransientCurve> {
        let ConnectionState::Connecting { source, .. } = &self.state else {
            return None;
        };
        let Some(node) = workflow.find_node(&source.node_id) else {
            // Source node vanished mid-drag.
            self.cancel(workflow);
            return None;
        };

        let from = node.handle_position(source.handle_type);
        let curve = TransientCurve {
            from,
            to: point,
            path: bezier_path(from, point),
        };
        let next = ConnectionState::Connecting {
            source: source.clone(),
            curve: Some(curve),
        };
        self.transition(workflow, next);

        match &self.state {
            ConnectionState::Connecting { curve, .. } => curve.as_ref(),
            ConnectionState::Idle => None,
        }
    }

    /// Release the pointer, optionally over `target`. A legal
    /// output-to-input target commits the connection; the session always
    /// ends up idle.
    pub fn release(&mut self, workflow: &mut Workflow, target: Option<&HandleRef>) -> ReleaseOutcome {
        if !self.state.is_connecting() {
            return ReleaseOutcome::Discarded;
        }
        let state = std::mem::take(&mut self.state);
        let outcome = match (state, target) {
            (ConnectionState::Connecting { source, .. }, Some(target))
                if workflow.can_connect(&source, target) =>
            {
                let connection = Connection::new(&source.node_id, &target.node_id);
                match workflow.accept_connection(connection) {
                    Ok(created) => ReleaseOutcome::Connected(created.clone()),
                    Err(e) => {
                        debug!(error = %e, "connection rejected on release");
                        ReleaseOutcome::Discarded
                    }
                }
            }
            _ => ReleaseOutcome::Discarded,
        };
        workflow.emit(GraphEvent::ConnectionStateChange(ConnectionState::Idle));
        outcome
    }

    /// Abort the gesture. Safe to call when idle.
    pub fn cancel(&mut self, workflow: &mut Workflow) {
        if !self.state.is_connecting() {
            return;
        }
        debug!("connection drag cancelled");
        self.transition(workflow, ConnectionState::Idle);
    }

    fn transition(&mut self, workflow: &mut Workflow, next: ConnectionState) {
        self.state = next;
        workflow.emit(GraphEvent::ConnectionStateChange(self.state.clone()));
    }
}

/// SVG cubic bezier from `from` to `to` with horizontal tangents at both ends.
pub fn bezier_path(from: Position, to: Position) -> String {
    let offset = (to.x - from.x).abs() * 0.5;
    let (cp1x, cp1y) = (from.x + offset, from.y);
    let (cp2x, cp2y) = (to.x - offset, to.y);
    format!(
        "M {} {} C {} {}, {} {}, {} {}",
        from.x, from.y, cp1x, cp1y, cp2x, cp2y, to.x, to.y
    )
}

/// Path for a committed connection, between the handles of its endpoints.
/// `None` when either endpoint no longer exists.
pub fn connection_path(workflow: &Workflow, connection: &Connection) -> Option<String> {
    let source = workflow.find_node(&connection.source_node_id)?;
    let target = workflow.find_node(&connection.target_node_id)?;
    Some(bezier_path(
        source.handle_position(connection.source_handle),
        target.handle_position(connection.target_handle),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NodeKind;

    fn two_nodes() -> (Workflow, String, String) {
        let mut wf = Workflow::default();
        let a = wf.add_node(NodeKind::Start, Position::new(0.0, 0.0)).id.clone();
        let b = wf.add_node(NodeKind::Agent, Position::new(300.0, 100.0)).id.clone();
        wf.drain_events();
        (wf, a, b)
    }

    fn state_changes(wf: &mut Workflow) -> Vec<ConnectionState> {
        wf.drain_events()
            .into_iter()
            .filter_map(|e| match e {
                GraphEvent::ConnectionStateChange(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_bezier_path() {
        let path = bezier_path(Position::new(120.0, 25.0), Position::new(320.0, 125.0));
        assert_eq!(path, "M 120 25 C 220 25, 220 125, 320 125");

        let backwards = bezier_path(Position::new(100.0, 0.0), Position::new(0.0, 0.0));
        assert_eq!(backwards, "M 100 0 C 150 0, -50 0, 0 0");
    }

    #[test]
    fn full_gesture_creates_connection() {
        let (mut wf, a, b) = two_nodes();
        let mut session = ConnectionSession::new();

        assert!(session.begin(&mut wf, &a, HandleType::Output).unwrap());
        assert!(session.is_tracking_pointer());

        let curve = session
            .pointer_moved(&mut wf, Position::new(200.0, 60.0))
            .unwrap()
            .clone();
        assert_eq!(curve.from, Position::new(120.0, 25.0));
        assert!(curve.path.starts_with("M 120 25 C"));
        assert!(wf.connections().is_empty());

        let outcome = session.release(&mut wf, Some(&HandleRef::input(&b)));
        let ReleaseOutcome::Connected(conn) = outcome else {
            panic!("expected a connection");
        };
        assert_eq!(conn.source_node_id, a);
        assert_eq!(conn.target_node_id, b);
        assert!(conn.id.starts_with("conn_"));
        assert_eq!(wf.connections().len(), 1);
        assert_eq!(session.state(), &ConnectionState::Idle);
        assert!(!session.is_tracking_pointer());
    }

    #[test]
    fn every_transition_is_announced() {
        let (mut wf, a, b) = two_nodes();
        let mut session = ConnectionSession::new();
        session.begin(&mut wf, &a, HandleType::Output).unwrap();
        session.pointer_moved(&mut wf, Position::new(10.0, 10.0));
        session.release(&mut wf, Some(&HandleRef::input(&b)));

        let events = wf.drain_events();
        let states: Vec<bool> = events
            .iter()
            .filter_map(|e| match e {
                GraphEvent::ConnectionStateChange(s) => Some(s.is_connecting()),
                _ => None,
            })
            .collect();
        assert_eq!(states, vec![true, true, false]);
        assert!(
            events
                .iter()
                .any(|e| matches!(e, GraphEvent::ConnectionCreated(_)))
        );
    }

    #[test]
    fn input_handle_does_not_arm() {
        let (mut wf, a, _) = two_nodes();
        let mut session = ConnectionSession::new();
        assert!(!session.begin(&mut wf, &a, HandleType::Input).unwrap());
        assert_eq!(session.state(), &ConnectionState::Idle);
        assert!(session.pointer_moved(&mut wf, Position::default()).is_none());
        assert!(state_changes(&mut wf).is_empty());
    }

    #[test]
    fn begin_twice_is_an_error() {
        let (mut wf, a, b) = two_nodes();
        let mut session = ConnectionSession::new();
        session.begin(&mut wf, &a, HandleType::Output).unwrap();
        assert_eq!(
            session.begin(&mut wf, &b, HandleType::Output),
            Err(ConnectionError::AlreadyConnecting(a.clone()))
        );
        assert_eq!(
            ConnectionSession::new().begin(&mut wf, "node_missing", HandleType::Output),
            Err(ConnectionError::NodeNotFound("node_missing".to_string()))
        );
    }

    #[test]
    fn illegal_releases_are_discarded() {
        let (mut wf, a, b) = two_nodes();
        let mut session = ConnectionSession::new();

        // onto empty canvas
        session.begin(&mut wf, &a, HandleType::Output).unwrap();
        assert_eq!(session.release(&mut wf, None), ReleaseOutcome::Discarded);

        // onto itself
        session.begin(&mut wf, &a, HandleType::Output).unwrap();
        assert_eq!(
            session.release(&mut wf, Some(&HandleRef::input(&a))),
            ReleaseOutcome::Discarded
        );

        // onto an output handle
        session.begin(&mut wf, &a, HandleType::Output).unwrap();
        assert_eq!(
            session.release(&mut wf, Some(&HandleRef::output(&b))),
            ReleaseOutcome::Discarded
        );

        // duplicate
        wf.add_connection(&a, &b).unwrap();
        session.begin(&mut wf, &a, HandleType::Output).unwrap();
        assert_eq!(
            session.release(&mut wf, Some(&HandleRef::input(&b))),
            ReleaseOutcome::Discarded
        );

        assert_eq!(wf.connections().len(), 1);
        assert!(!session.is_tracking_pointer());
    }

    #[test]
    fn release_while_idle_is_harmless() {
        let (mut wf, _, b) = two_nodes();
        let mut session = ConnectionSession::new();
        assert_eq!(
            session.release(&mut wf, Some(&HandleRef::input(&b))),
            ReleaseOutcome::Discarded
        );
        assert!(wf.connections().is_empty());
        assert!(state_changes(&mut wf).is_empty());
    }

    #[test]
    fn cancel_returns_to_idle() {
        let (mut wf, a, _) = two_nodes();
        let mut session = ConnectionSession::new();
        session.begin(&mut wf, &a, HandleType::Output).unwrap();
        session.pointer_moved(&mut wf, Position::new(50.0, 50.0));
        session.cancel(&mut wf);
        assert_eq!(session.state(), &ConnectionState::Idle);
        assert_eq!(state_changes(&mut wf).last(), Some(&ConnectionState::Idle));

        session.cancel(&mut wf);
        assert!(state_changes(&mut wf).is_empty());
    }

    #[test]
    fn deleting_source_mid_drag_aborts() {
        let (mut wf, a, _) = two_nodes();
        let mut session = ConnectionSession::new();
        session.begin(&mut wf, &a, HandleType::Output).unwrap();
        wf.delete_node(&a);
        assert!(session.pointer_moved(&mut wf, Position::new(1.0, 1.0)).is_none());
        assert!(!session.is_tracking_pointer());
    }

    #[test]
    fn committed_connection_path_uses_handles() {
        let (mut wf, a, b) = two_nodes();
        let conn = wf.add_connection(&a, &b).unwrap().clone();
        assert_eq!(
            connection_path(&wf, &conn).unwrap(),
            "M 120 25 C 210 25, 210 125, 300 125"
        );
        wf.delete_node(&b);
        assert!(connection_path(&wf, &conn).is_none());
    }
}
