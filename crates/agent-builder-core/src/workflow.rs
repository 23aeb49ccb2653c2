use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::alias::{self, AliasError};
use crate::config::{AgentConfig, McpConfig, NodeData, VariableLists, short_id};
use crate::connection::ConnectionState;

/// Nominal node footprint used when handle positions are derived from the
/// model rather than from rendered geometry.
pub const NODE_WIDTH: f32 = 120.0;
pub const NODE_HEIGHT: f32 = 50.0;

/// Observed drift beyond this distance (per axis) makes the renderer snap
/// back to the stored position.
pub const DRIFT_TOLERANCE: f32 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    Start,
    Agent,
    End,
    Mcp,
    IfElse,
    Sequential,
    Parallel,
}

impl NodeKind {
    pub const ALL: [NodeKind; 7] = [
        NodeKind::Start,
        NodeKind::Agent,
        NodeKind::End,
        NodeKind::Mcp,
        NodeKind::IfElse,
        NodeKind::Sequential,
        NodeKind::Parallel,
    ];

    /// Alias base used when a kind has nothing better to offer.
    pub const FALLBACK_ALIAS_BASE: &'static str = "node";

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Start => "start",
            NodeKind::Agent => "agent",
            NodeKind::End => "end",
            NodeKind::Mcp => "mcp",
            NodeKind::IfElse => "if-else",
            NodeKind::Sequential => "sequential",
            NodeKind::Parallel => "parallel",
        }
    }

    pub fn default_label(&self) -> &'static str {
        match self {
            NodeKind::Start => "Start",
            NodeKind::Agent => "Agent",
            NodeKind::End => "End",
            NodeKind::Mcp => "MCP",
            NodeKind::IfElse => "If / else",
            NodeKind::Sequential => "Sequential",
            NodeKind::Parallel => "Parallel",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            NodeKind::Start => "play-circle",
            NodeKind::Agent => "robot",
            NodeKind::End => "stop-circle",
            NodeKind::Mcp => "lightning",
            NodeKind::IfElse => "flow-arrow",
            NodeKind::Sequential => "minus",
            NodeKind::Parallel => "list",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            NodeKind::Start => "Start workflow execution",
            NodeKind::Agent => "AI agent processing node",
            NodeKind::End => "End workflow execution",
            NodeKind::Mcp => "Model Context Protocol integration",
            NodeKind::IfElse => "Conditional logic branching",
            NodeKind::Sequential => "Execute tasks in sequence",
            NodeKind::Parallel => "Execute tasks in parallel",
        }
    }

    pub fn alias_base(&self) -> &'static str {
        match self {
            NodeKind::Start => "start",
            NodeKind::Agent => "agent",
            NodeKind::End => "end",
            NodeKind::Mcp => "tool",
            NodeKind::IfElse => "condition",
            NodeKind::Sequential => "sequence",
            NodeKind::Parallel => "parallel",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandleType {
    Input,
    Output,
}

/// A specific attachment point: one handle on one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandleRef {
    pub node_id: String,
    pub handle_type: HandleType,
}

impl HandleRef {
    pub fn output(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            handle_type: HandleType::Output,
        }
    }

    pub fn input(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            handle_type: HandleType::Input,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub label: String,
    pub alias: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub data: NodeData,
}

impl Node {
    /// Where the given handle sits, derived from the stored position and the
    /// nominal node size: inputs on the left edge, outputs on the right.
    pub fn handle_position(&self, handle: HandleType) -> Position {
        let dx = match handle {
            HandleType::Output => NODE_WIDTH,
            HandleType::Input => 0.0,
        };
        Position::new(self.position.x + dx, self.position.y + NODE_HEIGHT / 2.0)
    }

    pub fn agent_config(&self) -> Option<&AgentConfig> {
        self.data.agent()
    }

    pub fn mcp_config(&self) -> Option<&McpConfig> {
        self.data.mcp()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: String,
    pub source_node_id: String,
    pub target_node_id: String,
    #[serde(default = "output_handle")]
    pub source_handle: HandleType,
    #[serde(default = "input_handle")]
    pub target_handle: HandleType,
}

fn output_handle() -> HandleType {
    HandleType::Output
}

fn input_handle() -> HandleType {
    HandleType::Input
}

impl Connection {
    pub fn new(source_node_id: impl Into<String>, target_node_id: impl Into<String>) -> Self {
        Self {
            id: format!("conn_{}", short_id()),
            source_node_id: source_node_id.into(),
            target_node_id: target_node_id.into(),
            source_handle: HandleType::Output,
            target_handle: HandleType::Input,
        }
    }

    pub fn touches(&self, node_id: &str) -> bool {
        self.source_node_id == node_id || self.target_node_id == node_id
    }
}

/// At most one thing is selected at a time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Selection {
    #[default]
    None,
    Node(String),
    Connection(String),
}

/// Notifications for the presentation layer, drained with
/// [`Workflow::drain_events`].
#[derive(Debug, Clone, PartialEq)]
pub enum GraphEvent {
    NodeSelect { node_id: String },
    ConnectionSelect { connection_id: String },
    NodeUpdate { node_id: String },
    ConnectionCreated(Connection),
    ConnectionStateChange(ConnectionState),
    DeselectAll,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("Node {0} not found")]
    NodeNotFound(String),

    #[error("Cannot connect a node to itself")]
    SelfLoop,

    #[error("Connections must run from an output handle to an input handle")]
    HandleMismatch,

    #[error("Nodes {source_id} and {target_id} are already connected")]
    DuplicateConnection {
        source_id: String,
        target_id: String,
    },

    #[error("Node {0} is not a {1} node")]
    WrongKind(String, &'static str),

    #[error(transparent)]
    Alias(#[from] AliasError),
}

/// The canvas graph: the single owner of nodes, connections and selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default = "default_workflow_name")]
    pub name: String,
    #[serde(default)]
    nodes: Vec<Node>,
    #[serde(default)]
    connections: Vec<Connection>,
    #[serde(skip)]
    selection: Selection,
    #[serde(skip)]
    events: Vec<GraphEvent>,
}

fn default_workflow_name() -> String {
    "New Workflow".to_string()
}

impl Default for Workflow {
    fn default() -> Self {
        Self {
            name: default_workflow_name(),
            nodes: vec![],
            connections: vec![],
            selection: Selection::None,
            events: vec![],
        }
    }
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn find_node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn find_node_by_alias(&self, alias: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.alias == alias)
    }

    pub fn find_connection(&self, id: &str) -> Option<&Connection> {
        self.connections.iter().find(|c| c.id == id)
    }

    fn find_node_mut(&mut self, id: &str) -> Result<&mut Node, GraphError> {
        self.nodes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))
    }

    /// Events produced since the last drain, oldest first.
    pub fn drain_events(&mut self) -> Vec<GraphEvent> {
        std::mem::take(&mut self.events)
    }

    pub(crate) fn emit(&mut self, event: GraphEvent) {
        self.events.push(event);
    }

    // -------------------------------------------------------------------------
    // Nodes
    // -------------------------------------------------------------------------

    /// Create a node of `kind` with its default label, icon and
    /// configuration plus a fresh unique alias.
    pub fn add_node(&mut self, kind: NodeKind, position: Position) -> &Node {
        let label = kind.default_label();
        let node = Node {
            id: format!("node_{}", short_id()),
            kind,
            label: label.to_string(),
            alias: alias::generate_unique_alias(&self.nodes, kind),
            icon: kind.icon().to_string(),
            position,
            data: NodeData::for_kind(kind, label),
        };
        info!(id = %node.id, alias = %node.alias, kind = kind.as_str(), "added node");
        self.nodes.push(node);
        &self.nodes[self.nodes.len() - 1]
    }

    /// Replace the node with the same id wholesale. Unknown ids are ignored.
    pub fn update_node(&mut self, updated: Node) {
        let Some(slot) = self.nodes.iter_mut().find(|n| n.id == updated.id) else {
            debug!(id = %updated.id, "update for unknown node ignored");
            return;
        };
        let node_id = updated.id.clone();
        *slot = updated;
        self.emit(GraphEvent::NodeUpdate { node_id });
    }

    /// Remove a node together with every connection that touches it.
    pub fn delete_node(&mut self, id: &str) -> Option<Node> {
        let pos = self.nodes.iter().position(|n| n.id == id)?;
        let node = self.nodes.remove(pos);

        let before = self.connections.len();
        self.connections.retain(|c| !c.touches(id));
        let dropped = before - self.connections.len();

        let selection_gone = match &self.selection {
            Selection::Node(selected) => selected == id,
            Selection::Connection(selected) => !self.connections.iter().any(|c| &c.id == selected),
            Selection::None => false,
        };
        if selection_gone {
            self.selection = Selection::None;
        }

        info!(id, alias = %node.alias, dropped_connections = dropped, "deleted node");
        Some(node)
    }

    /// Record a position as authoritative, e.g. at the end of a drag.
    pub fn move_node(&mut self, id: &str, position: Position) -> Result<(), GraphError> {
        self.find_node_mut(id)?.position = position;
        Ok(())
    }

    /// Validate and apply an alias edit. The candidate is trimmed and
    /// lowercased first; on failure the previous alias is kept.
    pub fn rename_alias(&mut self, id: &str, candidate: &str) -> Result<(), GraphError> {
        let clean = candidate.trim().to_lowercase();
        if self.find_node(id).is_none() {
            return Err(GraphError::NodeNotFound(id.to_string()));
        }
        alias::validate_alias(&self.nodes, &clean, Some(id))?;
        let node = self.find_node_mut(id)?;
        debug!(id, from = %node.alias, to = %clean, "renamed alias");
        node.alias = clean;
        self.emit(GraphEvent::NodeUpdate {
            node_id: id.to_string(),
        });
        Ok(())
    }

    /// Rename an agent or MCP node: the config name takes `name` verbatim and
    /// the canvas label follows it, falling back to the kind's default label
    /// when `name` is blank.
    pub fn rename_label(&mut self, id: &str, name: &str) -> Result<(), GraphError> {
        let node = self.find_node_mut(id)?;
        match node.kind {
            NodeKind::Agent => ensure_agent_data(node).name = name.to_string(),
            NodeKind::Mcp => ensure_mcp_data(node).name = name.to_string(),
            _ => {}
        }
        let trimmed = name.trim();
        node.label = if trimmed.is_empty() {
            node.kind.default_label().to_string()
        } else {
            trimmed.to_string()
        };
        self.emit(GraphEvent::NodeUpdate {
            node_id: id.to_string(),
        });
        Ok(())
    }

    /// Mutable access to an agent node's configuration, installing defaults
    /// first if it has none.
    pub fn agent_config_mut(&mut self, id: &str) -> Result<&mut AgentConfig, GraphError> {
        let node = self.find_node_mut(id)?;
        if node.kind != NodeKind::Agent {
            return Err(GraphError::WrongKind(id.to_string(), "agent"));
        }
        Ok(ensure_agent_data(node))
    }

    /// Mutable access to an MCP node's configuration, installing defaults
    /// first if it has none.
    pub fn mcp_config_mut(&mut self, id: &str) -> Result<&mut McpConfig, GraphError> {
        let node = self.find_node_mut(id)?;
        if node.kind != NodeKind::Mcp {
            return Err(GraphError::WrongKind(id.to_string(), "mcp"));
        }
        Ok(ensure_mcp_data(node))
    }

    /// Mutable access to a node's generic variable lists.
    pub fn variables_mut(&mut self, id: &str) -> Result<&mut VariableLists, GraphError> {
        self.find_node_mut(id)?
            .data
            .variables_mut()
            .ok_or_else(|| GraphError::WrongKind(id.to_string(), "variable-carrying"))
    }

    // -------------------------------------------------------------------------
    // Connections
    // -------------------------------------------------------------------------

    /// Whether a connection from `from` to `to` would be legal.
    pub fn can_connect(&self, from: &HandleRef, to: &HandleRef) -> bool {
        self.check_connection(from, to).is_ok()
    }

    fn check_connection(&self, from: &HandleRef, to: &HandleRef) -> Result<(), GraphError> {
        if from.node_id == to.node_id {
            return Err(GraphError::SelfLoop);
        }
        if from.handle_type != HandleType::Output || to.handle_type != HandleType::Input {
            return Err(GraphError::HandleMismatch);
        }
        let exists = self
            .connections
            .iter()
            .any(|c| c.source_node_id == from.node_id && c.target_node_id == to.node_id);
        if exists {
            return Err(GraphError::DuplicateConnection {
                source_id: from.node_id.clone(),
                target_id: to.node_id.clone(),
            });
        }
        Ok(())
    }

    /// Connect `source`'s output to `target`'s input.
    pub fn add_connection(&mut self, source: &str, target: &str) -> Result<&Connection, GraphError> {
        self.accept_connection(Connection::new(source, target))
    }

    /// Accept a connection created elsewhere (e.g. by the connection
    /// session or an external creation event) after checking it.
    pub fn accept_connection(&mut self, connection: Connection) -> Result<&Connection, GraphError> {
        for id in [&connection.source_node_id, &connection.target_node_id] {
            if self.find_node(id).is_none() {
                return Err(GraphError::NodeNotFound(id.clone()));
            }
        }
        let from = HandleRef {
            node_id: connection.source_node_id.clone(),
            handle_type: connection.source_handle,
        };
        let to = HandleRef {
            node_id: connection.target_node_id.clone(),
            handle_type: connection.target_handle,
        };
        self.check_connection(&from, &to)?;

        info!(
            id = %connection.id,
            source = %connection.source_node_id,
            target = %connection.target_node_id,
            "added connection"
        );
        self.emit(GraphEvent::ConnectionCreated(connection.clone()));
        self.connections.push(connection);
        Ok(&self.connections[self.connections.len() - 1])
    }

    pub fn delete_connection(&mut self, id: &str) -> Option<Connection> {
        let pos = self.connections.iter().position(|c| c.id == id)?;
        let removed = self.connections.remove(pos);
        if self.selection == Selection::Connection(id.to_string()) {
            self.selection = Selection::None;
        }
        debug!(id, "deleted connection");
        Some(removed)
    }

    /// Ids of nodes this node feeds into, in connection order.
    pub fn next_of(&self, id: &str) -> Vec<&str> {
        self.connections
            .iter()
            .filter(|c| c.source_node_id == id)
            .map(|c| c.target_node_id.as_str())
            .collect()
    }

    /// Ids of nodes feeding into this node, in connection order.
    pub fn dependencies_of(&self, id: &str) -> Vec<&str> {
        self.connections
            .iter()
            .filter(|c| c.target_node_id == id)
            .map(|c| c.source_node_id.as_str())
            .collect()
    }

    // -------------------------------------------------------------------------
    // Selection
    // -------------------------------------------------------------------------

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn selected_node(&self) -> Option<&Node> {
        match &self.selection {
            Selection::Node(id) => self.find_node(id),
            _ => None,
        }
    }

    pub fn selected_connection(&self) -> Option<&Connection> {
        match &self.selection {
            Selection::Connection(id) => self.find_connection(id),
            _ => None,
        }
    }

    /// Select a node, clearing any connection selection, and make sure its
    /// configuration is initialized.
    pub fn select_node(&mut self, id: &str) -> Result<(), GraphError> {
        let node = self.find_node_mut(id)?;
        match node.kind {
            NodeKind::Agent => {
                ensure_agent_data(node);
            }
            NodeKind::Mcp => {
                ensure_mcp_data(node);
            }
            _ => {}
        }
        self.selection = Selection::Node(id.to_string());
        self.emit(GraphEvent::NodeSelect {
            node_id: id.to_string(),
        });
        Ok(())
    }

    /// Select a connection, clearing any node selection. Unknown ids are
    /// ignored.
    pub fn select_connection(&mut self, id: &str) -> bool {
        if self.find_connection(id).is_none() {
            return false;
        }
        self.selection = Selection::Connection(id.to_string());
        self.emit(GraphEvent::ConnectionSelect {
            connection_id: id.to_string(),
        });
        true
    }

    pub fn deselect_all(&mut self) {
        self.selection = Selection::None;
        self.emit(GraphEvent::DeselectAll);
    }

    /// Bring every node's payload in line with its kind. Used after loading
    /// a document whose nodes may lack configuration.
    pub fn ensure_all_data(&mut self) {
        for node in &mut self.nodes {
            match node.kind {
                NodeKind::Agent => {
                    ensure_agent_data(node);
                }
                NodeKind::Mcp => {
                    ensure_mcp_data(node);
                }
                _ => {
                    if !node.data.matches_kind(node.kind) {
                        node.data = NodeData::default();
                    }
                }
            }
        }
    }
}

/// Install the default agent configuration if `node` has none, and make
/// sure `user_request` is among its state variables. Idempotent.
pub fn ensure_agent_data(node: &mut Node) -> &mut AgentConfig {
    if node.data.agent().is_none() {
        node.data = NodeData::Agent(AgentConfig::new(node.label.clone()));
    }
    let NodeData::Agent(cfg) = &mut node.data else {
        unreachable!("agent data installed above");
    };
    cfg.ensure_user_request();
    cfg
}

/// Install the default MCP configuration if `node` has none. Idempotent.
pub fn ensure_mcp_data(node: &mut Node) -> &mut McpConfig {
    if node.data.mcp().is_none() {
        node.data = NodeData::Mcp(McpConfig::new(node.label.clone()));
    }
    let NodeData::Mcp(cfg) = &mut node.data else {
        unreachable!("mcp data installed above");
    };
    cfg
}

/// Decide whether the renderer must snap a node back after a drag.
///
/// The stored position is authoritative: when the observed position drifts
/// more than [`DRIFT_TOLERANCE`] on either axis, the model position is
/// returned for the renderer to apply; otherwise `None`.
pub fn reconcile(model: Position, observed: Position) -> Option<Position> {
    let dx = (observed.x - model.x).abs();
    let dy = (observed.y - model.y).abs();
    (dx > DRIFT_TOLERANCE || dy > DRIFT_TOLERANCE).then_some(model)
}
