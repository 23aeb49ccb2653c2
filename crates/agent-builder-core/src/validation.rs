use std::collections::HashSet;

use thiserror::Error;

use crate::alias::{self, AliasError};
use crate::{HandleType, NodeKind, Workflow};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Workflow has no nodes")]
    NoNodes,

    #[error("More than one node has id {0}")]
    DuplicateNodeId(String),

    #[error("Node '{label}' has an invalid alias '{alias}': {source}")]
    InvalidAlias {
        label: String,
        alias: String,
        source: AliasError,
    },

    #[error("Connection {0} references a node that does not exist")]
    DanglingConnection(String),

    #[error("Connection {0} must run from an output handle to an input handle")]
    HandleMismatch(String),

    #[error("Connection {0} connects a node to itself")]
    SelfConnection(String),

    #[error("Nodes {0} and {1} are connected more than once")]
    DuplicateConnection(String, String),

    #[error(
        "Workflow must have at least one Start node, one Agent node, and one End node for preview."
    )]
    MissingRequiredNodes,
}

/// Structural checks on a loaded or edited workflow, returning the first
/// problem found. Cycles are allowed.
pub fn validate_workflow(workflow: &Workflow) -> Result<(), ValidationError> {
    let nodes = workflow.nodes();
    if nodes.is_empty() {
        return Err(ValidationError::NoNodes);
    }

    let mut ids = HashSet::new();
    if let Some(node) = nodes.iter().find(|n| !ids.insert(n.id.as_str())) {
        return Err(ValidationError::DuplicateNodeId(node.id.clone()));
    }

    for node in nodes {
        alias::validate_alias(nodes, &node.alias, Some(&node.id)).map_err(|source| {
            ValidationError::InvalidAlias {
                label: node.label.clone(),
                alias: node.alias.clone(),
                source,
            }
        })?;
    }

    let mut pairs = HashSet::new();
    for conn in workflow.connections() {
        if workflow.find_node(&conn.source_node_id).is_none()
            || workflow.find_node(&conn.target_node_id).is_none()
        {
            return Err(ValidationError::DanglingConnection(conn.id.clone()));
        }
        if conn.source_handle != HandleType::Output || conn.target_handle != HandleType::Input {
            return Err(ValidationError::HandleMismatch(conn.id.clone()));
        }
        if conn.source_node_id == conn.target_node_id {
            return Err(ValidationError::SelfConnection(conn.id.clone()));
        }
        if !pairs.insert((&conn.source_node_id, &conn.target_node_id)) {
            return Err(ValidationError::DuplicateConnection(
                conn.source_node_id.clone(),
                conn.target_node_id.clone(),
            ));
        }
    }

    Ok(())
}

/// The chat preview needs a start, an agent and an end node.
pub fn validate_for_preview(workflow: &Workflow) -> Result<(), ValidationError> {
    let has = |kind: NodeKind| workflow.nodes().iter().any(|n| n.kind == kind);
    if has(NodeKind::Start) && has(NodeKind::Agent) && has(NodeKind::End) {
        Ok(())
    } else {
        Err(ValidationError::MissingRequiredNodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Position;

    fn preview_ready() -> Workflow {
        let mut wf = Workflow::default();
        let s = wf.add_node(NodeKind::Start, Position::default()).id.clone();
        let a = wf.add_node(NodeKind::Agent, Position::default()).id.clone();
        let e = wf.add_node(NodeKind::End, Position::default()).id.clone();
        wf.add_connection(&s, &a).unwrap();
        wf.add_connection(&a, &e).unwrap();
        wf
    }

    #[test]
    fn test_valid_workflow() {
        assert!(validate_workflow(&preview_ready()).is_ok());
        assert!(validate_for_preview(&preview_ready()).is_ok());
    }

    #[test]
    fn test_empty_workflow() {
        assert_eq!(
            validate_workflow(&Workflow::default()),
            Err(ValidationError::NoNodes)
        );
    }

    #[test]
    fn test_preview_requires_start_agent_end() {
        let mut wf = preview_ready();
        let agent = wf
            .nodes()
            .iter()
            .find(|n| n.kind == NodeKind::Agent)
            .unwrap()
            .id
            .clone();
        wf.delete_node(&agent);
        let err = validate_for_preview(&wf).unwrap_err();
        assert_eq!(err, ValidationError::MissingRequiredNodes);
        assert!(err.to_string().starts_with("Workflow must have at least one Start node"));
    }

    #[test]
    fn test_loaded_documents_are_checked() {
        let doc = serde_json::json!({
            "nodes": [
                {"id": "n1", "type": "start", "label": "Start", "alias": "start"},
                {"id": "n2", "type": "end", "label": "End", "alias": "start"}
            ],
            "connections": []
        });
        let wf: Workflow = serde_json::from_value(doc).unwrap();
        assert!(matches!(
            validate_workflow(&wf),
            Err(ValidationError::InvalidAlias {
                source: AliasError::Duplicate,
                ..
            })
        ));

        let doc = serde_json::json!({
            "nodes": [{"id": "n1", "type": "start", "label": "Start", "alias": "start"}],
            "connections": [{"id": "c1", "sourceNodeId": "n1", "targetNodeId": "n9"}]
        });
        let wf: Workflow = serde_json::from_value(doc).unwrap();
        assert_eq!(
            validate_workflow(&wf),
            Err(ValidationError::DanglingConnection("c1".to_string()))
        );
    }

    #[test]
    fn test_loaded_documents_keep_graph_invariants() {
        let doc = serde_json::json!({
            "nodes": [
                {"id": "n1", "type": "start", "label": "Start", "alias": "start"},
                {"id": "n2", "type": "end", "label": "End", "alias": "end"}
            ],
            "connections": [{
                "id": "c1", "sourceNodeId": "n1", "targetNodeId": "n2",
                "sourceHandle": "input", "targetHandle": "output"
            }]
        });
        let wf: Workflow = serde_json::from_value(doc).unwrap();
        assert_eq!(
            validate_workflow(&wf),
            Err(ValidationError::HandleMismatch("c1".to_string()))
        );

        let doc = serde_json::json!({
            "nodes": [
                {"id": "n1", "type": "start", "label": "Start", "alias": "start"},
                {"id": "n1", "type": "end", "label": "End", "alias": "end"}
            ],
            "connections": []
        });
        let wf: Workflow = serde_json::from_value(doc).unwrap();
        assert_eq!(
            validate_workflow(&wf),
            Err(ValidationError::DuplicateNodeId("n1".to_string()))
        );
    }

    #[test]
    fn test_cycles_are_allowed() {
        let mut wf = preview_ready();
        let ids: Vec<_> = wf.nodes().iter().map(|n| n.id.clone()).collect();
        wf.add_connection(&ids[2], &ids[0]).unwrap();
        assert!(validate_workflow(&wf).is_ok());
    }
}
