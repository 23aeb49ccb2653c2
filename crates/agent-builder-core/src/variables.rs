//! Variable paths a node's configuration can reference, grouped the way the
//! variables panel lists them.

use serde::Serialize;

use crate::{Node, NodeKind, Workflow};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariableInfo {
    pub path: String,
    #[serde(rename = "type")]
    pub var_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl VariableInfo {
    fn new(path: impl Into<String>, var_type: &str, description: &str) -> Self {
        Self {
            path: path.into(),
            var_type: var_type.to_string(),
            description: Some(description.to_string()),
        }
    }

    /// The `${...}` form to paste into instructions or tool arguments.
    pub fn reference(&self) -> String {
        reference(&self.path)
    }
}

pub fn reference(path: &str) -> String {
    format!("${{{path}}}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariableGroup {
    pub title: String,
    pub icon: &'static str,
    pub variables: Vec<VariableInfo>,
}

pub fn workflow_inputs() -> Vec<VariableInfo> {
    vec![
        VariableInfo::new("workflow.input.user_request", "string", "User input message"),
        VariableInfo::new(
            "workflow.input.location",
            "string",
            "Location input (if provided)",
        ),
    ]
}

pub fn runtime_variables() -> Vec<VariableInfo> {
    vec![
        VariableInfo::new("workflow.run_id", "string", "Unique workflow execution ID"),
        VariableInfo::new("workflow.timestamp", "string", "Workflow execution timestamp"),
    ]
}

/// Output fields every node exposes, plus the MCP-specific ones.
pub fn node_outputs(node: &Node) -> Vec<VariableInfo> {
    if node.alias.is_empty() {
        return vec![];
    }
    let alias = &node.alias;
    let output_type = if node.kind == NodeKind::Agent {
        "string|object"
    } else {
        "object"
    };

    let mut outputs = vec![
        VariableInfo::new(
            format!("workflow.{alias}.output"),
            output_type,
            "Full node response",
        ),
        VariableInfo::new(
            format!("workflow.{alias}.status"),
            "string",
            "Execution status (success/failed)",
        ),
    ];
    if node.kind == NodeKind::Mcp {
        outputs.push(VariableInfo::new(
            format!("workflow.{alias}.success"),
            "boolean",
            "Tool execution success flag",
        ));
        outputs.push(VariableInfo::new(
            format!("workflow.{alias}.tool_name"),
            "string",
            "Name of the executed tool",
        ));
    }
    outputs
}

/// One variable per property of an agent's output schema.
pub fn schema_variables(node: &Node) -> Vec<VariableInfo> {
    if node.alias.is_empty() {
        return vec![];
    }
    let Some(schema) = node.agent_config().and_then(|cfg| cfg.json_schema.as_ref()) else {
        return vec![];
    };
    schema
        .properties
        .iter()
        .map(|p| VariableInfo {
            path: format!("workflow.{}.{}", node.alias, p.name),
            var_type: p.property_type.as_str().to_string(),
            description: p.description.clone(),
        })
        .collect()
}

/// Everything a configuration in `workflow` can reference.
pub fn catalog(workflow: &Workflow) -> Vec<VariableGroup> {
    let mut groups = vec![
        VariableGroup {
            title: "Workflow Inputs".to_string(),
            icon: "sign-in",
            variables: workflow_inputs(),
        },
        VariableGroup {
            title: "Runtime".to_string(),
            icon: "clock",
            variables: runtime_variables(),
        },
    ];

    for node in workflow.nodes() {
        let mut variables = node_outputs(node);
        if variables.is_empty() {
            continue;
        }
        variables.extend(schema_variables(node));
        groups.push(VariableGroup {
            title: format!("{} ({})", node.label, node.alias),
            icon: node.kind.icon(),
            variables,
        });
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{JsonSchema, OutputFormat, PropertyType, SchemaProperty};
    use crate::Position;

    #[test]
    fn fixed_groups() {
        let paths: Vec<_> = workflow_inputs().into_iter().map(|v| v.path).collect();
        assert_eq!(
            paths,
            vec!["workflow.input.user_request", "workflow.input.location"]
        );
        assert_eq!(runtime_variables()[0].path, "workflow.run_id");
        assert_eq!(runtime_variables()[1].reference(), "${workflow.timestamp}");
    }

    #[test]
    fn mcp_nodes_expose_tool_fields() {
        let mut wf = Workflow::default();
        let node = wf.add_node(NodeKind::Mcp, Position::default()).clone();
        let outputs = node_outputs(&node);
        let paths: Vec<_> = outputs.iter().map(|v| v.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "workflow.tool.output",
                "workflow.tool.status",
                "workflow.tool.success",
                "workflow.tool.tool_name"
            ]
        );
        assert_eq!(outputs[0].var_type, "object");
        assert_eq!(outputs[2].var_type, "boolean");
    }

    #[test]
    fn agent_schema_properties_become_variables() {
        let mut wf = Workflow::default();
        let id = wf.add_node(NodeKind::Agent, Position::default()).id.clone();
        wf.rename_alias(&id, "classifier").unwrap();
        let cfg = wf.agent_config_mut(&id).unwrap();
        cfg.set_output_format(OutputFormat::Json);
        cfg.set_json_schema(JsonSchema {
            name: "response_schema".to_string(),
            properties: vec![SchemaProperty::new("classification", PropertyType::Enum)],
        });

        let node = wf.find_node(&id).unwrap();
        assert_eq!(node_outputs(node)[0].var_type, "string|object");
        let schema = schema_variables(node);
        assert_eq!(schema[0].path, "workflow.classifier.classification");
        assert_eq!(schema[0].var_type, "enum");
        assert_eq!(
            schema[0].reference(),
            "${workflow.classifier.classification}"
        );
    }

    #[test]
    fn catalog_lists_every_node() {
        let mut wf = Workflow::default();
        wf.add_node(NodeKind::Start, Position::default());
        wf.add_node(NodeKind::Agent, Position::default());
        let groups = catalog(&wf);
        let titles: Vec<_> = groups.iter().map(|g| g.title.as_str()).collect();
        assert_eq!(
            titles,
            vec!["Workflow Inputs", "Runtime", "Start (start)", "Agent (agent)"]
        );
        assert_eq!(groups[3].icon, "robot");
    }
}
