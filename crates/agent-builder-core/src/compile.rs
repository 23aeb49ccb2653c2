//! Lowering of the canvas graph into an executable workflow definition.
//!
//! Compilation is a pure function of the nodes, connections and user input:
//! the inputs are never mutated and compiling twice yields equal output.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::{
    AgentConfig, DEFAULT_AGENT_MODEL, DEFAULT_MCP_SERVER_TIMEOUT, DEFAULT_MCP_TIMEOUT,
    DEFAULT_MCP_URL, JsonSchema, McpConfig, McpServer, PropertyType, USER_REQUEST_VARIABLE,
};
use crate::{Connection, Node, NodeKind, Workflow};

pub const AGENT_PROVIDER: &str = "azure_openai";
pub const AGENT_TEMPERATURE: f64 = 0.7;
pub const AGENT_MAX_TOKENS: u32 = 500;
pub const AGENT_TIMEOUT: u32 = 60;

/// Tool invoked by an MCP node whose tool name was left blank.
pub const FALLBACK_TOOL_NAME: &str = "get_oauth_token";

const FALLBACK_PROMPT: &str = "You are a helpful AI assistant. User request: ${workflow.input.user_request}";
const FALLBACK_SYSTEM_PROMPT: &str = "You are a helpful AI assistant with expertise across multiple domains. Provide detailed, accurate, and practical responses to user queries.";

/// Appended to agent instructions when the agent must answer with a JSON
/// object matching its schema.
pub const JSON_OUTPUT_DIRECTIVE: &str = "\n\nIMPORTANT: You must respond with a valid JSON object that matches the specified schema exactly. Do not include any text outside the JSON object.";

static BARE_VARIABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{(\w+)\}").expect("valid variable regex"));

/// First path segments under `workflow.` that address run inputs, agent
/// state and runtime values rather than a node.
const WORKFLOW_SCOPES: [&str; 4] = ["input", "state", "run_id", "timestamp"];

static NODE_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{workflow\.(\w+)((?:\.\w+)*)\}").expect("valid reference regex")
});

// =============================================================================
// Options
// =============================================================================

/// How `${workflow.<alias>...}` references are emitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AliasResolution {
    /// Emit references verbatim; the execution backend resolves aliases.
    #[default]
    Preserve,
    /// Replace the alias segment with the node id.
    NodeIds,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompileOptions {
    pub workflow_id: String,
    pub name: String,
    pub description: String,
    pub alias_resolution: AliasResolution,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            workflow_id: "canvas_workflow".to_string(),
            name: "Canvas Workflow".to_string(),
            description: "Workflow generated from visual canvas designer".to_string(),
            alias_resolution: AliasResolution::Preserve,
        }
    }
}

impl CompileOptions {
    /// Identity used for requests sent from the chat preview.
    pub fn preview() -> Self {
        Self {
            workflow_id: "canvas_preview_workflow".to_string(),
            description: "Interactive workflow generated from visual canvas designer".to_string(),
            ..Default::default()
        }
    }
}

// =============================================================================
// Output types
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub definition: WorkflowDefinition,
    pub input_data: InputData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputData {
    pub user_request: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub nodes: Vec<CompiledNode>,
}

impl WorkflowDefinition {
    pub fn node(&self, id: &str) -> Option<&CompiledNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledNode {
    pub id: String,
    /// Backend node type; `mcp` nodes are emitted as `mcp_tool`.
    #[serde(rename = "type")]
    pub node_type: String,
    pub name: String,
    pub alias: String,
    pub config: NodeConfig,
    pub next: Vec<String>,
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_mapping: Option<OutputMapping>,
}

/// Per-type node configuration as the execution backend expects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeConfig {
    Agent(AgentNodeConfig),
    Mcp(McpNodeConfig),
    End(EndNodeConfig),
    Start(StartNodeConfig),
    Empty(EmptyConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartNodeConfig {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndNodeConfig {
    pub name: String,
    pub description: String,
    pub collect_outputs: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentNodeConfig {
    pub provider: String,
    pub model: String,
    pub prompt: String,
    pub system_prompt: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub format_type: String,
}

impl ResponseFormat {
    pub fn json_object() -> Self {
        Self {
            format_type: "json_object".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpNodeConfig {
    pub server: ServerSpec,
    pub tool_name: String,
    pub tool_arguments: serde_json::Map<String, Value>,
    pub timeout: u32,
    pub retry_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerSpec {
    Http {
        url: String,
        timeout: u32,
    },
    Stdio {
        command: String,
        args: Vec<String>,
        timeout: u32,
    },
}

/// Serializes as `{}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmptyConfig {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputMapping {
    pub node_id: String,
    pub output_variables: BTreeMap<String, OutputVariable>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputVariable {
    pub path: String,
    #[serde(rename = "type")]
    pub property_type: PropertyType,
    pub description: String,
}

// =============================================================================
// Compilation
// =============================================================================

/// Compile a workflow's graph with the given user input.
pub fn compile_workflow(
    workflow: &Workflow,
    user_input: &str,
    options: &CompileOptions,
) -> ExecutionRequest {
    compile(workflow.nodes(), workflow.connections(), user_input, options)
}

/// Lower `nodes` and `connections` into an execution request.
///
/// Connections whose endpoints are not among `nodes` are skipped. Cycles are
/// not rejected.
pub fn compile(
    nodes: &[Node],
    connections: &[Connection],
    user_input: &str,
    options: &CompileOptions,
) -> ExecutionRequest {
    let aliases = AliasMap::new(nodes);
    let known: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
    let live: Vec<&Connection> = connections
        .iter()
        .filter(|c| {
            known.contains(c.source_node_id.as_str()) && known.contains(c.target_node_id.as_str())
        })
        .collect();
    if live.len() != connections.len() {
        debug!(
            skipped = connections.len() - live.len(),
            "skipped connections with dangling endpoints"
        );
    }

    let resolver = Resolver {
        aliases: &aliases,
        mode: options.alias_resolution,
    };

    let compiled: Vec<CompiledNode> = nodes
        .iter()
        .map(|node| {
            let (config, output_mapping) = node_config(node, &resolver);
            CompiledNode {
                id: node.id.clone(),
                node_type: backend_type(node.kind).to_string(),
                name: node.label.clone(),
                alias: node.alias.clone(),
                config,
                next: live
                    .iter()
                    .filter(|c| c.source_node_id == node.id)
                    .map(|c| c.target_node_id.clone())
                    .collect(),
                dependencies: live
                    .iter()
                    .filter(|c| c.target_node_id == node.id)
                    .map(|c| c.source_node_id.clone())
                    .collect(),
                output_mapping,
            }
        })
        .collect();

    info!(
        workflow_id = %options.workflow_id,
        nodes = compiled.len(),
        connections = live.len(),
        aliases = aliases.len(),
        "compiled workflow"
    );

    ExecutionRequest {
        definition: WorkflowDefinition {
            id: options.workflow_id.clone(),
            name: options.name.clone(),
            description: options.description.clone(),
            nodes: compiled,
        },
        input_data: InputData {
            user_request: user_input.to_string(),
        },
        run_id: None,
    }
}

fn backend_type(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Mcp => "mcp_tool",
        other => other.as_str(),
    }
}

fn node_config(node: &Node, resolver: &Resolver<'_>) -> (NodeConfig, Option<OutputMapping>) {
    match node.kind {
        NodeKind::Start => (
            NodeConfig::Start(StartNodeConfig {
                name: node.label.clone(),
                description: "Start workflow execution".to_string(),
            }),
            None,
        ),
        NodeKind::End => (
            NodeConfig::End(EndNodeConfig {
                name: node.label.clone(),
                description: "End workflow execution".to_string(),
                collect_outputs: true,
            }),
            None,
        ),
        NodeKind::Agent => match node.agent_config() {
            Some(cfg) => {
                let mapping = cfg
                    .structured_schema()
                    .map(|schema| output_mapping(schema, &node.id));
                (NodeConfig::Agent(agent_config(cfg, resolver)), mapping)
            }
            None => (NodeConfig::Empty(EmptyConfig {}), None),
        },
        NodeKind::Mcp => match node.mcp_config() {
            Some(cfg) => (NodeConfig::Mcp(mcp_config(cfg, resolver)), None),
            None => (NodeConfig::Empty(EmptyConfig {}), None),
        },
        NodeKind::IfElse | NodeKind::Sequential | NodeKind::Parallel => {
            (NodeConfig::Empty(EmptyConfig {}), None)
        }
    }
}

fn agent_config(cfg: &AgentConfig, resolver: &Resolver<'_>) -> AgentNodeConfig {
    let structured = cfg.structured_schema().is_some();
    let instructions = |fallback: &str| {
        let text = if cfg.instructions.is_empty() {
            fallback
        } else {
            cfg.instructions.as_str()
        };
        resolver.text(&process_instructions(text, structured))
    };

    AgentNodeConfig {
        provider: AGENT_PROVIDER.to_string(),
        model: if cfg.model.is_empty() {
            DEFAULT_AGENT_MODEL.to_string()
        } else {
            cfg.model.clone()
        },
        prompt: instructions(FALLBACK_PROMPT),
        system_prompt: instructions(FALLBACK_SYSTEM_PROMPT),
        temperature: AGENT_TEMPERATURE,
        max_tokens: AGENT_MAX_TOKENS,
        timeout: AGENT_TIMEOUT,
        response_format: structured.then(ResponseFormat::json_object),
    }
}

fn mcp_config(cfg: &McpConfig, resolver: &Resolver<'_>) -> McpNodeConfig {
    let server = match &cfg.server {
        McpServer::Http { url, timeout } => ServerSpec::Http {
            url: if url.is_empty() {
                DEFAULT_MCP_URL.to_string()
            } else {
                url.clone()
            },
            timeout: non_zero_or(*timeout, DEFAULT_MCP_SERVER_TIMEOUT),
        },
        McpServer::Stdio { command, args } => ServerSpec::Stdio {
            command: command.clone(),
            args: args.clone(),
            timeout: DEFAULT_MCP_SERVER_TIMEOUT,
        },
    };

    let tool_arguments = cfg
        .tool_arguments
        .iter()
        .map(|arg| (arg.key.clone(), resolver.value(&arg.value)))
        .collect();

    McpNodeConfig {
        server,
        tool_name: if cfg.tool_name.is_empty() {
            FALLBACK_TOOL_NAME.to_string()
        } else {
            cfg.tool_name.clone()
        },
        tool_arguments,
        timeout: non_zero_or(cfg.timeout, DEFAULT_MCP_TIMEOUT),
        retry_attempts: cfg.retry_attempts,
    }
}

fn non_zero_or(value: u32, fallback: u32) -> u32 {
    if value == 0 { fallback } else { value }
}

/// Map each schema property to its backend output path.
pub fn output_mapping(schema: &JsonSchema, node_id: &str) -> OutputMapping {
    let output_variables = schema
        .properties
        .iter()
        .filter(|p| !p.name.is_empty())
        .map(|p| {
            let description = match p.description.as_deref() {
                Some(d) if !d.is_empty() => d.to_string(),
                _ => format!("Output property: {}", p.name),
            };
            (
                p.name.clone(),
                OutputVariable {
                    path: format!("nodes.{node_id}.output.{}", p.name),
                    property_type: p.property_type,
                    description,
                },
            )
        })
        .collect();

    OutputMapping {
        node_id: node_id.to_string(),
        output_variables,
    }
}

/// Rewrite bare `${name}` references in agent instructions.
///
/// `${user_request}` becomes `${workflow.input.user_request}` and any other
/// single-word name becomes `${workflow.state.<name>}`. Dotted paths are left
/// alone. With `structured` set the strict-JSON directive is appended.
pub fn process_instructions(instructions: &str, structured: bool) -> String {
    if instructions.is_empty() {
        return String::new();
    }
    let mut out = BARE_VARIABLE
        .replace_all(instructions, |caps: &Captures| match &caps[1] {
            USER_REQUEST_VARIABLE => "${workflow.input.user_request}".to_string(),
            name => format!("${{workflow.state.{name}}}"),
        })
        .into_owned();
    if structured {
        out.push_str(JSON_OUTPUT_DIRECTIVE);
    }
    out
}

// =============================================================================
// Alias references
// =============================================================================

/// Alias to node id, built from the nodes being compiled.
#[derive(Debug, Default)]
pub struct AliasMap(HashMap<String, String>);

impl AliasMap {
    pub fn new(nodes: &[Node]) -> Self {
        Self(
            nodes
                .iter()
                .filter(|n| !n.alias.is_empty())
                .map(|n| (n.alias.clone(), n.id.clone()))
                .collect(),
        )
    }

    pub fn node_id(&self, alias: &str) -> Option<&str> {
        self.0.get(alias).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

struct Resolver<'a> {
    aliases: &'a AliasMap,
    mode: AliasResolution,
}

impl Resolver<'_> {
    fn text(&self, text: &str) -> String {
        match self.mode {
            AliasResolution::Preserve => text.to_string(),
            AliasResolution::NodeIds => resolve_alias_references(text, self.aliases),
        }
    }

    fn value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.text(s)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.value(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

/// Replace the alias in `${workflow.<alias>...}` references with the node
/// id. Unknown aliases and the input, state and runtime scopes are left as
/// written, even when a node carries one of those names as its alias.
pub fn resolve_alias_references(text: &str, aliases: &AliasMap) -> String {
    NODE_REFERENCE
        .replace_all(text, |caps: &Captures| {
            let head = &caps[1];
            if WORKFLOW_SCOPES.contains(&head) {
                return caps[0].to_string();
            }
            match aliases.node_id(head) {
                Some(id) => format!("${{workflow.{id}{}}}", &caps[2]),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}
