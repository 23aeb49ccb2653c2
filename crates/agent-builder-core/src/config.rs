use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::NodeKind;

/// Name of the state variable that carries the user's message into an agent.
pub const USER_REQUEST_VARIABLE: &str = "user_request";

pub const DEFAULT_AGENT_INSTRUCTIONS: &str =
    "You are a helpful assistant. User request: ${user_request}";
pub const DEFAULT_AGENT_MODEL: &str = "gpt-35-turbo";
pub const DEFAULT_MCP_URL: &str = "http://localhost:8080";
pub const DEFAULT_MCP_SERVER_TIMEOUT: u32 = 30;
pub const DEFAULT_MCP_TIMEOUT: u32 = 60;
pub const DEFAULT_MCP_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_SCHEMA_NAME: &str = "response_schema";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error(
        "Cannot remove the required user_request variable. This variable is needed to pass user input to the agent."
    )]
    ProtectedVariable,

    #[error("No entry at index {index} (list has {len} entries)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Tool argument '{0}' not found")]
    UnknownArgument(String),

    #[error("Tool argument '{0}' already exists")]
    DuplicateArgument(String),

    #[error("Tool argument name cannot be empty")]
    EmptyArgumentName,
}

fn check_index(index: usize, len: usize) -> Result<(), ConfigError> {
    if index >= len {
        return Err(ConfigError::IndexOutOfRange { index, len });
    }
    Ok(())
}

// =============================================================================
// Node data union
// =============================================================================

/// Per-node configuration payload, one variant per family of node kinds.
///
/// On disk this is the canvas layout: `{"agentConfig": {..}}`,
/// `{"mcpConfig": {..}}` or `{"inputVariables": [..], "stateVariables": [..]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "NodeDataDoc", into = "NodeDataDoc")]
pub enum NodeData {
    Agent(AgentConfig),
    Mcp(McpConfig),
    Variables(VariableLists),
}

impl Default for NodeData {
    fn default() -> Self {
        NodeData::Variables(VariableLists::default())
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeDataDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    agent_config: Option<AgentConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mcp_config: Option<McpConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    input_variables: Option<Vec<Variable>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    state_variables: Option<Vec<Variable>>,
}

impl From<NodeDataDoc> for NodeData {
    fn from(doc: NodeDataDoc) -> Self {
        match (doc.agent_config, doc.mcp_config) {
            (Some(agent), _) => NodeData::Agent(agent),
            (None, Some(mcp)) => NodeData::Mcp(mcp),
            (None, None) => NodeData::Variables(VariableLists {
                input_variables: doc.input_variables.unwrap_or_default(),
                state_variables: doc.state_variables.unwrap_or_default(),
            }),
        }
    }
}

impl From<NodeData> for NodeDataDoc {
    fn from(data: NodeData) -> Self {
        let mut doc = NodeDataDoc {
            agent_config: None,
            mcp_config: None,
            input_variables: None,
            state_variables: None,
        };
        match data {
            NodeData::Agent(agent) => doc.agent_config = Some(agent),
            NodeData::Mcp(mcp) => doc.mcp_config = Some(mcp),
            NodeData::Variables(vars) => {
                doc.input_variables = Some(vars.input_variables);
                doc.state_variables = Some(vars.state_variables);
            }
        }
        doc
    }
}

impl NodeData {
    /// Fully-populated default configuration for a freshly created node.
    pub fn for_kind(kind: NodeKind, label: &str) -> Self {
        match kind {
            NodeKind::Agent => NodeData::Agent(AgentConfig::new(label)),
            NodeKind::Mcp => NodeData::Mcp(McpConfig::new(label)),
            _ => NodeData::Variables(VariableLists::default()),
        }
    }

    /// Whether this payload is the variant expected for `kind`.
    pub fn matches_kind(&self, kind: NodeKind) -> bool {
        matches!(
            (self, kind),
            (NodeData::Agent(_), NodeKind::Agent)
                | (NodeData::Mcp(_), NodeKind::Mcp)
                | (
                    NodeData::Variables(_),
                    NodeKind::Start
                        | NodeKind::End
                        | NodeKind::IfElse
                        | NodeKind::Sequential
                        | NodeKind::Parallel
                )
        )
    }

    pub fn agent(&self) -> Option<&AgentConfig> {
        match self {
            NodeData::Agent(cfg) => Some(cfg),
            _ => None,
        }
    }

    pub fn agent_mut(&mut self) -> Option<&mut AgentConfig> {
        match self {
            NodeData::Agent(cfg) => Some(cfg),
            _ => None,
        }
    }

    pub fn mcp(&self) -> Option<&McpConfig> {
        match self {
            NodeData::Mcp(cfg) => Some(cfg),
            _ => None,
        }
    }

    pub fn mcp_mut(&mut self) -> Option<&mut McpConfig> {
        match self {
            NodeData::Mcp(cfg) => Some(cfg),
            _ => None,
        }
    }

    pub fn variables_mut(&mut self) -> Option<&mut VariableLists> {
        match self {
            NodeData::Variables(vars) => Some(vars),
            _ => None,
        }
    }
}

// =============================================================================
// Variables
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub name: String,
    #[serde(rename = "type")]
    pub var_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

impl Variable {
    pub fn blank() -> Self {
        Self {
            name: String::new(),
            var_type: "string".to_string(),
            description: None,
            default_value: None,
        }
    }

    pub fn user_request() -> Self {
        Self {
            name: USER_REQUEST_VARIABLE.to_string(),
            var_type: "string".to_string(),
            description: Some("The user's input message or query".to_string()),
            default_value: None,
        }
    }

    pub fn is_protected(&self) -> bool {
        self.name == USER_REQUEST_VARIABLE
    }
}

/// Generic input/state variable lists carried by start, end and control nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableLists {
    #[serde(default)]
    pub input_variables: Vec<Variable>,
    #[serde(default)]
    pub state_variables: Vec<Variable>,
}

impl VariableLists {
    pub fn add_input_variable(&mut self) {
        self.input_variables.push(Variable::blank());
    }

    pub fn remove_input_variable(&mut self, index: usize) -> Result<Variable, ConfigError> {
        check_index(index, self.input_variables.len())?;
        Ok(self.input_variables.remove(index))
    }

    pub fn add_state_variable(&mut self) {
        self.state_variables.push(Variable::blank());
    }

    pub fn remove_state_variable(&mut self, index: usize) -> Result<Variable, ConfigError> {
        check_index(index, self.state_variables.len())?;
        Ok(self.state_variables.remove(index))
    }
}

// =============================================================================
// Agent configuration
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextMode {
    None,
    #[default]
    RecentMessages,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Widget,
    Chatkit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub enabled: bool,
}

impl Tool {
    /// Placeholder tool added from the properties panel until a real tool
    /// picker fills it in.
    pub fn placeholder() -> Self {
        Self {
            id: format!("tool_{}", short_id()),
            name: "New Tool".to_string(),
            description: Some("Tool description".to_string()),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    pub name: String,
    pub instructions: String,
    pub context: ContextMode,
    pub model: String,
    pub state_variables: Vec<Variable>,
    pub tools: Vec<Tool>,
    pub output_format: OutputFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_schema: Option<JsonSchema>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::new(NodeKind::Agent.default_label())
    }
}

impl AgentConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: DEFAULT_AGENT_INSTRUCTIONS.to_string(),
            context: ContextMode::RecentMessages,
            model: DEFAULT_AGENT_MODEL.to_string(),
            state_variables: vec![Variable::user_request()],
            tools: vec![],
            output_format: OutputFormat::Text,
            json_schema: None,
        }
    }

    /// Re-append `user_request` if a loaded config lost it. Returns `true`
    /// when the list was changed.
    pub fn ensure_user_request(&mut self) -> bool {
        if self.state_variables.iter().any(Variable::is_protected) {
            return false;
        }
        self.state_variables.push(Variable::user_request());
        true
    }

    pub fn add_state_variable(&mut self) {
        self.state_variables.push(Variable {
            description: Some(String::new()),
            ..Variable::blank()
        });
    }

    /// Remove the state variable at `index`. The `user_request` entry is
    /// protected and leaves the list untouched.
    pub fn remove_state_variable(&mut self, index: usize) -> Result<Variable, ConfigError> {
        check_index(index, self.state_variables.len())?;
        if self.state_variables[index].is_protected() {
            return Err(ConfigError::ProtectedVariable);
        }
        let removed = self.state_variables.remove(index);
        debug!(name = %removed.name, index, "removed agent state variable");
        Ok(removed)
    }

    pub fn add_tool(&mut self) -> &Tool {
        self.tools.push(Tool::placeholder());
        &self.tools[self.tools.len() - 1]
    }

    pub fn remove_tool(&mut self, index: usize) -> Result<Tool, ConfigError> {
        check_index(index, self.tools.len())?;
        Ok(self.tools.remove(index))
    }

    /// Change the output format. Leaving `json` drops the schema; entering
    /// `json` keeps whatever schema is present (set one with
    /// [`AgentConfig::set_json_schema`]).
    pub fn set_output_format(&mut self, format: OutputFormat) {
        self.output_format = format;
        if format != OutputFormat::Json {
            self.json_schema = None;
        }
    }

    pub fn set_json_schema(&mut self, schema: JsonSchema) {
        self.json_schema = Some(schema);
    }

    pub fn clear_json_schema(&mut self) {
        self.json_schema = None;
    }

    /// The schema that drives structured output, present only in json mode.
    pub fn structured_schema(&self) -> Option<&JsonSchema> {
        match self.output_format {
            OutputFormat::Json => self.json_schema.as_ref(),
            _ => None,
        }
    }
}

// =============================================================================
// JSON schema for structured agent output
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    #[default]
    String,
    Number,
    Boolean,
    Array,
    Object,
    Enum,
}

impl PropertyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::String => "string",
            PropertyType::Number => "number",
            PropertyType::Boolean => "boolean",
            PropertyType::Array => "array",
            PropertyType::Object => "object",
            PropertyType::Enum => "enum",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaProperty {
    pub name: String,
    #[serde(rename = "type")]
    pub property_type: PropertyType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub enum_values: Vec<String>,
}

impl SchemaProperty {
    pub fn new(name: impl Into<String>, property_type: PropertyType) -> Self {
        Self {
            name: name.into(),
            property_type,
            ..Default::default()
        }
    }

    /// Change the type; enum values only survive while the type stays `enum`.
    pub fn set_type(&mut self, property_type: PropertyType) {
        self.property_type = property_type;
        if property_type != PropertyType::Enum {
            self.enum_values.clear();
        }
    }

    /// Append a trimmed enum value. Blank input is ignored.
    pub fn add_enum_value(&mut self, value: &str) -> bool {
        let value = value.trim();
        if value.is_empty() {
            return false;
        }
        self.enum_values.push(value.to_string());
        true
    }

    pub fn remove_enum_value(&mut self, index: usize) -> Result<String, ConfigError> {
        check_index(index, self.enum_values.len())?;
        Ok(self.enum_values.remove(index))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonSchema {
    pub name: String,
    #[serde(default)]
    pub properties: Vec<SchemaProperty>,
}

impl Default for JsonSchema {
    fn default() -> Self {
        Self {
            name: DEFAULT_SCHEMA_NAME.to_string(),
            properties: vec![],
        }
    }
}

impl JsonSchema {
    pub fn add_property(&mut self) -> &mut SchemaProperty {
        self.properties.push(SchemaProperty::default());
        let last = self.properties.len() - 1;
        &mut self.properties[last]
    }

    pub fn remove_property(&mut self, index: usize) -> Result<SchemaProperty, ConfigError> {
        check_index(index, self.properties.len())?;
        Ok(self.properties.remove(index))
    }

    pub fn property_mut(&mut self, index: usize) -> Result<&mut SchemaProperty, ConfigError> {
        check_index(index, self.properties.len())?;
        Ok(&mut self.properties[index])
    }
}

// =============================================================================
// MCP configuration
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    Http,
    Stdio,
}

/// Connection settings for an MCP server. The two transports carry disjoint
/// field sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpServer {
    Http {
        url: String,
        timeout: u32,
    },
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl Default for McpServer {
    fn default() -> Self {
        McpServer::Http {
            url: DEFAULT_MCP_URL.to_string(),
            timeout: DEFAULT_MCP_SERVER_TIMEOUT,
        }
    }
}

impl McpServer {
    pub fn kind(&self) -> ServerKind {
        match self {
            McpServer::Http { .. } => ServerKind::Http,
            McpServer::Stdio { .. } => ServerKind::Stdio,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolArgument {
    pub key: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct McpConfig {
    pub name: String,
    pub description: String,
    pub server: McpServer,
    pub tool_name: String,
    /// Ordered arguments; keys are unique.
    pub tool_arguments: Vec<ToolArgument>,
    pub timeout: u32,
    pub retry_attempts: u32,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self::new(NodeKind::Mcp.default_label())
    }
}

impl McpConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: "MCP tool integration".to_string(),
            server: McpServer::default(),
            tool_name: String::new(),
            tool_arguments: vec![],
            timeout: DEFAULT_MCP_TIMEOUT,
            retry_attempts: DEFAULT_MCP_RETRY_ATTEMPTS,
        }
    }

    /// Switch the server transport. Switching to the current kind is a
    /// no-op; otherwise the old kind's fields are dropped and the new kind
    /// starts from its defaults.
    pub fn set_server_kind(&mut self, kind: ServerKind) {
        if self.server.kind() == kind {
            return;
        }
        self.server = match kind {
            ServerKind::Http => McpServer::default(),
            ServerKind::Stdio => McpServer::Stdio {
                command: String::new(),
                args: vec![],
            },
        };
        debug!(?kind, "switched MCP server transport");
    }

    pub fn argument(&self, key: &str) -> Option<&Value> {
        self.tool_arguments
            .iter()
            .find(|a| a.key == key)
            .map(|a| &a.value)
    }

    /// Add an empty argument named `arg_<n>`, where `n` is one past the
    /// current count (bumped further if that name is taken).
    pub fn add_tool_argument(&mut self) -> String {
        let mut n = self.tool_arguments.len() + 1;
        let mut key = format!("arg_{n}");
        while self.argument(&key).is_some() {
            n += 1;
            key = format!("arg_{n}");
        }
        self.tool_arguments.push(ToolArgument {
            key: key.clone(),
            value: Value::String(String::new()),
        });
        key
    }

    pub fn remove_tool_argument(&mut self, key: &str) -> Result<Value, ConfigError> {
        let pos = self
            .tool_arguments
            .iter()
            .position(|a| a.key == key)
            .ok_or_else(|| ConfigError::UnknownArgument(key.to_string()))?;
        Ok(self.tool_arguments.remove(pos).value)
    }

    /// Rename an argument in place, keeping its value and position.
    pub fn rename_tool_argument(&mut self, old_key: &str, new_key: &str) -> Result<(), ConfigError> {
        let new_key = new_key.trim();
        if new_key.is_empty() {
            return Err(ConfigError::EmptyArgumentName);
        }
        if old_key == new_key {
            return Ok(());
        }
        if self.argument(new_key).is_some() {
            return Err(ConfigError::DuplicateArgument(new_key.to_string()));
        }
        let arg = self
            .tool_arguments
            .iter_mut()
            .find(|a| a.key == old_key)
            .ok_or_else(|| ConfigError::UnknownArgument(old_key.to_string()))?;
        arg.key = new_key.to_string();
        Ok(())
    }

    /// Set an argument's value, appending the argument if it is new.
    pub fn set_tool_argument(&mut self, key: &str, value: Value) {
        match self.tool_arguments.iter_mut().find(|a| a.key == key) {
            Some(arg) => arg.value = value,
            None => self.tool_arguments.push(ToolArgument {
                key: key.to_string(),
                value,
            }),
        }
    }

    /// Arguments as a JSON object, in insertion order where the map preserves it.
    pub fn arguments_object(&self) -> serde_json::Map<String, Value> {
        self.tool_arguments
            .iter()
            .map(|a| (a.key.clone(), a.value.clone()))
            .collect()
    }
}

/// Nine lowercase alphanumeric characters, used as the random part of
/// generated ids (`node_`, `conn_`, `tool_`, `msg_`).
pub fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..9].to_string()
}
