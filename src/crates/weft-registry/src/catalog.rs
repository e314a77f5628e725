//! Connector capability catalog
//!
//! Declarative description of every connector the platform knows: operations,
//! parameter schemas, required scopes, lifecycle badges, and hints the
//! dispatcher uses (timeouts, attempt caps, concurrency). The built-in
//! catalog covers the `core` control connector plus the first-party app
//! connectors; hosts extend it with their own definitions before building a
//! snapshot.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use weft_graph::NodeRole;

/// Connector lifecycle badge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Alpha,
    Beta,
    Stable,
    Deprecated,
    Sunset,
}

/// Role of an operation within its connector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpRole {
    Action,
    Trigger,
}

impl OpRole {
    /// Operation role a node role resolves against: triggers resolve trigger
    /// operations, everything else resolves actions
    pub fn for_node_role(role: NodeRole) -> Self {
        match role {
            NodeRole::Trigger => Self::Trigger,
            NodeRole::Action | NodeRole::Transform | NodeRole::Condition => Self::Action,
        }
    }
}

/// One operation a connector declares
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationDef {
    /// Operation id, unique within the connector
    pub id: String,
    /// Action or trigger
    pub role: OpRole,
    /// Human description
    pub description: String,
    /// JSON Schema of the parameter map
    pub params_schema: Value,
    /// Default parameter values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults: Option<Map<String, Value>>,
    /// OAuth scopes the connection must grant
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_scopes: Vec<String>,
    /// Whether the operation needs credentials at all
    #[serde(default)]
    pub requires_auth: bool,
    /// Whether multiple predecessors may feed this operation
    #[serde(default)]
    pub accepts_fan_in: bool,
    /// Advisory rate limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_per_min: Option<u32>,
    /// Advisory per-call cost
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_hint_usd: Option<f64>,
    /// Per-attempt deadline
    #[serde(default = "OperationDef::default_timeout_secs")]
    pub timeout_secs: u64,
    /// Attempt cap for retryable failures
    #[serde(default = "OperationDef::default_max_attempts")]
    pub max_attempts: u32,
    /// JSON Schema of the output artifact
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    /// Source handles the operation emits (condition operations)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub handles: Vec<String>,
}

impl OperationDef {
    fn default_timeout_secs() -> u64 {
        60
    }

    fn default_max_attempts() -> u32 {
        3
    }

    /// Minimal action definition; callers chain the field they need
    pub fn action(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: OpRole::Action,
            description: description.into(),
            params_schema: json!({ "type": "object", "properties": {} }),
            defaults: None,
            required_scopes: Vec::new(),
            requires_auth: false,
            accepts_fan_in: false,
            rate_limit_per_min: None,
            cost_hint_usd: None,
            timeout_secs: Self::default_timeout_secs(),
            max_attempts: Self::default_max_attempts(),
            output_schema: None,
            handles: Vec::new(),
        }
    }

    /// Minimal trigger definition
    pub fn trigger(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            role: OpRole::Trigger,
            ..Self::action(id, description)
        }
    }

    /// Replace the parameter schema
    pub fn with_params_schema(mut self, schema: Value) -> Self {
        self.params_schema = schema;
        self
    }

    /// Replace the output schema
    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Mark the operation as requiring credentials with these scopes
    pub fn with_auth(mut self, scopes: &[&str]) -> Self {
        self.requires_auth = true;
        self.required_scopes = scopes.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Set default parameter values
    pub fn with_defaults(mut self, defaults: Map<String, Value>) -> Self {
        self.defaults = Some(defaults);
        self
    }

    /// Declare emitted source handles
    pub fn with_handles(mut self, handles: &[&str]) -> Self {
        self.handles = handles.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Allow fan-in into nodes running this operation
    pub fn with_fan_in(mut self) -> Self {
        self.accepts_fan_in = true;
        self
    }

    /// Override the per-attempt deadline
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Override the attempt cap
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Required parameter names from the schema's `required` array
    pub fn required_params(&self) -> Vec<String> {
        self.params_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Declared JSON type of one output field
    pub fn output_field_type(&self, field: &str) -> Option<String> {
        self.output_schema
            .as_ref()?
            .get("properties")?
            .get(field)?
            .get("type")?
            .as_str()
            .map(str::to_string)
    }
}

/// A connector definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorDef {
    /// Connector id, lower-kebab
    pub id: String,
    /// Human name
    pub name: String,
    /// Catalog category
    pub category: String,
    /// Icon slug for the editor
    pub icon: String,
    /// Brand color
    pub color: String,
    /// Lifecycle badge
    pub lifecycle: Lifecycle,
    /// Release version
    pub semver: String,
    /// Default cap on concurrent calls across all runs
    pub default_concurrency: u32,
    /// Declared operations
    pub operations: Vec<OperationDef>,
}

impl ConnectorDef {
    /// Look up an operation case-insensitively
    pub fn operation(&self, id: &str) -> Option<&OperationDef> {
        self.operations
            .iter()
            .find(|op| op.id.eq_ignore_ascii_case(id))
    }
}

/// The built-in connector definitions
pub fn builtin_connectors() -> Vec<ConnectorDef> {
    vec![
        core_connector(),
        http_connector(),
        slack_connector(),
        google_sheets_connector(),
        gmail_connector(),
    ]
}

fn core_connector() -> ConnectorDef {
    ConnectorDef {
        id: "core".into(),
        name: "Core".into(),
        category: "control".into(),
        icon: "bolt".into(),
        color: "#6b7280".into(),
        lifecycle: Lifecycle::Stable,
        semver: "1.0.0".into(),
        default_concurrency: 64,
        operations: vec![
            OperationDef::trigger("manual", "Start the workflow by hand")
                .with_output_schema(json!({ "type": "object" })),
            OperationDef::trigger("schedule", "Start the workflow on a cron schedule")
                .with_params_schema(json!({
                    "type": "object",
                    "properties": { "cron": { "type": "string" } },
                    "required": ["cron"]
                })),
            OperationDef::trigger("webhook", "Start the workflow from an inbound webhook")
                .with_output_schema(json!({ "type": "object" })),
            OperationDef::action("branch", "Route to the true or false handle")
                .with_params_schema(json!({
                    "type": "object",
                    "properties": {
                        "left": {},
                        "operator": {
                            "type": "string",
                            "enum": ["eq", "neq", "gt", "lt", "contains", "truthy"]
                        },
                        "right": {}
                    },
                    "required": ["operator"]
                }))
                .with_handles(&["true", "false"]),
            OperationDef::action("join", "Wait for converging branches")
                .with_fan_in()
                .with_output_schema(json!({ "type": "object" })),
            OperationDef::action("map", "Reshape the upstream payload with a template")
                .with_params_schema(json!({
                    "type": "object",
                    "properties": { "template": { "type": "object" } },
                    "required": ["template"]
                })),
            OperationDef::action("delay", "Pause the branch for a fixed interval")
                .with_params_schema(json!({
                    "type": "object",
                    "properties": { "ms": { "type": "integer", "minimum": 0 } },
                    "required": ["ms"]
                }))
                .with_timeout_secs(900),
            OperationDef::action("noop", "Pass the upstream payload through unchanged"),
        ],
    }
}

fn http_connector() -> ConnectorDef {
    ConnectorDef {
        id: "http".into(),
        name: "HTTP".into(),
        category: "developer".into(),
        icon: "globe".into(),
        color: "#0ea5e9".into(),
        lifecycle: Lifecycle::Stable,
        semver: "1.2.0".into(),
        default_concurrency: 16,
        operations: vec![OperationDef::action("request", "Send an HTTP request")
            .with_params_schema(json!({
                "type": "object",
                "properties": {
                    "url": { "type": "string" },
                    "method": {
                        "type": "string",
                        "enum": ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD"]
                    },
                    "headers": { "type": "object" },
                    "body": {},
                    "timeoutMs": { "type": "integer", "minimum": 1 }
                },
                "required": ["url", "method"]
            }))
            .with_defaults({
                let mut defaults = Map::new();
                defaults.insert("method".into(), json!("GET"));
                defaults
            })
            .with_output_schema(json!({
                "type": "object",
                "properties": {
                    "status": { "type": "integer" },
                    "headers": { "type": "object" },
                    "body": {}
                }
            }))],
    }
}

fn slack_connector() -> ConnectorDef {
    ConnectorDef {
        id: "slack".into(),
        name: "Slack".into(),
        category: "communication".into(),
        icon: "slack".into(),
        color: "#611f69".into(),
        lifecycle: Lifecycle::Stable,
        semver: "2.0.1".into(),
        default_concurrency: 4,
        operations: vec![OperationDef::action("post-message", "Post a message to a channel")
            .with_params_schema(json!({
                "type": "object",
                "properties": {
                    "channel": { "type": "string" },
                    "text": { "type": "string" },
                    "threadTs": { "type": "string" }
                },
                "required": ["channel", "text"]
            }))
            .with_auth(&["chat:write"])
            .with_output_schema(json!({
                "type": "object",
                "properties": {
                    "ts": { "type": "string" },
                    "channel": { "type": "string" }
                }
            }))],
    }
}

fn google_sheets_connector() -> ConnectorDef {
    ConnectorDef {
        id: "google-sheets".into(),
        name: "Google Sheets".into(),
        category: "productivity".into(),
        icon: "sheets".into(),
        color: "#188038".into(),
        lifecycle: Lifecycle::Beta,
        semver: "0.9.0".into(),
        default_concurrency: 4,
        operations: vec![
            OperationDef::action("append-row", "Append a row to a sheet")
                .with_params_schema(json!({
                    "type": "object",
                    "properties": {
                        "spreadsheetId": { "type": "string" },
                        "tab": { "type": "string" },
                        "values": { "type": "object" }
                    },
                    "required": ["spreadsheetId", "values"]
                }))
                .with_auth(&["spreadsheets"])
                .with_output_schema(json!({
                    "type": "object",
                    "properties": {
                        "updatedRange": { "type": "string" },
                        "updatedRows": { "type": "integer" }
                    }
                })),
            OperationDef::trigger("new-row", "Fire when a row is appended")
                .with_params_schema(json!({
                    "type": "object",
                    "properties": {
                        "spreadsheetId": { "type": "string" },
                        "tab": { "type": "string" }
                    },
                    "required": ["spreadsheetId"]
                }))
                .with_auth(&["spreadsheets.readonly"]),
        ],
    }
}

fn gmail_connector() -> ConnectorDef {
    ConnectorDef {
        id: "gmail".into(),
        name: "Gmail".into(),
        category: "communication".into(),
        icon: "gmail".into(),
        color: "#ea4335".into(),
        lifecycle: Lifecycle::Stable,
        semver: "1.4.2".into(),
        default_concurrency: 4,
        operations: vec![
            OperationDef::trigger("new-email", "Fire on a new inbound email")
                .with_params_schema(json!({
                    "type": "object",
                    "properties": { "label": { "type": "string" } }
                }))
                .with_auth(&["gmail.readonly"])
                .with_output_schema(json!({
                    "type": "object",
                    "properties": {
                        "from": { "type": "string" },
                        "subject": { "type": "string" },
                        "body": { "type": "string" },
                        "email": { "type": "string" }
                    }
                })),
            OperationDef::action("send-email", "Send an email")
                .with_params_schema(json!({
                    "type": "object",
                    "properties": {
                        "to": { "type": "string" },
                        "subject": { "type": "string" },
                        "body": { "type": "string" }
                    },
                    "required": ["to", "subject"]
                }))
                .with_auth(&["gmail.send"]),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_shape() {
        let connectors = builtin_connectors();
        assert!(connectors.iter().any(|c| c.id == "core"));
        assert!(connectors.iter().any(|c| c.id == "http"));

        let core = connectors.iter().find(|c| c.id == "core").unwrap();
        let branch = core.operation("branch").unwrap();
        assert_eq!(branch.handles, vec!["true", "false"]);
        assert!(core.operation("join").unwrap().accepts_fan_in);
    }

    #[test]
    fn test_required_params_from_schema() {
        let http = http_connector();
        let request = http.operation("request").unwrap();
        let mut required = request.required_params();
        required.sort();
        assert_eq!(required, vec!["method", "url"]);
    }

    #[test]
    fn test_operation_lookup_case_insensitive() {
        let http = http_connector();
        assert!(http.operation("REQUEST").is_some());
        assert!(http.operation("missing").is_none());
    }

    #[test]
    fn test_output_field_type() {
        let http = http_connector();
        let request = http.operation("request").unwrap();
        assert_eq!(request.output_field_type("status").as_deref(), Some("integer"));
        assert_eq!(request.output_field_type("body"), None);
    }

    #[test]
    fn test_op_role_for_node_role() {
        assert_eq!(OpRole::for_node_role(NodeRole::Trigger), OpRole::Trigger);
        assert_eq!(OpRole::for_node_role(NodeRole::Condition), OpRole::Action);
        assert_eq!(OpRole::for_node_role(NodeRole::Transform), OpRole::Action);
    }
}
