//! Canonical node schema
//!
//! A node is one connector operation in a workflow graph. The canonical shape
//! produced by the normalizer is the only shape the validator and dispatcher
//! accept: `node_type` always agrees with `role`, `app`, and `operation`, and
//! every parameter value is one of the three tagged [`ParamValue`] variants.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Parameter name to value
///
/// A `BTreeMap` keeps serialization stable, which the normalization
/// idempotence law depends on.
pub type ParamMap = BTreeMap<String, ParamValue>;

/// Role of a node within the workflow graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Entry point; has no predecessors
    Trigger,
    /// Connector operation with side effects
    Action,
    /// Pure data reshaping step
    Transform,
    /// Branching node emitting a `true`/`false` handle
    Condition,
}

impl NodeRole {
    /// Parse a role from its lowercase string form
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "trigger" => Some(Self::Trigger),
            "action" => Some(Self::Action),
            "transform" => Some(Self::Transform),
            "condition" => Some(Self::Condition),
            _ => None,
        }
    }

    /// Lowercase string form used in `node_type`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trigger => "trigger",
            Self::Action => "action",
            Self::Transform => "transform",
            Self::Condition => "condition",
        }
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parameters of an LLM-mapped value
///
/// The dispatcher resolves this variant through the LLM mapping service and
/// caches the response by a hash of `(prompt, model, upstream snapshot)` for
/// `cache_ttl_sec` seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmParam {
    /// Mapping prompt sent to the model
    pub prompt: String,
    /// Model identifier
    pub model: String,
    /// Provider identifier (e.g. "anthropic", "openai")
    pub provider: String,
    /// Sampling temperature
    #[serde(default)]
    pub temperature: f64,
    /// Completion token cap
    #[serde(default = "LlmParam::default_max_tokens")]
    pub max_tokens: u32,
    /// Response cache lifetime in seconds; 0 disables caching
    #[serde(default)]
    pub cache_ttl_sec: u64,
    /// Optional JSON schema the response must satisfy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_schema: Option<Value>,
    /// Optional system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

impl LlmParam {
    fn default_max_tokens() -> u32 {
        1024
    }
}

/// A parameter value on a node
///
/// Every consumption site matches exhaustively on the three variants; there is
/// no implicit coercion between them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ParamValue {
    /// Literal value used as-is
    Static {
        /// The literal
        value: Value,
    },
    /// Reference to an upstream node's output artifact
    Ref {
        /// Id of the upstream node
        node: String,
        /// Dotted/bracket path into the artifact (`foo.bar[0].baz`)
        path: String,
    },
    /// Value produced by the LLM mapping service at resolution time
    Llm(LlmParam),
}

impl ParamValue {
    /// Shorthand for a static literal
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Static {
            value: value.into(),
        }
    }

    /// Shorthand for an upstream reference
    pub fn reference(node: impl Into<String>, path: impl Into<String>) -> Self {
        Self::Ref {
            node: node.into(),
            path: path.into(),
        }
    }

    /// True when the value is a static empty string or null
    ///
    /// Used by the validator to treat `""` the same as an absent required key.
    pub fn is_empty_static(&self) -> bool {
        match self {
            Self::Static { value } => match value {
                Value::Null => true,
                Value::String(s) => s.is_empty(),
                _ => false,
            },
            _ => false,
        }
    }
}

/// Credential reference on a node
///
/// A node may carry a saved connection id, inline credentials, or both.
/// When both are present the inline credentials win for execution; the saved
/// id stays on the graph for the editor. Inline credentials are never
/// persisted beyond the run that used them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAuth {
    /// Saved connection id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    /// Inline credentials, scoped to a single run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline: Option<Map<String, Value>>,
}

impl NodeAuth {
    /// True when neither a connection id nor inline credentials are present
    pub fn is_empty(&self) -> bool {
        self.connection_id.as_deref().map_or(true, str::is_empty) && self.inline.is_none()
    }

    /// The credential source the dispatcher should use: inline wins over a
    /// saved connection id when both are present
    pub fn effective(&self) -> Option<CredentialSource<'_>> {
        if let Some(inline) = &self.inline {
            return Some(CredentialSource::Inline(inline));
        }
        match self.connection_id.as_deref() {
            Some(id) if !id.is_empty() => Some(CredentialSource::Connection(id)),
            _ => None,
        }
    }
}

/// Resolved credential source for one invocation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CredentialSource<'a> {
    /// Saved connection, fetched by the host's credential store
    Connection(&'a str),
    /// Inline credentials carried on the node
    Inline(&'a Map<String, Value>),
}

/// Editor canvas position; preserved verbatim, never interpreted
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Resolver-populated schema hints
///
/// Advisory only: the validator may widen accepted values from these hints but
/// never narrows, and the dispatcher never trusts them as execution input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataHints {
    /// Known output column/field names
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
    /// Discovered tab/sheet names, where the connector has them
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tabs: Vec<String>,
    /// A sample output row
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_row: Option<Value>,
    /// JSON schema of the output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_schema: Option<Value>,
}

impl MetadataHints {
    /// True when no hint fields are populated
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
            && self.tabs.is_empty()
            && self.sample_row.is_none()
            && self.json_schema.is_none()
    }
}

/// A canonical workflow node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Unique id within the workflow
    pub id: String,
    /// Node role
    pub role: NodeRole,
    /// Connector id, lower-kebab
    pub app: String,
    /// Operation id within the connector
    pub operation: String,
    /// Canonical dotted type: `role.app.operation`
    pub node_type: String,
    /// Parameter map
    #[serde(default)]
    pub params: ParamMap,
    /// Credential reference
    #[serde(default, skip_serializing_if = "NodeAuth::is_empty")]
    pub auth: NodeAuth,
    /// Editor position
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    /// Input-side schema hints
    #[serde(default, skip_serializing_if = "MetadataHints::is_empty")]
    pub metadata: MetadataHints,
    /// Output-side schema hints
    #[serde(default, skip_serializing_if = "MetadataHints::is_empty")]
    pub output_metadata: MetadataHints,
}

impl Node {
    /// Rebuild the canonical `node_type` from role/app/operation
    pub fn canonical_type(role: NodeRole, app: &str, operation: &str) -> String {
        format!("{}.{}.{}", role.as_str(), app, operation)
    }

    /// True when `node_type` agrees with role/app/operation
    pub fn type_is_consistent(&self) -> bool {
        self.node_type == Self::canonical_type(self.role, &self.app, &self.operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_role_parse_round_trip() {
        for role in [
            NodeRole::Trigger,
            NodeRole::Action,
            NodeRole::Transform,
            NodeRole::Condition,
        ] {
            assert_eq!(NodeRole::parse(role.as_str()), Some(role));
        }
        assert_eq!(NodeRole::parse("TRIGGER"), Some(NodeRole::Trigger));
        assert_eq!(NodeRole::parse("unknown"), None);
    }

    #[test]
    fn test_param_value_tagged_serialization() {
        let v = ParamValue::literal(json!({"a": 1}));
        let s = serde_json::to_value(&v).unwrap();
        assert_eq!(s["kind"], "static");

        let r = ParamValue::reference("n1", "out.rows[0]");
        let s = serde_json::to_value(&r).unwrap();
        assert_eq!(s["kind"], "ref");
        assert_eq!(s["node"], "n1");

        let round: ParamValue = serde_json::from_value(s).unwrap();
        assert_eq!(round, r);
    }

    #[test]
    fn test_empty_static_detection() {
        assert!(ParamValue::literal("").is_empty_static());
        assert!(ParamValue::literal(Value::Null).is_empty_static());
        assert!(!ParamValue::literal("x").is_empty_static());
        assert!(!ParamValue::reference("a", "b").is_empty_static());
    }

    #[test]
    fn test_auth_inline_wins() {
        let mut inline = Map::new();
        inline.insert("token".into(), json!("t"));
        let auth = NodeAuth {
            connection_id: Some("conn-1".into()),
            inline: Some(inline),
        };
        match auth.effective() {
            Some(CredentialSource::Inline(_)) => {}
            other => panic!("expected inline credentials, got {:?}", other),
        }

        let auth = NodeAuth {
            connection_id: Some("conn-1".into()),
            inline: None,
        };
        assert_eq!(
            auth.effective(),
            Some(CredentialSource::Connection("conn-1"))
        );
        assert!(NodeAuth::default().effective().is_none());
    }

    #[test]
    fn test_canonical_type() {
        assert_eq!(
            Node::canonical_type(NodeRole::Action, "http", "request"),
            "action.http.request"
        );
    }
}
