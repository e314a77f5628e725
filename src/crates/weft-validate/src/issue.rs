//! Validation issues
//!
//! Every finding the validator produces is a [`ValidationIssue`] with a
//! node-scoped JSON-pointer-style path, a stable code, and a severity.
//! Errors block execution; warnings do not. The report sorts issues by
//! `(node_id, path, code)` so successive validations of a slightly edited
//! graph diff minimally in the editor.

use serde::{Deserialize, Serialize};

/// Stable issue codes
pub mod codes {
    // Errors
    pub const UNKNOWN_CONNECTOR: &str = "UNKNOWN_CONNECTOR";
    pub const UNKNOWN_OPERATION: &str = "UNKNOWN_OPERATION";
    pub const MISSING_CONNECTION: &str = "MISSING_CONNECTION";
    pub const MISSING_REQUIRED_PARAM: &str = "MISSING_REQUIRED_PARAM";
    pub const PARAM_TYPE_MISMATCH: &str = "PARAM_TYPE_MISMATCH";
    pub const UNKNOWN_PARAM: &str = "UNKNOWN_PARAM";
    pub const UNRESOLVED_REF: &str = "UNRESOLVED_REF";
    pub const CYCLE_DETECTED: &str = "CYCLE_DETECTED";
    pub const ORPHAN_ACTION: &str = "ORPHAN_ACTION";
    pub const DUPLICATE_NODE_ID: &str = "DUPLICATE_NODE_ID";
    pub const DUPLICATE_EDGE: &str = "DUPLICATE_EDGE";
    pub const EDGE_ENDPOINT_MISSING: &str = "EDGE_ENDPOINT_MISSING";
    pub const FAN_IN_NOT_ALLOWED: &str = "FAN_IN_NOT_ALLOWED";
    pub const TRIGGER_HAS_INPUT: &str = "TRIGGER_HAS_INPUT";

    // Warnings
    pub const UNUSED_OUTPUT: &str = "UNUSED_OUTPUT";
    pub const LIFECYCLE_ALPHA: &str = "LIFECYCLE_ALPHA";
    pub const LIFECYCLE_BETA: &str = "LIFECYCLE_BETA";
    pub const LIFECYCLE_DEPRECATED: &str = "LIFECYCLE_DEPRECATED";
    pub const LARGE_FAN_OUT: &str = "LARGE_FAN_OUT";
    pub const MISSING_METADATA_HINT: &str = "MISSING_METADATA_HINT";
}

/// Issue severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// One validator finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    /// Node the issue is scoped to, when it is node-scoped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// Pointer-style path (`/nodes/{id}/params/{key}`, `/graph`, ...)
    pub path: String,
    /// Human message
    pub message: String,
    /// Severity
    pub severity: Severity,
    /// Stable code from [`codes`]
    pub code: String,
}

impl ValidationIssue {
    /// Build an error
    pub fn error(
        node_id: Option<&str>,
        path: impl Into<String>,
        code: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            node_id: node_id.map(str::to_string),
            path: path.into(),
            message: message.into(),
            severity: Severity::Error,
            code: code.to_string(),
        }
    }

    /// Build a warning
    pub fn warning(
        node_id: Option<&str>,
        path: impl Into<String>,
        code: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(node_id, path, code, message)
        }
    }

    /// Sort key used for the stable report ordering
    pub fn sort_key(&self) -> (String, String, String) {
        (
            self.node_id.clone().unwrap_or_default(),
            self.path.clone(),
            self.code.clone(),
        )
    }
}

/// The validator's result: never an `Err`, always a report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    /// True when `errors` is empty
    pub valid: bool,
    /// Blocking findings
    pub errors: Vec<ValidationIssue>,
    /// Advisory findings
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// Assemble a report from unsorted issues
    pub fn from_issues(issues: Vec<ValidationIssue>) -> Self {
        let mut errors: Vec<ValidationIssue> = Vec::new();
        let mut warnings: Vec<ValidationIssue> = Vec::new();
        for issue in issues {
            match issue.severity {
                Severity::Error => errors.push(issue),
                Severity::Warning => warnings.push(issue),
            }
        }
        errors.sort_by_key(ValidationIssue::sort_key);
        warnings.sort_by_key(ValidationIssue::sort_key);
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// First error scoped to a node, for banner rendering
    pub fn first_error_for(&self, node_id: &str) -> Option<&ValidationIssue> {
        self.errors
            .iter()
            .find(|issue| issue.node_id.as_deref() == Some(node_id))
    }
}
