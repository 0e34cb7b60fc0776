//! Error types for the MCP server.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// A single rejected parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// Dotted path of the offending field (empty for the params root).
    pub path: String,
    /// Why the field was rejected.
    pub reason: String,
}

impl FieldError {
    /// Create a field error.
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.reason)
        } else {
            write!(f, "`{}`: {}", self.path, self.reason)
        }
    }
}

fn join_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// MCP server errors.
#[derive(Error, Debug)]
pub enum Error {
    /// JSON-RPC protocol error.
    #[error("JSON-RPC error: {code} - {message}")]
    JsonRpc {
        /// Error code.
        code: i32,
        /// Error message.
        message: String,
        /// Additional data.
        data: Option<serde_json::Value>,
    },

    /// Tool not found.
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// Parameters did not match the tool's declared shape.
    #[error("invalid parameters: {}", join_fields(.0))]
    InvalidParams(Vec<FieldError>),

    /// A current-tab action was requested while no tab is open.
    #[error("No open pages available. Use the \"browser_navigate\" tool to navigate to a page first.")]
    NoActiveTab,

    /// The browser rejected the operation.
    #[error("action failed: {0}")]
    ActionFailed(String),

    /// Engine install or download failed.
    #[error("install failed: {0}")]
    InstallFailed(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a single-field validation failure.
    pub fn invalid_field(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidParams(vec![FieldError::new(path, reason)])
    }

    /// Get the JSON-RPC error code for this error.
    pub fn code(&self) -> i32 {
        match self {
            Error::JsonRpc { code, .. } => *code,
            Error::ToolNotFound(_) => codes::METHOD_NOT_FOUND,
            Error::InvalidParams(_) => codes::INVALID_PARAMS,
            Error::NoActiveTab => -32000,
            Error::ActionFailed(_) => -32001,
            Error::InstallFailed(_) => -32003,
            Error::Serialization(_) => codes::PARSE_ERROR,
            Error::Io(_) => -32002,
            Error::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Whether repeating the same call may succeed without changing its params.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::NoActiveTab | Error::ActionFailed(_) | Error::InstallFailed(_) | Error::Io(_)
        )
    }

    /// Structured `data` for a JSON-RPC error object.
    pub fn data(&self) -> Option<serde_json::Value> {
        match self {
            Error::InvalidParams(fields) => Some(serde_json::json!({ "fields": fields })),
            Error::JsonRpc { data, .. } => data.clone(),
            _ => None,
        }
    }
}

impl From<chromiumoxide::error::CdpError> for Error {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        Error::ActionFailed(err.to_string())
    }
}

/// Standard JSON-RPC error codes.
pub mod codes {
    /// Parse error.
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid request.
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid params.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error.
    pub const INTERNAL_ERROR: i32 = -32603;
}
