//! Error types for the graph memory MCP server.
//!
//! Uses `thiserror` for structured error handling with automatic `From`
//! implementations. The dispatcher owns the mapping from these kinds onto
//! JSON-RPC error responses; nothing below the transport layer builds wire
//! errors directly.

use serde_json::Value;

use crate::protocol::code;

/// Errors from the embedded graph store and its provisioner.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Opening or creating the database file failed
    #[error("failed to open database at {path}: {message}")]
    Open {
        /// On-disk path of the database file
        path: String,
        /// Underlying failure
        message: String,
    },

    /// Derived database path escapes the client project root
    #[error("branch {branch:?} resolves outside the client project root")]
    PathTraversal {
        /// Offending branch name
        branch: String,
    },

    /// SQL execution error from the embedded engine
    #[error("query failed: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Property bag serialization error
    #[error("property serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Statement rejected by the read-only query surface
    #[error("query rejected: {0}")]
    Rejected(String),
}

impl StoreError {
    /// Create an open failure.
    #[must_use]
    pub fn open(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Open {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Errors from MCP tool execution.
#[derive(thiserror::Error, Debug)]
pub enum ToolError {
    /// Input validation failed
    #[error("validation error on {field:?}: {message}")]
    Validation {
        /// Field that failed validation
        field: String,
        /// Validation error message
        message: String,
    },

    /// Input deserialization error
    #[error("invalid arguments: {0}")]
    Arguments(#[from] serde_json::Error),

    /// Error from the graph store
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Internal tool logic error
    #[error("internal error: {0}")]
    Internal(String),

    /// Execution abandoned because the request was cancelled
    #[error("cancelled")]
    Cancelled,
}

impl ToolError {
    /// Create a validation error.
    #[must_use]
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// JSON-RPC error code for this kind.
    #[must_use]
    pub fn rpc_code(&self) -> i32 {
        match self {
            Self::Validation { .. } | Self::Arguments(_) => code::INVALID_PARAMS,
            Self::Store(_) | Self::Internal(_) | Self::Cancelled => code::INTERNAL_ERROR,
        }
    }

    /// Human-readable message for the JSON-RPC `error.message` field.
    ///
    /// Internal paths never leak here; detail goes into `error.data`.
    #[must_use]
    pub fn rpc_message(&self) -> String {
        match self {
            Self::Validation { .. } | Self::Arguments(_) => "Invalid params".to_string(),
            Self::Store(StoreError::Open { .. } | StoreError::PathTraversal { .. }) => {
                "Database unavailable".to_string()
            }
            Self::Store(_) | Self::Internal(_) => "Internal error".to_string(),
            Self::Cancelled => "Cancelled".to_string(),
        }
    }

    /// Structured detail for the JSON-RPC `error.data` field.
    #[must_use]
    pub fn rpc_data(&self) -> Option<Value> {
        match self {
            Self::Validation { field, message } => Some(serde_json::json!({
                "field": field,
                "message": message,
            })),
            Self::Arguments(e) => Some(Value::String(e.to_string())),
            Self::Store(e) => Some(Value::String(e.to_string())),
            Self::Internal(message) => Some(Value::String(message.clone())),
            Self::Cancelled => None,
        }
    }
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for tool operations.
pub type ToolResult<T> = Result<T, ToolError>;
