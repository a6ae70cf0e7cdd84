//! # conduit-error
//!
//! Unified error types for the Conduit execution gateway.
//!
//! Every failure carries:
//! - A stable numeric code (CONDUIT-XXXX) and its taxonomy kind
//! - Structured JSON context (operation names, never parameter values)
//! - The HTTP status a transport layer should answer with

mod code;
mod context;
mod convert;

pub use code::{ErrorCode, ErrorKind};
pub use context::ErrorContext;

use serde::{Deserialize, Serialize};
use std::fmt;

/// The unified error type for all gateway operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayError {
    /// Numeric error code (e.g., "CONDUIT-2002")
    pub code: ErrorCode,

    /// Human-readable error message, serialized as `error`
    #[serde(rename = "error")]
    pub message: String,

    /// Structured context for programmatic handling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ErrorContext>,

    /// Suggestion for the caller
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,

    /// Correlation ID for distributed tracing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl GatewayError {
    /// Create a new error with code and message
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: None,
            hint: None,
            trace_id: None,
        }
    }

    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidOperation, message)
    }

    pub fn invalid_parameter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        let name = name.into();
        let reason = reason.into();
        Self::new(
            ErrorCode::InvalidParameter,
            format!("Invalid parameter '{}': {}", name, reason),
        )
        .with_context(ErrorContext::Parameter { name, reason })
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorCode::Cancelled, "Request cancelled")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    /// Add structured context
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Attach operation context unless a more specific context is already present.
    pub fn for_operation(mut self, kind: impl Into<String>, name: impl Into<String>) -> Self {
        if self.context.is_none() {
            self.context = Some(ErrorContext::Operation {
                kind: kind.into(),
                name: name.into(),
            });
        }
        self
    }

    /// Add a hint for the caller
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Add trace ID for correlation
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.code.kind()
    }

    pub fn status_code(&self) -> u16 {
        self.code.status_code()
    }

    /// Serialize to JSON for API responses
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::warn!("Failed to serialize GatewayError: {}", e);
            format!(
                r#"{{"code":"{}","error":"Serialization failed"}}"#,
                self.code
            )
        })
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(hint) = &self.hint {
            write!(f, " (Hint: {})", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for GatewayError {}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;
