//! # Error Contexts
//!
//! Structured metadata attached to errors. Contexts name operations and
//! parameters but never carry parameter values.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ErrorContext {
    /// Which operation failed (CONDUIT-3xxx, CONDUIT-1xxx)
    Operation { kind: String, name: String },

    /// Rejected parameter (CONDUIT-2002)
    Parameter { name: String, reason: String },

    /// Native engine diagnostics (CONDUIT-3001)
    Engine {
        engine: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        sqlstate: Option<String>,
        /// Logged only. DETAIL text often repeats row values.
        #[serde(skip_serializing, default)]
        detail: Option<String>,
    },

    /// Non-success answer from the relay endpoint (CONDUIT-3003)
    Relay {
        status: u16,
        payload: serde_json::Value,
    },

    /// Proxy resource involved in a bridged call (CONDUIT-4001)
    Proxy { proxy_name: String },

    /// Config errors (CONDUIT-5001)
    Config { field: Option<String> },
}
