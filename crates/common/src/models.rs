use crate::value::ScalarValue;
use conduit_error::GatewayError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Unordered parameter mapping as supplied by the caller.
pub type ParameterMap = HashMap<String, ScalarValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Procedure,
    Query,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Procedure => "procedure",
            OperationKind::Query => "query",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A logical operation: a stored procedure name or a parameterized query text.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    kind: OperationKind,
    name: String,
    parameters: ParameterMap,
}

impl Operation {
    pub fn new(kind: OperationKind, name: impl Into<String>, parameters: ParameterMap) -> Self {
        Self {
            kind,
            name: name.into(),
            parameters,
        }
    }

    pub fn procedure(name: impl Into<String>) -> Self {
        Self::new(OperationKind::Procedure, name, ParameterMap::new())
    }

    pub fn query(text: impl Into<String>) -> Self {
        Self::new(OperationKind::Query, text, ParameterMap::new())
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<ScalarValue>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Procedure name, or the query text for [`OperationKind::Query`].
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &ParameterMap {
        &self.parameters
    }
}

/// Whether and for how long a result may be served from cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheDirective {
    pub enabled: bool,
    pub ttl: Option<Duration>,
}

impl CacheDirective {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn ttl_or(&self, default: Duration) -> Duration {
        self.ttl.unwrap_or(default)
    }
}

/// Inbound request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRequest {
    pub kind: OperationKind,
    pub name: String,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub use_cache: bool,
    #[serde(default)]
    pub cache_minutes: Option<u64>,
}

impl OperationRequest {
    /// Split into an operation and its cache directive, rejecting non-scalar parameters.
    pub fn into_parts(self) -> Result<(Operation, CacheDirective), GatewayError> {
        let mut parameters = ParameterMap::with_capacity(self.parameters.len());
        for (key, value) in self.parameters {
            let value = ScalarValue::try_from(value)
                .map_err(|e| GatewayError::invalid_parameter(key.as_str(), e.to_string()))?;
            parameters.insert(key, value);
        }

        let cache = match (self.use_cache, self.cache_minutes) {
            (false, _) => CacheDirective::disabled(),
            (true, None) => CacheDirective::enabled(),
            (true, Some(0)) => {
                return Err(GatewayError::invalid_parameter(
                    "cacheMinutes",
                    "must be at least 1 when caching is enabled",
                ))
            }
            (true, Some(minutes)) => {
                let secs = minutes.checked_mul(60).ok_or_else(|| {
                    GatewayError::invalid_parameter("cacheMinutes", "is too large")
                })?;
                CacheDirective::enabled().with_ttl(Duration::from_secs(secs))
            }
        };

        Ok((Operation::new(self.kind, self.name, parameters), cache))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_error::ErrorKind;

    fn request(body: serde_json::Value) -> OperationRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_into_parts_with_cache() {
        let (op, cache) = request(serde_json::json!({
            "kind": "procedure",
            "name": "get_orders",
            "parameters": {"customer": 42, "region": null},
            "useCache": true,
            "cacheMinutes": 10
        }))
        .into_parts()
        .unwrap();

        assert_eq!(op.kind(), OperationKind::Procedure);
        assert_eq!(op.name(), "get_orders");
        assert_eq!(op.parameters()["customer"], ScalarValue::Int(42));
        assert_eq!(op.parameters()["region"], ScalarValue::Null);
        assert!(cache.enabled);
        assert_eq!(cache.ttl, Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_defaults_disable_cache() {
        let (op, cache) = request(serde_json::json!({
            "kind": "query",
            "name": "SELECT 1"
        }))
        .into_parts()
        .unwrap();

        assert!(op.parameters().is_empty());
        assert_eq!(cache, CacheDirective::disabled());
        assert_eq!(cache.ttl_or(Duration::from_secs(5)), Duration::from_secs(5));
    }

    #[test]
    fn test_nested_parameter_rejected() {
        let err = request(serde_json::json!({
            "kind": "procedure",
            "name": "p",
            "parameters": {"ids": [1, 2, 3]}
        }))
        .into_parts()
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        assert!(err.message.contains("ids"));
        assert!(!err.message.contains("[1"));
    }

    #[test]
    fn test_oversized_cache_minutes_rejected() {
        let err = request(serde_json::json!({
            "kind": "procedure",
            "name": "p",
            "useCache": true,
            "cacheMinutes": u64::MAX
        }))
        .into_parts()
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        assert!(err.message.contains("cacheMinutes"));
    }

    #[test]
    fn test_unknown_kind_fails_to_deserialize() {
        let result = serde_json::from_value::<OperationRequest>(serde_json::json!({
            "kind": "script",
            "name": "x"
        }));
        assert!(result.is_err());
    }
}
