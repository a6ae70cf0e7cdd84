//! HTTP relay bridge.
//!
//! The relay is a remote service that owns the connection to the foreign engine.
//! Operations are POSTed as JSON and answered with an array of row objects.

use async_trait::async_trait;
use conduit_common::{OperationKind, RowSet, ScalarValue};
use conduit_error::{ErrorCode, ErrorContext, GatewayError, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::binder::IdentifierRules;
use crate::engine::{BoundOperation, BufferedCursor, Engine, PoolStatus, RowCursor, Session};

/// Longest remote error body echoed back to the caller.
const MAX_ERROR_BODY: usize = 1024;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RelayRequest<'a> {
    kind: OperationKind,
    name: &'a str,
    parameters: BTreeMap<&'a str, &'a ScalarValue>,
    use_cache: bool,
    cache_minutes: Option<u64>,
}

impl<'a> From<&'a BoundOperation> for RelayRequest<'a> {
    fn from(operation: &'a BoundOperation) -> Self {
        Self {
            kind: operation.kind,
            name: &operation.name,
            parameters: operation
                .parameters
                .iter()
                .map(|p| (p.name.as_str(), &p.value))
                .collect(),
            use_cache: operation.cache.enabled,
            cache_minutes: operation.cache.ttl.map(cache_minutes),
        }
    }
}

/// Whole minutes, rounded up: the relay rejects a zero TTL.
fn cache_minutes(ttl: Duration) -> u64 {
    ttl.as_secs().div_ceil(60).max(1)
}

struct RelayClient {
    http: reqwest::Client,
    endpoint: Url,
    api_key: Option<SecretString>,
}

impl RelayClient {
    async fn send(&self, operation: &BoundOperation) -> Result<RowSet> {
        let mut request = self
            .http
            .post(self.endpoint.clone())
            .json(&RelayRequest::from(operation));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            let err = rejected(status.as_u16(), &body);
            tracing::warn!(target: "relay", status = status.as_u16(), "Relay rejected operation");
            return Err(err);
        }

        serde_json::from_slice::<RowSet>(&body).map_err(|e| {
            GatewayError::new(
                ErrorCode::ResultDecodeFailed,
                format!("Relay returned an unreadable result: {}", e),
            )
        })
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

fn rejected(status: u16, body: &[u8]) -> GatewayError {
    let raw = truncate(&String::from_utf8_lossy(body), MAX_ERROR_BODY);
    let parsed: Option<serde_json::Value> = serde_json::from_slice(body).ok();

    let remote_message = parsed
        .as_ref()
        .and_then(|v| v.get("error"))
        .and_then(|e| e.as_str())
        .map(|e| truncate(e, MAX_ERROR_BODY));
    let message = match remote_message {
        Some(message) => message,
        None if raw.trim().is_empty() => "empty response body".to_string(),
        None => raw.clone(),
    };

    let payload = match parsed {
        Some(value) if raw.len() <= MAX_ERROR_BODY => value,
        _ => serde_json::Value::String(raw),
    };

    GatewayError::new(
        ErrorCode::RelayRejected,
        format!("Relay rejected the operation with status {}: {}", status, message),
    )
    .with_context(ErrorContext::Relay { status, payload })
}

/// Forwards operations to an HTTP relay.
pub struct RelayEngine {
    client: Arc<RelayClient>,
}

impl RelayEngine {
    pub fn new(endpoint: &str, api_key: Option<SecretString>, timeout: Duration) -> Result<Self> {
        let config_error = |message: String| {
            GatewayError::new(ErrorCode::InvalidConfiguration, message).with_context(
                ErrorContext::Config {
                    field: Some("bridge.endpoint".to_string()),
                },
            )
        };

        let endpoint = Url::parse(endpoint)
            .map_err(|e| config_error(format!("Invalid relay endpoint: {}", e)))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| config_error(format!("Failed to build relay client: {}", e)))?;

        Ok(Self {
            client: Arc::new(RelayClient {
                http,
                endpoint,
                api_key,
            }),
        })
    }
}

#[async_trait]
impl Engine for RelayEngine {
    fn name(&self) -> &'static str {
        "relay"
    }

    fn identifier_rules(&self) -> IdentifierRules {
        IdentifierRules::RELAY
    }

    async fn acquire(&self) -> Result<Box<dyn Session>> {
        Ok(Box::new(RelaySession {
            client: self.client.clone(),
        }))
    }

    fn pool_status(&self) -> Option<PoolStatus> {
        None
    }
}

struct RelaySession {
    client: Arc<RelayClient>,
}

#[async_trait]
impl Session for RelaySession {
    async fn run(
        &mut self,
        operation: &BoundOperation,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn RowCursor>> {
        tracing::debug!(
            target: "relay",
            endpoint = %self.client.endpoint,
            kind = %operation.kind,
            parameters = operation.parameters.len(),
            "Forwarding operation to relay"
        );

        let rows = tokio::select! {
            result = self.client.send(operation) => result?,
            _ = cancel.cancelled() => return Err(GatewayError::cancelled()),
        };
        Ok(Box::new(BufferedCursor::from(rows)))
    }
}
