//! Transient proxy functions for the foreign-mapping bridge.
//!
//! A proxy is a `LANGUAGE sql` function in the session's `pg_temp` schema. Its
//! typed arguments mirror the bound parameters; its body forwards the call to the
//! foreign server through `dblink`, quoting every argument server-side with
//! `format('%n$L')`. The client still binds values natively, so no value is ever
//! spliced into command text on this side. Each remote row comes back as one
//! `row_to_json` payload, which keeps the remote column order.

use crate::engine::{BoundOperation, RowCursor, SqlConnection, Statement};
use crate::sources::sql::dialect::{self, quote_ident, quote_literal, QueryTemplate};
use conduit_common::{OperationKind, OrderedRow, RowSet, ScalarValue};
use conduit_error::{ErrorCode, ErrorContext, ErrorKind, GatewayError, Result};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use serde_json::value::RawValue;
use std::borrow::Cow;
use std::fmt;
use std::marker::PhantomData;
use tokio_util::sync::CancellationToken;

const NAME_PREFIX: &str = "conduit_bridge";

#[derive(Debug, Clone)]
pub struct ProxyFunction {
    name: String,
    arg_types: Vec<&'static str>,
    body_tag: String,
    remote_sql: String,
    server_alias: String,
    arguments: Vec<ScalarValue>,
}

fn sql_type(value: &ScalarValue) -> &'static str {
    match value {
        ScalarValue::Null | ScalarValue::Text(_) => "text",
        ScalarValue::Bool(_) => "boolean",
        ScalarValue::Int(_) => "bigint",
        ScalarValue::Float(_) => "double precision",
    }
}

fn format_marker(index: usize) -> String {
    format!("%{}$L", index)
}

impl ProxyFunction {
    /// Plan a proxy for `operation` against the foreign server `server_alias`.
    pub fn for_operation(server_alias: &str, operation: &BoundOperation) -> Result<Self> {
        let (remote_sql, arguments) = match operation.kind {
            OperationKind::Procedure => {
                let target = dialect::procedure_target(&operation.name)?;
                let args = dialect::named_arguments(&operation.parameters, format_marker);
                let values = operation
                    .parameters
                    .iter()
                    .map(|p| p.value.clone())
                    .collect();
                (
                    format!("SELECT row_to_json(r)::text FROM {}({}) r", target, args),
                    values,
                )
            }
            OperationKind::Query => {
                let text = operation.name.trim().trim_end_matches(';');
                let template = QueryTemplate::parse(text)?;
                let values = template.values(&operation.parameters)?;
                let inner = template.render(format_marker, |t| Cow::Owned(t.replace('%', "%%")));
                (
                    format!("SELECT row_to_json(r)::text FROM ({}) r", inner),
                    values,
                )
            }
        };

        let token = format!("{:016x}", rand::random::<u64>());
        let name = format!("{}_{}_{}", NAME_PREFIX, std::process::id(), token);
        let body_tag = format!("$conduit_{}$", token);
        if remote_sql.contains(&body_tag) {
            return Err(GatewayError::internal("Proxy body collides with its quote tag"));
        }

        Ok(Self {
            name,
            arg_types: arguments.iter().map(sql_type).collect(),
            body_tag,
            remote_sql,
            server_alias: server_alias.to_string(),
            arguments,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn qualified_name(&self) -> String {
        format!("pg_temp.{}", quote_ident(&self.name))
    }

    fn signature(&self) -> String {
        format!("{}({})", self.qualified_name(), self.arg_types.join(", "))
    }

    pub fn create_statement(&self) -> Statement {
        let format_args: String = (1..=self.arguments.len())
            .map(|i| format!(", ${}", i))
            .collect();
        let body = format!(
            "SELECT t.payload FROM dblink({}, format({}{})) AS t(payload text)",
            quote_literal(&self.server_alias),
            quote_literal(&self.remote_sql),
            format_args
        );
        Statement::new(format!(
            "CREATE FUNCTION {} RETURNS SETOF text LANGUAGE sql AS {}{}{}",
            self.signature(),
            self.body_tag,
            body,
            self.body_tag
        ))
    }

    pub fn call_statement(&self) -> Statement {
        let markers = (1..=self.arguments.len())
            .map(|i| format!("${}", i))
            .collect::<Vec<_>>()
            .join(", ");
        Statement::with_parameters(
            format!(
                "SELECT t.payload FROM {}({}) AS t(payload)",
                self.qualified_name(),
                markers
            ),
            self.arguments.clone(),
        )
    }

    pub fn drop_statement(&self) -> Statement {
        Statement::new(format!("DROP FUNCTION IF EXISTS {}", self.signature()))
    }
}

/// Owns a created proxy until it is destroyed.
///
/// [`ProxyGuard::destroy`] is the single teardown attempt on every normal exit
/// path. If the guard is dropped without it (the request future was abandoned),
/// the connection is marked for discard so the session-scoped function dies with
/// it rather than going back to the pool.
pub struct ProxyGuard<'c> {
    connection: &'c mut dyn SqlConnection,
    proxy: ProxyFunction,
    armed: bool,
}

impl<'c> ProxyGuard<'c> {
    pub async fn create(
        connection: &'c mut dyn SqlConnection,
        proxy: ProxyFunction,
        cancel: &CancellationToken,
    ) -> Result<ProxyGuard<'c>> {
        let created = connection.execute(&proxy.create_statement(), cancel).await;
        match created {
            Ok(_) => {
                tracing::debug!(target: "bridge", proxy = %proxy.name, "Proxy function created");
                Ok(Self {
                    connection,
                    proxy,
                    armed: true,
                })
            }
            Err(e) => {
                // the CREATE may have landed before the interruption was observed
                if e.kind() == ErrorKind::Cancelled {
                    connection.discard();
                }
                Err(e)
            }
        }
    }

    pub fn name(&self) -> &str {
        self.proxy.name()
    }

    /// Invoke the proxy and decode its JSON payload rows.
    pub async fn call(&mut self, cancel: &CancellationToken) -> Result<RowSet> {
        let mut cursor = self
            .connection
            .execute(&self.proxy.call_statement(), cancel)
            .await?;
        decode_payloads(cursor.as_mut()).await
    }

    /// Drop the proxy function. Consumes the guard so teardown runs once.
    pub async fn destroy(mut self, cancel: &CancellationToken) -> Result<()> {
        self.armed = false;

        if cancel.is_cancelled() {
            tracing::debug!(target: "bridge", proxy = %self.proxy.name, "Request cancelled, discarding connection with its proxy");
            self.connection.discard();
            return Ok(());
        }

        // a cancel arriving from here on must not interrupt the drop
        let result = self
            .connection
            .execute(&self.proxy.drop_statement(), &CancellationToken::new())
            .await;

        match result {
            Ok(_) => {
                tracing::debug!(target: "bridge", proxy = %self.proxy.name, "Proxy function dropped");
                Ok(())
            }
            Err(e) => {
                self.connection.discard();
                Err(GatewayError::new(
                    ErrorCode::BridgeTeardownFailed,
                    format!("Failed to drop proxy function: {}", e.message),
                )
                .with_context(ErrorContext::Proxy {
                    proxy_name: self.proxy.name.clone(),
                }))
            }
        }
    }
}

impl Drop for ProxyGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!(
                target: "bridge",
                proxy = %self.proxy.name,
                "Proxy guard dropped before teardown, discarding connection"
            );
            self.connection.discard();
        }
    }
}

async fn decode_payloads(cursor: &mut dyn RowCursor) -> Result<RowSet> {
    let mut rows = Vec::new();
    while let Some(values) = cursor.next_row().await? {
        let payload = match values.first() {
            Some(ScalarValue::Text(payload)) => payload,
            _ => {
                return Err(GatewayError::new(
                    ErrorCode::ResultDecodeFailed,
                    "Proxy returned a row without a JSON payload",
                ))
            }
        };
        rows.push(decode_payload(payload)?);
    }
    RowSet::from_ordered_rows(rows)
        .map_err(|reason| GatewayError::new(ErrorCode::ResultDecodeFailed, reason))
}

fn unreadable(reason: impl fmt::Display) -> GatewayError {
    GatewayError::new(
        ErrorCode::ResultDecodeFailed,
        format!("Proxy returned an unreadable row: {}", reason),
    )
}

/// One `row_to_json` object, fields in remote column order, values still raw.
struct RawPayload<'a>(Vec<(String, &'a RawValue)>);

impl<'de: 'a, 'a> Deserialize<'de> for RawPayload<'a> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct PayloadVisitor<'a>(PhantomData<&'a ()>);

        impl<'de: 'a, 'a> Visitor<'de> for PayloadVisitor<'a> {
            type Value = RawPayload<'a>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a row object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Self::Value, A::Error> {
                let mut fields = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((key, value)) = map.next_entry::<String, &'de RawValue>()? {
                    fields.push((key, value));
                }
                Ok(RawPayload(fields))
            }
        }

        deserializer.deserialize_map(PayloadVisitor(PhantomData))
    }
}

fn decode_payload(payload: &str) -> Result<OrderedRow> {
    let raw: RawPayload<'_> = serde_json::from_str(payload).map_err(unreadable)?;
    raw.0
        .into_iter()
        .map(|(key, value)| Ok((key, bridged_cell(value)?)))
        .collect::<Result<Vec<_>>>()
        .map(OrderedRow)
}

/// Map one remote JSON value onto the cell direct execution would produce.
///
/// `json`, `jsonb` and array columns become their compact JSON text. Numbers that
/// fit an `i64` stay integers; every other number keeps its literal digits as
/// text, so `numeric` values arrive exact.
fn bridged_cell(raw: &RawValue) -> Result<ScalarValue> {
    let text = raw.get().trim();
    match text.as_bytes().first() {
        Some(b'{') | Some(b'[') => {
            let nested: serde_json::Value = serde_json::from_str(text).map_err(unreadable)?;
            Ok(ScalarValue::Text(nested.to_string()))
        }
        Some(b'-') | Some(b'0'..=b'9') => Ok(match text.parse::<i64>() {
            Ok(i) => ScalarValue::Int(i),
            Err(_) => ScalarValue::Text(text.to_string()),
        }),
        _ => serde_json::from_str::<ScalarValue>(text).map_err(unreadable),
    }
}
