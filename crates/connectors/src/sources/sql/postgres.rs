use async_trait::async_trait;
use conduit_common::config::TargetConfig;
use conduit_common::scrubber::scrub;
use conduit_error::{ErrorCode, ErrorContext, GatewayError, Result};
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod, Runtime};
use secrecy::ExposeSecret;
use tokio_postgres::types::ToSql;
use tokio_postgres::NoTls;
use tokio_util::sync::CancellationToken;

use super::pg_types::{is_supported, PgCell, PgParam};
use crate::engine::{BufferedCursor, PoolStatus, RowCursor, SqlConnection, SqlPool, Statement};

const APPLICATION_NAME: &str = "conduit";

/// Pooled Postgres connections backed by deadpool.
pub struct PgPool {
    pool: Pool,
}

impl PgPool {
    /// Build the pool. Connections are opened lazily on first checkout.
    pub fn connect(target: &TargetConfig) -> Result<Self> {
        let mut pg_config: tokio_postgres::Config = target
            .connection_string
            .expose_secret()
            .parse()
            .map_err(|e| invalid_config(format!("Invalid Postgres connection string: {}", e)))?;
        pg_config.connect_timeout(target.connect_timeout());
        if pg_config.get_application_name().is_none() {
            pg_config.application_name(APPLICATION_NAME);
        }

        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );

        let pool = Pool::builder(manager)
            .max_size(target.max_pool_size)
            .wait_timeout(Some(target.acquire_timeout()))
            .create_timeout(Some(target.connect_timeout()))
            .recycle_timeout(Some(target.connect_timeout()))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| invalid_config(format!("Failed to build Postgres pool: {}", e)))?;

        tracing::info!(
            target: "postgres",
            max_size = target.max_pool_size,
            acquire_timeout_ms = target.acquire_timeout_ms,
            "Postgres pool ready"
        );

        Ok(Self { pool })
    }
}

fn invalid_config(message: String) -> GatewayError {
    GatewayError::new(ErrorCode::InvalidConfiguration, message).with_context(
        ErrorContext::Config {
            field: Some("target.connection_string".to_string()),
        },
    )
}

#[async_trait]
impl SqlPool for PgPool {
    async fn checkout(&self) -> Result<Box<dyn SqlConnection>> {
        let client = self.pool.get().await.map_err(|e| {
            let err = GatewayError::from(e);
            tracing::warn!(target: "postgres", code = %err.code, "Connection checkout failed");
            err
        })?;
        Ok(Box::new(PgConnection::new(client)))
    }

    fn status(&self) -> PoolStatus {
        let status = self.pool.status();
        PoolStatus {
            max_size: status.max_size,
            size: status.size,
            available: status.available,
            waiting: status.waiting,
        }
    }
}

/// One checked-out connection.
///
/// A statement interrupted by cancellation (or by its future being dropped) leaves
/// the connection flagged; on drop a server-side cancel is sent and the connection
/// is detached from the pool instead of being recycled mid-statement.
pub struct PgConnection {
    client: Option<Object>,
    in_flight: bool,
    discard: bool,
}

impl PgConnection {
    fn new(client: Object) -> Self {
        Self {
            client: Some(client),
            in_flight: false,
            discard: false,
        }
    }
}

#[async_trait]
impl SqlConnection for PgConnection {
    async fn execute(
        &mut self,
        statement: &Statement,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn RowCursor>> {
        if self.in_flight {
            return Err(GatewayError::internal(
                "Connection is unusable after an interrupted statement",
            ));
        }
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| GatewayError::internal("Connection already released"))?;

        tracing::debug!(
            target: "postgres",
            statement = %scrub(&statement.text),
            parameters = statement.parameters.len(),
            "Executing statement"
        );

        self.in_flight = true;
        let outcome = tokio::select! {
            result = run_statement(client, statement) => Some(result),
            _ = cancel.cancelled() => None,
        };

        match outcome {
            Some(result) => {
                self.in_flight = false;
                let cursor = result?;
                Ok(Box::new(cursor))
            }
            None => {
                tracing::info!(target: "postgres", "Statement cancelled by caller");
                Err(GatewayError::cancelled())
            }
        }
    }

    fn discard(&mut self) {
        self.discard = true;
    }
}

async fn run_statement(client: &Object, statement: &Statement) -> Result<BufferedCursor> {
    // proxy statements carry unique names, so the per-connection statement cache is bypassed
    let prepared = client.prepare(&statement.text).await?;

    let mut columns = Vec::with_capacity(prepared.columns().len());
    for column in prepared.columns() {
        if !is_supported(column.type_()) {
            return Err(GatewayError::new(
                ErrorCode::UnsupportedColumnType,
                format!(
                    "Column '{}' has unsupported type '{}'",
                    column.name(),
                    column.type_().name()
                ),
            )
            .with_hint("Cast the column to text in the procedure or query"));
        }
        columns.push(column.name().to_string());
    }

    let params: Vec<PgParam<'_>> = statement.parameters.iter().map(PgParam).collect();
    let refs: Vec<&(dyn ToSql + Sync)> = params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
    let rows = client.query(&prepared, &refs).await?;

    let mut decoded = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut values = Vec::with_capacity(columns.len());
        for (i, name) in columns.iter().enumerate() {
            let cell: PgCell = row.try_get(i).map_err(|e| {
                GatewayError::new(
                    ErrorCode::ResultDecodeFailed,
                    format!("Failed to decode column '{}': {}", name, e),
                )
            })?;
            values.push(cell.0);
        }
        decoded.push(values);
    }

    tracing::debug!(target: "postgres", rows = decoded.len(), "Statement complete");
    Ok(BufferedCursor::new(columns, decoded))
}

impl Drop for PgConnection {
    fn drop(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };

        if self.in_flight {
            let token = client.cancel_token();
            let detached = Object::take(client);
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        if let Err(e) = token.cancel_query(NoTls).await {
                            tracing::warn!(target: "postgres", error = %e, "Failed to cancel interrupted statement");
                        }
                        drop(detached);
                    });
                }
                Err(_) => drop(detached),
            }
        } else if self.discard {
            tracing::debug!(target: "postgres", "Discarding connection instead of returning it to the pool");
            drop(Object::take(client));
        }
    }
}
