//! The execution gateway.
//!
//! Every request goes through the same stages:
//!
//! 1. **Validate / bind**: empty names and unusable parameters fail here, before the
//!    cache or the pool are touched.
//! 2. **Cache check**: only when the request enabled caching.
//! 3. **Acquire**: check out a session from the engine; abandoned on cancel.
//! 4. **Execute + normalize**: bounded by the command timeout and the cancel token.
//! 5. **Cache write**: exactly one, only after a successful execution.
//!
//! The session is dropped before any error leaves [`ExecutionGateway::execute`], so
//! its connection (and any proxy it owns) is released first.

use conduit_common::config::GatewayConfig;
use conduit_common::scrubber::scrub;
use conduit_common::{CacheDirective, Operation, OperationKind, OperationRequest, RowSet};
use conduit_connectors::{
    build_engine, normalize, BoundOperation, Engine, ParameterBinder, PoolStatus, Session,
};
use conduit_error::{ErrorCode, GatewayError, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::cache::ResultCache;
use crate::fingerprint::{digest, fingerprint};

pub struct ExecutionGateway {
    engine: Arc<dyn Engine>,
    cache: Arc<ResultCache>,
    binder: ParameterBinder,
    command_timeout: Duration,
}

impl ExecutionGateway {
    pub fn new(engine: Arc<dyn Engine>, cache: Arc<ResultCache>, command_timeout: Duration) -> Self {
        let binder = ParameterBinder::new(engine.identifier_rules());
        Self {
            engine,
            cache,
            binder,
            command_timeout,
        }
    }

    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::default()
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// Pool occupancy, `None` when the engine does not pool connections.
    pub fn pool_status(&self) -> Option<PoolStatus> {
        self.engine.pool_status()
    }

    /// Validate a deserialized request and execute it.
    pub async fn execute_request(
        &self,
        request: OperationRequest,
        cancel: &CancellationToken,
    ) -> Result<Arc<RowSet>> {
        let (operation, directive) = request.into_parts()?;
        self.execute(&operation, &directive, cancel).await
    }

    pub async fn execute(
        &self,
        operation: &Operation,
        directive: &CacheDirective,
        cancel: &CancellationToken,
    ) -> Result<Arc<RowSet>> {
        let request_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!(
            target: "gateway",
            "execute",
            request_id = %request_id,
            engine = self.engine.name(),
            kind = %operation.kind()
        );

        self.execute_inner(operation, directive, cancel)
            .instrument(span)
            .await
            .map_err(|e| {
                e.for_operation(operation.kind().as_str(), operation_label(operation))
                    .with_trace_id(request_id)
            })
    }

    async fn execute_inner(
        &self,
        operation: &Operation,
        directive: &CacheDirective,
        cancel: &CancellationToken,
    ) -> Result<Arc<RowSet>> {
        let start = Instant::now();

        if operation.name().trim().is_empty() {
            return Err(GatewayError::invalid_operation("Operation name is empty"));
        }
        let bound = BoundOperation {
            kind: operation.kind(),
            name: operation.name().to_string(),
            parameters: self.binder.bind(operation.parameters())?,
            cache: *directive,
        };

        let cache_key = if directive.enabled {
            let key = fingerprint(
                bound.kind,
                &bound.name,
                bound.parameters.iter().map(|p| (p.name.as_str(), &p.value)),
            );
            if let Some(rows) = self.cache.get(&key).await {
                info!(
                    target: "gateway",
                    fingerprint = %digest(&key),
                    rows = rows.len(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    cache_hit = true,
                    "Operation served from cache"
                );
                return Ok(rows);
            }
            Some(key)
        } else {
            None
        };

        let mut session = tokio::select! {
            acquired = self.engine.acquire() => acquired?,
            _ = cancel.cancelled() => {
                debug!(target: "gateway", "Cancelled while waiting for a connection");
                return Err(GatewayError::cancelled());
            }
        };

        let outcome = self.run(session.as_mut(), &bound, cancel).await;
        drop(session);
        let rows = Arc::new(outcome?);

        if cancel.is_cancelled() {
            return Err(GatewayError::cancelled());
        }
        if let Some(key) = cache_key {
            let ttl = directive.ttl_or(self.cache.default_ttl());
            self.cache.set(key, rows.clone(), ttl).await;
        }

        info!(
            target: "gateway",
            rows = rows.len(),
            columns = rows.columns().len(),
            duration_ms = start.elapsed().as_millis() as u64,
            cache_hit = false,
            "Operation executed"
        );
        Ok(rows)
    }

    async fn run(
        &self,
        session: &mut dyn Session,
        operation: &BoundOperation,
        cancel: &CancellationToken,
    ) -> Result<RowSet> {
        let work = async {
            let mut cursor = session.run(operation, cancel).await?;
            normalize(cursor.as_mut()).await
        };

        let timed = tokio::select! {
            timed = tokio::time::timeout(self.command_timeout, work) => timed,
            _ = cancel.cancelled() => return Err(GatewayError::cancelled()),
        };

        match timed {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    target: "gateway",
                    timeout_secs = self.command_timeout.as_secs(),
                    "Command timed out"
                );
                Err(GatewayError::new(
                    ErrorCode::CommandTimeout,
                    format!(
                        "Command did not complete within {} seconds",
                        self.command_timeout.as_secs()
                    ),
                )
                .with_hint("Increase 'target.command_timeout_secs' or narrow the operation"))
            }
        }
    }
}

/// Procedure names are logged as is; query text is scrubbed of literals first.
fn operation_label(operation: &Operation) -> String {
    match operation.kind() {
        OperationKind::Procedure => operation.name().to_string(),
        OperationKind::Query => scrub(operation.name()),
    }
}

/// Assembles a gateway from configuration, with optional injected parts.
#[derive(Default)]
pub struct GatewayBuilder {
    engine: Option<Arc<dyn Engine>>,
    cache: Option<Arc<ResultCache>>,
    command_timeout: Option<Duration>,
}

impl GatewayBuilder {
    pub fn engine(mut self, engine: Arc<dyn Engine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Share a cache between gateways instead of creating one from config.
    pub fn cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    /// Fill every part not set explicitly from `config`.
    pub fn build(self, config: &GatewayConfig) -> Result<ExecutionGateway> {
        let engine = match self.engine {
            Some(engine) => engine,
            None => build_engine(config)?,
        };
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(ResultCache::from_config(&config.cache)));
        let command_timeout = self
            .command_timeout
            .unwrap_or_else(|| config.target.command_timeout());

        Ok(ExecutionGateway::new(engine, cache, command_timeout))
    }
}
