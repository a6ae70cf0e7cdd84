use async_trait::async_trait;
use conduit_error::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::proxy::{ProxyFunction, ProxyGuard};
use crate::binder::IdentifierRules;
use crate::engine::{
    BoundOperation, BufferedCursor, Engine, PoolStatus, RowCursor, Session, SqlConnection,
    SqlPool,
};

/// Reaches a foreign database through a `dblink` server alias on the target.
///
/// Every execution creates its own proxy function, calls it once and drops it.
pub struct ForeignMappingEngine {
    pool: Arc<dyn SqlPool>,
    server_alias: String,
}

impl ForeignMappingEngine {
    pub fn new(pool: Arc<dyn SqlPool>, server_alias: impl Into<String>) -> Self {
        Self {
            pool,
            server_alias: server_alias.into(),
        }
    }
}

#[async_trait]
impl Engine for ForeignMappingEngine {
    fn name(&self) -> &'static str {
        "foreign_mapping"
    }

    fn identifier_rules(&self) -> IdentifierRules {
        IdentifierRules::POSTGRES
    }

    async fn acquire(&self) -> Result<Box<dyn Session>> {
        let connection = self.pool.checkout().await?;
        Ok(Box::new(ForeignSession {
            connection,
            server_alias: self.server_alias.clone(),
        }))
    }

    fn pool_status(&self) -> Option<PoolStatus> {
        Some(self.pool.status())
    }
}

struct ForeignSession {
    connection: Box<dyn SqlConnection>,
    server_alias: String,
}

#[async_trait]
impl Session for ForeignSession {
    async fn run(
        &mut self,
        operation: &BoundOperation,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn RowCursor>> {
        let proxy = ProxyFunction::for_operation(&self.server_alias, operation)?;
        let proxy_name = proxy.name().to_string();

        let mut guard = ProxyGuard::create(self.connection.as_mut(), proxy, cancel).await?;
        let outcome = guard.call(cancel).await;

        if let Err(teardown) = guard.destroy(cancel).await {
            // never replaces the call's own outcome
            tracing::warn!(
                target: "bridge",
                proxy = %proxy_name,
                code = %teardown.code,
                kind = ?teardown.kind(),
                error = %teardown.message,
                "Proxy teardown failed"
            );
        }

        let rows = outcome?;
        tracing::debug!(target: "bridge", proxy = %proxy_name, rows = rows.len(), "Foreign call complete");
        Ok(Box::new(BufferedCursor::from(rows)))
    }
}
