use async_trait::async_trait;
use conduit_common::OperationKind;
use conduit_error::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::dialect;
use crate::binder::IdentifierRules;
use crate::engine::{
    BoundOperation, Engine, PoolStatus, RowCursor, Session, SqlConnection, SqlPool, Statement,
};

/// Runs operations on the directly connected Postgres database.
pub struct DirectEngine {
    pool: Arc<dyn SqlPool>,
}

impl DirectEngine {
    pub fn new(pool: Arc<dyn SqlPool>) -> Self {
        Self { pool }
    }
}

/// Render an operation as a single Postgres statement.
pub fn render(operation: &BoundOperation) -> Result<Statement> {
    match operation.kind {
        OperationKind::Procedure => dialect::render_procedure(&operation.name, &operation.parameters),
        OperationKind::Query => dialect::rewrite_query(&operation.name, &operation.parameters),
    }
}

#[async_trait]
impl Engine for DirectEngine {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn identifier_rules(&self) -> IdentifierRules {
        IdentifierRules::POSTGRES
    }

    async fn acquire(&self) -> Result<Box<dyn Session>> {
        let connection = self.pool.checkout().await?;
        Ok(Box::new(DirectSession { connection }))
    }

    fn pool_status(&self) -> Option<PoolStatus> {
        Some(self.pool.status())
    }
}

struct DirectSession {
    connection: Box<dyn SqlConnection>,
}

#[async_trait]
impl Session for DirectSession {
    async fn run(
        &mut self,
        operation: &BoundOperation,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn RowCursor>> {
        let statement = render(operation)?;
        self.connection.execute(&statement, cancel).await
    }
}
