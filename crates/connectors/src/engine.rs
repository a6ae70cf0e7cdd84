//! Execution seams shared by every engine.
//!
//! The gateway only talks to [`Engine`], [`Session`] and [`RowCursor`]. SQL engines are
//! built from the lower-level [`SqlPool`] / [`SqlConnection`] pair so that direct
//! execution and the foreign-mapping bridge share one pooling implementation.

use crate::binder::{BoundParameters, IdentifierRules};
use async_trait::async_trait;
use conduit_common::{CacheDirective, OperationKind, RowSet, ScalarValue};
use conduit_error::Result;
use serde::Serialize;
use std::collections::VecDeque;
use tokio_util::sync::CancellationToken;

/// An operation whose parameters passed the binder.
#[derive(Debug, Clone)]
pub struct BoundOperation {
    pub kind: OperationKind,
    pub name: String,
    pub parameters: BoundParameters,
    pub cache: CacheDirective,
}

/// Snapshot of connection pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub max_size: usize,
    pub size: usize,
    pub available: usize,
    pub waiting: usize,
}

#[async_trait]
pub trait Engine: Send + Sync {
    /// Short label used in logs and error context (e.g. "postgres", "relay")
    fn name(&self) -> &'static str;

    fn identifier_rules(&self) -> IdentifierRules;

    /// Check out a session. Dropping the future abandons the checkout.
    async fn acquire(&self) -> Result<Box<dyn Session>>;

    /// `None` for engines that do not pool connections.
    fn pool_status(&self) -> Option<PoolStatus>;
}

#[async_trait]
pub trait Session: Send {
    async fn run(
        &mut self,
        operation: &BoundOperation,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn RowCursor>>;
}

#[async_trait]
pub trait RowCursor: Send {
    fn columns(&self) -> &[String];

    async fn next_row(&mut self) -> Result<Option<Vec<ScalarValue>>>;
}

/// A command ready for the wire: text with positional markers plus values in marker order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub text: String,
    pub parameters: Vec<ScalarValue>,
}

impl Statement {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameters(text: impl Into<String>, parameters: Vec<ScalarValue>) -> Self {
        Self {
            text: text.into(),
            parameters,
        }
    }
}

#[async_trait]
pub trait SqlPool: Send + Sync {
    async fn checkout(&self) -> Result<Box<dyn SqlConnection>>;

    fn status(&self) -> PoolStatus;
}

#[async_trait]
pub trait SqlConnection: Send {
    async fn execute(
        &mut self,
        statement: &Statement,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn RowCursor>>;

    /// Close the connection instead of returning it to the pool when dropped.
    fn discard(&mut self);
}

/// Cursor over rows that are already in memory.
#[derive(Debug, Default)]
pub struct BufferedCursor {
    columns: Vec<String>,
    rows: VecDeque<Vec<ScalarValue>>,
}

impl BufferedCursor {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<ScalarValue>>) -> Self {
        Self {
            columns,
            rows: rows.into(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

impl From<RowSet> for BufferedCursor {
    fn from(set: RowSet) -> Self {
        let columns = set.columns().to_vec();
        let rows = set.rows().map(|row| row.values().to_vec()).collect();
        Self::new(columns, rows)
    }
}

#[async_trait]
impl RowCursor for BufferedCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    async fn next_row(&mut self) -> Result<Option<Vec<ScalarValue>>> {
        Ok(self.rows.pop_front())
    }
}
