#![allow(dead_code)]

use async_trait::async_trait;
use conduit_common::ScalarValue;
use conduit_connectors::{
    BoundOperation, BufferedCursor, Engine, IdentifierRules, PoolStatus, RowCursor, Session,
};
use conduit_error::{ErrorCode, GatewayError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub enum Behavior {
    Rows(Vec<String>, Vec<Vec<ScalarValue>>),
    Fail(ErrorCode, &'static str),
    /// Never finishes on its own.
    Hang,
    /// Produces rows, but the request is cancelled while they are in flight.
    CancelledAfterRows(Vec<String>, Vec<Vec<ScalarValue>>),
}

/// Engine double with a fixed-size "pool" and a run counter.
pub struct StubEngine {
    behavior: Mutex<Behavior>,
    permits: Arc<Semaphore>,
    pool_size: usize,
    runs: Arc<AtomicUsize>,
    acquires: AtomicUsize,
    last: Arc<Mutex<Option<BoundOperation>>>,
}

impl StubEngine {
    pub fn new(pool_size: usize, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            permits: Arc::new(Semaphore::new(pool_size)),
            pool_size,
            runs: Arc::new(AtomicUsize::new(0)),
            acquires: AtomicUsize::new(0),
            last: Arc::new(Mutex::new(None)),
        })
    }

    pub fn returning(columns: &[&str], rows: Vec<Vec<ScalarValue>>) -> Arc<Self> {
        Self::new(
            2,
            Behavior::Rows(columns.iter().map(|c| c.to_string()).collect(), rows),
        )
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn acquires(&self) -> usize {
        self.acquires.load(Ordering::SeqCst)
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn last_operation(&self) -> Option<BoundOperation> {
        self.last.lock().unwrap().clone()
    }

    /// Take a connection out of the pool from outside the gateway.
    pub async fn hold(&self) -> OwnedSemaphorePermit {
        self.permits.clone().acquire_owned().await.unwrap()
    }
}

#[async_trait]
impl Engine for StubEngine {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn identifier_rules(&self) -> IdentifierRules {
        IdentifierRules::POSTGRES
    }

    async fn acquire(&self) -> Result<Box<dyn Session>> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| GatewayError::new(ErrorCode::PoolExhausted, "pool closed"))?;
        self.acquires.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubSession {
            _permit: permit,
            behavior: self.behavior.lock().unwrap().clone(),
            runs: self.runs.clone(),
            last: self.last.clone(),
        }))
    }

    fn pool_status(&self) -> Option<PoolStatus> {
        let available = self.available();
        Some(PoolStatus {
            max_size: self.pool_size,
            size: self.pool_size,
            available,
            waiting: 0,
        })
    }
}

struct StubSession {
    _permit: OwnedSemaphorePermit,
    behavior: Behavior,
    runs: Arc<AtomicUsize>,
    last: Arc<Mutex<Option<BoundOperation>>>,
}

#[async_trait]
impl Session for StubSession {
    async fn run(
        &mut self,
        operation: &BoundOperation,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn RowCursor>> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(operation.clone());
        match &self.behavior {
            Behavior::Rows(columns, rows) => {
                Ok(Box::new(BufferedCursor::new(columns.clone(), rows.clone())))
            }
            Behavior::Fail(code, message) => Err(GatewayError::new(*code, *message)),
            Behavior::Hang => {
                cancel.cancelled().await;
                Err(GatewayError::cancelled())
            }
            Behavior::CancelledAfterRows(columns, rows) => {
                cancel.cancel();
                Ok(Box::new(BufferedCursor::new(columns.clone(), rows.clone())))
            }
        }
    }
}
