#![allow(dead_code)]

use async_trait::async_trait;
use conduit_common::ScalarValue;
use conduit_connectors::{
    BufferedCursor, PoolStatus, RowCursor, SqlConnection, SqlPool, Statement,
};
use conduit_error::{GatewayError, Result};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// What a scripted connection does with a statement.
pub enum Reply {
    Rows(Vec<String>, Vec<Vec<ScalarValue>>),
    Fail(GatewayError),
    /// Block until the caller cancels.
    Hang,
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Rows(Vec::new(), Vec::new())
    }

    pub fn payloads(payloads: &[&str]) -> Self {
        Reply::Rows(
            vec!["payload".to_string()],
            payloads.iter().map(|p| vec![ScalarValue::from(*p)]).collect(),
        )
    }
}

type Script = dyn Fn(&Statement) -> Reply + Send + Sync;

#[derive(Debug, Default)]
pub struct Journal {
    pub statements: Vec<Statement>,
    pub checkouts: usize,
    pub discarded: usize,
    pub released: usize,
}

/// In-memory pool whose connections record every statement they see.
pub struct StubPool {
    journal: Arc<Mutex<Journal>>,
    script: Arc<Script>,
}

impl StubPool {
    pub fn new(script: impl Fn(&Statement) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            journal: Arc::new(Mutex::new(Journal::default())),
            script: Arc::new(script),
        }
    }

    pub fn statements(&self) -> Vec<Statement> {
        self.journal.lock().unwrap().statements.clone()
    }

    pub fn count_matching(&self, prefix: &str) -> usize {
        self.statements()
            .iter()
            .filter(|s| s.text.starts_with(prefix))
            .count()
    }

    pub fn discarded(&self) -> usize {
        self.journal.lock().unwrap().discarded
    }

    pub fn released(&self) -> usize {
        self.journal.lock().unwrap().released
    }
}

#[async_trait]
impl SqlPool for StubPool {
    async fn checkout(&self) -> Result<Box<dyn SqlConnection>> {
        self.journal.lock().unwrap().checkouts += 1;
        Ok(Box::new(StubConnection {
            journal: self.journal.clone(),
            script: self.script.clone(),
            discard: false,
        }))
    }

    fn status(&self) -> PoolStatus {
        let journal = self.journal.lock().unwrap();
        let in_use = journal.checkouts - journal.discarded - journal.released;
        PoolStatus {
            max_size: 4,
            size: in_use,
            available: 0,
            waiting: 0,
        }
    }
}

struct StubConnection {
    journal: Arc<Mutex<Journal>>,
    script: Arc<Script>,
    discard: bool,
}

#[async_trait]
impl SqlConnection for StubConnection {
    async fn execute(
        &mut self,
        statement: &Statement,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn RowCursor>> {
        self.journal.lock().unwrap().statements.push(statement.clone());
        match (self.script)(statement) {
            Reply::Rows(columns, rows) => Ok(Box::new(BufferedCursor::new(columns, rows))),
            Reply::Fail(err) => Err(err),
            Reply::Hang => {
                cancel.cancelled().await;
                Err(GatewayError::cancelled())
            }
        }
    }

    fn discard(&mut self) {
        self.discard = true;
    }
}

impl Drop for StubConnection {
    fn drop(&mut self) {
        let mut journal = self.journal.lock().unwrap();
        if self.discard {
            journal.discarded += 1;
        } else {
            journal.released += 1;
        }
    }
}
