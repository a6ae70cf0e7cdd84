//! Direct Postgres engine tests against a scripted pool.

mod common;

use common::{Reply, StubPool};
use conduit_common::{CacheDirective, OperationKind, ParameterMap, ScalarValue};
use conduit_connectors::sources::sql::DirectEngine;
use conduit_connectors::{normalize, BoundOperation, Engine, IdentifierRules, ParameterBinder};
use conduit_error::{ErrorCode, ErrorKind};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn bound(kind: OperationKind, name: &str, params: &[(&str, ScalarValue)]) -> BoundOperation {
    let map: ParameterMap = params
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    BoundOperation {
        kind,
        name: name.to_string(),
        parameters: ParameterBinder::new(IdentifierRules::POSTGRES)
            .bind(&map)
            .unwrap(),
        cache: CacheDirective::disabled(),
    }
}

#[tokio::test]
async fn test_procedure_runs_as_one_bound_statement() {
    let pool = Arc::new(StubPool::new(|_| {
        Reply::Rows(
            vec!["order_id".into(), "shipped".into()],
            vec![vec![7.into(), true.into()]],
        )
    }));
    let engine = DirectEngine::new(pool.clone());
    let op = bound(
        OperationKind::Procedure,
        "sales.orders_for",
        &[("@customer", 42.into()), ("note", "it's fine".into())],
    );

    let mut session = engine.acquire().await.unwrap();
    let mut cursor = session.run(&op, &CancellationToken::new()).await.unwrap();
    let rows = normalize(cursor.as_mut()).await.unwrap();
    drop(session);

    assert_eq!(rows.row(0).unwrap().get("shipped"), Some(&ScalarValue::Bool(true)));

    let statements = pool.statements();
    assert_eq!(statements.len(), 1);
    assert_eq!(
        statements[0].text,
        r#"SELECT * FROM "sales"."orders_for"("customer" => $1, "note" => $2)"#
    );
    assert_eq!(statements[0].parameters, vec![42.into(), "it's fine".into()]);
    assert_eq!(pool.released(), 1);
}

#[tokio::test]
async fn test_query_placeholders_become_markers() {
    let pool = Arc::new(StubPool::new(|_| Reply::ok()));
    let engine = DirectEngine::new(pool.clone());
    let op = bound(
        OperationKind::Query,
        "SELECT * FROM t WHERE a = @a OR b = @a AND c = ':literal @a'",
        &[("a", ScalarValue::Null), ("unused", 1.into())],
    );

    let mut session = engine.acquire().await.unwrap();
    session.run(&op, &CancellationToken::new()).await.unwrap();

    let statement = &pool.statements()[0];
    assert_eq!(
        statement.text,
        "SELECT * FROM t WHERE a = $1 OR b = $1 AND c = ':literal @a'"
    );
    assert_eq!(statement.parameters, vec![ScalarValue::Null]);
}

#[tokio::test]
async fn test_invalid_procedure_name_never_reaches_pool() {
    let pool = Arc::new(StubPool::new(|_| Reply::ok()));
    let engine = DirectEngine::new(pool.clone());
    let op = bound(OperationKind::Procedure, "a.b.c", &[]);

    let mut session = engine.acquire().await.unwrap();
    let err = session
        .run(&op, &CancellationToken::new())
        .await
        .err()
        .unwrap();

    assert_eq!(err.code, ErrorCode::InvalidOperation);
    assert!(pool.statements().is_empty());
}

#[tokio::test]
async fn test_cancel_interrupts_statement() {
    let pool = Arc::new(StubPool::new(|_| Reply::Hang));
    let engine = DirectEngine::new(pool.clone());
    let op = bound(OperationKind::Procedure, "reports.slow", &[]);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let mut session = engine.acquire().await.unwrap();
    let err = session.run(&op, &cancel).await.err().unwrap();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(err.status_code(), 499);
}
