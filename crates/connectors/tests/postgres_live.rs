//! Live Postgres tests.
//!
//! Skipped unless `CONDUIT_TEST_DATABASE_URL` points at a disposable database.

use conduit_common::config::TargetConfig;
use conduit_common::{CacheDirective, OperationKind, ParameterMap, ScalarValue};
use conduit_connectors::sources::sql::{DirectEngine, PgPool};
use conduit_connectors::{normalize, BoundOperation, Engine, IdentifierRules, ParameterBinder};
use conduit_error::ErrorCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn engine() -> Option<DirectEngine> {
    let url = std::env::var("CONDUIT_TEST_DATABASE_URL").ok()?;
    let pool = PgPool::connect(&TargetConfig::new(url)).unwrap();
    Some(DirectEngine::new(Arc::new(pool)))
}

fn query(text: &str, params: &[(&str, ScalarValue)]) -> BoundOperation {
    let map: ParameterMap = params
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    BoundOperation {
        kind: OperationKind::Query,
        name: text.to_string(),
        parameters: ParameterBinder::new(IdentifierRules::POSTGRES)
            .bind(&map)
            .unwrap(),
        cache: CacheDirective::disabled(),
    }
}

#[tokio::test]
async fn test_live_scalar_round_trip() {
    let Some(engine) = engine() else {
        eprintln!("CONDUIT_TEST_DATABASE_URL not set, skipping");
        return;
    };

    let op = query(
        "SELECT @i::int8 AS i, @t::text AS t, @n::text AS n, @b::bool AS b, 1.50::numeric AS d",
        &[
            ("i", 9_007_199_254_740_993i64.into()),
            ("t", "O'Brien".into()),
            ("n", ScalarValue::Null),
            ("b", true.into()),
        ],
    );
    let mut session = engine.acquire().await.unwrap();
    let mut cursor = session.run(&op, &CancellationToken::new()).await.unwrap();
    let rows = normalize(cursor.as_mut()).await.unwrap();
    let row = rows.row(0).unwrap();

    assert_eq!(rows.columns(), &["i", "t", "n", "b", "d"].map(String::from));
    assert_eq!(row.get("i"), Some(&ScalarValue::Int(9_007_199_254_740_993)));
    assert_eq!(row.get("t"), Some(&ScalarValue::from("O'Brien")));
    assert_eq!(row.get("n"), Some(&ScalarValue::Null));
    assert_eq!(row.get("b"), Some(&ScalarValue::Bool(true)));
    assert_eq!(row.get("d"), Some(&ScalarValue::from("1.50")));
}

#[tokio::test]
async fn test_live_engine_error_is_execution_failure() {
    let Some(engine) = engine() else {
        return;
    };

    let op = query("SELECT * FROM conduit_table_that_does_not_exist", &[]);
    let mut session = engine.acquire().await.unwrap();
    let err = session
        .run(&op, &CancellationToken::new())
        .await
        .err()
        .unwrap();
    assert_eq!(err.code, ErrorCode::ExecutionFailed);
}
