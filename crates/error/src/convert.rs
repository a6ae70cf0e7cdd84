use crate::{ErrorCode, ErrorContext, ErrorKind, GatewayError};
use deadpool::managed::TimeoutType;
use deadpool_postgres::PoolError;

const ENGINE_POSTGRES: &str = "postgres";

impl From<tokio_postgres::Error> for GatewayError {
    fn from(err: tokio_postgres::Error) -> Self {
        if let Some(db) = err.as_db_error() {
            let sqlstate = db.code().code();
            let code = match &sqlstate[..2] {
                "28" => ErrorCode::AuthenticationFailed,
                "08" => ErrorCode::ConnectionLost,
                _ if sqlstate == "53300" => ErrorCode::ConnectionRefused,
                _ => ErrorCode::ExecutionFailed,
            };

            if let Some(detail) = db.detail() {
                tracing::debug!(target: "postgres", sqlstate, detail, "Engine error detail");
            }

            let mut error = GatewayError::new(code, db.message().to_string()).with_context(
                ErrorContext::Engine {
                    engine: ENGINE_POSTGRES.to_string(),
                    sqlstate: Some(sqlstate.to_string()),
                    detail: db.detail().map(str::to_string),
                },
            );
            if let Some(hint) = db.hint() {
                error = error.with_hint(hint);
            }
            return error;
        }

        if err.is_closed() {
            return GatewayError::new(ErrorCode::ConnectionLost, err.to_string());
        }

        let io_failure = std::error::Error::source(&err)
            .map(|source| source.is::<std::io::Error>())
            .unwrap_or(false);
        if io_failure {
            return GatewayError::new(ErrorCode::ConnectionRefused, err.to_string());
        }

        GatewayError::new(ErrorCode::ExecutionFailed, err.to_string()).with_context(
            ErrorContext::Engine {
                engine: ENGINE_POSTGRES.to_string(),
                sqlstate: None,
                detail: None,
            },
        )
    }
}

impl From<PoolError> for GatewayError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Timeout(TimeoutType::Create) => GatewayError::new(
                ErrorCode::ConnectionTimeout,
                "Timed out connecting to the target engine",
            ),
            PoolError::Timeout(_) => GatewayError::new(
                ErrorCode::PoolExhausted,
                "No pooled connection became available in time",
            )
            .with_hint("Raise target.max_pool_size or target.acquire_timeout_ms"),
            PoolError::Backend(e) => {
                // Anything that fails while establishing a connection is a connection failure.
                let mut error = GatewayError::from(e);
                if error.kind() != ErrorKind::ConnectionFailure {
                    error.code = ErrorCode::ConnectionRefused;
                }
                error
            }
            PoolError::Closed => {
                GatewayError::new(ErrorCode::ConnectionRefused, "Connection pool is closed")
            }
            PoolError::NoRuntimeSpecified => GatewayError::new(
                ErrorCode::InvalidConfiguration,
                "Connection pool has no async runtime configured",
            ),
            PoolError::PostCreateHook(e) => GatewayError::new(
                ErrorCode::ConnectionRefused,
                format!("Connection setup hook failed: {}", e),
            ),
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        let code = if err.is_timeout() {
            if err.is_connect() {
                ErrorCode::ConnectionTimeout
            } else {
                ErrorCode::CommandTimeout
            }
        } else if err.is_connect() {
            ErrorCode::ConnectionRefused
        } else if err.is_decode() {
            ErrorCode::ResultDecodeFailed
        } else {
            ErrorCode::ConnectionLost
        };
        // Strip the endpoint URL, it may embed credentials.
        GatewayError::new(code, err.without_url().to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::new(ErrorCode::SerializationFailed, err.to_string())
    }
}
