//! Engine adapters.
//!
//! Conduit executes every operation through one [`Engine`], chosen at startup from
//! the `bridge` section of the configuration.
//!
//! # Supported Engines
//!
//! | Strategy          | Implementation          | Description |
//! |-------------------|-------------------------|-------------|
//! | _(none)_          | `DirectEngine`          | Runs procedures and queries on the pooled Postgres target |
//! | `foreign_mapping` | `ForeignMappingEngine`  | Forwards through a `dblink` server alias via a transient proxy function |
//! | `relay`           | `RelayEngine`           | POSTs the operation to an HTTP relay service |

use conduit_common::config::{BridgeConfig, GatewayConfig};
use conduit_error::Result;
use std::sync::Arc;

use crate::engine::{Engine, SqlPool};

pub mod bridge;
pub mod sql;

/// Build the engine described by `config`.
///
/// Postgres pools are created lazily, so this does not touch the network.
pub fn build_engine(config: &GatewayConfig) -> Result<Arc<dyn Engine>> {
    let engine: Arc<dyn Engine> = match &config.bridge {
        None => {
            let pool: Arc<dyn SqlPool> = Arc::new(sql::PgPool::connect(&config.target)?);
            Arc::new(sql::DirectEngine::new(pool))
        }
        Some(BridgeConfig::ForeignMapping { server_alias }) => {
            let pool: Arc<dyn SqlPool> = Arc::new(sql::PgPool::connect(&config.target)?);
            Arc::new(bridge::ForeignMappingEngine::new(pool, server_alias.clone()))
        }
        Some(BridgeConfig::Relay {
            endpoint,
            api_key,
            timeout_secs,
        }) => Arc::new(bridge::RelayEngine::new(
            endpoint,
            api_key.clone(),
            std::time::Duration::from_secs(*timeout_secs),
        )?),
    };

    tracing::info!(target: "gateway", engine = engine.name(), "Engine configured");
    Ok(engine)
}
