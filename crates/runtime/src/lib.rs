//! Conduit runtime: the execution gateway.
//!
//! ```text
//! request ─► bind ─► fingerprint ─► ResultCache ──hit──► Arc<RowSet>
//!                                       │ miss
//!                                       ▼
//!                                Engine::acquire ─► Session::run ─► normalize ─► cache write
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn run(config: conduit_common::config::GatewayConfig) -> conduit_error::Result<()> {
//! use conduit_common::{CacheDirective, Operation};
//! use conduit_runtime::ExecutionGateway;
//! use tokio_util::sync::CancellationToken;
//!
//! let gateway = ExecutionGateway::builder().build(&config)?;
//! let rows = gateway
//!     .execute(
//!         &Operation::procedure("billing.get_invoices").with_parameter("customer", 42),
//!         &CacheDirective::enabled(),
//!         &CancellationToken::new(),
//!     )
//!     .await?;
//! println!("{}", serde_json::to_string(&*rows).unwrap_or_default());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod fingerprint;
pub mod gateway;

pub use cache::{CacheStats, ResultCache};
pub use gateway::{ExecutionGateway, GatewayBuilder};
