//! Conduit command-line runner.
//!
//! Loads the gateway configuration, reads one operation request as JSON from stdin,
//! executes it and prints the rows (or the structured error) as JSON on stdout.
//!
//! ```text
//! echo '{"kind":"procedure","name":"billing.get_invoices","parameters":{"customer":42}}' \
//!     | CONDUIT__TARGET__CONNECTION_STRING="host=localhost user=app" conduit
//! ```
use anyhow::Context;
use conduit_common::config::GatewayConfig;
use conduit_common::telemetry::init_tracing;
use conduit_common::OperationRequest;
use conduit_runtime::ExecutionGateway;
use std::io::Read;
use tokio_util::sync::CancellationToken;

const DEFAULT_CONFIG_PATH: &str = "config/conduit.yaml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("CONDUIT_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let config = GatewayConfig::from_file(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;
    init_tracing(&config.telemetry)?;

    let gateway = ExecutionGateway::builder().build(&config)?;
    tracing::info!(engine = gateway.engine_name(), "Gateway ready");

    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("Failed to read request from stdin")?;
    let request: OperationRequest =
        serde_json::from_str(&input).context("Request is not a valid operation")?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let outcome = gateway.execute_request(request, &cancel).await;
    gateway.cache().shutdown().await;

    match outcome {
        Ok(rows) => {
            println!("{}", serde_json::to_string(&*rows)?);
            Ok(())
        }
        Err(e) => {
            println!("{}", e.to_json());
            std::process::exit(if e.status_code() >= 500 { 2 } else { 1 });
        }
    }
}
