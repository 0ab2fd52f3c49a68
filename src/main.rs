pub mod avr;
pub mod bridge;
pub mod config;
pub mod mqtt;
pub mod translation;

use crate::bridge::Bridge;
use crate::config::BridgeConfig;
use color_eyre::Result;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

// One thread is enough: every task is I/O bound and the receiver connection
// is serialized anyway.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    setup()?;

    info!(
        "{} {} starting",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let config = BridgeConfig::from_env().inspect_err(|e| error!("{}", e))?;

    let bridge = Bridge::create(config).start();

    let shutdown = bridge.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupt received"),
            Err(e) => error!("Unable to listen for shutdown signal: {}", e),
        }
        shutdown.cancel();
    });

    bridge.run_until_shutdown().await?;
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .init();
}
