//! Gateway process entry point
//!
//! Reads configuration from the environment, writes the runtime
//! descriptor, connects the bus, starts the background tasks and waits
//! for a termination signal.

use silta_core::{Bus, MemoryBus};
use silta_gateway::{Config, GatewayContext, GatewayError, Result, RuntimeDescriptor};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Connection attempts before startup fails
const BUS_CONNECT_ATTEMPTS: u32 = 10;

/// Pause between connection attempts
const BUS_CONNECT_RETRY: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    RuntimeDescriptor::for_process(&config).write(&config);

    let bus = connect_bus(&config.bus_url).await?;
    let ctx = GatewayContext::new(bus, &config.data_dir, config.rpc_subject.clone());
    let handles = ctx.start();
    info!(
        gateway_id = %ctx.gateway_id(),
        bus_url = %config.bus_url,
        data_dir = %config.data_dir.display(),
        "Gateway running"
    );

    wait_for_shutdown().await;
    info!("Shutting down gateway");
    for handle in handles {
        handle.abort();
    }
    if let Err(e) = ctx.bus().drain().await {
        warn!(error = %e, "Bus drain failed");
    }
    Ok(())
}

/// Open the configured bus, retrying transient failures at startup
async fn connect_bus(url: &str) -> Result<Arc<dyn Bus>> {
    let mut last_err = GatewayError::Unavailable("bus not connected".to_string());
    for attempt in 1..=BUS_CONNECT_ATTEMPTS {
        match try_connect(url) {
            Ok(bus) => return Ok(bus),
            Err(e) => {
                warn!(
                    attempt,
                    max = BUS_CONNECT_ATTEMPTS,
                    error = %e,
                    "Bus connect failed"
                );
                last_err = e;
            }
        }
        if attempt < BUS_CONNECT_ATTEMPTS {
            tokio::time::sleep(BUS_CONNECT_RETRY).await;
        }
    }
    Err(GatewayError::Unavailable(format!(
        "failed to connect to bus after {BUS_CONNECT_ATTEMPTS} attempts: {last_err}"
    )))
}

/// One connection attempt
///
/// `mem://` yields the in-process bus for single-process deployments and
/// demos; networked brokers are reached through a transport adapter
/// implementing [`Bus`], linked by the deployment.
fn try_connect(url: &str) -> Result<Arc<dyn Bus>> {
    if url.starts_with("mem://") {
        return Ok(Arc::new(MemoryBus::new()));
    }
    Err(GatewayError::Config(format!(
        "unsupported bus url {url:?}: no transport adapter linked"
    )))
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}
