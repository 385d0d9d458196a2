//! Telemetry setup for watchdns.
//!
//! Supports:
//! - Tracing with configurable level and ascii/json output
//! - Prometheus metrics endpoint (with `prometheus` feature)

#[cfg(feature = "prometheus")]
use std::net::SocketAddr;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LogFormat;
use crate::error::Error;

/// Initialize tracing from the configured level and format.
///
/// The level string accepts anything `EnvFilter` does (`warn`,
/// `watchdns=debug,info`, ...); an unparsable level is fatal.
pub fn init(log_level: &str, log_format: LogFormat) -> Result<(), Error> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| Error::Config(format!("invalid log level '{log_level}': {e}")))?;

    match log_format {
        LogFormat::Ascii => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }
    Ok(())
}

/// Start the Prometheus metrics HTTP exporter.
#[cfg(feature = "prometheus")]
pub fn start_prometheus_exporter(addr: SocketAddr) -> Result<(), Error> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| Error::Config(format!("failed to start metrics exporter: {e}")))?;

    tracing::info!(%addr, "Prometheus metrics exporter started");
    Ok(())
}
