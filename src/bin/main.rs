//! watchdns binary entry point.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use watchdns::config::{self, LogFormat, RecordSort, RegistryOptions};
use watchdns::{telemetry, DnsServer, EtcdFleetRegistry, ServiceRegistry};

/// A dynamic DNS server configured by fleet service files.
#[derive(Parser, Debug)]
#[command(name = "watchdns")]
#[command(version, about, long_about = None)]
struct Args {
    /// TLD to serve queries from, must end with a '.'.
    #[arg(long, short = 'd', env = "WDNS_DOMAIN", default_value = "watchdns.")]
    watch_domain: String,

    /// Interval to use for CheckInterval when unspecified in a unit file.
    #[arg(long, env = "WDNS_CHECK_INTERVAL", default_value = "5s", value_parser = humantime::parse_duration)]
    check_interval: Duration,

    /// Timeout for TCP and HTTP checks when unspecified in a unit file.
    #[arg(long, env = "WDNS_CHECK_TIMEOUT", default_value = "3s", value_parser = humantime::parse_duration)]
    check_timeout: Duration,

    /// Number of concurrent health checks to run.
    #[arg(long, short = 'c', env = "WDNS_CHECK_CONCURRENT", default_value_t = 20)]
    check_concurrent: usize,

    /// Maximum tick resolution for health check intervals.
    #[arg(long, env = "WDNS_CHECK_RESOLUTION", default_value = "1s", value_parser = humantime::parse_duration)]
    check_resolution: Duration,

    /// Time to wait between polling fleet for service changes.
    #[arg(long, short = 'i', env = "WDNS_FLEET_INTERVAL", default_value = "3s", value_parser = humantime::parse_duration)]
    fleet_interval: Duration,

    /// Comma-delimited list of etcd peers to connect to.
    #[arg(long, short = 'e', env = "WDNS_ETCD_PEERS", default_value = "http://localhost:4001")]
    etcd_peers: String,

    /// Timeout for etcd operations to complete.
    #[arg(long, env = "WDNS_ETCD_TIMEOUT", default_value = "5s", value_parser = humantime::parse_duration)]
    etcd_timeout: Duration,

    /// Prefix for the fleet registry in etcd.
    #[arg(long, env = "WDNS_FLEET_PREFIX", default_value = "/_coreos.com/fleet")]
    fleet_prefix: String,

    /// Bind address for the DNS responder.
    #[arg(long, short = 'b', env = "WDNS_BIND_ADDRESS", default_value = ":8053")]
    bind_address: String,

    /// Log verbosity level.
    #[arg(long, short = 'l', env = "WDNS_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Log output format.
    #[arg(long, short = 'o', env = "WDNS_LOG_FORMAT", default_value = "ascii", value_enum)]
    log_format: LogFormat,

    /// Sort order for DNS responses.
    #[arg(long, short = 's', env = "WDNS_RECORD_SORT", default_value = "default", value_enum)]
    record_sort: RecordSort,

    /// Address to expose Prometheus metrics on, if any.
    #[cfg(feature = "prometheus")]
    #[arg(long, env = "WDNS_METRICS_ADDRESS")]
    metrics_address: Option<std::net::SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    telemetry::init(&args.log_level, args.log_format)?;

    config::validate_domain(&args.watch_domain)?;
    let bind_address = config::parse_bind_address(&args.bind_address)?;

    #[cfg(feature = "prometheus")]
    if let Some(addr) = args.metrics_address {
        telemetry::start_prometheus_exporter(addr)?;
    }

    let options = RegistryOptions {
        domain: args.watch_domain.clone(),
        check_resolution: args.check_resolution,
        fleet_interval: args.fleet_interval,
        check_interval: args.check_interval,
        check_timeout: args.check_timeout,
        check_concurrent: args.check_concurrent,
        record_sort: args.record_sort,
    };

    let peers: Vec<String> = args
        .etcd_peers
        .split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    let fleet = EtcdFleetRegistry::new(peers, &args.fleet_prefix, args.etcd_timeout)?;

    info!(
        domain = %args.watch_domain,
        bind_address = %bind_address,
        etcd_peers = %args.etcd_peers,
        "Starting watchdns"
    );

    // Graceful shutdown on ctrl-c
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_cancel.cancel();
        }
    });

    let record_sort = options.record_sort;
    let registry = ServiceRegistry::new(Arc::new(fleet), options);
    let handle = registry.start(cancel.clone()).await?;

    let server = DnsServer::new(bind_address, handle, record_sort);
    let result = server.run(cancel).await;

    if let Err(e) = result {
        error!(error = %e, "DNS server error");
        return Err(e.into());
    }

    info!("watchdns shutdown complete");
    Ok(())
}
