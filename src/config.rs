//! Configuration types for watchdns.

use std::net::SocketAddr;
use std::time::Duration;

use clap::ValueEnum;

use crate::error::Error;

/// Options governing the service registry and its health checking.
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Domain served by the registry. Must end with a `.` and match
    /// `^[a-z][a-z0-9-.]*\.$`.
    pub domain: String,

    /// Cadence of the health-check scheduling tick.
    pub check_resolution: Duration,

    /// Cadence of fleet polls.
    pub fleet_interval: Duration,

    /// Default probe interval for units that do not declare `CheckInterval`.
    pub check_interval: Duration,

    /// Default probe deadline for units that do not declare `CheckTimeout`.
    pub check_timeout: Duration,

    /// Maximum number of concurrently running probes.
    pub check_concurrent: usize,

    /// Ordering applied to DNS answer sections.
    pub record_sort: RecordSort,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            domain: "watchdns.".to_string(),
            check_resolution: Duration::from_secs(1),
            fleet_interval: Duration::from_secs(3),
            check_interval: Duration::from_secs(5),
            check_timeout: Duration::from_secs(3),
            check_concurrent: 20,
            record_sort: RecordSort::Default,
        }
    }
}

/// Ordering applied to the answer section of a DNS response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RecordSort {
    /// Preserve insertion order.
    #[value(name = "default")]
    Default,
    /// Permute answers uniformly at random.
    #[value(name = "random")]
    Random,
    /// Rotate answers per query name so each record leads in turn.
    #[value(name = "roundrobin")]
    RoundRobin,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[value(name = "ascii")]
    Ascii,
    /// Newline-delimited JSON.
    #[value(name = "json")]
    Json,
}

/// Validate a watch domain: `^[a-z][a-z0-9-.]*\.$`.
pub fn validate_domain(domain: &str) -> Result<(), Error> {
    let mut chars = domain.chars();
    let valid = matches!(chars.next(), Some('a'..='z'))
        && chars.all(|c| matches!(c, 'a'..='z' | '0'..='9' | '-' | '.'))
        && domain.ends_with('.');
    if valid {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "invalid domain '{domain}', must end with '.' and match ^[a-z][a-z0-9-.]*\\.$"
        )))
    }
}

/// Parse a bind address, accepting the `:port` shorthand for the wildcard
/// interface.
pub fn parse_bind_address(addr: &str) -> Result<SocketAddr, Error> {
    let normalized = if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    };
    normalized
        .parse()
        .map_err(|_| Error::Config(format!("invalid bind address '{addr}'")))
}
