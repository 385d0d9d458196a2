//! Per-unit service declarations parsed from the `[X-Watchdns]` section.

use std::time::Duration;

use tracing::warn;
use url::Url;

use crate::config::RegistryOptions;
use crate::error::Error;
use crate::unit::{UnitOption, UnitVars};

/// Unit file section holding watchdns options.
const OPTION_SECTION: &str = "X-Watchdns";

/// A single SRV record declaration, parsed from
/// `service:protocol:port[:priority[:weight]]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvOption {
    /// Service label, without the leading `_`.
    pub service: String,
    /// Protocol label, without the leading `_`.
    pub protocol: String,
    /// Target port.
    pub port: u16,
    /// Record priority; lower is preferred.
    pub priority: u16,
    /// Record weight within a priority.
    pub weight: u16,
}

/// Parse an SRV declaration. Priority and weight default to 0.
pub fn parse_srv_option(val: &str) -> Result<SrvOption, Error> {
    let parts: Vec<&str> = val.split(':').collect();
    if parts.len() < 3 {
        return Err(Error::UnitOption(format!(
            "invalid format '{val}', should be <service>:<protocol>:<port>[:priority[:weight]]"
        )));
    }
    let port = parts[2]
        .parse::<u16>()
        .map_err(|e| Error::UnitOption(format!("bad port specifier '{}': {e}", parts[2])))?;
    let priority = match parts.get(3) {
        Some(p) => p
            .parse::<u16>()
            .map_err(|e| Error::UnitOption(format!("bad priority specifier '{p}': {e}")))?,
        None => 0,
    };
    let weight = match parts.get(4) {
        Some(w) => w
            .parse::<u16>()
            .map_err(|e| Error::UnitOption(format!("bad weight specifier '{w}': {e}")))?,
        None => 0,
    };
    Ok(SrvOption {
        service: parts[0].to_string(),
        protocol: parts[1].to_string(),
        port,
        priority,
        weight,
    })
}

/// Validate a `host:port` probe endpoint. The host is resolved at dial
/// time by the connector.
fn parse_tcp_endpoint(val: &str) -> Result<String, Error> {
    match val.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            port.parse::<u16>()
                .map_err(|e| Error::UnitOption(format!("bad port in '{val}': {e}")))?;
            Ok(val.to_string())
        }
        _ => Err(Error::UnitOption(format!(
            "invalid endpoint '{val}', should be <host>:<port>"
        ))),
    }
}

/// The derived per-unit service declaration: name, tags, SRV records and
/// health-check configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceOption {
    /// Service name; defaults to the unescaped unit prefix (`%P`).
    pub name: String,
    /// Ordered tags. Instance units get an implicit `i-<instance>` first.
    pub tags: Vec<String>,
    /// Declared SRV records.
    pub srv_options: Vec<SrvOption>,
    /// HTTP probe URLs.
    pub check_http: Vec<Url>,
    /// TCP probe endpoints as `host:port`.
    pub check_tcp: Vec<String>,
    /// Interval between probe cycles.
    pub check_interval: Duration,
    /// Per-probe deadline.
    pub check_timeout: Duration,
}

impl Default for ServiceOption {
    fn default() -> Self {
        Self {
            name: String::new(),
            tags: Vec::new(),
            srv_options: Vec::new(),
            check_http: Vec::new(),
            check_tcp: Vec::new(),
            check_interval: Duration::ZERO,
            check_timeout: Duration::ZERO,
        }
    }
}

impl ServiceOption {
    /// Build a service declaration from a unit's options.
    ///
    /// Only the `[X-Watchdns]` section is consulted. Malformed values and
    /// unknown keys are logged and skipped; they never invalidate the
    /// unit. All values go through `%`-specifier expansion first.
    pub fn from_unit_options(
        vars: &UnitVars,
        defaults: &RegistryOptions,
        opts: &[UnitOption],
    ) -> Self {
        let mut svc = ServiceOption {
            name: vars.expand_value("%P"),
            check_interval: defaults.check_interval,
            check_timeout: defaults.check_timeout,
            ..Default::default()
        };
        if !vars.instance_name.is_empty() {
            svc.tags.push(format!("i-{}", vars.expand_value("%I")));
        }

        for opt in opts.iter().filter(|o| o.section == OPTION_SECTION) {
            match opt.name.as_str() {
                "Name" => svc.name = vars.expand_value(&opt.value),
                "Tag" => svc.tags.push(vars.expand_value(&opt.value)),
                "Srv" => match parse_srv_option(&vars.expand_value(&opt.value)) {
                    Ok(srv) => svc.srv_options.push(srv),
                    Err(e) => warn!(
                        unit = %vars.unit_name,
                        value = %opt.value,
                        error = %e,
                        "could not parse Srv value"
                    ),
                },
                "CheckHttp" => match Url::parse(&vars.expand_value(&opt.value)) {
                    Ok(url) => svc.check_http.push(url),
                    Err(e) => warn!(
                        unit = %vars.unit_name,
                        value = %opt.value,
                        error = %e,
                        "could not parse CheckHttp value"
                    ),
                },
                "CheckTcp" => match parse_tcp_endpoint(&vars.expand_value(&opt.value)) {
                    Ok(addr) => svc.check_tcp.push(addr),
                    Err(e) => warn!(
                        unit = %vars.unit_name,
                        value = %opt.value,
                        error = %e,
                        "could not parse CheckTcp value"
                    ),
                },
                "CheckInterval" => match humantime::parse_duration(&opt.value) {
                    Ok(d) => svc.check_interval = d,
                    Err(e) => warn!(
                        unit = %vars.unit_name,
                        value = %opt.value,
                        error = %e,
                        "could not parse CheckInterval value"
                    ),
                },
                "CheckTimeout" => match humantime::parse_duration(&opt.value) {
                    Ok(d) => svc.check_timeout = d,
                    Err(e) => warn!(
                        unit = %vars.unit_name,
                        value = %opt.value,
                        error = %e,
                        "could not parse CheckTimeout value"
                    ),
                },
                other => warn!(
                    unit = %vars.unit_name,
                    field = other,
                    "skipping unknown field"
                ),
            }
        }
        svc
    }
}
