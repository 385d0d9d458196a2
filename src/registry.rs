//! The service registry: a single-writer event loop owning all mutable
//! state.
//!
//! One task owns the per-unit entry map and the name lookup index. Fleet
//! polls, health-check scheduling, probe results and DNS lookups all
//! arrive as events on that task, so lookups observe a consistent
//! snapshot without locks. Probe workers and the DNS front-end
//! communicate with the loop only through channels.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RegistryOptions;
use crate::error::Error;
use crate::fleet::{ClusterRegistry, UnitState};
use crate::health::{self, Probe, ProbeClient, ProbeTask};
use crate::metrics;
use crate::service::{ServiceOption, SrvOption};
use crate::unit::UnitVars;

/// Capacity of the query and probe-result channels.
const CHANNEL_CAPACITY: usize = 100;

/// The authoritative record for one (unit, machine) placement.
#[derive(Debug)]
pub struct ServiceEntry {
    /// Unit file name.
    pub unit_name: String,
    /// Machine the unit is placed on.
    pub machine_id: String,
    /// Last observed content hash of the unit file.
    pub unit_hash: String,
    /// Address of the machine, if its reported IP parsed.
    pub server_address: Option<IpAddr>,
    /// Declaration derived from the unit's `[X-Watchdns]` section.
    pub service: ServiceOption,
    /// True iff the cluster reports the unit as `active`.
    pub running: bool,
    /// Aggregate health state after the most recent completed probe cycle.
    pub online: bool,
    /// Start of the most recent probe cycle.
    pub last_health_check: Option<Instant>,
    /// Probes dispatched but not yet reported for the current cycle.
    pub pending_health_checks: usize,
    /// Failures observed in the current cycle.
    pub failed_health_checks: usize,
}

impl ServiceEntry {
    fn new(unit_name: &str, machine_id: &str) -> Self {
        Self {
            unit_name: unit_name.to_string(),
            machine_id: machine_id.to_string(),
            unit_hash: String::new(),
            server_address: None,
            service: ServiceOption::default(),
            running: false,
            online: false,
            last_health_check: None,
            pending_health_checks: 0,
            failed_health_checks: 0,
        }
    }
}

/// An A answer: one eligible entry's address.
#[derive(Debug, Clone)]
pub struct AnswerA {
    /// Address of the serving machine.
    pub server: IpAddr,
    /// Record TTL, the entry's check interval.
    pub ttl: Duration,
}

/// An SRV answer: one matching SRV declaration on one eligible entry.
#[derive(Debug, Clone)]
pub struct AnswerSrv {
    /// Address of the serving machine.
    pub server: IpAddr,
    /// Target name the SRV record points at (the entry's A name).
    pub target: String,
    /// The matched SRV declaration.
    pub srv: SrvOption,
    /// Record TTL, the entry's check interval.
    pub ttl: Duration,
}

/// Outcome of a single probe, keyed by the entry's composite id.
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    /// `<unit_name>:<machine_id>` of the probed entry.
    pub unit_id: String,
    /// True iff the probe succeeded.
    pub ok: bool,
}

enum Query {
    A {
        name: String,
        reply: oneshot::Sender<Vec<AnswerA>>,
    },
    Srv {
        name: String,
        service: String,
        protocol: String,
        reply: oneshot::Sender<Vec<AnswerSrv>>,
    },
}

/// Cloneable front for querying the registry loop.
#[derive(Clone)]
pub struct RegistryHandle {
    query_tx: mpsc::Sender<Query>,
}

impl RegistryHandle {
    /// Look up eligible A answers for a fully qualified name.
    /// Returns no answers once the registry has stopped.
    pub async fn lookup_a(&self, name: &str) -> Vec<AnswerA> {
        let (reply, rx) = oneshot::channel();
        let query = Query::A {
            name: name.to_string(),
            reply,
        };
        if self.query_tx.send(query).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Look up eligible SRV answers for a fully qualified name and
    /// `(service, protocol)` pair.
    pub async fn lookup_srv(&self, name: &str, service: &str, protocol: &str) -> Vec<AnswerSrv> {
        let (reply, rx) = oneshot::channel();
        let query = Query::Srv {
            name: name.to_string(),
            service: service.to_string(),
            protocol: protocol.to_string(),
            reply,
        };
        if self.query_tx.send(query).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }
}

/// The service registry. Owns the catalog source and spawns the event
/// loop that owns all mutable state.
pub struct ServiceRegistry {
    fleet: Arc<dyn ClusterRegistry>,
    options: RegistryOptions,
}

impl ServiceRegistry {
    /// Create a registry over the given catalog source.
    pub fn new(fleet: Arc<dyn ClusterRegistry>, options: RegistryOptions) -> Self {
        Self { fleet, options }
    }

    /// Perform the initial fleet reload, then spawn the event loop.
    ///
    /// Returns once the initial reload has completed, so callers observe
    /// a populated lookup index. The loop runs until `cancel` fires;
    /// outstanding probe results after that are discarded.
    pub async fn start(self, cancel: CancellationToken) -> Result<RegistryHandle, Error> {
        let prober = ProbeClient::new()?;
        let mut core = RegistryCore::new(self.options);
        core.reload_fleet(self.fleet.as_ref()).await;
        info!("starting fleet and health check loop");

        let (query_tx, query_rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(run_loop(core, self.fleet, prober, cancel, query_rx));
        Ok(RegistryHandle { query_tx })
    }
}

async fn run_loop(
    mut core: RegistryCore,
    fleet: Arc<dyn ClusterRegistry>,
    prober: ProbeClient,
    cancel: CancellationToken,
    mut query_rx: mpsc::Receiver<Query>,
) {
    let (result_tx, mut result_rx) = mpsc::channel::<HealthCheckResult>(CHANNEL_CAPACITY);
    let semaphore = Arc::new(Semaphore::new(core.options.check_concurrent));

    let start = Instant::now();
    let mut fleet_tick = interval_at(start + core.options.fleet_interval, core.options.fleet_interval);
    let mut health_tick = interval_at(
        start + core.options.check_resolution,
        core.options.check_resolution,
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("registry loop shutting down");
                return;
            }
            _ = fleet_tick.tick() => {
                core.reload_fleet(fleet.as_ref()).await;
            }
            _ = health_tick.tick() => {
                for task in core.schedule_health_checks(Instant::now()) {
                    health::spawn_probe(
                        task,
                        prober.clone(),
                        Arc::clone(&semaphore),
                        result_tx.clone(),
                    );
                }
            }
            Some(result) = result_rx.recv() => {
                core.apply_health_result(result);
            }
            Some(query) = query_rx.recv() => {
                core.handle_query(query);
            }
        }
    }
}

/// All registry state. Only the event-loop task touches it after startup.
struct RegistryCore {
    options: RegistryOptions,
    units: HashMap<String, ServiceEntry>,
    lookup: HashMap<String, Vec<String>>,
}

impl RegistryCore {
    fn new(options: RegistryOptions) -> Self {
        Self {
            options,
            units: HashMap::new(),
            lookup: HashMap::new(),
        }
    }

    /// Poll the cluster and rebuild the lookup index from scratch.
    ///
    /// A fetch failure leaves all state untouched; a per-unit failure
    /// skips that unit for this tick. Entries for units that vanished
    /// from the cluster stay in the map but drop out of the rebuilt
    /// index, so they become unreachable.
    async fn reload_fleet(&mut self, fleet: &dyn ClusterRegistry) {
        debug!("reloading fleet state");
        let machines = match fleet.machines().await {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "failed to get list of machines");
                metrics::record_fleet_reload(false);
                return;
            }
        };
        let states = match fleet.unit_states().await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "failed to get list of units");
                metrics::record_fleet_reload(false);
                return;
            }
        };
        let ips: HashMap<String, String> = machines
            .into_iter()
            .map(|m| (m.id, m.public_ip))
            .collect();

        let mut lookup: HashMap<String, Vec<String>> = HashMap::with_capacity(states.len() * 3);
        for state in &states {
            let key = format!("{}:{}", state.unit_name, state.machine_id);
            let host = ips.get(&state.machine_id).cloned().unwrap_or_default();

            let needs_rebuild = match self.units.get(&key) {
                Some(entry) => entry.unit_hash != state.unit_hash,
                None => {
                    self.units
                        .insert(key.clone(), ServiceEntry::new(&state.unit_name, &state.machine_id));
                    true
                }
            };
            if needs_rebuild {
                match build_service_option(fleet, &self.options, state, &host).await {
                    Ok(svc) => {
                        if let Some(entry) = self.units.get_mut(&key) {
                            entry.service = svc;
                        }
                    }
                    Err(e) => {
                        warn!(
                            unit = %state.unit_name,
                            machine = %state.machine_id,
                            error = %e,
                            "could not read unit from fleet"
                        );
                        continue;
                    }
                }
            }

            let Some(entry) = self.units.get_mut(&key) else {
                continue;
            };
            entry.unit_hash = state.unit_hash.clone();
            entry.server_address = host.parse().ok();
            entry.running = state.active_state == "active";

            let name_key = format!("{}.service.{}", entry.service.name, self.options.domain);
            lookup.entry(name_key).or_default().push(key.clone());
            for tag in &entry.service.tags {
                let tag_key = format!(
                    "{}.{}.service.{}",
                    tag, entry.service.name, self.options.domain
                );
                lookup.entry(tag_key).or_default().push(key.clone());
            }
            for srv in &entry.service.srv_options {
                let srv_key = format!("_{}._{}.{}", srv.service, srv.protocol, self.options.domain);
                lookup.entry(srv_key).or_default().push(key.clone());
            }
        }
        self.lookup = lookup;
        metrics::record_fleet_reload(true);
        metrics::record_state_counts(self.units.len(), self.lookup.len());
    }

    /// Start a probe cycle for every entry whose interval has elapsed and
    /// whose previous cycle has drained. Entries with no configured
    /// checks flip online without any I/O.
    fn schedule_health_checks(&mut self, now: Instant) -> Vec<ProbeTask> {
        let mut probes = Vec::new();
        for (id, entry) in &mut self.units {
            if let Some(last) = entry.last_health_check {
                if now.duration_since(last) < entry.service.check_interval {
                    continue;
                }
            }
            if entry.pending_health_checks > 0 {
                continue;
            }
            entry.last_health_check = Some(now);
            entry.failed_health_checks = 0;
            entry.pending_health_checks =
                entry.service.check_http.len() + entry.service.check_tcp.len();
            if entry.pending_health_checks == 0 {
                entry.online = true;
                continue;
            }
            for url in &entry.service.check_http {
                probes.push(ProbeTask {
                    unit_id: id.clone(),
                    timeout: entry.service.check_timeout,
                    probe: Probe::Http(url.clone()),
                });
            }
            for addr in &entry.service.check_tcp {
                probes.push(ProbeTask {
                    unit_id: id.clone(),
                    timeout: entry.service.check_timeout,
                    probe: Probe::Tcp(addr.clone()),
                });
            }
        }
        probes
    }

    /// Fold one probe outcome into its entry: pessimistic down,
    /// optimistic up only when the cycle drains with zero failures.
    fn apply_health_result(&mut self, result: HealthCheckResult) {
        let Some(entry) = self.units.get_mut(&result.unit_id) else {
            return;
        };
        entry.pending_health_checks = entry.pending_health_checks.saturating_sub(1);
        if !result.ok {
            if entry.online {
                info!(unit = %result.unit_id, "unit failed health check");
                metrics::record_offline_transition();
            }
            entry.online = false;
            entry.failed_health_checks += 1;
        } else if entry.pending_health_checks == 0 && entry.failed_health_checks == 0 {
            entry.online = true;
        }
    }

    fn handle_query(&self, query: Query) {
        match query {
            Query::A { name, reply } => {
                let _ = reply.send(self.lookup_a(&name));
            }
            Query::Srv {
                name,
                service,
                protocol,
                reply,
            } => {
                let _ = reply.send(self.lookup_srv(&name, &service, &protocol));
            }
        }
    }

    fn lookup_a(&self, name: &str) -> Vec<AnswerA> {
        let Some(keys) = self.lookup.get(name) else {
            return Vec::new();
        };
        keys.iter()
            .filter_map(|k| self.units.get(k))
            .filter(|e| e.running && e.online)
            .filter_map(|e| {
                e.server_address.map(|server| AnswerA {
                    server,
                    ttl: e.service.check_interval,
                })
            })
            .collect()
    }

    fn lookup_srv(&self, name: &str, service: &str, protocol: &str) -> Vec<AnswerSrv> {
        let Some(keys) = self.lookup.get(name) else {
            return Vec::new();
        };
        let mut answers = Vec::new();
        for entry in keys.iter().filter_map(|k| self.units.get(k)) {
            if !entry.running || !entry.online {
                continue;
            }
            let Some(server) = entry.server_address else {
                continue;
            };
            let target = format!("{}.service.{}", entry.service.name, self.options.domain);
            for srv in &entry.service.srv_options {
                if srv.service != service || srv.protocol != protocol {
                    continue;
                }
                answers.push(AnswerSrv {
                    server,
                    target: target.clone(),
                    srv: srv.clone(),
                    ttl: entry.service.check_interval,
                });
            }
        }
        answers
    }
}

async fn build_service_option(
    fleet: &dyn ClusterRegistry,
    defaults: &RegistryOptions,
    state: &UnitState,
    host: &str,
) -> Result<ServiceOption, Error> {
    debug!(unit = %state.unit_name, machine = %state.machine_id, "updating unit");
    let opts = fleet.unit(&state.unit_name).await?;
    let vars = UnitVars::new(&state.unit_name, &state.machine_id, host);
    Ok(ServiceOption::from_unit_options(&vars, defaults, &opts))
}
