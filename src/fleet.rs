//! Cluster registry access.
//!
//! The registry core consumes the catalog through the [`ClusterRegistry`]
//! trait: the list of machines, the list of unit states, and the options
//! of a single unit. [`EtcdFleetRegistry`] implements the trait against
//! the fleet schema in the etcd v2 keys API.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::Error;
use crate::unit::{parse_unit_file, UnitOption};

/// A cluster member.
#[derive(Debug, Clone)]
pub struct Machine {
    /// Stable machine id.
    pub id: String,
    /// Public IP the machine advertises.
    pub public_ip: String,
}

/// Placement and state of one unit on one machine.
#[derive(Debug, Clone)]
pub struct UnitState {
    /// Unit file name.
    pub unit_name: String,
    /// Machine the unit is placed on.
    pub machine_id: String,
    /// Content hash of the unit file.
    pub unit_hash: String,
    /// systemd active state, e.g. `active` or `inactive`.
    pub active_state: String,
}

/// Read-only view of the cluster service catalog.
#[async_trait]
pub trait ClusterRegistry: Send + Sync {
    /// List cluster machines.
    async fn machines(&self) -> Result<Vec<Machine>, Error>;

    /// List unit placements and their states.
    async fn unit_states(&self) -> Result<Vec<UnitState>, Error>;

    /// Fetch the declared options of a unit by name.
    async fn unit(&self, name: &str) -> Result<Vec<UnitOption>, Error>;
}

/// Fleet registry reader over the etcd v2 keys API.
///
/// Layout: `{prefix}/machines/{id}/object` holds the machine object,
/// `{prefix}/states/{unit}/{machine}` the unit state,
/// `{prefix}/job/{name}/object` the job (carrying the unit hash) and
/// `{prefix}/units/{hash}` the unit file contents.
pub struct EtcdFleetRegistry {
    client: reqwest::Client,
    peers: Vec<String>,
    prefix: String,
}

#[derive(Debug, Deserialize)]
struct KeysResponse {
    node: Option<Node>,
}

#[derive(Debug, Default, Deserialize)]
struct Node {
    #[serde(default)]
    key: String,
    value: Option<String>,
    #[serde(default)]
    nodes: Vec<Node>,
}

#[derive(Debug, Deserialize)]
struct MachineModel {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "PublicIP", default)]
    public_ip: String,
}

#[derive(Debug, Deserialize)]
struct UnitStateModel {
    #[serde(rename = "activeState", default)]
    active_state: String,
    #[serde(rename = "unitHash", default)]
    unit_hash: String,
}

#[derive(Debug, Deserialize)]
struct JobModel {
    #[serde(rename = "unitHash")]
    unit_hash: String,
}

#[derive(Debug, Deserialize)]
struct UnitModel {
    raw: String,
}

fn last_segment(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Escape the characters a unit name could carry that would derail URL
/// parsing (systemd hex escapes contain backslashes).
fn escape_key_segment(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            '\\' => out.push_str("%5C"),
            '?' => out.push_str("%3F"),
            '#' => out.push_str("%23"),
            ' ' => out.push_str("%20"),
            _ => out.push(c),
        }
    }
    out
}

impl EtcdFleetRegistry {
    /// Create a registry reader for the given peers and key prefix.
    pub fn new(peers: Vec<String>, prefix: &str, timeout: Duration) -> Result<Self, Error> {
        if peers.is_empty() {
            return Err(Error::Config("no etcd peers configured".to_string()));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            peers,
            prefix: prefix.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch a key below the fleet prefix, trying each peer in order.
    /// Returns `None` when the key does not exist.
    async fn get(&self, key: &str, recursive: bool) -> Result<Option<Node>, Error> {
        let mut last_err = Error::Etcd("no etcd peers configured".to_string());
        for peer in &self.peers {
            let url = format!(
                "{}/v2/keys{}/{}{}",
                peer.trim_end_matches('/'),
                self.prefix,
                key,
                if recursive { "?recursive=true" } else { "" }
            );
            match self.client.get(&url).send().await {
                Ok(resp) if resp.status() == reqwest::StatusCode::NOT_FOUND => {
                    return Ok(None);
                }
                Ok(resp) if resp.status().is_success() => {
                    let body: KeysResponse = resp.json().await?;
                    return Ok(body.node);
                }
                Ok(resp) => {
                    last_err = Error::Etcd(format!("{url}: status {}", resp.status()));
                    warn!(peer = %peer, key, status = %resp.status(), "etcd request failed");
                }
                Err(e) => {
                    last_err = Error::Http(e);
                    warn!(peer = %peer, key, "etcd peer unreachable");
                }
            }
        }
        Err(last_err)
    }

    /// Fetch a leaf value, erroring when the key is absent or a directory.
    async fn get_value(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(self.get(key, false).await?.and_then(|n| n.value))
    }
}

#[async_trait]
impl ClusterRegistry for EtcdFleetRegistry {
    async fn machines(&self) -> Result<Vec<Machine>, Error> {
        let Some(root) = self.get("machines", true).await? else {
            return Ok(Vec::new());
        };
        let mut machines = Vec::new();
        for dir in &root.nodes {
            for child in &dir.nodes {
                if !child.key.ends_with("/object") {
                    continue;
                }
                let Some(value) = &child.value else { continue };
                match serde_json::from_str::<MachineModel>(value) {
                    Ok(m) => machines.push(Machine {
                        id: m.id,
                        public_ip: m.public_ip,
                    }),
                    Err(e) => warn!(key = %child.key, error = %e, "skipping malformed machine object"),
                }
            }
        }
        debug!(count = machines.len(), "listed machines");
        Ok(machines)
    }

    async fn unit_states(&self) -> Result<Vec<UnitState>, Error> {
        let Some(root) = self.get("states", true).await? else {
            return Ok(Vec::new());
        };
        let mut states = Vec::new();
        for unit_dir in &root.nodes {
            let unit_name = last_segment(&unit_dir.key).to_string();
            for child in &unit_dir.nodes {
                let Some(value) = &child.value else { continue };
                match serde_json::from_str::<UnitStateModel>(value) {
                    Ok(m) => states.push(UnitState {
                        unit_name: unit_name.clone(),
                        machine_id: last_segment(&child.key).to_string(),
                        unit_hash: m.unit_hash,
                        active_state: m.active_state,
                    }),
                    Err(e) => warn!(key = %child.key, error = %e, "skipping malformed unit state"),
                }
            }
        }
        debug!(count = states.len(), "listed unit states");
        Ok(states)
    }

    async fn unit(&self, name: &str) -> Result<Vec<UnitOption>, Error> {
        let job = self
            .get_value(&format!("job/{}/object", escape_key_segment(name)))
            .await?
            .ok_or_else(|| Error::UnitMissing(name.to_string()))?;
        let job: JobModel = serde_json::from_str(&job)?;
        let unit = self
            .get_value(&format!("units/{}", job.unit_hash))
            .await?
            .ok_or_else(|| Error::UnitMissing(name.to_string()))?;
        let unit: UnitModel = serde_json::from_str(&unit)?;
        Ok(parse_unit_file(&unit.raw))
    }
}
