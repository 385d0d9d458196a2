//! Shared helpers for registry integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use watchdns::error::Error;
use watchdns::fleet::{ClusterRegistry, Machine, UnitState};
use watchdns::registry::RegistryHandle;
use watchdns::unit::UnitOption;

#[derive(Default)]
struct Fixture {
    machines: Vec<Machine>,
    states: Vec<UnitState>,
    units: HashMap<String, Vec<UnitOption>>,
}

/// A mutable in-memory cluster catalog.
#[derive(Default, Clone)]
pub struct MockFleet {
    inner: Arc<Mutex<Fixture>>,
}

impl MockFleet {
    pub fn add_machine(&self, id: &str, ip: &str) {
        self.inner.lock().machines.push(Machine {
            id: id.to_string(),
            public_ip: ip.to_string(),
        });
    }

    pub fn set_unit(&self, name: &str, machine: &str, hash: &str, active: bool) {
        let mut inner = self.inner.lock();
        inner
            .states
            .retain(|s| !(s.unit_name == name && s.machine_id == machine));
        inner.states.push(UnitState {
            unit_name: name.to_string(),
            machine_id: machine.to_string(),
            unit_hash: hash.to_string(),
            active_state: if active { "active" } else { "inactive" }.to_string(),
        });
    }

    pub fn set_unit_options(&self, name: &str, opts: &[(&str, &str)]) {
        let opts = opts
            .iter()
            .map(|(k, v)| UnitOption {
                section: "X-Watchdns".to_string(),
                name: k.to_string(),
                value: v.to_string(),
            })
            .collect();
        self.inner.lock().units.insert(name.to_string(), opts);
    }

    pub fn remove_unit(&self, name: &str) {
        self.inner.lock().states.retain(|s| s.unit_name != name);
    }
}

#[async_trait]
impl ClusterRegistry for MockFleet {
    async fn machines(&self) -> Result<Vec<Machine>, Error> {
        Ok(self.inner.lock().machines.clone())
    }

    async fn unit_states(&self) -> Result<Vec<UnitState>, Error> {
        Ok(self.inner.lock().states.clone())
    }

    async fn unit(&self, name: &str) -> Result<Vec<UnitOption>, Error> {
        self.inner
            .lock()
            .units
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnitMissing(name.to_string()))
    }
}

/// A loopback HTTP endpoint whose health can be toggled at runtime.
pub struct HttpProbeTarget {
    pub addr: SocketAddr,
    healthy: Arc<AtomicBool>,
}

impl HttpProbeTarget {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let healthy = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&healthy);
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let status = if flag.load(Ordering::SeqCst) {
                    "200 OK"
                } else {
                    "500 Internal Server Error"
                };
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let response =
                    format!("HTTP/1.1 {status}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
                let _ = stream.write_all(response.as_bytes()).await;
            }
        });
        Self { addr, healthy }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }
}

/// Poll an A lookup until it returns the wanted number of answers.
pub async fn wait_for_a_count(handle: &RegistryHandle, name: &str, count: usize) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if handle.lookup_a(name).await.len() == count {
            return true;
        }
        if tokio::time::Instant::now() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
