//! watchdns - A dynamic authoritative DNS server driven by a fleet
//! service catalog.
//!
//! This crate serves A and SRV records for services described as systemd
//! unit files in a fleet/etcd cluster. A unit that is active on a machine
//! and passes its declared health probes becomes resolvable under the
//! configured domain. Co-located workloads use it for plain DNS service
//! discovery.
//!
//! ## Features
//!
//! - Periodic fleet polling with full lookup-index rebuilds
//! - Rate-limited asynchronous HTTP and TCP health probes
//! - Single-writer registry loop: lookups are served lock-free
//! - `%`-specifier expansion and systemd escape decoding in unit options
//! - Configurable answer ordering (insertion, random, round-robin)
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                           watchdns                             │
//! │                                                                │
//! │  ┌──────────────────┐ fleet tick ┌──────────────────┐          │
//! │  │  fleet registry  │───────────▶│  registry loop   │          │
//! │  │  (etcd v2 API)   │            │  (owns all state)│          │
//! │  └──────────────────┘            └───┬──────────▲───┘          │
//! │                          dispatch    │          │ results      │
//! │                                      ▼          │              │
//! │  ┌──────────────────┐            ┌──────────────────┐          │
//! │  │  DNS front-end   │◀── UDP     │  probe workers   │          │
//! │  │  (hickory)       │    :8053   │  (HTTP / TCP)    │          │
//! │  └────────▲─────────┘            └──────────────────┘          │
//! │           │ lookups via channels                               │
//! │           └────────────────────────▶ registry loop             │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## DNS resolution
//!
//! ```text
//! web.service.example.          → all eligible placements of "web"
//! i-blue.web.service.example.   → placements carrying tag "i-blue"
//! _xmpp._tcp.example.           → SRV declarations matching (xmpp, tcp)
//! ```
//!
//! A placement is eligible when the cluster reports it active, its last
//! probe cycle completed cleanly, and its machine address parsed.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod fleet;
mod health;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod service;
pub mod telemetry;
pub mod unit;

// Re-export main types
pub use config::{LogFormat, RecordSort, RegistryOptions};
pub use error::Error;
pub use fleet::{ClusterRegistry, EtcdFleetRegistry};
pub use registry::{RegistryHandle, ServiceRegistry};
pub use server::DnsServer;
