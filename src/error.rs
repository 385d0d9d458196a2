//! Error types for watchdns.

use thiserror::Error;

/// Errors that can occur in the registry or DNS server.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error (network, socket binding, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error (etcd API or probe client setup)
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// etcd returned an unexpected or error response
    #[error("etcd error: {0}")]
    Etcd(String),

    /// Malformed JSON in an etcd or fleet payload
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Malformed value in a unit option
    #[error("Invalid unit option: {0}")]
    UnitOption(String),

    /// Unit present in the state listing but its definition is gone
    #[error("Unit data missing for '{0}'")]
    UnitMissing(String),

    /// Registry event loop is no longer running
    #[error("Registry stopped")]
    RegistryStopped,
}
