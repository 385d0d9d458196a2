//! Health-check probe workers.
//!
//! Each probe runs as its own task: it acquires a slot in the shared
//! concurrency semaphore, performs one HTTP GET or TCP dial under the
//! entry's deadline, and reports exactly one [`HealthCheckResult`] back
//! to the registry loop. Probes never touch entry state directly.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, Semaphore};
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::metrics;
use crate::registry::HealthCheckResult;

/// One probe to run against an entry.
#[derive(Debug, Clone)]
pub(crate) enum Probe {
    /// HTTP GET; healthy iff the status is 2xx.
    Http(Url),
    /// TCP dial of a `host:port` endpoint; healthy iff the dial succeeds.
    Tcp(String),
}

/// A dispatched probe with its owning entry and deadline.
#[derive(Debug, Clone)]
pub(crate) struct ProbeTask {
    pub unit_id: String,
    pub timeout: Duration,
    pub probe: Probe,
}

/// Shared HTTP client for probes. Timeouts are applied per request from
/// the entry's check timeout.
#[derive(Clone)]
pub(crate) struct ProbeClient {
    http: reqwest::Client,
}

impl ProbeClient {
    pub(crate) fn new() -> Result<Self, Error> {
        Ok(Self {
            http: reqwest::Client::builder().build()?,
        })
    }
}

/// Spawn a task running one probe. The semaphore slot is acquired before
/// any socket I/O and released on every exit path by the permit guard.
pub(crate) fn spawn_probe(
    task: ProbeTask,
    client: ProbeClient,
    semaphore: Arc<Semaphore>,
    result_tx: mpsc::Sender<HealthCheckResult>,
) {
    tokio::spawn(async move {
        let _permit = match semaphore.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };
        let ok = match &task.probe {
            Probe::Http(url) => check_http(&client, url, task.timeout).await,
            Probe::Tcp(addr) => check_tcp(addr, task.timeout).await,
        };
        metrics::record_probe(kind(&task.probe), ok);
        let _ = result_tx
            .send(HealthCheckResult {
                unit_id: task.unit_id,
                ok,
            })
            .await;
    });
}

fn kind(probe: &Probe) -> &'static str {
    match probe {
        Probe::Http(_) => "http",
        Probe::Tcp(_) => "tcp",
    }
}

/// GET the URL and drain the body. Healthy iff the status is in
/// `[200, 299]`; any transport error is unhealthy.
async fn check_http(client: &ProbeClient, url: &Url, timeout: Duration) -> bool {
    let response = match client.http.get(url.clone()).timeout(timeout).send().await {
        Ok(r) => r,
        Err(e) => {
            debug!(url = %url, error = %e, "http probe failed");
            return false;
        }
    };
    let status = response.status();
    let _ = response.bytes().await;
    status.is_success()
}

/// Dial the endpoint and close the connection immediately.
async fn check_tcp(addr: &str, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_conn)) => true,
        Ok(Err(e)) => {
            debug!(addr, error = %e, "tcp probe failed");
            false
        }
        Err(_) => {
            debug!(addr, "tcp probe timed out");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_check_tcp_open_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        assert!(check_tcp(&addr, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_check_tcp_closed_port() {
        // bind then drop to get a port nothing listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        assert!(!check_tcp(&addr, Duration::from_secs(1)).await);
    }

    async fn serve_http_once(status_line: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let body = format!("HTTP/1.1 {status_line}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
                let _ = stream.write_all(body.as_bytes()).await;
            }
        });
        format!("http://{addr}/health")
    }

    #[tokio::test]
    async fn test_check_http_2xx_is_healthy() {
        let url = serve_http_once("204 No Content").await;
        let client = ProbeClient::new().unwrap();
        assert!(check_http(&client, &url.parse().unwrap(), Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_check_http_5xx_is_unhealthy() {
        let url = serve_http_once("500 Internal Server Error").await;
        let client = ProbeClient::new().unwrap();
        assert!(!check_http(&client, &url.parse().unwrap(), Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_check_http_connection_refused_is_unhealthy() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let client = ProbeClient::new().unwrap();
        let url: Url = format!("http://{addr}/").parse().unwrap();
        assert!(!check_http(&client, &url, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_spawn_probe_reports_exactly_one_result() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (tx, mut rx) = mpsc::channel(8);
        let semaphore = Arc::new(Semaphore::new(1));
        spawn_probe(
            ProbeTask {
                unit_id: "web.service:m1".to_string(),
                timeout: Duration::from_secs(1),
                probe: Probe::Tcp(addr),
            },
            ProbeClient::new().unwrap(),
            semaphore,
            tx,
        );
        let result = rx.recv().await.unwrap();
        assert_eq!(result.unit_id, "web.service:m1");
        assert!(result.ok);
        assert!(rx.try_recv().is_err());
    }
}
