//! DNS front-end: translates A/SRV questions into registry lookups and
//! formats answer records.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use hickory_proto::op::{Header, ResponseCode};
use hickory_proto::rr::rdata::{A, SRV};
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use hickory_server::authority::MessageResponseBuilder;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use hickory_server::ServerFuture;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RecordSort;
use crate::error::Error;
use crate::metrics::{self, QueryResult, Timer};
use crate::registry::RegistryHandle;

/// Split an SRV question name into its `(service, protocol)` labels.
///
/// The name must start with two labels of the form `_x`, the canonical
/// `_service._protocol.<rest>` ordering. Returns `None` otherwise.
fn parse_srv_question(name: &str) -> Option<(&str, &str)> {
    let mut parts = name.splitn(3, '.');
    let service = parts.next()?;
    let protocol = parts.next()?;
    parts.next()?;
    if service.len() < 2 || protocol.len() < 2 {
        return None;
    }
    let service = service.strip_prefix('_')?;
    let protocol = protocol.strip_prefix('_')?;
    Some((service, protocol))
}

/// Apply the configured answer ordering in place. The round-robin
/// rotation is keyed by the first question's name.
fn sort_answers(
    sort: RecordSort,
    answers: &mut [Record],
    first_name: &str,
    shift_counts: &Mutex<HashMap<String, usize>>,
) {
    match sort {
        RecordSort::Default => {}
        RecordSort::Random => {
            answers.shuffle(&mut rand::thread_rng());
        }
        RecordSort::RoundRobin => {
            if answers.is_empty() {
                return;
            }
            let mut counts = shift_counts.lock();
            let count = counts.entry(first_name.to_string()).or_insert(0);
            let shift = *count % answers.len();
            *count = (shift + 1) % answers.len();
            answers.rotate_left(shift);
        }
    }
}

/// Request handler answering A and SRV questions from the registry.
pub struct DnsHandler {
    registry: RegistryHandle,
    record_sort: RecordSort,
    shift_counts: Mutex<HashMap<String, usize>>,
}

impl DnsHandler {
    /// Create a handler backed by the given registry.
    pub fn new(registry: RegistryHandle, record_sort: RecordSort) -> Self {
        Self {
            registry,
            record_sort,
            shift_counts: Mutex::new(HashMap::new()),
        }
    }

    async fn answer_a(&self, name: &Name, answers: &mut Vec<Record>) {
        let timer = Timer::start();
        let lookup = self.registry.lookup_a(&name.to_string()).await;
        debug!(name = %name, count = lookup.len(), "A lookup");
        let result = if lookup.is_empty() {
            QueryResult::Empty
        } else {
            QueryResult::Success
        };
        metrics::record_query("A", result, timer.elapsed());
        for ans in lookup {
            let IpAddr::V4(ip) = ans.server else { continue };
            let mut record = Record::from_rdata(
                name.clone(),
                ans.ttl.as_secs() as u32,
                RData::A(A(ip)),
            );
            record.set_dns_class(DNSClass::IN);
            answers.push(record);
        }
    }

    async fn answer_srv(
        &self,
        name: &Name,
        answers: &mut Vec<Record>,
        additionals: &mut Vec<Record>,
    ) {
        let timer = Timer::start();
        let name_str = name.to_string();
        let Some((service, protocol)) = parse_srv_question(&name_str) else {
            warn!(name = %name_str, "invalid SRV request");
            metrics::record_query("SRV", QueryResult::Invalid, timer.elapsed());
            return;
        };
        let lookup = self.registry.lookup_srv(&name_str, service, protocol).await;
        debug!(name = %name_str, count = lookup.len(), "SRV lookup");
        let result = if lookup.is_empty() {
            QueryResult::Empty
        } else {
            QueryResult::Success
        };
        metrics::record_query("SRV", result, timer.elapsed());
        for ans in lookup {
            let target = match Name::from_ascii(&ans.target) {
                Ok(t) => t,
                Err(e) => {
                    warn!(target = %ans.target, error = %e, "unrepresentable SRV target");
                    continue;
                }
            };
            let ttl = ans.ttl.as_secs() as u32;
            let mut record = Record::from_rdata(
                name.clone(),
                ttl,
                RData::SRV(SRV::new(
                    ans.srv.priority,
                    ans.srv.weight,
                    ans.srv.port,
                    target.clone(),
                )),
            );
            record.set_dns_class(DNSClass::IN);
            answers.push(record);

            if let IpAddr::V4(ip) = ans.server {
                let mut extra = Record::from_rdata(target, ttl, RData::A(A(ip)));
                extra.set_dns_class(DNSClass::IN);
                additionals.push(extra);
            }
        }
    }
}

#[async_trait]
impl RequestHandler for DnsHandler {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
    ) -> ResponseInfo {
        let mut answers: Vec<Record> = Vec::new();
        let mut additionals: Vec<Record> = Vec::new();

        let query = request.query();
        let name = Name::from(query.name().clone());
        match query.query_type() {
            RecordType::A => self.answer_a(&name, &mut answers).await,
            RecordType::SRV => {
                self.answer_srv(&name, &mut answers, &mut additionals).await;
            }
            other => {
                debug!(name = %name, rtype = ?other, "unsupported query type");
            }
        }

        let query_name = query.name().to_string();
        sort_answers(self.record_sort, &mut answers, &query_name, &self.shift_counts);

        let mut header = Header::response_from_request(request.header());
        header.set_authoritative(true);
        header.set_response_code(ResponseCode::NoError);

        let response = MessageResponseBuilder::from_message_request(request).build(
            header,
            answers.iter(),
            std::iter::empty(),
            std::iter::empty(),
            additionals.iter(),
        );
        match response_handle.send_response(response).await {
            Ok(info) => info,
            Err(e) => {
                error!(error = %e, "failed to send DNS response");
                ResponseInfo::from(header)
            }
        }
    }
}

/// UDP DNS server answering from the registry.
pub struct DnsServer {
    bind_address: SocketAddr,
    handler: DnsHandler,
}

impl DnsServer {
    /// Create a server bound to the given address.
    pub fn new(bind_address: SocketAddr, registry: RegistryHandle, record_sort: RecordSort) -> Self {
        Self {
            bind_address,
            handler: DnsHandler::new(registry, record_sort),
        }
    }

    /// Run the server until the cancellation token fires.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), Error> {
        let socket = UdpSocket::bind(self.bind_address).await?;
        info!(addr = %self.bind_address, "DNS UDP listening");

        let mut server = ServerFuture::new(self.handler);
        server.register_socket(socket);

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("DNS server shutdown requested");
            }
            result = server.block_until_done() => {
                if let Err(e) = result {
                    error!(error = %e, "DNS server error");
                }
            }
        }
        Ok(())
    }
}
