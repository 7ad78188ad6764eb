//! Single-probe send/retry/match loop.
//!
//! A probe is one Binding Request with a fixed transaction id. It is sent,
//! retransmitted unchanged each time the retry interval elapses, and resolved
//! either by the first matching Binding Response or by running out of
//! retransmissions. The receive future and the retry deadline both live
//! inside `ProbeTransport::send`, so nothing tied to a probe survives its
//! resolution.

use crate::registry::{TransactionId, TransactionRegistry};
use crate::stun::{
    AttributeType, StunAttribute, StunMessage, StunMessageType, decode_address_attribute,
    decode_message, encode_binding_request,
};
use natprobe_transport::Transport;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant};

/// Default wait before retransmitting
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(5000);

/// Default number of retransmissions after the initial send
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Receive buffer for one reflector reply
const RECV_BUFFER_SIZE: usize = 2048;

/// Retry policy for a single probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Time to wait for a response before retransmitting
    pub retry_interval: Duration,
    /// Retransmissions after the initial send before giving up
    pub max_attempts: u32,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            retry_interval: DEFAULT_RETRY_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// One outstanding Binding Request
#[derive(Debug, Clone)]
pub struct Probe {
    /// Correlator copied into every retransmission
    pub transaction_id: TransactionId,
    /// Reflector address
    pub destination: SocketAddrV4,
    /// Ask the reflector to answer from its alternate IP
    pub change_ip: bool,
    /// Ask the reflector to answer from its alternate port
    pub change_port: bool,
    /// Retransmissions so far (0 after the initial send)
    pub attempt: u32,
}

impl Probe {
    /// Create a probe with no change flags
    #[must_use]
    pub fn new(transaction_id: TransactionId, destination: SocketAddrV4) -> Self {
        Self {
            transaction_id,
            destination,
            change_ip: false,
            change_port: false,
            attempt: 0,
        }
    }

    /// Set the CHANGE-REQUEST flags
    #[must_use]
    pub fn with_change(mut self, change_ip: bool, change_port: bool) -> Self {
        self.change_ip = change_ip;
        self.change_port = change_port;
        self
    }

    /// Wire encoding. A CHANGE-REQUEST attribute is attached only when a flag is set.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        if self.change_ip || self.change_port {
            encode_binding_request(
                &self.transaction_id,
                &[StunAttribute::change_request(self.change_ip, self.change_port)],
            )
        } else {
            encode_binding_request(&self.transaction_id, &[])
        }
    }
}

/// What a probe learned
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeResult {
    /// A matching Binding Response arrived
    pub responded: bool,
    /// MAPPED-ADDRESS: our address as seen by the reflector
    pub external_addr: Option<SocketAddrV4>,
    /// SOURCE-ADDRESS: where the reflector sent the reply from
    pub source_addr: Option<SocketAddrV4>,
    /// CHANGED-ADDRESS: the reflector's alternate IP and port
    pub changed_addr: Option<SocketAddrV4>,
}

impl ProbeResult {
    /// Result of a probe that ran out of retransmissions
    #[must_use]
    pub fn no_response() -> Self {
        Self::default()
    }

    /// Extract the address attributes from a matched response.
    ///
    /// Each address attribute fills only its own field. The first decodable
    /// occurrence of each kind wins; malformed ones are logged and skipped.
    #[must_use]
    pub fn from_response(message: &StunMessage) -> Self {
        let mut result = Self {
            responded: true,
            ..Self::default()
        };

        for attr in &message.attributes {
            let slot = match attr.attr_type {
                AttributeType::MappedAddress => &mut result.external_addr,
                AttributeType::SourceAddress => &mut result.source_addr,
                AttributeType::ChangedAddress => &mut result.changed_addr,
                other => {
                    tracing::trace!(attr = ?other, len = attr.value.len(), "skipping attribute");
                    continue;
                }
            };

            match decode_address_attribute(&attr.value) {
                Ok(addr) => {
                    slot.get_or_insert(addr);
                }
                Err(e) => {
                    tracing::debug!(attr = ?attr.attr_type, error = %e, "undecodable address attribute");
                }
            }
        }

        result
    }
}

/// Sends probes over a shared transport, one at a time
///
/// `send` takes `&mut self`, so a second probe cannot start while one is
/// in flight.
pub struct ProbeTransport {
    transport: Arc<dyn Transport>,
    registry: TransactionRegistry,
    config: ProbeConfig,
}

impl ProbeTransport {
    /// Wrap a bound transport
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, config: ProbeConfig) -> Self {
        Self {
            transport,
            registry: TransactionRegistry::new(),
            config,
        }
    }

    /// Underlying transport
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Outstanding transactions (empty whenever no probe is in flight)
    #[must_use]
    pub fn registry(&self) -> &TransactionRegistry {
        &self.registry
    }

    /// Retry policy
    #[must_use]
    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Build a probe with a fresh transaction id
    #[must_use]
    pub fn probe(&self, destination: SocketAddrV4, change_ip: bool, change_port: bool) -> Probe {
        Probe::new(self.registry.generate(), destination).with_change(change_ip, change_port)
    }

    /// Send `probe` and wait until it resolves.
    ///
    /// Never fails: send errors and receive errors count as unanswered
    /// attempts, and exhausting the retransmissions yields
    /// `ProbeResult::no_response()`.
    pub async fn send(&mut self, probe: &mut Probe) -> ProbeResult {
        let payload = probe.encode();
        let id = probe.transaction_id;
        let destination = SocketAddr::V4(probe.destination);

        self.registry.register(id);
        probe.attempt = 0;

        let result = loop {
            match self.transport.send_to(&payload, destination).await {
                Ok(_) => tracing::debug!(
                    %id,
                    %destination,
                    attempt = probe.attempt,
                    change_ip = probe.change_ip,
                    change_port = probe.change_port,
                    "probe sent"
                ),
                Err(e) => tracing::warn!(
                    %id,
                    %destination,
                    attempt = probe.attempt,
                    error = %e,
                    "probe send failed"
                ),
            }

            let deadline = Instant::now() + self.config.retry_interval;
            match time::timeout_at(deadline, self.await_response(&id)).await {
                Ok(Some(result)) => break result,
                Ok(None) => time::sleep_until(deadline).await,
                Err(_) => {}
            }

            if probe.attempt >= self.config.max_attempts {
                tracing::debug!(%id, %destination, "probe unanswered, giving up");
                break ProbeResult::no_response();
            }
            probe.attempt += 1;
        };

        self.registry.complete(&id);
        result
    }

    /// Read datagrams until one is a Binding Response for `id`.
    ///
    /// Receive errors are logged and reading continues; the caller's deadline
    /// bounds the wait. Returns `None` once the transport is closed.
    async fn await_response(&self, id: &TransactionId) -> Option<ProbeResult> {
        let mut buf = [0u8; RECV_BUFFER_SIZE];

        loop {
            let (len, from) = match self.transport.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    if self.transport.is_closed() {
                        tracing::debug!(%id, error = %e, "transport closed while waiting");
                        return None;
                    }
                    tracing::warn!(%id, error = %e, "receive failed");
                    continue;
                }
            };

            let message = match decode_message(&buf[..len]) {
                Ok(message) => message,
                Err(e) => {
                    tracing::trace!(%from, error = %e, "ignoring malformed datagram");
                    continue;
                }
            };

            if message.message_type != StunMessageType::BindingResponse {
                tracing::trace!(%from, kind = ?message.message_type, "ignoring non-response");
                continue;
            }

            if message.transaction_id != *id || !self.registry.is_outstanding(id) {
                tracing::trace!(%from, got = %message.transaction_id, "ignoring unrelated response");
                continue;
            }

            let result = ProbeResult::from_response(&message);
            tracing::debug!(
                %id,
                %from,
                external = ?result.external_addr,
                source = ?result.source_addr,
                changed = ?result.changed_addr,
                "probe answered"
            );
            return Some(result);
        }
    }
}
