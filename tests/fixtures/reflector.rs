//! Simulated reflector fixture for classification testing
//!
//! Models a classic STUN server with a primary and an alternate address,
//! together with the NAT sitting between it and the client. Every Binding
//! Request handed to `send_to` is answered synchronously: the reply is
//! queued for `recv_from` only if the modeled NAT would let it through.
//!
//! # Example
//!
//! ```no_run
//! use natprobe_integration_tests::fixtures::{Filtering, Mapping, Scenario, SimulatedReflector};
//! use std::sync::Arc;
//!
//! let reflector = Arc::new(SimulatedReflector::new(Scenario::nat(
//!     Mapping::Fixed("203.0.113.5:61000".parse().unwrap()),
//!     Filtering::Address,
//! )));
//! assert_eq!(reflector.sent().len(), 0);
//! ```

use async_trait::async_trait;
use natprobe_discovery::TransactionId;
use natprobe_discovery::stun::{
    AttributeType, CHANGE_IP_FLAG, CHANGE_PORT_FLAG, StunAttribute, StunMessage, StunMessageType,
    decode_message,
};
use natprobe_transport::{Transport, TransportError, TransportResult, TransportStats};
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc;

/// Reflector primary address
pub const PRIMARY: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(198, 51, 100, 1), 3478);

/// Reflector alternate address (advertised as CHANGED-ADDRESS)
pub const ALTERNATE: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(198, 51, 100, 2), 3479);

/// Client interface address
pub const LOCAL: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(192, 0, 2, 10), 40000);

/// How the NAT maps the client's endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mapping {
    /// No translation; the reflector sees `LOCAL`
    Local,
    /// One external endpoint for every destination
    Fixed(SocketAddrV4),
    /// A new external port per destination, counting up from `base_port`
    PerDestination {
        /// External IP
        ip: Ipv4Addr,
        /// Port given to the first destination
        base_port: u16,
    },
}

/// Which replies the NAT lets back in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filtering {
    /// Any source
    None,
    /// Only replies from the IP the request was sent to
    Address,
    /// Only replies from the exact IP and port the request was sent to
    AddressAndPort,
}

/// Behavior of the simulated network
#[derive(Debug, Clone)]
pub struct Scenario {
    /// Mapping behavior
    pub mapping: Mapping,
    /// Filtering behavior
    pub filtering: Filtering,
    /// Drop every request (UDP blocked)
    pub drop_all: bool,
    /// Requests sent to the alternate IP are lost
    pub alternate_unreachable: bool,
    /// Include CHANGED-ADDRESS in responses
    pub advertise_changed: bool,
    /// Include MAPPED-ADDRESS in responses
    pub advertise_mapped: bool,
    /// Number of initial requests silently lost
    pub drop_first: usize,
}

impl Scenario {
    /// A NAT (or firewall) with the given behavior
    #[must_use]
    pub fn nat(mapping: Mapping, filtering: Filtering) -> Self {
        Self {
            mapping,
            filtering,
            drop_all: false,
            alternate_unreachable: false,
            advertise_changed: true,
            advertise_mapped: true,
            drop_first: 0,
        }
    }

    /// All UDP dropped
    #[must_use]
    pub fn blocked() -> Self {
        Self {
            drop_all: true,
            ..Self::nat(Mapping::Local, Filtering::None)
        }
    }

    /// Public address, no filtering
    #[must_use]
    pub fn open_internet() -> Self {
        Self::nat(Mapping::Local, Filtering::None)
    }

    /// Public address behind a stateful firewall
    #[must_use]
    pub fn symmetric_firewall() -> Self {
        Self::nat(Mapping::Local, Filtering::AddressAndPort)
    }

    /// Endpoint-independent mapping and filtering
    #[must_use]
    pub fn full_cone() -> Self {
        Self::nat(Mapping::Fixed(external()), Filtering::None)
    }

    /// Endpoint-independent mapping, address-dependent filtering
    #[must_use]
    pub fn restricted() -> Self {
        Self::nat(Mapping::Fixed(external()), Filtering::Address)
    }

    /// Endpoint-independent mapping, address-and-port-dependent filtering
    #[must_use]
    pub fn port_restricted() -> Self {
        Self::nat(Mapping::Fixed(external()), Filtering::AddressAndPort)
    }

    /// Destination-dependent mapping
    #[must_use]
    pub fn symmetric() -> Self {
        Self::nat(
            Mapping::PerDestination {
                ip: *external().ip(),
                base_port: 50000,
            },
            Filtering::AddressAndPort,
        )
    }

    /// Lose the first `count` requests
    #[must_use]
    pub fn with_drop_first(mut self, count: usize) -> Self {
        self.drop_first = count;
        self
    }
}

/// External endpoint used by the fixed-mapping scenarios
#[must_use]
pub fn external() -> SocketAddrV4 {
    SocketAddrV4::new(Ipv4Addr::new(203, 0, 113, 5), 61000)
}

/// A request seen by the reflector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRequest {
    /// Where the client sent it
    pub destination: SocketAddrV4,
    /// Transaction id
    pub transaction_id: TransactionId,
    /// CHANGE-REQUEST change-IP flag
    pub change_ip: bool,
    /// CHANGE-REQUEST change-port flag
    pub change_port: bool,
}

/// In-process reflector and NAT implementing `Transport`
pub struct SimulatedReflector {
    scenario: Scenario,
    sent: Mutex<Vec<SentRequest>>,
    destinations: Mutex<HashMap<SocketAddrV4, u16>>,
    received: AtomicUsize,
    tx: mpsc::UnboundedSender<(Vec<u8>, SocketAddr)>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<(Vec<u8>, SocketAddr)>>,
    closed: AtomicBool,
}

impl SimulatedReflector {
    /// Create a reflector for `scenario`
    #[must_use]
    pub fn new(scenario: Scenario) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            scenario,
            sent: Mutex::new(Vec::new()),
            destinations: Mutex::new(HashMap::new()),
            received: AtomicUsize::new(0),
            tx,
            rx: tokio::sync::Mutex::new(rx),
            closed: AtomicBool::new(false),
        }
    }

    /// Every request sent so far, in order
    #[must_use]
    pub fn sent(&self) -> Vec<SentRequest> {
        self.sent.lock().unwrap().clone()
    }

    /// Queue a raw datagram for the client, bypassing the NAT model
    pub fn inject(&self, datagram: Vec<u8>, from: SocketAddrV4) {
        let _ = self.tx.send((datagram, SocketAddr::V4(from)));
    }

    fn external_for(&self, destination: SocketAddrV4) -> SocketAddrV4 {
        match self.scenario.mapping {
            Mapping::Local => LOCAL,
            Mapping::Fixed(addr) => addr,
            Mapping::PerDestination { ip, base_port } => {
                let mut destinations = self.destinations.lock().unwrap();
                let next = base_port + destinations.len() as u16;
                let port = *destinations.entry(destination).or_insert(next);
                SocketAddrV4::new(ip, port)
            }
        }
    }

    fn passes_filter(&self, destination: SocketAddrV4, source: SocketAddrV4) -> bool {
        match self.scenario.filtering {
            Filtering::None => true,
            Filtering::Address => destination.ip() == source.ip(),
            Filtering::AddressAndPort => destination == source,
        }
    }

    /// Build the reply to `request`, or `None` if it is lost on the way.
    fn respond(&self, request: &StunMessage, destination: SocketAddrV4, index: usize) -> Option<(Vec<u8>, SocketAddrV4)> {
        if self.scenario.drop_all || index < self.scenario.drop_first {
            return None;
        }
        if self.scenario.alternate_unreachable && *destination.ip() == *ALTERNATE.ip() {
            return None;
        }

        let (change_ip, change_port) = change_flags(request);
        let source = SocketAddrV4::new(
            if change_ip { other_ip(*destination.ip()) } else { *destination.ip() },
            if change_port { other_port(destination.port()) } else { destination.port() },
        );

        let mapped = self.external_for(destination);
        if !self.passes_filter(destination, source) {
            return None;
        }

        let mut response = StunMessage::new(StunMessageType::BindingResponse, request.transaction_id);
        if self.scenario.advertise_mapped {
            response.add_attribute(StunAttribute::address(AttributeType::MappedAddress, mapped));
        }
        response.add_attribute(StunAttribute::address(AttributeType::SourceAddress, source));
        if self.scenario.advertise_changed {
            response.add_attribute(StunAttribute::address(AttributeType::ChangedAddress, ALTERNATE));
        }

        Some((response.encode(), source))
    }
}

#[async_trait]
impl Transport for SimulatedReflector {
    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> TransportResult<usize> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(TransportError::Closed);
        }
        let SocketAddr::V4(destination) = addr else {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "IPv6 destination",
            )));
        };

        let Ok(request) = decode_message(buf) else {
            return Ok(buf.len());
        };
        if request.message_type != StunMessageType::BindingRequest {
            return Ok(buf.len());
        }

        let (change_ip, change_port) = change_flags(&request);
        let index = {
            let mut sent = self.sent.lock().unwrap();
            sent.push(SentRequest {
                destination,
                transaction_id: request.transaction_id,
                change_ip,
                change_port,
            });
            sent.len() - 1
        };

        if let Some((reply, source)) = self.respond(&request, destination, index) {
            let _ = self.tx.send((reply, SocketAddr::V4(source)));
        }

        Ok(buf.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> TransportResult<(usize, SocketAddr)> {
        let mut rx = self.rx.lock().await;
        let (datagram, from) = rx.recv().await.ok_or(TransportError::Closed)?;
        let len = datagram.len().min(buf.len());
        buf[..len].copy_from_slice(&datagram[..len]);
        self.received.fetch_add(1, Ordering::Relaxed);
        Ok((len, from))
    }

    fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(SocketAddr::V4(LOCAL))
    }

    async fn close(&self) -> TransportResult<()> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    fn stats(&self) -> TransportStats {
        TransportStats {
            packets_sent: self.sent.lock().unwrap().len() as u64,
            packets_received: self.received.load(Ordering::Relaxed) as u64,
            ..TransportStats::default()
        }
    }
}

fn change_flags(request: &StunMessage) -> (bool, bool) {
    request
        .attributes
        .iter()
        .find(|attr| attr.attr_type == AttributeType::ChangeRequest)
        .and_then(|attr| <[u8; 4]>::try_from(attr.value.as_slice()).ok())
        .map(u32::from_be_bytes)
        .map_or((false, false), |flags| {
            (flags & CHANGE_IP_FLAG != 0, flags & CHANGE_PORT_FLAG != 0)
        })
}

fn other_ip(ip: Ipv4Addr) -> Ipv4Addr {
    if ip == *PRIMARY.ip() { *ALTERNATE.ip() } else { *PRIMARY.ip() }
}

fn other_port(port: u16) -> u16 {
    if port == PRIMARY.port() { ALTERNATE.port() } else { PRIMARY.port() }
}
