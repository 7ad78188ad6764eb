//! NAT behavior discovery decision tree
//!
//! ```text
//!            Test I (server, no flags)
//!                 |
//!       no reply -+- reply
//!          |           |
//!       Blocked   mapped IP == local IP ?
//!                  |yes                      |no
//!          Test II (change IP+port)    Test II (change IP+port)
//!           reply: Open Internet        reply: Full Cone
//!           none:  Symmetric UDP FW     none: Test III (changed address, no flags)
//!                                         none: Changed Address Error
//!                                         mapped differs: Symmetric NAT
//!                                         mapped same: Test IV (changed IP, server port, change port)
//!                                           reply: Restricted NAT
//!                                           none:  Restricted Port NAT
//! ```

use crate::probe::{ProbeResult, ProbeTransport};
use crate::types::{NatType, Sample};
use std::net::{Ipv4Addr, SocketAddrV4};

/// Which step of the tree a probe belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestStep {
    /// Plain request to the primary address
    One,
    /// Change IP and port
    Two,
    /// Plain request to the alternate address
    Three,
    /// Change port only, sent to the alternate IP
    Four,
}

impl std::fmt::Display for TestStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::One => write!(f, "Test I"),
            Self::Two => write!(f, "Test II"),
            Self::Three => write!(f, "Test III"),
            Self::Four => write!(f, "Test IV"),
        }
    }
}

/// Runs the decision tree against one reflector
pub struct ClassificationEngine {
    probes: ProbeTransport,
    server: SocketAddrV4,
    local_ip: Ipv4Addr,
    last_external: Option<SocketAddrV4>,
}

impl ClassificationEngine {
    /// Create an engine.
    ///
    /// `local_ip` is the interface address compared against Test I's mapped
    /// address to detect an unNATed host.
    #[must_use]
    pub fn new(probes: ProbeTransport, server: SocketAddrV4, local_ip: Ipv4Addr) -> Self {
        Self {
            probes,
            server,
            local_ip,
            last_external: None,
        }
    }

    /// Reflector primary address
    #[must_use]
    pub fn server(&self) -> SocketAddrV4 {
        self.server
    }

    /// Local interface address
    #[must_use]
    pub fn local_ip(&self) -> Ipv4Addr {
        self.local_ip
    }

    /// Mapped address reported by the most recent answered Test I
    #[must_use]
    pub fn last_external(&self) -> Option<SocketAddrV4> {
        self.last_external
    }

    /// Probe transport
    #[must_use]
    pub fn probes(&self) -> &ProbeTransport {
        &self.probes
    }

    /// Give back the probe transport
    #[must_use]
    pub fn into_probes(self) -> ProbeTransport {
        self.probes
    }

    /// Run the tree once. Sends between one and four probes, strictly in sequence.
    pub async fn classify(&mut self) -> Sample {
        let first = self.run_test(TestStep::One, self.server, false, false).await;
        if !first.responded {
            return NatType::Blocked.into();
        }

        let Some(external) = first.external_addr else {
            tracing::warn!("Test I answered without MAPPED-ADDRESS");
            return Sample::ChangedAddressError;
        };
        self.last_external = Some(external);

        let second = self.run_test(TestStep::Two, self.server, true, true).await;

        if *external.ip() == self.local_ip {
            return if second.responded {
                NatType::OpenInternet.into()
            } else {
                NatType::SymmetricUdpFirewall.into()
            };
        }

        if second.responded {
            return NatType::FullCone.into();
        }

        let Some(changed) = first.changed_addr else {
            tracing::warn!("Test I answered without CHANGED-ADDRESS");
            return Sample::ChangedAddressError;
        };

        let third = self.run_test(TestStep::Three, changed, false, false).await;
        if !third.responded {
            return Sample::ChangedAddressError;
        }

        if third.external_addr != Some(external) {
            return NatType::SymmetricNat.into();
        }

        let alternate_ip = SocketAddrV4::new(*changed.ip(), self.server.port());
        let fourth = self.run_test(TestStep::Four, alternate_ip, false, true).await;
        if fourth.responded {
            NatType::RestrictedNat.into()
        } else {
            NatType::RestrictedPortNat.into()
        }
    }

    async fn run_test(
        &mut self,
        step: TestStep,
        destination: SocketAddrV4,
        change_ip: bool,
        change_port: bool,
    ) -> ProbeResult {
        let mut probe = self.probes.probe(destination, change_ip, change_port);
        let result = self.probes.send(&mut probe).await;
        tracing::debug!(
            test = %step,
            %destination,
            responded = result.responded,
            external = ?result.external_addr,
            "test finished"
        );
        result
    }
}
