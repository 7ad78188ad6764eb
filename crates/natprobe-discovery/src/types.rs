//! NAT classification results
//!
//! The classic behavior-discovery tree sorts a host into one of seven classes.
//! One run of the tree can also end in a transient state that says nothing
//! about the NAT, which is why runs are modeled as `Sample` rather than
//! `NatType` directly.

use serde::Serialize;

/// NAT type classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NatType {
    /// No UDP response at all
    Blocked,
    /// Public address, unfiltered
    OpenInternet,
    /// Any external host can send to the mapped port
    FullCone,
    /// Public address behind a filtering firewall
    SymmetricUdpFirewall,
    /// Only previously contacted IPs can send
    RestrictedNat,
    /// Only previously contacted IP:port pairs can send
    RestrictedPortNat,
    /// Different mapping per destination
    SymmetricNat,
}

impl NatType {
    /// True for outcomes worth re-running classification for
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Blocked)
    }
}

impl std::fmt::Display for NatType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blocked => write!(f, "Blocked"),
            Self::OpenInternet => write!(f, "Open Internet"),
            Self::FullCone => write!(f, "Full Cone"),
            Self::SymmetricUdpFirewall => write!(f, "Symmetric UDP Firewall"),
            Self::RestrictedNat => write!(f, "Restricted NAT"),
            Self::RestrictedPortNat => write!(f, "Restricted Port NAT"),
            Self::SymmetricNat => write!(f, "Symmetric NAT"),
        }
    }
}

/// Outcome of a single classification run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sample {
    /// The tree reached a NAT class
    Nat(NatType),
    /// Test III against the server's alternate address went unanswered
    ChangedAddressError,
}

impl Sample {
    /// True if the aggregator should discard this run and try again
    #[must_use]
    pub fn is_transient(self) -> bool {
        match self {
            Self::Nat(nat) => nat.is_transient(),
            Self::ChangedAddressError => true,
        }
    }

    /// The NAT class, if the run is terminal
    #[must_use]
    pub fn terminal(self) -> Option<NatType> {
        match self {
            Self::Nat(nat) if !nat.is_transient() => Some(nat),
            _ => None,
        }
    }
}

impl From<NatType> for Sample {
    fn from(nat: NatType) -> Self {
        Self::Nat(nat)
    }
}

impl std::fmt::Display for Sample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nat(nat) => write!(f, "{nat}"),
            Self::ChangedAddressError => write!(f, "Changed Address Error"),
        }
    }
}
