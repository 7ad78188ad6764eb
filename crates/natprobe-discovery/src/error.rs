//! Errors surfaced to callers of the detector.

use natprobe_transport::TransportError;
use thiserror::Error;

/// NAT detection error
#[derive(Debug, Error)]
pub enum NatError {
    /// Sample count must be at least one
    #[error("invalid sample count: {0} (must be at least 1)")]
    InvalidSampleCount(usize),

    /// Every sample slot ran out of retries without a terminal classification
    #[error("no terminal sample after {runs} classification runs across {slots} slots; UDP may be blocked")]
    NoTerminalSample {
        /// Slots attempted
        slots: usize,
        /// Classification runs performed
        runs: usize,
    },

    /// Reflector host did not resolve to an IPv4 address
    #[error("cannot resolve STUN host {host}: {reason}")]
    Resolve {
        /// Host as given
        host: String,
        /// Resolver error or "no IPv4 address"
        reason: String,
    },

    /// Socket setup or teardown failed
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Local interface lookup failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
