//! # natprobe Discovery
//!
//! NAT type detection using classic (RFC 3489 style) STUN probes.
//!
//! This crate provides:
//! - A codec for Binding Requests and Responses
//! - A transaction registry matching responses to outstanding probes
//! - A probe loop with fixed-interval retransmission
//! - The Test I-IV behavior-discovery decision tree
//! - Repeated sampling with mode selection
//!
//! ## Example
//!
//! ```rust,no_run
//! use natprobe_discovery::{DetectOptions, detect_nat_type};
//!
//! # async fn example() -> Result<(), natprobe_discovery::NatError> {
//! let nat_type = detect_nat_type(DetectOptions::default()).await?;
//! println!("NAT type: {nat_type}");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod classify;
pub mod detector;
pub mod error;
pub mod probe;
pub mod registry;
pub mod sampler;
pub mod stun;
pub mod types;

pub use classify::{ClassificationEngine, TestStep};
pub use detector::{DetectOptions, NatDetector, detect_nat_type, resolve_ipv4};
pub use error::NatError;
pub use probe::{Probe, ProbeConfig, ProbeResult, ProbeTransport};
pub use registry::{TransactionId, TransactionRegistry};
pub use sampler::{SamplerConfig, SamplingAggregator, SamplingReport, SlotOutcome, mode};
pub use stun::{StunError, StunMessage, StunMessageType};
pub use types::{NatType, Sample};

/// Determine the NAT type and return every recorded sample alongside it.
///
/// # Errors
///
/// See [`NatDetector::detect_report_with_progress`].
pub async fn detect_with_report(options: DetectOptions) -> Result<SamplingReport, NatError> {
    NatDetector::new(options).detect_report().await
}
