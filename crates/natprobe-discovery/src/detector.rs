//! NAT type detection entry point
//!
//! Owns the lifetime of one probe socket: resolve the reflector, bind, run
//! every sample through one `SamplingAggregator`, then close.

use crate::classify::ClassificationEngine;
use crate::error::NatError;
use crate::probe::{ProbeConfig, ProbeTransport};
use crate::sampler::{
    DEFAULT_RETRY_CAP, DEFAULT_SAMPLE_COUNT, SamplerConfig, SamplingAggregator, SamplingReport,
    SlotOutcome,
};
use crate::types::NatType;
use natprobe_transport::udp::effective_local_ipv4;
use natprobe_transport::{AsyncUdpTransport, Transport};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

/// Public reflector supporting CHANGE-REQUEST
pub const DEFAULT_STUN_HOST: &str = "stun.sipgate.net";

/// Classic STUN port
pub const DEFAULT_STUN_PORT: u16 = 3478;

/// Detection options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectOptions {
    /// Terminal samples to collect (at least 1)
    pub sample_count: usize,
    /// Reflector host name or IPv4 literal
    pub stun_host: String,
    /// Reflector port
    pub stun_port: u16,
    /// Log samples and the summary at info level
    pub logging_enabled: bool,
    /// Local bind address; port 0 picks an ephemeral port
    pub bind_addr: SocketAddrV4,
    /// Per-probe retry policy
    pub probe: ProbeConfig,
    /// Re-runs per slot after a transient outcome
    pub retry_cap: usize,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            sample_count: DEFAULT_SAMPLE_COUNT,
            stun_host: DEFAULT_STUN_HOST.to_string(),
            stun_port: DEFAULT_STUN_PORT,
            logging_enabled: true,
            bind_addr: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0),
            probe: ProbeConfig::default(),
            retry_cap: DEFAULT_RETRY_CAP,
        }
    }
}

impl DetectOptions {
    fn sampler_config(&self) -> SamplerConfig {
        SamplerConfig {
            sample_count: self.sample_count,
            retry_cap: self.retry_cap,
            logging_enabled: self.logging_enabled,
        }
    }
}

/// NAT type detector
///
/// # Example
///
/// ```rust,no_run
/// use natprobe_discovery::{DetectOptions, NatDetector};
///
/// # async fn example() -> Result<(), natprobe_discovery::NatError> {
/// let detector = NatDetector::new(DetectOptions {
///     sample_count: 5,
///     ..DetectOptions::default()
/// });
/// let report = detector.detect_report().await?;
/// println!("NAT type: {} via {:?}", report.nat_type, report.external_addr);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct NatDetector {
    options: DetectOptions,
}

impl NatDetector {
    /// Create a detector
    #[must_use]
    pub fn new(options: DetectOptions) -> Self {
        Self { options }
    }

    /// Options in effect
    #[must_use]
    pub fn options(&self) -> &DetectOptions {
        &self.options
    }

    /// Determine the NAT type.
    ///
    /// # Errors
    ///
    /// See [`NatDetector::detect_report_with_progress`].
    pub async fn detect(&self) -> Result<NatType, NatError> {
        Ok(self.detect_report().await?.nat_type)
    }

    /// Determine the NAT type and return the full sampling report.
    ///
    /// # Errors
    ///
    /// See [`NatDetector::detect_report_with_progress`].
    pub async fn detect_report(&self) -> Result<SamplingReport, NatError> {
        self.detect_report_with_progress(|_, _| {}).await
    }

    /// Determine the NAT type, calling `on_slot` after each sample slot.
    ///
    /// # Errors
    ///
    /// Returns `NatError` if:
    /// - the sample count is zero
    /// - the reflector host has no IPv4 address
    /// - the socket cannot be bound
    /// - every sample slot exhausted its retries
    pub async fn detect_report_with_progress<F>(&self, on_slot: F) -> Result<SamplingReport, NatError>
    where
        F: FnMut(usize, &SlotOutcome),
    {
        if self.options.sample_count == 0 {
            return Err(NatError::InvalidSampleCount(0));
        }

        let server = resolve_ipv4(&self.options.stun_host, self.options.stun_port).await?;
        let transport = Arc::new(AsyncUdpTransport::bind(self.options.bind_addr).await?);

        let local_ip = effective_local_ipv4(*self.options.bind_addr.ip(), server)?;
        tracing::debug!(
            %server,
            local = ?transport.local_addr().ok(),
            %local_ip,
            "starting NAT detection"
        );

        let probes = ProbeTransport::new(transport.clone(), self.options.probe.clone());
        let engine = ClassificationEngine::new(probes, server, local_ip);
        let mut aggregator = SamplingAggregator::new(engine, self.options.sampler_config());

        let result = aggregator.run_with_progress(on_slot).await;

        // Every probe future has resolved by now, so no retry deadline can
        // outlive the socket.
        drop(aggregator);
        if let Err(e) = transport.close().await {
            tracing::warn!(error = %e, "failed to close probe socket");
        }

        let stats = transport.stats();
        tracing::debug!(
            packets_sent = stats.packets_sent,
            packets_received = stats.packets_received,
            send_errors = stats.send_errors,
            "probe socket closed"
        );

        result
    }
}

/// Determine the NAT type with `options`.
///
/// # Errors
///
/// See [`NatDetector::detect_report_with_progress`].
pub async fn detect_nat_type(options: DetectOptions) -> Result<NatType, NatError> {
    NatDetector::new(options).detect().await
}

/// Resolve `host` to its first IPv4 address.
///
/// # Errors
///
/// Returns `NatError::Resolve` on lookup failure or when only IPv6 addresses exist.
pub async fn resolve_ipv4(host: &str, port: u16) -> Result<SocketAddrV4, NatError> {
    let addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| NatError::Resolve {
            host: host.to_string(),
            reason: e.to_string(),
        })?;

    addrs
        .filter_map(|addr| match addr {
            SocketAddr::V4(v4) => Some(v4),
            SocketAddr::V6(_) => None,
        })
        .next()
        .ok_or_else(|| NatError::Resolve {
            host: host.to_string(),
            reason: "no IPv4 address".to_string(),
        })
}
