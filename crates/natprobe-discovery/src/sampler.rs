//! Repeated classification and mode selection.
//!
//! Single runs of the decision tree are unreliable because any lost datagram
//! changes the outcome. The aggregator fills `sample_count` slots with
//! terminal classifications, re-running transient outcomes a bounded number
//! of times per slot, and reports the most frequent class.

use crate::classify::ClassificationEngine;
use crate::error::NatError;
use crate::types::NatType;
use serde::Serialize;
use std::net::SocketAddrV4;

/// Default number of sample slots
pub const DEFAULT_SAMPLE_COUNT: usize = 20;

/// Default re-runs allowed per slot after a transient outcome
pub const DEFAULT_RETRY_CAP: usize = 5;

/// Emit at info when sample logging is on, debug otherwise.
macro_rules! sample_event {
    ($enabled:expr, $($arg:tt)+) => {
        if $enabled {
            tracing::info!($($arg)+);
        } else {
            tracing::debug!($($arg)+);
        }
    };
}

/// Aggregator settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerConfig {
    /// Terminal samples to collect
    pub sample_count: usize,
    /// Re-runs per slot before recording `Blocked`
    pub retry_cap: usize,
    /// Log each sample and the summary at info level
    pub logging_enabled: bool,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            sample_count: DEFAULT_SAMPLE_COUNT,
            retry_cap: DEFAULT_RETRY_CAP,
            logging_enabled: true,
        }
    }
}

/// How one slot was filled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotOutcome {
    /// Recorded class (`Blocked` when exhausted)
    pub nat_type: NatType,
    /// Classification runs spent on this slot
    pub runs: usize,
    /// The retry cap was exceeded
    pub exhausted: bool,
}

/// Result of a full sampling run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SamplingReport {
    /// Mode of `samples`
    pub nat_type: NatType,
    /// One recorded class per slot, in order
    pub samples: Vec<NatType>,
    /// Slots that fell back to `Blocked`
    pub exhausted_slots: usize,
    /// Classification runs across all slots
    pub runs: usize,
    /// Last mapped address seen in Test I
    pub external_addr: Option<SocketAddrV4>,
}

impl SamplingReport {
    /// Sample counts in first-occurrence order
    #[must_use]
    pub fn histogram(&self) -> Vec<(NatType, usize)> {
        histogram(&self.samples)
    }
}

/// Fills sample slots by driving a `ClassificationEngine`
pub struct SamplingAggregator {
    engine: ClassificationEngine,
    config: SamplerConfig,
}

impl SamplingAggregator {
    /// Create an aggregator
    #[must_use]
    pub fn new(engine: ClassificationEngine, config: SamplerConfig) -> Self {
        Self { engine, config }
    }

    /// Settings
    #[must_use]
    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Classification engine
    #[must_use]
    pub fn engine(&self) -> &ClassificationEngine {
        &self.engine
    }

    /// Give back the engine
    #[must_use]
    pub fn into_engine(self) -> ClassificationEngine {
        self.engine
    }

    /// Collect all samples and return the report.
    ///
    /// # Errors
    ///
    /// `InvalidSampleCount` for a zero sample count, `NoTerminalSample` when
    /// every slot was exhausted.
    pub async fn run(&mut self) -> Result<SamplingReport, NatError> {
        self.run_with_progress(|_, _| {}).await
    }

    /// Like `run`, calling `on_slot(index, outcome)` after each slot (index from 1).
    ///
    /// # Errors
    ///
    /// See [`SamplingAggregator::run`].
    pub async fn run_with_progress<F>(&mut self, mut on_slot: F) -> Result<SamplingReport, NatError>
    where
        F: FnMut(usize, &SlotOutcome),
    {
        let sample_count = self.config.sample_count;
        if sample_count == 0 {
            return Err(NatError::InvalidSampleCount(sample_count));
        }

        let mut samples = Vec::with_capacity(sample_count);
        let mut exhausted_slots = 0;
        let mut runs = 0;

        for index in 1..=sample_count {
            let outcome = self.sample_slot().await;
            runs += outcome.runs;
            if outcome.exhausted {
                exhausted_slots += 1;
            }

            sample_event!(
                self.config.logging_enabled,
                sample = index,
                of = sample_count,
                nat_type = %outcome.nat_type,
                runs = outcome.runs,
                exhausted = outcome.exhausted,
                "Test #{index} - NAT type: {}",
                outcome.nat_type
            );

            samples.push(outcome.nat_type);
            on_slot(index, &outcome);
        }

        if exhausted_slots == sample_count {
            return Err(NatError::NoTerminalSample {
                slots: sample_count,
                runs,
            });
        }

        let nat_type = mode(&samples).unwrap_or(NatType::Blocked);
        sample_event!(
            self.config.logging_enabled,
            %nat_type,
            samples = sample_count,
            exhausted_slots,
            runs,
            "Determined NAT type: {nat_type} (mode of {sample_count} samples)"
        );

        Ok(SamplingReport {
            nat_type,
            samples,
            exhausted_slots,
            runs,
            external_addr: self.engine.last_external(),
        })
    }

    /// Fill one slot: classify until terminal, at most `retry_cap` re-runs.
    pub async fn sample_slot(&mut self) -> SlotOutcome {
        let mut runs = 0;
        loop {
            runs += 1;
            let sample = self.engine.classify().await;
            if let Some(nat_type) = sample.terminal() {
                return SlotOutcome {
                    nat_type,
                    runs,
                    exhausted: false,
                };
            }

            if runs > self.config.retry_cap {
                tracing::debug!(%sample, runs, "retry cap exceeded, recording Blocked");
                return SlotOutcome {
                    nat_type: NatType::Blocked,
                    runs,
                    exhausted: true,
                };
            }
            tracing::debug!(%sample, runs, "transient outcome, re-running classification");
        }
    }
}

/// Most frequent value; ties go to whichever tied value appeared first.
///
/// Returns `None` for an empty slice.
///
/// # Examples
///
/// ```
/// use natprobe_discovery::sampler::mode;
/// use natprobe_discovery::NatType;
///
/// let samples = [NatType::FullCone, NatType::FullCone, NatType::SymmetricNat];
/// assert_eq!(mode(&samples), Some(NatType::FullCone));
/// assert_eq!(mode(&[]), None);
/// ```
#[must_use]
pub fn mode(samples: &[NatType]) -> Option<NatType> {
    let mut best: Option<(NatType, usize)> = None;
    for (nat_type, count) in histogram(samples) {
        if best.is_none_or(|(_, top)| count > top) {
            best = Some((nat_type, count));
        }
    }
    best.map(|(nat_type, _)| nat_type)
}

fn histogram(samples: &[NatType]) -> Vec<(NatType, usize)> {
    let mut counts: Vec<(NatType, usize)> = Vec::new();
    for &sample in samples {
        match counts.iter_mut().find(|(nat_type, _)| *nat_type == sample) {
            Some((_, count)) => *count += 1,
            None => counts.push((sample, 1)),
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use NatType::*;

    #[test]
    fn test_mode_majority() {
        assert_eq!(mode(&[FullCone, FullCone, SymmetricNat]), Some(FullCone));
        assert_eq!(mode(&[SymmetricNat, FullCone, SymmetricNat]), Some(SymmetricNat));
    }

    #[test]
    fn test_mode_tie_prefers_first_occurrence() {
        assert_eq!(
            mode(&[RestrictedNat, RestrictedPortNat, RestrictedPortNat, RestrictedNat]),
            Some(RestrictedNat)
        );
        assert_eq!(mode(&[OpenInternet, FullCone]), Some(OpenInternet));
    }

    #[test]
    fn test_mode_empty() {
        assert_eq!(mode(&[]), None);
    }

    #[test]
    fn test_histogram_order() {
        assert_eq!(
            histogram(&[SymmetricNat, FullCone, SymmetricNat, Blocked]),
            vec![(SymmetricNat, 2), (FullCone, 1), (Blocked, 1)]
        );
    }

    #[test]
    fn test_default_config() {
        let config = SamplerConfig::default();
        assert_eq!(config.sample_count, 20);
        assert_eq!(config.retry_cap, 5);
        assert!(config.logging_enabled);
    }
}
