//! Sampling progress display.

use indicatif::{ProgressBar, ProgressStyle};
use natprobe_discovery::{NatType, SlotOutcome};

/// Progress over sample slots
pub struct SampleProgress {
    bar: ProgressBar,
}

impl SampleProgress {
    /// Create a progress bar for `sample_count` slots
    #[must_use]
    pub fn new(sample_count: usize) -> Self {
        let bar = ProgressBar::new(sample_count as u64);

        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}")
                .expect("Invalid progress bar template")
                .progress_chars("#>-"),
        );

        bar.set_message("probing");

        Self { bar }
    }

    /// A bar that draws nothing
    #[must_use]
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    /// Record a finished slot
    pub fn record(&self, index: usize, outcome: &SlotOutcome) {
        self.bar.set_position(index as u64);
        self.bar.set_message(slot_message(outcome));
    }

    /// Finish with the determined type
    pub fn finish(&self, nat_type: NatType) {
        self.bar.finish_with_message(format!("done: {nat_type}"));
    }

    /// Abandon the progress bar (for errors)
    pub fn abandon(&self) {
        self.bar.abandon();
    }
}

/// Short per-slot status line
#[must_use]
pub fn slot_message(outcome: &SlotOutcome) -> String {
    if outcome.exhausted {
        format!("{} (gave up after {} runs)", outcome.nat_type, outcome.runs)
    } else if outcome.runs > 1 {
        format!("{} ({} runs)", outcome.nat_type, outcome.runs)
    } else {
        outcome.nat_type.to_string()
    }
}

/// Render a histogram row as `"Full Cone: 18/20 (90%)"`
#[must_use]
pub fn format_share(nat_type: NatType, count: usize, total: usize) -> String {
    let percent = if total == 0 { 0 } else { count * 100 / total };
    format!("{nat_type}: {count}/{total} ({percent}%)")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_message() {
        let first_try = SlotOutcome {
            nat_type: NatType::FullCone,
            runs: 1,
            exhausted: false,
        };
        assert_eq!(slot_message(&first_try), "Full Cone");

        let retried = SlotOutcome {
            nat_type: NatType::SymmetricNat,
            runs: 3,
            exhausted: false,
        };
        assert_eq!(slot_message(&retried), "Symmetric NAT (3 runs)");

        let exhausted = SlotOutcome {
            nat_type: NatType::Blocked,
            runs: 6,
            exhausted: true,
        };
        assert_eq!(slot_message(&exhausted), "Blocked (gave up after 6 runs)");
    }

    #[test]
    fn test_format_share() {
        assert_eq!(format_share(NatType::FullCone, 18, 20), "Full Cone: 18/20 (90%)");
        assert_eq!(format_share(NatType::Blocked, 0, 0), "Blocked: 0/0 (0%)");
    }

    #[test]
    fn test_hidden_bar_accepts_updates() {
        let progress = SampleProgress::hidden();
        progress.record(
            1,
            &SlotOutcome {
                nat_type: NatType::OpenInternet,
                runs: 1,
                exhausted: false,
            },
        );
        progress.finish(NatType::OpenInternet);
    }
}
