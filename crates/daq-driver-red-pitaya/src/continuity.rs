//! Per-burst continuity evaluation.
//!
//! A burst is judged on its own: the largest absolute step of the in-phase
//! component between adjacent records. Steps across burst boundaries are not
//! considered.

use crate::frame::FrameBuffer;

/// Default anomaly threshold, about 0.05% of full scale.
pub const DEFAULT_THRESHOLD: u64 = 1_000_000;

/// Largest adjacent step found in one burst.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaxStep {
    /// `max |I[i] - I[i-1]|` over the burst.
    pub dmax: u64,
    /// First index `i` at which `dmax` occurred (0 when the burst has no steps).
    pub index: usize,
}

/// Scan a sequence of in-phase values for the largest adjacent step.
///
/// Differences are taken in 64 bits so opposite full-scale values cannot overflow.
pub fn max_adjacent_step<I>(in_phase: I) -> MaxStep
where
    I: IntoIterator<Item = i32>,
{
    let mut iter = in_phase.into_iter();
    let Some(mut prev) = iter.next() else {
        return MaxStep::default();
    };

    let mut best = MaxStep::default();
    for (offset, cur) in iter.enumerate() {
        let d = (cur as i64 - prev as i64).unsigned_abs();
        if d > best.dmax {
            best = MaxStep {
                dmax: d,
                index: offset + 1,
            };
        }
        prev = cur;
    }
    best
}

/// Outcome of checking one burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurstReport {
    /// Zero-based burst sequence number since the monitor started.
    pub burst: u64,
    pub dmax: u64,
    pub index: usize,
    pub anomaly: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ContinuityChecker {
    threshold: u64,
}

impl Default for ContinuityChecker {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl ContinuityChecker {
    pub fn new(threshold: u64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Evaluate a full burst.
    pub fn check(&self, burst: u64, frame: &FrameBuffer) -> BurstReport {
        let step = max_adjacent_step(frame.in_phase_iter());
        BurstReport {
            burst,
            dmax: step.dmax,
            index: step.index,
            anomaly: step.dmax > self.threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waveform::{generate, SampleRecord};

    const N: usize = 524_288;

    fn frame_with(in_phase: impl Fn(usize) -> i32, records: usize) -> FrameBuffer {
        let recs: Vec<SampleRecord> = (0..records).map(|i| SampleRecord::new(in_phase(i), 0)).collect();
        let mut frame = FrameBuffer::new(records).unwrap();
        frame.fill_from(&recs);
        frame
    }

    #[test]
    fn test_ramp_is_continuous() {
        let frame = frame_with(|i| i as i32, N);
        let report = ContinuityChecker::default().check(0, &frame);
        assert_eq!(report.dmax, 1);
        assert!(!report.anomaly);
    }

    #[test]
    fn test_single_spike_reported_once() {
        let frame = frame_with(|i| if i == 100 { 5_000_000 } else { 0 }, N);
        let report = ContinuityChecker::default().check(7, &frame);
        assert_eq!(report.burst, 7);
        assert_eq!(report.dmax, 5_000_000);
        // Both the rising and falling edge equal dmax; the first is reported.
        assert_eq!(report.index, 100);
        assert!(report.anomaly);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let frame = frame_with(|i| if i == 1 { 1_000_000 } else { 0 }, 4);
        assert!(!ContinuityChecker::default().check(0, &frame).anomaly);
        assert!(ContinuityChecker::new(999_999).check(0, &frame).anomaly);
    }

    #[test]
    fn test_full_scale_swing_does_not_overflow() {
        let step = max_adjacent_step([i32::MAX, i32::MIN, i32::MAX]);
        assert_eq!(step.dmax, u32::MAX as u64);
        assert_eq!(step.index, 1);
    }

    #[test]
    fn test_degenerate_lengths() {
        assert_eq!(max_adjacent_step(std::iter::empty()), MaxStep::default());
        assert_eq!(max_adjacent_step([42]), MaxStep::default());
    }

    #[test]
    fn test_reference_waveform_is_below_threshold() {
        // Four revolutions of the 131072-record waveform fill one burst.
        let waveform = generate(131_072);
        let frame = frame_with(|i| waveform[i % waveform.len()].i, N);
        let report = ContinuityChecker::default().check(0, &frame);
        assert!(!report.anomaly, "dmax {}", report.dmax);
        assert!(report.dmax > 100_000);
    }
}
