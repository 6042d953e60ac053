//! Property tests for the online (Welford) statistics kept by
//! `SampleBuffer`, checked against the textbook two-pass formulas fed the
//! same `time_ns` values via `update_sample_with_elapsed` (which accepts an
//! externally-supplied elapsed time instead of deriving it from the clock,
//! so these durations are exact rather than real measured timings).

use proptest::prelude::*;

use benchkit::allocator::{AllocatorBridge, TuningSnapshot};
use benchkit::sample::SampleBuffer;

struct NoopBridge;

impl AllocatorBridge for NoopBridge {
    fn heap_kb(&self) -> usize {
        0
    }
    fn collect_full(&self) {}
    fn stop(&self) {}
    fn restart(&self) {}
    fn step(&self, _kb: i64) {}
    fn save_tuning(&self) -> TuningSnapshot {
        TuningSnapshot::default()
    }
    fn restore_tuning(&self, _snapshot: TuningSnapshot) {}
}

fn fill(durations: &[u64]) -> SampleBuffer {
    let bridge = NoopBridge;
    let mut buffer = SampleBuffer::new("prop", durations.len() as i64, -1, 95.0, 5.0).unwrap();
    for &d in durations {
        buffer.init_sample(&bridge).unwrap();
        buffer.update_sample_with_elapsed(&bridge, d).unwrap();
    }
    buffer
}

fn two_pass_mean(values: &[u64]) -> f64 {
    values.iter().map(|&v| v as f64).sum::<f64>() / values.len() as f64
}

fn two_pass_variance(values: &[u64]) -> f64 {
    let mean = two_pass_mean(values);
    let sum_sq: f64 = values.iter().map(|&v| (v as f64 - mean).powi(2)).sum();
    sum_sq / (values.len() as f64 - 1.0)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn mean_matches_two_pass_formula(durations in prop::collection::vec(1u64..1_000_000, 1..200)) {
        let buffer = fill(&durations);
        let expected = two_pass_mean(&durations);
        prop_assert!((buffer.mean() - expected).abs() <= expected.abs() * 1e-9 + 1e-6);
    }

    #[test]
    fn variance_matches_two_pass_formula(durations in prop::collection::vec(1u64..1_000_000, 2..200)) {
        let buffer = fill(&durations);
        let expected = two_pass_variance(&durations);
        let tolerance = expected.abs() * 1e-6 + 1e-3;
        prop_assert!((buffer.variance() - expected).abs() <= tolerance);
    }

    #[test]
    fn min_max_and_count_track_inputs(durations in prop::collection::vec(1u64..1_000_000, 1..200)) {
        let buffer = fill(&durations);
        prop_assert_eq!(buffer.count(), durations.len());
        prop_assert_eq!(buffer.min(), *durations.iter().min().unwrap());
        prop_assert_eq!(buffer.max(), *durations.iter().max().unwrap());
    }

    #[test]
    fn single_sample_variance_is_nan(duration in 1u64..1_000_000) {
        let buffer = fill(&[duration]);
        prop_assert!(buffer.variance().is_nan());
    }
}
