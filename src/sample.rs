//! The sample buffer: online statistics over per-iteration measurements.
//!
//! `SampleBuffer` is the core entity of the measurement engine. It owns a
//! pre-allocated column of [`SampleRecord`]s (so no allocation happens
//! inside the measurement loop), maintains running aggregates with
//! Welford's algorithm, and exposes the GC-coordination protocol
//! (`preprocess`/`init_sample`/`update_sample`/`postprocess`) the
//! [`crate::sampler::Sampler`] drives.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::allocator::AllocatorBridge;
use crate::clock::{Clock, MonotonicClock};
use crate::error::{BufferError, SamplerError};

/// Maximum byte length of a [`SampleBuffer`] name.
pub const MAX_NAME_BYTES: usize = 255;

/// Minimum sample count below which [`SampleBuffer::mad`] returns `NaN`.
const MIN_MAD_SAMPLES: usize = 5;

/// One iteration's observation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRecord {
    /// Nanoseconds elapsed during the iteration.
    pub time_ns: u64,
    /// Heap usage (KiB) immediately before the iteration.
    pub before_kb: u64,
    /// Heap usage (KiB) immediately after the iteration.
    pub after_kb: u64,
    /// `max(0, after_kb - before_kb)`.
    pub allocated_kb: u64,
}

/// Allocation-pressure summary produced by [`SampleBuffer::memstat`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemStat {
    /// Average allocation per iteration, in KiB (`sum_allocated_kb / count`).
    pub alloc_per_op_kb: f64,
    /// Peak `after_kb` observed across the run.
    pub peak_after_kb: u64,
    /// First-to-last `before_kb` delta, clamped to non-negative: memory that
    /// was never reclaimed by the time the run finished.
    pub uncollected_kb: u64,
    /// Mean of the non-negative `before_kb` deltas between consecutive
    /// samples.
    pub avg_increment_kb: f64,
    /// Largest single-iteration `allocated_kb`.
    pub max_alloc_per_op_kb: u64,
}

/// Columnar snapshot of a [`SampleBuffer`], used for persistence and test
/// assertions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dump {
    /// Buffer name.
    pub name: String,
    /// Buffer capacity at the time of the dump.
    pub capacity: usize,
    /// Valid record count.
    pub count: usize,
    /// Allocator step policy.
    pub gc_step: i64,
    /// Confidence level, percent.
    pub cl: f64,
    /// Target relative CI width, percent.
    pub rciw: f64,
    /// Heap usage recorded by `preprocess`.
    pub base_kb: u64,
    /// Sum of `time_ns` over `[0, count)`.
    pub sum: u64,
    /// Minimum `time_ns`.
    pub min: u64,
    /// Maximum `time_ns`.
    pub max: u64,
    /// Running mean.
    pub mean: f64,
    /// Running sum of squared deviations.
    pub m2: f64,
    /// Per-sample elapsed time, length `count`.
    pub time_ns: Vec<u64>,
    /// Per-sample heap-before, length `count`.
    pub before_kb: Vec<u64>,
    /// Per-sample heap-after, length `count`.
    pub after_kb: Vec<u64>,
    /// Per-sample allocated KiB, length `count`.
    pub allocated_kb: Vec<u64>,
}

impl Dump {
    /// Serialize to the JSON interchange form persistence and
    /// test-interchange happen over.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse a [`Dump`] previously produced by [`Self::to_json`].
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Fixed-capacity, grow-on-request store of per-iteration records plus
/// online aggregates.
///
/// Exclusively owned by the benchmark that created it; the
/// [`crate::ci::CIController`] and reporter hold only read access.
pub struct SampleBuffer {
    name: String,
    capacity: usize,
    count: usize,
    records: Vec<SampleRecord>,
    base_kb: u64,
    sum: u64,
    min: u64,
    max: u64,
    mean: f64,
    m2: f64,
    sum_allocated_kb: u64,
    gc_step: i64,
    cl: f64,
    rciw: f64,
    saved_tuning: Option<crate::allocator::TuningSnapshot>,
    clock: Arc<dyn Clock>,
}

fn validate_fields(name: &str, capacity: i64, cl: f64, rciw: f64) -> Result<(), BufferError> {
    if name.len() > MAX_NAME_BYTES {
        return Err(BufferError::NameTooLong(name.len()));
    }
    if capacity <= 0 {
        return Err(BufferError::InvalidCapacity(capacity));
    }
    if !(cl > 0.0 && cl <= 100.0) {
        return Err(BufferError::InvalidConfidenceLevel(cl));
    }
    if !(rciw > 0.0 && rciw <= 100.0) {
        return Err(BufferError::InvalidRciw(rciw));
    }
    Ok(())
}

impl SampleBuffer {
    /// Construct a new buffer backed by the default [`MonotonicClock`].
    pub fn new(
        name: impl Into<String>,
        capacity: i64,
        gc_step: i64,
        cl: f64,
        rciw: f64,
    ) -> Result<Self, BufferError> {
        Self::with_clock(
            name,
            capacity,
            gc_step,
            cl,
            rciw,
            Arc::new(MonotonicClock::new()),
        )
    }

    /// Construct a new buffer backed by an explicit [`Clock`] (used by tests
    /// and any caller wanting a non-default time source).
    pub fn with_clock(
        name: impl Into<String>,
        capacity: i64,
        gc_step: i64,
        cl: f64,
        rciw: f64,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, BufferError> {
        let name = name.into();
        validate_fields(&name, capacity, cl, rciw)?;
        let capacity = capacity as usize;
        Ok(SampleBuffer {
            name,
            capacity,
            count: 0,
            records: vec![SampleRecord::default(); capacity],
            base_kb: 0,
            sum: 0,
            min: u64::MAX,
            max: 0,
            mean: 0.0,
            m2: 0.0,
            sum_allocated_kb: 0,
            gc_step,
            cl,
            rciw,
            saved_tuning: None,
            clock,
        })
    }

    /// Rebuild a buffer from a previously produced [`Dump`], revalidating
    /// every field and re-deriving aggregates by replaying records through
    /// the same online-update math as `update_sample`. `base_kb` is
    /// preserved verbatim.
    pub fn restore(dump: Dump) -> Result<Self, BufferError> {
        validate_fields(&dump.name, dump.capacity as i64, dump.cl, dump.rciw)?;
        if dump.count > dump.capacity {
            return Err(BufferError::InconsistentDump(format!(
                "count {} exceeds capacity {}",
                dump.count, dump.capacity
            )));
        }
        let lengths_consistent = dump.time_ns.len() == dump.count
            && dump.before_kb.len() == dump.count
            && dump.after_kb.len() == dump.count
            && dump.allocated_kb.len() == dump.count;
        if !lengths_consistent {
            return Err(BufferError::InconsistentDump(
                "parallel record arrays must each have length `count`".into(),
            ));
        }

        let mut buffer = SampleBuffer::new(
            dump.name.clone(),
            dump.capacity as i64,
            dump.gc_step,
            dump.cl,
            dump.rciw,
        )?;
        buffer.base_kb = dump.base_kb;

        for i in 0..dump.count {
            let record = SampleRecord {
                time_ns: dump.time_ns[i],
                before_kb: dump.before_kb[i],
                after_kb: dump.after_kb[i],
                allocated_kb: dump.allocated_kb[i],
            };
            buffer.records[i] = record;
            buffer.fold_record(record);
            buffer.count += 1;
        }
        Ok(buffer)
    }

    /// Maximum number of records this buffer can currently hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of valid records.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Buffer name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Allocator step policy (`-1` disabled, `0` full-GC-per-sample, `>0`
    /// step threshold in KiB).
    pub fn gc_step(&self) -> i64 {
        self.gc_step
    }

    /// Confidence level, percent.
    pub fn cl(&self) -> f64 {
        self.cl
    }

    /// Target relative CI width, percent.
    pub fn rciw(&self) -> f64 {
        self.rciw
    }

    /// Heap usage recorded after the initial full collection in
    /// `preprocess`.
    pub fn base_kb(&self) -> u64 {
        self.base_kb
    }

    /// Increase capacity by `additional` records, preserving the first
    /// `count` records and all aggregates.
    pub fn grow(&mut self, additional: usize) {
        self.capacity += additional;
        self.records.resize(self.capacity, SampleRecord::default());
    }

    /// Reset `count` and all aggregates; zero the record region. Does not
    /// touch saved tuning or `base_kb`.
    pub fn clear(&mut self) {
        self.count = 0;
        self.sum = 0;
        self.min = u64::MAX;
        self.max = 0;
        self.mean = 0.0;
        self.m2 = 0.0;
        self.sum_allocated_kb = 0;
        for record in &mut self.records {
            *record = SampleRecord::default();
        }
    }

    /// Scoped acquisition of measurement state: save collector tuning,
    /// force a full collection, record `base_kb`, and stop the collector if
    /// `gc_step < 0`. Must be paired with exactly one [`Self::postprocess`].
    pub fn preprocess(&mut self, bridge: &dyn AllocatorBridge) {
        self.saved_tuning = Some(bridge.save_tuning());
        bridge.collect_full();
        self.base_kb = bridge.heap_kb() as u64;
        if self.gc_step < 0 {
            bridge.stop();
        }
    }

    /// Restart the collector and restore the tuning saved by
    /// [`Self::preprocess`].
    pub fn postprocess(&mut self, bridge: &dyn AllocatorBridge) {
        bridge.restart();
        if let Some(snapshot) = self.saved_tuning.take() {
            bridge.restore_tuning(snapshot);
        }
    }

    /// Reserve the next record slot: fails with `NoSpace` if the buffer is
    /// at capacity. If `gc_step == 0`, forces a full collection first. The
    /// slot is provisional — `count` is not advanced until
    /// [`Self::update_sample`].
    pub fn init_sample(&mut self, bridge: &dyn AllocatorBridge) -> Result<(), SamplerError> {
        if self.count == self.capacity {
            return Err(BufferError::NoSpace(self.capacity).into());
        }
        if self.gc_step == 0 {
            bridge.collect_full();
        }
        let time_ns = self.clock.now_ns()?;
        let before_kb = bridge.heap_kb() as u64;
        self.records[self.count] = SampleRecord {
            time_ns,
            before_kb,
            after_kb: 0,
            allocated_kb: 0,
        };
        Ok(())
    }

    /// Finalise the slot reserved by [`Self::init_sample`]: compute elapsed
    /// time and allocated KiB, fold the result into the running aggregates
    /// via Welford's algorithm, step the collector if `gc_step` demands it,
    /// and advance `count`.
    pub fn update_sample(&mut self, bridge: &dyn AllocatorBridge) -> Result<(), SamplerError> {
        if self.count == self.capacity {
            return Err(BufferError::NoSpace(self.capacity).into());
        }
        let now = self.clock.now_ns()?;
        let slot = self.records[self.count];
        let elapsed = now.saturating_sub(slot.time_ns);
        let after_kb = bridge.heap_kb() as u64;
        let allocated_kb = after_kb.saturating_sub(slot.before_kb);
        let record = SampleRecord {
            time_ns: elapsed,
            before_kb: slot.before_kb,
            after_kb,
            allocated_kb,
        };
        self.records[self.count] = record;
        self.fold_record(record);
        if self.gc_step > 0 && allocated_kb as i64 >= self.gc_step {
            bridge.step(self.gc_step);
        }
        self.count += 1;
        Ok(())
    }

    /// Finalise the slot reserved by [`Self::init_sample`] using an
    /// externally-supplied elapsed time rather than the delta against the
    /// clock reading `init_sample` recorded. Used by
    /// [`crate::sampler::Sampler::run_with_timer`], where the user's own
    /// [`crate::sampler::Timer`] decides what part of the closure's
    /// wall-clock counts as the sample.
    pub fn update_sample_with_elapsed(
        &mut self,
        bridge: &dyn AllocatorBridge,
        elapsed_ns: u64,
    ) -> Result<(), SamplerError> {
        if self.count == self.capacity {
            return Err(BufferError::NoSpace(self.capacity).into());
        }
        let slot = self.records[self.count];
        let after_kb = bridge.heap_kb() as u64;
        let allocated_kb = after_kb.saturating_sub(slot.before_kb);
        let record = SampleRecord {
            time_ns: elapsed_ns,
            before_kb: slot.before_kb,
            after_kb,
            allocated_kb,
        };
        self.records[self.count] = record;
        self.fold_record(record);
        if self.gc_step > 0 && allocated_kb as i64 >= self.gc_step {
            bridge.step(self.gc_step);
        }
        self.count += 1;
        Ok(())
    }

    /// Fold one record into the running aggregates using Welford's
    /// algorithm. Does not advance `count` — callers are responsible for
    /// that (update_sample advances once per call, restore replays every
    /// record before restoring the saved `count`).
    fn fold_record(&mut self, record: SampleRecord) {
        let n = self.count as f64 + 1.0;
        let x = record.time_ns as f64;
        if self.count == 0 {
            self.mean = x;
            self.m2 = 0.0;
        } else {
            let delta = x - self.mean;
            self.mean += delta / n;
            self.m2 += delta * (x - self.mean);
        }
        self.sum = self.sum.saturating_add(record.time_ns);
        self.min = self.min.min(record.time_ns);
        self.max = self.max.max(record.time_ns);
        self.sum_allocated_kb = self.sum_allocated_kb.saturating_add(record.allocated_kb);
    }

    /// Minimum observed `time_ns`.
    pub fn min(&self) -> u64 {
        self.min
    }

    /// Maximum observed `time_ns`.
    pub fn max(&self) -> u64 {
        self.max
    }

    /// Running mean of `time_ns`.
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sample variance, `M2 / (n - 1)`. `NaN` if `count < 2`.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            f64::NAN
        } else {
            self.m2 / (self.count as f64 - 1.0)
        }
    }

    /// Sample standard deviation.
    pub fn stddev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Standard error of the mean.
    pub fn stderr(&self) -> f64 {
        self.stddev() / (self.count as f64).sqrt()
    }

    /// Coefficient of variation, `stddev / mean`.
    pub fn cv(&self) -> f64 {
        self.stddev() / self.mean
    }

    /// `p`-th percentile of `time_ns`, computed by sorting a scratch copy
    /// and linearly interpolating at rank `(p/100) * (n-1)`.
    pub fn percentile(&self, p: f64) -> f64 {
        if self.count == 0 {
            return f64::NAN;
        }
        let mut scratch: Vec<u64> = self.records[..self.count].iter().map(|r| r.time_ns).collect();
        scratch.sort_unstable();
        let n = scratch.len();
        if n == 1 {
            return scratch[0] as f64;
        }
        let rank = (p / 100.0) * (n as f64 - 1.0);
        let lo = rank.floor().max(0.0) as usize;
        let hi = rank.ceil().min((n - 1) as f64) as usize;
        if lo == hi {
            return scratch[lo] as f64;
        }
        let frac = rank - lo as f64;
        scratch[lo] as f64 * (1.0 - frac) + scratch[hi] as f64 * frac
    }

    /// Throughput in ops/s, `1 / (mean / 1e9)`. `NaN` if `mean` is ~0.
    pub fn throughput(&self) -> f64 {
        let secs = self.mean / 1e9;
        if secs.abs() < f64::EPSILON {
            f64::NAN
        } else {
            1.0 / secs
        }
    }

    /// Median of absolute deviations from the median. `NaN` if
    /// `count < MIN_MAD_SAMPLES`.
    pub fn mad(&self) -> f64 {
        if self.count < MIN_MAD_SAMPLES {
            return f64::NAN;
        }
        let mut values: Vec<f64> = self.records[..self.count]
            .iter()
            .map(|r| r.time_ns as f64)
            .collect();
        let median = Self::median(&mut values);
        let mut deviations: Vec<f64> = values.iter().map(|v| (v - median).abs()).collect();
        Self::median(&mut deviations)
    }

    fn median(values: &mut [f64]) -> f64 {
        values.sort_by(|a, b| a.partial_cmp(b).expect("non-NaN timing values"));
        let n = values.len();
        if n % 2 == 1 {
            values[n / 2]
        } else {
            (values[n / 2 - 1] + values[n / 2]) / 2.0
        }
    }

    /// Allocation-pressure summary over the current records.
    pub fn memstat(&self) -> MemStat {
        if self.count == 0 {
            return MemStat {
                alloc_per_op_kb: 0.0,
                peak_after_kb: 0,
                uncollected_kb: 0,
                avg_increment_kb: 0.0,
                max_alloc_per_op_kb: 0,
            };
        }
        let records = &self.records[..self.count];
        let peak_after_kb = records.iter().map(|r| r.after_kb).max().unwrap_or(0);
        let max_alloc_per_op_kb = records.iter().map(|r| r.allocated_kb).max().unwrap_or(0);
        let alloc_per_op_kb = self.sum_allocated_kb as f64 / self.count as f64;
        let first_before = records.first().map(|r| r.before_kb).unwrap_or(0);
        let last_before = records.last().map(|r| r.before_kb).unwrap_or(0);
        let uncollected_kb = last_before.saturating_sub(first_before);

        let mut increments = Vec::with_capacity(records.len().saturating_sub(1));
        for pair in records.windows(2) {
            let delta = pair[1].before_kb as i64 - pair[0].before_kb as i64;
            increments.push(delta.max(0) as u64);
        }
        let avg_increment_kb = if increments.is_empty() {
            0.0
        } else {
            increments.iter().sum::<u64>() as f64 / increments.len() as f64
        };

        MemStat {
            alloc_per_op_kb,
            peak_after_kb,
            uncollected_kb,
            avg_increment_kb,
            max_alloc_per_op_kb,
        }
    }

    /// Combine several buffers using Chan's parallel Welford combining
    /// formula, folded left-to-right (associative, so the fold order does
    /// not affect the result up to floating tolerance). The merged capacity
    /// is the sum of the inputs' capacities; `min`/`max` combine by
    /// extremum; `sum`/`sum_allocated_kb` add. Name, `gc_step`, `cl`,
    /// `rciw`, and the clock are taken from the first buffer.
    pub fn merge(buffers: &[&SampleBuffer]) -> Result<SampleBuffer, BufferError> {
        let first = buffers
            .first()
            .ok_or_else(|| BufferError::InconsistentDump("merge requires at least one buffer".into()))?;
        let total_capacity: usize = buffers.iter().map(|b| b.capacity).sum();
        let mut merged = SampleBuffer::with_clock(
            first.name.clone(),
            total_capacity as i64,
            first.gc_step,
            first.cl,
            first.rciw,
            first.clock.clone(),
        )?;
        merged.base_kb = first.base_kb;

        let mut n = 0u64;
        let mut mean = 0.0f64;
        let mut m2 = 0.0f64;
        let mut sum = 0u64;
        let mut min = u64::MAX;
        let mut max = 0u64;
        let mut sum_allocated_kb = 0u64;
        let mut count = 0usize;

        for buffer in buffers {
            if buffer.count == 0 {
                continue;
            }
            let nb = buffer.count as u64;
            let delta = buffer.mean - mean;
            let new_n = n + nb;
            mean = if n == 0 {
                buffer.mean
            } else {
                mean + delta * nb as f64 / new_n as f64
            };
            m2 = if n == 0 {
                buffer.m2
            } else {
                m2 + buffer.m2 + delta * delta * (n as f64) * (nb as f64) / (new_n as f64)
            };
            n = new_n;
            sum = sum.saturating_add(buffer.sum);
            min = min.min(buffer.min);
            max = max.max(buffer.max);
            sum_allocated_kb = sum_allocated_kb.saturating_add(buffer.sum_allocated_kb);

            for record in &buffer.records[..buffer.count] {
                if count < merged.records.len() {
                    merged.records[count] = *record;
                }
                count += 1;
            }
        }

        merged.count = count;
        merged.sum = sum;
        merged.min = if n == 0 { u64::MAX } else { min };
        merged.max = max;
        merged.mean = mean;
        merged.m2 = m2;
        merged.sum_allocated_kb = sum_allocated_kb;
        Ok(merged)
    }

    /// Columnar snapshot for persistence/test interchange.
    pub fn dump(&self) -> Dump {
        let records = &self.records[..self.count];
        Dump {
            name: self.name.clone(),
            capacity: self.capacity,
            count: self.count,
            gc_step: self.gc_step,
            cl: self.cl,
            rciw: self.rciw,
            base_kb: self.base_kb,
            sum: self.sum,
            min: self.min,
            max: self.max,
            mean: self.mean,
            m2: self.m2,
            time_ns: records.iter().map(|r| r.time_ns).collect(),
            before_kb: records.iter().map(|r| r.before_kb).collect(),
            after_kb: records.iter().map(|r| r.after_kb).collect(),
            allocated_kb: records.iter().map(|r| r.allocated_kb).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::{AllocatorBridge, TuningSnapshot};
    use std::sync::atomic::{AtomicU64, Ordering};

    /// A deterministic clock for tests: each call advances by a fixed step.
    struct StepClock {
        step_ns: u64,
        current: AtomicU64,
    }

    impl StepClock {
        fn new(step_ns: u64) -> Self {
            StepClock {
                step_ns,
                current: AtomicU64::new(0),
            }
        }
    }

    impl Clock for StepClock {
        fn now_ns(&self) -> Result<u64, SamplerError> {
            Ok(self.current.fetch_add(self.step_ns, Ordering::Relaxed))
        }
    }

    /// A no-op allocator bridge with a fixed heap reading, for buffer tests
    /// that don't exercise allocator coordination.
    struct FixedBridge {
        heap_kb: AtomicU64,
    }

    impl FixedBridge {
        fn new(heap_kb: u64) -> Self {
            FixedBridge {
                heap_kb: AtomicU64::new(heap_kb),
            }
        }
    }

    impl AllocatorBridge for FixedBridge {
        fn heap_kb(&self) -> usize {
            self.heap_kb.load(Ordering::Relaxed) as usize
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

    fn filled_buffer(n: usize, step_ns: u64) -> SampleBuffer {
        let clock: Arc<dyn Clock> = Arc::new(StepClock::new(step_ns));
        let bridge = FixedBridge::new(0);
        let mut buf =
            SampleBuffer::with_clock("bench", n as i64, -1, 95.0, 5.0, clock).expect("valid buffer");
        buf.preprocess(&bridge);
        for _ in 0..n {
            buf.init_sample(&bridge).expect("space available");
            buf.update_sample(&bridge).expect("space available");
        }
        buf.postprocess(&bridge);
        buf
    }

    #[test]
    fn new_rejects_non_positive_capacity() {
        assert!(matches!(
            SampleBuffer::new("x", 0, -1, 95.0, 5.0),
            Err(BufferError::InvalidCapacity(0))
        ));
    }

    #[test]
    fn new_rejects_out_of_range_confidence() {
        assert!(matches!(
            SampleBuffer::new("x", 10, -1, 0.0, 5.0),
            Err(BufferError::InvalidConfidenceLevel(_))
        ));
        assert!(matches!(
            SampleBuffer::new("x", 10, -1, 101.0, 5.0),
            Err(BufferError::InvalidConfidenceLevel(_))
        ));
    }

    #[test]
    fn init_sample_fails_with_no_space_when_full() {
        let bridge = FixedBridge::new(0);
        let mut buf = SampleBuffer::new("x", 1, -1, 95.0, 5.0).unwrap();
        buf.preprocess(&bridge);
        buf.init_sample(&bridge).unwrap();
        buf.update_sample(&bridge).unwrap();
        let err = buf.init_sample(&bridge).unwrap_err();
        assert!(matches!(err, SamplerError::Buffer(BufferError::NoSpace(1))));
    }

    #[test]
    fn welford_matches_direct_computation() {
        let buf = filled_buffer(100, 1_000_000);
        let direct_mean: f64 = (0..100u64).map(|i| (i * 1_000_000) as f64).sum::<f64>() / 100.0;
        assert!((buf.mean() - direct_mean).abs() / direct_mean.max(1.0) < 1e-9);
        assert_eq!(buf.count(), 100);
        assert!(buf.min() <= buf.max());
    }

    #[test]
    fn single_sample_has_zero_m2() {
        let buf = filled_buffer(1, 500);
        assert_eq!(buf.count(), 1);
        assert!(buf.variance().is_nan());
    }

    #[test]
    fn identical_samples_have_zero_variance() {
        struct ZeroClock;
        impl Clock for ZeroClock {
            fn now_ns(&self) -> Result<u64, SamplerError> {
                Ok(0)
            }
        }
        let bridge = FixedBridge::new(0);
        let clock: Arc<dyn Clock> = Arc::new(ZeroClock);
        let mut buf = SampleBuffer::with_clock("x", 10, -1, 95.0, 5.0, clock).unwrap();
        buf.preprocess(&bridge);
        for _ in 0..10 {
            buf.init_sample(&bridge).unwrap();
            buf.update_sample(&bridge).unwrap();
        }
        buf.postprocess(&bridge);
        assert_eq!(buf.variance(), 0.0);
        assert_eq!(buf.stddev(), 0.0);
    }

    #[test]
    fn dump_restore_round_trip() {
        let buf = filled_buffer(250, 777);
        let dump = buf.dump();
        let restored = SampleBuffer::restore(dump).unwrap();
        assert_eq!(restored.count(), buf.count());
        assert_eq!(restored.sum, buf.sum);
        assert_eq!(restored.min(), buf.min());
        assert_eq!(restored.max(), buf.max());
        assert!((restored.mean() - buf.mean()).abs() < 1e-6);
        assert!((restored.m2 - buf.m2).abs() < 1e-3);
        assert_eq!(restored.base_kb(), buf.base_kb());
    }

    #[test]
    fn dump_json_round_trip() {
        let buf = filled_buffer(30, 4242);
        let json = buf.dump().to_json().unwrap();
        let restored_dump = Dump::from_json(&json).unwrap();
        let restored = SampleBuffer::restore(restored_dump).unwrap();
        assert_eq!(restored.count(), buf.count());
        assert_eq!(restored.sum, buf.sum);
    }

    #[test]
    fn restore_rejects_mismatched_array_lengths() {
        let mut dump = filled_buffer(10, 1000).dump();
        dump.time_ns.pop();
        assert!(matches!(
            SampleBuffer::restore(dump),
            Err(BufferError::InconsistentDump(_))
        ));
    }

    #[test]
    fn merge_matches_concatenated_welford() {
        let a = filled_buffer(60, 1_000_000);
        let b = filled_buffer(40, 2_000_000);
        let merged = SampleBuffer::merge(&[&a, &b]).unwrap();
        assert_eq!(merged.count(), 100);
        assert_eq!(merged.sum, a.sum + b.sum);
        assert_eq!(merged.min(), a.min().min(b.min()));
        assert_eq!(merged.max(), a.max().max(b.max()));

        let mut all_times: Vec<f64> = Vec::new();
        for r in &a.records[..a.count] {
            all_times.push(r.time_ns as f64);
        }
        for r in &b.records[..b.count] {
            all_times.push(r.time_ns as f64);
        }
        let n = all_times.len() as f64;
        let direct_mean = all_times.iter().sum::<f64>() / n;
        assert!((merged.mean() - direct_mean).abs() / direct_mean.max(1.0) < 1e-9);
    }

    #[test]
    fn grow_preserves_existing_records() {
        let mut buf = filled_buffer(10, 1000);
        let mean_before = buf.mean();
        buf.grow(5);
        assert_eq!(buf.capacity(), 15);
        assert_eq!(buf.count(), 10);
        assert_eq!(buf.mean(), mean_before);
    }

    #[test]
    fn clear_resets_aggregates_but_not_base_kb() {
        let mut buf = filled_buffer(10, 1000);
        buf.clear();
        assert_eq!(buf.count(), 0);
        assert_eq!(buf.min(), u64::MAX);
        assert_eq!(buf.max(), 0);
        assert_eq!(buf.mean(), 0.0);
    }

    #[test]
    fn percentile_interpolates() {
        let buf = filled_buffer(5, 1000);
        let p50 = buf.percentile(50.0);
        assert!(p50 >= buf.min() as f64 && p50 <= buf.max() as f64);
    }

    #[test]
    fn mad_is_nan_below_minimum_sample_size() {
        let buf = filled_buffer(3, 1000);
        assert!(buf.mad().is_nan());
    }

    #[test]
    fn gc_step_triggers_bridge_step() {
        struct CountingBridge {
            heap_kb: AtomicU64,
            steps: AtomicU64,
        }
        impl AllocatorBridge for CountingBridge {
            fn heap_kb(&self) -> usize {
                self.heap_kb.fetch_add(2048, Ordering::Relaxed) as usize
            }
            fn collect_full(&self) {}
            fn stop(&self) {}
            fn restart(&self) {}
            fn step(&self, _kb: i64) {
                self.steps.fetch_add(1, Ordering::Relaxed);
            }
            fn save_tuning(&self) -> TuningSnapshot {
                TuningSnapshot::default()
            }
            fn restore_tuning(&self, _snapshot: TuningSnapshot) {}
        }
        let bridge = CountingBridge {
            heap_kb: AtomicU64::new(0),
            steps: AtomicU64::new(0),
        };
        let clock: Arc<dyn Clock> = Arc::new(StepClock::new(1000));
        let mut buf = SampleBuffer::with_clock("x", 5, 1024, 95.0, 5.0, clock).unwrap();
        buf.preprocess(&bridge);
        for _ in 0..5 {
            buf.init_sample(&bridge).unwrap();
            buf.update_sample(&bridge).unwrap();
        }
        buf.postprocess(&bridge);
        assert!(bridge.steps.load(Ordering::Relaxed) > 0);
        for record in &buf.records[..buf.count] {
            assert!(record.allocated_kb >= 2048);
        }
    }
}
