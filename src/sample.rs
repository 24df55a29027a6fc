//! Bounded ring-buffer of timestamped samples with running statistics and
//! an outlier gate (spec §3).
//!
//! Timestamps are caller-supplied monotonic seconds rather than
//! [`std::time::Instant`], so the container stays deterministic and
//! testable without a real clock; drivers feed it `now` from the task pool
//! tick that calls `update_runtime_data`.

/// How many multiples of the average rate of change a new sample may
/// deviate from the running average before it is treated as a suspected
/// outlier. Chosen as a conservative default; drivers needing a different
/// sensitivity wrap their own gate around [`SampleContainer::put_sample`].
const OUTLIER_GATE_K: f64 = 3.0;

/// Floor, in the container's own units per second, under which a lone
/// implied rate of change is never trusted as a genuine excursion. A flat
/// history (`avg_rate_of_change` near zero) would otherwise make the
/// "exceeds `k * avg_rate`" escape hatch vacuous: any spurious jump
/// trivially exceeds a near-zero threshold and gets waved through.
const MIN_EXCURSION_RATE: f64 = 30.0;

/// A single timestamped reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// The reading.
    pub value: f64,
    /// Monotonic timestamp, in seconds, at which the reading was taken.
    pub timestamp_secs: f64,
}

/// A fixed-capacity ring buffer of [`Sample`]s (capacity `N`, `N >= 10` per
/// spec) that tracks running average, variance, standard deviation and
/// average rate of change, and rejects implausible outliers.
pub struct SampleContainer<const N: usize> {
    samples: [Sample; N],
    len: usize,
    head: usize,
}

impl<const N: usize> SampleContainer<N> {
    /// Creates an empty container. Panics if `N < 10`, per spec §3.
    pub fn new() -> Self {
        assert!(N >= 10, "sample container capacity must be at least 10");
        SampleContainer {
            samples: [Sample {
                value: 0.0,
                timestamp_secs: 0.0,
            }; N],
            len: 0,
            head: 0,
        }
    }

    /// Number of samples currently stored.
    pub fn size(&self) -> usize {
        self.len
    }

    fn iter(&self) -> impl Iterator<Item = &Sample> {
        let start = if self.len == N { self.head } else { 0 };
        (0..self.len).map(move |i| &self.samples[(start + i) % N])
    }

    /// The most recently accepted sample, if any.
    pub fn last(&self) -> Option<Sample> {
        if self.len == 0 {
            return None;
        }
        let idx = (self.head + N - 1) % N;
        Some(self.samples[idx])
    }

    /// Arithmetic mean of the stored samples.
    pub fn average(&self) -> Option<f64> {
        if self.len == 0 {
            return None;
        }
        Some(self.iter().map(|s| s.value).sum::<f64>() / self.len as f64)
    }

    /// Unbiased sample variance (denominator `n - 1`); `None` below two
    /// samples.
    pub fn variance(&self) -> Option<f64> {
        if self.len < 2 {
            return None;
        }
        let avg = self.average()?;
        let sum_sq: f64 = self.iter().map(|s| (s.value - avg).powi(2)).sum();
        Some(sum_sq / (self.len as f64 - 1.0))
    }

    /// Standard deviation (`sqrt(variance)`); `None` below two samples.
    pub fn std_variance(&self) -> Option<f64> {
        self.variance().map(f64::sqrt)
    }

    /// Average rate of change between consecutive samples, in units per
    /// second; `None` below two samples.
    pub fn average_rate_of_change(&self) -> Option<f64> {
        if self.len < 2 {
            return None;
        }
        let mut total = 0.0;
        let mut pairs = 0usize;
        let mut prev: Option<Sample> = None;
        for s in self.iter() {
            if let Some(p) = prev {
                let dt = s.timestamp_secs - p.timestamp_secs;
                if dt > 0.0 {
                    total += (s.value - p.value) / dt;
                    pairs += 1;
                }
            }
            prev = Some(*s);
        }
        if pairs == 0 {
            None
        } else {
            Some(total / pairs as f64)
        }
    }

    /// Whether `value` at `timestamp_secs` passes the outlier gate: inside
    /// `avg ± k * avg_rate_of_change` it is always accepted; outside that
    /// band it is accepted only if the rate of change implied by this very
    /// sample itself exceeds `k * avg_rate_of_change` (a genuinely fast
    /// excursion, not sensor noise).
    fn passes_outlier_gate(&self, value: f64, timestamp_secs: f64) -> bool {
        let (Some(avg), Some(avg_rate)) = (self.average(), self.average_rate_of_change()) else {
            return true;
        };
        let band = OUTLIER_GATE_K * avg_rate.abs();
        if (value - avg).abs() <= band {
            return true;
        }
        let Some(last) = self.last() else {
            return true;
        };
        let dt = timestamp_secs - last.timestamp_secs;
        if dt <= 0.0 {
            return false;
        }
        let implied_rate = (value - last.value) / dt;
        let excursion_floor = OUTLIER_GATE_K * avg_rate.abs().max(MIN_EXCURSION_RATE);
        implied_rate.abs() > excursion_floor
    }

    /// Attempts to add a sample, applying the outlier gate. Returns `true`
    /// if the sample was accepted and stored, `false` if it was rejected.
    pub fn put_sample(&mut self, value: f64, timestamp_secs: f64) -> bool {
        if !self.passes_outlier_gate(value, timestamp_secs) {
            return false;
        }
        self.samples[self.head] = Sample {
            value,
            timestamp_secs,
        };
        self.head = (self.head + 1) % N;
        if self.len < N {
            self.len += 1;
        }
        true
    }
}

impl<const N: usize> Default for SampleContainer<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic]
    fn capacity_below_ten_panics() {
        let _c = SampleContainer::<4>::new();
    }

    #[test]
    fn average_is_arithmetic_mean() {
        let mut c = SampleContainer::<10>::new();
        for i in 0..5 {
            assert!(c.put_sample(i as f64, i as f64));
        }
        assert_eq!(c.average(), Some((0 + 1 + 2 + 3 + 4) as f64 / 5.0));
    }

    #[test]
    fn variance_is_unbiased_sample_variance() {
        let mut c = SampleContainer::<10>::new();
        for (i, v) in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0].into_iter().enumerate() {
            c.put_sample(v, i as f64);
        }
        // Known unbiased sample variance of this classic data set is 4.571...
        let variance = c.variance().unwrap();
        assert!((variance - 4.5714285714).abs() < 1e-6);
    }

    #[test]
    fn ring_buffer_evicts_oldest() {
        let mut c = SampleContainer::<10>::new();
        for i in 0..15 {
            c.put_sample(i as f64, i as f64);
        }
        assert_eq!(c.size(), 10);
        // Oldest surviving sample should be value 5 (15 pushed, capacity 10).
        let oldest = c.iter().next().unwrap();
        assert_eq!(oldest.value, 5.0);
    }

    #[test]
    fn rejects_spurious_jump_but_accepts_sustained_trend() {
        let mut c = SampleContainer::<10>::new();
        // Stable baseline around 20.0 with negligible rate of change.
        for i in 0..10 {
            c.put_sample(20.0, i as f64);
        }
        // A single implausible spike: far outside the band, and the
        // implied rate of change doesn't exceed the (near zero) average
        // rate, so it should be rejected.
        assert!(!c.put_sample(90.0, 10.0));
        assert_eq!(c.last().unwrap().value, 20.0);
    }

    #[test]
    fn last_returns_most_recent_accepted_sample() {
        let mut c = SampleContainer::<10>::new();
        c.put_sample(1.0, 0.0);
        c.put_sample(2.0, 1.0);
        assert_eq!(c.last().unwrap().value, 2.0);
    }

    #[test]
    fn empty_container_reports_no_stats() {
        let c = SampleContainer::<10>::new();
        assert_eq!(c.average(), None);
        assert_eq!(c.variance(), None);
        assert_eq!(c.last(), None);
    }
}
