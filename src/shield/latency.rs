use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Fixed-size ring of the most recent decision latencies.
///
/// Recording is O(1); quantiles sort a snapshot of the valid prefix on read,
/// which is fine at scrape rates. A filled flag distinguishes the initial
/// partial window from steady state.
pub struct LatencySketch {
    inner: Mutex<Ring>,
    recorded: AtomicU64,
    sum_us: AtomicU64,
}

struct Ring {
    samples: Vec<f64>,
    cursor: usize,
    filled: bool,
}

impl LatencySketch {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Ring {
                samples: vec![0.0; capacity.max(1)],
                cursor: 0,
                filled: false,
            }),
            recorded: AtomicU64::new(0),
            sum_us: AtomicU64::new(0),
        }
    }

    pub fn record(&self, ms: f64) {
        // A poisoned lock means a panic elsewhere. Drop the sample;
        // observability must never take down a request.
        if let Ok(mut ring) = self.inner.lock() {
            let cursor = ring.cursor;
            ring.samples[cursor] = ms;
            ring.cursor = (cursor + 1) % ring.samples.len();
            if ring.cursor == 0 {
                ring.filled = true;
            }
        }
        self.recorded.fetch_add(1, Ordering::Relaxed);
        self.sum_us.fetch_add((ms * 1000.0) as u64, Ordering::Relaxed);
    }

    /// Total samples ever recorded (not just those still in the window).
    pub fn count(&self) -> u64 {
        self.recorded.load(Ordering::Relaxed)
    }

    /// Sum of all recorded samples, milliseconds.
    pub fn sum_ms(&self) -> f64 {
        self.sum_us.load(Ordering::Relaxed) as f64 / 1000.0
    }

    /// Compute the given quantiles (each in `0.0..=1.0`) from one snapshot.
    /// An empty sample yields 0 for every quantile.
    pub fn quantiles(&self, qs: &[f64]) -> Vec<f64> {
        let snapshot = {
            match self.inner.lock() {
                Ok(ring) => {
                    let len = if ring.filled {
                        ring.samples.len()
                    } else {
                        ring.cursor
                    };
                    let mut v = ring.samples[..len].to_vec();
                    v.sort_unstable_by(|a, b| a.total_cmp(b));
                    v
                }
                Err(_) => Vec::new(),
            }
        };

        qs.iter()
            .map(|q| {
                if snapshot.is_empty() {
                    0.0
                } else {
                    let idx = ((snapshot.len() as f64) * q).floor() as usize;
                    snapshot[idx.min(snapshot.len() - 1)]
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_sketch_reports_zero() {
        let sketch = LatencySketch::new(10);
        assert_eq!(sketch.quantiles(&[0.5, 0.95, 0.99]), vec![0.0, 0.0, 0.0]);
        assert_eq!(sketch.count(), 0);
    }

    #[test]
    fn test_partial_window_uses_valid_prefix() {
        let sketch = LatencySketch::new(100);
        for ms in [5.0, 1.0, 3.0] {
            sketch.record(ms);
        }
        let q = sketch.quantiles(&[0.5]);
        assert_eq!(q[0], 3.0);
        assert_eq!(sketch.count(), 3);
    }

    #[test]
    fn test_window_wraps_and_keeps_recent() {
        let sketch = LatencySketch::new(4);
        for ms in [100.0, 100.0, 100.0, 100.0] {
            sketch.record(ms);
        }
        // Overwrite the full window with fast samples.
        for ms in [1.0, 1.0, 1.0, 1.0] {
            sketch.record(ms);
        }
        let q = sketch.quantiles(&[0.99]);
        assert_eq!(q[0], 1.0);
        assert_eq!(sketch.count(), 8);
    }

    #[test]
    fn test_quantile_ordering() {
        let sketch = LatencySketch::new(1000);
        for i in 1..=100 {
            sketch.record(i as f64);
        }
        let q = sketch.quantiles(&[0.5, 0.95, 0.99]);
        assert!(q[0] <= q[1] && q[1] <= q[2]);
        assert!(q[0] >= 45.0 && q[0] <= 55.0);
        assert!(q[2] >= 95.0);
    }
}
