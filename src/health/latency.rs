//! Rolling latency window.
//!
//! Fixed-size ring buffer of recent samples. Recording is lock-free; a
//! percentile query copies the populated slots and sorts them. Reads may
//! race with writes and see a mix of old and new samples, which is fine for
//! ranking purposes.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Latency samples in microseconds, newest overwriting oldest.
#[derive(Debug)]
pub struct LatencyWindow {
    samples: Box<[AtomicU64]>,
    write_index: AtomicUsize,
    count: AtomicUsize,
}

impl LatencyWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let samples = (0..capacity).map(|_| AtomicU64::new(0)).collect::<Vec<_>>();
        Self {
            samples: samples.into_boxed_slice(),
            write_index: AtomicUsize::new(0),
            count: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn record(&self, micros: u64) {
        let capacity = self.samples.len();
        let index = self.write_index.fetch_add(1, Ordering::Relaxed) % capacity;
        // Zero marks an empty slot.
        self.samples[index].store(micros.max(1), Ordering::Relaxed);
        let _ = self
            .count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                (c < capacity).then_some(c + 1)
            });
    }

    /// Nearest-rank percentile in microseconds, `None` without samples.
    pub fn percentile(&self, quantile: f64) -> Option<f64> {
        if !(0.0..=1.0).contains(&quantile) {
            return None;
        }

        let mut sorted: Vec<u64> = self
            .samples
            .iter()
            .map(|slot| slot.load(Ordering::Relaxed))
            .filter(|&v| v > 0)
            .collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_unstable();

        let rank = (quantile * sorted.len() as f64).ceil() as usize;
        let index = rank.clamp(1, sorted.len()) - 1;
        Some(sorted[index] as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_window_has_no_percentile() {
        let window = LatencyWindow::new(8);
        assert!(window.is_empty());
        assert_eq!(window.percentile(0.99), None);
    }

    #[test]
    fn percentile_over_uniform_samples() {
        let window = LatencyWindow::new(100);
        for v in 1..=100 {
            window.record(v);
        }
        assert_eq!(window.percentile(0.5), Some(50.0));
        assert_eq!(window.percentile(0.99), Some(99.0));
        assert_eq!(window.percentile(1.0), Some(100.0));
        assert_eq!(window.percentile(1.5), None);
    }

    #[test]
    fn old_samples_roll_out() {
        let window = LatencyWindow::new(4);
        for _ in 0..4 {
            window.record(10_000);
        }
        for _ in 0..4 {
            window.record(100);
        }
        assert_eq!(window.len(), 4);
        assert_eq!(window.percentile(0.99), Some(100.0));
    }
}
