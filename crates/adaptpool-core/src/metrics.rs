//! Smoothed timing signals and immutable pool snapshots.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Smoothing constant for task and queue-wait averages.
///
/// Weights the newest sample by 0.3; history decays by 0.7 per update.
pub const ALPHA: f64 = 0.3;

/// Exponentially weighted moving average shared by many writers.
///
/// The value lives in an `AtomicU64` as raw f64 bits and every update is a
/// compare-and-swap loop, so concurrent writers never tear the value. When
/// two workers race, one of the updates is folded in after the other.
#[derive(Debug)]
pub struct Ewma {
    bits: AtomicU64,
    alpha: f64,
}

impl Ewma {
    pub fn new(alpha: f64) -> Self {
        Self {
            bits: AtomicU64::new(0f64.to_bits()),
            alpha,
        }
    }

    /// Fold `sample` into the average and return the new value.
    pub fn update(&self, sample: f64) -> f64 {
        let alpha = self.alpha;
        let blend = |prev: f64| alpha * sample + (1.0 - alpha) * prev;
        // The closure never returns None, so the Err arm is unreachable in practice.
        let prev = match self.bits.fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
            Some(blend(f64::from_bits(bits)).to_bits())
        }) {
            Ok(bits) | Err(bits) => bits,
        };
        blend(f64::from_bits(prev))
    }

    pub fn value(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }
}

impl Default for Ewma {
    fn default() -> Self {
        Self::new(ALPHA)
    }
}

/// Thread and queue bounds of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolBounds {
    pub core_pool_size: usize,
    pub max_pool_size: usize,
    pub queue_capacity: usize,
}

/// Point-in-time view of a pool. Built on demand, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolMetrics {
    pub core_pool_size: usize,
    pub max_pool_size: usize,
    /// Tasks currently running, tracked by the pre/post-task hooks.
    pub active_count: usize,
    /// Live worker threads.
    pub pool_size: usize,
    pub queue_size: usize,
    pub remaining_capacity: usize,
    pub queue_capacity: usize,
    pub largest_pool_size: usize,
    pub completed_task_count: u64,
    pub rejected_count: u64,
    pub ewma_task_time_ms: f64,
    pub ewma_queue_wait_ms: f64,
}

impl PoolMetrics {
    /// Fraction of the queue capacity in use.
    pub fn queue_usage(&self) -> f64 {
        if self.queue_capacity == 0 {
            0.0
        } else {
            self.queue_size as f64 / self.queue_capacity as f64
        }
    }

    pub fn bounds(&self) -> PoolBounds {
        PoolBounds {
            core_pool_size: self.core_pool_size,
            max_pool_size: self.max_pool_size,
            queue_capacity: self.queue_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn starts_at_zero() {
        assert_eq!(Ewma::default().value(), 0.0);
    }

    #[test]
    fn single_update_weights_by_alpha() {
        let ewma = Ewma::default();
        let v = ewma.update(100.0);
        assert!((v - 30.0).abs() < 1e-9);
        assert!((ewma.value() - 30.0).abs() < 1e-9);
    }

    #[test]
    fn converges_on_constant_input() {
        let ewma = Ewma::default();
        for _ in 0..10 {
            ewma.update(100.0);
        }
        let v = ewma.value();
        assert!((v - 100.0).abs() / 100.0 < 0.03, "ewma was {v}");
    }

    #[test]
    fn concurrent_updates_stay_in_range() {
        let ewma = Arc::new(Ewma::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ewma = ewma.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        ewma.update(50.0);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let v = ewma.value();
        assert!((v - 50.0).abs() < 1e-6, "ewma was {v}");
    }

    #[test]
    fn queue_usage_fraction() {
        let m = PoolMetrics {
            core_pool_size: 2,
            max_pool_size: 4,
            active_count: 0,
            pool_size: 0,
            queue_size: 6,
            remaining_capacity: 14,
            queue_capacity: 20,
            largest_pool_size: 0,
            completed_task_count: 0,
            rejected_count: 0,
            ewma_task_time_ms: 0.0,
            ewma_queue_wait_ms: 0.0,
        };
        assert!((m.queue_usage() - 0.3).abs() < 1e-9);
        assert_eq!(m.bounds().queue_capacity, 20);
    }
}
