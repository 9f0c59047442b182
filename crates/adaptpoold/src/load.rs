//! Synthetic bursty load for watching pools tune themselves.
//!
//! Alternates quiet and burst phases. Tasks are blocking sleeps of a few
//! milliseconds, so queue wait rises in a burst and drains in the quiet
//! phase that follows.

use std::sync::Arc;
use std::time::Duration;

use adaptpool_autoscale::AdaptivePool;
use adaptpool_core::PoolError;
use tokio::sync::watch;
use tracing::{debug, info};

const TICK: Duration = Duration::from_millis(100);

/// Shape of the generated load.
#[derive(Debug, Clone, Copy)]
pub struct LoadProfile {
    /// Tasks per pool per tick in the quiet phase.
    pub base_rate: usize,
    /// Multiplier applied during a burst.
    pub burst_multiplier: usize,
    /// Ticks per phase.
    pub phase_ticks: u64,
    pub min_task: Duration,
    pub max_task: Duration,
}

impl Default for LoadProfile {
    fn default() -> Self {
        Self {
            base_rate: 2,
            burst_multiplier: 20,
            phase_ticks: 50,
            min_task: Duration::from_millis(5),
            max_task: Duration::from_millis(40),
        }
    }
}

impl LoadProfile {
    fn is_burst(&self, tick: u64) -> bool {
        (tick / self.phase_ticks.max(1)) % 2 == 1
    }

    fn tasks_for(&self, tick: u64) -> usize {
        if self.is_burst(tick) {
            self.base_rate * self.burst_multiplier
        } else {
            self.base_rate
        }
    }

    /// Task length spread evenly between the bounds by sequence number.
    fn task_duration(&self, seq: u64) -> Duration {
        let span = self.max_task.saturating_sub(self.min_task).as_millis() as u64;
        if span == 0 {
            return self.min_task;
        }
        self.min_task + Duration::from_millis(seq.wrapping_mul(7919) % (span + 1))
    }
}

/// Submission counts for one run of the generator.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadStats {
    pub submitted: u64,
    pub rejected: u64,
}

fn submit_batch(pool: &AdaptivePool, profile: &LoadProfile, count: usize, seq: u64) -> LoadStats {
    let mut stats = LoadStats::default();
    for i in 0..count as u64 {
        let work = profile.task_duration(seq + i);
        match pool.execute(move || std::thread::sleep(work)) {
            Ok(()) => stats.submitted += 1,
            Err(PoolError::Shutdown) => break,
            Err(e) => {
                debug!(pool = %pool.name(), error = %e, "synthetic task rejected");
                stats.rejected += 1;
            }
        }
    }
    stats
}

/// Drive every pool until shutdown signal.
pub async fn drive(
    pools: Vec<Arc<AdaptivePool>>,
    profile: LoadProfile,
    mut shutdown: watch::Receiver<bool>,
) -> LoadStats {
    info!(pools = pools.len(), ?profile, "synthetic load started");
    let mut totals = LoadStats::default();
    let mut tick: u64 = 0;
    let mut seq: u64 = 0;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(TICK) => {
                let count = profile.tasks_for(tick);
                if tick % profile.phase_ticks.max(1) == 0 {
                    info!(burst = profile.is_burst(tick), tasks_per_tick = count, "load phase change");
                }
                // Submission can run the task on the caller, keep it off the runtime.
                let batch = pools.clone();
                let stats = tokio::task::spawn_blocking(move || {
                    let mut stats = LoadStats::default();
                    for pool in &batch {
                        let s = submit_batch(pool, &profile, count, seq);
                        stats.submitted += s.submitted;
                        stats.rejected += s.rejected;
                    }
                    stats
                })
                .await
                .unwrap_or_default();
                totals.submitted += stats.submitted;
                totals.rejected += stats.rejected;
                seq = seq.wrapping_add(count as u64);
                tick += 1;
            }
            _ = shutdown.changed() => {
                info!(submitted = totals.submitted, rejected = totals.rejected, "synthetic load shutting down");
                break;
            }
        }
    }
    totals
}

#[cfg(test)]
mod tests {
    use super::*;
    use adaptpool_core::{AutoAdjustConfig, WorkerPool};
    use adaptpool_sysmetrics::{ManualSampleSource, SystemSample};

    #[test]
    fn phases_alternate() {
        let profile = LoadProfile {
            phase_ticks: 3,
            ..Default::default()
        };
        let rates: Vec<usize> = (0..9).map(|t| profile.tasks_for(t)).collect();
        assert_eq!(rates, vec![2, 2, 2, 40, 40, 40, 2, 2, 2]);
    }

    #[test]
    fn task_durations_stay_in_bounds() {
        let profile = LoadProfile::default();
        for seq in 0..500 {
            let d = profile.task_duration(seq);
            assert!(d >= profile.min_task && d <= profile.max_task);
        }
        let flat = LoadProfile {
            max_task: Duration::from_millis(5),
            ..Default::default()
        };
        assert_eq!(flat.task_duration(42), Duration::from_millis(5));
    }

    #[tokio::test]
    async fn drive_submits_until_shutdown() {
        let pool = WorkerPool::builder("load", 2, 4)
            .queue_capacity(1000)
            .build()
            .unwrap();
        let samples = Arc::new(ManualSampleSource::new());
        samples.set(SystemSample::basic(0.1, 0.1));
        let adaptive = Arc::new(AdaptivePool::new(pool, samples, AutoAdjustConfig::default()).unwrap());

        let profile = LoadProfile {
            base_rate: 3,
            min_task: Duration::from_millis(1),
            max_task: Duration::from_millis(2),
            ..Default::default()
        };
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(drive(vec![adaptive.clone()], profile, rx));
        tokio::time::sleep(Duration::from_millis(350)).await;
        tx.send(true).unwrap();

        let stats = handle.await.unwrap();
        assert!(stats.submitted >= 3);
        assert_eq!(stats.rejected, 0);
        adaptive.shutdown();
    }
}
