//! A worker pool with its adjustment engine attached.

use std::sync::Arc;

use adaptpool_core::{
    AdjustMode, AutoAdjustConfig, CompletionHook, PoolResult, TaskHandle, WorkerPool,
};
use adaptpool_sysmetrics::SampleSource;
use tracing::info;

use crate::engine::AdjustmentEngine;

/// Owns a [`WorkerPool`] and the [`AdjustmentEngine`] that tunes it.
///
/// The pool holds the engine only weakly through its completion hook, so
/// dropping the `AdaptivePool` releases both.
pub struct AdaptivePool {
    pool: Arc<WorkerPool>,
    engine: Arc<AdjustmentEngine>,
}

impl AdaptivePool {
    /// Attach an engine fed by `samples` and register it as the pool's
    /// completion hook. The engine shares the pool's clock.
    pub fn new(
        pool: WorkerPool,
        samples: Arc<dyn SampleSource>,
        config: AutoAdjustConfig,
    ) -> PoolResult<Self> {
        let pool = Arc::new(pool);
        let clock = pool.clock().clone();
        let engine = Arc::new(AdjustmentEngine::new(pool.clone(), samples, config, clock)?);

        let hook: Arc<dyn CompletionHook> = engine.clone();
        pool.set_completion_hook(Arc::downgrade(&hook));
        info!(pool = %pool.name(), mode = %pool.adjust_mode(), "adaptive pool ready");

        Ok(Self { pool, engine })
    }

    pub fn name(&self) -> &str {
        self.pool.name()
    }

    /// The wrapped pool.
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Engine that resizes the wrapped pool.
    pub fn engine(&self) -> &Arc<AdjustmentEngine> {
        &self.engine
    }

    /// Submit a task to the wrapped pool.
    pub fn execute<F>(&self, f: F) -> PoolResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool.execute(f)
    }

    /// Submit a task and get a handle to its result.
    pub fn submit<F, R>(&self, f: F) -> PoolResult<TaskHandle<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.pool.submit(f)
    }

    /// Switch the wrapped pool between manual and auto.
    pub fn set_adjust_mode(&self, mode: AdjustMode) {
        self.pool.set_adjust_mode(mode);
    }

    /// Stop admission and detach the engine.
    pub fn shutdown(&self) {
        self.pool.clear_completion_hook();
        self.pool.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adaptpool_core::ManualClock;
    use adaptpool_sysmetrics::{ManualSampleSource, SystemSample};
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    #[test]
    fn auto_mode_completion_grows_pool() {
        let clock = Arc::new(ManualClock::new());
        let pool = WorkerPool::builder("adaptive", 1, 2)
            .queue_capacity(10)
            .adjust_mode(AdjustMode::Auto)
            .clock(clock.clone())
            .build()
            .unwrap();
        let samples = Arc::new(ManualSampleSource::new());
        samples.set(SystemSample::basic(0.2, 0.3));
        let adaptive = AdaptivePool::new(pool, samples, AutoAdjustConfig::default()).unwrap();

        // Park the only core worker, fill the queue past 80%.
        let (release, gate) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel::<()>();
        adaptive
            .execute(move || {
                started_tx.send(()).unwrap();
                let _ = gate.recv();
            })
            .unwrap();
        started_rx.recv().unwrap();
        for _ in 0..9 {
            adaptive.execute(|| {}).unwrap();
        }

        drop(release);
        let deadline = Instant::now() + Duration::from_secs(5);
        while adaptive.engine().adjustments() == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(adaptive.engine().adjustments(), 1);
        let m = adaptive.pool().metrics();
        assert!(m.max_pool_size > 2);
        assert!(m.core_pool_size <= m.max_pool_size);
        adaptive.shutdown();
    }

    #[test]
    fn manual_mode_never_adjusts() {
        let pool = WorkerPool::builder("manual", 1, 2)
            .queue_capacity(2)
            .build()
            .unwrap();
        let samples = Arc::new(ManualSampleSource::new());
        samples.set(SystemSample::basic(0.2, 0.3));
        let adaptive = AdaptivePool::new(pool, samples, AutoAdjustConfig::default()).unwrap();
        for _ in 0..20 {
            let _ = adaptive.execute(|| std::thread::sleep(Duration::from_millis(1)));
        }
        adaptive.shutdown();
        assert!(adaptive.pool().await_termination(Duration::from_secs(5)));
        assert_eq!(adaptive.engine().cycles(), 0);
    }

    #[test]
    fn submit_through_adaptive_pool() {
        let pool = WorkerPool::builder("results", 1, 2)
            .adjust_mode(AdjustMode::Auto)
            .build()
            .unwrap();
        let samples = Arc::new(ManualSampleSource::new());
        samples.set(SystemSample::basic(0.2, 0.3));
        let adaptive = AdaptivePool::new(pool, samples, AutoAdjustConfig::default()).unwrap();

        let handle = adaptive.submit(|| 2 + 2).unwrap();
        assert_eq!(handle.join(), Ok(4));
        adaptive.shutdown();
    }
}
