//! Periodic, change-detecting config reporting.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use adaptpool_core::PoolConfig;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::api::Registry;
use crate::error::RegistryResult;
use crate::service::PoolService;

/// Reports a pool's configuration only when its settings differ from what
/// was last reported for it.
pub struct ReportJob {
    registry: Arc<dyn Registry>,
    service: Arc<PoolService>,
    last_reported: Mutex<HashMap<String, PoolConfig>>,
    reports: AtomicU64,
}

impl ReportJob {
    pub fn new(registry: Arc<dyn Registry>, service: Arc<PoolService>) -> Self {
        Self {
            registry,
            service,
            last_reported: Mutex::new(HashMap::new()),
            reports: AtomicU64::new(0),
        }
    }

    /// Report every pool at once and remember what was sent.
    pub fn report_initial(&self) -> RegistryResult<()> {
        let configs: Vec<PoolConfig> = self
            .service
            .query_all()
            .into_iter()
            .map(|status| status.config)
            .collect();
        self.registry.report_all(self.service.app_name(), &configs)?;

        let mut last = self.last_reported.lock();
        for config in configs {
            last.insert(config.name.clone(), config);
        }
        self.reports.fetch_add(1, Ordering::Relaxed);
        info!(app = %self.service.app_name(), pools = last.len(), "initial configs reported");
        Ok(())
    }

    /// One reporting pass. Returns how many pools were reported.
    ///
    /// A failed report is logged and retried on the next pass.
    pub fn report_once(&self) -> usize {
        let app = self.service.app_name();
        let mut reported = 0;
        for status in self.service.query_all() {
            let current = status.config;
            let unchanged = self
                .last_reported
                .lock()
                .get(&current.name)
                .is_some_and(|last| last.same_settings(&current));
            if unchanged {
                continue;
            }

            match self.registry.report_config(app, &current) {
                Ok(()) => {
                    info!(
                        %app,
                        pool = %current.name,
                        core = current.core_pool_size,
                        max = current.max_pool_size,
                        "config change reported"
                    );
                    self.last_reported.lock().insert(current.name.clone(), current);
                    reported += 1;
                }
                Err(e) => warn!(%app, pool = %current.name, error = %e, "config report failed"),
            }
        }
        if reported > 0 {
            self.reports.fetch_add(reported as u64, Ordering::Relaxed);
        } else {
            debug!(%app, "no config changes to report");
        }
        reported
    }

    /// Total reports sent, counting an initial bulk report as one.
    pub fn reports_sent(&self) -> u64 {
        self.reports.load(Ordering::Relaxed)
    }

    /// Run the reporting loop until shutdown signal.
    pub async fn run(&self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(
            app = %self.service.app_name(),
            interval_ms = interval.as_millis() as u64,
            "config report job started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.report_once();
                }
                _ = shutdown.changed() => {
                    info!("config report job shutting down");
                    // Final pass so the last resize is not lost.
                    self.report_once();
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRegistry;
    use crate::{ConfigCenter, RegistryError};
    use adaptpool_core::WorkerPool;

    fn setup() -> (Arc<InMemoryRegistry>, Arc<PoolService>, ReportJob) {
        let registry = Arc::new(InMemoryRegistry::new());
        let service = Arc::new(PoolService::new("orders"));
        for (name, core, max) in [("io", 2, 4), ("cpu", 1, 2)] {
            let pool = WorkerPool::builder(name, core, max).build().unwrap();
            service.register(Arc::new(pool)).unwrap();
        }
        let job = ReportJob::new(registry.clone(), service.clone());
        (registry, service, job)
    }

    #[test]
    fn reports_only_changed_pools() {
        let (registry, service, job) = setup();
        assert_eq!(job.report_once(), 2);
        assert_eq!(job.report_once(), 0);

        service.pool("io").unwrap().resize(3, 6).unwrap();
        assert_eq!(job.report_once(), 1);
        assert_eq!(job.report_once(), 0);

        let io = registry
            .fetch_configs("orders")
            .unwrap()
            .into_iter()
            .find(|c| c.name == "io")
            .unwrap();
        assert_eq!((io.core_pool_size, io.max_pool_size), (3, 6));
        assert_eq!(job.reports_sent(), 3);
    }

    #[test]
    fn initial_report_seeds_change_detection() {
        let (registry, _service, job) = setup();
        job.report_initial().unwrap();
        assert_eq!(registry.fetch_configs("orders").unwrap().len(), 2);
        assert_eq!(job.report_once(), 0);
    }

    struct FailingRegistry;

    impl Registry for FailingRegistry {
        fn report_all(&self, _app: &str, _configs: &[PoolConfig]) -> RegistryResult<()> {
            Err(RegistryError::Unavailable("down".to_string()))
        }

        fn report_config(&self, _app: &str, _config: &PoolConfig) -> RegistryResult<()> {
            Err(RegistryError::Unavailable("down".to_string()))
        }
    }

    #[test]
    fn failed_reports_are_retried() {
        let service = Arc::new(PoolService::new("orders"));
        let pool = WorkerPool::builder("io", 1, 2).build().unwrap();
        service.register(Arc::new(pool)).unwrap();

        let failing = ReportJob::new(Arc::new(FailingRegistry), service.clone());
        assert!(failing.report_initial().is_err());
        assert_eq!(failing.report_once(), 0);
        assert_eq!(failing.report_once(), 0);
        assert_eq!(failing.reports_sent(), 0);
    }

    #[tokio::test]
    async fn run_loop_reports_and_stops() {
        let (registry, service, job) = setup();
        let job = Arc::new(job);
        let (tx, rx) = tokio::sync::watch::channel(false);

        let handle = {
            let job = job.clone();
            tokio::spawn(async move { job.run(Duration::from_millis(10), rx).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(registry.fetch_configs("orders").unwrap().len(), 2);

        service.pool("cpu").unwrap().resize(2, 3).unwrap();
        tx.send(true).unwrap();
        handle.await.unwrap();

        let cpu = registry
            .fetch_configs("orders")
            .unwrap()
            .into_iter()
            .find(|c| c.name == "cpu")
            .unwrap();
        assert_eq!(cpu.max_pool_size, 3);
    }
}
