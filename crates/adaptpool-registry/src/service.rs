//! Named set of pools belonging to one application.

use std::collections::BTreeMap;
use std::sync::Arc;

use adaptpool_core::{AdjustMode, PoolConfig, PoolMetrics, WorkerPool};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::api::ConfigChangeListener;
use crate::error::{RegistryError, RegistryResult};

/// Configuration and metrics of one pool, read at the same moment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStatus {
    pub config: PoolConfig,
    pub metrics: PoolMetrics,
}

/// Query and control surface over every pool of an application.
///
/// Pools are keyed by name and listed in name order.
pub struct PoolService {
    app_name: String,
    pools: RwLock<BTreeMap<String, Arc<WorkerPool>>>,
}

impl PoolService {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            pools: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// Add a pool. Names are unique within the service.
    pub fn register(&self, pool: Arc<WorkerPool>) -> RegistryResult<()> {
        let name = pool.name().to_string();
        let mut pools = self.pools.write();
        if pools.contains_key(&name) {
            return Err(RegistryError::DuplicatePool(name));
        }
        pools.insert(name.clone(), pool);
        info!(app = %self.app_name, pool = %name, "pool registered");
        Ok(())
    }

    /// Registered pool by name.
    pub fn pool(&self, name: &str) -> Option<Arc<WorkerPool>> {
        self.pools.read().get(name).cloned()
    }

    /// Registered pool names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.pools.read().keys().cloned().collect()
    }

    /// Config and metrics of every registered pool.
    pub fn query_all(&self) -> Vec<PoolStatus> {
        self.snapshot().iter().map(|pool| status_of(pool)).collect()
    }

    /// Config and metrics of one pool.
    pub fn query(&self, name: &str) -> Option<PoolStatus> {
        self.pool(name).map(|pool| status_of(&pool))
    }

    /// Metrics snapshot of one pool.
    pub fn collect_metrics(&self, name: &str) -> Option<PoolMetrics> {
        self.pool(name).map(|pool| pool.metrics())
    }

    /// Apply a pushed configuration to the pool it names.
    pub fn update_config(&self, config: &PoolConfig) -> RegistryResult<()> {
        let Some(pool) = self.pool(&config.name) else {
            warn!(app = %self.app_name, pool = %config.name, "config push for unknown pool");
            return Err(RegistryError::UnknownPool(config.name.clone()));
        };
        pool.apply_config(config)?;
        Ok(())
    }

    /// Switch one pool between manual and auto.
    pub fn set_adjust_mode(&self, name: &str, mode: AdjustMode) -> RegistryResult<()> {
        let pool = self
            .pool(name)
            .ok_or_else(|| RegistryError::UnknownPool(name.to_string()))?;
        pool.set_adjust_mode(mode);
        info!(app = %self.app_name, pool = %name, %mode, "adjust mode changed");
        Ok(())
    }

    fn snapshot(&self) -> Vec<Arc<WorkerPool>> {
        self.pools.read().values().cloned().collect()
    }
}

fn status_of(pool: &WorkerPool) -> PoolStatus {
    PoolStatus {
        config: pool.config(),
        metrics: pool.metrics(),
    }
}

impl ConfigChangeListener for PoolService {
    fn on_config_change(&self, config: PoolConfig) {
        debug!(
            app = %self.app_name,
            pool = %config.name,
            core = config.core_pool_size,
            max = config.max_pool_size,
            "config change received"
        );
        // Rejections are already logged by the pool or by update_config.
        let _ = self.update_config(&config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> PoolService {
        let service = PoolService::new("orders");
        for (name, core, max) in [("io", 2, 4), ("cpu", 1, 2)] {
            let pool = WorkerPool::builder(name, core, max).build().unwrap();
            service.register(Arc::new(pool)).unwrap();
        }
        service
    }

    #[test]
    fn register_rejects_duplicate_names() {
        let service = service();
        let again = WorkerPool::builder("io", 1, 1).build().unwrap();
        let err = service.register(Arc::new(again)).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicatePool(name) if name == "io"));
        assert_eq!(service.names(), vec!["cpu".to_string(), "io".to_string()]);
    }

    #[test]
    fn query_reports_config_and_metrics() {
        let service = service();
        let all = service.query_all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].config.name, "cpu");

        let io = service.query("io").unwrap();
        assert_eq!(io.config.core_pool_size, 2);
        assert_eq!(io.metrics.max_pool_size, 4);
        assert!(service.query("missing").is_none());
        assert_eq!(service.collect_metrics("cpu").unwrap().core_pool_size, 1);
    }

    #[test]
    fn update_config_resizes_named_pool() {
        let service = service();
        let mut config = PoolConfig::new("io", 6, 8);
        config.rejection_policy = "CallerRunsPolicy".to_string();
        service.update_config(&config).unwrap();

        let io = service.query("io").unwrap().config;
        assert_eq!((io.core_pool_size, io.max_pool_size), (6, 8));
        assert_eq!(io.rejection_policy, "CallerRunsPolicy");
    }

    #[test]
    fn invalid_push_leaves_pool_unchanged() {
        let service = service();
        service.on_config_change(PoolConfig::new("io", 5, 3));
        service.on_config_change(PoolConfig::new("io", 0, 3));
        let io = service.query("io").unwrap().config;
        assert_eq!((io.core_pool_size, io.max_pool_size), (2, 4));
    }

    #[test]
    fn unknown_pool_is_an_error() {
        let service = service();
        let err = service.update_config(&PoolConfig::new("ghost", 1, 1)).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownPool(_)));
        assert!(service.set_adjust_mode("ghost", AdjustMode::Auto).is_err());
    }

    #[test]
    fn set_adjust_mode_switches_pool() {
        let service = service();
        service.set_adjust_mode("cpu", AdjustMode::Auto).unwrap();
        assert_eq!(service.pool("cpu").unwrap().adjust_mode(), AdjustMode::Auto);
        assert_eq!(service.pool("io").unwrap().adjust_mode(), AdjustMode::Manual);
    }
}
