//! Seams between the pools of one application and an external
//! configuration store.

use std::sync::Arc;

use adaptpool_core::PoolConfig;

use crate::error::RegistryResult;

/// Receives the configurations pools are actually running with.
pub trait Registry: Send + Sync {
    /// Replace the stored configuration of every listed pool.
    fn report_all(&self, app: &str, configs: &[PoolConfig]) -> RegistryResult<()>;

    fn report_config(&self, app: &str, config: &PoolConfig) -> RegistryResult<()>;
}

/// Source of remote configuration for an application.
pub trait ConfigCenter: Send + Sync {
    fn fetch_configs(&self, app: &str) -> RegistryResult<Vec<PoolConfig>>;

    /// Deliver every future push for `app` to `listener`.
    fn subscribe(&self, app: &str, listener: Arc<dyn ConfigChangeListener>);
}

/// Callback for pushed configurations.
pub trait ConfigChangeListener: Send + Sync {
    fn on_config_change(&self, config: PoolConfig);
}
