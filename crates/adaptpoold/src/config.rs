//! adaptpool.toml configuration.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use adaptpool_core::{AdjustMode, AutoAdjustConfig, PoolConfig, WorkerPool};
use adaptpool_registry::InMemoryRegistry;
use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub app_name: String,
    #[serde(default = "default_sampler_interval_ms")]
    pub sampler_interval_ms: u64,
    #[serde(default = "default_report_interval_secs")]
    pub report_interval_secs: u64,
    #[serde(default)]
    pub auto_adjust: AutoAdjustConfig,
    #[serde(default)]
    pub pools: Vec<PoolSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSpec {
    pub name: String,
    pub core: usize,
    pub max: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default)]
    pub allow_core_timeout: bool,
    #[serde(default = "default_rejection_policy")]
    pub rejection_policy: String,
    #[serde(default)]
    pub adjust_mode: AdjustMode,
}

fn default_sampler_interval_ms() -> u64 {
    1000
}

fn default_report_interval_secs() -> u64 {
    5
}

fn default_queue_capacity() -> usize {
    100
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_rejection_policy() -> String {
    "AbortPolicy".to_string()
}

impl DaemonConfig {
    /// Read, parse and validate a config file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: DaemonConfig =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// A starting config with one pool per adjust mode.
    pub fn scaffold(app_name: &str) -> Self {
        DaemonConfig {
            app_name: app_name.to_string(),
            sampler_interval_ms: default_sampler_interval_ms(),
            report_interval_secs: default_report_interval_secs(),
            auto_adjust: AutoAdjustConfig::default(),
            pools: vec![
                PoolSpec {
                    name: "io".to_string(),
                    core: 4,
                    max: 8,
                    queue_capacity: 200,
                    keep_alive_secs: 60,
                    allow_core_timeout: false,
                    rejection_policy: "CallerRunsPolicy".to_string(),
                    adjust_mode: AdjustMode::Auto,
                },
                PoolSpec {
                    name: "cpu".to_string(),
                    core: 2,
                    max: 4,
                    queue_capacity: default_queue_capacity(),
                    keep_alive_secs: 30,
                    allow_core_timeout: false,
                    rejection_policy: default_rejection_policy(),
                    adjust_mode: AdjustMode::Manual,
                },
            ],
        }
    }

    /// Reject empty names, zero intervals, duplicate pools and pool
    /// bounds the core types would refuse.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.app_name.trim().is_empty() {
            bail!("app_name must not be empty");
        }
        if self.sampler_interval_ms == 0 {
            bail!("sampler_interval_ms must be positive");
        }
        if self.report_interval_secs == 0 {
            bail!("report_interval_secs must be positive");
        }
        self.auto_adjust.validate().context("invalid [auto_adjust]")?;

        let mut seen = HashSet::new();
        for pool in &self.pools {
            if !seen.insert(pool.name.as_str()) {
                bail!("duplicate pool name: {}", pool.name);
            }
            if pool.queue_capacity == 0 {
                bail!("pool {}: queue_capacity must be positive", pool.name);
            }
            pool.to_pool_config()
                .validate()
                .with_context(|| format!("pool {}", pool.name))?;
        }
        Ok(())
    }

    /// Push every `[[pools]]` entry through the registry's change channel.
    ///
    /// Returns the total number of deliveries across all pools.
    pub fn publish_pool_specs(&self, registry: &InMemoryRegistry) -> anyhow::Result<usize> {
        let mut delivered = 0;
        for spec in &self.pools {
            delivered += registry
                .publish(&self.app_name, &spec.to_pool_config())
                .with_context(|| format!("publishing pool {}", spec.name))?;
        }
        Ok(delivered)
    }

    pub fn sampler_interval(&self) -> Duration {
        Duration::from_millis(self.sampler_interval_ms)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }
}

impl PoolSpec {
    pub fn to_pool_config(&self) -> PoolConfig {
        let mut config = PoolConfig::new(self.name.clone(), self.core, self.max);
        config.keep_alive_secs = self.keep_alive_secs;
        config.allow_core_timeout = self.allow_core_timeout;
        config.rejection_policy = self.rejection_policy.clone();
        config.adjust_mode = self.adjust_mode;
        config
    }

    /// Build the pool this entry describes.
    pub fn build_pool(&self) -> anyhow::Result<WorkerPool> {
        WorkerPool::from_config(&self.to_pool_config(), self.queue_capacity)
            .with_context(|| format!("building pool {}", self.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn scaffold_round_trips_through_toml() {
        let config = DaemonConfig::scaffold("orders");
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("app_name = \"orders\""));
        assert!(toml_str.contains("[[pools]]"));
        assert!(toml_str.contains("[auto_adjust]"));

        let parsed: DaemonConfig = toml::from_str(&toml_str).unwrap();
        parsed.validate().unwrap();
        assert_eq!(parsed.pools.len(), 2);
        assert_eq!(parsed.pools[0].adjust_mode, AdjustMode::Auto);
    }

    #[test]
    fn parse_minimal_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
app_name = "orders"

[auto_adjust]
adjust_interval_ms = 2000

[[pools]]
name = "io"
core = 2
max = 4
adjust_mode = "auto"
"#
        )
        .unwrap();

        let config = DaemonConfig::from_file(file.path()).unwrap();
        assert_eq!(config.sampler_interval_ms, 1000);
        assert_eq!(config.auto_adjust.adjust_interval_ms, 2000);
        assert_eq!(config.auto_adjust.queue_full_threshold, 0.8);
        let pool = &config.pools[0];
        assert_eq!(pool.queue_capacity, 100);
        assert_eq!(pool.rejection_policy, "AbortPolicy");

        let built = pool.build_pool().unwrap();
        assert_eq!(built.adjust_mode(), AdjustMode::Auto);
        assert_eq!(built.queue_capacity(), 100);
    }

    #[test]
    fn rejects_bad_pools() {
        let mut config = DaemonConfig::scaffold("orders");
        config.pools[1].name = "io".to_string();
        assert!(config.validate().is_err());

        let mut config = DaemonConfig::scaffold("orders");
        config.pools[0].core = 10;
        assert!(config.validate().is_err());

        let mut config = DaemonConfig::scaffold("orders");
        config.auto_adjust.shrink_factor = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn published_specs_reach_registered_pools() {
        use adaptpool_registry::{ConfigCenter, PoolService};
        use std::sync::Arc;

        let mut config = DaemonConfig::scaffold("orders");
        let service = Arc::new(PoolService::new("orders"));
        for spec in &config.pools {
            service.register(Arc::new(spec.build_pool().unwrap())).unwrap();
        }
        let registry = InMemoryRegistry::new();
        assert_eq!(config.publish_pool_specs(&registry).unwrap(), 0);

        registry.subscribe("orders", service.clone());
        config.pools[0].core = 6;
        config.pools[1].max = 6;
        assert_eq!(config.publish_pool_specs(&registry).unwrap(), 2);

        let io = service.query("io").unwrap();
        assert_eq!(io.metrics.core_pool_size, 6);
        assert_eq!(io.metrics.max_pool_size, 8);
        assert_eq!(service.query("cpu").unwrap().metrics.max_pool_size, 6);
        for pool in service.names() {
            service.pool(&pool).unwrap().shutdown();
        }
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DaemonConfig::from_file(&dir.path().join("absent.toml")).is_err());
    }
}
