//! Pool configuration records and self-tuning parameters.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PoolError, PoolResult};

/// Whether a pool tunes itself after each completed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdjustMode {
    /// Run an adjustment attempt after every task completion.
    Auto,
    /// Only registry pushes and explicit calls change the pool.
    #[default]
    Manual,
}

impl AdjustMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustMode::Auto => "auto",
            AdjustMode::Manual => "manual",
        }
    }
}

impl fmt::Display for AdjustMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdjustMode {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(AdjustMode::Auto),
            "manual" => Ok(AdjustMode::Manual),
            other => Err(PoolError::invalid(format!("unknown adjust mode: {other}"))),
        }
    }
}

/// Externally visible configuration of one named pool.
///
/// Identity is the pool name: two records with the same name compare equal
/// whatever their settings. Use [`PoolConfig::same_settings`] to compare
/// contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub name: String,
    pub core_pool_size: usize,
    pub max_pool_size: usize,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default)]
    pub allow_core_timeout: bool,
    #[serde(default = "default_queue_type")]
    pub queue_type: String,
    #[serde(default = "default_rejection_policy")]
    pub rejection_policy: String,
    #[serde(default)]
    pub adjust_mode: AdjustMode,
    /// Epoch milliseconds of the last change.
    #[serde(default)]
    pub last_update_time: u64,
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_queue_type() -> String {
    "ResizableBoundedQueue".to_string()
}

fn default_rejection_policy() -> String {
    "AbortPolicy".to_string()
}

impl PoolConfig {
    /// Minimal record with default keep-alive, queue type and policy.
    pub fn new(name: impl Into<String>, core_pool_size: usize, max_pool_size: usize) -> Self {
        Self {
            name: name.into(),
            core_pool_size,
            max_pool_size,
            keep_alive_secs: default_keep_alive_secs(),
            allow_core_timeout: false,
            queue_type: default_queue_type(),
            rejection_policy: default_rejection_policy(),
            adjust_mode: AdjustMode::Manual,
            last_update_time: 0,
        }
    }

    /// Check the thread bounds a push is allowed to carry.
    pub fn validate(&self) -> PoolResult<()> {
        if self.core_pool_size == 0 {
            return Err(PoolError::invalid("core_pool_size must be positive"));
        }
        if self.max_pool_size == 0 {
            return Err(PoolError::invalid("max_pool_size must be positive"));
        }
        if self.core_pool_size > self.max_pool_size {
            return Err(PoolError::invalid(format!(
                "core_pool_size {} exceeds max_pool_size {}",
                self.core_pool_size, self.max_pool_size
            )));
        }
        Ok(())
    }

    /// Field-by-field comparison, ignoring `last_update_time`.
    pub fn same_settings(&self, other: &PoolConfig) -> bool {
        self.name == other.name
            && self.core_pool_size == other.core_pool_size
            && self.max_pool_size == other.max_pool_size
            && self.keep_alive_secs == other.keep_alive_secs
            && self.allow_core_timeout == other.allow_core_timeout
            && self.queue_type == other.queue_type
            && self.rejection_policy == other.rejection_policy
            && self.adjust_mode == other.adjust_mode
    }
}

impl PartialEq for PoolConfig {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for PoolConfig {}

impl Hash for PoolConfig {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

/// Tunables of the self-tuning loop.
///
/// Swapped as a whole; a cycle reads one consistent copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoAdjustConfig {
    /// Minimum interval between two applied adjustments.
    pub adjust_interval_ms: u64,

    /// Smoothed queue wait above which the pool counts as congested.
    pub queue_wait_threshold_ms: f64,
    /// Queue occupancy above which the pool counts as congested.
    pub queue_full_threshold: f64,
    /// Queue occupancy that must not be reached for a shrink.
    pub queue_shrink_threshold: f64,
    /// Active threads at or above this share of max select `ExpandMax`.
    pub expand_active_ratio: f64,

    /// Host CPU usage below which the system counts as idle.
    pub idle_cpu_threshold: f64,
    /// Active threads below this share of core count as idle for the
    /// system-idle shrink.
    pub idle_active_ratio: f64,
    /// Consecutive idle observations needed before a queue-idle shrink.
    pub idle_checks_threshold: u32,

    /// Expansion is suppressed at or above this host CPU usage.
    pub max_cpu_usage: f64,
    /// Expansion is suppressed at or above this host memory usage.
    pub max_memory_usage: f64,

    pub core_pool_step: usize,
    pub max_pool_step: usize,
    pub queue_step: usize,

    /// Ceilings expansion never crosses.
    pub max_core_pool_size: usize,
    pub max_maximum_pool_size: usize,
    pub max_queue_capacity: usize,

    /// Upper bound of the doubling growth factor.
    pub slow_start_ceiling: usize,
    /// Multiplicative decrease applied on shrink.
    pub shrink_factor: f64,

    /// Require a host sample before deciding anything.
    pub use_system_metrics: bool,
    pub allow_shrink: bool,
    /// Grow the queue together with the thread bounds.
    pub expand_queue: bool,
    /// Let the system-idle shrink run while the cooldown is still active.
    pub idle_shrink_bypasses_cooldown: bool,
}

impl Default for AutoAdjustConfig {
    fn default() -> Self {
        Self {
            adjust_interval_ms: 10_000,
            queue_wait_threshold_ms: 1000.0,
            queue_full_threshold: 0.8,
            queue_shrink_threshold: 0.4,
            expand_active_ratio: 0.9,
            idle_cpu_threshold: 0.3,
            idle_active_ratio: 0.3,
            idle_checks_threshold: 3,
            max_cpu_usage: 0.8,
            max_memory_usage: 0.8,
            core_pool_step: 1,
            max_pool_step: 2,
            queue_step: 10,
            max_core_pool_size: 50,
            max_maximum_pool_size: 100,
            max_queue_capacity: 1000,
            slow_start_ceiling: 8,
            shrink_factor: 0.5,
            use_system_metrics: true,
            allow_shrink: true,
            expand_queue: false,
            idle_shrink_bypasses_cooldown: false,
        }
    }
}

impl AutoAdjustConfig {
    pub fn validate(&self) -> PoolResult<()> {
        let fractions = [
            ("queue_full_threshold", self.queue_full_threshold),
            ("queue_shrink_threshold", self.queue_shrink_threshold),
            ("expand_active_ratio", self.expand_active_ratio),
            ("idle_cpu_threshold", self.idle_cpu_threshold),
            ("idle_active_ratio", self.idle_active_ratio),
            ("max_cpu_usage", self.max_cpu_usage),
            ("max_memory_usage", self.max_memory_usage),
        ];
        for (field, value) in fractions {
            if !(value > 0.0 && value <= 1.0) {
                return Err(PoolError::invalid(format!("{field} must be in (0, 1], got {value}")));
            }
        }
        if self.queue_shrink_threshold >= self.queue_full_threshold {
            return Err(PoolError::invalid(
                "queue_shrink_threshold must be below queue_full_threshold",
            ));
        }
        if !(self.shrink_factor > 0.0 && self.shrink_factor < 1.0) {
            return Err(PoolError::invalid(format!(
                "shrink_factor must be in (0, 1), got {}",
                self.shrink_factor
            )));
        }
        if self.core_pool_step == 0 || self.max_pool_step == 0 || self.queue_step == 0 {
            return Err(PoolError::invalid("step sizes must be positive"));
        }
        if self.max_core_pool_size == 0
            || self.max_maximum_pool_size == 0
            || self.max_queue_capacity == 0
        {
            return Err(PoolError::invalid("ceilings must be positive"));
        }
        if self.max_core_pool_size > self.max_maximum_pool_size {
            return Err(PoolError::invalid(
                "max_core_pool_size exceeds max_maximum_pool_size",
            ));
        }
        if self.slow_start_ceiling == 0 || self.idle_checks_threshold == 0 {
            return Err(PoolError::invalid(
                "slow_start_ceiling and idle_checks_threshold must be positive",
            ));
        }
        if self.queue_wait_threshold_ms < 0.0 {
            return Err(PoolError::invalid("queue_wait_threshold_ms must not be negative"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn equality_is_by_name() {
        let a = PoolConfig::new("orders", 2, 4);
        let mut b = PoolConfig::new("orders", 8, 16);
        b.rejection_policy = "CallerRunsPolicy".to_string();

        assert_eq!(a, b);
        assert!(!a.same_settings(&b));

        let set: HashSet<_> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn same_settings_ignores_update_time() {
        let a = PoolConfig::new("orders", 2, 4);
        let mut b = a.clone();
        b.last_update_time = 12345;
        assert!(a.same_settings(&b));
    }

    #[test]
    fn validate_rejects_bad_bounds() {
        assert!(PoolConfig::new("p", 0, 4).validate().is_err());
        assert!(PoolConfig::new("p", 2, 0).validate().is_err());
        assert!(PoolConfig::new("p", 5, 4).validate().is_err());
        assert!(PoolConfig::new("p", 4, 4).validate().is_ok());
    }

    #[test]
    fn pool_config_json_defaults() {
        let json = r#"{"name":"io","core_pool_size":2,"max_pool_size":8,"adjust_mode":"auto"}"#;
        let config: PoolConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.adjust_mode, AdjustMode::Auto);
        assert_eq!(config.keep_alive_secs, 60);
        assert_eq!(config.rejection_policy, "AbortPolicy");
    }

    #[test]
    fn adjust_mode_parse() {
        assert_eq!("AUTO".parse::<AdjustMode>().unwrap(), AdjustMode::Auto);
        assert_eq!(" manual ".parse::<AdjustMode>().unwrap(), AdjustMode::Manual);
        assert!("sometimes".parse::<AdjustMode>().is_err());
        assert_eq!(AdjustMode::Auto.to_string(), "auto");
    }

    #[test]
    fn auto_adjust_defaults_are_valid() {
        let config = AutoAdjustConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.idle_checks_threshold, 3);
        assert_eq!(config.slow_start_ceiling, 8);
    }

    #[test]
    fn auto_adjust_rejects_inverted_hysteresis() {
        let config = AutoAdjustConfig {
            queue_full_threshold: 0.4,
            queue_shrink_threshold: 0.8,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn auto_adjust_rejects_bad_shrink_factor() {
        let config = AutoAdjustConfig {
            shrink_factor: 1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn auto_adjust_partial_json() {
        let config: AutoAdjustConfig =
            serde_json::from_str(r#"{"adjust_interval_ms": 300, "expand_queue": true}"#).unwrap();
        assert_eq!(config.adjust_interval_ms, 300);
        assert!(config.expand_queue);
        assert_eq!(config.max_pool_step, 2);
    }
}
