//! In-process registry and config center.
//!
//! Configurations are stored the way an external store would hold them:
//! one JSON document per pool, grouped by application. Pushes travel as
//! JSON messages and are decoded on delivery.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use adaptpool_core::PoolConfig;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::api::{ConfigCenter, ConfigChangeListener, Registry};
use crate::error::RegistryResult;

#[derive(Default)]
pub struct InMemoryRegistry {
    /// app → pool name → JSON-encoded config.
    configs: RwLock<HashMap<String, BTreeMap<String, String>>>,
    subscribers: RwLock<HashMap<String, Vec<Arc<dyn ConfigChangeListener>>>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a configuration to every subscriber of `app`.
    ///
    /// Returns the number of listeners the message reached.
    pub fn publish(&self, app: &str, config: &PoolConfig) -> RegistryResult<usize> {
        let message = serde_json::to_string(config)?;
        Ok(self.publish_raw(app, &message))
    }

    /// Deliver an already-encoded message. Messages that do not decode to a
    /// configuration are logged and dropped.
    pub fn publish_raw(&self, app: &str, message: &str) -> usize {
        let config: PoolConfig = match serde_json::from_str(message) {
            Ok(config) => config,
            Err(e) => {
                warn!(%app, error = %e, "malformed config message dropped");
                return 0;
            }
        };

        let listeners = self
            .subscribers
            .read()
            .get(app)
            .cloned()
            .unwrap_or_default();
        debug!(%app, pool = %config.name, listeners = listeners.len(), "config message published");
        for listener in &listeners {
            listener.on_config_change(config.clone());
        }
        listeners.len()
    }

    /// Raw stored document, as an external store would return it.
    pub fn stored_json(&self, app: &str, pool: &str) -> Option<String> {
        self.configs.read().get(app)?.get(pool).cloned()
    }

    /// Listeners subscribed to `app`.
    pub fn subscriber_count(&self, app: &str) -> usize {
        self.subscribers.read().get(app).map_or(0, Vec::len)
    }
}

impl Registry for InMemoryRegistry {
    fn report_all(&self, app: &str, configs: &[PoolConfig]) -> RegistryResult<()> {
        if configs.is_empty() {
            return Ok(());
        }
        let mut encoded = Vec::with_capacity(configs.len());
        for config in configs {
            encoded.push((config.name.clone(), serde_json::to_string(config)?));
        }
        self.configs
            .write()
            .entry(app.to_string())
            .or_default()
            .extend(encoded);
        debug!(%app, pools = configs.len(), "configs reported");
        Ok(())
    }

    fn report_config(&self, app: &str, config: &PoolConfig) -> RegistryResult<()> {
        let json = serde_json::to_string(config)?;
        self.configs
            .write()
            .entry(app.to_string())
            .or_default()
            .insert(config.name.clone(), json);
        debug!(%app, pool = %config.name, "config reported");
        Ok(())
    }
}

impl ConfigCenter for InMemoryRegistry {
    fn fetch_configs(&self, app: &str) -> RegistryResult<Vec<PoolConfig>> {
        let configs = self.configs.read();
        let Some(stored) = configs.get(app) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::with_capacity(stored.len());
        for (pool, json) in stored {
            match serde_json::from_str(json) {
                Ok(config) => out.push(config),
                Err(e) => warn!(%app, %pool, error = %e, "stored config unreadable, skipped"),
            }
        }
        Ok(out)
    }

    fn subscribe(&self, app: &str, listener: Arc<dyn ConfigChangeListener>) {
        self.subscribers
            .write()
            .entry(app.to_string())
            .or_default()
            .push(listener);
        debug!(%app, "config listener subscribed");
    }
}
