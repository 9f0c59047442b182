//! adaptpool-registry: the boundary between pools and a config store.
//!
//! Pools report the configuration they run with; the store pushes
//! configuration back. Both directions carry [`PoolConfig`] records,
//! JSON-encoded on the wire.
//!
//! ```text
//!   ReportJob ── report_once(): only pools whose settings changed
//!      │  Registry::report_config(app, config)
//!      ▼
//!   InMemoryRegistry  (app → pool → JSON)
//!      │  publish(app, config) → JSON message → decode
//!      ▼
//!   ConfigChangeListener (PoolService)
//!      └── update_config() → WorkerPool::apply_config()
//! ```
//!
//! [`PoolConfig`]: adaptpool_core::PoolConfig

pub mod api;
pub mod error;
pub mod memory;
pub mod report;
pub mod service;

pub use api::{ConfigCenter, ConfigChangeListener, Registry};
pub use error::{RegistryError, RegistryResult};
pub use memory::InMemoryRegistry;
pub use report::ReportJob;
pub use service::{PoolService, PoolStatus};
