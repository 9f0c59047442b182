//! The narrow view of a pool the engine needs.

use adaptpool_core::{PoolBounds, PoolMetrics, PoolResult, WorkerPool};

/// Read metrics and move bounds. Implemented by [`WorkerPool`]; tests use
/// scripted fakes.
pub trait PoolControl: Send + Sync {
    fn name(&self) -> &str;

    fn metrics(&self) -> PoolMetrics;

    fn queue_capacity(&self) -> usize;

    /// Construction-time bounds; shrinking never goes below them.
    fn initial_bounds(&self) -> PoolBounds;

    fn set_core_pool_size(&self, core: usize) -> PoolResult<()>;

    fn set_maximum_pool_size(&self, max: usize) -> PoolResult<()>;

    fn set_queue_capacity(&self, capacity: usize) -> PoolResult<()>;
}

impl PoolControl for WorkerPool {
    fn name(&self) -> &str {
        WorkerPool::name(self)
    }

    fn metrics(&self) -> PoolMetrics {
        WorkerPool::metrics(self)
    }

    fn queue_capacity(&self) -> usize {
        WorkerPool::queue_capacity(self)
    }

    fn initial_bounds(&self) -> PoolBounds {
        WorkerPool::initial_bounds(self)
    }

    fn set_core_pool_size(&self, core: usize) -> PoolResult<()> {
        WorkerPool::set_core_pool_size(self, core)
    }

    fn set_maximum_pool_size(&self, max: usize) -> PoolResult<()> {
        WorkerPool::set_maximum_pool_size(self, max)
    }

    fn set_queue_capacity(&self, capacity: usize) -> PoolResult<()> {
        WorkerPool::set_queue_capacity(self, capacity)
    }
}
