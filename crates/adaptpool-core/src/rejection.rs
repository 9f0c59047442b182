//! What happens to a task the executor cannot admit.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::{PoolError, PoolResult};
use crate::executor::ThreadPool;
use crate::task::TimedTask;

/// How long [`BlockPolicy`] waits for queue room when built by name.
pub const DEFAULT_BLOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Handler for tasks refused by a saturated or shut-down executor.
///
/// The policy alone decides the outcome: drop the task, run it on the
/// submitting thread, fail the submission, or wait for room.
pub trait RejectionPolicy: Send + Sync {
    fn name(&self) -> &str;

    fn rejected(&self, task: TimedTask, pool: &ThreadPool) -> PoolResult<()>;
}

fn saturation_message(pool: &ThreadPool) -> String {
    format!(
        "queue full ({} of {}) with {} of {} workers",
        pool.queue().len(),
        pool.queue().capacity(),
        pool.pool_size(),
        pool.maximum_pool_size()
    )
}

/// Fail the submission.
#[derive(Debug, Default, Clone, Copy)]
pub struct AbortPolicy;

impl RejectionPolicy for AbortPolicy {
    fn name(&self) -> &str {
        "AbortPolicy"
    }

    fn rejected(&self, _task: TimedTask, pool: &ThreadPool) -> PoolResult<()> {
        if pool.is_shutdown() {
            Err(PoolError::Shutdown)
        } else {
            Err(PoolError::Rejected(saturation_message(pool)))
        }
    }
}

/// Run the task on the submitting thread, or drop it once shut down.
#[derive(Debug, Default, Clone, Copy)]
pub struct CallerRunsPolicy;

impl RejectionPolicy for CallerRunsPolicy {
    fn name(&self) -> &str {
        "CallerRunsPolicy"
    }

    fn rejected(&self, task: TimedTask, pool: &ThreadPool) -> PoolResult<()> {
        if !pool.is_shutdown() {
            task.run();
        }
        Ok(())
    }
}

/// Silently drop the task.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardPolicy;

impl RejectionPolicy for DiscardPolicy {
    fn name(&self) -> &str {
        "DiscardPolicy"
    }

    fn rejected(&self, task: TimedTask, _pool: &ThreadPool) -> PoolResult<()> {
        debug!(?task, "task discarded");
        Ok(())
    }
}

/// Drop the oldest queued task and resubmit the new one.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardOldestPolicy;

impl RejectionPolicy for DiscardOldestPolicy {
    fn name(&self) -> &str {
        "DiscardOldestPolicy"
    }

    fn rejected(&self, task: TimedTask, pool: &ThreadPool) -> PoolResult<()> {
        if pool.is_shutdown() {
            return Ok(());
        }
        if let Some(oldest) = pool.queue().try_poll() {
            debug!(task = ?oldest, "oldest queued task discarded");
        }
        pool.execute_task(task)
    }
}

/// Wait up to `timeout` for queue room, then fail.
#[derive(Debug, Clone, Copy)]
pub struct BlockPolicy {
    pub timeout: Duration,
}

impl Default for BlockPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_BLOCK_TIMEOUT,
        }
    }
}

impl RejectionPolicy for BlockPolicy {
    fn name(&self) -> &str {
        "BlockPolicy"
    }

    fn rejected(&self, task: TimedTask, pool: &ThreadPool) -> PoolResult<()> {
        if pool.is_shutdown() {
            return Err(PoolError::Shutdown);
        }
        match pool.queue().offer_timeout(task, self.timeout) {
            Ok(()) => Ok(()),
            Err(_) if pool.is_shutdown() => Err(PoolError::Shutdown),
            Err(_) => Err(PoolError::Rejected(format!(
                "no queue room within {}ms",
                self.timeout.as_millis()
            ))),
        }
    }
}

/// Resolve a policy from its configured name.
///
/// Matching ignores case and the `Policy` suffix, so `abort`, `Abort` and
/// `AbortPolicy` are the same.
pub fn policy_by_name(name: &str) -> PoolResult<Arc<dyn RejectionPolicy>> {
    let normalized = name.trim().to_ascii_lowercase();
    let key = normalized.strip_suffix("policy").unwrap_or(&normalized);
    let policy: Arc<dyn RejectionPolicy> = match key {
        "abort" => Arc::new(AbortPolicy),
        "callerruns" => Arc::new(CallerRunsPolicy),
        "discard" => Arc::new(DiscardPolicy),
        "discardoldest" => Arc::new(DiscardOldestPolicy),
        "block" => Arc::new(BlockPolicy::default()),
        _ => {
            return Err(PoolError::invalid(format!(
                "unknown rejection policy: {name}"
            )));
        }
    };
    Ok(policy)
}

/// Counting decorator around another policy.
///
/// Every invocation bumps the counter and is then handed to the delegate
/// untouched, whatever the delegate decides.
pub struct RejectionTracker {
    count: AtomicU64,
    delegate: RwLock<Arc<dyn RejectionPolicy>>,
}

impl RejectionTracker {
    pub fn new(delegate: Arc<dyn RejectionPolicy>) -> Self {
        Self {
            count: AtomicU64::new(0),
            delegate: RwLock::new(delegate),
        }
    }

    pub fn rejection_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
    }

    /// Swap the wrapped policy. The count carries over.
    pub fn set_delegate(&self, delegate: Arc<dyn RejectionPolicy>) {
        *self.delegate.write() = delegate;
    }

    pub fn delegate_name(&self) -> String {
        self.delegate.read().name().to_string()
    }
}

impl RejectionPolicy for RejectionTracker {
    fn name(&self) -> &str {
        "RejectionTracker"
    }

    fn rejected(&self, task: TimedTask, pool: &ThreadPool) -> PoolResult<()> {
        self.count.fetch_add(1, Ordering::Relaxed);
        let delegate = self.delegate.read().clone();
        delegate.rejected(task, pool)
    }
}

impl std::fmt::Debug for RejectionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RejectionTracker")
            .field("count", &self.rejection_count())
            .field("delegate", &self.delegate_name())
            .finish()
    }
}
