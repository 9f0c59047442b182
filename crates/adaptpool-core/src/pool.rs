//! The instrumented worker pool.
//!
//! [`WorkerPool`] composes a [`ThreadPool`] with an interceptor that feeds
//! two EWMA signals and a live active-task counter. In [`AdjustMode::Auto`]
//! the interceptor also pokes a [`CompletionHook`] after every task, which is
//! how the self-tuning engine gets triggered without the pool knowing about it.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::clock::{Clock, system_clock};
use crate::config::{AdjustMode, PoolConfig};
use crate::error::{PoolError, PoolResult};
use crate::executor::{NamedThreadFactory, TaskInterceptor, ThreadFactory, ThreadPool, ThreadPoolBuilder};
use crate::metrics::{Ewma, PoolBounds, PoolMetrics};
use crate::rejection::{AbortPolicy, RejectionPolicy, RejectionTracker, policy_by_name};
use crate::task::{TaskHandle, TaskTiming, TimedTask};

/// Called on the worker thread after each task while the pool is in auto mode.
pub trait CompletionHook: Send + Sync {
    fn on_task_completed(&self);
}

const MODE_MANUAL: u8 = 0;
const MODE_AUTO: u8 = 1;

fn encode_mode(mode: AdjustMode) -> u8 {
    match mode {
        AdjustMode::Manual => MODE_MANUAL,
        AdjustMode::Auto => MODE_AUTO,
    }
}

/// Per-pool timing state touched by every worker.
struct Instruments {
    task_time: Ewma,
    queue_wait: Ewma,
    active: AtomicUsize,
    mode: AtomicU8,
    completion_hook: RwLock<Option<Weak<dyn CompletionHook>>>,
    clock: Arc<dyn Clock>,
}

impl TaskInterceptor for Instruments {
    fn before_execute(&self, timing: &TaskTiming) {
        self.queue_wait.update(timing.wait_ms());
        self.active.fetch_add(1, Ordering::AcqRel);
    }

    fn after_execute(&self, timing: &TaskTiming, _panicked: bool) {
        self.task_time.update(timing.run_ms(self.clock.now()));
        self.active.fetch_sub(1, Ordering::AcqRel);

        if self.mode.load(Ordering::Acquire) != MODE_AUTO {
            return;
        }
        let hook = self.completion_hook.read().as_ref().and_then(Weak::upgrade);
        if let Some(hook) = hook {
            hook.on_task_completed();
        }
    }
}

/// Options for [`WorkerPool::builder`].
pub struct WorkerPoolBuilder {
    name: String,
    core: usize,
    max: usize,
    keep_alive: Duration,
    queue_capacity: usize,
    allow_core_timeout: bool,
    factory: Option<Arc<dyn ThreadFactory>>,
    policy: Arc<dyn RejectionPolicy>,
    adjust_mode: AdjustMode,
    clock: Arc<dyn Clock>,
}

impl WorkerPoolBuilder {
    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn allow_core_timeout(mut self, allow: bool) -> Self {
        self.allow_core_timeout = allow;
        self
    }

    pub fn thread_factory(mut self, factory: Arc<dyn ThreadFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn rejection_policy(mut self, policy: Arc<dyn RejectionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn adjust_mode(mut self, mode: AdjustMode) -> Self {
        self.adjust_mode = mode;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> PoolResult<WorkerPool> {
        let instruments = Arc::new(Instruments {
            task_time: Ewma::default(),
            queue_wait: Ewma::default(),
            active: AtomicUsize::new(0),
            mode: AtomicU8::new(encode_mode(self.adjust_mode)),
            completion_hook: RwLock::new(None),
            clock: self.clock.clone(),
        });
        let tracker = Arc::new(RejectionTracker::new(self.policy));
        let factory = self
            .factory
            .unwrap_or_else(|| Arc::new(NamedThreadFactory::new(self.name.clone())));

        let executor = ThreadPoolBuilder::new(self.core, self.max)
            .keep_alive(self.keep_alive)
            .queue_capacity(self.queue_capacity)
            .allow_core_timeout(self.allow_core_timeout)
            .thread_factory(factory)
            .rejection_policy(tracker.clone())
            .interceptor(instruments.clone())
            .clock(self.clock)
            .build()?;

        info!(
            pool = %self.name,
            core = self.core,
            max = self.max,
            queue_capacity = self.queue_capacity,
            mode = %self.adjust_mode,
            "worker pool created"
        );

        Ok(WorkerPool {
            name: self.name,
            initial: PoolBounds {
                core_pool_size: self.core,
                max_pool_size: self.max,
                queue_capacity: self.queue_capacity,
            },
            executor,
            instruments,
            tracker,
            bounds: Mutex::new(()),
            queue_type: "ResizableBoundedQueue".to_string(),
            last_update: RwLock::new(epoch_millis()),
        })
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// A named, instrumented, live-resizable executor.
pub struct WorkerPool {
    name: String,
    initial: PoolBounds,
    executor: ThreadPool,
    instruments: Arc<Instruments>,
    tracker: Arc<RejectionTracker>,
    /// Held across paired bound writes and snapshot reads.
    bounds: Mutex<()>,
    queue_type: String,
    last_update: RwLock<u64>,
}

impl WorkerPool {
    /// Start building a pool. Defaults: 60s keep-alive, queue of 1024,
    /// abort on rejection, manual mode.
    pub fn builder(name: impl Into<String>, core: usize, max: usize) -> WorkerPoolBuilder {
        WorkerPoolBuilder {
            name: name.into(),
            core,
            max,
            keep_alive: Duration::from_secs(60),
            queue_capacity: 1024,
            allow_core_timeout: false,
            factory: None,
            policy: Arc::new(AbortPolicy),
            adjust_mode: AdjustMode::Manual,
            clock: system_clock(),
        }
    }

    /// Build a pool from a configuration record.
    pub fn from_config(config: &PoolConfig, queue_capacity: usize) -> PoolResult<Self> {
        config.validate()?;
        Self::builder(config.name.clone(), config.core_pool_size, config.max_pool_size)
            .keep_alive(Duration::from_secs(config.keep_alive_secs))
            .queue_capacity(queue_capacity)
            .allow_core_timeout(config.allow_core_timeout)
            .rejection_policy(policy_by_name(&config.rejection_policy)?)
            .adjust_mode(config.adjust_mode)
            .build()
    }

    /// Pool name, unique within an application.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Submit a task, stamped with the submission instant.
    pub fn execute<F>(&self, f: F) -> PoolResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.executor.execute(f)
    }

    /// Submit a task and get a handle to its result. Timed and admitted
    /// exactly like [`execute`](Self::execute).
    pub fn submit<F, R>(&self, f: F) -> PoolResult<TaskHandle<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.executor.submit(f)
    }

    /// Immutable snapshot of every counter and bound. No side effects.
    pub fn metrics(&self) -> PoolMetrics {
        let (core_pool_size, max_pool_size) = self.thread_bounds();
        let queue = self.executor.queue();
        let queue_size = queue.len();
        let queue_capacity = queue.capacity();
        PoolMetrics {
            core_pool_size,
            max_pool_size,
            active_count: self.active_count(),
            pool_size: self.executor.pool_size(),
            queue_size,
            remaining_capacity: queue_capacity.saturating_sub(queue_size),
            queue_capacity,
            largest_pool_size: self.executor.largest_pool_size(),
            completed_task_count: self.executor.completed_task_count(),
            rejected_count: self.tracker.rejection_count(),
            ewma_task_time_ms: self.instruments.task_time.value(),
            ewma_queue_wait_ms: self.instruments.queue_wait.value(),
        }
    }

    /// Current settings as a configuration record.
    pub fn config(&self) -> PoolConfig {
        let (core_pool_size, max_pool_size) = self.thread_bounds();
        PoolConfig {
            name: self.name.clone(),
            core_pool_size,
            max_pool_size,
            keep_alive_secs: self.executor.keep_alive().as_secs(),
            allow_core_timeout: self.executor.allows_core_thread_timeout(),
            queue_type: self.queue_type.clone(),
            rejection_policy: self.tracker.delegate_name(),
            adjust_mode: self.adjust_mode(),
            last_update_time: *self.last_update.read(),
        }
    }

    /// Core and max read as one consistent pair.
    pub fn thread_bounds(&self) -> (usize, usize) {
        let _guard = self.bounds.lock();
        (self.executor.core_pool_size(), self.executor.maximum_pool_size())
    }

    /// Workers currently running a task.
    pub fn active_count(&self) -> usize {
        self.instruments.active.load(Ordering::Acquire)
    }

    /// Set both thread bounds.
    ///
    /// Growing writes max before core, shrinking writes core before max, so
    /// `core <= max` holds for any concurrent reader in between.
    pub fn resize(&self, core: usize, max: usize) -> PoolResult<()> {
        if core == 0 || max == 0 || core > max {
            return Err(PoolError::invalid(format!(
                "invalid pool bounds core={core} max={max}"
            )));
        }
        let _guard = self.bounds.lock();
        if max >= self.executor.maximum_pool_size() {
            self.executor.set_maximum_pool_size(max)?;
            self.executor.set_core_pool_size(core)?;
        } else {
            self.executor.set_core_pool_size(core)?;
            self.executor.set_maximum_pool_size(max)?;
        }
        self.touch();
        Ok(())
    }

    /// Change the core bound alone.
    pub fn set_core_pool_size(&self, core: usize) -> PoolResult<()> {
        let _guard = self.bounds.lock();
        self.executor.set_core_pool_size(core)?;
        self.touch();
        Ok(())
    }

    /// Change the max bound alone.
    pub fn set_maximum_pool_size(&self, max: usize) -> PoolResult<()> {
        let _guard = self.bounds.lock();
        self.executor.set_maximum_pool_size(max)?;
        self.touch();
        Ok(())
    }

    /// Change the queue bound; queued work above it stays queued.
    pub fn set_queue_capacity(&self, capacity: usize) -> PoolResult<()> {
        self.executor.queue().set_capacity(capacity)?;
        self.touch();
        Ok(())
    }

    /// Current queue bound.
    pub fn queue_capacity(&self) -> usize {
        self.executor.queue().capacity()
    }

    /// Bounds the pool was built with. Shrinking never goes below them.
    pub fn initial_bounds(&self) -> PoolBounds {
        self.initial
    }

    /// Current adjust mode.
    pub fn adjust_mode(&self) -> AdjustMode {
        match self.instruments.mode.load(Ordering::Acquire) {
            MODE_AUTO => AdjustMode::Auto,
            _ => AdjustMode::Manual,
        }
    }

    pub fn set_adjust_mode(&self, mode: AdjustMode) {
        let previous = self.instruments.mode.swap(encode_mode(mode), Ordering::AcqRel);
        if previous != encode_mode(mode) {
            info!(pool = %self.name, mode = %mode, "adjust mode changed");
            self.touch();
        }
    }

    /// Rejections since the last reset.
    pub fn rejection_count(&self) -> u64 {
        self.tracker.rejection_count()
    }

    pub fn reset_rejection_count(&self) {
        self.tracker.reset();
    }

    /// Swap the wrapped rejection policy; the rejection count is kept.
    pub fn set_rejection_policy(&self, policy: Arc<dyn RejectionPolicy>) {
        self.tracker.set_delegate(policy);
        self.touch();
    }

    /// Apply a pushed configuration.
    ///
    /// Bad bounds or an unknown policy are logged and the pool is left as it
    /// was. Otherwise the bounds go through [`resize`](Self::resize), then
    /// keep-alive, core timeout and mode, then the rejection policy.
    pub fn apply_config(&self, config: &PoolConfig) -> PoolResult<()> {
        if config.name != self.name {
            warn!(pool = %self.name, pushed = %config.name, "config push for another pool ignored");
            return Err(PoolError::invalid(format!(
                "config for pool {} pushed to pool {}",
                config.name, self.name
            )));
        }
        if let Err(e) = config.validate() {
            warn!(pool = %self.name, error = %e, "invalid config push dropped");
            return Err(e);
        }
        let keep_alive = Duration::from_secs(config.keep_alive_secs);
        if config.allow_core_timeout && keep_alive.is_zero() {
            let e = PoolError::invalid("core thread timeout requires a non-zero keep-alive");
            warn!(pool = %self.name, error = %e, "invalid config push dropped");
            return Err(e);
        }
        let policy = match policy_by_name(&config.rejection_policy) {
            Ok(policy) => policy,
            Err(e) => {
                warn!(pool = %self.name, error = %e, "invalid config push dropped");
                return Err(e);
            }
        };

        self.resize(config.core_pool_size, config.max_pool_size)?;
        // Order keeps the keep-alive/core-timeout pair valid at every step.
        if config.allow_core_timeout {
            self.executor.set_keep_alive(keep_alive)?;
            self.executor.allow_core_thread_timeout(true)?;
        } else {
            self.executor.allow_core_thread_timeout(false)?;
            self.executor.set_keep_alive(keep_alive)?;
        }
        self.set_adjust_mode(config.adjust_mode);
        self.tracker.set_delegate(policy);
        self.touch();

        info!(
            pool = %self.name,
            core = config.core_pool_size,
            max = config.max_pool_size,
            policy = %config.rejection_policy,
            mode = %config.adjust_mode,
            "config push applied"
        );
        Ok(())
    }

    /// Install the auto-mode trigger. Held weakly so the hook owner can
    /// drop independently of the pool.
    pub fn set_completion_hook(&self, hook: Weak<dyn CompletionHook>) {
        *self.instruments.completion_hook.write() = Some(hook);
    }

    pub fn clear_completion_hook(&self) {
        *self.instruments.completion_hook.write() = None;
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        self.executor.clock()
    }

    pub fn executor(&self) -> &ThreadPool {
        &self.executor
    }

    /// Stop admission; queued tasks still run.
    pub fn shutdown(&self) {
        debug!(pool = %self.name, "worker pool shutting down");
        self.executor.shutdown();
    }

    /// Stop admission and return the tasks that never started.
    pub fn shutdown_now(&self) -> Vec<TimedTask> {
        debug!(pool = %self.name, "worker pool shutting down now");
        self.executor.shutdown_now()
    }

    pub fn is_shutdown(&self) -> bool {
        self.executor.is_shutdown()
    }

    pub fn is_terminated(&self) -> bool {
        self.executor.is_terminated()
    }

    /// Block until every worker exits or `timeout` passes.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        self.executor.await_termination(timeout)
    }

    fn touch(&self) {
        *self.last_update.write() = epoch_millis();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("executor", &self.executor)
            .field("mode", &self.adjust_mode())
            .finish_non_exhaustive()
    }
}
