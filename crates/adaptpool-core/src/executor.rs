//! Bounded thread-pool executor with live-resizable bounds.
//!
//! Admission follows the classic core/queue/max ladder:
//!
//! ```text
//!  execute(task)
//!     │
//!     ├─ workers < core ───────────────► spawn worker with task
//!     ├─ queue.offer(task) accepted ───► queued
//!     ├─ workers < max ────────────────► spawn worker with task
//!     └─ otherwise ────────────────────► rejection policy
//! ```
//!
//! Workers pull from the shared [`ResizableBoundedQueue`] and retire when
//! the pool holds more than `max` workers, or when they have been idle for
//! the keep-alive and are surplus to `core` (or core timeout is allowed).

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, warn};

use crate::clock::{Clock, system_clock};
use crate::error::{PoolError, PoolResult};
use crate::queue::ResizableBoundedQueue;
use crate::rejection::{AbortPolicy, RejectionPolicy};
use crate::task::{TaskHandle, TaskTiming, TimedTask, job_with_handle};

/// Shortest wait a worker uses while polling for work.
const MIN_IDLE_POLL: Duration = Duration::from_millis(50);

/// Creates the OS threads that run workers.
pub trait ThreadFactory: Send + Sync {
    fn spawn(&self, body: Box<dyn FnOnce() + Send + 'static>) -> std::io::Result<()>;
}

/// Spawns threads named `<prefix>-<n>` with `n` counting from 1.
#[derive(Debug)]
pub struct NamedThreadFactory {
    prefix: String,
    next_id: AtomicUsize,
}

impl NamedThreadFactory {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next_id: AtomicUsize::new(1),
        }
    }
}

impl ThreadFactory for NamedThreadFactory {
    fn spawn(&self, body: Box<dyn FnOnce() + Send + 'static>) -> std::io::Result<()> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        std::thread::Builder::new()
            .name(format!("{}-{id}", self.prefix))
            .spawn(body)
            .map(|_| ())
    }
}

/// Hooks run on the worker thread around every task.
pub trait TaskInterceptor: Send + Sync {
    fn before_execute(&self, _timing: &TaskTiming) {}

    /// Runs even when the task panicked.
    fn after_execute(&self, _timing: &TaskTiming, _panicked: bool) {}
}

#[derive(Debug, Default)]
struct WorkerCounts {
    live: usize,
    largest: usize,
}

struct Shared {
    queue: ResizableBoundedQueue<TimedTask>,
    core: AtomicUsize,
    max: AtomicUsize,
    keep_alive_ms: AtomicU64,
    allow_core_timeout: AtomicBool,
    shutdown: AtomicBool,
    completed: AtomicU64,
    workers: Mutex<WorkerCounts>,
    terminated: Condvar,
    /// Serialises bound changes so each setter validates against a stable
    /// counterpart.
    resize: Mutex<()>,
    policy: RwLock<Arc<dyn RejectionPolicy>>,
    factory: Arc<dyn ThreadFactory>,
    interceptor: Option<Arc<dyn TaskInterceptor>>,
    clock: Arc<dyn Clock>,
}

/// Builder for [`ThreadPool`].
pub struct ThreadPoolBuilder {
    core: usize,
    max: usize,
    keep_alive: Duration,
    queue_capacity: usize,
    allow_core_timeout: bool,
    factory: Option<Arc<dyn ThreadFactory>>,
    policy: Arc<dyn RejectionPolicy>,
    interceptor: Option<Arc<dyn TaskInterceptor>>,
    clock: Arc<dyn Clock>,
}

impl ThreadPoolBuilder {
    pub fn new(core: usize, max: usize) -> Self {
        Self {
            core,
            max,
            keep_alive: Duration::from_secs(60),
            queue_capacity: 1024,
            allow_core_timeout: false,
            factory: None,
            policy: Arc::new(AbortPolicy),
            interceptor: None,
            clock: system_clock(),
        }
    }

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

    pub fn interceptor(mut self, interceptor: Arc<dyn TaskInterceptor>) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validate the bounds and create the pool. No worker is started yet.
    pub fn build(self) -> PoolResult<ThreadPool> {
        validate_bounds(self.core, self.max)?;
        if self.allow_core_timeout && self.keep_alive.is_zero() {
            return Err(PoolError::invalid(
                "core thread timeout requires a non-zero keep-alive",
            ));
        }
        let queue = ResizableBoundedQueue::new(self.queue_capacity)?;
        let factory = self
            .factory
            .unwrap_or_else(|| Arc::new(NamedThreadFactory::new("adaptpool-worker")));

        Ok(ThreadPool {
            shared: Arc::new(Shared {
                queue,
                core: AtomicUsize::new(self.core),
                max: AtomicUsize::new(self.max),
                keep_alive_ms: AtomicU64::new(duration_ms(self.keep_alive)),
                allow_core_timeout: AtomicBool::new(self.allow_core_timeout),
                shutdown: AtomicBool::new(false),
                completed: AtomicU64::new(0),
                workers: Mutex::new(WorkerCounts::default()),
                terminated: Condvar::new(),
                resize: Mutex::new(()),
                policy: RwLock::new(self.policy),
                factory,
                interceptor: self.interceptor,
                clock: self.clock,
            }),
        })
    }
}

fn validate_bounds(core: usize, max: usize) -> PoolResult<()> {
    if core == 0 {
        return Err(PoolError::invalid("core pool size must be positive"));
    }
    if max == 0 {
        return Err(PoolError::invalid("maximum pool size must be positive"));
    }
    if core > max {
        return Err(PoolError::invalid(format!(
            "core pool size {core} exceeds maximum pool size {max}"
        )));
    }
    Ok(())
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Handle to a bounded executor. Clones share the same pool.
#[derive(Clone)]
pub struct ThreadPool {
    shared: Arc<Shared>,
}

impl ThreadPool {
    /// Submit a closure.
    pub fn execute<F>(&self, f: F) -> PoolResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let task = TimedTask::new(Box::new(f), self.shared.clock.now());
        self.execute_task(task)
    }

    /// Submit a closure whose result (or panic) is delivered to the
    /// returned handle. Admission is the same as [`execute`](Self::execute).
    pub fn submit<F, R>(&self, f: F) -> PoolResult<TaskHandle<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (job, handle) = job_with_handle(f);
        self.execute_task(TimedTask::new(job, self.shared.clock.now()))?;
        Ok(handle)
    }

    /// Submit an already-stamped task.
    pub fn execute_task(&self, task: TimedTask) -> PoolResult<()> {
        if self.is_shutdown() {
            return self.reject(task);
        }

        let task = {
            let mut workers = self.shared.workers.lock();
            if workers.live < self.core_pool_size() {
                return self.add_worker(&mut workers, Some(task));
            }
            task
        };

        let task = match self.shared.queue.offer(task) {
            Ok(()) => {
                // A queued task needs at least one worker to drain it.
                let mut workers = self.shared.workers.lock();
                if workers.live == 0 {
                    self.add_worker(&mut workers, None)?;
                }
                return Ok(());
            }
            Err(task) => task,
        };

        let mut workers = self.shared.workers.lock();
        if workers.live < self.maximum_pool_size() {
            return self.add_worker(&mut workers, Some(task));
        }
        drop(workers);
        self.reject(task)
    }

    fn reject(&self, task: TimedTask) -> PoolResult<()> {
        let policy = self.shared.policy.read().clone();
        policy.rejected(task, self)
    }

    fn add_worker(&self, workers: &mut WorkerCounts, first: Option<TimedTask>) -> PoolResult<()> {
        workers.live += 1;
        workers.largest = workers.largest.max(workers.live);
        let pool = self.clone();
        let spawned = self
            .shared
            .factory
            .spawn(Box::new(move || pool.worker_loop(first)));
        if let Err(e) = spawned {
            workers.live -= 1;
            if workers.live == 0 {
                self.shared.terminated.notify_all();
            }
            warn!(error = %e, "failed to spawn worker thread");
            return Err(PoolError::ThreadSpawn(e.to_string()));
        }
        Ok(())
    }

    fn worker_loop(self, first: Option<TimedTask>) {
        if let Some(task) = first {
            self.run_task(task);
        }
        let mut idle_since = Instant::now();
        loop {
            if self.should_retire(false) {
                return;
            }
            let keep_alive = self.keep_alive();
            let wait = keep_alive
                .saturating_sub(idle_since.elapsed())
                .max(MIN_IDLE_POLL);
            match self.shared.queue.poll(wait) {
                Some(task) => {
                    self.run_task(task);
                    idle_since = Instant::now();
                }
                None => {
                    if idle_since.elapsed() >= keep_alive {
                        if self.should_retire(true) {
                            return;
                        }
                        idle_since = Instant::now();
                    }
                }
            }
        }
    }

    /// Decide under the worker lock whether the calling worker exits, and
    /// deregister it if so.
    fn should_retire(&self, idle_expired: bool) -> bool {
        let mut workers = self.shared.workers.lock();
        let live = workers.live;
        let queue_empty = self.shared.queue.is_empty();
        let drained = self.shared.queue.is_closed() && queue_empty;
        let over_max = live > self.maximum_pool_size();
        let timed_out =
            idle_expired && (live > self.core_pool_size() || self.allows_core_thread_timeout());
        // The last worker stays while work is queued.
        let retire = drained || ((over_max || timed_out) && (live > 1 || queue_empty));
        if retire {
            workers.live -= 1;
            if workers.live == 0 {
                self.shared.terminated.notify_all();
            }
        }
        retire
    }

    fn run_task(&self, mut task: TimedTask) {
        task.mark_started(self.shared.clock.now());
        let (job, timing) = task.into_parts();
        if let Some(interceptor) = &self.shared.interceptor {
            interceptor.before_execute(&timing);
        }
        let panicked = panic::catch_unwind(AssertUnwindSafe(move || job())).is_err();
        if panicked {
            warn!("task panicked, worker continues");
        }
        if let Some(interceptor) = &self.shared.interceptor {
            interceptor.after_execute(&timing, panicked);
        }
        self.shared.completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Current core bound.
    pub fn core_pool_size(&self) -> usize {
        self.shared.core.load(Ordering::Acquire)
    }

    /// Current max bound.
    pub fn maximum_pool_size(&self) -> usize {
        self.shared.max.load(Ordering::Acquire)
    }

    /// Change the core bound. Must stay positive and no larger than max.
    ///
    /// Growing starts workers right away for work that is already queued.
    pub fn set_core_pool_size(&self, core: usize) -> PoolResult<()> {
        let _guard = self.shared.resize.lock();
        validate_bounds(core, self.maximum_pool_size())?;
        let previous = self.shared.core.swap(core, Ordering::AcqRel);
        if core < previous {
            self.shared.queue.wake_all();
        } else if core > previous {
            let mut workers = self.shared.workers.lock();
            let mut to_start = (core - previous).min(self.shared.queue.len());
            while to_start > 0 && workers.live < core {
                self.add_worker(&mut workers, None)?;
                to_start -= 1;
            }
        }
        debug!(previous, core, "core pool size changed");
        Ok(())
    }

    /// Change the max bound. Must stay positive and no smaller than core.
    pub fn set_maximum_pool_size(&self, max: usize) -> PoolResult<()> {
        let _guard = self.shared.resize.lock();
        validate_bounds(self.core_pool_size(), max)?;
        let previous = self.shared.max.swap(max, Ordering::AcqRel);
        if max < previous {
            self.shared.queue.wake_all();
        }
        debug!(previous, max, "maximum pool size changed");
        Ok(())
    }

    /// Idle time after which a worker above core retires.
    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.shared.keep_alive_ms.load(Ordering::Acquire))
    }

    /// Change the keep-alive. Zero is refused while core threads may time out.
    pub fn set_keep_alive(&self, keep_alive: Duration) -> PoolResult<()> {
        if keep_alive.is_zero() && self.allows_core_thread_timeout() {
            return Err(PoolError::invalid(
                "core threads must have a non-zero keep-alive",
            ));
        }
        let previous = self
            .shared
            .keep_alive_ms
            .swap(duration_ms(keep_alive), Ordering::AcqRel);
        if duration_ms(keep_alive) < previous {
            self.shared.queue.wake_all();
        }
        Ok(())
    }

    /// Whether idle core workers retire after the keep-alive.
    pub fn allows_core_thread_timeout(&self) -> bool {
        self.shared.allow_core_timeout.load(Ordering::Acquire)
    }

    /// Let idle core workers retire after the keep-alive.
    pub fn allow_core_thread_timeout(&self, allow: bool) -> PoolResult<()> {
        if allow && self.keep_alive().is_zero() {
            return Err(PoolError::invalid(
                "core thread timeout requires a non-zero keep-alive",
            ));
        }
        if self.shared.allow_core_timeout.swap(allow, Ordering::AcqRel) != allow && allow {
            self.shared.queue.wake_all();
        }
        Ok(())
    }

    /// The shared work queue.
    pub fn queue(&self) -> &ResizableBoundedQueue<TimedTask> {
        &self.shared.queue
    }

    /// Policy applied when admission fails.
    pub fn rejection_policy(&self) -> Arc<dyn RejectionPolicy> {
        self.shared.policy.read().clone()
    }

    /// Replace the policy; takes effect on the next rejection.
    pub fn set_rejection_policy(&self, policy: Arc<dyn RejectionPolicy>) {
        *self.shared.policy.write() = policy;
    }

    /// Clock used to stamp submission and start times.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.shared.clock
    }

    /// Live worker threads.
    pub fn pool_size(&self) -> usize {
        self.shared.workers.lock().live
    }

    /// Highest live worker count seen.
    pub fn largest_pool_size(&self) -> usize {
        self.shared.workers.lock().largest
    }

    /// Tasks that ran to the end, panics included.
    pub fn completed_task_count(&self) -> u64 {
        self.shared.completed.load(Ordering::Relaxed)
    }

    /// Stop admission. Queued tasks still run.
    pub fn shutdown(&self) {
        if !self.shared.shutdown.swap(true, Ordering::AcqRel) {
            debug!("thread pool shutting down");
        }
        self.shared.queue.close();
        let workers = self.shared.workers.lock();
        if workers.live == 0 {
            self.shared.terminated.notify_all();
        }
    }

    /// Stop admission and hand back every task that never started.
    pub fn shutdown_now(&self) -> Vec<TimedTask> {
        self.shutdown();
        let pending = self.shared.queue.drain();
        self.shared.queue.wake_all();
        pending
    }

    /// Admission has stopped.
    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Shut down with no live workers left.
    pub fn is_terminated(&self) -> bool {
        self.is_shutdown() && self.pool_size() == 0
    }

    /// Wait for every worker to exit after shutdown. Returns whether the pool
    /// terminated within `timeout`.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut workers = self.shared.workers.lock();
        while !(self.is_shutdown() && workers.live == 0) {
            if self
                .shared
                .terminated
                .wait_until(&mut workers, deadline)
                .timed_out()
            {
                return self.is_shutdown() && workers.live == 0;
            }
        }
        true
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("core", &self.core_pool_size())
            .field("max", &self.maximum_pool_size())
            .field("queued", &self.shared.queue.len())
            .field("shutdown", &self.is_shutdown())
            .finish_non_exhaustive()
    }
}
