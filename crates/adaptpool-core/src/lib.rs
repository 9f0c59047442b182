//! adaptpool-core: instrumented, live-resizable worker pool.
//!
//! A [`WorkerPool`] wraps a bounded [`ThreadPool`] and watches it through a
//! [`TaskInterceptor`]: every task carries its own submit/start timestamps,
//! and the interceptor folds them into two EWMA signals while counting
//! active tasks. Bounds (core, max, queue capacity) can change while tasks
//! are running.
//!
//! # Architecture
//!
//! ```text
//!   execute(f) ──► TimedTask{submitted_at}
//!                     │
//!                     ▼
//!   ┌────────────────────────────────────────┐
//!   │ ThreadPool                             │
//!   │   workers ◄── ResizableBoundedQueue    │
//!   │      │             │ full + at max     │
//!   │      │             ▼                   │
//!   │      │       RejectionTracker ─► policy│
//!   └──────┼─────────────────────────────────┘
//!          ▼
//!   Instruments (TaskInterceptor)
//!     before: queue-wait EWMA, active += 1
//!     after:  task-time EWMA,  active -= 1, CompletionHook (auto mode)
//! ```
//!
//! The self-tuning engine that reacts to these signals lives in
//! `adaptpool-autoscale`.

pub mod clock;
pub mod config;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod pool;
pub mod queue;
pub mod rejection;
pub mod task;

pub use clock::{Clock, ManualClock, SystemClock, system_clock};
pub use config::{AdjustMode, AutoAdjustConfig, PoolConfig};
pub use error::{PoolError, PoolResult};
pub use executor::{NamedThreadFactory, TaskInterceptor, ThreadFactory, ThreadPool, ThreadPoolBuilder};
pub use metrics::{ALPHA, Ewma, PoolBounds, PoolMetrics};
pub use pool::{CompletionHook, WorkerPool, WorkerPoolBuilder};
pub use queue::ResizableBoundedQueue;
pub use rejection::{
    AbortPolicy, BlockPolicy, CallerRunsPolicy, DiscardOldestPolicy, DiscardPolicy,
    RejectionPolicy, RejectionTracker, policy_by_name,
};
pub use task::{Job, TaskHandle, TaskTiming, TimedTask, job_with_handle};
