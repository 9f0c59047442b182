//! Tasks carrying their own timestamps.
//!
//! Every submitted job is wrapped in a [`TimedTask`] stamped with its
//! submission instant. The worker that dequeues it stamps the start instant
//! on the same value, so timing data travels with the task instead of
//! living in per-thread slots.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use tokio::sync::oneshot;

use crate::clock::millis_between;
use crate::error::{PoolError, PoolResult};

/// A unit of work accepted by the executor.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Timestamps of one task, handed to interceptors by reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskTiming {
    pub submitted_at: Instant,
    pub started_at: Option<Instant>,
}

impl TaskTiming {
    /// Time spent queued, in milliseconds. Zero until the task has started.
    pub fn wait_ms(&self) -> f64 {
        self.started_at
            .map(|started| millis_between(self.submitted_at, started))
            .unwrap_or(0.0)
    }

    /// Time since the task started running, in milliseconds.
    pub fn run_ms(&self, now: Instant) -> f64 {
        self.started_at
            .map(|started| millis_between(started, now))
            .unwrap_or(0.0)
    }
}

/// A job plus its timing record.
pub struct TimedTask {
    job: Job,
    timing: TaskTiming,
}

impl TimedTask {
    pub fn new(job: Job, submitted_at: Instant) -> Self {
        Self {
            job,
            timing: TaskTiming {
                submitted_at,
                started_at: None,
            },
        }
    }

    pub fn timing(&self) -> &TaskTiming {
        &self.timing
    }

    /// Record the dequeue instant.
    pub fn mark_started(&mut self, now: Instant) {
        self.timing.started_at = Some(now);
    }

    /// Separate the job from its timing record.
    pub fn into_parts(self) -> (Job, TaskTiming) {
        (self.job, self.timing)
    }

    /// Run the job on the current thread, skipping any hooks.
    pub fn run(self) {
        (self.job)()
    }
}

impl fmt::Debug for TimedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimedTask")
            .field("timing", &self.timing)
            .finish_non_exhaustive()
    }
}

type Outcome<R> = Result<R, String>;

/// Receiving side of a submitted task's result.
///
/// Wait with [`join`](Self::join) from a plain thread, or `.await` it from
/// async code. A task that was discarded or drained by `shutdown_now`
/// resolves to [`PoolError::Cancelled`]; a panicking task to
/// [`PoolError::TaskPanicked`].
pub struct TaskHandle<R> {
    rx: oneshot::Receiver<Outcome<R>>,
}

impl<R> TaskHandle<R> {
    /// Block the current thread until the task finishes. Must not be
    /// called from inside an async runtime.
    pub fn join(self) -> PoolResult<R> {
        resolve(self.rx.blocking_recv())
    }

    /// Result if the task already finished, without waiting.
    pub fn try_result(&mut self) -> Option<PoolResult<R>> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(resolve(Ok(outcome))),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(PoolError::Cancelled)),
        }
    }
}

impl<R> Future for TaskHandle<R> {
    type Output = PoolResult<R>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(resolve)
    }
}

impl<R> fmt::Debug for TaskHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle").finish_non_exhaustive()
    }
}

fn resolve<R>(received: Result<Outcome<R>, oneshot::error::RecvError>) -> PoolResult<R> {
    match received {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(message)) => Err(PoolError::TaskPanicked(message)),
        Err(_) => Err(PoolError::Cancelled),
    }
}

/// Wrap a result-producing closure as a [`Job`] and the handle that
/// receives its outcome.
///
/// A panic is reported to the handle and then resumed, so the worker still
/// sees the task as panicked.
pub fn job_with_handle<F, R>(f: F) -> (Job, TaskHandle<R>)
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let job: Job = Box::new(move || match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => {
            let _ = tx.send(Ok(value));
        }
        Err(payload) => {
            let _ = tx.send(Err(panic_message(payload.as_ref())));
            panic::resume_unwind(payload);
        }
    });
    (job, TaskHandle { rx })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn wait_and_run_times() {
        let clock = ManualClock::new();
        let mut task = TimedTask::new(Box::new(|| {}), clock.now());
        assert_eq!(task.timing().wait_ms(), 0.0);

        clock.advance(Duration::from_millis(30));
        task.mark_started(clock.now());
        clock.advance(Duration::from_millis(70));

        assert_eq!(task.timing().wait_ms(), 30.0);
        assert_eq!(task.timing().run_ms(clock.now()), 70.0);
    }

    #[test]
    fn run_invokes_job() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        TimedTask::new(Box::new(move || flag.store(true, Ordering::SeqCst)), Instant::now()).run();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn handle_receives_value() {
        let (job, handle) = job_with_handle(|| 6 * 7);
        job();
        assert_eq!(handle.join(), Ok(42));
    }

    #[test]
    fn dropped_job_cancels_handle() {
        let (job, mut handle) = job_with_handle(|| "never");
        assert_eq!(handle.try_result(), None);
        drop(job);
        assert_eq!(handle.try_result(), Some(Err(PoolError::Cancelled)));
    }

    #[test]
    fn panic_reaches_handle_and_unwinds() {
        let (job, handle) = job_with_handle(|| -> u8 { panic!("boom") });
        let unwound = std::panic::catch_unwind(AssertUnwindSafe(job)).is_err();
        assert!(unwound);
        assert_eq!(handle.join(), Err(PoolError::TaskPanicked("boom".to_string())));
    }
}
