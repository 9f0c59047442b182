//! The per-pool adjustment engine.
//!
//! Each completed task in auto mode calls [`AdjustmentEngine::try_adjust`],
//! which walks this state machine and returns to idle on every exit:
//!
//! ```text
//!   Idle ─► CooldownCheck ──(cooling)──────────────► Idle
//!              │
//!              ▼
//!           TryLock ──(held elsewhere)─────────────► Idle
//!              │
//!              ▼
//!           Evaluate: re-check cooldown, read metrics + latest sample
//!              │ (sample required but absent) ─────► Idle
//!              ▼
//!           Decide ─► Apply (stamp cooldown on change) ─► unlock ─► Idle
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info};

use adaptpool_core::{AutoAdjustConfig, Clock, CompletionHook, PoolResult};
use adaptpool_sysmetrics::SampleSource;

use crate::control::PoolControl;
use crate::decision::{AdjustmentDecision, AdjustmentState, DecisionInputs, decide};

/// How one adjustment attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdjustOutcome {
    /// The cooldown since the last change has not expired.
    Cooldown,
    /// Another thread is running a cycle for this pool.
    Busy,
    /// A host sample is required and none has been published yet.
    NoSample,
    /// Evaluated, nothing to change.
    Unchanged(String),
    /// A decision was applied to the pool.
    Applied(AdjustmentDecision),
    /// Deciding or applying failed; nothing was committed.
    Failed(String),
}

impl AdjustOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, AdjustOutcome::Applied(_))
    }
}

/// Single-flight controller for one pool.
pub struct AdjustmentEngine {
    pool: Arc<dyn PoolControl>,
    samples: Arc<dyn SampleSource>,
    clock: Arc<dyn Clock>,
    config: RwLock<Arc<AutoAdjustConfig>>,
    state: Mutex<AdjustmentState>,
    /// Reference point for `last_adjust_ns`.
    origin: Instant,
    /// Lock-free mirror of `state.last_adjust` for the pre-lock cooldown
    /// check: nanoseconds since `origin` plus one, zero for never.
    last_adjust_ns: AtomicU64,
    cycles: AtomicU64,
    adjustments: AtomicU64,
}

impl AdjustmentEngine {
    pub fn new(
        pool: Arc<dyn PoolControl>,
        samples: Arc<dyn SampleSource>,
        config: AutoAdjustConfig,
        clock: Arc<dyn Clock>,
    ) -> PoolResult<Self> {
        config.validate()?;
        let origin = clock.now();
        Ok(Self {
            pool,
            samples,
            clock,
            config: RwLock::new(Arc::new(config)),
            state: Mutex::new(AdjustmentState::default()),
            origin,
            last_adjust_ns: AtomicU64::new(0),
            cycles: AtomicU64::new(0),
            adjustments: AtomicU64::new(0),
        })
    }

    pub fn pool(&self) -> &Arc<dyn PoolControl> {
        &self.pool
    }

    /// The tunables the next cycle will read.
    pub fn config(&self) -> Arc<AutoAdjustConfig> {
        self.config.read().clone()
    }

    /// Swap the tunables as a whole. A running cycle keeps its copy.
    pub fn set_config(&self, config: AutoAdjustConfig) -> PoolResult<()> {
        config.validate()?;
        *self.config.write() = Arc::new(config);
        info!(pool = %self.pool.name(), "auto-adjust config replaced");
        Ok(())
    }

    /// Copy of the running counters. Waits for an in-flight cycle.
    pub fn state(&self) -> AdjustmentState {
        *self.state.lock()
    }

    /// Cycles that got past the lock and the cooldown.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Decisions that changed the pool.
    pub fn adjustments(&self) -> u64 {
        self.adjustments.load(Ordering::Relaxed)
    }

    fn cooling_down_hint(&self, now: Instant, interval: Duration) -> bool {
        match self.last_adjust_ns.load(Ordering::Acquire) {
            0 => false,
            stamp => {
                let last = self.origin + Duration::from_nanos(stamp - 1);
                now.saturating_duration_since(last) < interval
            }
        }
    }

    fn stamp(&self, now: Instant) {
        let ns = u64::try_from(now.saturating_duration_since(self.origin).as_nanos())
            .unwrap_or(u64::MAX - 1);
        self.last_adjust_ns.store(ns + 1, Ordering::Release);
    }

    /// Run one adjustment cycle if nobody else is and the cooldown allows.
    ///
    /// Never blocks: losing the lock race returns [`AdjustOutcome::Busy`]
    /// straight away and the next completion retries.
    pub fn try_adjust(&self) -> AdjustOutcome {
        let config = self.config();
        let interval = Duration::from_millis(config.adjust_interval_ms);
        let bypass = config.idle_shrink_bypasses_cooldown;

        if !bypass && self.cooling_down_hint(self.clock.now(), interval) {
            return AdjustOutcome::Cooldown;
        }
        let Some(mut state) = self.state.try_lock() else {
            return AdjustOutcome::Busy;
        };

        let now = self.clock.now();
        let cooling_down = state
            .last_adjust
            .is_some_and(|last| now.saturating_duration_since(last) < interval);
        if cooling_down && !bypass {
            return AdjustOutcome::Cooldown;
        }
        self.cycles.fetch_add(1, Ordering::Relaxed);

        let sample = self.samples.latest_sample();
        if config.use_system_metrics && sample.is_none() {
            debug!(pool = %self.pool.name(), "no system sample yet, cycle skipped");
            return AdjustOutcome::NoSample;
        }

        let current = *state;
        let evaluated = panic::catch_unwind(AssertUnwindSafe(|| {
            let metrics = self.pool.metrics();
            let inputs = DecisionInputs {
                metrics: &metrics,
                sample: sample.as_ref(),
                initial: self.pool.initial_bounds(),
                cooling_down,
            };
            let mut next = current;
            let decision = decide(&mut next, &inputs, &config);
            (next, decision)
        }));
        let Ok((next, decision)) = evaluated else {
            error!(pool = %self.pool.name(), "adjustment cycle aborted: decision panicked");
            return AdjustOutcome::Failed("decision panicked".to_string());
        };

        if !decision.is_change() {
            *state = next;
            if cooling_down {
                return AdjustOutcome::Cooldown;
            }
            debug!(pool = %self.pool.name(), reason = decision.reason(), "no adjustment");
            return AdjustOutcome::Unchanged(decision.reason().to_string());
        }

        let applied = panic::catch_unwind(AssertUnwindSafe(|| self.apply(&decision)))
            .unwrap_or_else(|_| Err(anyhow::anyhow!("pool setter panicked")));
        match applied {
            Ok(true) => {
                *state = AdjustmentState {
                    last_adjust: Some(now),
                    ..next
                };
                self.stamp(now);
                self.adjustments.fetch_add(1, Ordering::Relaxed);
                info!(
                    pool = %self.pool.name(),
                    kind = decision.kind(),
                    growth = next.current_growth_factor,
                    %decision,
                    "pool adjusted"
                );
                AdjustOutcome::Applied(decision)
            }
            Ok(false) => {
                *state = next;
                debug!(pool = %self.pool.name(), %decision, "decision already in effect");
                AdjustOutcome::Unchanged("already at target".to_string())
            }
            Err(e) => {
                let message = format!("{e:#}");
                error!(pool = %self.pool.name(), error = %message, "adjustment cycle aborted");
                AdjustOutcome::Failed(message)
            }
        }
    }

    /// Write a decision onto the pool. Returns whether anything changed.
    ///
    /// Growth writes max, core, queue and only ever upward; shrink writes
    /// core, max, queue and only ever downward. Replaying a decision that
    /// is already in effect is a no-op.
    pub fn apply(&self, decision: &AdjustmentDecision) -> anyhow::Result<bool> {
        let Some(target) = decision.target() else {
            return Ok(false);
        };
        let current = self.pool.metrics();
        let mut changed = false;

        if decision.is_expansion() {
            if target.max > current.max_pool_size {
                self.pool
                    .set_maximum_pool_size(target.max)
                    .with_context(|| format!("raising max pool size to {}", target.max))?;
                changed = true;
            }
            if target.core > current.core_pool_size {
                self.pool
                    .set_core_pool_size(target.core)
                    .with_context(|| format!("raising core pool size to {}", target.core))?;
                changed = true;
            }
            if let Some(capacity) = target.queue_capacity
                && capacity > current.queue_capacity
            {
                self.pool
                    .set_queue_capacity(capacity)
                    .with_context(|| format!("raising queue capacity to {capacity}"))?;
                changed = true;
            }
        } else {
            if target.core < current.core_pool_size {
                self.pool
                    .set_core_pool_size(target.core)
                    .with_context(|| format!("lowering core pool size to {}", target.core))?;
                changed = true;
            }
            if target.max < current.max_pool_size {
                self.pool
                    .set_maximum_pool_size(target.max)
                    .with_context(|| format!("lowering max pool size to {}", target.max))?;
                changed = true;
            }
            if let Some(capacity) = target.queue_capacity
                && capacity < current.queue_capacity
            {
                self.pool
                    .set_queue_capacity(capacity)
                    .with_context(|| format!("lowering queue capacity to {capacity}"))?;
                changed = true;
            }
        }
        Ok(changed)
    }
}

impl CompletionHook for AdjustmentEngine {
    fn on_task_completed(&self) {
        self.try_adjust();
    }
}
