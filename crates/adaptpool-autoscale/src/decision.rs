//! The adjustment policy as a pure function of pool metrics, host sample,
//! tunables and the engine's running counters.

use std::fmt;
use std::time::Instant;

use adaptpool_core::{AutoAdjustConfig, PoolBounds, PoolMetrics};
use adaptpool_sysmetrics::SystemSample;

/// New bounds carried by a state-changing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeTarget {
    pub core: usize,
    pub max: usize,
    /// `None` leaves the queue capacity alone.
    pub queue_capacity: Option<usize>,
}

/// Outcome of one evaluation. Lives for one cycle only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdjustmentDecision {
    NoChange { reason: String },
    ExpandCore { target: ResizeTarget, reason: String },
    ExpandMax { target: ResizeTarget, reason: String },
    ShrinkCore { target: ResizeTarget, reason: String },
}

impl AdjustmentDecision {
    fn no_change(reason: impl Into<String>) -> Self {
        AdjustmentDecision::NoChange {
            reason: reason.into(),
        }
    }

    /// Stable snake_case label, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            AdjustmentDecision::NoChange { .. } => "no_change",
            AdjustmentDecision::ExpandCore { .. } => "expand_core",
            AdjustmentDecision::ExpandMax { .. } => "expand_max",
            AdjustmentDecision::ShrinkCore { .. } => "shrink_core",
        }
    }

    /// Why the decision was made.
    pub fn reason(&self) -> &str {
        match self {
            AdjustmentDecision::NoChange { reason }
            | AdjustmentDecision::ExpandCore { reason, .. }
            | AdjustmentDecision::ExpandMax { reason, .. }
            | AdjustmentDecision::ShrinkCore { reason, .. } => reason,
        }
    }

    /// New bounds, `None` for [`NoChange`](Self::NoChange).
    pub fn target(&self) -> Option<&ResizeTarget> {
        match self {
            AdjustmentDecision::NoChange { .. } => None,
            AdjustmentDecision::ExpandCore { target, .. }
            | AdjustmentDecision::ExpandMax { target, .. }
            | AdjustmentDecision::ShrinkCore { target, .. } => Some(target),
        }
    }

    /// Either expansion variant.
    pub fn is_expansion(&self) -> bool {
        matches!(
            self,
            AdjustmentDecision::ExpandCore { .. } | AdjustmentDecision::ExpandMax { .. }
        )
    }

    /// Anything but [`NoChange`](Self::NoChange).
    pub fn is_change(&self) -> bool {
        !matches!(self, AdjustmentDecision::NoChange { .. })
    }
}

impl fmt::Display for AdjustmentDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target() {
            Some(t) => write!(
                f,
                "{} core={} max={} queue={:?} ({})",
                self.kind(),
                t.core,
                t.max,
                t.queue_capacity,
                self.reason()
            ),
            None => write!(f, "{} ({})", self.kind(), self.reason()),
        }
    }
}

/// Counters carried between cycles. Owned by one engine, mutated only while
/// its cycle lock is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdjustmentState {
    pub consecutive_overload_count: u32,
    pub current_growth_factor: usize,
    pub consecutive_idle_count: u32,
    pub last_adjust: Option<Instant>,
}

impl Default for AdjustmentState {
    fn default() -> Self {
        Self {
            consecutive_overload_count: 0,
            current_growth_factor: 1,
            consecutive_idle_count: 0,
            last_adjust: None,
        }
    }
}

impl AdjustmentState {
    fn reset_slow_start(&mut self) {
        self.consecutive_overload_count = 0;
        self.current_growth_factor = 1;
    }
}

/// Everything one evaluation looks at.
#[derive(Debug, Clone, Copy)]
pub struct DecisionInputs<'a> {
    pub metrics: &'a PoolMetrics,
    pub sample: Option<&'a SystemSample>,
    pub initial: PoolBounds,
    /// Set when the cooldown has not expired; only the idle-system shrink
    /// may fire then.
    pub cooling_down: bool,
}

/// `min(ceiling, 2^(overloads - 1))`, never below 1.
pub fn growth_factor(consecutive_overloads: u32, ceiling: usize) -> usize {
    let exponent = consecutive_overloads.saturating_sub(1);
    let doubled = 1usize.checked_shl(exponent).unwrap_or(usize::MAX);
    doubled.min(ceiling).max(1)
}

/// Evaluate one cycle. Expansion is checked before shrink.
pub fn decide(
    state: &mut AdjustmentState,
    inputs: &DecisionInputs<'_>,
    config: &AutoAdjustConfig,
) -> AdjustmentDecision {
    let m = inputs.metrics;

    if inputs.cooling_down {
        return match idle_system_shrink(state, inputs, config) {
            Some(decision) => decision,
            None => AdjustmentDecision::no_change("cooldown"),
        };
    }

    // Expansion check. An overloaded host decides nothing here and keeps the
    // slow-start counters, but shrinking is still evaluated.
    let host_overloaded = inputs
        .sample
        .is_some_and(|sample| !sample.is_healthy(config.max_cpu_usage, config.max_memory_usage));
    if !host_overloaded {
        let queue_nearly_full = m.queue_usage() > config.queue_full_threshold;
        let wait_too_long = m.ewma_queue_wait_ms > config.queue_wait_threshold_ms;
        if queue_nearly_full || wait_too_long {
            return expand(state, m, config, queue_nearly_full, wait_too_long);
        }
        state.reset_slow_start();
    }
    let idle_reason = if host_overloaded { "system overloaded" } else { "steady" };

    // Shrink check.
    if !config.allow_shrink {
        state.consecutive_idle_count = 0;
        return AdjustmentDecision::no_change(idle_reason);
    }
    if let Some(decision) = idle_system_shrink(state, inputs, config) {
        return decision;
    }
    let below_shrink = m.queue_usage() < config.queue_shrink_threshold;
    if m.queue_size == 0 && below_shrink && (m.active_count as f64) < m.core_pool_size as f64 / 2.0
    {
        state.consecutive_idle_count += 1;
        if state.consecutive_idle_count >= config.idle_checks_threshold {
            state.consecutive_idle_count = 0;
            return shrink(state, inputs, config, "pool idle");
        }
        return AdjustmentDecision::no_change(format!(
            "idle check {}/{}",
            state.consecutive_idle_count, config.idle_checks_threshold
        ));
    }
    state.consecutive_idle_count = 0;
    AdjustmentDecision::no_change(idle_reason)
}

fn expand(
    state: &mut AdjustmentState,
    m: &PoolMetrics,
    config: &AutoAdjustConfig,
    queue_nearly_full: bool,
    wait_too_long: bool,
) -> AdjustmentDecision {
    state.consecutive_overload_count = state.consecutive_overload_count.saturating_add(1);
    let factor = growth_factor(state.consecutive_overload_count, config.slow_start_ceiling);
    state.current_growth_factor = factor;
    state.consecutive_idle_count = 0;

    let grow = |current: usize, step: usize, ceiling: usize| {
        current.max(ceiling.min(current.saturating_add(step.saturating_mul(factor))))
    };
    let core = grow(m.core_pool_size, config.core_pool_step, config.max_core_pool_size);
    let max = core.max(grow(
        m.max_pool_size,
        config.max_pool_step,
        config.max_maximum_pool_size,
    ));
    let queue_capacity = config
        .expand_queue
        .then(|| grow(m.queue_capacity, config.queue_step, config.max_queue_capacity))
        .filter(|&q| q != m.queue_capacity);

    if core == m.core_pool_size && max == m.max_pool_size && queue_capacity.is_none() {
        return AdjustmentDecision::no_change("overloaded but at expansion ceiling");
    }

    let cause = match (queue_nearly_full, wait_too_long) {
        (true, true) => "queue nearly full and wait too long",
        (true, false) => "queue nearly full",
        _ => "queue wait too long",
    };
    let reason = format!("{cause}, growth x{factor}");
    let target = ResizeTarget {
        core,
        max,
        queue_capacity,
    };
    if m.active_count as f64 >= config.expand_active_ratio * m.max_pool_size as f64 {
        AdjustmentDecision::ExpandMax { target, reason }
    } else {
        AdjustmentDecision::ExpandCore { target, reason }
    }
}

/// Low host CPU and few active threads: trusted on first observation.
fn idle_system_shrink(
    state: &mut AdjustmentState,
    inputs: &DecisionInputs<'_>,
    config: &AutoAdjustConfig,
) -> Option<AdjustmentDecision> {
    if !config.allow_shrink {
        return None;
    }
    let m = inputs.metrics;
    let sample = inputs.sample?;
    let idle = sample.cpu_usage < config.idle_cpu_threshold
        && (m.active_count as f64) < config.idle_active_ratio * m.core_pool_size as f64
        && m.queue_usage() < config.queue_shrink_threshold;
    if !idle {
        return None;
    }
    state.consecutive_idle_count = 0;
    match shrink(state, inputs, config, "system idle") {
        d @ AdjustmentDecision::ShrinkCore { .. } => Some(d),
        _ => None,
    }
}

/// Multiplicative decrease, rounded up, floored at construction-time bounds.
fn shrink(
    state: &mut AdjustmentState,
    inputs: &DecisionInputs<'_>,
    config: &AutoAdjustConfig,
    reason: &str,
) -> AdjustmentDecision {
    state.reset_slow_start();
    let m = inputs.metrics;
    let initial = inputs.initial;
    let scale = |current: usize, floor: usize| {
        let scaled = (current as f64 * config.shrink_factor).ceil() as usize;
        scaled.max(floor).min(current.max(floor))
    };
    let core = scale(m.core_pool_size, initial.core_pool_size);
    let max = scale(m.max_pool_size, initial.max_pool_size).max(core);
    let queue = scale(m.queue_capacity, initial.queue_capacity);

    if core >= m.core_pool_size && max >= m.max_pool_size && queue >= m.queue_capacity {
        return AdjustmentDecision::no_change("already at initial bounds");
    }
    AdjustmentDecision::ShrinkCore {
        target: ResizeTarget {
            core,
            max,
            queue_capacity: (queue < m.queue_capacity).then_some(queue),
        },
        reason: reason.to_string(),
    }
}
