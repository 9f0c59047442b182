//! adaptpool-autoscale: self-tuning of worker pool bounds.
//!
//! Consumes [`PoolMetrics`](adaptpool_core::PoolMetrics) and the latest
//! [`SystemSample`](adaptpool_sysmetrics::SystemSample), decides whether a
//! pool should grow or shrink, and applies the decision under a
//! single-flight lock with a cooldown between changes.
//!
//! # Policy
//!
//! ```text
//! host unhealthy (cpu >= max_cpu or mem >= max_mem):
//!     no expansion, slow-start kept, fall through to shrink
//!
//! queue_usage > 0.8 or ewma_wait > threshold:
//!     overloads += 1
//!     factor = min(8, 2^(overloads - 1))         // 1, 2, 4, 8, 8, ...
//!     core' = min(core_ceiling, core + core_step * factor)
//!     max'  = max(core', min(max_ceiling, max + max_step * factor))
//!     ExpandMax if active >= 0.9 * max, else ExpandCore
//!
//! host cpu < 0.3 and active < 0.3 * core:        // trusted at once
//!     ShrinkCore
//! queue empty and active < core / 2, 3 cycles in a row:
//!     ShrinkCore
//!
//! shrink: x' = max(initial_x, ceil(x * 0.5)) for core, max, queue
//! ```
//!
//! Shrinking also requires queue usage below 0.4, so occupancy between the
//! two thresholds never changes anything.

pub mod adaptive;
pub mod control;
pub mod decision;
pub mod engine;

pub use adaptive::AdaptivePool;
pub use control::PoolControl;
pub use decision::{
    AdjustmentDecision, AdjustmentState, DecisionInputs, ResizeTarget, decide, growth_factor,
};
pub use engine::{AdjustOutcome, AdjustmentEngine};
