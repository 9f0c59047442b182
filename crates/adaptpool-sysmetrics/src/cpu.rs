//! Cumulative CPU tick counters and usage derived from two readings.

use serde::{Deserialize, Serialize};

use crate::error::{SampleError, SampleResult};

/// Aggregate CPU time counters, in ticks since boot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuTicks {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

/// Fractions of CPU time spent between two readings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CpuUsage {
    /// (user + system + iowait) / total.
    pub usage: f64,
    pub user: f64,
    pub system: f64,
    pub iowait: f64,
    pub idle: f64,
}

impl CpuTicks {
    /// Sum of every tick column.
    pub fn total(&self) -> u64 {
        self.user
            .saturating_add(self.nice)
            .saturating_add(self.system)
            .saturating_add(self.idle)
            .saturating_add(self.iowait)
            .saturating_add(self.irq)
            .saturating_add(self.softirq)
            .saturating_add(self.steal)
    }

    /// Parse the aggregate `cpu` line of `/proc/stat`.
    ///
    /// Older kernels report fewer columns; missing ones read as zero.
    pub fn parse_proc_stat(content: &str) -> SampleResult<Self> {
        let line = content
            .lines()
            .find(|l| l.split_whitespace().next() == Some("cpu"))
            .ok_or_else(|| SampleError::Parse("no aggregate cpu line".to_string()))?;

        let values = line
            .split_whitespace()
            .skip(1)
            .take(8)
            .map(|field| {
                field
                    .parse::<u64>()
                    .map_err(|e| SampleError::Parse(format!("field {field:?}: {e}")))
            })
            .collect::<SampleResult<Vec<u64>>>()?;
        if values.len() < 4 {
            return Err(SampleError::Parse(format!(
                "expected at least 4 counters, got {}",
                values.len()
            )));
        }
        let at = |i: usize| values.get(i).copied().unwrap_or(0);

        Ok(Self {
            user: at(0),
            nice: at(1),
            system: at(2),
            idle: at(3),
            iowait: at(4),
            irq: at(5),
            softirq: at(6),
            steal: at(7),
        })
    }

    /// Usage over the interval from `earlier` to `self`.
    ///
    /// `None` when no ticks elapsed or the counters went backwards.
    pub fn usage_since(&self, earlier: &CpuTicks) -> Option<CpuUsage> {
        let total = self.total().checked_sub(earlier.total())?;
        if total == 0 {
            return None;
        }
        let delta = |now: u64, then: u64| now.saturating_sub(then) as f64;
        let user = delta(self.user, earlier.user);
        let system = delta(self.system, earlier.system);
        let iowait = delta(self.iowait, earlier.iowait);
        let idle = delta(self.idle, earlier.idle);
        let total = total as f64;

        Some(CpuUsage {
            usage: ((user + system + iowait) / total).clamp(0.0, 1.0),
            user: user / total,
            system: system / total,
            iowait: iowait / total,
            idle: idle / total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROC_STAT: &str = "\
cpu  4705 356 584 3699 23 23 0 0 0 0
cpu0 1393 280 404 1799 10 12 0 0 0 0
intr 114930548 113199788 3 0 5 263 0 4 [... lots more numbers ...]
ctxt 1990473
";

    #[test]
    fn parses_aggregate_line() {
        let ticks = CpuTicks::parse_proc_stat(PROC_STAT).unwrap();
        assert_eq!(ticks.user, 4705);
        assert_eq!(ticks.nice, 356);
        assert_eq!(ticks.system, 584);
        assert_eq!(ticks.idle, 3699);
        assert_eq!(ticks.iowait, 23);
        assert_eq!(ticks.total(), 4705 + 356 + 584 + 3699 + 23 + 23);
    }

    #[test]
    fn short_line_pads_with_zero() {
        let ticks = CpuTicks::parse_proc_stat("cpu 10 0 5 85\n").unwrap();
        assert_eq!(ticks.iowait, 0);
        assert_eq!(ticks.total(), 100);
    }

    #[test]
    fn rejects_garbage() {
        assert!(CpuTicks::parse_proc_stat("").is_err());
        assert!(CpuTicks::parse_proc_stat("cpu 1 2").is_err());
        assert!(CpuTicks::parse_proc_stat("cpu a b c d").is_err());
    }

    #[test]
    fn usage_counts_user_system_iowait() {
        let earlier = CpuTicks {
            user: 100,
            system: 50,
            idle: 800,
            iowait: 50,
            ..Default::default()
        };
        let later = CpuTicks {
            user: 130,
            system: 60,
            idle: 850,
            iowait: 60,
            ..Default::default()
        };
        let usage = later.usage_since(&earlier).unwrap();
        assert!((usage.usage - 0.5).abs() < 1e-9);
        assert!((usage.user - 0.3).abs() < 1e-9);
        assert!((usage.idle - 0.5).abs() < 1e-9);
    }

    #[test]
    fn no_elapsed_ticks_is_none() {
        let ticks = CpuTicks::parse_proc_stat(PROC_STAT).unwrap();
        assert!(ticks.usage_since(&ticks).is_none());
        let earlier = CpuTicks {
            user: u64::MAX / 2,
            ..Default::default()
        };
        assert!(ticks.usage_since(&earlier).is_none());
    }
}
