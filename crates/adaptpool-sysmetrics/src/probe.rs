//! Raw host readings.

use std::path::{Path, PathBuf};

use sysinfo::{CpuRefreshKind, MemoryRefreshKind, Networks, RefreshKind, System};

use crate::cpu::CpuTicks;
use crate::error::{SampleError, SampleResult};
use crate::io::{DiskTotals, IoCounters};

/// Physical memory at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryReading {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl MemoryReading {
    /// Used share of total memory, in [0, 1].
    pub fn used_fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        let used = self.total_bytes.saturating_sub(self.available_bytes);
        (used as f64 / self.total_bytes as f64).clamp(0.0, 1.0)
    }
}

/// Source of raw CPU, memory and I/O counters.
pub trait SystemProbe: Send {
    /// Cumulative tick counters. Usage is derived from two calls.
    fn cpu_ticks(&mut self) -> SampleResult<CpuTicks>;

    fn memory(&mut self) -> SampleResult<MemoryReading>;

    fn logical_cpus(&mut self) -> usize;

    /// One-minute load average, zero where unsupported.
    fn load_average(&mut self) -> f64;

    /// Cumulative disk and network byte counters. Rates are derived from
    /// two calls; the default reports no I/O at all.
    fn io_counters(&mut self) -> SampleResult<IoCounters> {
        Ok(IoCounters::default())
    }
}

/// Ticks per synthesised reading on hosts without `/proc/stat`.
const SYNTHETIC_TICKS: u64 = 10_000;

/// Probe backed by the running host.
///
/// CPU ticks come from `/proc/stat` on Linux. Elsewhere they are
/// synthesised from the usage `sysinfo` reports, so the same delta math
/// applies everywhere. Disk bytes come from `/proc/diskstats` when present
/// and network bytes from `sysinfo` interface totals.
pub struct HostProbe {
    system: System,
    networks: Networks,
    proc_stat: Option<PathBuf>,
    proc_diskstats: Option<PathBuf>,
    synthetic: CpuTicks,
}

impl HostProbe {
    pub fn new() -> Self {
        let linux = cfg!(target_os = "linux");
        Self::with_proc_stat_path(linux.then(|| PathBuf::from("/proc/stat")))
            .with_diskstats_path(linux.then(|| PathBuf::from("/proc/diskstats")))
    }

    /// Read ticks from `path` instead of the default location; `None`
    /// forces synthesised ticks.
    pub fn with_proc_stat_path(path: Option<PathBuf>) -> Self {
        let system = System::new_with_specifics(
            RefreshKind::new()
                .with_cpu(CpuRefreshKind::new().with_cpu_usage())
                .with_memory(MemoryRefreshKind::everything()),
        );
        Self {
            system,
            networks: Networks::new_with_refreshed_list(),
            proc_stat: path,
            proc_diskstats: None,
            synthetic: CpuTicks::default(),
        }
    }

    /// Read disk counters from `path`; `None` reports zero disk I/O.
    pub fn with_diskstats_path(mut self, path: Option<PathBuf>) -> Self {
        self.proc_diskstats = path;
        self
    }

    fn disk_totals(&self) -> SampleResult<DiskTotals> {
        let Some(path) = &self.proc_diskstats else {
            return Ok(DiskTotals::default());
        };
        let content = read_source(path)?;
        DiskTotals::parse_proc_diskstats(&content)
    }

    fn synthesise_ticks(&mut self) -> CpuTicks {
        self.system.refresh_cpu_usage();
        let usage = f64::from(self.system.global_cpu_usage() / 100.0).clamp(0.0, 1.0);
        let busy = (usage * SYNTHETIC_TICKS as f64).round() as u64;
        self.synthetic.user += busy;
        self.synthetic.idle += SYNTHETIC_TICKS - busy.min(SYNTHETIC_TICKS);
        self.synthetic
    }
}

impl Default for HostProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemProbe for HostProbe {
    fn cpu_ticks(&mut self) -> SampleResult<CpuTicks> {
        match &self.proc_stat {
            Some(path) => CpuTicks::parse_proc_stat(&read_source(path)?),
            None => Ok(self.synthesise_ticks()),
        }
    }

    fn memory(&mut self) -> SampleResult<MemoryReading> {
        self.system.refresh_memory();
        let total_bytes = self.system.total_memory();
        if total_bytes == 0 {
            return Err(SampleError::Unavailable("total memory reported as zero".to_string()));
        }
        Ok(MemoryReading {
            total_bytes,
            available_bytes: self.system.available_memory(),
        })
    }

    fn logical_cpus(&mut self) -> usize {
        match self.system.cpus().len() {
            0 => std::thread::available_parallelism().map_or(1, |n| n.get()),
            n => n,
        }
    }

    fn load_average(&mut self) -> f64 {
        System::load_average().one
    }

    fn io_counters(&mut self) -> SampleResult<IoCounters> {
        let disk = self.disk_totals()?;
        self.networks.refresh();
        let (net_received_bytes, net_transmitted_bytes) = self
            .networks
            .list()
            .iter()
            .filter(|(name, _)| name.as_str() != "lo")
            .fold((0u64, 0u64), |(rx, tx), (_, data)| {
                (
                    rx.saturating_add(data.total_received()),
                    tx.saturating_add(data.total_transmitted()),
                )
            });
        Ok(IoCounters {
            disk_read_bytes: disk.read_bytes,
            disk_written_bytes: disk.written_bytes,
            net_received_bytes,
            net_transmitted_bytes,
        })
    }
}

fn read_source(path: &Path) -> SampleResult<String> {
    std::fs::read_to_string(path).map_err(|error| SampleError::Read {
        source_name: path.display().to_string(),
        error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn memory_fraction() {
        let reading = MemoryReading {
            total_bytes: 1000,
            available_bytes: 250,
        };
        assert!((reading.used_fraction() - 0.75).abs() < 1e-9);
        assert_eq!(
            MemoryReading {
                total_bytes: 0,
                available_bytes: 0
            }
            .used_fraction(),
            0.0
        );
    }

    #[test]
    fn reads_ticks_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "cpu  10 0 20 70 0 0 0 0").unwrap();
        let mut probe = HostProbe::with_proc_stat_path(Some(file.path().to_path_buf()));
        let ticks = probe.cpu_ticks().unwrap();
        assert_eq!(ticks.total(), 100);
    }

    #[test]
    fn missing_file_is_read_error() {
        let mut probe =
            HostProbe::with_proc_stat_path(Some(PathBuf::from("/nonexistent/adaptpool/stat")));
        assert!(matches!(probe.cpu_ticks(), Err(SampleError::Read { .. })));
    }

    #[test]
    fn synthetic_ticks_advance() {
        let mut probe = HostProbe::with_proc_stat_path(None);
        let first = probe.cpu_ticks().unwrap();
        let second = probe.cpu_ticks().unwrap();
        assert_eq!(second.total() - first.total(), SYNTHETIC_TICKS);
        assert!(second.usage_since(&first).is_some());
    }

    #[test]
    fn reads_disk_bytes_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "   8       0 sda 100 0 2000 10 50 0 1000 5 0 15 15 0 0 0 0").unwrap();
        writeln!(file, "   8       1 sda1 90 0 1900 9 45 0 900 4 0 14 13 0 0 0 0").unwrap();
        let mut probe = HostProbe::with_proc_stat_path(None)
            .with_diskstats_path(Some(file.path().to_path_buf()));
        let counters = probe.io_counters().unwrap();
        assert_eq!(counters.disk_read_bytes, 2000 * 512);
        assert_eq!(counters.disk_written_bytes, 1000 * 512);
    }

    #[test]
    fn missing_diskstats_is_read_error() {
        let mut probe = HostProbe::with_proc_stat_path(None)
            .with_diskstats_path(Some(PathBuf::from("/nonexistent/adaptpool/diskstats")));
        assert!(matches!(probe.io_counters(), Err(SampleError::Read { .. })));
    }

    #[test]
    fn host_reports_cpus() {
        assert!(HostProbe::new().logical_cpus() >= 1);
    }
}
