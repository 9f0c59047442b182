//! Disk and network byte counters.
//!
//! Both are cumulative since boot. Rates come from the delta between two
//! readings divided by the wall time between them.

use std::time::Duration;

use crate::error::{SampleError, SampleResult};

/// Bytes per sector in `/proc/diskstats`, fixed by the kernel regardless of
/// the device's physical sector size.
const DISKSTATS_SECTOR_BYTES: u64 = 512;

/// Device name prefixes that mirror or shadow real disks.
const VIRTUAL_DEVICE_PREFIXES: &[&str] = &["loop", "ram", "zram", "dm-", "md", "sr", "fd"];

/// Cumulative I/O byte counters at one instant.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IoCounters {
    pub disk_read_bytes: u64,
    pub disk_written_bytes: u64,
    pub net_received_bytes: u64,
    pub net_transmitted_bytes: u64,
}

/// Bytes per second over one interval.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct IoRates {
    pub disk_read_bytes_per_sec: f64,
    pub disk_write_bytes_per_sec: f64,
    pub net_receive_bytes_per_sec: f64,
    pub net_send_bytes_per_sec: f64,
}

/// Whole-disk totals parsed from `/proc/diskstats`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DiskTotals {
    pub read_bytes: u64,
    pub written_bytes: u64,
}

impl DiskTotals {
    /// Sum sectors read and written over physical whole disks.
    ///
    /// Partitions and virtual devices are skipped so no I/O is counted
    /// twice. Lines with fewer than ten columns are malformed.
    pub fn parse_proc_diskstats(content: &str) -> SampleResult<Self> {
        let mut totals = DiskTotals::default();
        for line in content.lines() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.is_empty() {
                continue;
            }
            if fields.len() < 10 {
                return Err(SampleError::Parse(format!("short diskstats line: {line}")));
            }
            let name = fields[2];
            if !is_whole_disk(name) {
                continue;
            }
            let sectors = |idx: usize| -> SampleResult<u64> {
                fields[idx].parse::<u64>().map_err(|e| {
                    SampleError::Parse(format!("diskstats {name} column {idx}: {e}"))
                })
            };
            totals.read_bytes = totals
                .read_bytes
                .saturating_add(sectors(5)?.saturating_mul(DISKSTATS_SECTOR_BYTES));
            totals.written_bytes = totals
                .written_bytes
                .saturating_add(sectors(9)?.saturating_mul(DISKSTATS_SECTOR_BYTES));
        }
        Ok(totals)
    }
}

fn is_whole_disk(name: &str) -> bool {
    if VIRTUAL_DEVICE_PREFIXES.iter().any(|p| name.starts_with(p)) {
        return false;
    }
    // nvme0n1p2, mmcblk0p1
    if name.starts_with("nvme") || name.starts_with("mmcblk") {
        return match name.rfind('p') {
            Some(idx) => {
                let (head, tail) = name.split_at(idx);
                let tail = &tail[1..];
                !(head.ends_with(|c: char| c.is_ascii_digit())
                    && !tail.is_empty()
                    && tail.chars().all(|c| c.is_ascii_digit()))
            }
            None => true,
        };
    }
    // sda1, vdb3, xvda1
    !name.ends_with(|c: char| c.is_ascii_digit())
}

impl IoCounters {
    /// Per-second rates since `earlier`.
    ///
    /// `None` when no time has elapsed or any counter went backwards (a
    /// device or interface disappeared); the caller rebases on the newer
    /// reading.
    pub fn rates_since(&self, earlier: &IoCounters, elapsed: Duration) -> Option<IoRates> {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return None;
        }
        let delta = |now: u64, then: u64| now.checked_sub(then).map(|d| d as f64 / secs);
        Some(IoRates {
            disk_read_bytes_per_sec: delta(self.disk_read_bytes, earlier.disk_read_bytes)?,
            disk_write_bytes_per_sec: delta(self.disk_written_bytes, earlier.disk_written_bytes)?,
            net_receive_bytes_per_sec: delta(self.net_received_bytes, earlier.net_received_bytes)?,
            net_send_bytes_per_sec: delta(
                self.net_transmitted_bytes,
                earlier.net_transmitted_bytes,
            )?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DISKSTATS_BEFORE: &str = "\
   7       0 loop0 120 0 4000 30 0 0 0 0 0 40 30 0 0 0 0
 259       0 nvme0n1 5000 10 100000 900 8000 20 200000 1500 0 2000 2400 0 0 0 0
 259       1 nvme0n1p1 4900 10 99000 880 7900 20 199000 1490 0 1990 2370 0 0 0 0
   8       0 sda 100 0 2000 10 50 0 1000 5 0 15 15 0 0 0 0
   8       1 sda1 90 0 1900 9 45 0 900 4 0 14 13 0 0 0 0
 253       0 dm-0 4800 0 98000 870 7800 0 198000 1480 0 1980 2350 0 0 0 0
";

    const DISKSTATS_AFTER: &str = "\
   7       0 loop0 220 0 9000 30 0 0 0 0 0 40 30 0 0 0 0
 259       0 nvme0n1 5100 10 102048 910 8100 20 204096 1510 0 2010 2420 0 0 0 0
 259       1 nvme0n1p1 5000 10 101048 890 8000 20 203096 1500 0 2000 2390 0 0 0 0
   8       0 sda 100 0 2000 10 50 0 1000 5 0 15 15 0 0 0 0
   8       1 sda1 90 0 1900 9 45 0 900 4 0 14 13 0 0 0 0
 253       0 dm-0 4900 0 100048 880 7900 0 202096 1490 0 1990 2370 0 0 0 0
";

    #[test]
    fn sums_whole_disks_only() {
        let totals = DiskTotals::parse_proc_diskstats(DISKSTATS_BEFORE).unwrap();
        assert_eq!(totals.read_bytes, (100_000 + 2000) * 512);
        assert_eq!(totals.written_bytes, (200_000 + 1000) * 512);
    }

    #[test]
    fn diskstats_delta_gives_rates() {
        let before = DiskTotals::parse_proc_diskstats(DISKSTATS_BEFORE).unwrap();
        let after = DiskTotals::parse_proc_diskstats(DISKSTATS_AFTER).unwrap();
        let earlier = IoCounters {
            disk_read_bytes: before.read_bytes,
            disk_written_bytes: before.written_bytes,
            net_received_bytes: 10_000,
            net_transmitted_bytes: 4_000,
        };
        let later = IoCounters {
            disk_read_bytes: after.read_bytes,
            disk_written_bytes: after.written_bytes,
            net_received_bytes: 30_000,
            net_transmitted_bytes: 5_000,
        };

        let rates = later.rates_since(&earlier, Duration::from_secs(2)).unwrap();
        // 2048 sectors read and 4096 written on nvme0n1 over two seconds.
        assert_eq!(rates.disk_read_bytes_per_sec, 2048.0 * 512.0 / 2.0);
        assert_eq!(rates.disk_write_bytes_per_sec, 4096.0 * 512.0 / 2.0);
        assert_eq!(rates.net_receive_bytes_per_sec, 10_000.0);
        assert_eq!(rates.net_send_bytes_per_sec, 500.0);
    }

    #[test]
    fn backwards_counter_or_zero_elapsed_has_no_rate() {
        let earlier = IoCounters {
            net_received_bytes: 500,
            ..Default::default()
        };
        let later = IoCounters::default();
        assert!(later.rates_since(&earlier, Duration::from_secs(1)).is_none());
        assert!(earlier.rates_since(&earlier, Duration::ZERO).is_none());
    }

    #[test]
    fn partition_names() {
        for disk in ["sda", "vdb", "xvda", "nvme0n1", "nvme10n2", "mmcblk0"] {
            assert!(is_whole_disk(disk), "{disk}");
        }
        for part in ["sda1", "vdb3", "nvme0n1p2", "mmcblk0p1", "loop3", "dm-1", "md0"] {
            assert!(!is_whole_disk(part), "{part}");
        }
    }

    #[test]
    fn short_line_is_parse_error() {
        assert!(matches!(
            DiskTotals::parse_proc_diskstats("8 0 sda 1 2\n"),
            Err(SampleError::Parse(_))
        ));
        assert_eq!(DiskTotals::parse_proc_diskstats("\n").unwrap(), DiskTotals::default());
    }
}
