//! One host-level reading.

use serde::{Deserialize, Serialize};

/// CPU, memory and I/O pressure at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSample {
    /// Busy fraction of all CPUs over the last interval, in [0, 1].
    pub cpu_usage: f64,
    /// Used fraction of physical memory, in [0, 1].
    pub memory_used_percent: f64,

    pub cpu_user: f64,
    pub cpu_system: f64,
    pub cpu_iowait: f64,
    pub cpu_idle: f64,
    pub logical_cpus: usize,
    /// One-minute load average; zero where the platform has none.
    pub load_average: f64,
    pub memory_total_bytes: u64,
    pub memory_available_bytes: u64,
    /// Disk and network throughput over the last interval, in bytes per
    /// second. Zero on the first I/O reading and after a counter reset.
    #[serde(default)]
    pub disk_read_bytes_per_sec: f64,
    #[serde(default)]
    pub disk_write_bytes_per_sec: f64,
    #[serde(default)]
    pub net_receive_bytes_per_sec: f64,
    #[serde(default)]
    pub net_send_bytes_per_sec: f64,
    /// Epoch milliseconds when the sample was published.
    pub taken_at_ms: u64,
}

impl SystemSample {
    /// Both readings strictly below their ceilings.
    pub fn is_healthy(&self, max_cpu: f64, max_memory: f64) -> bool {
        self.cpu_usage < max_cpu && self.memory_used_percent < max_memory
    }

    /// A sample carrying only the two headline readings.
    pub fn basic(cpu_usage: f64, memory_used_percent: f64) -> Self {
        Self {
            cpu_usage,
            memory_used_percent,
            cpu_user: 0.0,
            cpu_system: 0.0,
            cpu_iowait: 0.0,
            cpu_idle: 1.0 - cpu_usage,
            logical_cpus: 0,
            load_average: 0.0,
            memory_total_bytes: 0,
            memory_available_bytes: 0,
            disk_read_bytes_per_sec: 0.0,
            disk_write_bytes_per_sec: 0.0,
            net_receive_bytes_per_sec: 0.0,
            net_send_bytes_per_sec: 0.0,
            taken_at_ms: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_requires_both_below_ceiling() {
        assert!(SystemSample::basic(0.5, 0.5).is_healthy(0.8, 0.8));
        assert!(!SystemSample::basic(0.8, 0.5).is_healthy(0.8, 0.8));
        assert!(!SystemSample::basic(0.5, 0.95).is_healthy(0.8, 0.8));
    }

    #[test]
    fn serializes_as_json_line() {
        let json = serde_json::to_string(&SystemSample::basic(0.25, 0.5)).unwrap();
        assert!(json.contains("\"cpu_usage\":0.25"));
        let back: SystemSample = serde_json::from_str(&json).unwrap();
        assert_eq!(back.memory_used_percent, 0.5);
    }

    #[test]
    fn io_rates_default_when_absent() {
        let json = r#"{"cpu_usage":0.2,"memory_used_percent":0.4,"cpu_user":0.1,"cpu_system":0.1,
            "cpu_iowait":0.0,"cpu_idle":0.8,"logical_cpus":2,"load_average":0.5,
            "memory_total_bytes":100,"memory_available_bytes":60,"taken_at_ms":1}"#;
        let sample: SystemSample = serde_json::from_str(json).unwrap();
        assert_eq!(sample.disk_read_bytes_per_sec, 0.0);
        assert_eq!(sample.net_send_bytes_per_sec, 0.0);
    }
}
