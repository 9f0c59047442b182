//! adaptpool-sysmetrics: process-wide host pressure sampling.
//!
//! One [`SystemMetricsSampler`] per process reads CPU tick counters and
//! memory on a fixed interval and publishes a [`SystemSample`] into a
//! single latest-wins slot. Pools read that slot through [`SampleSource`]
//! and never wait on the sampler.
//!
//! ```text
//!   SystemProbe (HostProbe: /proc/stat, /proc/diskstats, sysinfo)
//!        │ every interval
//!        ▼
//!   SystemMetricsSampler ── tick: Δticks → cpu_usage, memory → used %,
//!        │                       Δbytes / Δt → disk and network rates
//!        │ publish (last write wins)
//!        ▼
//!   latest: Option<SystemSample> ◄── SampleSource::latest_sample()
//! ```
//!
//! CPU usage over an interval is `(user + system + iowait) / total` of the
//! tick deltas. Tick failures are logged and counted; the loop keeps going.

pub mod cpu;
pub mod error;
pub mod io;
pub mod probe;
pub mod sample;
pub mod sampler;

pub use cpu::{CpuTicks, CpuUsage};
pub use error::{SampleError, SampleResult};
pub use io::{DiskTotals, IoCounters, IoRates};
pub use probe::{HostProbe, MemoryReading, SystemProbe};
pub use sample::SystemSample;
pub use sampler::{ManualSampleSource, SampleSource, SamplerHandle, SystemMetricsSampler};
