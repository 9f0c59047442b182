//! The process-wide sampler loop and its single latest-sample slot.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cpu::CpuTicks;
use crate::error::SampleResult;
use crate::io::{IoCounters, IoRates};
use crate::probe::{HostProbe, SystemProbe};
use crate::sample::SystemSample;

/// Anything that can hand out the most recent host sample without blocking.
pub trait SampleSource: Send + Sync {
    /// `None` until a first sample has been published.
    fn latest_sample(&self) -> Option<SystemSample>;
}

struct ProbeState {
    probe: Box<dyn SystemProbe>,
    previous: Option<CpuTicks>,
    previous_io: Option<(IoCounters, Instant)>,
}

impl ProbeState {
    /// Rates since the last I/O reading. I/O failures never fail the tick;
    /// they report zero and leave the baseline alone.
    fn io_rates(&mut self) -> IoRates {
        let counters = match self.probe.io_counters() {
            Ok(counters) => counters,
            Err(e) => {
                debug!(error = %e, "io counters unavailable");
                return IoRates::default();
            }
        };
        let now = Instant::now();
        let rates = self
            .previous_io
            .and_then(|(earlier, at)| counters.rates_since(&earlier, now.duration_since(at)));
        self.previous_io = Some((counters, now));
        rates.unwrap_or_default()
    }
}

/// Samples host CPU, memory and I/O on a fixed interval and publishes the latest
/// reading into one shared slot.
///
/// One instance feeds every pool in the process. CPU usage is the delta
/// between consecutive tick readings, so the first tick only primes the
/// baseline and publishes nothing.
pub struct SystemMetricsSampler {
    state: Mutex<ProbeState>,
    interval: Duration,
    latest: RwLock<Option<SystemSample>>,
    published: AtomicU64,
    failures: AtomicU64,
}

impl SystemMetricsSampler {
    pub fn new(probe: impl SystemProbe + 'static, interval: Duration) -> Self {
        Self {
            state: Mutex::new(ProbeState {
                probe: Box::new(probe),
                previous: None,
                previous_io: None,
            }),
            interval,
            latest: RwLock::new(None),
            published: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Sampler over the running host.
    pub fn host(interval: Duration) -> Self {
        Self::new(HostProbe::new(), interval)
    }

    /// Time between ticks of [`run`](Self::run).
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Take one measurement and publish it if a CPU delta is available.
    pub fn tick(&self) -> SampleResult<Option<SystemSample>> {
        let mut state = self.state.lock();
        let ticks = state.probe.cpu_ticks()?;
        let memory = state.probe.memory()?;

        let io = state.io_rates();

        let Some(previous) = state.previous else {
            state.previous = Some(ticks);
            debug!("cpu baseline primed");
            return Ok(None);
        };
        let Some(cpu) = ticks.usage_since(&previous) else {
            // Counters reset or no time elapsed; rebase on a reset only.
            if ticks.total() < previous.total() {
                state.previous = Some(ticks);
            }
            return Ok(None);
        };
        state.previous = Some(ticks);

        let sample = SystemSample {
            cpu_usage: cpu.usage,
            memory_used_percent: memory.used_fraction(),
            cpu_user: cpu.user,
            cpu_system: cpu.system,
            cpu_iowait: cpu.iowait,
            cpu_idle: cpu.idle,
            logical_cpus: state.probe.logical_cpus(),
            load_average: state.probe.load_average(),
            memory_total_bytes: memory.total_bytes,
            memory_available_bytes: memory.available_bytes,
            disk_read_bytes_per_sec: io.disk_read_bytes_per_sec,
            disk_write_bytes_per_sec: io.disk_write_bytes_per_sec,
            net_receive_bytes_per_sec: io.net_receive_bytes_per_sec,
            net_send_bytes_per_sec: io.net_send_bytes_per_sec,
            taken_at_ms: epoch_millis(),
        };
        drop(state);

        *self.latest.write() = Some(sample.clone());
        self.published.fetch_add(1, Ordering::Relaxed);
        debug!(
            cpu = sample.cpu_usage,
            memory = sample.memory_used_percent,
            "system sample published"
        );
        Ok(Some(sample))
    }

    /// Tick, swallowing and counting any failure, panics included.
    fn guarded_tick(&self) {
        match panic::catch_unwind(AssertUnwindSafe(|| self.tick())) {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "system sample failed");
            }
            Err(_) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!("system probe panicked");
            }
        }
    }

    /// Run the sampling loop until shutdown signal.
    ///
    /// Probes read files and query the OS, so every tick runs on the
    /// blocking pool rather than on the runtime's worker threads.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            "system metrics sampler started"
        );
        self.blocking_tick().await;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    self.blocking_tick().await;
                }
                _ = shutdown.changed() => {
                    info!("system metrics sampler shutting down");
                    break;
                }
            }
        }
    }

    async fn blocking_tick(self: &Arc<Self>) {
        let sampler = Arc::clone(self);
        if let Err(e) = tokio::task::spawn_blocking(move || sampler.guarded_tick()).await {
            self.failures.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, "sampler tick task failed");
        }
    }

    /// Spawn [`run`](Self::run) on the current tokio runtime.
    pub fn start(self: &Arc<Self>) -> SamplerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(Arc::clone(self).run(shutdown_rx));
        SamplerHandle {
            shutdown: shutdown_tx,
            task,
        }
    }

    /// Most recently published sample, if any.
    pub fn latest_sample(&self) -> Option<SystemSample> {
        self.latest.read().clone()
    }

    /// Samples published since construction.
    pub fn samples_published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Ticks that errored or panicked.
    pub fn tick_failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

impl SampleSource for SystemMetricsSampler {
    fn latest_sample(&self) -> Option<SystemSample> {
        SystemMetricsSampler::latest_sample(self)
    }
}

/// Stops a sampler started with [`SystemMetricsSampler::start`].
pub struct SamplerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SamplerHandle {
    /// Signal the loop and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "sampler task ended abnormally");
        }
    }
}

/// A sample slot set by hand, for embedding without a live sampler.
#[derive(Debug, Default)]
pub struct ManualSampleSource {
    sample: RwLock<Option<SystemSample>>,
}

impl ManualSampleSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the held sample.
    pub fn set(&self, sample: SystemSample) {
        *self.sample.write() = Some(sample);
    }

    /// Drop the held sample so readers see none.
    pub fn clear(&self) {
        *self.sample.write() = None;
    }
}

impl SampleSource for ManualSampleSource {
    fn latest_sample(&self) -> Option<SystemSample> {
        self.sample.read().clone()
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
