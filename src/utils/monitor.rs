#[cfg(feature = "cli")]
use sysinfo::{Pid, RefreshKind, System};
use serde::Serialize;
use std::time::{Duration, Instant};

/// Wall time spent in one pipeline stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageTiming {
    pub stage: &'static str,
    pub elapsed_ms: u64,
}

/// Per-request stage clock. Timings are always collected; process memory
/// sampling only happens when monitoring was requested.
pub struct StageMonitor {
    enabled: bool,
    started: Instant,
    last_mark: Instant,
    timings: Vec<StageTiming>,
    #[cfg(feature = "cli")]
    probe: Option<MemoryProbe>,
}

#[cfg(feature = "cli")]
struct MemoryProbe {
    system: System,
    pid: Pid,
    peak_memory_mb: u64,
}

#[cfg(feature = "cli")]
impl MemoryProbe {
    fn new() -> Option<Self> {
        let pid = sysinfo::get_current_pid().ok()?;
        let mut system = System::new_with_specifics(RefreshKind::everything());
        system.refresh_all();
        Some(Self {
            system,
            pid,
            peak_memory_mb: 0,
        })
    }

    fn sample(&mut self) -> Option<(u64, u64)> {
        self.system.refresh_all();
        let process = self.system.process(self.pid)?;
        let memory_mb = process.memory() / 1024 / 1024;
        if memory_mb > self.peak_memory_mb {
            self.peak_memory_mb = memory_mb;
        }
        Some((memory_mb, self.peak_memory_mb))
    }
}

impl StageMonitor {
    pub fn new(enabled: bool) -> Self {
        let now = Instant::now();
        Self {
            enabled,
            started: now,
            last_mark: now,
            timings: Vec::new(),
            #[cfg(feature = "cli")]
            probe: if enabled { MemoryProbe::new() } else { None },
        }
    }

    /// Closes the current stage under `stage` and starts the next one.
    pub fn mark(&mut self, stage: &'static str) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_mark);
        self.last_mark = now;
        self.timings.push(StageTiming {
            stage,
            elapsed_ms: elapsed.as_millis() as u64,
        });

        tracing::debug!(stage, elapsed_ms = elapsed.as_millis() as u64, "stage finished");
        if self.enabled {
            self.log_memory(stage, elapsed);
        }
    }

    #[cfg(feature = "cli")]
    fn log_memory(&mut self, stage: &str, elapsed: Duration) {
        if let Some((memory_mb, peak_mb)) = self.probe.as_mut().and_then(MemoryProbe::sample) {
            tracing::info!(
                "📊 {} - Memory: {}MB, Peak: {}MB, Time: {:?}",
                stage,
                memory_mb,
                peak_mb,
                elapsed
            );
        }
    }

    #[cfg(not(feature = "cli"))]
    fn log_memory(&mut self, stage: &str, elapsed: Duration) {
        tracing::info!("📊 {} - Time: {:?}", stage, elapsed);
    }

    pub fn total_elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn into_timings(self) -> Vec<StageTiming> {
        if self.enabled {
            tracing::info!("📊 Final Stats - Total Time: {:?}", self.started.elapsed());
        }
        self.timings
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Default for StageMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}
