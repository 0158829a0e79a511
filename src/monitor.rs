//! System resource monitoring
//!
//! A 100k-transition replay memory of stacked frames is the largest
//! allocation in a run by far. The monitor watches system memory while
//! training and warns once whenever usage crosses the configured
//! threshold, instead of letting the OOM killer explain it later.

use sysinfo::System;

/// Memory-usage watchdog.
#[derive(Debug)]
pub struct MemoryMonitor {
    system: System,
    threshold_percent: f64,
    warned: bool,
}

impl MemoryMonitor {
    /// Create a monitor warning above `threshold_percent` of system memory.
    pub fn new(threshold_percent: f64) -> Self {
        Self { system: System::new(), threshold_percent, warned: false }
    }

    /// Current system memory usage in percent.
    pub fn usage_percent(&mut self) -> f64 {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return 0.0;
        }
        self.system.used_memory() as f64 / total as f64 * 100.0
    }

    /// Refresh usage and warn once per threshold crossing.
    pub fn check(&mut self) -> f64 {
        let usage = self.usage_percent();
        if usage >= self.threshold_percent {
            if !self.warned {
                tracing::warn!(
                    usage = format!("{usage:.1}%"),
                    threshold = format!("{:.1}%", self.threshold_percent),
                    "system memory above threshold; consider a smaller replay capacity"
                );
                self.warned = true;
            }
        } else {
            self.warned = false;
        }
        usage
    }
}

/// Static host facts for run reports.
#[derive(Debug, Clone)]
pub struct SystemInfo {
    /// Host name, if known
    pub host: Option<String>,
    /// OS name and version, if known
    pub os: Option<String>,
    /// Logical CPU count
    pub cpus: usize,
    /// Total system memory in GiB
    pub total_memory_gib: f64,
}

/// Snapshot the host for a report.
pub fn system_info() -> SystemInfo {
    let mut system = System::new();
    system.refresh_memory();
    system.refresh_cpu_all();

    SystemInfo {
        host: System::host_name(),
        os: System::long_os_version(),
        cpus: system.cpus().len(),
        total_memory_gib: system.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0),
    }
}
