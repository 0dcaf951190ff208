//! Process probes
//!
//! The sampling task reads process metrics through [`ProcessProbe`] so that
//! the operating-system backend can be swapped out.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use sysinfo::{Pid, System};

use crate::models::PerformanceSample;

/// Shared, retargetable process id.
///
/// The worker starts out monitoring its own process and retargets to a child
/// process once it spawns one.
#[derive(Clone, Debug)]
pub struct ProcessTarget {
    pid: Arc<AtomicU32>,
}

impl ProcessTarget {
    pub fn new(pid: u32) -> Self {
        Self {
            pid: Arc::new(AtomicU32::new(pid)),
        }
    }

    /// Target the orchestrator's own process
    pub fn current() -> Self {
        Self::new(std::process::id())
    }

    pub fn pid(&self) -> u32 {
        self.pid.load(Ordering::Acquire)
    }

    pub fn retarget(&self, pid: u32) {
        self.pid.store(pid, Ordering::Release);
    }
}

/// Which metrics a probe should read
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MetricSelection {
    pub memory: bool,
    pub cpu: bool,
}

impl MetricSelection {
    pub fn any(&self) -> bool {
        self.memory || self.cpu
    }
}

/// Reads metrics of a single process
pub trait ProcessProbe: Send {
    /// Whether the process still exists
    fn is_alive(&mut self, pid: u32) -> bool;

    /// Take one sample; metrics that cannot be read are left empty
    fn sample(&mut self, pid: u32, metrics: MetricSelection) -> PerformanceSample;
}

/// Probe backed by `sysinfo`
pub struct SysinfoProbe {
    system: System,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessProbe for SysinfoProbe {
    fn is_alive(&mut self, pid: u32) -> bool {
        self.system.refresh_process(Pid::from_u32(pid))
    }

    fn sample(&mut self, pid: u32, metrics: MetricSelection) -> PerformanceSample {
        let pid = Pid::from_u32(pid);
        if !self.system.refresh_process(pid) {
            return PerformanceSample::new(None, None);
        }

        let process = self.system.process(pid);
        let memory = if metrics.memory {
            process.map(|p| p.memory())
        } else {
            None
        };
        let cpu = if metrics.cpu {
            process.map(|p| p.cpu_usage()).filter(|c| c.is_finite())
        } else {
            None
        };

        PerformanceSample::new(memory, cpu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_retarget() {
        let target = ProcessTarget::new(10);
        let shared = target.clone();
        shared.retarget(42);
        assert_eq!(target.pid(), 42);
    }

    #[test]
    fn test_sysinfo_probe_sees_own_process() {
        let mut probe = SysinfoProbe::new();
        let pid = std::process::id();
        assert!(probe.is_alive(pid));

        let sample = probe.sample(
            pid,
            MetricSelection {
                memory: true,
                cpu: false,
            },
        );
        assert!(sample.memory_bytes.unwrap_or(0) > 0);
        assert!(sample.cpu_percent.is_none());
    }
}
