//! Performance samples and their terminal reduction
//!
//! Samples are collected by the resource monitor while a worker runs and
//! reduced into a summary once the worker finishes or is cancelled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// One observation of the monitored process
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub timestamp: DateTime<Utc>,
    /// Resident memory in bytes, if the probe could read it
    pub memory_bytes: Option<u64>,
    /// CPU usage percentage, if the probe could read it
    pub cpu_percent: Option<f32>,
}

impl PerformanceSample {
    pub fn new(memory_bytes: Option<u64>, cpu_percent: Option<f32>) -> Self {
        Self {
            timestamp: Utc::now(),
            memory_bytes,
            cpu_percent,
        }
    }

    /// A sample in which no metric could be read
    pub fn is_blank(&self) -> bool {
        self.memory_bytes.is_none() && self.cpu_percent.is_none()
    }
}

/// Peak/average reduction of a sample stream
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub peak_memory_bytes: Option<u64>,
    pub average_memory_bytes: Option<u64>,
    pub average_cpu_percent: Option<f64>,
    pub sample_count: usize,
}

impl PerformanceSummary {
    /// Summary returned when the sampling task never reported back
    pub fn empty() -> Self {
        Self::default()
    }

    /// Reduce samples into peak and average figures.
    ///
    /// Each metric is averaged over the samples that carried it, so a metric
    /// missing from individual samples only disappears from the summary when
    /// no sample carried it at all.
    pub fn from_samples(samples: &[PerformanceSample]) -> Self {
        let memory: Vec<u64> = samples.iter().filter_map(|s| s.memory_bytes).collect();
        let cpu: Vec<f64> = samples
            .iter()
            .filter_map(|s| s.cpu_percent)
            .map(f64::from)
            .collect();

        let peak_memory_bytes = memory.iter().copied().max();
        let average_memory_bytes = if memory.is_empty() {
            None
        } else {
            let sum: u128 = memory.iter().map(|m| u128::from(*m)).sum();
            Some((sum / memory.len() as u128) as u64)
        };
        let average_cpu_percent = if cpu.is_empty() {
            None
        } else {
            Some(cpu.iter().sum::<f64>() / cpu.len() as f64)
        };

        Self {
            peak_memory_bytes,
            average_memory_bytes,
            average_cpu_percent,
            sample_count: samples.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }

    pub fn peak_memory_mb(&self) -> Option<f64> {
        self.peak_memory_bytes.map(|b| b as f64 / BYTES_PER_MB)
    }

    pub fn average_memory_mb(&self) -> Option<f64> {
        self.average_memory_bytes.map(|b| b as f64 / BYTES_PER_MB)
    }

    /// Format as summary string
    pub fn format_summary(&self) -> String {
        let mb = |v: Option<f64>| v.map_or_else(|| "n/a".to_string(), |m| format!("{m:.1}MB"));
        let cpu = self
            .average_cpu_percent
            .map_or_else(|| "n/a".to_string(), |c| format!("{c:.1}%"));
        format!(
            "peak={} avg={} cpu={} samples={}",
            mb(self.peak_memory_mb()),
            mb(self.average_memory_mb()),
            cpu,
            self.sample_count
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_from_samples() {
        let samples = vec![
            PerformanceSample::new(Some(100), Some(10.0)),
            PerformanceSample::new(Some(300), Some(30.0)),
            PerformanceSample::new(Some(200), None),
        ];
        let summary = PerformanceSummary::from_samples(&samples);

        assert_eq!(summary.peak_memory_bytes, Some(300));
        assert_eq!(summary.average_memory_bytes, Some(200));
        assert_eq!(summary.average_cpu_percent, Some(20.0));
        assert_eq!(summary.sample_count, 3);
    }

    #[test]
    fn test_missing_metric_is_nulled_only_when_starved() {
        let samples = vec![
            PerformanceSample::new(Some(1024), None),
            PerformanceSample::new(Some(2048), None),
        ];
        let summary = PerformanceSummary::from_samples(&samples);
        assert!(summary.peak_memory_bytes.is_some());
        assert!(summary.average_cpu_percent.is_none());
    }

    #[test]
    fn test_empty_summary() {
        let summary = PerformanceSummary::from_samples(&[]);
        assert_eq!(summary, PerformanceSummary::empty());
        assert!(summary.is_empty());
        assert_eq!(summary.format_summary(), "peak=n/a avg=n/a cpu=n/a samples=0");
    }

    #[test]
    fn test_memory_mb_conversion() {
        let summary = PerformanceSummary {
            peak_memory_bytes: Some(512 * 1024 * 1024),
            average_memory_bytes: Some(256 * 1024 * 1024),
            average_cpu_percent: None,
            sample_count: 1,
        };
        assert_eq!(summary.peak_memory_mb(), Some(512.0));
        assert_eq!(summary.average_memory_mb(), Some(256.0));
    }
}
