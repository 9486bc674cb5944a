//! Per-window results and where they go.

pub mod console;
pub mod csv;
pub mod json;

use serde::Serialize;

use crate::config::OutputSpec;
use crate::error::PerfError;
use crate::utils::cpu_usage::{CpuInfo, ResourceUsage};
use crate::utils::statistics::StatisticsTracker;

/// One reporting window worth of reduced measurements.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalysisResult {
    pub experiment_elapsed_ns: i64,
    pub window_ns: i64,
    pub num_received: u64,
    pub num_sent: u64,
    pub num_lost: u64,
    pub sum_data_received: u64,
    /// End-to-end latency in seconds.
    pub latency: StatisticsTracker,
    pub cpu_info: CpuInfo,
    pub resource_usage: ResourceUsage,
}

/// Receives `AnalysisResult`s once per window.
///
/// `update` and `close` log their own failures; a result row is diagnostic
/// output and must not take the experiment down.
pub trait Output: Send {
    fn open(&mut self) -> Result<(), PerfError>;
    fn update(&mut self, result: &AnalysisResult);
    fn close(&mut self);
}

/// Flat serializable form of a result, shared by the CSV and JSON outputs.
/// Latency sentinels of an empty window are normalized to zero.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ResultRow {
    pub experiment_elapsed_ns: i64,
    pub window_ns: i64,
    pub num_received: u64,
    pub num_sent: u64,
    pub num_lost: u64,
    pub sum_data_received: u64,
    pub latency_count: u64,
    pub latency_mean: f64,
    pub latency_min: f64,
    pub latency_max: f64,
    pub latency_stddev: f64,
    pub cpu_cores: u32,
    pub cpu_usage: f32,
}

impl From<&AnalysisResult> for ResultRow {
    fn from(result: &AnalysisResult) -> Self {
        let empty = result.latency.count() == 0;
        Self {
            experiment_elapsed_ns: result.experiment_elapsed_ns,
            window_ns: result.window_ns,
            num_received: result.num_received,
            num_sent: result.num_sent,
            num_lost: result.num_lost,
            sum_data_received: result.sum_data_received,
            latency_count: result.latency.count(),
            latency_mean: if empty { 0.0 } else { result.latency.mean() },
            latency_min: if empty { 0.0 } else { result.latency.min() },
            latency_max: if empty { 0.0 } else { result.latency.max() },
            latency_stddev: if empty { 0.0 } else { result.latency.stddev() },
            cpu_cores: result.cpu_info.cpu_cores,
            cpu_usage: result.cpu_info.cpu_usage,
        }
    }
}

/// Instantiates the configured outputs; they are opened by whoever drives
/// them (the aggregator's reporter or the replay printer).
pub fn build_outputs(specs: &[OutputSpec]) -> Vec<Box<dyn Output>> {
    specs
        .iter()
        .map(|spec| match spec {
            OutputSpec::Stdout => Box::new(console::ConsoleOutput::new()) as Box<dyn Output>,
            OutputSpec::Csv(path) => Box::new(csv::CsvOutput::new(path.clone())),
            OutputSpec::Json(path) => Box::new(json::JsonOutput::new(path.clone())),
        })
        .collect()
}

impl AnalysisResult {
    pub fn empty() -> Self {
        Self {
            experiment_elapsed_ns: 0,
            window_ns: 0,
            num_received: 0,
            num_sent: 0,
            num_lost: 0,
            sum_data_received: 0,
            latency: StatisticsTracker::new(),
            cpu_info: CpuInfo::default(),
            resource_usage: ResourceUsage::default(),
        }
    }
}
