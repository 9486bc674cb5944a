//! Human-readable per-window rows on stdout.

use crate::error::PerfError;
use crate::output::{AnalysisResult, Output, ResultRow};

pub struct ConsoleOutput;

impl ConsoleOutput {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ConsoleOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl Output for ConsoleOutput {
    fn open(&mut self) -> Result<(), PerfError> {
        println!(
            "{:>10} {:>8} {:>8} {:>8} {:>8} {:>12} {:>8} {:>12} {:>12} {:>12} {:>6}",
            "t [s]",
            "recv",
            "sent",
            "lost",
            "lat_n",
            "lat_mean[ms]",
            "data[KB]",
            "lat_min[ms]",
            "lat_max[ms]",
            "lat_sd[ms]",
            "cpu%"
        );
        Ok(())
    }

    fn update(&mut self, result: &AnalysisResult) {
        let row = ResultRow::from(result);
        println!(
            "{:>10.1} {:>8} {:>8} {:>8} {:>8} {:>12.4} {:>8} {:>12.4} {:>12.4} {:>12.4} {:>6.1}",
            row.experiment_elapsed_ns as f64 * 1e-9,
            row.num_received,
            row.num_sent,
            row.num_lost,
            row.latency_count,
            row.latency_mean * 1e3,
            row.sum_data_received / 1024,
            row.latency_min * 1e3,
            row.latency_max * 1e3,
            row.latency_stddev * 1e3,
            row.cpu_usage,
        );
    }

    fn close(&mut self) {}
}
