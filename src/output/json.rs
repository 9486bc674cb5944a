//! JSON-lines file output: one object per reporting window.

use log::error;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use crate::error::PerfError;
use crate::output::{AnalysisResult, Output, ResultRow};

pub struct JsonOutput {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl JsonOutput {
    pub fn new(path: PathBuf) -> Self {
        Self { path, writer: None }
    }
}

impl Output for JsonOutput {
    fn open(&mut self) -> Result<(), PerfError> {
        let file = File::create(&self.path)?;
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }

    fn update(&mut self, result: &AnalysisResult) {
        if let Some(writer) = self.writer.as_mut() {
            let row = ResultRow::from(result);
            let outcome = serde_json::to_string(&row)
                .map_err(std::io::Error::other)
                .and_then(|line| writeln!(writer, "{}", line));
            if let Err(e) = outcome {
                error!("failed to write json row to {:?}: {}", self.path, e);
            }
        }
    }

    fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush() {
                error!("failed to flush json output {:?}: {}", self.path, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_one_object_per_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.jsonl");

        let mut output = JsonOutput::new(path.clone());
        output.open().unwrap();
        let mut result = AnalysisResult::empty();
        result.num_sent = 42;
        output.update(&result);
        result.num_sent = 43;
        output.update(&result);
        output.close();

        let content = std::fs::read_to_string(&path).unwrap();
        let rows: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["num_sent"], 42);
        assert_eq!(rows[1]["num_sent"], 43);
    }
}
