//! CSV file output, one serialized row per reporting window.

use log::error;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use crate::error::PerfError;
use crate::output::{AnalysisResult, Output, ResultRow};

pub struct CsvOutput {
    path: PathBuf,
    writer: Option<csv::Writer<BufWriter<File>>>,
}

impl CsvOutput {
    pub fn new(path: PathBuf) -> Self {
        Self { path, writer: None }
    }
}

impl Output for CsvOutput {
    fn open(&mut self) -> Result<(), PerfError> {
        let file = File::create(&self.path)?;
        self.writer = Some(csv::Writer::from_writer(BufWriter::new(file)));
        Ok(())
    }

    fn update(&mut self, result: &AnalysisResult) {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.serialize(ResultRow::from(result)) {
                error!("failed to write csv row to {:?}: {}", self.path, e);
            }
        }
    }

    fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush() {
                error!("failed to flush csv output {:?}: {}", self.path, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");

        let mut output = CsvOutput::new(path.clone());
        output.open().unwrap();
        let mut result = AnalysisResult::empty();
        result.num_sent = 100;
        result.num_received = 99;
        result.latency.add_sample(0.001);
        output.update(&result);
        output.close();

        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        let header = lines.next().unwrap();
        assert!(header.contains("num_sent"));
        assert!(header.contains("latency_mean"));
        let row = lines.next().unwrap();
        assert!(row.contains("100"));
        assert!(row.contains("99"));
    }
}
