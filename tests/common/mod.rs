//! Shared helpers for the end-to-end tests.
#![allow(dead_code)] // each test binary uses a subset

use crossbeam::channel::Sender;
use std::sync::Arc;
use std::time::{Duration, Instant};

use pubsub_perf::comm::TransportHub;
use pubsub_perf::config::{ExperimentConfig, QosProfile, RoundTripMode};
use pubsub_perf::error::PerfError;
use pubsub_perf::msg;
use pubsub_perf::output::{AnalysisResult, Output};

/// Test output that forwards every result row over a channel.
pub struct ChannelOutput {
    tx: Sender<AnalysisResult>,
}

impl ChannelOutput {
    pub fn new(tx: Sender<AnalysisResult>) -> Self {
        Self { tx }
    }
}

impl Output for ChannelOutput {
    fn open(&mut self) -> Result<(), PerfError> {
        Ok(())
    }

    fn update(&mut self, result: &AnalysisResult) {
        let _ = self.tx.send(*result);
    }

    fn close(&mut self) {}
}

pub fn test_config(topic: &str, rate: u32) -> ExperimentConfig {
    ExperimentConfig {
        topic: topic.into(),
        msg: msg::lookup("Array1k").unwrap(),
        rate,
        num_publishers: 1,
        num_subscribers: 1,
        max_runtime: 0,
        rows_to_ignore: 0,
        roundtrip_mode: RoundTripMode::None,
        qos: QosProfile::default(),
        output_event_db: false,
        outputs: vec![],
        pin_core: None,
        rt_priority: None,
    }
}

/// Waits until `count` subscriptions are live on `topic`.
pub fn wait_for_subscribers(hub: &Arc<TransportHub>, topic: &str, count: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while hub.subscriber_count(topic) < count {
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {} subscribers on '{}'",
            count,
            topic
        );
        std::thread::sleep(Duration::from_millis(5));
    }
}
