//! Experiment orchestration.
//!
//! Construction order defines the lifetimes: the event logger outlives the
//! runners, so every event emitted by a driver thread has somewhere to go,
//! and the logger's final drain happens after all runners have been
//! joined. Publishers are torn down before subscribers so that in-flight
//! samples can still be drained.

use crossbeam::channel::{Receiver, Sender, unbounded};
use log::{error, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::comm::{TransportHub, create_communicator};
use crate::config::ExperimentConfig;
use crate::error::PerfError;
use crate::events::aggregator::EventAggregator;
use crate::events::db::EventDb;
use crate::events::logger::EventLogger;
use crate::events::sink::EventSink;
use crate::output::build_outputs;
use crate::runner::data_runner::{DataRunner, RunnerRole};
use crate::utils::clock::PerfClock;
use crate::utils::cpu_usage::{CpuUsageTracker, ResourceUsage};

const SYSTEM_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);
const STOP_POLL_SLICE: Duration = Duration::from_millis(100);

pub struct AnalyzeRunner {
    config: Arc<ExperimentConfig>,
    stop: Arc<AtomicBool>,
}

impl AnalyzeRunner {
    /// Validates the configuration; `stop` is the external stop signal
    /// (signal handler or test control).
    pub fn new(config: ExperimentConfig, stop: Arc<AtomicBool>) -> Result<Self, PerfError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            stop,
        })
    }

    pub fn run(&self) -> Result<(), PerfError> {
        PerfClock::init();

        let (fault_tx, fault_rx) = unbounded();
        let sinks = self.build_sinks(&fault_tx)?;
        if sinks.is_empty() {
            warn!("neither event db nor outputs configured; events will be discarded");
        }
        let logger = Arc::new(EventLogger::new(sinks)?);

        let result = self.run_experiment(&logger, fault_tx, fault_rx);

        // Final drain; everything enqueued by the runners is flushed to the
        // sinks, the aggregator's reporter joins and the outputs close.
        logger.shutdown();
        result
    }

    fn build_sinks(
        &self,
        fault_tx: &Sender<PerfError>,
    ) -> Result<Vec<Box<dyn EventSink>>, PerfError> {
        let mut sinks: Vec<Box<dyn EventSink>> = Vec::new();
        if self.config.output_event_db {
            let db_file = format!("{}.db", uuid::Uuid::new_v4());
            info!("persisting events to {}", db_file);
            sinks.push(Box::new(EventDb::open(&db_file)?));
        }
        if !self.config.outputs.is_empty() {
            sinks.push(Box::new(EventAggregator::new(
                build_outputs(&self.config.outputs),
                self.config.rows_to_ignore,
                fault_tx.clone(),
            )?));
        }
        Ok(sinks)
    }

    fn run_experiment(
        &self,
        logger: &Arc<EventLogger>,
        fault_tx: Sender<PerfError>,
        fault_rx: Receiver<PerfError>,
    ) -> Result<(), PerfError> {
        let hub = Arc::new(TransportHub::new());

        let mut pub_runners = Vec::with_capacity(self.config.num_publishers as usize);
        for index in 0..self.config.num_publishers {
            let communicator = create_communicator(&self.config, &hub, logger)?;
            pub_runners.push(DataRunner::new(
                RunnerRole::Publisher,
                index,
                self.config.clone(),
                communicator,
                fault_tx.clone(),
            )?);
        }
        let mut sub_runners = Vec::with_capacity(self.config.num_subscribers as usize);
        for index in 0..self.config.num_subscribers {
            let communicator = create_communicator(&self.config, &hub, logger)?;
            sub_runners.push(DataRunner::new(
                RunnerRole::Subscriber,
                index,
                self.config.clone(),
                communicator,
                fault_tx.clone(),
            )?);
        }
        info!(
            "experiment started: topic '{}', {} publishers, {} subscribers, rate {} Hz",
            self.config.topic,
            self.config.num_publishers,
            self.config.num_subscribers,
            self.config.rate
        );

        let mut cpu_tracker = CpuUsageTracker::new();
        let experiment_start = PerfClock::now();
        let mut next_sample = experiment_start;
        let mut outcome = Ok(());

        'experiment: loop {
            next_sample += SYSTEM_SAMPLE_INTERVAL;
            loop {
                if self.stop.load(Ordering::Relaxed) {
                    info!("stop requested, shutting down");
                    break 'experiment;
                }
                if let Ok(fault) = fault_rx.try_recv() {
                    error!("fatal fault: {}", fault);
                    outcome = Err(fault);
                    break 'experiment;
                }
                if self.config.max_runtime > 0
                    && experiment_start.elapsed() >= Duration::from_secs(self.config.max_runtime)
                {
                    info!("maximum runtime reached, shutting down");
                    break 'experiment;
                }
                let now = PerfClock::now();
                if now >= next_sample {
                    break;
                }
                thread::sleep(STOP_POLL_SLICE.min(next_sample - now));
            }

            logger.system_measured(
                cpu_tracker.cpu_usage(),
                ResourceUsage::current(),
                PerfClock::timestamp(),
            );
        }

        // Publishers first, so subscribers can drain what is in flight.
        drop(pub_runners);
        drop(sub_runners);
        info!("all runners joined");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{QosProfile, RoundTripMode};
    use crate::msg;

    #[test]
    fn invalid_configuration_is_rejected_up_front() {
        let config = ExperimentConfig {
            topic: String::new(),
            msg: msg::lookup("Array16").unwrap(),
            rate: 10,
            num_publishers: 1,
            num_subscribers: 1,
            max_runtime: 1,
            rows_to_ignore: 0,
            roundtrip_mode: RoundTripMode::None,
            qos: QosProfile::default(),
            output_event_db: false,
            outputs: vec![],
            pin_core: None,
            rt_priority: None,
        };
        let stop = Arc::new(AtomicBool::new(false));
        assert!(matches!(
            AnalyzeRunner::new(config, stop),
            Err(PerfError::Config(_))
        ));
    }
}
