//! Per-role driver thread.
//!
//! One `DataRunner` owns one `Communicator` and one worker thread for the
//! whole experiment. Publishers are paced against an absolute schedule
//! (`start + k * interval`) so that scheduling jitter never accumulates
//! into rate drift; subscribers block inside the communicator's bounded
//! receive. After the first iteration the steady-state allocation guard is
//! engaged exactly once.
//!
//! Stopping is cooperative: the atomic run flag is checked at the top of
//! every iteration and dropping the runner joins the thread. The
//! communicator is destroyed on the worker thread on every exit path,
//! which closes its transport endpoints.

use crossbeam::channel::Sender;
use log::{debug, error};
use spin_sleep::{SpinSleeper, SpinStrategy};
use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::comm::Communicator;
use crate::config::{ExperimentConfig, RoundTripMode};
use crate::error::PerfError;
use crate::utils::alloc_guard;
use crate::utils::clock::PerfClock;
use crate::utils::rt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerRole {
    Publisher,
    Subscriber,
}

impl fmt::Display for RunnerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerRole::Publisher => f.write_str("pub"),
            RunnerRole::Subscriber => f.write_str("sub"),
        }
    }
}

pub struct DataRunner {
    run: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DataRunner {
    /// Starts the worker thread immediately.
    pub fn new(
        role: RunnerRole,
        index: u32,
        config: Arc<ExperimentConfig>,
        communicator: Box<dyn Communicator>,
        fault_tx: Sender<PerfError>,
    ) -> io::Result<Self> {
        let run = Arc::new(AtomicBool::new(true));
        let thread_run = run.clone();
        let handle = thread::Builder::new()
            .name(format!("{}-runner-{}", role, index))
            .spawn(move || thread_main(role, config, communicator, thread_run, fault_tx))?;
        Ok(Self {
            run,
            handle: Some(handle),
        })
    }

    /// Requests a stop at the next loop boundary.
    pub fn stop(&self) {
        self.run.store(false, Ordering::Release);
    }
}

impl Drop for DataRunner {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn thread_main(
    role: RunnerRole,
    config: Arc<ExperimentConfig>,
    mut communicator: Box<dyn Communicator>,
    run: Arc<AtomicBool>,
    fault_tx: Sender<PerfError>,
) {
    rt::apply_thread_settings(config.pin_core, config.rt_priority);

    let interval_ns = config.interval().map(|d| d.as_nanos() as u64);
    let pace = role == RunnerRole::Publisher
        && interval_ns.is_some()
        && config.roundtrip_mode != RoundTripMode::Relay;
    let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);

    let start = PerfClock::now();
    let mut iteration: u64 = 0;

    while run.load(Ordering::Acquire) {
        let step = match role {
            RunnerRole::Publisher => communicator.publish(),
            RunnerRole::Subscriber => communicator.update_subscription(),
        };
        if let Err(e) = step {
            alloc_guard::disengage();
            error!("{} runner failed: {}", role, e);
            let _ = fault_tx.send(e);
            break;
        }

        iteration += 1;

        if pace {
            if let Some(interval_ns) = interval_ns {
                // Absolute schedule: k * interval from the loop start, so a
                // late wakeup never shifts all later ticks.
                let next_tick =
                    start + Duration::from_nanos(interval_ns.saturating_mul(iteration));
                let now = PerfClock::now();
                if next_tick > now {
                    sleeper.sleep(next_tick - now);
                }
            }
        }

        if iteration == 1 {
            alloc_guard::engage();
        }
    }

    alloc_guard::disengage();
    debug!("{} runner stopped after {} iterations", role, iteration);
    // The communicator drops here, closing its transport endpoints.
}
