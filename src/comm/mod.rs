//! Transport abstraction the driver loop runs against.
//!
//! A `Communicator` owns the endpoints of one runner and is called from
//! that runner's thread only. Concrete wire protocols plug in behind this
//! trait; the crate ships the in-process loopback transport used for
//! self-measurement and testing.

pub mod intra;

use std::sync::Arc;

pub use intra::{IntraProcessCommunicator, Sample, TransportHub};

use crate::config::ExperimentConfig;
use crate::error::PerfError;
use crate::events::logger::EventLogger;

pub trait Communicator: Send {
    /// Produces and transmits one sample, stamped with a fresh sequence id,
    /// and emits `MessageSent` once the transport has accepted it. A
    /// transmit failure is fatal for the runner.
    fn publish(&mut self) -> Result<(), PerfError>;

    /// Waits (bounded) for samples and emits `MessageReceived` for each
    /// valid one before returning; in relay mode samples are republished
    /// instead. Returning with zero samples is not an error.
    fn update_subscription(&mut self) -> Result<(), PerfError>;

    /// Whether the transport can loan sample buffers to the caller.
    /// Implementations without the capability fall back to by-value sends.
    fn supports_loaning(&self) -> bool {
        false
    }
}

/// Builds the communicator for one runner. The message schema was resolved
/// when the configuration was constructed; with a single built-in transport
/// the registry collapses to this constructor.
pub fn create_communicator(
    config: &Arc<ExperimentConfig>,
    hub: &Arc<TransportHub>,
    logger: &Arc<EventLogger>,
) -> Result<Box<dyn Communicator>, PerfError> {
    Ok(Box::new(IntraProcessCommunicator::new(
        config.clone(),
        hub.clone(),
        logger.clone(),
    )?))
}
