//! # pubsub_perf
//!
//! Performance-measurement harness for publish/subscribe messaging.
//! Drives publishers and subscribers at a configured rate over a pluggable
//! transport, records per-message send/receive events with nanosecond
//! timestamps, and reduces them into per-second latency, throughput and
//! loss statistics.
//!
//! ## Architecture
//! - **Driver threads** (`runner::DataRunner`): one per publisher and
//!   subscriber, paced against an absolute schedule, allocation-free in
//!   steady state.
//! - **Event pipeline** (`events`): typed lock-free MPSC queues fan in to a
//!   single logger thread, which fans out to sinks inside per-pass
//!   transactions.
//! - **Sinks**: a durable SQLite event store and a live rolling aggregator
//!   that publishes one `AnalysisResult` per second to the configured
//!   outputs (stdout, CSV, JSON lines).
//! - **Replay** (`events::replay`): re-derives the per-window results from
//!   a persisted event log; the offline oracle for the live path.

pub mod comm;
pub mod config;
pub mod error;
pub mod events;
pub mod msg;
pub mod output;
pub mod runner;
pub mod utils;

pub use config::ExperimentConfig;
pub use error::PerfError;
pub use runner::AnalyzeRunner;

/// Counts steady-state allocator calls on driver threads; see
/// `utils::alloc_guard`.
#[global_allocator]
static GLOBAL_ALLOCATOR: utils::alloc_guard::CountingAllocator =
    utils::alloc_guard::CountingAllocator;
