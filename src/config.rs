//! Immutable experiment configuration.
//!
//! Built once at startup (from the CLI in the binary, literally in tests)
//! and passed by reference to every component; there is no process-wide
//! mutable configuration state.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::PerfError;
use crate::msg::MsgType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Reliability {
    BestEffort,
    Reliable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Durability {
    Volatile,
    TransientLocal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum HistoryKind {
    KeepAll,
    KeepLast,
}

/// Abstract QoS vector; each transport translates it to its own settings
/// and rejects combinations it cannot honor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QosProfile {
    pub reliability: Reliability,
    pub durability: Durability,
    pub history_kind: HistoryKind,
    pub history_depth: usize,
}

impl Default for QosProfile {
    fn default() -> Self {
        Self {
            reliability: Reliability::Reliable,
            durability: Durability::Volatile,
            history_kind: HistoryKind::KeepLast,
            history_depth: 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RoundTripMode {
    /// Regular one-way measurement.
    None,
    /// Publishes on the main topic, listens on the relay topic.
    Main,
    /// Republishes every received sample on the relay topic.
    Relay,
}

/// Where per-window results go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSpec {
    Stdout,
    Csv(PathBuf),
    Json(PathBuf),
}

impl FromStr for OutputSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "stdout" {
            return Ok(OutputSpec::Stdout);
        }
        if let Some(path) = s.strip_prefix("csv:") {
            return Ok(OutputSpec::Csv(PathBuf::from(path)));
        }
        if let Some(path) = s.strip_prefix("json:") {
            return Ok(OutputSpec::Json(PathBuf::from(path)));
        }
        Err(format!(
            "unknown output '{}', expected stdout, csv:<path> or json:<path>",
            s
        ))
    }
}

impl fmt::Display for OutputSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputSpec::Stdout => write!(f, "stdout"),
            OutputSpec::Csv(p) => write!(f, "csv:{}", p.display()),
            OutputSpec::Json(p) => write!(f, "json:{}", p.display()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExperimentConfig {
    pub topic: String,
    /// Payload schema, resolved from `msg_name` at construction.
    pub msg: MsgType,
    /// Publications per second per publisher; 0 = as fast as possible.
    pub rate: u32,
    pub num_publishers: u32,
    pub num_subscribers: u32,
    /// Seconds; 0 = run until an external stop signal.
    pub max_runtime: u64,
    /// Number of leading one-second result rows to suppress.
    pub rows_to_ignore: u64,
    pub roundtrip_mode: RoundTripMode,
    pub qos: QosProfile,
    /// Persist every event to a per-run SQLite file.
    pub output_event_db: bool,
    pub outputs: Vec<OutputSpec>,
    /// Optional core to pin driver threads to.
    pub pin_core: Option<usize>,
    /// Optional cross-platform thread priority (0..=99) for driver threads.
    pub rt_priority: Option<u8>,
}

impl ExperimentConfig {
    pub fn validate(&self) -> Result<(), PerfError> {
        if self.topic.is_empty() {
            return Err(PerfError::Config("topic must not be empty".into()));
        }
        if self.num_publishers == 0 && self.num_subscribers == 0 {
            return Err(PerfError::Config(
                "need at least one publisher or subscriber".into(),
            ));
        }
        if self.qos.history_kind == HistoryKind::KeepLast && self.qos.history_depth == 0 {
            return Err(PerfError::Config(
                "history_depth must be positive for keep-last history".into(),
            ));
        }
        if self.roundtrip_mode == RoundTripMode::Relay && self.num_subscribers == 0 {
            return Err(PerfError::Config(
                "relay mode requires at least one subscriber".into(),
            ));
        }
        Ok(())
    }

    /// Topic this configuration publishes on.
    pub fn pub_topic(&self) -> String {
        match self.roundtrip_mode {
            RoundTripMode::None | RoundTripMode::Main => self.topic.clone(),
            RoundTripMode::Relay => format!("{}_relay", self.topic),
        }
    }

    /// Topic this configuration subscribes to.
    pub fn sub_topic(&self) -> String {
        match self.roundtrip_mode {
            RoundTripMode::None => self.topic.clone(),
            RoundTripMode::Main => format!("{}_relay", self.topic),
            RoundTripMode::Relay => self.topic.clone(),
        }
    }

    /// Pacing interval for publishers; `None` when rate is unlimited.
    pub fn interval(&self) -> Option<Duration> {
        if self.rate > 0 {
            Some(Duration::from_secs_f64(1.0 / self.rate as f64))
        } else {
            None
        }
    }
}
