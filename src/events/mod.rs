//! Measurement events and the pipeline that carries them.
//!
//! Driver threads emit events into typed lock-free queues; a single logger
//! thread drains them and fans out to sinks (durable SQLite store, live
//! rolling aggregator). Everything downstream of the queues runs off the
//! hot path.

pub mod aggregator;
pub mod db;
pub mod logger;
pub mod queue;
pub mod replay;
pub mod sink;
pub mod source;

use std::fmt;
use std::sync::Arc;

use crate::utils::cpu_usage::{CpuInfo, ResourceUsage};

/// Opaque unique endpoint identifier (UUID v4 text).
///
/// Backed by `Arc<str>` so that hot-path clones (one per emitted event)
/// only touch a refcount.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(Arc<str>);

impl EndpointId {
    pub fn generate() -> Self {
        Self(Arc::from(uuid::Uuid::new_v4().to_string().as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EndpointId {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for EndpointId {
    fn from(s: String) -> Self {
        Self(Arc::from(s.as_str()))
    }
}

/// A publisher announced itself on a topic.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRegisterPub {
    pub pub_id: EndpointId,
    pub msg_type: String,
    pub topic: String,
}

/// A subscriber announced itself on a topic.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRegisterSub {
    pub sub_id: EndpointId,
    pub msg_type: String,
    pub topic: String,
    pub data_size: usize,
}

/// One sample was handed to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct EventMessageSent {
    pub pub_id: EndpointId,
    pub sequence_id: u64,
    pub timestamp: i64,
}

/// One sample arrived at a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct EventMessageReceived {
    pub sub_id: EndpointId,
    pub pub_id: EndpointId,
    pub sequence_id: u64,
    pub timestamp: i64,
}

/// Periodic system sample from the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventSystemMeasured {
    pub cpu_info: CpuInfo,
    pub resource_usage: ResourceUsage,
    pub timestamp: i64,
}
