//! Message-type registry.
//!
//! A message type selects the payload schema for an experiment. Payload
//! contents are never persisted or inspected by the measurement pipeline,
//! so a schema reduces to its name and its fixed on-wire size; the size
//! feeds the throughput accounting (`sum_data_received`).

use crate::error::PerfError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgType {
    pub name: &'static str,
    /// Fixed payload size in bytes.
    pub size: usize,
}

/// Supported payload schemas, smallest first.
pub const SUPPORTED_MSG_TYPES: &[MsgType] = &[
    MsgType { name: "Array16", size: 16 },
    MsgType { name: "Array64", size: 64 },
    MsgType { name: "Array256", size: 256 },
    MsgType { name: "Array1k", size: 1_024 },
    MsgType { name: "Array4k", size: 4_096 },
    MsgType { name: "Array16k", size: 16_384 },
    MsgType { name: "Array64k", size: 65_536 },
    MsgType { name: "Array256k", size: 262_144 },
    MsgType { name: "Array1m", size: 1_048_576 },
    MsgType { name: "Array2m", size: 2_097_152 },
    MsgType { name: "PointCloud512k", size: 524_288 },
];

/// Resolves a `msg_name` from the configuration to its schema.
pub fn lookup(name: &str) -> Result<MsgType, PerfError> {
    SUPPORTED_MSG_TYPES
        .iter()
        .find(|m| m.name == name)
        .copied()
        .ok_or_else(|| PerfError::UnsupportedMessage(name.to_string()))
}

pub fn supported_names() -> Vec<&'static str> {
    SUPPORTED_MSG_TYPES.iter().map(|m| m.name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_resolves_known_types() {
        let m = lookup("Array1k").unwrap();
        assert_eq!(m.size, 1024);
        assert_eq!(lookup("PointCloud512k").unwrap().size, 524_288);
    }

    #[test]
    fn lookup_rejects_unknown_types() {
        match lookup("Array3k") {
            Err(PerfError::UnsupportedMessage(name)) => assert_eq!(name, "Array3k"),
            other => panic!("expected UnsupportedMessage, got {:?}", other),
        }
    }
}
