//! Read-back access to persisted events for post-hoc analysis.

use crate::error::PerfError;
use crate::events::{
    EventMessageReceived, EventMessageSent, EventRegisterPub, EventRegisterSub,
    EventSystemMeasured,
};

/// Range queries over a persisted event log. Time ranges are half-open
/// `[start, end)` in the nanosecond timestamps the events were recorded
/// with.
pub trait EventSource {
    fn query_register_pub(&self, topic: &str) -> Result<Vec<EventRegisterPub>, PerfError>;

    fn query_register_sub(&self, topic: &str) -> Result<Vec<EventRegisterSub>, PerfError>;

    fn query_message_sent(
        &self,
        start: i64,
        end: i64,
        topic: &str,
    ) -> Result<Vec<EventMessageSent>, PerfError>;

    fn query_message_received(
        &self,
        start: i64,
        end: i64,
        topic: &str,
    ) -> Result<Vec<EventMessageReceived>, PerfError>;

    fn query_system_measured(
        &self,
        start: i64,
        end: i64,
    ) -> Result<Vec<EventSystemMeasured>, PerfError>;

    /// Smallest and largest message timestamp in the log, if any messages
    /// were recorded.
    fn time_bounds(&self) -> Result<Option<(i64, i64)>, PerfError>;
}
