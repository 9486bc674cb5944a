//! Destination for events drained by the logger thread.
//!
//! All methods are invoked from that one thread; a sink never needs its own
//! locking unless it shares state with another thread (the aggregator's
//! reporter does). `begin_transaction`/`end_transaction` bracket one full
//! drain pass.

use crate::events::{
    EventMessageReceived, EventMessageSent, EventRegisterPub, EventRegisterSub,
    EventSystemMeasured,
};

pub trait EventSink: Send {
    fn begin_transaction(&mut self) {}
    fn end_transaction(&mut self) {}

    fn register_pub(&mut self, event: &EventRegisterPub);
    fn register_sub(&mut self, event: &EventRegisterSub);
    fn message_sent(&mut self, event: &EventMessageSent);
    fn message_received(&mut self, event: &EventMessageReceived);
    fn system_measured(&mut self, event: &EventSystemMeasured);
}
