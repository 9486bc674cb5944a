//! Fan-in point of the event pipeline.
//!
//! Producer methods push into per-kind lock-free queues and return
//! immediately; a dedicated consumer thread drains every queue each pass
//! and delivers the events to all sinks inside a
//! `begin_transaction`/`end_transaction` bracket. On shutdown the consumer
//! performs one final drain, so every event enqueued before `shutdown()`
//! reaches every sink.

use log::{debug, warn};
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::events::queue::EventQueue;
use crate::events::sink::EventSink;
use crate::events::{
    EndpointId, EventMessageReceived, EventMessageSent, EventRegisterPub, EventRegisterSub,
    EventSystemMeasured,
};
use crate::utils::cpu_usage::{CpuInfo, ResourceUsage};

// Message queues are sized for roughly one second of full-rate traffic;
// register/system queues only ever see a handful of entries.
const MESSAGE_QUEUE_CAPACITY: usize = 1 << 16;
const REGISTER_QUEUE_CAPACITY: usize = 1 << 10;
const SYSTEM_QUEUE_CAPACITY: usize = 1 << 8;
const CONSUMER_YIELD: Duration = Duration::from_millis(1);

struct Queues {
    register_pub: EventQueue<EventRegisterPub>,
    register_sub: EventQueue<EventRegisterSub>,
    message_sent: EventQueue<EventMessageSent>,
    message_received: EventQueue<EventMessageReceived>,
    system_measured: EventQueue<EventSystemMeasured>,
    run: AtomicBool,
}

pub struct EventLogger {
    queues: Arc<Queues>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl EventLogger {
    /// Starts the consumer thread. Sinks are delivered to in the given
    /// order and are owned by the consumer from here on.
    pub fn new(sinks: Vec<Box<dyn EventSink>>) -> io::Result<Self> {
        let queues = Arc::new(Queues {
            register_pub: EventQueue::with_capacity(REGISTER_QUEUE_CAPACITY),
            register_sub: EventQueue::with_capacity(REGISTER_QUEUE_CAPACITY),
            message_sent: EventQueue::with_capacity(MESSAGE_QUEUE_CAPACITY),
            message_received: EventQueue::with_capacity(MESSAGE_QUEUE_CAPACITY),
            system_measured: EventQueue::with_capacity(SYSTEM_QUEUE_CAPACITY),
            run: AtomicBool::new(true),
        });

        let consumer_queues = queues.clone();
        let handle = thread::Builder::new()
            .name("event-logger".into())
            .spawn(move || consume(consumer_queues, sinks))?;

        Ok(Self {
            queues,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn register_pub(&self, pub_id: &EndpointId, msg_type: &str, topic: &str) {
        self.queues.register_pub.push(EventRegisterPub {
            pub_id: pub_id.clone(),
            msg_type: msg_type.to_string(),
            topic: topic.to_string(),
        });
    }

    pub fn register_sub(&self, sub_id: &EndpointId, msg_type: &str, topic: &str, data_size: usize) {
        self.queues.register_sub.push(EventRegisterSub {
            sub_id: sub_id.clone(),
            msg_type: msg_type.to_string(),
            topic: topic.to_string(),
            data_size,
        });
    }

    #[inline]
    pub fn message_sent(&self, pub_id: &EndpointId, sequence_id: u64, timestamp: i64) {
        self.queues.message_sent.push(EventMessageSent {
            pub_id: pub_id.clone(),
            sequence_id,
            timestamp,
        });
    }

    #[inline]
    pub fn message_received(
        &self,
        sub_id: &EndpointId,
        pub_id: &EndpointId,
        sequence_id: u64,
        timestamp: i64,
    ) {
        self.queues.message_received.push(EventMessageReceived {
            sub_id: sub_id.clone(),
            pub_id: pub_id.clone(),
            sequence_id,
            timestamp,
        });
    }

    pub fn system_measured(
        &self,
        cpu_info: CpuInfo,
        resource_usage: ResourceUsage,
        timestamp: i64,
    ) {
        self.queues.system_measured.push(EventSystemMeasured {
            cpu_info,
            resource_usage,
            timestamp,
        });
    }

    /// Stops the consumer after one final drain pass and joins it.
    /// Idempotent; also invoked from `drop`.
    pub fn shutdown(&self) {
        self.queues.run.store(false, Ordering::Release);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for EventLogger {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn consume(queues: Arc<Queues>, mut sinks: Vec<Box<dyn EventSink>>) {
    while queues.run.load(Ordering::Acquire) {
        drain_pass(&queues, &mut sinks);
        thread::sleep(CONSUMER_YIELD);
    }
    // Final drain: nothing enqueued before the run flag flipped may be lost.
    drain_pass(&queues, &mut sinks);
    report_queue_health(&queues);
}

fn drain_pass(queues: &Queues, sinks: &mut [Box<dyn EventSink>]) {
    for sink in sinks.iter_mut() {
        sink.begin_transaction();
    }

    while let Some(event) = queues.register_pub.pop() {
        for sink in sinks.iter_mut() {
            sink.register_pub(&event);
        }
    }
    while let Some(event) = queues.register_sub.pop() {
        for sink in sinks.iter_mut() {
            sink.register_sub(&event);
        }
    }
    while let Some(event) = queues.message_sent.pop() {
        for sink in sinks.iter_mut() {
            sink.message_sent(&event);
        }
    }
    while let Some(event) = queues.message_received.pop() {
        for sink in sinks.iter_mut() {
            sink.message_received(&event);
        }
    }
    while let Some(event) = queues.system_measured.pop() {
        for sink in sinks.iter_mut() {
            sink.system_measured(&event);
        }
    }

    for sink in sinks.iter_mut() {
        sink.end_transaction();
    }
}

fn report_queue_health(queues: &Queues) {
    report_one("register_pub", &queues.register_pub);
    report_one("register_sub", &queues.register_sub);
    report_one("message_sent", &queues.message_sent);
    report_one("message_received", &queues.message_received);
    report_one("system_measured", &queues.system_measured);
}

fn report_one<T>(name: &str, queue: &EventQueue<T>) {
    if queue.dropped() > 0 {
        warn!(
            "{} queue overflowed: {} events dropped (capacity {})",
            name,
            queue.dropped(),
            queue.capacity()
        );
    } else {
        debug!(
            "{} queue high water mark: {}/{}",
            name,
            queue.high_water(),
            queue.capacity()
        );
    }
}
