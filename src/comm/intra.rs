//! In-process loopback transport over crossbeam channels.
//!
//! One `TransportHub` per experiment maps topic names to subscriber
//! channels. Publishers cache the subscriber list and only re-snapshot it
//! when the hub's generation counter moves, so the steady-state publish
//! path touches no locks and performs no allocation; samples carry their
//! publisher id as an `Arc<str>` clone.
//!
//! QoS translation: keep-last history bounds the channel to the history
//! depth, keep-all uses an unbounded channel; reliable sends block (with a
//! shutdown-guard timeout) while best-effort sends drop on a full channel.
//! Transient-local durability would require replaying history to late
//! subscribers and is rejected at construction time.

use crossbeam::channel::{Receiver, Sender, SendTimeoutError, TrySendError, bounded, unbounded};
use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use crate::comm::Communicator;
use crate::config::{Durability, ExperimentConfig, HistoryKind, QosProfile, Reliability, RoundTripMode};
use crate::error::PerfError;
use crate::events::EndpointId;
use crate::events::logger::EventLogger;
use crate::utils::clock::PerfClock;

/// Poll slice for the bounded receive wait; the driver re-invokes
/// `update_subscription`, so the hard 15 s bound is never approached.
const RECEIVE_POLL_SLICE: Duration = Duration::from_millis(100);

/// Upper bound on a reliable send into a full subscriber channel. A
/// subscriber that cannot drain for this long counts as a transmit failure.
const RELIABLE_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// One message on the wire.
#[derive(Debug, Clone)]
pub struct Sample {
    pub pub_id: EndpointId,
    pub sequence_id: u64,
    pub timestamp: i64,
}

struct SubEntry {
    id: u64,
    tx: Sender<Sample>,
}

/// Topic registry connecting publishers to subscriber channels.
pub struct TransportHub {
    topics: Mutex<HashMap<String, Vec<SubEntry>>>,
    generation: AtomicU64,
    next_sub_id: AtomicU64,
}

impl TransportHub {
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            next_sub_id: AtomicU64::new(1),
        }
    }

    fn subscribe(&self, topic: &str, qos: &QosProfile) -> (u64, Receiver<Sample>) {
        let (tx, rx) = match qos.history_kind {
            HistoryKind::KeepAll => unbounded(),
            HistoryKind::KeepLast => bounded(qos.history_depth),
        };
        let id = self.next_sub_id.fetch_add(1, Ordering::Relaxed);
        self.topics
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(SubEntry { id, tx });
        self.generation.fetch_add(1, Ordering::Release);
        (id, rx)
    }

    fn unsubscribe(&self, topic: &str, id: u64) {
        let mut topics = self.topics.lock();
        if let Some(entries) = topics.get_mut(topic) {
            entries.retain(|e| e.id != id);
        }
        self.generation.fetch_add(1, Ordering::Release);
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Number of live subscriptions on a topic. Lets callers wait until
    /// endpoints are matched before starting a paced load.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.lock().get(topic).map_or(0, Vec::len)
    }

    fn snapshot(&self, topic: &str) -> Vec<Sender<Sample>> {
        self.topics
            .lock()
            .get(topic)
            .map(|entries| entries.iter().map(|e| e.tx.clone()).collect())
            .unwrap_or_default()
    }
}

impl Default for TransportHub {
    fn default() -> Self {
        Self::new()
    }
}

struct PublisherEndpoint {
    hub: Arc<TransportHub>,
    topic: String,
    reliable: bool,
    cached: Vec<Sender<Sample>>,
    cached_generation: u64,
    stale: bool,
}

impl PublisherEndpoint {
    fn new(hub: Arc<TransportHub>, topic: String, qos: &QosProfile) -> Self {
        let cached_generation = hub.generation();
        let cached = hub.snapshot(&topic);
        Self {
            hub,
            topic,
            reliable: qos.reliability == Reliability::Reliable,
            cached,
            cached_generation,
            stale: false,
        }
    }

    /// Fans the sample out to every current subscriber. Only re-snapshots
    /// (and thus allocates) when subscriptions changed.
    fn send_to_all(&mut self, sample: &Sample) -> Result<(), PerfError> {
        let generation = self.hub.generation();
        if generation != self.cached_generation || self.stale {
            self.cached = self.hub.snapshot(&self.topic);
            self.cached_generation = generation;
            self.stale = false;
        }

        for tx in &self.cached {
            if self.reliable {
                match tx.send_timeout(sample.clone(), RELIABLE_SEND_TIMEOUT) {
                    Ok(()) => {}
                    Err(SendTimeoutError::Timeout(_)) => {
                        return Err(PerfError::Transport(format!(
                            "subscriber on '{}' did not drain within {:?}",
                            self.topic, RELIABLE_SEND_TIMEOUT
                        )));
                    }
                    Err(SendTimeoutError::Disconnected(_)) => {
                        // Subscriber left; prune on the next publish.
                        self.stale = true;
                    }
                }
            } else {
                match tx.try_send(sample.clone()) {
                    Ok(()) | Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Disconnected(_)) => {
                        self.stale = true;
                    }
                }
            }
        }
        Ok(())
    }
}

struct SubscriptionEndpoint {
    hub: Arc<TransportHub>,
    topic: String,
    id: u64,
    rx: Receiver<Sample>,
}

impl Drop for SubscriptionEndpoint {
    fn drop(&mut self) {
        self.hub.unsubscribe(&self.topic, self.id);
    }
}

pub struct IntraProcessCommunicator {
    config: Arc<ExperimentConfig>,
    hub: Arc<TransportHub>,
    logger: Arc<EventLogger>,
    pub_id: EndpointId,
    sub_id: EndpointId,
    prev_sequence_id: u64,
    publisher: Option<PublisherEndpoint>,
    subscription: Option<SubscriptionEndpoint>,
}

impl IntraProcessCommunicator {
    pub fn new(
        config: Arc<ExperimentConfig>,
        hub: Arc<TransportHub>,
        logger: Arc<EventLogger>,
    ) -> Result<Self, PerfError> {
        validate_qos(&config.qos)?;
        Ok(Self {
            config,
            hub,
            logger,
            pub_id: EndpointId::generate(),
            sub_id: EndpointId::generate(),
            prev_sequence_id: 0,
            publisher: None,
            subscription: None,
        })
    }

    /// Sequence ids start at 1; 0 marks a default-constructed sample.
    fn next_sequence_id(&mut self) -> u64 {
        self.prev_sequence_id += 1;
        self.prev_sequence_id
    }

    fn ensure_publisher(&mut self) {
        if self.publisher.is_none() {
            let topic = self.config.pub_topic();
            self.logger
                .register_pub(&self.pub_id, self.config.msg.name, &topic);
            self.publisher = Some(PublisherEndpoint::new(
                self.hub.clone(),
                topic,
                &self.config.qos,
            ));
        }
    }

    fn ensure_subscription(&mut self) {
        if self.subscription.is_none() {
            let topic = self.config.sub_topic();
            let (id, rx) = self.hub.subscribe(&topic, &self.config.qos);
            self.logger
                .register_sub(&self.sub_id, self.config.msg.name, &topic, self.config.msg.size);
            self.subscription = Some(SubscriptionEndpoint {
                hub: self.hub.clone(),
                topic,
                id,
                rx,
            });
        }
    }

    fn publish_sample(&mut self, timestamp: i64) -> Result<(), PerfError> {
        self.ensure_publisher();
        let sequence_id = self.next_sequence_id();
        let sample = Sample {
            pub_id: self.pub_id.clone(),
            sequence_id,
            timestamp,
        };
        match self.publisher.as_mut() {
            Some(publisher) => publisher.send_to_all(&sample)?,
            None => return Err(PerfError::Transport("publisher endpoint missing".into())),
        }
        // Only after the transport accepted the sample.
        self.logger.message_sent(&self.pub_id, sequence_id, timestamp);
        Ok(())
    }

    fn handle_sample(&mut self, sample: Sample) -> Result<(), PerfError> {
        if self.config.roundtrip_mode == RoundTripMode::Relay {
            // Republish under our own identity but keep the origin
            // timestamp, so the far side measures both hops end to end.
            // A relay never records a receive.
            self.publish_sample(sample.timestamp)
        } else {
            self.logger.message_received(
                &self.sub_id,
                &sample.pub_id,
                sample.sequence_id,
                PerfClock::timestamp(),
            );
            Ok(())
        }
    }
}

impl Communicator for IntraProcessCommunicator {
    fn publish(&mut self) -> Result<(), PerfError> {
        self.publish_sample(PerfClock::timestamp())
    }

    fn update_subscription(&mut self) -> Result<(), PerfError> {
        self.ensure_subscription();
        let rx = match self.subscription.as_ref() {
            Some(s) => s.rx.clone(),
            None => return Err(PerfError::Transport("subscription endpoint missing".into())),
        };

        match rx.recv_timeout(RECEIVE_POLL_SLICE) {
            Ok(sample) => {
                self.handle_sample(sample)?;
                while let Ok(sample) = rx.try_recv() {
                    self.handle_sample(sample)?;
                }
                Ok(())
            }
            Err(crossbeam::channel::RecvTimeoutError::Timeout) => Ok(()),
            Err(crossbeam::channel::RecvTimeoutError::Disconnected) => {
                // All publishers are gone (shutdown in progress); keep the
                // loop paced until the run flag stops us.
                debug!("subscription on '{}' has no publishers left", self.config.sub_topic());
                thread::sleep(RECEIVE_POLL_SLICE);
                Ok(())
            }
        }
    }
}

fn validate_qos(qos: &QosProfile) -> Result<(), PerfError> {
    if qos.durability == Durability::TransientLocal {
        return Err(PerfError::UnsupportedQos(
            "transient-local durability is not supported by the intra-process transport".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::sink::EventSink;
    use crate::events::{
        EventMessageReceived, EventMessageSent, EventRegisterPub, EventRegisterSub,
        EventSystemMeasured,
    };
    use crate::msg;

    #[derive(Default, Clone)]
    struct Captured {
        register_pub: Vec<EventRegisterPub>,
        register_sub: Vec<EventRegisterSub>,
        sent: Vec<EventMessageSent>,
        received: Vec<EventMessageReceived>,
    }

    struct CaptureSink(Arc<Mutex<Captured>>);

    impl EventSink for CaptureSink {
        fn register_pub(&mut self, event: &EventRegisterPub) {
            self.0.lock().register_pub.push(event.clone());
        }
        fn register_sub(&mut self, event: &EventRegisterSub) {
            self.0.lock().register_sub.push(event.clone());
        }
        fn message_sent(&mut self, event: &EventMessageSent) {
            self.0.lock().sent.push(event.clone());
        }
        fn message_received(&mut self, event: &EventMessageReceived) {
            self.0.lock().received.push(event.clone());
        }
        fn system_measured(&mut self, _event: &EventSystemMeasured) {}
    }

    fn test_config(mode: RoundTripMode) -> Arc<ExperimentConfig> {
        Arc::new(ExperimentConfig {
            topic: "loop_topic".into(),
            msg: msg::lookup("Array256").unwrap(),
            rate: 0,
            num_publishers: 1,
            num_subscribers: 1,
            max_runtime: 0,
            rows_to_ignore: 0,
            roundtrip_mode: mode,
            qos: QosProfile::default(),
            output_event_db: false,
            outputs: vec![],
            pin_core: None,
            rt_priority: None,
        })
    }

    fn harness(
        mode: RoundTripMode,
    ) -> (
        Arc<TransportHub>,
        Arc<EventLogger>,
        Arc<Mutex<Captured>>,
        Arc<ExperimentConfig>,
    ) {
        let captured = Arc::new(Mutex::new(Captured::default()));
        let sinks: Vec<Box<dyn EventSink>> = vec![Box::new(CaptureSink(captured.clone()))];
        let logger = Arc::new(EventLogger::new(sinks).unwrap());
        (Arc::new(TransportHub::new()), logger, captured, test_config(mode))
    }

    #[test]
    fn publish_reaches_every_subscriber_in_order() {
        let (hub, logger, captured, config) = harness(RoundTripMode::None);

        let mut publisher =
            IntraProcessCommunicator::new(config.clone(), hub.clone(), logger.clone()).unwrap();
        let mut sub_a =
            IntraProcessCommunicator::new(config.clone(), hub.clone(), logger.clone()).unwrap();
        let mut sub_b =
            IntraProcessCommunicator::new(config.clone(), hub.clone(), logger.clone()).unwrap();

        // First poll creates the subscriptions before anything is sent.
        sub_a.update_subscription().unwrap();
        sub_b.update_subscription().unwrap();

        for _ in 0..10 {
            publisher.publish().unwrap();
        }
        sub_a.update_subscription().unwrap();
        sub_b.update_subscription().unwrap();

        logger.shutdown();
        let captured = captured.lock();
        assert_eq!(captured.sent.len(), 10);
        assert_eq!(captured.received.len(), 20);
        let seqs: Vec<u64> = captured.sent.iter().map(|e| e.sequence_id).collect();
        assert_eq!(seqs, (1..=10).collect::<Vec<_>>());
        for sub_id in [&sub_a.sub_id, &sub_b.sub_id] {
            let per_sub: Vec<u64> = captured
                .received
                .iter()
                .filter(|e| &e.sub_id == sub_id)
                .map(|e| e.sequence_id)
                .collect();
            assert_eq!(per_sub, (1..=10).collect::<Vec<_>>());
        }
    }

    #[test]
    fn publishing_without_subscribers_still_records_sent() {
        let (hub, logger, captured, config) = harness(RoundTripMode::None);
        let mut publisher = IntraProcessCommunicator::new(config, hub, logger.clone()).unwrap();
        publisher.publish().unwrap();
        publisher.publish().unwrap();
        logger.shutdown();
        let captured = captured.lock();
        assert_eq!(captured.sent.len(), 2);
        assert_eq!(captured.register_pub.len(), 1);
    }

    #[test]
    fn best_effort_drops_on_full_history() {
        let (hub, logger, captured, config) = harness(RoundTripMode::None);
        let mut config = (*config).clone();
        config.qos.reliability = Reliability::BestEffort;
        config.qos.history_kind = HistoryKind::KeepLast;
        config.qos.history_depth = 4;
        let config = Arc::new(config);

        let mut publisher =
            IntraProcessCommunicator::new(config.clone(), hub.clone(), logger.clone()).unwrap();
        let mut subscriber =
            IntraProcessCommunicator::new(config.clone(), hub.clone(), logger.clone()).unwrap();
        subscriber.update_subscription().unwrap();

        // Twice the history depth; the excess must drop without blocking.
        for _ in 0..8 {
            publisher.publish().unwrap();
        }
        subscriber.update_subscription().unwrap();

        logger.shutdown();
        let captured = captured.lock();
        assert_eq!(captured.sent.len(), 8);
        assert_eq!(captured.received.len(), 4);
    }

    #[test]
    fn relay_republishes_and_never_records_receives() {
        let (hub, logger, captured, main_config) = harness(RoundTripMode::Main);
        let relay_config = Arc::new(ExperimentConfig {
            roundtrip_mode: RoundTripMode::Relay,
            ..(*main_config).clone()
        });

        let mut main_pub =
            IntraProcessCommunicator::new(main_config.clone(), hub.clone(), logger.clone())
                .unwrap();
        let mut relay =
            IntraProcessCommunicator::new(relay_config, hub.clone(), logger.clone()).unwrap();
        let mut main_sub =
            IntraProcessCommunicator::new(main_config.clone(), hub.clone(), logger.clone())
                .unwrap();

        relay.update_subscription().unwrap();
        main_sub.update_subscription().unwrap();

        main_pub.publish().unwrap();
        relay.update_subscription().unwrap();
        main_sub.update_subscription().unwrap();

        logger.shutdown();
        let captured = captured.lock();
        // One sent by the origin, one by the relay.
        assert_eq!(captured.sent.len(), 2);
        // Relay keeps the origin timestamp on its own sent event.
        assert_eq!(captured.sent[0].timestamp, captured.sent[1].timestamp);
        assert_ne!(captured.sent[0].pub_id, captured.sent[1].pub_id);
        // Only the main-side subscriber records a receive, from the relay.
        assert_eq!(captured.received.len(), 1);
        assert_eq!(captured.received[0].pub_id, captured.sent[1].pub_id);
        assert_eq!(captured.received[0].sub_id, main_sub.sub_id);
    }

    #[test]
    fn transient_local_durability_is_rejected() {
        let (hub, logger, _captured, config) = harness(RoundTripMode::None);
        let mut config = (*config).clone();
        config.qos.durability = Durability::TransientLocal;
        let outcome = IntraProcessCommunicator::new(Arc::new(config), hub, logger.clone());
        assert!(matches!(outcome, Err(PerfError::UnsupportedQos(_))));
        logger.shutdown();
    }

    #[test]
    fn dropped_subscription_is_pruned_from_the_hub() {
        let (hub, logger, _captured, config) = harness(RoundTripMode::None);
        {
            let mut subscriber =
                IntraProcessCommunicator::new(config.clone(), hub.clone(), logger.clone())
                    .unwrap();
            subscriber.update_subscription().unwrap();
            assert_eq!(hub.snapshot("loop_topic").len(), 1);
        }
        assert!(hub.snapshot("loop_topic").is_empty());
        logger.shutdown();
    }
}
