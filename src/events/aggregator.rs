//! Live rolling reducer: events in, one `AnalysisResult` per second out.
//!
//! The logger thread mutates the window state under a mutex; a separate
//! reporter thread wakes on a one-second tick, snapshots-and-resets the
//! window, and pushes the result to every output. The lock is held only for
//! the body of one event or one snapshot; no I/O happens under it.
//!
//! Loss is keyed on `(pub_id, sub_id)`: within such a pair sequence ids
//! must be strictly increasing, and every gap counts as lost. Lost samples
//! also advance the per-message receive counter, so `published_ts` entries
//! are reclaimed even when some subscriber never sees the message.

use crossbeam::channel::Sender;
use log::error;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::PerfError;
use crate::events::sink::EventSink;
use crate::events::{
    EndpointId, EventMessageReceived, EventMessageSent, EventRegisterPub, EventRegisterSub,
    EventSystemMeasured,
};
use crate::output::{AnalysisResult, Output};
use crate::utils::clock::PerfClock;
use crate::utils::cpu_usage::{CpuInfo, ResourceUsage};
use crate::utils::statistics::StatisticsTracker;

const REPORT_INTERVAL: Duration = Duration::from_secs(1);

type MessageKey = (EndpointId, u64);
type PairKey = (EndpointId, EndpointId); // (sub_id, pub_id)

#[derive(Default)]
struct WindowState {
    num_subs: u64,

    // Window counters, reset every report tick.
    num_sent: u64,
    num_received: u64,
    num_lost: u64,
    sum_data_received: u64,
    latency: StatisticsTracker,

    // Cross-window bookkeeping.
    published_ts: HashMap<MessageKey, i64>,
    received_count: HashMap<MessageKey, u64>,
    data_sizes: HashMap<EndpointId, usize>,
    latest_received: HashMap<PairKey, u64>,

    system: Option<(CpuInfo, ResourceUsage)>,
}

impl WindowState {
    /// Advances the receive counter for one message and reclaims the map
    /// entries once every subscriber has accounted for it (received or
    /// lost). With zero subscribers nothing is ever reclaimed.
    fn note_accounted(&mut self, key: &MessageKey) {
        if self.num_subs == 0 {
            return;
        }
        let count = self.received_count.entry(key.clone()).or_insert(0);
        *count += 1;
        if *count >= self.num_subs {
            self.received_count.remove(key);
            self.published_ts.remove(key);
        }
    }

    fn snapshot_and_reset(&mut self) -> WindowSnapshot {
        WindowSnapshot {
            num_sent: mem::take(&mut self.num_sent),
            num_received: mem::take(&mut self.num_received),
            num_lost: mem::take(&mut self.num_lost),
            sum_data_received: mem::take(&mut self.sum_data_received),
            latency: mem::take(&mut self.latency),
            system: self.system,
        }
    }
}

struct WindowSnapshot {
    num_sent: u64,
    num_received: u64,
    num_lost: u64,
    sum_data_received: u64,
    latency: StatisticsTracker,
    system: Option<(CpuInfo, ResourceUsage)>,
}

pub struct EventAggregator {
    state: Arc<Mutex<WindowState>>,
    run: Arc<AtomicBool>,
    fault_tx: Sender<PerfError>,
    reporter: Option<JoinHandle<()>>,
}

impl EventAggregator {
    /// Opens all outputs and starts the reporter thread. The first
    /// `rows_to_ignore` windows are reduced but not published.
    pub fn new(
        mut outputs: Vec<Box<dyn Output>>,
        rows_to_ignore: u64,
        fault_tx: Sender<PerfError>,
    ) -> Result<Self, PerfError> {
        for output in outputs.iter_mut() {
            output.open()?;
        }

        let state = Arc::new(Mutex::new(WindowState::default()));
        let run = Arc::new(AtomicBool::new(true));

        let reporter_state = state.clone();
        let reporter_run = run.clone();
        let reporter = thread::Builder::new()
            .name("event-aggregator".into())
            .spawn(move || report_loop(reporter_state, reporter_run, outputs, rows_to_ignore))?;

        Ok(Self {
            state,
            run,
            fault_tx,
            reporter: Some(reporter),
        })
    }

    fn fault(&self, message: String) {
        error!("{}", message);
        let _ = self.fault_tx.send(PerfError::FatalInvariant(message));
    }
}

impl Drop for EventAggregator {
    fn drop(&mut self) {
        self.run.store(false, Ordering::Release);
        if let Some(handle) = self.reporter.take() {
            let _ = handle.join();
        }
    }
}

impl EventSink for EventAggregator {
    fn register_pub(&mut self, _event: &EventRegisterPub) {}

    fn register_sub(&mut self, event: &EventRegisterSub) {
        let mut state = self.state.lock();
        state.num_subs += 1;
        state
            .data_sizes
            .insert(event.sub_id.clone(), event.data_size);
    }

    fn message_sent(&mut self, event: &EventMessageSent) {
        let mut state = self.state.lock();
        state.num_sent += 1;
        state
            .published_ts
            .insert((event.pub_id.clone(), event.sequence_id), event.timestamp);
    }

    fn message_received(&mut self, event: &EventMessageReceived) {
        let mut state = self.state.lock();
        state.num_received += 1;

        let key: MessageKey = (event.pub_id.clone(), event.sequence_id);
        // A received event may overtake its sent event across drain passes;
        // the sample is counted but not latency-sampled.
        let sent_ts = state.published_ts.get(&key).copied();
        if let Some(sent_ts) = sent_ts {
            state
                .latency
                .add_sample((event.timestamp - sent_ts) as f64 * 1e-9);
        }

        let pair: PairKey = (event.sub_id.clone(), event.pub_id.clone());
        let prev = state.latest_received.get(&pair).copied().unwrap_or(0);
        if event.sequence_id <= prev {
            drop(state);
            self.fault(format!(
                "non-monotonic sequence for pair ({}, {}): received {} after {}",
                event.sub_id, event.pub_id, event.sequence_id, prev
            ));
            return;
        }

        for lost_seq in (prev + 1)..event.sequence_id {
            state.num_lost += 1;
            state.note_accounted(&(event.pub_id.clone(), lost_seq));
        }
        state.note_accounted(&key);
        state.latest_received.insert(pair, event.sequence_id);

        let data_size = state.data_sizes.get(&event.sub_id).copied().unwrap_or(0);
        state.sum_data_received += data_size as u64;
    }

    fn system_measured(&mut self, event: &EventSystemMeasured) {
        let mut state = self.state.lock();
        state.system = Some((event.cpu_info, event.resource_usage));
    }
}

fn report_loop(
    state: Arc<Mutex<WindowState>>,
    run: Arc<AtomicBool>,
    mut outputs: Vec<Box<dyn Output>>,
    rows_to_ignore: u64,
) {
    let experiment_start = PerfClock::now();
    let mut report_time = experiment_start;
    let mut window_index: u64 = 0;

    while run.load(Ordering::Acquire) {
        let loop_start = report_time;
        report_time += REPORT_INTERVAL;
        sleep_until(report_time);

        let snapshot = state.lock().snapshot_and_reset();

        window_index += 1;
        if window_index <= rows_to_ignore {
            continue;
        }

        let now = Instant::now();
        let (cpu_info, resource_usage) = snapshot.system.unwrap_or_default();
        let result = AnalysisResult {
            experiment_elapsed_ns: (now - experiment_start).as_nanos() as i64,
            window_ns: (now - loop_start).as_nanos() as i64,
            num_received: snapshot.num_received,
            num_sent: snapshot.num_sent,
            num_lost: snapshot.num_lost,
            sum_data_received: snapshot.sum_data_received,
            latency: snapshot.latency,
            cpu_info,
            resource_usage,
        };

        for output in outputs.iter_mut() {
            output.update(&result);
        }
    }

    for output in outputs.iter_mut() {
        output.close();
    }
}

fn sleep_until(deadline: Instant) {
    let now = Instant::now();
    if deadline > now {
        thread::sleep(deadline - now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::{Receiver, unbounded};

    fn aggregator() -> (EventAggregator, Receiver<PerfError>) {
        let (fault_tx, fault_rx) = unbounded();
        let agg = EventAggregator::new(vec![], 0, fault_tx).unwrap();
        (agg, fault_rx)
    }

    fn register_sub(agg: &mut EventAggregator, sub_id: &EndpointId, data_size: usize) {
        agg.register_sub(&EventRegisterSub {
            sub_id: sub_id.clone(),
            msg_type: "Array1k".into(),
            topic: "t".into(),
            data_size,
        });
    }

    fn sent(agg: &mut EventAggregator, pub_id: &EndpointId, seq: u64, ts: i64) {
        agg.message_sent(&EventMessageSent {
            pub_id: pub_id.clone(),
            sequence_id: seq,
            timestamp: ts,
        });
    }

    fn received(
        agg: &mut EventAggregator,
        sub_id: &EndpointId,
        pub_id: &EndpointId,
        seq: u64,
        ts: i64,
    ) {
        agg.message_received(&EventMessageReceived {
            sub_id: sub_id.clone(),
            pub_id: pub_id.clone(),
            sequence_id: seq,
            timestamp: ts,
        });
    }

    #[test]
    fn one_publisher_three_subscribers_reclaims_all_state() {
        let (mut agg, _faults) = aggregator();
        let pub_id = EndpointId::generate();
        let subs: Vec<EndpointId> = (0..3).map(|_| EndpointId::generate()).collect();
        for sub in &subs {
            register_sub(&mut agg, sub, 1024);
        }

        for seq in 1..=500 {
            sent(&mut agg, &pub_id, seq, seq as i64 * 1_000);
            for sub in &subs {
                received(&mut agg, sub, &pub_id, seq, seq as i64 * 1_000 + 500);
            }
        }

        let state = agg.state.lock();
        assert_eq!(state.num_subs, 3);
        assert_eq!(state.num_received, 1500);
        assert_eq!(state.num_sent, 500);
        assert_eq!(state.num_lost, 0);
        assert!(state.published_ts.is_empty());
        assert!(state.received_count.is_empty());
        assert_eq!(state.latency.count(), 1500);
        assert_eq!(state.sum_data_received, 1500 * 1024);
    }

    #[test]
    fn dropped_sequences_count_as_lost() {
        let (mut agg, _faults) = aggregator();
        let pub_id = EndpointId::generate();
        let sub_id = EndpointId::generate();
        register_sub(&mut agg, &sub_id, 64);

        for seq in 1..=500u64 {
            sent(&mut agg, &pub_id, seq, seq as i64);
            if matches!(seq, 10 | 11 | 20) {
                continue; // subscriber never sees these
            }
            received(&mut agg, &sub_id, &pub_id, seq, seq as i64 + 10);
        }

        let state = agg.state.lock();
        assert_eq!(state.num_lost, 3);
        assert_eq!(state.num_received, 497);
        let pair = (sub_id.clone(), pub_id.clone());
        assert_eq!(state.latest_received.get(&pair).copied(), Some(500));
        // Loss equation: received + lost = last - first + 1.
        assert_eq!(state.num_received + state.num_lost, 500 - 1 + 1);
        // Lost samples also reclaim the sent map.
        assert!(state.published_ts.is_empty());
        assert!(state.received_count.is_empty());
    }

    #[test]
    fn received_before_sent_is_counted_but_not_latency_sampled() {
        let (mut agg, faults) = aggregator();
        let pub_id = EndpointId::generate();
        let sub_id = EndpointId::generate();
        register_sub(&mut agg, &sub_id, 256);

        received(&mut agg, &sub_id, &pub_id, 1, 2_000);
        {
            let state = agg.state.lock();
            assert_eq!(state.num_received, 1);
            assert_eq!(state.latency.count(), 0);
        }

        // The sent event arrives in the next drain pass; the sample stays
        // un-sampled, later ones pair up normally.
        sent(&mut agg, &pub_id, 1, 1_000);
        sent(&mut agg, &pub_id, 2, 3_000);
        received(&mut agg, &sub_id, &pub_id, 2, 4_500);

        let state = agg.state.lock();
        assert_eq!(state.num_received, 2);
        assert_eq!(state.latency.count(), 1);
        assert!((state.latency.mean() - 1.5e-6).abs() < 1e-18);
        assert!(faults.is_empty());
    }

    #[test]
    fn duplicate_sequence_is_a_fault() {
        let (mut agg, faults) = aggregator();
        let pub_id = EndpointId::generate();
        let sub_id = EndpointId::generate();
        register_sub(&mut agg, &sub_id, 16);

        sent(&mut agg, &pub_id, 1, 10);
        received(&mut agg, &sub_id, &pub_id, 1, 20);
        received(&mut agg, &sub_id, &pub_id, 1, 30);

        match faults.try_recv() {
            Ok(PerfError::FatalInvariant(msg)) => assert!(msg.contains("non-monotonic")),
            other => panic!("expected fault, got {:?}", other),
        }
    }

    #[test]
    fn regressing_sequence_is_a_fault() {
        let (mut agg, faults) = aggregator();
        let pub_id = EndpointId::generate();
        let sub_id = EndpointId::generate();
        register_sub(&mut agg, &sub_id, 16);

        sent(&mut agg, &pub_id, 5, 10);
        received(&mut agg, &sub_id, &pub_id, 5, 20);
        received(&mut agg, &sub_id, &pub_id, 3, 30);
        assert!(matches!(
            faults.try_recv(),
            Ok(PerfError::FatalInvariant(_))
        ));
    }

    #[test]
    fn zero_subscribers_keeps_sent_entries() {
        let (mut agg, _faults) = aggregator();
        let pub_id = EndpointId::generate();
        for seq in 1..=200 {
            sent(&mut agg, &pub_id, seq, seq as i64);
        }
        let state = agg.state.lock();
        // Bounded by max_runtime * rate; never reclaimed without subs.
        assert_eq!(state.published_ts.len(), 200);
        assert!(state.received_count.is_empty());
    }

    #[test]
    fn independent_pairs_track_loss_separately() {
        let (mut agg, faults) = aggregator();
        let pub_a = EndpointId::generate();
        let pub_b = EndpointId::generate();
        let sub_id = EndpointId::generate();
        register_sub(&mut agg, &sub_id, 32);

        sent(&mut agg, &pub_a, 1, 1);
        sent(&mut agg, &pub_b, 1, 1);
        sent(&mut agg, &pub_a, 2, 2);
        sent(&mut agg, &pub_b, 2, 2);

        received(&mut agg, &sub_id, &pub_a, 1, 3);
        // Same sequence from a different publisher is not a duplicate.
        received(&mut agg, &sub_id, &pub_b, 1, 3);
        received(&mut agg, &sub_id, &pub_b, 2, 4);
        received(&mut agg, &sub_id, &pub_a, 2, 4);

        assert!(faults.is_empty());
        let state = agg.state.lock();
        assert_eq!(state.num_lost, 0);
        assert_eq!(state.num_received, 4);
    }

    #[test]
    fn snapshot_resets_window_counters_only() {
        let (mut agg, _faults) = aggregator();
        let pub_id = EndpointId::generate();
        let sub_id = EndpointId::generate();
        register_sub(&mut agg, &sub_id, 128);

        sent(&mut agg, &pub_id, 1, 100);
        received(&mut agg, &sub_id, &pub_id, 1, 200);

        let snapshot = agg.state.lock().snapshot_and_reset();
        assert_eq!(snapshot.num_sent, 1);
        assert_eq!(snapshot.num_received, 1);
        assert_eq!(snapshot.latency.count(), 1);

        let state = agg.state.lock();
        assert_eq!(state.num_sent, 0);
        assert_eq!(state.num_received, 0);
        assert_eq!(state.latency.count(), 0);
        // Pair tracking survives the reset.
        assert_eq!(state.num_subs, 1);
        assert_eq!(
            state
                .latest_received
                .get(&(sub_id.clone(), pub_id.clone()))
                .copied(),
            Some(1)
        );
    }
}
