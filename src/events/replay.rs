//! Offline re-derivation of per-window results from a persisted event log.
//!
//! Walks fixed-size windows over the recorded timestamps and applies the
//! same reduction as the live aggregator. Unlike the live path, the sent
//! map joins across window boundaries, so a sample received in a later
//! window than it was sent still gets a latency value; a received event
//! with no sent counterpart anywhere in the log is a hard fault here.
//! This path is the ground-truth oracle for the live aggregator.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::PerfError;
use crate::events::EndpointId;
use crate::events::source::EventSource;
use crate::output::AnalysisResult;
use crate::utils::statistics::StatisticsTracker;

type MessageKey = (EndpointId, u64);

/// Reduces the events of `topic` into one `AnalysisResult` per `window`.
pub fn replay_windows(
    source: &dyn EventSource,
    topic: &str,
    window: Duration,
) -> Result<Vec<AnalysisResult>, PerfError> {
    let subs = source.query_register_sub(topic)?;
    let num_subs = subs.len() as u64;
    let data_sizes: HashMap<EndpointId, usize> = subs
        .into_iter()
        .map(|s| (s.sub_id, s.data_size))
        .collect();

    let Some((t_first, t_last)) = source.time_bounds()? else {
        return Ok(Vec::new());
    };
    let window_ns = window.as_nanos() as i64;
    if window_ns <= 0 {
        return Err(PerfError::Config("replay window must be positive".into()));
    }

    let mut published_ts: HashMap<MessageKey, i64> = HashMap::new();
    let mut received_count: HashMap<MessageKey, u64> = HashMap::new();
    let mut latest_received: HashMap<(EndpointId, EndpointId), u64> = HashMap::new();
    let mut last_system = None;

    let mut results = Vec::new();
    let mut start = t_first;
    while start <= t_last {
        let end = start + window_ns;

        let sent = source.query_message_sent(start, end, topic)?;
        let received = source.query_message_received(start, end, topic)?;
        let system = source.query_system_measured(start, end)?;

        for event in &sent {
            published_ts.insert((event.pub_id.clone(), event.sequence_id), event.timestamp);
        }

        let mut latency = StatisticsTracker::new();
        let mut num_lost: u64 = 0;
        let mut sum_data_received: u64 = 0;

        for event in &received {
            let key: MessageKey = (event.pub_id.clone(), event.sequence_id);
            let Some(&sent_ts) = published_ts.get(&key) else {
                return Err(PerfError::FatalInvariant(format!(
                    "received message ({}, {}) that was never sent",
                    event.pub_id, event.sequence_id
                )));
            };
            latency.add_sample((event.timestamp - sent_ts) as f64 * 1e-9);

            let pair = (event.sub_id.clone(), event.pub_id.clone());
            let prev = latest_received.get(&pair).copied().unwrap_or(0);
            if event.sequence_id <= prev {
                return Err(PerfError::FatalInvariant(format!(
                    "non-monotonic sequence for pair ({}, {}): received {} after {}",
                    event.sub_id, event.pub_id, event.sequence_id, prev
                )));
            }

            for lost_seq in (prev + 1)..event.sequence_id {
                num_lost += 1;
                account(
                    &mut received_count,
                    &mut published_ts,
                    num_subs,
                    (event.pub_id.clone(), lost_seq),
                );
            }
            account(&mut received_count, &mut published_ts, num_subs, key);
            latest_received.insert(pair, event.sequence_id);

            sum_data_received += data_sizes.get(&event.sub_id).copied().unwrap_or(0) as u64;
        }

        if let Some(measured) = system.last() {
            last_system = Some(*measured);
        }
        let (cpu_info, resource_usage) = last_system
            .map(|m| (m.cpu_info, m.resource_usage))
            .unwrap_or_default();

        results.push(AnalysisResult {
            experiment_elapsed_ns: end - t_first,
            window_ns,
            num_received: received.len() as u64,
            num_sent: sent.len() as u64,
            num_lost,
            sum_data_received,
            latency,
            cpu_info,
            resource_usage,
        });

        start = end;
    }

    Ok(results)
}

fn account(
    received_count: &mut HashMap<MessageKey, u64>,
    published_ts: &mut HashMap<MessageKey, i64>,
    num_subs: u64,
    key: MessageKey,
) {
    if num_subs == 0 {
        return;
    }
    let count = received_count.entry(key.clone()).or_insert(0);
    *count += 1;
    if *count >= num_subs {
        received_count.remove(&key);
        published_ts.remove(&key);
    }
}
