//! Real-time scheduling hooks applied at driver-thread start: optional core
//! pinning and thread priority. Both are best-effort; failures are logged
//! and the experiment continues unpinned.

use log::{info, warn};
use thread_priority::{ThreadPriority, ThreadPriorityValue, set_current_thread_priority};

/// Applies the configured core affinity and priority to the current thread.
pub fn apply_thread_settings(pin_core: Option<usize>, priority: Option<u8>) {
    if let Some(core) = pin_core {
        pin_to_core(core);
    }
    if let Some(prio) = priority {
        set_priority(prio);
    }
}

fn pin_to_core(core: usize) {
    let core_ids = core_affinity::get_core_ids().unwrap_or_default();
    match core_ids.get(core) {
        Some(core_id) => {
            if core_affinity::set_for_current(*core_id) {
                info!("pinned thread to core {}", core);
            } else {
                warn!("failed to pin thread to core {}", core);
            }
        }
        None => warn!("core {} not available ({} cores)", core, core_ids.len()),
    }
}

fn set_priority(prio: u8) {
    match ThreadPriorityValue::try_from(prio) {
        Ok(value) => {
            if let Err(e) = set_current_thread_priority(ThreadPriority::Crossplatform(value)) {
                warn!("failed to set thread priority {}: {:?}", prio, e);
            }
        }
        Err(e) => warn!("thread priority {} out of range: {}", prio, e),
    }
}
