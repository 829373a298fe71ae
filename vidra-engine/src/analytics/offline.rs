//! Offline analytics queue
//!
//! When the channel is down at flush time, events land here instead of
//! being dropped. The queue is bounded: only the most recent events up to
//! capacity survive, oldest dropped first. A corrupt queue is discarded
//! wholesale; analytics are best-effort by design.

use tracing::warn;

use vidra_common::records::AnalyticsEvent;

use crate::local::LocalStore;

/// Storage key for the pending-events queue
pub const PENDING_KEY: &str = "vidra_analytics_pending_events";

/// Append events, keeping only the most recent `capacity`
pub fn append(local: &dyn LocalStore, events: &[AnalyticsEvent], capacity: usize) {
    let mut all = load(local);
    all.extend_from_slice(events);
    if all.len() > capacity {
        all.drain(..all.len() - capacity);
    }
    match serde_json::to_string(&all) {
        Ok(encoded) => local.set(PENDING_KEY, &encoded),
        Err(e) => warn!("Failed to encode pending analytics events: {}", e),
    }
}

/// Load the queued events; a corrupt queue reads as empty and is cleared
pub fn load(local: &dyn LocalStore) -> Vec<AnalyticsEvent> {
    let Some(raw) = local.get(PENDING_KEY) else {
        return Vec::new();
    };
    match serde_json::from_str(&raw) {
        Ok(events) => events,
        Err(e) => {
            warn!("Discarding corrupt pending analytics queue: {}", e);
            local.remove(PENDING_KEY);
            Vec::new()
        }
    }
}

/// Drop the queue after a successful replay
pub fn clear(local: &dyn LocalStore) {
    local.remove(PENDING_KEY);
}
