//! Real-time transport
//!
//! WebSocket connection to the relay server with automatic reconnection.
//! Inbound frames fan out to subscribers over a broadcast channel; the
//! connected flag is a watch channel observers can await. On every
//! (re)connect the transport re-subscribes to all registered game rooms
//! and requests fresh records, since state may have changed while
//! disconnected and the server does no diffing.

mod client;

pub use client::{ReconnectPolicy, Transport};

use vidra_common::records::AnalyticsEvent;

use crate::Result;

/// Delivery seam for the analytics collector
///
/// The transport implements this; tests substitute their own sink to
/// observe flushes without a live socket.
pub trait AnalyticsSink: Send + Sync {
    fn is_connected(&self) -> bool;
    fn send_batch(&self, events: Vec<AnalyticsEvent>) -> Result<()>;
}
