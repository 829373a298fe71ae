//! Engine tuning parameters
//!
//! All timings that pace the transition state machines and the analytics
//! collector live here, so tests and embedders can tighten or stretch them
//! without touching the engine code.

use std::time::Duration;

/// Engine configuration with production defaults
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Delay before a transition starts, so rapid repeated pushes coalesce
    /// into one visible swap
    pub settle_delay: Duration,

    /// How long the faded-out/blurred state holds before the new source is
    /// assigned
    pub prepare_hold: Duration,

    /// Bound on waiting for the video's can-render signal; on expiry the
    /// transition proceeds with whatever the surface has
    pub ready_timeout: Duration,

    /// Wait before surfacing the cold-start spinner; targets that resolve
    /// faster than this never show a spinner
    pub spinner_delay: Duration,

    /// Minimum time the spinner stays visible once shown, so it never
    /// flashes for a single frame
    pub spinner_min_dwell: Duration,

    /// Duration of the cold-start fade from poster image to video
    pub swap_fade: Duration,

    /// Flush the analytics buffer as soon as it holds this many events
    pub analytics_batch_size: usize,

    /// Flush the analytics buffer this long after the last enqueue
    pub analytics_flush_after: Duration,

    /// Most-recent events kept in the offline fallback queue
    pub offline_queue_capacity: usize,

    /// Reconnection attempts before the transport gives up
    pub reconnect_attempts: u32,

    /// First reconnection delay; doubles per attempt
    pub reconnect_base_delay: Duration,

    /// Ceiling for the reconnection delay
    pub reconnect_max_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(1000),
            prepare_hold: Duration::from_millis(3000),
            ready_timeout: Duration::from_millis(3000),
            spinner_delay: Duration::from_millis(2000),
            spinner_min_dwell: Duration::from_millis(3000),
            swap_fade: Duration::from_millis(600),
            analytics_batch_size: 10,
            analytics_flush_after: Duration::from_millis(5000),
            offline_queue_capacity: 1000,
            reconnect_attempts: 5,
            reconnect_base_delay: Duration::from_millis(1000),
            reconnect_max_delay: Duration::from_secs(30),
        }
    }
}
