//! Analytics batch collection
//!
//! Buffers interaction and impression events, flushing when the buffer
//! reaches the batch size or after a quiet period since the last enqueue,
//! whichever comes first. With the channel down at flush time the batch
//! lands in a bounded offline queue and is replayed on the next connected
//! initialization. Delivery is best-effort end to end: analytics never
//! block or break the visual pipeline.

pub mod device;
pub mod offline;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use vidra_common::records::AnalyticsEvent;
use vidra_common::Variant;

use crate::config::EngineConfig;
use crate::local::LocalStore;
use crate::page::{attrs, ElementId, Page};
use crate::transport::AnalyticsSink;

struct Inner {
    buffer: Vec<AnalyticsEvent>,
    /// Bumped on every (re)schedule and flush; stale timers no-op
    timer_generation: u64,
    /// (game id, asset url) pairs already counted as impressions
    impressions: HashSet<(String, String)>,
    /// Hover/touch start times by game id
    hovers: HashMap<String, DateTime<Utc>>,
}

struct Shared {
    sink: Arc<dyn AnalyticsSink>,
    local: Arc<dyn LocalStore>,
    page: Arc<dyn Page>,
    session_id: String,
    enabled: bool,
    batch_size: usize,
    flush_after: Duration,
    offline_capacity: usize,
    inner: Mutex<Inner>,
}

/// Buffering analytics collector
///
/// Cheap to clone; all clones share one buffer.
#[derive(Clone)]
pub struct BatchCollector {
    shared: Arc<Shared>,
}

impl BatchCollector {
    pub fn new(
        sink: Arc<dyn AnalyticsSink>,
        local: Arc<dyn LocalStore>,
        page: Arc<dyn Page>,
        session_id: String,
        config: &EngineConfig,
        enabled: bool,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                sink,
                local,
                page,
                session_id,
                enabled,
                batch_size: config.analytics_batch_size,
                flush_after: config.analytics_flush_after,
                offline_capacity: config.offline_queue_capacity,
                inner: Mutex::new(Inner {
                    buffer: Vec::new(),
                    timer_generation: 0,
                    impressions: HashSet::new(),
                    hovers: HashMap::new(),
                }),
            }),
        }
    }

    /// Enqueue one event, enriched with viewport/device context
    #[allow(clippy::too_many_arguments)]
    pub fn track_event(
        &self,
        event_type: &str,
        game_id: &str,
        asset_type: &str,
        asset_url: &str,
        variant: Option<Variant>,
        creator_id: Option<String>,
        extra: BTreeMap<String, Value>,
    ) {
        if !self.shared.enabled {
            return;
        }

        let mut data = device::context_fields(&*self.shared.page);
        data.extend(extra);

        let event = AnalyticsEvent {
            id: format!("evt_{}", Uuid::new_v4().simple()),
            event_type: event_type.to_string(),
            game_id: game_id.to_string(),
            asset_type: asset_type.to_string(),
            asset_url: asset_url.to_string(),
            variant,
            session_id: self.shared.session_id.clone(),
            creator_id,
            timestamp: Utc::now(),
            data,
        };

        let flush_now = {
            let mut inner = self.shared.inner.lock().unwrap();
            inner.buffer.push(event);
            inner.buffer.len() >= self.shared.batch_size
        };

        if flush_now {
            self.flush();
        } else {
            self.schedule_flush();
        }
    }

    /// Count an impression once per distinct asset URL per game
    pub fn track_impression(&self, game_id: &str, asset_url: &str, variant: Option<Variant>) {
        {
            let mut inner = self.shared.inner.lock().unwrap();
            let key = (game_id.to_string(), asset_url.to_string());
            if !inner.impressions.insert(key) {
                return;
            }
        }
        self.track_event(
            "impression",
            game_id,
            "video",
            asset_url,
            variant,
            None,
            BTreeMap::new(),
        );
    }

    /// Hover or touch interaction began
    pub fn hover_start(
        &self,
        game_id: &str,
        asset_url: &str,
        variant: Option<Variant>,
        touch: bool,
    ) {
        self.shared
            .inner
            .lock()
            .unwrap()
            .hovers
            .insert(game_id.to_string(), Utc::now());

        let mut extra = BTreeMap::new();
        if touch {
            extra.insert("device".to_string(), Value::from("touch"));
        }
        self.track_event("hover_start", game_id, "video", asset_url, variant, None, extra);
    }

    /// Hover or touch interaction ended; duration is the wall-clock delta
    pub fn hover_end(&self, game_id: &str, asset_url: &str, variant: Option<Variant>, touch: bool) {
        let started = self.shared.inner.lock().unwrap().hovers.remove(game_id);
        let Some(started) = started else {
            return;
        };
        let duration_ms = (Utc::now() - started).num_milliseconds().max(0);

        let mut extra = BTreeMap::new();
        extra.insert("duration".to_string(), Value::from(duration_ms));
        if touch {
            extra.insert("device".to_string(), Value::from("touch"));
        }
        self.track_event("hover_end", game_id, "video", asset_url, variant, None, extra);
    }

    /// Direct click on a game's video surface
    pub fn video_click(&self, game_id: &str, asset_url: &str, variant: Option<Variant>) {
        self.track_event(
            "video_click",
            game_id,
            "video",
            asset_url,
            variant,
            None,
            BTreeMap::new(),
        );
    }

    /// Click on a button or link attributable to a game element
    ///
    /// Walks up from the clicked element to the nearest game marker, then
    /// sideways through nearby containers; the variant comes from the
    /// marker left on the game's mounted video surface.
    pub fn button_click(&self, clicked: ElementId, href: &str) {
        let page = &*self.shared.page;
        let Some(game_el) = find_game_for_element(page, clicked) else {
            return;
        };
        let Some(game_id) = page.game_id(game_el) else {
            return;
        };
        if page.attribute(game_el, attrs::ANALYTICS).as_deref() == Some("false") {
            return;
        }
        let variant = variant_for_game(page, game_el);

        self.track_event(
            "button_click",
            &game_id,
            "button",
            href,
            variant,
            None,
            BTreeMap::new(),
        );
    }

    /// Flush the buffer: deliver when connected, queue offline otherwise
    pub fn flush(&self) {
        let events = {
            let mut inner = self.shared.inner.lock().unwrap();
            inner.timer_generation += 1;
            std::mem::take(&mut inner.buffer)
        };
        if events.is_empty() {
            return;
        }

        if self.shared.sink.is_connected() {
            debug!("Flushing {} analytics events", events.len());
            if let Err(e) = self.shared.sink.send_batch(events.clone()) {
                warn!("Analytics delivery failed, queueing offline: {}", e);
                offline::append(&*self.shared.local, &events, self.shared.offline_capacity);
            }
        } else {
            debug!("Channel down, queueing {} analytics events", events.len());
            offline::append(&*self.shared.local, &events, self.shared.offline_capacity);
        }
    }

    /// Replay the offline queue and drain the buffer on a live connection
    pub fn on_connection_established(&self) {
        let pending = offline::load(&*self.shared.local);
        if !pending.is_empty() {
            debug!("Replaying {} offline analytics events", pending.len());
            let mut inner = self.shared.inner.lock().unwrap();
            let buffered = std::mem::take(&mut inner.buffer);
            inner.buffer = pending;
            inner.buffer.extend(buffered);
            drop(inner);
            offline::clear(&*self.shared.local);
        }
        self.flush();
    }

    fn schedule_flush(&self) {
        let generation = {
            let mut inner = self.shared.inner.lock().unwrap();
            inner.timer_generation += 1;
            inner.timer_generation
        };
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(this.shared.flush_after).await;
            let still_current = this.shared.inner.lock().unwrap().timer_generation == generation;
            if still_current {
                this.flush();
            }
        });
    }

    #[cfg(test)]
    fn buffered(&self) -> usize {
        self.shared.inner.lock().unwrap().buffer.len()
    }
}

/// Nearest game element for a clicked element
fn find_game_for_element(page: &dyn Page, el: ElementId) -> Option<ElementId> {
    // Up: the click happened inside a game container.
    let mut current = Some(el);
    while let Some(e) = current {
        if page.game_id(e).is_some() {
            return Some(e);
        }
        current = page.parent(e);
    }

    // Sideways: a call-to-action next to the game card. Bounded walk so a
    // page-wide button never attributes to an arbitrary game.
    let mut parent = page.parent(el);
    for _ in 0..5 {
        let Some(p) = parent else { break };
        if let Some(&found) = page.descendants_with_attribute(p, attrs::GAME_ID).first() {
            return Some(found);
        }
        parent = page.parent(p);
    }
    None
}

/// Variant marker from the game's mounted video surface
fn variant_for_game(page: &dyn Page, game_el: ElementId) -> Option<Variant> {
    let surface = page.video_surface(game_el)?;
    match surface.attribute(attrs::VARIANT).as_deref() {
        Some("A") => Some(Variant::A),
        Some("B") => Some(Variant::B),
        _ => None,
    }
}
