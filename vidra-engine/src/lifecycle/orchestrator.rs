//! Steady-state transition orchestration
//!
//! Per game, a four-phase machine: Idle → Prepare (fade out, mark loading,
//! settle so rapid pushes coalesce) → Loading (assign source, await
//! can-render bounded by timeout) → Settling (fade back in, clear loading,
//! anchor the base image). A newer target preempts an in-flight transition
//! by bumping the game's generation and aborting its task; every phase
//! re-checks it is still the current generation before touching anything,
//! so a cancelled transition is never partially applied.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::{debug, trace};

use vidra_common::records::PublishedType;

use crate::config::EngineConfig;
use crate::page::{attrs, ElementId, Page, VideoSurface};
use crate::resolve::ResolvedAssets;
use crate::store::{GameStateStore, StatePatch};

/// A new visual target for one game
#[derive(Debug, Clone)]
pub struct TransitionTarget {
    pub game_id: String,
    pub version: u64,
    pub assets: ResolvedAssets,
    pub published: bool,
    pub published_type: PublishedType,
    pub animate: bool,
    pub hover: bool,
}

struct Slot {
    generation: u64,
    version: u64,
    image_url: String,
    video_url: Option<String>,
    handle: Option<JoinHandle<()>>,
}

type Slots = Arc<Mutex<HashMap<String, Slot>>>;

/// Whether `generation` is still the current transition for this game
fn is_current(slots: &Slots, game_id: &str, generation: u64) -> bool {
    slots
        .lock()
        .unwrap()
        .get(game_id)
        .map(|slot| slot.generation == generation)
        .unwrap_or(false)
}

/// Transition orchestrator for all tracked games
pub struct Orchestrator {
    store: Arc<GameStateStore>,
    page: Arc<dyn Page>,
    config: Arc<EngineConfig>,
    slots: Slots,
}

impl Orchestrator {
    pub fn new(store: Arc<GameStateStore>, page: Arc<dyn Page>, config: Arc<EngineConfig>) -> Self {
        Self {
            store,
            page,
            config,
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Apply a new target for a game
    ///
    /// Ignores targets that are equal-or-older than what is displayed or
    /// in flight. For a game without a mounted video surface the store is
    /// updated directly and the cold-start path picks the target up when
    /// the surface mounts.
    pub fn apply(&self, target: TransitionTarget) {
        let surfaces = self.mounted_surfaces(&target.game_id);
        if surfaces.is_empty() {
            trace!(game_id = %target.game_id, "no mounted surface, storing target");
            self.store.set(
                &target.game_id,
                StatePatch {
                    poster_url: Some(target.assets.image_url.clone()),
                    video_url: Some(target.assets.video_url.clone()),
                    version: Some(target.version),
                    published: Some(target.published),
                    published_type: Some(target.published_type),
                    animate: Some(target.animate),
                    hover: Some(target.hover),
                    loading: Some(false),
                    ..Default::default()
                },
            );
            return;
        }

        let mut slots = self.slots.lock().unwrap();

        if let Some(slot) = slots.get(&target.game_id) {
            if is_stale_against(&target, slot.version, &slot.image_url, &slot.video_url) {
                debug!(
                    game_id = %target.game_id,
                    version = target.version,
                    "ignoring stale target"
                );
                return;
            }
        } else if let Some(state) = self.store.get(&target.game_id) {
            if is_stale_against(&target, state.version, &state.poster_url, &state.video_url) {
                debug!(
                    game_id = %target.game_id,
                    version = target.version,
                    "ignoring stale target"
                );
                return;
            }
        }

        let generation = slots
            .get(&target.game_id)
            .map(|s| s.generation + 1)
            .unwrap_or(1);

        // Supersede: the old task's timers must never fire into the page
        // after a newer target started.
        if let Some(old) = slots.remove(&target.game_id) {
            if let Some(handle) = old.handle {
                handle.abort();
            }
        }

        // Insert the slot before spawning so the new task always sees
        // itself as current, then attach the handle under the same lock.
        slots.insert(
            target.game_id.clone(),
            Slot {
                generation,
                version: target.version,
                image_url: target.assets.image_url.clone(),
                video_url: target.assets.video_url.clone(),
                handle: None,
            },
        );
        let handle = tokio::spawn(run_transition(
            self.store.clone(),
            self.page.clone(),
            self.config.clone(),
            self.slots.clone(),
            target.clone(),
            surfaces,
            generation,
        ));
        if let Some(slot) = slots.get_mut(&target.game_id) {
            if slot.generation == generation {
                slot.handle = Some(handle);
            }
        }
        drop(slots);

        debug!(
            game_id = %target.game_id,
            version = target.version,
            generation,
            "transition scheduled"
        );
    }

    fn mounted_surfaces(&self, game_id: &str) -> Vec<(ElementId, Arc<dyn VideoSurface>)> {
        self.page
            .elements_for_game(game_id)
            .into_iter()
            .filter_map(|el| self.page.video_surface(el).map(|s| (el, s)))
            .collect()
    }

    /// Drop all per-game tracking (page teardown)
    pub fn teardown(&self) {
        let mut slots = self.slots.lock().unwrap();
        for (_, slot) in slots.drain() {
            if let Some(handle) = slot.handle {
                handle.abort();
            }
        }
    }
}

fn is_stale_against(
    target: &TransitionTarget,
    version: u64,
    image_url: &str,
    video_url: &Option<String>,
) -> bool {
    if target.version < version {
        return true;
    }
    target.version == version
        && target.assets.image_url == image_url
        && target.assets.video_url == *video_url
}

async fn run_transition(
    store: Arc<GameStateStore>,
    page: Arc<dyn Page>,
    config: Arc<EngineConfig>,
    slots: Slots,
    target: TransitionTarget,
    surfaces: Vec<(ElementId, Arc<dyn VideoSurface>)>,
    generation: u64,
) {
    // Settle window: rapid repeated pushes coalesce into one swap.
    tokio::time::sleep(config.settle_delay).await;
    if !is_current(&slots, &target.game_id, generation) {
        return;
    }

    // Prepare: fade out and mark loading.
    for (_, surface) in &surfaces {
        surface.set_opacity(0.0);
    }
    store.update(
        &target.game_id,
        StatePatch {
            version: Some(target.version),
            published: Some(target.published),
            published_type: Some(target.published_type),
            animate: Some(target.animate),
            hover: Some(target.hover),
            loading: Some(true),
            ..Default::default()
        },
    );

    tokio::time::sleep(config.prepare_hold).await;
    if !is_current(&slots, &target.game_id, generation) {
        return;
    }

    // Loading: assign the new source and wait until it can render.
    let image = &target.assets.image_url;
    let use_video = target.assets.video_url.is_some() && target.animate;
    for (_, surface) in &surfaces {
        surface.set_blur(10.0);
        if use_video {
            let video = target.assets.video_url.as_deref();
            surface.set_source(video, image);
            let ready = surface.ready();
            // Bounded wait: a slow or broken video never hangs the phase;
            // on timeout we settle with whatever was assigned.
            if tokio::time::timeout(config.ready_timeout, ready.notified())
                .await
                .is_err()
            {
                debug!(game_id = %target.game_id, "can-render timeout, settling anyway");
            }
            surface.begin_decode();
        } else {
            surface.set_source(None, image);
        }
    }
    if !is_current(&slots, &target.game_id, generation) {
        return;
    }

    // Settling: fade back in, clear loading, anchor the fade image.
    for (el, surface) in &surfaces {
        surface.set_opacity(1.0);
        surface.set_blur(0.0);
        if let Some(variant) = target.assets.variant {
            surface.set_attribute(attrs::VARIANT, &variant.to_string());
        }
        page.set_attribute(*el, attrs::VERSION, &target.version.to_string());
        page.set_attribute(*el, attrs::TYPE, &target.published_type.to_string());
    }
    store.update(
        &target.game_id,
        StatePatch {
            poster_url: Some(image.clone()),
            video_url: Some(target.assets.video_url.clone()),
            loading: Some(false),
            base_image_src: Some(image.clone()),
            ..Default::default()
        },
    );
    debug!(game_id = %target.game_id, version = target.version, "transition settled");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{MemoryPage, SurfaceOp};
    use crate::resolve::AssetSource;
    use std::time::Duration;

    fn target(game_id: &str, version: u64, image: &str, video: Option<&str>) -> TransitionTarget {
        TransitionTarget {
            game_id: game_id.to_string(),
            version,
            assets: ResolvedAssets {
                image_url: image.to_string(),
                video_url: video.map(String::from),
                variant: None,
                source: AssetSource::Tier,
            },
            published: true,
            published_type: PublishedType::Current,
            animate: true,
            hover: true,
        }
    }

    fn setup() -> (Arc<MemoryPage>, Arc<GameStateStore>, Orchestrator, ElementId) {
        let page = Arc::new(MemoryPage::new());
        let el = page.add_game(None, "g1", "old.jpg");
        page.mount_video(el, "old.jpg");

        let store = Arc::new(GameStateStore::new());
        store.set(
            "g1",
            StatePatch {
                poster_url: Some("old.jpg".into()),
                version: Some(1),
                ..Default::default()
            },
        );

        let orchestrator = Orchestrator::new(
            store.clone(),
            page.clone() as Arc<dyn Page>,
            Arc::new(EngineConfig::default()),
        );
        (page, store, orchestrator, el)
    }

    async fn settle() {
        // Longer than settle + hold + ready timeout + fade combined.
        tokio::time::sleep(Duration::from_secs(20)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn transition_applies_target_and_anchors_base_image() {
        let (page, store, orchestrator, el) = setup();

        orchestrator.apply(target("g1", 2, "new.jpg", Some("new.mp4")));
        settle().await;

        let surface = page.memory_surface(el).unwrap();
        assert_eq!(surface.source().as_deref(), Some("new.mp4"));
        assert_eq!(surface.poster(), "new.jpg");
        assert_eq!(surface.opacity(), 1.0);
        assert_eq!(surface.blur(), 0.0);

        let state = store.get("g1").unwrap();
        assert!(!state.loading);
        assert_eq!(state.version, 2);
        assert_eq!(state.base_image_src.as_deref(), Some("new.jpg"));
        assert_eq!(page.attribute(el, attrs::VERSION).as_deref(), Some("2"));
    }

    #[tokio::test(start_paused = true)]
    async fn newer_target_supersedes_in_flight_transition() {
        let (page, _store, orchestrator, el) = setup();

        orchestrator.apply(target("g1", 2, "a.jpg", Some("a.mp4")));
        // The first transition is still inside its settle window.
        tokio::time::sleep(Duration::from_millis(100)).await;
        orchestrator.apply(target("g1", 3, "b.jpg", Some("b.mp4")));
        settle().await;

        let surface = page.memory_surface(el).unwrap();
        assert_eq!(surface.source().as_deref(), Some("b.mp4"));
        // Exactly one final state: nothing of the superseded target ever
        // reached the surface.
        let sources: Vec<_> = surface
            .ops()
            .into_iter()
            .filter(|op| matches!(op, SurfaceOp::Source { .. }))
            .collect();
        assert_eq!(
            sources,
            vec![SurfaceOp::Source {
                src: Some("b.mp4".into()),
                poster: "b.jpg".into(),
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn older_version_is_ignored() {
        let (page, store, orchestrator, el) = setup();

        orchestrator.apply(target("g1", 5, "new.jpg", Some("new.mp4")));
        settle().await;
        orchestrator.apply(target("g1", 4, "stale.jpg", Some("stale.mp4")));
        settle().await;

        let surface = page.memory_surface(el).unwrap();
        assert_eq!(surface.source().as_deref(), Some("new.mp4"));
        assert_eq!(store.get("g1").unwrap().version, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn same_version_same_assets_does_not_restart() {
        let (page, _store, orchestrator, el) = setup();

        orchestrator.apply(target("g1", 2, "new.jpg", Some("new.mp4")));
        settle().await;
        orchestrator.apply(target("g1", 2, "new.jpg", Some("new.mp4")));
        settle().await;

        let surface = page.memory_surface(el).unwrap();
        let sources = surface
            .ops()
            .into_iter()
            .filter(|op| matches!(op, SurfaceOp::Source { .. }))
            .count();
        assert_eq!(sources, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn same_version_changed_assets_transitions() {
        let (page, _store, orchestrator, el) = setup();

        orchestrator.apply(target("g1", 2, "new.jpg", Some("new.mp4")));
        settle().await;
        // Promotion toggles can change the resolved output without a
        // version bump.
        orchestrator.apply(target("g1", 2, "promo.jpg", Some("promo.mp4")));
        settle().await;

        let surface = page.memory_surface(el).unwrap();
        assert_eq!(surface.source().as_deref(), Some("promo.mp4"));
    }

    #[tokio::test(start_paused = true)]
    async fn ready_timeout_degrades_to_settling() {
        let (page, store, orchestrator, el) = setup();
        page.set_auto_ready(false);
        // Remount so the surface picks up the manual-ready mode.
        page.mount_video(el, "old.jpg");

        orchestrator.apply(target("g1", 2, "new.jpg", Some("new.mp4")));
        settle().await;

        let surface = page.memory_surface(el).unwrap();
        // The source was assigned and the transition settled despite the
        // can-render signal never firing.
        assert_eq!(surface.source().as_deref(), Some("new.mp4"));
        assert_eq!(surface.opacity(), 1.0);
        assert!(!store.get("g1").unwrap().loading);
    }

    #[tokio::test(start_paused = true)]
    async fn animate_false_clears_video() {
        let (page, _store, orchestrator, el) = setup();

        let mut t = target("g1", 2, "new.jpg", Some("new.mp4"));
        t.animate = false;
        orchestrator.apply(t);
        settle().await;

        let surface = page.memory_surface(el).unwrap();
        assert_eq!(surface.source(), None);
        assert_eq!(surface.poster(), "new.jpg");
    }

    #[tokio::test(start_paused = true)]
    async fn unmounted_game_gets_store_update_only() {
        let page = Arc::new(MemoryPage::new());
        page.add_game(None, "g2", "g2.jpg");
        let store = Arc::new(GameStateStore::new());
        let orchestrator = Orchestrator::new(
            store.clone(),
            page.clone() as Arc<dyn Page>,
            Arc::new(EngineConfig::default()),
        );

        orchestrator.apply(target("g2", 1, "r.jpg", Some("r.mp4")));

        let state = store.get("g2").unwrap();
        assert_eq!(state.poster_url, "r.jpg");
        assert_eq!(state.video_url.as_deref(), Some("r.mp4"));
        assert!(!state.loading);
    }
}
