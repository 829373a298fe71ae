//! Engine facade
//!
//! Wires the transport, stores, resolution, orchestrator and analytics
//! together: inbound pushes recompute the target assets per affected game
//! and hand them to the orchestrator; discovered page elements run the
//! cold-start sequence; interaction notifications from the platform
//! binding feed the analytics collector.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use tracing::{debug, info, warn};

use vidra_common::events::{InboundEvent, OutboundEvent};
use vidra_common::records::{AbTestRecord, GameRecord, PromotionRecord};
use vidra_common::Variant;

use crate::analytics::BatchCollector;
use crate::config::EngineConfig;
use crate::lifecycle::{cold_start, Orchestrator, TransitionTarget};
use crate::local::LocalStore;
use crate::page::{attrs, ElementId, Page};
use crate::resolve::{resolve, ActiveAbTests, ActivePromotions, ResolutionContext};
use crate::session::resolve_session_id;
use crate::store::GameStateStore;
use crate::transport::{AnalyticsSink, Transport};

struct Inner {
    config: Arc<EngineConfig>,
    page: Arc<dyn Page>,
    store: Arc<GameStateStore>,
    orchestrator: Orchestrator,
    transport: Transport,
    collector: BatchCollector,
    session_id: String,

    games: RwLock<HashMap<String, GameRecord>>,
    cms_bridge: RwLock<HashMap<String, String>>,
    abtest_records: RwLock<Vec<AbTestRecord>>,
    promotion_records: RwLock<Vec<PromotionRecord>>,
    ctx: RwLock<Arc<ResolutionContext>>,

    processing: Mutex<HashSet<ElementId>>,
    processed: Mutex<HashSet<ElementId>>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

/// Top-level engine instance, one per embedded page
///
/// Cheap to clone; all clones drive the same page.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl Engine {
    pub fn new(
        page: Arc<dyn Page>,
        transport: Transport,
        local: Arc<dyn LocalStore>,
        config: EngineConfig,
        analytics_enabled: bool,
    ) -> Self {
        let config = Arc::new(config);
        let session_id = resolve_session_id(&*local);
        let store = Arc::new(GameStateStore::new());
        let orchestrator = Orchestrator::new(store.clone(), page.clone(), config.clone());
        let collector = BatchCollector::new(
            Arc::new(transport.clone()) as Arc<dyn AnalyticsSink>,
            local,
            page.clone(),
            session_id.clone(),
            &config,
            analytics_enabled,
        );

        Self {
            inner: Arc::new(Inner {
                config,
                page,
                store,
                orchestrator,
                transport,
                collector,
                session_id,
                games: RwLock::new(HashMap::new()),
                cms_bridge: RwLock::new(HashMap::new()),
                abtest_records: RwLock::new(Vec::new()),
                promotion_records: RwLock::new(Vec::new()),
                ctx: RwLock::new(Arc::new(ResolutionContext::default())),
                processing: Mutex::new(HashSet::new()),
                processed: Mutex::new(HashSet::new()),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn store(&self) -> &Arc<GameStateStore> {
        &self.inner.store
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Start processing: subscribe to pushes, hook element discovery,
    /// process the elements already present, and open the channel
    pub fn start(&self) {
        let engine = self.clone();
        let mut inbound = self.inner.transport.subscribe();
        let inbound_task = tokio::spawn(async move {
            loop {
                match inbound.recv().await {
                    Ok(event) => engine.handle_inbound(event),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Dropped {} inbound events under load", missed);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.inner.tasks.lock().unwrap().push(inbound_task);

        let engine = self.clone();
        self.inner.page.on_element_added(Box::new(move |el| {
            engine.process_element(el);
        }));

        for el in self.inner.page.game_elements() {
            self.process_element(el);
        }

        self.inner.transport.connect();
        info!(session_id = %self.inner.session_id, "engine started");
    }

    /// Tear down: close the channel and cancel in-flight work
    pub fn stop(&self) {
        self.inner.collector.flush();
        self.inner.transport.disconnect();
        self.inner.orchestrator.teardown();
        for task in self.inner.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }

    fn handle_inbound(&self, event: InboundEvent) {
        match event {
            InboundEvent::Connected => {
                debug!("channel connected");
                self.inner.collector.on_connection_established();
            }
            InboundEvent::GamesResponse { games } | InboundEvent::GamesUpdated { games } => {
                self.apply_games(games);
            }
            InboundEvent::AbtestsResponse { abtests }
            | InboundEvent::AbtestsUpdated { abtests } => {
                self.apply_abtests(abtests);
            }
            InboundEvent::PromotionsResponse { promotions }
            | InboundEvent::PromotionsUpdated { promotions } => {
                self.apply_promotions(promotions);
            }
            InboundEvent::Error { message } => {
                warn!("channel error: {}", message);
            }
        }
    }

    fn apply_games(&self, pushed: Vec<GameRecord>) {
        if pushed.is_empty() {
            return;
        }
        {
            let mut games = self.inner.games.write().unwrap();
            let mut bridge = self.inner.cms_bridge.write().unwrap();
            for game in &pushed {
                if let Some(cms_id) = &game.cms_id {
                    bridge.insert(cms_id.clone(), game.id.clone());
                }
                games.insert(game.id.clone(), game.clone());
            }
        }
        // New cms mappings can change which promo entries resolve.
        self.rebuild_context();

        let ctx = self.inner.ctx.read().unwrap().clone();
        for game in &pushed {
            self.apply_target_for(game, &ctx);
        }
    }

    fn apply_abtests(&self, records: Vec<AbTestRecord>) {
        let previously = self.inner.ctx.read().unwrap().abtests.affected_game_ids();
        *self.inner.abtest_records.write().unwrap() = records;
        self.rebuild_context();
        let newly = self.inner.ctx.read().unwrap().abtests.affected_game_ids();

        self.reapply_affected(previously, newly);
    }

    fn apply_promotions(&self, records: Vec<PromotionRecord>) {
        let previously = self
            .inner
            .ctx
            .read()
            .unwrap()
            .promotions
            .affected_game_ids();
        *self.inner.promotion_records.write().unwrap() = records;
        self.rebuild_context();
        let newly = self.inner.ctx.read().unwrap().promotions.affected_game_ids();

        self.reapply_affected(previously, newly);
    }

    /// Re-resolve every game the override change touched: games newly
    /// covered get the override, games no longer covered revert
    fn reapply_affected(&self, previously: Vec<String>, newly: Vec<String>) {
        let mut affected: Vec<String> = previously;
        for id in newly {
            if !affected.contains(&id) {
                affected.push(id);
            }
        }
        if affected.is_empty() {
            return;
        }

        let ctx = self.inner.ctx.read().unwrap().clone();
        {
            let games = self.inner.games.read().unwrap();
            for game_id in &affected {
                if let Some(game) = games.get(game_id) {
                    self.apply_target_for(game, &ctx);
                }
            }
        }

        // Also ask the server for fresh records; local state may lag.
        if self.inner.transport.is_connected() {
            let _ = self.inner.transport.emit(OutboundEvent::GetGames {
                game_ids: affected,
            });
        }
    }

    fn apply_target_for(&self, game: &GameRecord, ctx: &ResolutionContext) {
        let assets = resolve(game, ctx);
        self.inner.orchestrator.apply(TransitionTarget {
            game_id: game.id.clone(),
            version: game.version,
            assets,
            published: game.published,
            published_type: game.published_type,
            animate: game.animate,
            hover: game.hover,
        });
    }

    fn rebuild_context(&self) {
        let now = Utc::now();
        let bridge = self.inner.cms_bridge.read().unwrap().clone();
        let promotions = ActivePromotions::build(
            &self.inner.promotion_records.read().unwrap(),
            &*self.inner.page,
            &bridge,
            now,
        );
        let abtests = ActiveAbTests::build(
            &self.inner.abtest_records.read().unwrap(),
            &*self.inner.page,
            &self.inner.session_id,
            now,
        );
        *self.inner.ctx.write().unwrap() = Arc::new(ResolutionContext {
            promotions,
            abtests,
        });
    }

    /// Take a discovered element under management (idempotent per element)
    fn process_element(&self, el: ElementId) {
        let Some(game_id) = self.inner.page.game_id(el) else {
            return;
        };
        {
            let processing = self.inner.processing.lock().unwrap();
            let mut processed = self.inner.processed.lock().unwrap();
            if processed.contains(&el) || processing.contains(&el) {
                return;
            }
            if self.inner.page.video_surface(el).is_some() {
                processed.insert(el);
                return;
            }
        }
        if self.inner.page.initial_poster(el).is_none() {
            return;
        }
        self.inner.processing.lock().unwrap().insert(el);

        self.inner.transport.register_games(&[game_id.clone()]);

        let engine = self.clone();
        let task = tokio::spawn(async move {
            cold_start::run(
                engine.inner.page.clone(),
                engine.inner.store.clone(),
                engine.inner.config.clone(),
                el,
                game_id,
            )
            .await;
            engine.inner.processing.lock().unwrap().remove(&el);
            engine.inner.processed.lock().unwrap().insert(el);
        });
        self.inner.tasks.lock().unwrap().push(task);
    }

    // Interaction notifications from the platform binding. Each resolves
    // the game context and feeds the collector; games whose record opts
    // out of analytics are skipped.

    /// Element became at least half visible
    pub fn element_visible(&self, el: ElementId) {
        let Some((game_id, asset_url, variant)) = self.interaction_context(el) else {
            return;
        };
        self.inner
            .collector
            .track_impression(&game_id, &asset_url, variant);
    }

    /// Pointer or touch interaction began on a game element
    pub fn hover_started(&self, el: ElementId) {
        let Some((game_id, asset_url, variant)) = self.interaction_context(el) else {
            return;
        };
        let touch = self.inner.page.touch_capable();
        self.inner
            .collector
            .hover_start(&game_id, &asset_url, variant, touch);
    }

    /// Pointer or touch interaction ended
    pub fn hover_ended(&self, el: ElementId) {
        let Some((game_id, asset_url, variant)) = self.interaction_context(el) else {
            return;
        };
        let touch = self.inner.page.touch_capable();
        self.inner
            .collector
            .hover_end(&game_id, &asset_url, variant, touch);
    }

    /// Direct click on the game's video
    pub fn video_clicked(&self, el: ElementId) {
        let Some((game_id, asset_url, variant)) = self.interaction_context(el) else {
            return;
        };
        self.inner.collector.video_click(&game_id, &asset_url, variant);
    }

    /// Click on a button or link somewhere near a game element
    pub fn button_clicked(&self, el: ElementId, href: &str) {
        self.inner.collector.button_click(el, href);
    }

    fn interaction_context(&self, el: ElementId) -> Option<(String, String, Option<Variant>)> {
        let game_id = self.inner.page.game_id(el)?;
        if let Some(game) = self.inner.games.read().unwrap().get(&game_id) {
            if !game.analytics {
                return None;
            }
        }
        let surface = self.inner.page.video_surface(el);
        let asset_url = surface
            .as_ref()
            .and_then(|s| s.source())
            .or_else(|| self.inner.store.get(&game_id).map(|s| s.poster_url))
            .unwrap_or_default();
        if asset_url.is_empty() {
            return None;
        }
        let variant = surface
            .and_then(|s| s.attribute(attrs::VARIANT))
            .and_then(|v| match v.as_str() {
                "A" => Some(Variant::A),
                "B" => Some(Variant::B),
                _ => None,
            });
        Some((game_id, asset_url, variant))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::MemoryStore;
    use crate::page::MemoryPage;
    use crate::transport::ReconnectPolicy;
    use vidra_common::records::PublishedType;

    fn engine_with_page() -> (Engine, Arc<MemoryPage>, ElementId) {
        let page = Arc::new(MemoryPage::new());
        page.add_group(None, "row-1");
        let el = page.add_game(None, "g1", "g1.jpg");
        // Unroutable address: the transport stays disconnected, which is
        // exactly what these tests need.
        let transport = Transport::new("ws://127.0.0.1:9/socket", None, ReconnectPolicy::default());
        let engine = Engine::new(
            page.clone(),
            transport,
            Arc::new(MemoryStore::new()),
            EngineConfig::default(),
            true,
        );
        (engine, page, el)
    }

    fn game(version: u64) -> GameRecord {
        GameRecord {
            id: "g1".into(),
            cms_id: Some("cms-1".into()),
            version,
            published: true,
            published_type: PublishedType::Current,
            current_image: Some("cur.jpg".into()),
            current_video: Some("cur.mp4".into()),
            default_image: "d.jpg".into(),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn games_push_updates_store_for_unmounted_elements() {
        let (engine, _page, _el) = engine_with_page();

        engine.handle_inbound(InboundEvent::GamesResponse {
            games: vec![game(2)],
        });

        let state = engine.store().get("g1").unwrap();
        assert_eq!(state.poster_url, "cur.jpg");
        assert_eq!(state.video_url.as_deref(), Some("cur.mp4"));
        assert_eq!(state.version, 2);
        assert!(!state.loading);
    }

    #[tokio::test(start_paused = true)]
    async fn abtest_push_overrides_and_revert_restores() {
        let (engine, _page, _el) = engine_with_page();
        engine.handle_inbound(InboundEvent::GamesResponse {
            games: vec![game(2)],
        });

        let abtest = AbTestRecord {
            game_id: "g1".into(),
            group: "row-1".into(),
            start_date: vidra_common::time::parse_wire_datetime("2000-01-01"),
            end_date: vidra_common::time::parse_wire_datetime("2099-01-01"),
            published: true,
            image_variant_a: Some("va.jpg".into()),
            video_variant_a: Some("va.mp4".into()),
            image_variant_b: Some("vb.jpg".into()),
            video_variant_b: Some("vb.mp4".into()),
            ..Default::default()
        };
        engine.handle_inbound(InboundEvent::AbtestsUpdated {
            abtests: vec![abtest],
        });

        let state = engine.store().get("g1").unwrap();
        let overridden = state.poster_url == "va.jpg" || state.poster_url == "vb.jpg";
        assert!(overridden, "poster was {}", state.poster_url);

        // Clearing the test list reverts to tier assets.
        engine.handle_inbound(InboundEvent::AbtestsUpdated { abtests: vec![] });
        let state = engine.store().get("g1").unwrap();
        assert_eq!(state.poster_url, "cur.jpg");
    }

    #[tokio::test(start_paused = true)]
    async fn promotion_push_beats_abtest() {
        let (engine, _page, _el) = engine_with_page();
        engine.handle_inbound(InboundEvent::GamesResponse {
            games: vec![game(2)],
        });

        let window = (
            vidra_common::time::parse_wire_datetime("2000-01-01"),
            vidra_common::time::parse_wire_datetime("2099-01-01"),
        );
        engine.handle_inbound(InboundEvent::AbtestsUpdated {
            abtests: vec![AbTestRecord {
                game_id: "g1".into(),
                group: "row-1".into(),
                start_date: window.0,
                end_date: window.1,
                published: true,
                image_variant_a: Some("va.jpg".into()),
                image_variant_b: Some("vb.jpg".into()),
                ..Default::default()
            }],
        });
        engine.handle_inbound(InboundEvent::PromotionsUpdated {
            promotions: vec![PromotionRecord {
                group: "row-1".into(),
                start_date: window.0,
                end_date: window.1,
                published: true,
                games: vec![vidra_common::records::PromoGameRecord {
                    game_cms_id: "cms-1".into(),
                    promo_image: Some("promo.jpg".into()),
                    promo_video: Some("promo.mp4".into()),
                }],
                ..Default::default()
            }],
        });

        let state = engine.store().get("g1").unwrap();
        assert_eq!(state.poster_url, "promo.jpg");
        assert_eq!(state.video_url.as_deref(), Some("promo.mp4"));
    }

    #[tokio::test(start_paused = true)]
    async fn unpublished_game_reverts_to_default_without_video() {
        let (engine, _page, _el) = engine_with_page();
        engine.handle_inbound(InboundEvent::GamesResponse {
            games: vec![game(2)],
        });

        let mut unpublished = game(3);
        unpublished.published = false;
        engine.handle_inbound(InboundEvent::GamesUpdated {
            games: vec![unpublished],
        });

        let state = engine.store().get("g1").unwrap();
        assert_eq!(state.poster_url, "d.jpg");
        assert!(state.video_url.is_none());
    }
}
