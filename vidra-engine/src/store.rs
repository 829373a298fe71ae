//! Game state store
//!
//! Single source of truth for every tracked game's visual state. The
//! backing map is copy-on-write: writers clone the `Arc`'d map, mutate the
//! clone, and swap it in, so a component iterating a snapshot is never
//! invalidated by a concurrent write. Every write publishes a change
//! notification for the orchestrator and any other observer.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;

use vidra_common::records::PublishedType;

/// Visual state of one tracked game
#[derive(Debug, Clone, PartialEq)]
pub struct GameVideoState {
    pub id: String,
    pub poster_url: String,
    pub video_url: Option<String>,
    /// Server-assigned monotonic counter; stale pushes carry older values
    pub version: u64,
    pub published: bool,
    pub published_type: PublishedType,
    /// false forces poster-only display
    pub animate: bool,
    /// false forces autoplay instead of hover-triggered play
    pub hover: bool,
    pub loading: bool,
    /// Anchor image for fade transitions. Write-once: later resolutions may
    /// change poster/video but must never blank this.
    pub base_image_src: Option<String>,
}

impl GameVideoState {
    fn with_defaults(id: &str) -> Self {
        Self {
            id: id.to_string(),
            poster_url: String::new(),
            video_url: None,
            version: 0,
            published: false,
            published_type: PublishedType::Default,
            animate: true,
            hover: true,
            loading: false,
            base_image_src: None,
        }
    }
}

/// Partial update applied over existing state (or defaults)
#[derive(Debug, Clone, Default)]
pub struct StatePatch {
    pub poster_url: Option<String>,
    pub video_url: Option<Option<String>>,
    pub version: Option<u64>,
    pub published: Option<bool>,
    pub published_type: Option<PublishedType>,
    pub animate: Option<bool>,
    pub hover: Option<bool>,
    pub loading: Option<bool>,
    pub base_image_src: Option<String>,
}

impl StatePatch {
    fn apply(self, state: &mut GameVideoState) {
        if let Some(poster) = self.poster_url {
            state.poster_url = poster;
        }
        if let Some(video) = self.video_url {
            state.video_url = video;
        }
        if let Some(version) = self.version {
            state.version = version;
        }
        if let Some(published) = self.published {
            state.published = published;
        }
        if let Some(published_type) = self.published_type {
            state.published_type = published_type;
        }
        if let Some(animate) = self.animate {
            state.animate = animate;
        }
        if let Some(hover) = self.hover {
            state.hover = hover;
        }
        if let Some(loading) = self.loading {
            state.loading = loading;
        }
        // Write-once: the first non-null anchor sticks.
        if state.base_image_src.is_none() {
            if let Some(base) = self.base_image_src {
                state.base_image_src = Some(base);
            }
        }
    }
}

/// Change notification published on every write
#[derive(Debug, Clone)]
pub struct StoreChange {
    pub game_id: String,
}

/// Store of all tracked game states
pub struct GameStateStore {
    games: RwLock<Arc<HashMap<String, GameVideoState>>>,
    change_tx: broadcast::Sender<StoreChange>,
}

impl GameStateStore {
    pub fn new() -> Self {
        let (change_tx, _) = broadcast::channel(256);
        Self {
            games: RwLock::new(Arc::new(HashMap::new())),
            change_tx,
        }
    }

    /// Current state for a game, if tracked
    pub fn get(&self, game_id: &str) -> Option<GameVideoState> {
        self.games.read().unwrap().get(game_id).cloned()
    }

    /// Whether this game has been taken under management
    pub fn is_tracked(&self, game_id: &str) -> bool {
        self.games.read().unwrap().contains_key(game_id)
    }

    /// Merge a patch over existing state (or defaults for a new game)
    pub fn set(&self, game_id: &str, patch: StatePatch) {
        {
            let mut guard = self.games.write().unwrap();
            let mut next: HashMap<String, GameVideoState> = (**guard).clone();
            let state = next
                .entry(game_id.to_string())
                .or_insert_with(|| GameVideoState::with_defaults(game_id));
            patch.apply(state);
            *guard = Arc::new(next);
        }
        let _ = self.change_tx.send(StoreChange {
            game_id: game_id.to_string(),
        });
    }

    /// Merge a patch only if the game is already tracked
    pub fn update(&self, game_id: &str, patch: StatePatch) {
        if self.is_tracked(game_id) {
            self.set(game_id, patch);
        }
    }

    /// Snapshot of all tracked states
    pub fn list_all(&self) -> Vec<GameVideoState> {
        self.games.read().unwrap().values().cloned().collect()
    }

    /// Subscribe to change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.change_tx.subscribe()
    }

    /// Drop a game from management (page teardown)
    pub fn remove(&self, game_id: &str) {
        let mut guard = self.games.write().unwrap();
        let mut next: HashMap<String, GameVideoState> = (**guard).clone();
        next.remove(game_id);
        *guard = Arc::new(next);
    }
}

impl Default for GameStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_creates_with_defaults() {
        let store = GameStateStore::new();
        store.set(
            "g1",
            StatePatch {
                poster_url: Some("p.jpg".into()),
                ..Default::default()
            },
        );

        let state = store.get("g1").unwrap();
        assert_eq!(state.poster_url, "p.jpg");
        assert_eq!(state.version, 0);
        assert!(state.animate);
        assert!(state.hover);
        assert!(!state.loading);
        assert!(state.base_image_src.is_none());
    }

    #[test]
    fn update_ignores_untracked_games() {
        let store = GameStateStore::new();
        store.update(
            "ghost",
            StatePatch {
                loading: Some(true),
                ..Default::default()
            },
        );
        assert!(store.get("ghost").is_none());
    }

    #[test]
    fn base_image_src_is_write_once() {
        let store = GameStateStore::new();
        store.set(
            "g1",
            StatePatch {
                base_image_src: Some("first.jpg".into()),
                ..Default::default()
            },
        );
        store.set(
            "g1",
            StatePatch {
                base_image_src: Some("second.jpg".into()),
                ..Default::default()
            },
        );

        assert_eq!(
            store.get("g1").unwrap().base_image_src.as_deref(),
            Some("first.jpg")
        );
    }

    #[test]
    fn later_patches_keep_unmentioned_fields() {
        let store = GameStateStore::new();
        store.set(
            "g1",
            StatePatch {
                poster_url: Some("p.jpg".into()),
                video_url: Some(Some("v.mp4".into())),
                version: Some(3),
                ..Default::default()
            },
        );
        store.update(
            "g1",
            StatePatch {
                loading: Some(true),
                ..Default::default()
            },
        );

        let state = store.get("g1").unwrap();
        assert!(state.loading);
        assert_eq!(state.poster_url, "p.jpg");
        assert_eq!(state.video_url.as_deref(), Some("v.mp4"));
        assert_eq!(state.version, 3);
    }

    #[test]
    fn video_url_can_be_cleared_explicitly() {
        let store = GameStateStore::new();
        store.set(
            "g1",
            StatePatch {
                video_url: Some(Some("v.mp4".into())),
                ..Default::default()
            },
        );
        store.set(
            "g1",
            StatePatch {
                video_url: Some(None),
                ..Default::default()
            },
        );
        assert!(store.get("g1").unwrap().video_url.is_none());
    }

    #[tokio::test]
    async fn writes_notify_subscribers() {
        let store = GameStateStore::new();
        let mut rx = store.subscribe();
        store.set("g1", StatePatch::default());

        let change = rx.recv().await.unwrap();
        assert_eq!(change.game_id, "g1");
    }

    #[test]
    fn snapshot_survives_concurrent_writes() {
        let store = GameStateStore::new();
        store.set("g1", StatePatch::default());
        let snapshot = store.list_all();
        store.set("g2", StatePatch::default());
        // The earlier snapshot is untouched by the later write.
        assert_eq!(snapshot.len(), 1);
        assert_eq!(store.list_all().len(), 2);
    }
}
