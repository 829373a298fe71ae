//! Cold-start sequence
//!
//! First paint for a freshly discovered game element: the container only
//! holds its original poster image, so the engine waits briefly for server
//! data, optionally surfaces a spinner, then mounts the video surface and
//! fades it in. Targets that resolve before the waiting window ends never
//! show a spinner at all; once shown, the spinner stays for a minimum
//! dwell so it cannot flash for a single frame.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::config::EngineConfig;
use crate::page::{attrs, ElementId, Page, VideoSurface};
use crate::store::{GameStateStore, StatePatch};

/// Run the first-paint sequence for one element
///
/// Returns the mounted surface, or `None` when the container has no
/// poster image to replace (the element is left untouched).
pub async fn run(
    page: Arc<dyn Page>,
    store: Arc<GameStateStore>,
    config: Arc<EngineConfig>,
    el: ElementId,
    game_id: String,
) -> Option<Arc<dyn VideoSurface>> {
    let Some(initial_poster) = page.initial_poster(el) else {
        trace!(game_id = %game_id, "container has no poster image, skipping");
        return None;
    };

    // Seed the store from page attributes unless a push already did.
    if !store.is_tracked(&game_id) {
        let version = page
            .attribute(el, attrs::VERSION)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let published_type = page
            .attribute(el, attrs::TYPE)
            .and_then(|t| t.parse().ok());
        store.set(
            &game_id,
            StatePatch {
                poster_url: Some(initial_poster.clone()),
                version: Some(version),
                published_type,
                loading: Some(true),
                ..Default::default()
            },
        );
    }

    // Waiting: fast responses skip the spinner entirely.
    tokio::time::sleep(config.spinner_delay).await;

    let still_loading = store.get(&game_id).map(|s| s.loading).unwrap_or(true);
    let spinner_shown = if still_loading {
        page.show_spinner(el);
        debug!(game_id = %game_id, "cold start spinner shown");
        // Minimum dwell once visible.
        tokio::time::sleep(config.spinner_min_dwell).await;
        page.stop_spinner(el);
        true
    } else {
        false
    };

    // Transition: mount the video surface over the poster.
    let state = store.get(&game_id);
    let poster = state
        .as_ref()
        .map(|s| s.poster_url.clone())
        .filter(|p| !p.is_empty())
        .unwrap_or(initial_poster);
    let video_url = state.as_ref().and_then(|s| s.video_url.clone());
    let animate = state.as_ref().map(|s| s.animate).unwrap_or(true);
    let version = state.as_ref().map(|s| s.version).unwrap_or(0);

    let surface = page.mount_video(el, &poster);
    surface.set_opacity(0.0);

    if animate {
        if let Some(video) = &video_url {
            surface.set_source(Some(video), &poster);
            let ready = surface.ready();
            if tokio::time::timeout(config.ready_timeout, ready.notified())
                .await
                .is_err()
            {
                debug!(game_id = %game_id, "cold start can-render timeout");
            }
            surface.begin_decode();
        }
    }

    surface.set_opacity(1.0);
    tokio::time::sleep(config.swap_fade).await;

    // Complete: the spinner leaves only after the fade finished.
    if spinner_shown {
        page.remove_spinner(el);
    }
    page.set_attribute(el, attrs::VERSION, &version.to_string());
    store.update(
        &game_id,
        StatePatch {
            loading: Some(false),
            base_image_src: Some(poster.clone()),
            ..Default::default()
        },
    );

    debug!(game_id = %game_id, "cold start complete");
    Some(surface)
}
