//! End-to-end engine flow against an in-process relay server

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use vidra_engine::config::EngineConfig;
use vidra_engine::local::MemoryStore;
use vidra_engine::page::{MemoryPage, VideoSurface};
use vidra_engine::transport::{ReconnectPolicy, Transport};
use vidra_engine::Engine;

/// Relay stand-in: records every received frame and pushes frames on
/// command, across reconnects.
async fn spawn_server() -> (
    String,
    mpsc::UnboundedReceiver<String>,
    mpsc::UnboundedSender<String>,
) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (frame_tx, frame_rx) = mpsc::unbounded_channel();
    let (push_tx, mut push_rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let Ok(mut ws) = accept_async(stream).await else {
                continue;
            };
            loop {
                tokio::select! {
                    msg = ws.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            let _ = frame_tx.send(text.to_string());
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(_)) => break,
                    },
                    push = push_rx.recv() => match push {
                        Some(text) => {
                            let _ = ws.send(Message::Text(text)).await;
                        }
                        None => return,
                    }
                }
            }
        }
    });

    (format!("ws://{}/socket", addr), frame_rx, push_tx)
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        settle_delay: Duration::from_millis(10),
        prepare_hold: Duration::from_millis(10),
        ready_timeout: Duration::from_millis(200),
        // Generous waiting window so the server push always lands before
        // the cold start decides about the spinner.
        spinner_delay: Duration::from_millis(500),
        spinner_min_dwell: Duration::from_millis(30),
        swap_fade: Duration::from_millis(10),
        analytics_flush_after: Duration::from_millis(100),
        reconnect_base_delay: Duration::from_millis(50),
        reconnect_max_delay: Duration::from_millis(200),
        ..EngineConfig::default()
    }
}

async fn wait_until<F>(condition: F, what: &str)
where
    F: Fn() -> bool,
{
    for _ in 0..250 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}

fn games_response(id: &str, version: u64, image: &str, video: &str) -> String {
    format!(
        r#"{{"event":"games-response","data":{{"games":[{{"id":"{id}","version":{version},"published":true,"publishedType":"current","currentImage":"{image}","currentVideo":"{video}","defaultImage":"d.jpg"}}]}}}}"#
    )
}

#[tokio::test]
async fn engine_mounts_video_and_follows_live_updates() {
    let (url, mut frames, pushes) = spawn_server().await;

    let page = Arc::new(MemoryPage::new());
    page.add_group(None, "lobby-top");
    let el = page.add_game(None, "g1", "original.jpg");

    let transport = Transport::new(
        &url,
        None,
        ReconnectPolicy {
            attempts: 5,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(200),
        },
    );
    let engine = Engine::new(
        page.clone(),
        transport,
        Arc::new(MemoryStore::new()),
        fast_config(),
        true,
    );
    engine.start();

    // The engine joins the game's room and asks for current records.
    let join = tokio::time::timeout(Duration::from_secs(5), frames.recv())
        .await
        .expect("no join frame")
        .unwrap();
    assert!(join.contains("join-game-rooms"));
    assert!(join.contains("g1"));

    pushes
        .send(games_response("g1", 2, "cur.jpg", "cur.mp4"))
        .unwrap();

    // Cold start mounts the surface with the resolved assets.
    wait_until(
        || {
            let mounted = page
                .memory_surface(el)
                .map(|s| s.source().as_deref() == Some("cur.mp4"))
                .unwrap_or(false);
            let settled = engine
                .store()
                .get("g1")
                .map(|s| !s.loading)
                .unwrap_or(false);
            mounted && settled
        },
        "surface mounted with pushed video",
    )
    .await;

    assert_eq!(
        engine.store().get("g1").unwrap().base_image_src.as_deref(),
        Some("cur.jpg")
    );

    // A live update swaps the asset through the transition machine.
    pushes
        .send(
            r#"{"event":"games-updated","data":{"games":[{"id":"g1","version":3,"published":true,"publishedType":"current","currentImage":"next.jpg","currentVideo":"next.mp4","defaultImage":"d.jpg"}]}}"#
                .to_string(),
        )
        .unwrap();

    wait_until(
        || {
            page.memory_surface(el)
                .map(|s| s.source().as_deref() == Some("next.mp4"))
                .unwrap_or(false)
        },
        "surface updated to the new video",
    )
    .await;

    let state = engine.store().get("g1").unwrap();
    assert_eq!(state.version, 3);
    // The fade anchor stays on the first served image.
    assert_eq!(state.base_image_src.as_deref(), Some("cur.jpg"));

    engine.stop();
}

#[tokio::test]
async fn impressions_flow_back_as_analytics_batches() {
    let (url, mut frames, pushes) = spawn_server().await;

    let page = Arc::new(MemoryPage::new());
    let el = page.add_game(None, "g1", "original.jpg");

    let transport = Transport::new(
        &url,
        None,
        ReconnectPolicy {
            attempts: 5,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(200),
        },
    );
    let engine = Engine::new(
        page.clone(),
        transport,
        Arc::new(MemoryStore::new()),
        fast_config(),
        true,
    );
    engine.start();

    pushes
        .send(games_response("g1", 1, "cur.jpg", "cur.mp4"))
        .unwrap();
    wait_until(
        || page.memory_surface(el).is_some(),
        "surface mounted",
    )
    .await;

    engine.element_visible(el);

    // The quiet-period flush delivers a batch carrying the impression.
    let mut found = false;
    for _ in 0..100 {
        match tokio::time::timeout(Duration::from_millis(100), frames.recv()).await {
            Ok(Some(frame)) => {
                if frame.contains("analytics-event-batch") {
                    assert!(frame.contains("impression"));
                    assert!(frame.contains("g1"));
                    found = true;
                    break;
                }
            }
            Ok(None) => break,
            Err(_) => {}
        }
    }
    assert!(found, "no analytics batch received");

    engine.stop();
}
