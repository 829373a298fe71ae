//! WebSocket connection lifecycle

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use vidra_common::events::{InboundEvent, OutboundEvent};
use vidra_common::records::AnalyticsEvent;

use super::AnalyticsSink;
use crate::error::{Error, Result};

/// Reconnection behavior: bounded attempts with doubling delay
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

struct Shared {
    server_url: String,
    application_key: Option<String>,
    policy: ReconnectPolicy,
    inbound_tx: broadcast::Sender<InboundEvent>,
    connected_tx: watch::Sender<bool>,
    connected_rx: watch::Receiver<bool>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    outbound: RwLock<Option<mpsc::UnboundedSender<String>>>,
    registered: Mutex<BTreeSet<String>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Connection manager for the real-time channel
///
/// Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct Transport {
    shared: Arc<Shared>,
}

impl Transport {
    pub fn new(server_url: &str, application_key: Option<String>, policy: ReconnectPolicy) -> Self {
        let (inbound_tx, _) = broadcast::channel(256);
        let (connected_tx, connected_rx) = watch::channel(false);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                server_url: server_url.to_string(),
                application_key,
                policy,
                inbound_tx,
                connected_tx,
                connected_rx,
                shutdown_tx,
                shutdown_rx,
                outbound: RwLock::new(None),
                registered: Mutex::new(BTreeSet::new()),
                task: Mutex::new(None),
            }),
        }
    }

    /// Subscribe to inbound events
    pub fn subscribe(&self) -> broadcast::Receiver<InboundEvent> {
        self.shared.inbound_tx.subscribe()
    }

    /// Observable connected flag
    pub fn connected_watch(&self) -> watch::Receiver<bool> {
        self.shared.connected_rx.clone()
    }

    pub fn is_connected(&self) -> bool {
        *self.shared.connected_rx.borrow()
    }

    /// Track game ids to join on (re)connect; if already connected, the
    /// rooms are joined and fresh records requested immediately
    pub fn register_games(&self, game_ids: &[String]) {
        {
            let mut registered = self.shared.registered.lock().unwrap();
            for id in game_ids {
                registered.insert(id.clone());
            }
        }
        if self.is_connected() {
            self.shared.request_registered();
        }
    }

    /// Queue an event for delivery; fails when the channel is down
    pub fn emit(&self, event: OutboundEvent) -> Result<()> {
        self.shared.emit(event)
    }

    /// Start the connection task. Idempotent while a task is running.
    pub fn connect(&self) {
        let mut task = self.shared.task.lock().unwrap();
        if let Some(handle) = task.as_ref() {
            if !handle.is_finished() {
                return;
            }
        }
        let _ = self.shared.shutdown_tx.send(false);
        let shared = self.shared.clone();
        *task = Some(tokio::spawn(async move {
            shared.run().await;
        }));
    }

    /// Stop the connection task and close the socket
    pub fn disconnect(&self) {
        let _ = self.shared.shutdown_tx.send(true);
        *self.shared.outbound.write().unwrap() = None;
        let _ = self.shared.connected_tx.send(false);
        if let Some(handle) = self.shared.task.lock().unwrap().take() {
            handle.abort();
        }
    }
}

impl Shared {
    fn registered_ids(&self) -> Vec<String> {
        self.registered.lock().unwrap().iter().cloned().collect()
    }

    /// Join rooms and request current data for all registered games
    fn request_registered(&self) {
        let game_ids = self.registered_ids();
        if game_ids.is_empty() {
            return;
        }
        let _ = self.emit(OutboundEvent::JoinGameRooms {
            game_ids: game_ids.clone(),
        });
        let _ = self.emit(OutboundEvent::GetGames { game_ids });
    }

    fn emit(&self, event: OutboundEvent) -> Result<()> {
        let frame = event.encode()?;
        let guard = self.outbound.read().unwrap();
        match guard.as_ref() {
            Some(tx) => tx
                .send(frame)
                .map_err(|_| Error::Transport("connection closed".into())),
            None => Err(Error::NotConnected),
        }
    }

    async fn run(self: Arc<Self>) {
        let mut shutdown = self.shutdown_rx.clone();
        let mut attempt = 0u32;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let url = match &self.application_key {
                Some(key) => format!("{}?applicationKey={}", self.server_url, key),
                None => self.server_url.clone(),
            };

            match connect_async(url.as_str()).await {
                Ok((stream, _response)) => {
                    info!("Connected to {}", self.server_url);
                    attempt = 0;
                    self.serve_connection(stream, &mut shutdown).await;
                    *self.outbound.write().unwrap() = None;
                    let _ = self.connected_tx.send(false);
                    if *shutdown.borrow() {
                        break;
                    }
                    debug!("Connection to {} closed", self.server_url);
                }
                Err(e) => {
                    warn!("Connect to {} failed: {}", self.server_url, e);
                    let _ = self.inbound_tx.send(InboundEvent::Error {
                        message: e.to_string(),
                    });
                }
            }

            attempt += 1;
            if attempt > self.policy.attempts {
                warn!(
                    "Giving up after {} reconnection attempts",
                    self.policy.attempts
                );
                break;
            }

            let delay = self.policy.delay_for(attempt);
            debug!("Reconnecting in {:?} (attempt {})", delay, attempt);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn serve_connection<S>(
        &self,
        stream: tokio_tungstenite::WebSocketStream<S>,
        shutdown: &mut watch::Receiver<bool>,
    ) where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let (mut sink, mut source) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        *self.outbound.write().unwrap() = Some(outbound_tx);

        let _ = self.connected_tx.send(true);
        let _ = self.inbound_tx.send(InboundEvent::Connected);

        // Replay subscriptions: rooms may have new state for us.
        self.request_registered();

        loop {
            tokio::select! {
                frame = outbound_rx.recv() => {
                    let Some(frame) = frame else { break };
                    if let Err(e) = sink.send(Message::Text(frame)).await {
                        warn!("Send failed: {}", e);
                        break;
                    }
                }
                message = source.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => self.dispatch_frame(text.as_ref()),
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("Receive failed: {}", e);
                            let _ = self.inbound_tx.send(InboundEvent::Error {
                                message: e.to_string(),
                            });
                            break;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        }
    }

    fn dispatch_frame(&self, frame: &str) {
        match InboundEvent::decode(frame) {
            Ok(event) => {
                let _ = self.inbound_tx.send(event);
            }
            Err(e) => {
                // Unknown events are skipped, not fatal: the server may be
                // newer than this engine.
                debug!("Ignoring undecodable frame: {}", e);
            }
        }
    }
}

impl AnalyticsSink for Transport {
    fn is_connected(&self) -> bool {
        Transport::is_connected(self)
    }

    fn send_batch(&self, events: Vec<AnalyticsEvent>) -> Result<()> {
        self.emit(OutboundEvent::AnalyticsEventBatch { events })
    }
}
