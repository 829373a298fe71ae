//! Socket event types for the Vidra real-time channel
//!
//! Frames are JSON objects of the form `{"event": <name>, "data": {...}}`.
//! Inbound events are pushed by the relay server; outbound events are
//! requests the engine emits.

use serde::{Deserialize, Serialize};

use crate::records::{AbTestRecord, AnalyticsEvent, GameRecord, PromotionRecord};
use crate::Result;

/// Events pushed by the relay server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum InboundEvent {
    /// Channel is live. Synthesized locally by the transport on (re)connect.
    Connected,

    /// Bulk game records answering a `get-games` request
    GamesResponse {
        #[serde(default)]
        games: Vec<GameRecord>,
    },

    /// Incremental game changes carrying new `version`s
    GamesUpdated {
        #[serde(default)]
        games: Vec<GameRecord>,
    },

    /// Full A/B test list (response to a fetch)
    AbtestsResponse {
        #[serde(default)]
        abtests: Vec<AbTestRecord>,
    },

    /// Full A/B test list (server-initiated push)
    AbtestsUpdated {
        #[serde(default)]
        abtests: Vec<AbTestRecord>,
    },

    /// Full promotion list (response to a fetch)
    PromotionsResponse {
        #[serde(default)]
        promotions: Vec<PromotionRecord>,
    },

    /// Full promotion list (server-initiated push)
    PromotionsUpdated {
        #[serde(default)]
        promotions: Vec<PromotionRecord>,
    },

    /// Transport-level failure. Reported, never thrown.
    Error {
        #[serde(default)]
        message: String,
    },
}

/// Requests the engine emits to the relay server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum OutboundEvent {
    /// Subscribe to live updates for the given game ids
    #[serde(rename_all = "camelCase")]
    JoinGameRooms { game_ids: Vec<String> },

    /// Request current records for the given game ids
    #[serde(rename_all = "camelCase")]
    GetGames { game_ids: Vec<String> },

    /// Deliver a batch of analytics events
    AnalyticsEventBatch { events: Vec<AnalyticsEvent> },
}

impl InboundEvent {
    /// Decode a text frame into an inbound event
    pub fn decode(frame: &str) -> Result<Self> {
        Ok(serde_json::from_str(frame)?)
    }
}

impl OutboundEvent {
    /// Encode this event as a text frame
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
