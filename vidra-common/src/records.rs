//! Wire records for the Vidra real-time channel
//!
//! These are the plain entities carried by socket events: game records,
//! A/B test definitions, promotion definitions, and analytics events.
//! Field names follow the server's camelCase JSON convention.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::time::wire_date;

/// Which asset tier a published game shows absent promotion/A-B overrides
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishedType {
    #[default]
    Default,
    Current,
    Theme,
    Promo,
}

impl std::fmt::Display for PublishedType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            PublishedType::Default => "default",
            PublishedType::Current => "current",
            PublishedType::Theme => "theme",
            PublishedType::Promo => "promo",
        };
        write!(f, "{label}")
    }
}

impl std::str::FromStr for PublishedType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(PublishedType::Default),
            "current" => Ok(PublishedType::Current),
            "theme" => Ok(PublishedType::Theme),
            "promo" => Ok(PublishedType::Promo),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown published type: {other}"
            ))),
        }
    }
}

/// One of the two asset sets shown to a session during an active A/B test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Variant {
    A,
    B,
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Variant::A => write!(f, "A"),
            Variant::B => write!(f, "B"),
        }
    }
}

/// Game record as pushed by the server (`games-response` / `games-updated`)
///
/// `version` is a server-assigned monotonic counter used to detect stale
/// pushes. Asset fields are per tier; any of them may be absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GameRecord {
    pub id: String,
    pub cms_id: Option<String>,
    pub version: u64,
    pub published: bool,
    pub published_type: PublishedType,
    pub animate: bool,
    pub hover: bool,
    pub analytics: bool,
    pub default_image: String,
    pub default_video: Option<String>,
    pub current_image: Option<String>,
    pub current_video: Option<String>,
    pub theme_image: Option<String>,
    pub theme_video: Option<String>,
    pub promo_image: Option<String>,
    pub promo_video: Option<String>,
}

impl Default for GameRecord {
    fn default() -> Self {
        Self {
            id: String::new(),
            cms_id: None,
            version: 0,
            published: false,
            published_type: PublishedType::Default,
            // Wire defaults: animation and hover-play are opt-out.
            animate: true,
            hover: true,
            analytics: true,
            default_image: String::new(),
            default_video: None,
            current_image: None,
            current_video: None,
            theme_image: None,
            theme_video: None,
            promo_image: None,
            promo_video: None,
        }
    }
}

/// A/B test definition, replaced wholesale on each push
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AbTestRecord {
    pub game_id: String,
    pub group: String,
    #[serde(with = "wire_date")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(with = "wire_date")]
    pub end_date: Option<DateTime<Utc>>,
    pub published: bool,
    pub image_variant_a: Option<String>,
    pub image_variant_b: Option<String>,
    pub video_variant_a: Option<String>,
    pub video_variant_b: Option<String>,
    #[serde(alias = "user_id", alias = "userId")]
    pub creator_id: Option<String>,
}

impl AbTestRecord {
    /// Assets for a given variant, as (image, video)
    pub fn variant_assets(&self, variant: Variant) -> (Option<&str>, Option<&str>) {
        match variant {
            Variant::A => (
                self.image_variant_a.as_deref(),
                self.video_variant_a.as_deref(),
            ),
            Variant::B => (
                self.image_variant_b.as_deref(),
                self.video_variant_b.as_deref(),
            ),
        }
    }
}

/// One game's assets inside a promotion
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PromoGameRecord {
    pub game_cms_id: String,
    pub promo_image: Option<String>,
    pub promo_video: Option<String>,
}

impl PromoGameRecord {
    /// A promo entry only takes effect when it carries at least one asset
    pub fn has_assets(&self) -> bool {
        self.promo_image.is_some() || self.promo_video.is_some()
    }
}

/// Promotion definition, replaced wholesale on each push
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PromotionRecord {
    pub name: Option<String>,
    pub group: String,
    #[serde(with = "wire_date")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(with = "wire_date")]
    pub end_date: Option<DateTime<Utc>>,
    pub published: bool,
    pub games: Vec<PromoGameRecord>,
}

/// Interaction/impression event reported back through the channel
///
/// Transient: lives in the collector's buffer or the offline fallback
/// queue until flushed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsEvent {
    pub id: String,
    pub event_type: String,
    pub game_id: String,
    pub asset_type: String,
    pub asset_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<Variant>,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Free-form contextual fields (viewport, device class, durations, ...)
    #[serde(default)]
    pub data: BTreeMap<String, serde_json::Value>,
}
