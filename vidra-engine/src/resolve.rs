//! Asset resolution
//!
//! Turns a game record plus the currently-active promotion and A/B test
//! sets into the concrete image/video pair to show. Precedence, first
//! match wins: publish state, promotion override, A/B variant, published
//! tier fallback. The whole pipeline is deterministic for fixed inputs:
//! `now` and the session id enter once, when the active sets are built,
//! which is what lets the orchestrator re-resolve on every push without
//! flicker.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use vidra_common::records::{AbTestRecord, GameRecord, PromotionRecord, PublishedType};
use vidra_common::time::window_contains;
use vidra_common::Variant;

use crate::assign::assign;
use crate::page::{find_games_in_group, Page};

/// Which precedence rule produced the resolved assets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetSource {
    Unpublished,
    Promotion,
    AbTest,
    Tier,
}

/// Concrete assets to display for one game
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAssets {
    pub image_url: String,
    pub video_url: Option<String>,
    /// Set only when A/B variant assets were chosen
    pub variant: Option<Variant>,
    pub source: AssetSource,
}

/// Promotion override for one game
#[derive(Debug, Clone)]
pub struct PromoAssets {
    pub image_url: Option<String>,
    pub video_url: Option<String>,
}

/// Active promotion set, rebuilt wholesale on every promotion push
#[derive(Debug, Default)]
pub struct ActivePromotions {
    by_game: HashMap<String, PromoAssets>,
}

impl ActivePromotions {
    /// Build the game → promo-assets map from the pushed records
    ///
    /// A promotion contributes only when it is published, its activity
    /// window contains `now`, its group marker exists in the page, and the
    /// promo entry carries at least one asset. `gameCmsId` values resolve
    /// through the cms bridge when a mapping exists and are used verbatim
    /// otherwise.
    pub fn build(
        records: &[PromotionRecord],
        page: &dyn Page,
        cms_bridge: &HashMap<String, String>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut by_game = HashMap::new();

        for promotion in records {
            if !promotion.published
                || !window_contains(promotion.start_date, promotion.end_date, now)
            {
                continue;
            }

            let group_elements = page.group_elements(&promotion.group);
            if group_elements.is_empty() {
                continue;
            }

            for &group_el in &group_elements {
                let game_elements = find_games_in_group(page, group_el);
                if game_elements.is_empty() {
                    continue;
                }

                for promo_game in &promotion.games {
                    if !promo_game.has_assets() {
                        continue;
                    }
                    let resolved_id = cms_bridge
                        .get(&promo_game.game_cms_id)
                        .cloned()
                        .unwrap_or_else(|| promo_game.game_cms_id.clone());

                    for &game_el in &game_elements {
                        if page.game_id(game_el).as_deref() == Some(resolved_id.as_str()) {
                            by_game.insert(
                                resolved_id.clone(),
                                PromoAssets {
                                    image_url: promo_game.promo_image.clone(),
                                    video_url: promo_game.promo_video.clone(),
                                },
                            );
                        }
                    }
                }
            }
        }

        Self { by_game }
    }

    pub fn assets(&self, game_id: &str) -> Option<&PromoAssets> {
        self.by_game.get(game_id)
    }

    pub fn affected_game_ids(&self) -> Vec<String> {
        self.by_game.keys().cloned().collect()
    }
}

/// A/B override for one game, variant already assigned for this session
#[derive(Debug, Clone)]
pub struct AbTestAssets {
    pub image_url: Option<String>,
    pub video_url: Option<String>,
    pub variant: Variant,
    pub creator_id: Option<String>,
}

/// Active A/B test set, rebuilt wholesale on every test push
#[derive(Debug, Default)]
pub struct ActiveAbTests {
    by_game: HashMap<String, AbTestAssets>,
}

impl ActiveAbTests {
    /// Build the game → variant-assets map from the pushed records
    ///
    /// A test contributes only when published, inside its activity window,
    /// and when the targeted game actually sits in the test's group scope
    /// on this page. Variant assignment is deterministic per session+game.
    pub fn build(
        records: &[AbTestRecord],
        page: &dyn Page,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Self {
        let mut by_game = HashMap::new();

        for abtest in records {
            if !abtest.published || !window_contains(abtest.start_date, abtest.end_date, now) {
                continue;
            }

            let group_elements = page.group_elements(&abtest.group);
            for &group_el in &group_elements {
                let game_elements = find_games_in_group(page, group_el);
                for &game_el in &game_elements {
                    if page.game_id(game_el).as_deref() != Some(abtest.game_id.as_str()) {
                        continue;
                    }
                    let variant = assign(session_id, &abtest.game_id);
                    let (image, video) = abtest.variant_assets(variant);
                    by_game.insert(
                        abtest.game_id.clone(),
                        AbTestAssets {
                            image_url: image.map(String::from),
                            video_url: video.map(String::from),
                            variant,
                            creator_id: abtest.creator_id.clone(),
                        },
                    );
                }
            }
        }

        Self { by_game }
    }

    pub fn assets(&self, game_id: &str) -> Option<&AbTestAssets> {
        self.by_game.get(game_id)
    }

    pub fn affected_game_ids(&self) -> Vec<String> {
        self.by_game.keys().cloned().collect()
    }
}

/// Active override sets a resolution runs against
#[derive(Debug, Default)]
pub struct ResolutionContext {
    pub promotions: ActivePromotions,
    pub abtests: ActiveAbTests,
}

/// Resolve the assets to display for one game
pub fn resolve(game: &GameRecord, ctx: &ResolutionContext) -> ResolvedAssets {
    // Rule 1: unpublished always reverts to the static default. This is
    // the only rule allowed to force the video to None outright.
    if !game.published {
        return ResolvedAssets {
            image_url: game.default_image.clone(),
            video_url: None,
            variant: None,
            source: AssetSource::Unpublished,
        };
    }

    // Rule 2: an active promotion override wins over everything else.
    if let Some(promo) = ctx.promotions.assets(&game.id) {
        return ResolvedAssets {
            image_url: promo
                .image_url
                .clone()
                .unwrap_or_else(|| game.default_image.clone()),
            video_url: promo.video_url.clone(),
            variant: None,
            source: AssetSource::Promotion,
        };
    }

    // Rule 3: an active A/B test assigns this session a variant.
    if let Some(abtest) = ctx.abtests.assets(&game.id) {
        return ResolvedAssets {
            image_url: abtest
                .image_url
                .clone()
                .unwrap_or_else(|| game.default_image.clone()),
            video_url: abtest.video_url.clone(),
            variant: Some(abtest.variant),
            source: AssetSource::AbTest,
        };
    }

    // Rule 4: published tier fallback, each field falling back to default.
    let (image, video) = match game.published_type {
        PublishedType::Current => (game.current_image.clone(), game.current_video.clone()),
        PublishedType::Theme => (game.theme_image.clone(), game.theme_video.clone()),
        PublishedType::Promo => (game.promo_image.clone(), game.promo_video.clone()),
        PublishedType::Default => (None, None),
    };

    ResolvedAssets {
        image_url: image.unwrap_or_else(|| game.default_image.clone()),
        video_url: video.or_else(|| game.default_video.clone()),
        variant: None,
        source: AssetSource::Tier,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::MemoryPage;
    use chrono::TimeZone;
    use vidra_common::records::PromoGameRecord;

    fn sample_game() -> GameRecord {
        GameRecord {
            id: "g1".into(),
            version: 1,
            published: true,
            published_type: PublishedType::Current,
            current_image: Some("a.jpg".into()),
            current_video: Some("a.mp4".into()),
            default_image: "d.jpg".into(),
            ..Default::default()
        }
    }

    fn promo_ctx(assets: PromoAssets) -> ResolutionContext {
        let mut ctx = ResolutionContext::default();
        ctx.promotions.by_game.insert("g1".into(), assets);
        ctx
    }

    #[test]
    fn published_current_uses_current_assets() {
        let resolved = resolve(&sample_game(), &ResolutionContext::default());
        assert_eq!(resolved.image_url, "a.jpg");
        assert_eq!(resolved.video_url.as_deref(), Some("a.mp4"));
        assert_eq!(resolved.source, AssetSource::Tier);
    }

    #[test]
    fn unpublished_forces_default_image_and_no_video() {
        let mut game = sample_game();
        game.published = false;

        // Even with both overrides active, rule 1 is absolute.
        let mut ctx = promo_ctx(PromoAssets {
            image_url: Some("promo.jpg".into()),
            video_url: Some("promo.mp4".into()),
        });
        ctx.abtests.by_game.insert(
            "g1".into(),
            AbTestAssets {
                image_url: Some("va.jpg".into()),
                video_url: Some("va.mp4".into()),
                variant: Variant::A,
                creator_id: None,
            },
        );

        let resolved = resolve(&game, &ctx);
        assert_eq!(resolved.image_url, "d.jpg");
        assert_eq!(resolved.video_url, None);
        assert_eq!(resolved.source, AssetSource::Unpublished);
    }

    #[test]
    fn promotion_beats_abtest() {
        let mut ctx = promo_ctx(PromoAssets {
            image_url: Some("promo.jpg".into()),
            video_url: Some("promo.mp4".into()),
        });
        ctx.abtests.by_game.insert(
            "g1".into(),
            AbTestAssets {
                image_url: Some("va.jpg".into()),
                video_url: Some("va.mp4".into()),
                variant: Variant::A,
                creator_id: None,
            },
        );

        let resolved = resolve(&sample_game(), &ctx);
        assert_eq!(resolved.image_url, "promo.jpg");
        assert_eq!(resolved.video_url.as_deref(), Some("promo.mp4"));
        assert_eq!(resolved.source, AssetSource::Promotion);
        assert!(resolved.variant.is_none());
    }

    #[test]
    fn promo_image_falls_back_to_default() {
        let ctx = promo_ctx(PromoAssets {
            image_url: None,
            video_url: Some("p.mp4".into()),
        });

        let resolved = resolve(&sample_game(), &ctx);
        assert_eq!(resolved.image_url, "d.jpg");
        assert_eq!(resolved.video_url.as_deref(), Some("p.mp4"));
    }

    #[test]
    fn abtest_variant_assets_apply() {
        let mut ctx = ResolutionContext::default();
        ctx.abtests.by_game.insert(
            "g1".into(),
            AbTestAssets {
                image_url: None,
                video_url: Some("vb.mp4".into()),
                variant: Variant::B,
                creator_id: Some("u1".into()),
            },
        );

        let resolved = resolve(&sample_game(), &ctx);
        assert_eq!(resolved.image_url, "d.jpg");
        assert_eq!(resolved.video_url.as_deref(), Some("vb.mp4"));
        assert_eq!(resolved.variant, Some(Variant::B));
        assert_eq!(resolved.source, AssetSource::AbTest);
    }

    #[test]
    fn tier_fields_fall_back_per_field() {
        let mut game = sample_game();
        game.current_video = None;
        game.default_video = Some("d.mp4".into());

        let resolved = resolve(&game, &ResolutionContext::default());
        assert_eq!(resolved.image_url, "a.jpg");
        assert_eq!(resolved.video_url.as_deref(), Some("d.mp4"));
    }

    #[test]
    fn resolution_is_deterministic() {
        let game = sample_game();
        let ctx = ResolutionContext::default();
        let first = resolve(&game, &ctx);
        for _ in 0..20 {
            assert_eq!(resolve(&game, &ctx), first);
        }
    }

    fn active_window() -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        let start = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2100, 1, 1, 0, 0, 0).unwrap();
        (Some(start), Some(end))
    }

    #[test]
    fn promotion_build_maps_cms_ids_through_the_bridge() {
        let page = MemoryPage::new();
        page.add_group(None, "row-1");
        page.add_game(None, "g1", "g1.jpg");

        let (start, end) = active_window();
        let records = vec![PromotionRecord {
            group: "row-1".into(),
            start_date: start,
            end_date: end,
            published: true,
            games: vec![PromoGameRecord {
                game_cms_id: "cms-77".into(),
                promo_video: Some("p.mp4".into()),
                ..Default::default()
            }],
            ..Default::default()
        }];

        let mut bridge = HashMap::new();
        bridge.insert("cms-77".to_string(), "g1".to_string());

        let active = ActivePromotions::build(&records, &page, &bridge, Utc::now());
        let assets = active.assets("g1").expect("promotion should map to g1");
        assert_eq!(assets.video_url.as_deref(), Some("p.mp4"));
        assert!(assets.image_url.is_none());
    }

    #[test]
    fn promotion_build_skips_expired_windows() {
        let page = MemoryPage::new();
        page.add_group(None, "row-1");
        page.add_game(None, "g1", "g1.jpg");

        let start = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2000, 1, 2, 0, 0, 0).unwrap();
        let records = vec![PromotionRecord {
            group: "row-1".into(),
            start_date: Some(start),
            end_date: Some(end),
            published: true,
            games: vec![PromoGameRecord {
                game_cms_id: "g1".into(),
                promo_image: Some("p.jpg".into()),
                ..Default::default()
            }],
            ..Default::default()
        }];

        let active = ActivePromotions::build(&records, &page, &HashMap::new(), Utc::now());
        assert!(active.assets("g1").is_none());
    }

    #[test]
    fn abtest_build_targets_only_games_in_group_scope() {
        let page = MemoryPage::new();
        page.add_group(None, "row-1");
        page.add_game(None, "g1", "g1.jpg");

        let (start, end) = active_window();
        let records = vec![
            AbTestRecord {
                game_id: "g1".into(),
                group: "row-1".into(),
                start_date: start,
                end_date: end,
                published: true,
                image_variant_a: Some("va.jpg".into()),
                image_variant_b: Some("vb.jpg".into()),
                ..Default::default()
            },
            AbTestRecord {
                game_id: "g2".into(),
                group: "row-1".into(),
                start_date: start,
                end_date: end,
                published: true,
                ..Default::default()
            },
        ];

        let active = ActiveAbTests::build(&records, &page, "sess_1", Utc::now());
        assert!(active.assets("g1").is_some());
        assert!(active.assets("g2").is_none());
    }
}
