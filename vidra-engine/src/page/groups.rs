//! Group membership resolution
//!
//! Maps a group marker element to the game elements it governs. The page
//! author may nest games inside the marker, lay them out as siblings after
//! it, or hang them off the shared parent; the strategies below are tried
//! in that order and the first non-empty result wins.

use super::{attrs, ElementId, Page};

/// Find the game elements a group marker governs
///
/// 1. Descendants of the marker carrying a game-id.
/// 2. Otherwise forward siblings (the sibling itself, then its
///    descendants), stopping at the next group marker.
/// 3. Otherwise the parent's children positioned after the marker, same
///    stop rule. Pages that render markers as non-sibling annotations
///    still resolve through this pass.
///
/// An empty result means "no games affected", not an error.
pub fn find_games_in_group(page: &dyn Page, group_el: ElementId) -> Vec<ElementId> {
    let direct = page.descendants_with_attribute(group_el, attrs::GAME_ID);
    if !direct.is_empty() {
        return direct;
    }

    let mut games = Vec::new();
    for sibling in page.following_siblings(group_el) {
        if page.attribute(sibling, attrs::GROUP).is_some() {
            break;
        }
        if page.attribute(sibling, attrs::GAME_ID).is_some() {
            games.push(sibling);
        }
        games.extend(page.descendants_with_attribute(sibling, attrs::GAME_ID));
    }
    if !games.is_empty() {
        return games;
    }

    let Some(parent) = page.parent(group_el) else {
        return games;
    };
    let mut past_marker = false;
    for child in page.children(parent) {
        if child == group_el {
            past_marker = true;
            continue;
        }
        if !past_marker {
            continue;
        }
        if page.attribute(child, attrs::GROUP).is_some() {
            break;
        }
        if page.attribute(child, attrs::GAME_ID).is_some() {
            games.push(child);
        }
        games.extend(page.descendants_with_attribute(child, attrs::GAME_ID));
    }

    games
}
