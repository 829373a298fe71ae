//! Host-page port
//!
//! The engine never touches a real DOM. Everything it needs from the
//! embedding page goes through the [`Page`] trait: marker-attribute
//! queries, tree traversal for group scoping, video surfaces to animate,
//! and a discovery callback for elements inserted after startup. The
//! in-memory implementation in [`memory`] backs the runner binary and the
//! test suite; browser bindings implement the same trait out of tree.

pub mod groups;
pub mod memory;

use std::sync::Arc;
use tokio::sync::Notify;

pub use groups::find_games_in_group;
pub use memory::{MemoryPage, MemoryVideoSurface, SurfaceOp};

/// Opaque handle to one element of the host page
pub type ElementId = u64;

/// Callback invoked whenever a new element appears in the page
pub type ElementListener = Box<dyn Fn(ElementId) + Send + Sync>;

/// Marker and sync attribute names on host-page elements
pub mod attrs {
    /// Identifies a game container and names the game it shows
    pub const GAME_ID: &str = "data-vidra-game-id";
    /// Scopes promotion/A-B group matching
    pub const GROUP: &str = "data-vidra-group";
    /// Last applied record version, kept in sync by the engine
    pub const VERSION: &str = "data-vidra-version";
    /// Last applied published type, kept in sync by the engine
    pub const TYPE: &str = "data-vidra-type";
    /// Variant marker on mounted video surfaces
    pub const VARIANT: &str = "data-vidra-variant";
    /// Per-element analytics opt-out
    pub const ANALYTICS: &str = "data-vidra-analytics";
}

/// Viewport dimensions reported with analytics events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Access to the embedding page
///
/// All methods are infallible from the engine's perspective: an element
/// that disappeared mid-operation reads as "absent", never as an error.
pub trait Page: Send + Sync {
    fn attribute(&self, el: ElementId, name: &str) -> Option<String>;
    fn set_attribute(&self, el: ElementId, name: &str, value: &str);

    fn children(&self, el: ElementId) -> Vec<ElementId>;
    fn parent(&self, el: ElementId) -> Option<ElementId>;
    /// Siblings after `el` in document order
    fn following_siblings(&self, el: ElementId) -> Vec<ElementId>;
    /// Descendants (excluding `el` itself) carrying the given attribute
    fn descendants_with_attribute(&self, el: ElementId, name: &str) -> Vec<ElementId>;
    /// All elements in the page carrying the given attribute
    fn elements_with_attribute(&self, name: &str) -> Vec<ElementId>;
    /// All elements whose attribute equals the given value
    fn elements_with_attribute_value(&self, name: &str, value: &str) -> Vec<ElementId>;

    /// `src` of the initial poster image inside a game container
    fn initial_poster(&self, el: ElementId) -> Option<String>;

    fn show_spinner(&self, el: ElementId);
    fn stop_spinner(&self, el: ElementId);
    fn remove_spinner(&self, el: ElementId);

    /// The video surface mounted in this container, if any
    fn video_surface(&self, el: ElementId) -> Option<Arc<dyn VideoSurface>>;
    /// Replace the poster image with a video surface and return it
    fn mount_video(&self, el: ElementId, poster: &str) -> Arc<dyn VideoSurface>;

    fn viewport(&self) -> Viewport;
    fn user_agent(&self) -> String;
    fn touch_capable(&self) -> bool;

    /// Register a discovery callback for late-inserted elements
    fn on_element_added(&self, listener: ElementListener);

    // Marker conveniences

    fn game_id(&self, el: ElementId) -> Option<String> {
        self.attribute(el, attrs::GAME_ID)
    }

    fn group_name(&self, el: ElementId) -> Option<String> {
        self.attribute(el, attrs::GROUP)
    }

    fn game_elements(&self) -> Vec<ElementId> {
        self.elements_with_attribute(attrs::GAME_ID)
    }

    fn elements_for_game(&self, game_id: &str) -> Vec<ElementId> {
        self.elements_with_attribute_value(attrs::GAME_ID, game_id)
    }

    fn group_elements(&self, group: &str) -> Vec<ElementId> {
        self.elements_with_attribute_value(attrs::GROUP, group)
    }
}

/// A mounted video element the orchestrator animates
///
/// Style mutations apply immediately; the visual easing between values is
/// the host page's concern. `ready()` is the can-render signal: notified
/// once the surface could paint a frame of the current source.
pub trait VideoSurface: Send + Sync {
    fn set_opacity(&self, value: f32);
    fn set_blur(&self, radius: f32);
    /// Assign the media source; `None` clears the video leaving the poster
    fn set_source(&self, src: Option<&str>, poster: &str);
    fn source(&self) -> Option<String>;
    fn poster(&self) -> String;
    /// Kick off decode of the assigned source
    fn begin_decode(&self);
    /// Can-render notification handle for the current source
    fn ready(&self) -> Arc<Notify>;

    fn set_attribute(&self, name: &str, value: &str);
    fn attribute(&self, name: &str) -> Option<String>;
}
