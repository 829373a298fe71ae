//! In-memory host page
//!
//! A complete [`Page`] implementation backed by a plain element tree.
//! The runner binary builds one from a layout file; tests build one by
//! hand and assert on the exact operations applied to its surfaces.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::Deserialize;
use tokio::sync::Notify;

use super::{attrs, ElementId, ElementListener, Page, VideoSurface, Viewport};
use crate::error::{Error, Result};

/// Spinner overlay state of one container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpinnerState {
    Absent,
    Visible,
    Stopped,
}

struct Node {
    parent: Option<ElementId>,
    children: Vec<ElementId>,
    attrs: HashMap<String, String>,
    img_src: Option<String>,
    spinner: SpinnerState,
    surface: Option<Arc<MemoryVideoSurface>>,
}

impl Node {
    fn new(parent: Option<ElementId>) -> Self {
        Self {
            parent,
            children: Vec::new(),
            attrs: HashMap::new(),
            img_src: None,
            spinner: SpinnerState::Absent,
            surface: None,
        }
    }
}

struct Tree {
    nodes: HashMap<ElementId, Node>,
    root: ElementId,
    next_id: ElementId,
}

/// In-memory page tree
pub struct MemoryPage {
    tree: RwLock<Tree>,
    listeners: Mutex<Vec<ElementListener>>,
    viewport: RwLock<Viewport>,
    user_agent: RwLock<String>,
    touch: AtomicBool,
    auto_ready: AtomicBool,
}

impl MemoryPage {
    pub fn new() -> Self {
        let root = 1;
        let mut nodes = HashMap::new();
        nodes.insert(root, Node::new(None));
        Self {
            tree: RwLock::new(Tree {
                nodes,
                root,
                next_id: root + 1,
            }),
            listeners: Mutex::new(Vec::new()),
            viewport: RwLock::new(Viewport {
                width: 1280,
                height: 800,
            }),
            user_agent: RwLock::new("vidra-headless".to_string()),
            touch: AtomicBool::new(false),
            auto_ready: AtomicBool::new(true),
        }
    }

    /// Build a page from a layout file (see the runner binary)
    pub fn from_layout_str(toml_text: &str) -> Result<Self> {
        let layout: Layout =
            toml::from_str(toml_text).map_err(|e| Error::Config(e.to_string()))?;

        let page = Self::new();
        if let Some(ua) = layout.user_agent {
            page.set_user_agent(&ua);
        }
        if let Some(vp) = layout.viewport {
            page.set_viewport(Viewport {
                width: vp.width,
                height: vp.height,
            });
        }
        for section in layout.section {
            let container = page.add_container(None);
            if let Some(group) = &section.group {
                page.add_group(Some(container), group);
            }
            for game in &section.game {
                page.add_game(Some(container), &game.id, &game.poster);
            }
        }
        Ok(page)
    }

    pub fn root(&self) -> ElementId {
        self.tree.read().unwrap().root
    }

    /// Surfaces created later report can-render as soon as a source is
    /// assigned. Disable to exercise the readiness timeout path.
    pub fn set_auto_ready(&self, enabled: bool) {
        self.auto_ready.store(enabled, Ordering::SeqCst);
    }

    pub fn set_viewport(&self, viewport: Viewport) {
        *self.viewport.write().unwrap() = viewport;
    }

    pub fn set_user_agent(&self, user_agent: &str) {
        *self.user_agent.write().unwrap() = user_agent.to_string();
    }

    pub fn set_touch_capable(&self, touch: bool) {
        self.touch.store(touch, Ordering::SeqCst);
    }

    /// Add a bare container element
    pub fn add_container(&self, parent: Option<ElementId>) -> ElementId {
        self.add_element(parent, &[], None)
    }

    /// Add a group marker element
    pub fn add_group(&self, parent: Option<ElementId>, group: &str) -> ElementId {
        self.add_element(parent, &[(attrs::GROUP, group)], None)
    }

    /// Add a game container holding its initial poster image
    pub fn add_game(&self, parent: Option<ElementId>, game_id: &str, poster: &str) -> ElementId {
        self.add_element(parent, &[(attrs::GAME_ID, game_id)], Some(poster))
    }

    fn add_element(
        &self,
        parent: Option<ElementId>,
        attributes: &[(&str, &str)],
        img_src: Option<&str>,
    ) -> ElementId {
        let id = {
            let mut tree = self.tree.write().unwrap();
            let parent = parent.unwrap_or(tree.root);
            let id = tree.next_id;
            tree.next_id += 1;

            let mut node = Node::new(Some(parent));
            for (name, value) in attributes {
                node.attrs.insert(name.to_string(), value.to_string());
            }
            node.img_src = img_src.map(String::from);
            tree.nodes.insert(id, node);
            if let Some(parent_node) = tree.nodes.get_mut(&parent) {
                parent_node.children.push(id);
            }
            id
        };

        // Listeners run outside the tree lock; they call back into the page.
        let listeners = self.listeners.lock().unwrap();
        for listener in listeners.iter() {
            listener(id);
        }
        id
    }

    /// Spinner overlay state, for assertions
    pub fn spinner_state(&self, el: ElementId) -> SpinnerState {
        self.tree
            .read()
            .unwrap()
            .nodes
            .get(&el)
            .map(|n| n.spinner)
            .unwrap_or(SpinnerState::Absent)
    }

    /// The concrete surface mounted in a container, for assertions
    pub fn memory_surface(&self, el: ElementId) -> Option<Arc<MemoryVideoSurface>> {
        self.tree
            .read()
            .unwrap()
            .nodes
            .get(&el)
            .and_then(|n| n.surface.clone())
    }

    fn collect_descendants(
        tree: &Tree,
        el: ElementId,
        name: &str,
        out: &mut Vec<ElementId>,
    ) {
        let Some(node) = tree.nodes.get(&el) else {
            return;
        };
        for &child in &node.children {
            if let Some(child_node) = tree.nodes.get(&child) {
                if child_node.attrs.contains_key(name) {
                    out.push(child);
                }
            }
            Self::collect_descendants(tree, child, name, out);
        }
    }

    fn walk_matching<F>(tree: &Tree, el: ElementId, matches: &F, out: &mut Vec<ElementId>)
    where
        F: Fn(&Node) -> bool,
    {
        let Some(node) = tree.nodes.get(&el) else {
            return;
        };
        for &child in &node.children {
            if let Some(child_node) = tree.nodes.get(&child) {
                if matches(child_node) {
                    out.push(child);
                }
            }
            Self::walk_matching(tree, child, matches, out);
        }
    }
}

impl Default for MemoryPage {
    fn default() -> Self {
        Self::new()
    }
}

impl Page for MemoryPage {
    fn attribute(&self, el: ElementId, name: &str) -> Option<String> {
        self.tree
            .read()
            .unwrap()
            .nodes
            .get(&el)
            .and_then(|n| n.attrs.get(name).cloned())
    }

    fn set_attribute(&self, el: ElementId, name: &str, value: &str) {
        if let Some(node) = self.tree.write().unwrap().nodes.get_mut(&el) {
            node.attrs.insert(name.to_string(), value.to_string());
        }
    }

    fn children(&self, el: ElementId) -> Vec<ElementId> {
        self.tree
            .read()
            .unwrap()
            .nodes
            .get(&el)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    fn parent(&self, el: ElementId) -> Option<ElementId> {
        let tree = self.tree.read().unwrap();
        tree.nodes.get(&el).and_then(|n| n.parent)
    }

    fn following_siblings(&self, el: ElementId) -> Vec<ElementId> {
        let tree = self.tree.read().unwrap();
        let Some(parent) = tree.nodes.get(&el).and_then(|n| n.parent) else {
            return Vec::new();
        };
        let Some(parent_node) = tree.nodes.get(&parent) else {
            return Vec::new();
        };
        parent_node
            .children
            .iter()
            .skip_while(|&&c| c != el)
            .skip(1)
            .copied()
            .collect()
    }

    fn descendants_with_attribute(&self, el: ElementId, name: &str) -> Vec<ElementId> {
        let tree = self.tree.read().unwrap();
        let mut out = Vec::new();
        Self::collect_descendants(&tree, el, name, &mut out);
        out
    }

    fn elements_with_attribute(&self, name: &str) -> Vec<ElementId> {
        let tree = self.tree.read().unwrap();
        let mut out = Vec::new();
        Self::walk_matching(&tree, tree.root, &|n| n.attrs.contains_key(name), &mut out);
        out
    }

    fn elements_with_attribute_value(&self, name: &str, value: &str) -> Vec<ElementId> {
        let tree = self.tree.read().unwrap();
        let mut out = Vec::new();
        Self::walk_matching(
            &tree,
            tree.root,
            &|n| n.attrs.get(name).map(String::as_str) == Some(value),
            &mut out,
        );
        out
    }

    fn initial_poster(&self, el: ElementId) -> Option<String> {
        self.tree
            .read()
            .unwrap()
            .nodes
            .get(&el)
            .and_then(|n| n.img_src.clone())
    }

    fn show_spinner(&self, el: ElementId) {
        if let Some(node) = self.tree.write().unwrap().nodes.get_mut(&el) {
            node.spinner = SpinnerState::Visible;
        }
    }

    fn stop_spinner(&self, el: ElementId) {
        if let Some(node) = self.tree.write().unwrap().nodes.get_mut(&el) {
            if node.spinner == SpinnerState::Visible {
                node.spinner = SpinnerState::Stopped;
            }
        }
    }

    fn remove_spinner(&self, el: ElementId) {
        if let Some(node) = self.tree.write().unwrap().nodes.get_mut(&el) {
            node.spinner = SpinnerState::Absent;
        }
    }

    fn video_surface(&self, el: ElementId) -> Option<Arc<dyn VideoSurface>> {
        self.memory_surface(el).map(|s| s as Arc<dyn VideoSurface>)
    }

    fn mount_video(&self, el: ElementId, poster: &str) -> Arc<dyn VideoSurface> {
        let surface = Arc::new(MemoryVideoSurface::new(
            poster,
            self.auto_ready.load(Ordering::SeqCst),
        ));
        if let Some(node) = self.tree.write().unwrap().nodes.get_mut(&el) {
            // The poster image is replaced by the video.
            node.img_src = None;
            node.surface = Some(surface.clone());
        }
        surface
    }

    fn viewport(&self) -> Viewport {
        *self.viewport.read().unwrap()
    }

    fn user_agent(&self) -> String {
        self.user_agent.read().unwrap().clone()
    }

    fn touch_capable(&self) -> bool {
        self.touch.load(Ordering::SeqCst)
    }

    fn on_element_added(&self, listener: ElementListener) {
        self.listeners.lock().unwrap().push(listener);
    }
}

/// Operations applied to a surface, recorded in order
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceOp {
    Opacity(f32),
    Blur(f32),
    Source {
        src: Option<String>,
        poster: String,
    },
    BeginDecode,
}

struct SurfaceState {
    opacity: f32,
    blur: f32,
    src: Option<String>,
    poster: String,
    attrs: HashMap<String, String>,
    ops: Vec<SurfaceOp>,
}

/// In-memory video surface recording everything done to it
pub struct MemoryVideoSurface {
    state: Mutex<SurfaceState>,
    ready: Arc<Notify>,
    auto_ready: bool,
}

impl MemoryVideoSurface {
    fn new(poster: &str, auto_ready: bool) -> Self {
        Self {
            state: Mutex::new(SurfaceState {
                opacity: 1.0,
                blur: 0.0,
                src: None,
                poster: poster.to_string(),
                attrs: HashMap::new(),
                ops: Vec::new(),
            }),
            ready: Arc::new(Notify::new()),
            auto_ready,
        }
    }

    /// Fire the can-render signal
    pub fn signal_ready(&self) {
        self.ready.notify_one();
    }

    pub fn opacity(&self) -> f32 {
        self.state.lock().unwrap().opacity
    }

    pub fn blur(&self) -> f32 {
        self.state.lock().unwrap().blur
    }

    /// Everything applied to this surface, in order
    pub fn ops(&self) -> Vec<SurfaceOp> {
        self.state.lock().unwrap().ops.clone()
    }
}

impl VideoSurface for MemoryVideoSurface {
    fn set_opacity(&self, value: f32) {
        let mut state = self.state.lock().unwrap();
        state.opacity = value;
        state.ops.push(SurfaceOp::Opacity(value));
    }

    fn set_blur(&self, radius: f32) {
        let mut state = self.state.lock().unwrap();
        state.blur = radius;
        state.ops.push(SurfaceOp::Blur(radius));
    }

    fn set_source(&self, src: Option<&str>, poster: &str) {
        {
            let mut state = self.state.lock().unwrap();
            state.src = src.map(String::from);
            state.poster = poster.to_string();
            state.ops.push(SurfaceOp::Source {
                src: src.map(String::from),
                poster: poster.to_string(),
            });
        }
        if self.auto_ready && src.is_some() {
            self.ready.notify_one();
        }
    }

    fn source(&self) -> Option<String> {
        self.state.lock().unwrap().src.clone()
    }

    fn poster(&self) -> String {
        self.state.lock().unwrap().poster.clone()
    }

    fn begin_decode(&self) {
        self.state.lock().unwrap().ops.push(SurfaceOp::BeginDecode);
    }

    fn ready(&self) -> Arc<Notify> {
        self.ready.clone()
    }

    fn set_attribute(&self, name: &str, value: &str) {
        self.state
            .lock()
            .unwrap()
            .attrs
            .insert(name.to_string(), value.to_string());
    }

    fn attribute(&self, name: &str) -> Option<String> {
        self.state.lock().unwrap().attrs.get(name).cloned()
    }
}

#[derive(Debug, Deserialize)]
struct Layout {
    user_agent: Option<String>,
    viewport: Option<ViewportSpec>,
    #[serde(default)]
    section: Vec<SectionSpec>,
}

#[derive(Debug, Deserialize)]
struct ViewportSpec {
    width: u32,
    height: u32,
}

#[derive(Debug, Deserialize)]
struct SectionSpec {
    group: Option<String>,
    #[serde(default)]
    game: Vec<GameSpec>,
}

#[derive(Debug, Deserialize)]
struct GameSpec {
    id: String,
    poster: String,
}
