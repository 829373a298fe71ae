//! # Vidra Engine Library (vidra-engine)
//!
//! Client-side real-time asset engine for game-lobby pages.
//!
//! **Purpose:** Keep every tracked game tile's image/video pair synchronized
//! with server-side state (publish status, A/B assignment, promotion
//! overrides) over a persistent channel, and animate the swaps between
//! media states without flicker under out-of-order pushes.
//!
//! **Architecture:** Headless engine behind a host-page port. The page
//! itself (DOM, WASM bindings) is platform glue supplied by the embedder;
//! an in-memory implementation ships for the runner binary and tests.

pub mod analytics;
pub mod assign;
pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod local;
pub mod page;
pub mod resolve;
pub mod session;
pub mod store;
pub mod transport;

pub use engine::Engine;
pub use error::{Error, Result};
