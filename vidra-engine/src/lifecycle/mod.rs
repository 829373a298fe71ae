//! Transition lifecycle
//!
//! Two state machines animate the page. [`Orchestrator`] runs the
//! steady-state swap (Idle → Prepare → Loading → Settling) whenever a game
//! with a mounted video surface gets a new target. [`cold_start`] runs the
//! longer first-paint sequence (Waiting → Spinner → Transition → Complete)
//! once per discovered element. Both are cancel-safe: stale phases no-op
//! behind per-game generation counters.

pub mod cold_start;
mod orchestrator;

pub use orchestrator::{Orchestrator, TransitionTarget};
