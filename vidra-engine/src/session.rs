//! Per-session identity
//!
//! The session identifier feeds deterministic A/B bucketing, so it is
//! generated once and persisted through the local store; every engine
//! start inside the same session sees the same id and therefore the same
//! variants.

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::local::LocalStore;

/// Storage key for the session identifier
pub const SESSION_KEY: &str = "vidra_session_id";

/// Fetch the persisted session id, generating one on first use
pub fn resolve_session_id(local: &dyn LocalStore) -> String {
    if let Some(existing) = local.get(SESSION_KEY) {
        if !existing.is_empty() {
            return existing;
        }
    }

    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();
    let session_id = format!("vidra_{}_{}", Utc::now().timestamp_millis(), suffix);
    local.set(SESSION_KEY, &session_id);
    session_id
}
