//! Deterministic A/B variant assignment
//!
//! One pure bucketing function shared by every caller. A session+game pair
//! always lands on the same variant for the session's lifetime, which is
//! what keeps re-resolution on every push flicker-free.

use vidra_common::Variant;

/// Assign a variant for a session+game pair
///
/// Combines the two ids, runs the 32-bit rolling hash the server side uses
/// for reporting, and buckets on the low bit. An empty session id (engine
/// not yet initialized) defaults to variant A.
pub fn assign(session_id: &str, game_id: &str) -> Variant {
    if session_id.is_empty() {
        return Variant::A;
    }

    let input = format!("{session_id}_{game_id}");
    if hash_string(&input) % 2 == 1 {
        Variant::A
    } else {
        Variant::B
    }
}

/// 32-bit rolling string hash (`h = h * 31 + ch` over UTF-16 code units,
/// wrapping), absolute value
fn hash_string(input: &str) -> u32 {
    let mut hash: i32 = 0;
    for unit in input.encode_utf16() {
        hash = hash
            .wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(unit as i32);
    }
    hash.unsigned_abs()
}
