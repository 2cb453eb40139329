//! Shared timestamp/id helpers for event envelopes and generated identifiers.

use ulid::Ulid;

/// Returns unix-epoch seconds with `Z` suffix (e.g. `1771220592Z`).
pub fn now_epoch_z() -> String {
    format!("{}Z", now_millis() / 1000)
}

/// Milliseconds since the unix epoch.
pub fn now_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub fn new_event_id() -> String {
    Ulid::new().to_string()
}

/// Prefixed, lowercase ULID (e.g. `scope-01j...`).
pub fn prefixed_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Ulid::new().to_string().to_lowercase())
}
