use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonically increasing local player identity, one per opened session.
static LOCAL_PLAYER_COUNTER: AtomicU64 = AtomicU64::new(1);

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Id for an outbound audio stream. Short enough to read in logs.
pub fn new_stream_id() -> String {
    let uuid = uuid::Uuid::new_v4();
    let bytes = uuid.as_bytes();
    format!(
        "{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5]
    )
}

pub fn next_local_player_id() -> u64 {
    LOCAL_PLAYER_COUNTER.fetch_add(1, Ordering::Relaxed)
}
