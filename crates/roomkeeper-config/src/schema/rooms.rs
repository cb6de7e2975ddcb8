//! Membership, conversation, transport and manager settings.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where the declared room list is persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MembershipConfig {
    /// SQLite database path. `None` uses `<data dir>/roomkeeper/rooms.db`.
    pub database_path: Option<PathBuf>,
    /// Keep the room list in memory only.
    pub ephemeral: bool,
}

/// Per-room conversation state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Messages kept in the history ring buffer (valid range: 1-10000).
    pub history_limit: u32,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self { history_limit: 50 }
    }
}

/// Realtime transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub connect_timeout_secs: u32,
    pub heartbeat_interval_secs: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 15,
            heartbeat_interval_secs: 25,
        }
    }
}

/// Reconciliation loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// How far ahead the keepalive deadline is pushed while any room is live.
    pub keepalive_interval_secs: u32,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            keepalive_interval_secs: 10,
        }
    }
}
