//! Identity of the local participant.

use serde::{Deserialize, Serialize};

/// Who this process appears as in every room it joins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticipantConfig {
    /// Stable participant id. Empty means "generate one and keep it in the
    /// data directory".
    pub id: String,
    pub name: String,
    pub preview_url: Option<String>,
    pub capabilities: Vec<String>,
}

impl Default for ParticipantConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: "roomkeeper".into(),
            preview_url: None,
            capabilities: vec!["agent".into()],
        }
    }
}
