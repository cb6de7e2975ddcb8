use roomkeeper_common::MembershipError;
use serde::{Deserialize, Serialize};

/// A room this participant can be in. Two specs name the same room iff both
/// fields match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSpec {
    pub room: String,
    pub endpoint_url: String,
}

impl RoomSpec {
    pub fn new(room: impl Into<String>, endpoint_url: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            endpoint_url: endpoint_url.into(),
        }
    }

    /// Session key, also used as the serialization key for this room.
    pub fn key(&self) -> String {
        format!("{}/{}", self.endpoint_url, self.room)
    }

    /// Persistence row id.
    pub fn row_id(&self) -> String {
        format!("{}:{}", self.room, self.endpoint_url)
    }

    pub fn validate(&self) -> Result<(), MembershipError> {
        if self.room.trim().is_empty() {
            return Err(MembershipError::InvalidSpec("room is empty".into()));
        }
        if self.endpoint_url.trim().is_empty() {
            return Err(MembershipError::InvalidSpec("endpoint url is empty".into()));
        }
        Ok(())
    }
}

impl std::fmt::Display for RoomSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}
