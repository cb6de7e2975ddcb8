use roomkeeper_common::new_id;
use roomkeeper_config::schema::ParticipantConfig;
use serde::{Deserialize, Serialize};

/// The local participant this process acts as.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub name: String,
    pub preview_url: Option<String>,
    pub capabilities: Vec<String>,
}

impl Participant {
    pub fn generate(name: &str) -> Self {
        Self {
            id: new_id(),
            name: name.to_string(),
            preview_url: None,
            capabilities: Vec::new(),
        }
    }

    /// An empty configured id gets a fresh one.
    pub fn from_config(config: &ParticipantConfig) -> Self {
        let id = if config.id.trim().is_empty() {
            new_id()
        } else {
            config.id.clone()
        };
        Self {
            id,
            name: config.name.clone(),
            preview_url: config.preview_url.clone(),
            capabilities: config.capabilities.clone(),
        }
    }

    /// The record other participants see for us.
    pub fn to_presence(&self) -> PresenceRecord {
        PresenceRecord {
            participant_id: self.id.clone(),
            name: self.name.clone(),
            preview_url: self.preview_url.clone(),
            capabilities: self.capabilities.clone(),
        }
    }
}

/// A participant visible in a room, as published in its player spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    #[serde(default)]
    pub participant_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub preview_url: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl PresenceRecord {
    /// A participant that joined without publishing a player spec.
    pub fn anonymous(participant_id: &str) -> Self {
        Self {
            participant_id: participant_id.to_string(),
            name: String::new(),
            preview_url: None,
            capabilities: Vec::new(),
        }
    }

    /// Parse a `playerSpec` presence value. The participant id always comes
    /// from the transport, never from the payload.
    pub fn from_player_spec(
        participant_id: &str,
        value: &serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        let mut record: PresenceRecord = serde_json::from_value(value.clone())?;
        record.participant_id = participant_id.to_string();
        Ok(record)
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}
