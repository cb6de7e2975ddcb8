//! JSON frames exchanged with a room endpoint.
//!
//! Every frame is a JSON object tagged by `type`. The client opens with
//! `hello` and the endpoint answers `welcome` with the current roster and
//! scene. Frames relayed from other participants carry `from`.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use roomkeeper_common::TransportError;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::conversation::{ActionMessage, Scene};
use crate::participant::PresenceRecord;
use crate::session::TransportEvent;

/// One roster entry in a `welcome` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peer {
    pub participant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_spec: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    // -- client -> endpoint ------------------------------------------------
    Hello {
        room: String,
        participant_id: String,
    },
    Heartbeat,
    PlayerSpec {
        spec: PresenceRecord,
    },
    Leave,

    // -- both directions ---------------------------------------------------
    Chat {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        message: ActionMessage,
    },
    AudioStart {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        stream_id: String,
        media_type: String,
    },
    /// `data` is base64.
    Audio {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        stream_id: String,
        data: String,
    },
    AudioEnd {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        stream_id: String,
    },

    // -- endpoint -> client ------------------------------------------------
    Welcome {
        #[serde(default)]
        participants: Vec<Peer>,
        #[serde(default)]
        scene: Option<Scene>,
    },
    Join {
        participant_id: String,
        #[serde(default)]
        player_spec: Option<serde_json::Value>,
    },
    Update {
        participant_id: String,
        key: String,
        value: serde_json::Value,
    },
    Part {
        participant_id: String,
    },
    Scene {
        #[serde(default)]
        scene: Option<Scene>,
    },
    Error {
        message: String,
    },
}

impl Frame {
    pub fn audio(stream_id: &str, data: &[u8]) -> Self {
        Frame::Audio {
            from: None,
            stream_id: stream_id.to_string(),
            data: B64.encode(data),
        }
    }

    pub fn to_json(&self) -> Result<String, TransportError> {
        serde_json::to_string(self).map_err(|e| TransportError::Protocol(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self, TransportError> {
        serde_json::from_str(text).map_err(|e| TransportError::Protocol(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Frame -> TransportEvent
// ---------------------------------------------------------------------------

/// Translate one inbound frame. Client-only frames translate to nothing;
/// `error` frames and malformed relays are protocol errors.
pub fn frame_to_events(frame: Frame) -> Result<Vec<TransportEvent>, TransportError> {
    let events = match frame {
        Frame::Hello { .. } | Frame::Heartbeat | Frame::PlayerSpec { .. } | Frame::Leave => {
            Vec::new()
        }
        Frame::Welcome {
            participants,
            scene,
        } => {
            let mut events: Vec<TransportEvent> = participants
                .into_iter()
                .map(|peer| TransportEvent::PresenceJoin {
                    player_spec: parse_player_spec(&peer.participant_id, peer.player_spec),
                    participant_id: peer.participant_id,
                })
                .collect();
            events.push(TransportEvent::SceneChanged(scene));
            events
        }
        Frame::Join {
            participant_id,
            player_spec,
        } => vec![TransportEvent::PresenceJoin {
            player_spec: parse_player_spec(&participant_id, player_spec),
            participant_id,
        }],
        Frame::Update {
            participant_id,
            key,
            value,
        } => vec![TransportEvent::PresenceUpdate {
            participant_id,
            key,
            value,
        }],
        Frame::Part { participant_id } => vec![TransportEvent::PresenceLeave { participant_id }],
        Frame::Scene { scene } => vec![TransportEvent::SceneChanged(scene)],
        Frame::Chat { from, message } => vec![TransportEvent::Chat {
            participant_id: sender(from, "chat")?,
            message,
        }],
        Frame::AudioStart {
            from,
            stream_id,
            media_type,
        } => vec![TransportEvent::AudioStart {
            participant_id: sender(from, "audio_start")?,
            stream_id,
            media_type,
        }],
        Frame::Audio {
            from,
            stream_id,
            data,
        } => {
            let participant_id = sender(from, "audio")?;
            let data = B64
                .decode(data.as_bytes())
                .map_err(|e| TransportError::Protocol(format!("audio payload: {e}")))?;
            vec![TransportEvent::Audio {
                participant_id,
                stream_id,
                data,
            }]
        }
        Frame::AudioEnd { from, stream_id } => vec![TransportEvent::AudioEnd {
            participant_id: sender(from, "audio_end")?,
            stream_id,
        }],
        Frame::Error { message } => return Err(TransportError::Protocol(message)),
    };
    Ok(events)
}

fn sender(from: Option<String>, kind: &str) -> Result<String, TransportError> {
    from.ok_or_else(|| TransportError::Protocol(format!("{kind} frame without sender")))
}

/// A malformed player spec still lets the participant in, anonymously.
fn parse_player_spec(
    participant_id: &str,
    value: Option<serde_json::Value>,
) -> Option<PresenceRecord> {
    let value = value?;
    match PresenceRecord::from_player_spec(participant_id, &value) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(participant = %participant_id, error = %e, "Ignoring malformed player spec");
            None
        }
    }
}
