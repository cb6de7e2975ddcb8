use serde::{Deserialize, Serialize};

use crate::participant::PresenceRecord;

/// Method name of the hidden typing ping.
pub const TYPING_METHOD: &str = "typing";

/// One chat action. `args` is opaque to the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionMessage {
    pub user_id: String,
    pub name: String,
    pub method: String,
    #[serde(default)]
    pub args: serde_json::Value,
    /// Milliseconds since the Unix epoch.
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hidden: bool,
}

impl ActionMessage {
    /// A visible message stamped with the current time.
    pub fn new(
        user_id: impl Into<String>,
        name: impl Into<String>,
        method: impl Into<String>,
        args: serde_json::Value,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            name: name.into(),
            method: method.into(),
            args,
            timestamp: chrono::Utc::now().timestamp_millis(),
            hidden: false,
        }
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn typing(user_id: &str, name: &str, typing: bool) -> Self {
        Self::new(
            user_id,
            name,
            TYPING_METHOD,
            serde_json::json!({ "typing": typing }),
        )
        .hidden()
    }

    /// `Some(flag)` if this is a typing ping.
    pub fn typing_flag(&self) -> Option<bool> {
        if !self.hidden || self.method != TYPING_METHOD {
            return None;
        }
        self.args.get("typing").and_then(serde_json::Value::as_bool)
    }

    /// `name: method {args}`, as used in embedding summaries.
    pub fn summary_line(&self) -> String {
        format!("{}: {} {}", self.name, self.method, self.args)
    }
}

/// A message plus the sender's presence record, when known.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub sender: Option<PresenceRecord>,
    pub message: ActionMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingEvent {
    Start,
    End,
}

/// Name and description of the room's shared scene document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scene {
    pub name: String,
    #[serde(default)]
    pub description: String,
}
