use roomkeeper_common::ConversationError;
use serde::{Deserialize, Serialize};

use super::message::ActionMessage;

/// Sender constraints of a [`MessageFilter`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentFilter {
    pub id_matches: Option<Vec<String>>,
    /// Accepted but not applied yet: history does not record sender
    /// capabilities.
    pub capability_matches: Option<Vec<String>>,
}

/// Selects messages from the cached history.
///
/// `before` and `after` are exclusive millisecond timestamps. `limit` is
/// applied last and keeps the most recent matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageFilter {
    pub agent: Option<AgentFilter>,
    pub query: Option<String>,
    pub before: Option<i64>,
    pub after: Option<i64>,
    pub limit: Option<usize>,
}

impl MessageFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn before(mut self, timestamp: i64) -> Self {
        self.before = Some(timestamp);
        self
    }

    pub fn after(mut self, timestamp: i64) -> Self {
        self.after = Some(timestamp);
        self
    }

    pub fn sent_by<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.agent.get_or_insert_with(AgentFilter::default).id_matches =
            Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.agent.get_or_insert_with(AgentFilter::default).capability_matches =
            Some(capabilities.into_iter().map(Into::into).collect());
        self
    }

    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub(crate) fn apply<'a, I>(&self, messages: I) -> Result<Vec<ActionMessage>, ConversationError>
    where
        I: IntoIterator<Item = &'a ActionMessage>,
    {
        if self.query.as_deref().is_some_and(|q| !q.is_empty()) {
            return Err(ConversationError::UnsupportedFilter(
                "query is not supported on cached messages".into(),
            ));
        }

        let ids = self.agent.as_ref().and_then(|a| a.id_matches.as_ref());
        let mut matched: Vec<ActionMessage> = messages
            .into_iter()
            .filter(|m| ids.map_or(true, |ids| ids.contains(&m.user_id)))
            .filter(|m| self.before.map_or(true, |before| m.timestamp < before))
            .filter(|m| self.after.map_or(true, |after| m.timestamp > after))
            .cloned()
            .collect();

        if let Some(limit) = self.limit {
            let skip = matched.len().saturating_sub(limit);
            matched.drain(..skip);
        }
        Ok(matched)
    }
}
