use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use roomkeeper_common::PersistenceError;

use super::spec::RoomSpec;

/// Durable storage for declared rooms.
///
/// `upsert_room` must report an existing row as
/// [`PersistenceError::Conflict`], distinct from other failures.
#[async_trait]
pub trait RoomPersistence: Send + Sync {
    async fn list_rooms(&self, participant_id: &str) -> Result<Vec<RoomSpec>, PersistenceError>;

    async fn upsert_room(
        &self,
        id: &str,
        participant_id: &str,
        spec: &RoomSpec,
    ) -> Result<(), PersistenceError>;

    async fn delete_room(&self, id: &str, participant_id: &str) -> Result<(), PersistenceError>;

    async fn delete_all_rooms(&self, participant_id: &str) -> Result<(), PersistenceError>;
}

/// Process-local persistence. Rows keep insertion order per participant.
#[derive(Default)]
pub struct MemoryPersistence {
    rows: Mutex<BTreeMap<String, Vec<(String, RoomSpec)>>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a row as if a previous run had persisted it.
    pub fn with_room(self, participant_id: &str, spec: RoomSpec) -> Self {
        self.lock()
            .entry(participant_id.to_string())
            .or_default()
            .push((spec.row_id(), spec));
        self
    }

    pub fn row_count(&self, participant_id: &str) -> usize {
        self.lock().get(participant_id).map_or(0, Vec::len)
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Vec<(String, RoomSpec)>>> {
        self.rows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl RoomPersistence for MemoryPersistence {
    async fn list_rooms(&self, participant_id: &str) -> Result<Vec<RoomSpec>, PersistenceError> {
        Ok(self
            .lock()
            .get(participant_id)
            .map(|rows| rows.iter().map(|(_, spec)| spec.clone()).collect())
            .unwrap_or_default())
    }

    async fn upsert_room(
        &self,
        id: &str,
        participant_id: &str,
        spec: &RoomSpec,
    ) -> Result<(), PersistenceError> {
        let mut rows = self.lock();
        let rows = rows.entry(participant_id.to_string()).or_default();
        if rows.iter().any(|(row_id, _)| row_id == id) {
            return Err(PersistenceError::Conflict(id.to_string()));
        }
        rows.push((id.to_string(), spec.clone()));
        Ok(())
    }

    async fn delete_room(&self, id: &str, participant_id: &str) -> Result<(), PersistenceError> {
        if let Some(rows) = self.lock().get_mut(participant_id) {
            rows.retain(|(row_id, _)| row_id != id);
        }
        Ok(())
    }

    async fn delete_all_rooms(&self, participant_id: &str) -> Result<(), PersistenceError> {
        self.lock().remove(participant_id);
        Ok(())
    }
}
