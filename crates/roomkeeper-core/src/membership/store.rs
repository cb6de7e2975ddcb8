use std::sync::{Arc, Mutex};

use futures_util::future::join_all;
use roomkeeper_common::{Dispatcher, MembershipError, PersistenceError};
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

use super::persistence::RoomPersistence;
use super::spec::RoomSpec;
use crate::serializer::KeyedSerializer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Unloaded,
    Loading,
    Loaded,
}

/// The declared set of rooms for one participant.
///
/// `join` and `leave` resolve only after every subscriber of
/// [`join_events`](Self::join_events) / [`leave_events`](Self::leave_events)
/// has finished with the event.
pub struct RoomMembershipStore {
    participant_id: String,
    persistence: Arc<dyn RoomPersistence>,
    rooms: RwLock<Vec<RoomSpec>>,
    load_state: Mutex<LoadState>,
    loaded: OnceCell<()>,
    writes: KeyedSerializer<String>,
    join_events: Dispatcher<RoomSpec>,
    leave_events: Dispatcher<RoomSpec>,
}

impl RoomMembershipStore {
    pub fn new(participant_id: impl Into<String>, persistence: Arc<dyn RoomPersistence>) -> Self {
        Self {
            participant_id: participant_id.into(),
            persistence,
            rooms: RwLock::new(Vec::new()),
            load_state: Mutex::new(LoadState::Unloaded),
            loaded: OnceCell::new(),
            writes: KeyedSerializer::new(),
            join_events: Dispatcher::new("join"),
            leave_events: Dispatcher::new("leave"),
        }
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    pub fn join_events(&self) -> &Dispatcher<RoomSpec> {
        &self.join_events
    }

    pub fn leave_events(&self) -> &Dispatcher<RoomSpec> {
        &self.leave_events
    }

    pub fn load_state(&self) -> LoadState {
        *self
            .load_state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_load_state(&self, state: LoadState) {
        *self
            .load_state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
    }

    /// Snapshot of declared rooms in join order.
    pub async fn rooms(&self) -> Vec<RoomSpec> {
        self.rooms.read().await.clone()
    }

    pub async fn contains(&self, spec: &RoomSpec) -> bool {
        self.rooms.read().await.contains(spec)
    }

    /// Fetch persisted rooms once and replay them as joins. Later calls wait
    /// for the first one and return immediately after.
    pub async fn load(&self) {
        self.loaded.get_or_init(|| self.load_persisted()).await;
    }

    async fn load_persisted(&self) {
        self.set_load_state(LoadState::Loading);
        match self.persistence.list_rooms(&self.participant_id).await {
            Ok(specs) => {
                info!(count = specs.len(), "Loaded persisted rooms");
                let joins = specs.into_iter().map(|spec| async move {
                    if let Err(e) = spec.validate() {
                        warn!(room = %spec, error = %e, "Skipping persisted room");
                        return;
                    }
                    if let Err(e) = self.join_internal(spec.clone()).await {
                        warn!(room = %spec, error = %e, "Failed to rejoin persisted room");
                    }
                });
                join_all(joins).await;
            }
            Err(e) => warn!(error = %e, "Failed to load persisted rooms"),
        }
        self.set_load_state(LoadState::Loaded);
    }

    /// Declare `spec`. Joining a room that is already declared succeeds
    /// without doing anything.
    pub async fn join(&self, spec: RoomSpec) -> Result<(), MembershipError> {
        spec.validate()?;
        self.load().await;
        self.join_internal(spec).await
    }

    async fn join_internal(&self, spec: RoomSpec) -> Result<(), MembershipError> {
        {
            let mut rooms = self.rooms.write().await;
            if rooms.contains(&spec) {
                debug!(room = %spec, "Room already joined");
                return Ok(());
            }
            rooms.push(spec.clone());
        }

        let row_id = spec.row_id();
        let (_, persisted) = tokio::join!(
            self.join_events.emit(spec.clone()),
            self.write(|| self.persistence.upsert_room(&row_id, &self.participant_id, &spec)),
        );

        match persisted {
            // Already stored by an earlier run.
            Ok(()) | Err(PersistenceError::Conflict(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove `spec` from the declared set.
    pub async fn leave(&self, spec: &RoomSpec) -> Result<(), MembershipError> {
        spec.validate()?;
        self.load().await;
        {
            let mut rooms = self.rooms.write().await;
            let Some(index) = rooms.iter().position(|s| s == spec) else {
                return Err(MembershipError::NotJoined(spec.key()));
            };
            rooms.remove(index);
        }

        let row_id = spec.row_id();
        let (_, deleted) = tokio::join!(
            self.leave_events.emit(spec.clone()),
            self.write(|| self.persistence.delete_room(&row_id, &self.participant_id)),
        );
        deleted?;
        Ok(())
    }

    /// Leave every declared room.
    pub async fn leave_all(&self) -> Result<(), MembershipError> {
        self.load().await;
        let specs = std::mem::take(&mut *self.rooms.write().await);

        let leaves = join_all(specs.into_iter().map(|spec| self.leave_events.emit(spec)));
        let (_, deleted) = tokio::join!(
            leaves,
            self.write(|| self.persistence.delete_all_rooms(&self.participant_id)),
        );
        deleted?;
        Ok(())
    }

    /// Persistence writes for this participant run one at a time, in order.
    async fn write<F, Fut>(&self, f: F) -> Result<(), PersistenceError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<(), PersistenceError>>,
    {
        self.writes.wait_for_turn(self.participant_id.clone(), f).await
    }
}
