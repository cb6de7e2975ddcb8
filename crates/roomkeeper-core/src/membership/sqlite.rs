use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use roomkeeper_common::PersistenceError;
use rusqlite::{params, Connection, ErrorCode};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::persistence::RoomPersistence;
use super::spec::RoomSpec;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS room_specifications (
    id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    data TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (user_id, id)
);
";

/// Stored JSON shape of a row's `data` column.
#[derive(Serialize, Deserialize)]
struct RoomRow {
    room: String,
    endpoint_url: String,
}

/// SQLite-backed persistence. Blocking calls run on the blocking pool.
#[derive(Clone)]
pub struct SqlitePersistence {
    db: Arc<Mutex<Connection>>,
}

impl SqlitePersistence {
    pub fn open(path: &Path) -> Result<Self, PersistenceError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                PersistenceError::Backend(format!("create {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path).map_err(backend)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        Self::init(Connection::open_in_memory().map_err(backend)?)
    }

    fn init(conn: Connection) -> Result<Self, PersistenceError> {
        conn.execute_batch(SCHEMA).map_err(backend)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, f: F) -> Result<T, PersistenceError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, PersistenceError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let conn = db.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f(&conn)
        })
        .await
        .map_err(|e| PersistenceError::Backend(format!("blocking task failed: {e}")))?
    }
}

fn backend(e: rusqlite::Error) -> PersistenceError {
    PersistenceError::Backend(e.to_string())
}

#[async_trait]
impl RoomPersistence for SqlitePersistence {
    async fn list_rooms(&self, participant_id: &str) -> Result<Vec<RoomSpec>, PersistenceError> {
        let participant_id = participant_id.to_string();
        self.run(move |conn| {
            let mut stmt = conn
                .prepare("SELECT id, data FROM room_specifications WHERE user_id = ?1 ORDER BY rowid")
                .map_err(backend)?;
            let rows = stmt
                .query_map(params![participant_id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })
                .map_err(backend)?;

            let mut specs = Vec::new();
            for row in rows {
                let (id, data) = row.map_err(backend)?;
                match serde_json::from_str::<RoomRow>(&data) {
                    Ok(row) => specs.push(RoomSpec::new(row.room, row.endpoint_url)),
                    Err(e) => warn!(id = %id, error = %e, "Skipping unreadable room row"),
                }
            }
            Ok(specs)
        })
        .await
    }

    async fn upsert_room(
        &self,
        id: &str,
        participant_id: &str,
        spec: &RoomSpec,
    ) -> Result<(), PersistenceError> {
        let data = serde_json::to_string(&RoomRow {
            room: spec.room.clone(),
            endpoint_url: spec.endpoint_url.clone(),
        })
        .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        let (id, participant_id) = (id.to_string(), participant_id.to_string());

        self.run(move |conn| {
            match conn.execute(
                "INSERT INTO room_specifications (id, user_id, data) VALUES (?1, ?2, ?3)",
                params![id, participant_id, data],
            ) {
                Ok(_) => Ok(()),
                Err(e) if e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => {
                    Err(PersistenceError::Conflict(id))
                }
                Err(e) => Err(backend(e)),
            }
        })
        .await
    }

    async fn delete_room(&self, id: &str, participant_id: &str) -> Result<(), PersistenceError> {
        let (id, participant_id) = (id.to_string(), participant_id.to_string());
        self.run(move |conn| {
            conn.execute(
                "DELETE FROM room_specifications WHERE user_id = ?1 AND id = ?2",
                params![participant_id, id],
            )
            .map_err(backend)?;
            Ok(())
        })
        .await
    }

    async fn delete_all_rooms(&self, participant_id: &str) -> Result<(), PersistenceError> {
        let participant_id = participant_id.to_string();
        self.run(move |conn| {
            conn.execute(
                "DELETE FROM room_specifications WHERE user_id = ?1",
                params![participant_id],
            )
            .map_err(backend)?;
            Ok(())
        })
        .await
    }
}
