//! Config, identity and persistence resolution shared by every command.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use roomkeeper_common::RoomkeeperError;
use roomkeeper_config::schema::{MembershipConfig, ParticipantConfig};
use roomkeeper_config::RoomkeeperConfig;
use roomkeeper_core::{MemoryPersistence, Participant, RoomPersistence, SqlitePersistence};
use tracing::{info, warn};

const PARTICIPANT_ID_FILE: &str = "participant_id";
const DATABASE_FILE: &str = "rooms.db";

/// Where the config came from. Loading runs before logging is set up, so
/// this is reported once the subscriber exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Override(PathBuf),
    Default,
    Fallback(String),
}

impl ConfigSource {
    pub fn report(&self) {
        match self {
            ConfigSource::Override(path) => info!("Using config override: {}", path.display()),
            ConfigSource::Default => {}
            ConfigSource::Fallback(reason) => warn!("Config load failed, using defaults: {reason}"),
        }
    }
}

/// An explicit path must load; the default path falls back to defaults.
pub fn load_config(
    path: Option<&Path>,
) -> Result<(RoomkeeperConfig, ConfigSource), RoomkeeperError> {
    match path {
        Some(path) => Ok((
            roomkeeper_config::load_config_from(path)?,
            ConfigSource::Override(path.to_path_buf()),
        )),
        None => Ok(match roomkeeper_config::load_config() {
            Ok(config) => (config, ConfigSource::Default),
            Err(e) => (RoomkeeperConfig::default(), ConfigSource::Fallback(e.to_string())),
        }),
    }
}

/// Memberships are keyed by participant id, so an unconfigured id is
/// generated once and kept in the data directory.
pub fn resolve_participant(
    config: &ParticipantConfig,
    data_dir: Option<&Path>,
) -> Result<Participant, RoomkeeperError> {
    if !config.id.trim().is_empty() {
        return Ok(Participant::from_config(config));
    }
    let Some(data_dir) = data_dir else {
        return Ok(Participant::from_config(config));
    };

    let path = data_dir.join(PARTICIPANT_ID_FILE);
    let stored = match std::fs::read_to_string(&path) {
        Ok(id) => Some(id.trim().to_string()).filter(|id| !id.is_empty()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(e.into()),
    };

    let mut participant = Participant::from_config(config);
    match stored {
        Some(id) => participant.id = id,
        None => {
            std::fs::create_dir_all(data_dir)?;
            std::fs::write(&path, &participant.id)?;
            info!(participant = %participant.id, "Generated participant id");
        }
    }
    Ok(participant)
}

pub fn database_path(config: &MembershipConfig, data_dir: &Path) -> PathBuf {
    config
        .database_path
        .clone()
        .unwrap_or_else(|| data_dir.join(DATABASE_FILE))
}

pub fn open_persistence(
    config: &MembershipConfig,
    ephemeral: bool,
    data_dir: Option<&Path>,
) -> Result<Arc<dyn RoomPersistence>, RoomkeeperError> {
    if ephemeral || config.ephemeral {
        info!("Room list kept in memory only");
        return Ok(Arc::new(MemoryPersistence::new()));
    }
    let data_dir = data_dir
        .ok_or_else(|| RoomkeeperError::Other("no data directory for the room database".into()))?;
    let path = database_path(config, data_dir);
    info!(path = %path.display(), "Opening room database");
    Ok(Arc::new(SqlitePersistence::open(&path)?))
}
