//! Configuration schema types for Roomkeeper.
//!
//! All structs use `serde(default)` so partial configs work correctly.

mod audio;
mod participant;
mod rooms;
mod system;

pub use audio::*;
pub use participant::*;
pub use rooms::*;
pub use system::*;

use serde::{Deserialize, Serialize};

/// Current config schema version.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Root configuration for Roomkeeper.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomkeeperConfig {
    pub participant: ParticipantConfig,
    pub membership: MembershipConfig,
    pub conversation: ConversationConfig,
    pub audio: AudioConfig,
    pub transport: TransportConfig,
    pub manager: ManagerConfig,
    pub logging: LoggingConfig,
}
