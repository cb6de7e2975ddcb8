use std::time::Duration;

use roomkeeper_config::schema::AudioConfig;
use roomkeeper_config::RoomkeeperConfig;

use crate::conversation::DEFAULT_HISTORY_LIMIT;

#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub history_limit: usize,
    pub audio: AudioConfig,
    pub keepalive_interval: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            audio: AudioConfig::default(),
            keepalive_interval: Duration::from_secs(10),
        }
    }
}

impl From<&RoomkeeperConfig> for ManagerOptions {
    fn from(config: &RoomkeeperConfig) -> Self {
        Self {
            history_limit: config.conversation.history_limit as usize,
            audio: config.audio.clone(),
            keepalive_interval: Duration::from_secs(
                config.manager.keepalive_interval_secs as u64,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config() {
        let mut config = RoomkeeperConfig::default();
        config.conversation.history_limit = 20;
        config.manager.keepalive_interval_secs = 3;
        let options = ManagerOptions::from(&config);
        assert_eq!(options.history_limit, 20);
        assert_eq!(options.keepalive_interval, Duration::from_secs(3));
        assert!(!options.audio.enabled);
    }
}
