//! Full configuration validation.
//!
//! Each check pushes a message; all failures are reported together in a
//! single `ConfigError`.

mod helpers;


use crate::schema::RoomkeeperConfig;
use roomkeeper_common::ConfigError;

use helpers::validate_range;

/// Run all validations on a config, collecting all errors.
pub fn validate(config: &RoomkeeperConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    validate_range(
        &mut errors,
        "conversation.history_limit",
        config.conversation.history_limit,
        1,
        10_000,
    );
    validate_range(
        &mut errors,
        "audio.sample_rate",
        config.audio.sample_rate,
        8_000,
        96_000,
    );
    validate_range(&mut errors, "audio.block_ms", config.audio.block_ms, 10, 2_000);
    validate_range(
        &mut errors,
        "audio.vad.energy_threshold",
        config.audio.vad.energy_threshold,
        0.0,
        1.0,
    );
    if config.audio.media_type.trim().is_empty() {
        errors.push("audio.media_type must not be empty".into());
    }
    validate_range(
        &mut errors,
        "transport.connect_timeout_secs",
        config.transport.connect_timeout_secs,
        1,
        120,
    );
    validate_range(
        &mut errors,
        "transport.heartbeat_interval_secs",
        config.transport.heartbeat_interval_secs,
        1,
        300,
    );
    validate_range(
        &mut errors,
        "manager.keepalive_interval_secs",
        config.manager.keepalive_interval_secs,
        1,
        3_600,
    );
    if config.participant.name.trim().is_empty() {
        errors.push("participant.name must not be empty".into());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}
