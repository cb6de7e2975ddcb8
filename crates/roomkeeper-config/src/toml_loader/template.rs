//! Default TOML config template with inline documentation comments.

/// Generate the default TOML config content with comments.
pub(crate) fn default_config_toml() -> String {
    r##"# Roomkeeper Configuration
# Schema version 1
# Only override what you want to change -- missing fields use defaults.

[participant]
# id = ""                 # empty: generated at startup
# name = "roomkeeper"
# preview_url = "https://example.com/avatar.png"
# capabilities = ["agent"]

[membership]
# database_path = "/var/lib/roomkeeper/rooms.db"
# ephemeral = false

[conversation]
# history_limit = 50      # 1-10000

[audio]
# enabled = false
# sample_rate = 48000     # 8000-96000
# block_ms = 500          # 10-2000
# media_type = "audio/pcm-f32"

[audio.vad]
# energy_threshold = 0.02 # 0.0-1.0

[transport]
# connect_timeout_secs = 15     # 1-120
# heartbeat_interval_secs = 25  # 1-300

[manager]
# keepalive_interval_secs = 10  # 1-3600

[logging]
# level = "info"          # trace, debug, info, warn, error
"##
    .to_string()
}
