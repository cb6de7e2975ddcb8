//! Audio pipeline configuration types.

use serde::{Deserialize, Serialize};

/// Voice-activity detection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// RMS energy above which a block counts as speech (valid range: 0.0-1.0).
    pub energy_threshold: f64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.02,
        }
    }
}

/// Bidirectional audio configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub enabled: bool,
    pub sample_rate: u32,
    /// Capture block length in milliseconds.
    pub block_ms: u32,
    /// Media type declared on outbound streams.
    pub media_type: String,
    pub vad: VadConfig,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sample_rate: 48000,
            block_ms: 500,
            media_type: "audio/pcm-f32".into(),
            vad: VadConfig::default(),
        }
    }
}

impl AudioConfig {
    /// Samples per capture block.
    pub fn block_size(&self) -> usize {
        (self.sample_rate as usize * self.block_ms as usize) / 1000
    }
}
