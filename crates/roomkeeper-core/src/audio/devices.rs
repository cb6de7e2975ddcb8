//! Collaborator interfaces for audio hardware, codecs and transcription.

use std::sync::Arc;

use async_trait::async_trait;
use roomkeeper_common::AudioError;
use tokio::sync::mpsc;

/// A microphone-like source of fixed-size sample blocks.
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Start capturing. Blocks arrive on the receiver until it is dropped.
    async fn open(
        &self,
        sample_rate: u32,
        block_size: usize,
    ) -> Result<mpsc::Receiver<Vec<f32>>, AudioError>;
}

#[async_trait]
pub trait AudioEncoder: Send + Sync {
    fn media_type(&self) -> &str;

    async fn encode(&self, blocks: &[Vec<f32>], sample_rate: u32) -> Result<Vec<u8>, AudioError>;
}

/// Opens a decode-and-play sink for one inbound stream.
#[async_trait]
pub trait PlaybackFactory: Send + Sync {
    async fn open(
        &self,
        participant_id: &str,
        stream_id: &str,
        media_type: &str,
    ) -> Result<Box<dyn PlaybackStream>, AudioError>;
}

#[async_trait]
pub trait PlaybackStream: Send {
    async fn write(&mut self, data: &[u8]) -> Result<(), AudioError>;

    async fn close(self: Box<Self>);
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &[u8], media_type: &str) -> Result<String, AudioError>;
}

/// Little-endian f32 PCM, no container.
#[derive(Debug, Clone)]
pub struct PcmEncoder {
    media_type: String,
}

impl PcmEncoder {
    pub fn new(media_type: impl Into<String>) -> Self {
        Self {
            media_type: media_type.into(),
        }
    }
}

#[async_trait]
impl AudioEncoder for PcmEncoder {
    fn media_type(&self) -> &str {
        &self.media_type
    }

    async fn encode(&self, blocks: &[Vec<f32>], _sample_rate: u32) -> Result<Vec<u8>, AudioError> {
        let samples: usize = blocks.iter().map(Vec::len).sum();
        let mut out = Vec::with_capacity(samples * 4);
        for sample in blocks.iter().flatten() {
            out.extend_from_slice(&sample.to_le_bytes());
        }
        Ok(out)
    }
}

/// The audio collaborators available to a pipeline. Anything left `None`
/// disables that half: no capture device means no outbound audio, no
/// playback factory means inbound audio is tracked but not played.
#[derive(Clone, Default)]
pub struct AudioDevices {
    pub capture: Option<Arc<dyn CaptureDevice>>,
    pub encoder: Option<Arc<dyn AudioEncoder>>,
    pub playback: Option<Arc<dyn PlaybackFactory>>,
    pub transcriber: Option<Arc<dyn Transcriber>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pcm_encoder_concatenates_blocks() {
        let encoder = PcmEncoder::new("audio/pcm-f32");
        let bytes = encoder
            .encode(&[vec![1.0, -1.0], vec![0.5]], 48_000)
            .await
            .unwrap();
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[0..4], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[8..12], &0.5f32.to_le_bytes());
        assert_eq!(encoder.media_type(), "audio/pcm-f32");
    }
}
