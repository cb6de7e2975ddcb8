//! Per-room bidirectional audio.
//!
//! Outbound: capture blocks run through voice-activity segmentation, each
//! finished utterance is encoded and handed to the conversation as an
//! [`OutboundAudioStream`]. Inbound: every remote stream gets its own
//! playback sink, and the [`SpeakerMap`] pauses capture while anyone remote
//! is audible. Device, codec and transcription access are traits; the
//! pipeline only orchestrates.

mod devices;
mod pipeline;
mod speakers;
mod stream;
mod vad;

#[cfg(test)]
mod tests;

pub use devices::{
    AudioDevices, AudioEncoder, CaptureDevice, PcmEncoder, PlaybackFactory, PlaybackStream,
    Transcriber,
};
pub use pipeline::{AudioEvent, AudioPipeline};
pub use speakers::SpeakerMap;
pub use stream::OutboundAudioStream;
pub use vad::{EnergyVad, Segment, VoiceActivityDetector, VoiceSegmenter};
