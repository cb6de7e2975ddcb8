use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use roomkeeper_common::{AudioError, Dispatcher};
use roomkeeper_config::schema::AudioConfig;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::devices::{AudioDevices, AudioEncoder, PcmEncoder, PlaybackStream};
use super::speakers::SpeakerMap;
use super::stream::OutboundAudioStream;
use super::vad::{EnergyVad, Segment, VoiceSegmenter};
use crate::conversation::{ActionMessage, ConversationState};
use crate::participant::Participant;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum AudioEvent {
    StreamOpened {
        participant_id: String,
        stream_id: String,
    },
    StreamClosed {
        participant_id: String,
        stream_id: String,
    },
    SpeakingChanged {
        participant_id: String,
        speaking: bool,
    },
    /// Any remote participant audible. Capture is paused while true.
    PlayingChanged(bool),
    LocalSpeakingChanged(bool),
    UtteranceSent {
        stream_id: String,
        bytes: usize,
    },
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

struct InboundStream {
    participant_id: String,
    sink: Option<Box<dyn PlaybackStream>>,
}

/// Inbound streams and speaker flags under a single lock.
#[derive(Default)]
struct InboundState {
    streams: HashMap<String, InboundStream>,
    speakers: SpeakerMap,
}

struct CaptureControl {
    paused: watch::Sender<bool>,
    cancel: CancellationToken,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Audio for one room session.
pub struct AudioPipeline {
    participant: Participant,
    conversation: Arc<ConversationState>,
    devices: AudioDevices,
    config: AudioConfig,
    encoder: Arc<dyn AudioEncoder>,
    state: Mutex<InboundState>,
    capture: StdMutex<Option<CaptureControl>>,
    cancel: CancellationToken,
    events: Dispatcher<AudioEvent>,
}

impl AudioPipeline {
    /// `cancel` closes the pipeline, including any running capture.
    pub fn new(
        participant: Participant,
        conversation: Arc<ConversationState>,
        devices: AudioDevices,
        config: AudioConfig,
        cancel: CancellationToken,
    ) -> Self {
        let encoder = devices
            .encoder
            .clone()
            .unwrap_or_else(|| Arc::new(PcmEncoder::new(config.media_type.clone())));
        Self {
            participant,
            conversation,
            devices,
            config,
            encoder,
            state: Mutex::new(InboundState::default()),
            capture: StdMutex::new(None),
            cancel,
            events: Dispatcher::new("audio"),
        }
    }

    pub fn events(&self) -> &Dispatcher<AudioEvent> {
        &self.events
    }

    fn capture_slot(&self) -> MutexGuard<'_, Option<CaptureControl>> {
        self.capture
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // -- inbound --

    /// A remote participant started a stream.
    pub async fn handle_audio_start(&self, participant_id: &str, stream_id: &str, media_type: &str) {
        let sink = match &self.devices.playback {
            Some(playback) => match playback.open(participant_id, stream_id, media_type).await {
                Ok(sink) => Some(sink),
                Err(e) => {
                    warn!(stream_id, error = %e, "Failed to open playback, audio will be dropped");
                    None
                }
            },
            None => None,
        };

        let (replaced, started_speaking, playing) = {
            let mut state = self.state.lock().await;
            let replaced = state.streams.insert(
                stream_id.to_string(),
                InboundStream {
                    participant_id: participant_id.to_string(),
                    sink,
                },
            );
            let was_speaking = state.speakers.is_speaking(participant_id);
            let playing = state.speakers.set(participant_id, true);
            (replaced, !was_speaking, playing)
        };

        if let Some(sink) = replaced.and_then(|old| old.sink) {
            sink.close().await;
        }
        debug!(participant_id, stream_id, media_type, "Inbound audio stream opened");

        self.events
            .emit(AudioEvent::StreamOpened {
                participant_id: participant_id.to_string(),
                stream_id: stream_id.to_string(),
            })
            .await;
        if started_speaking {
            self.events
                .emit(AudioEvent::SpeakingChanged {
                    participant_id: participant_id.to_string(),
                    speaking: true,
                })
                .await;
        }
        if let Some(playing) = playing {
            self.playing_changed(playing).await;
        }
    }

    /// Data for an open stream. Data for an unknown stream is dropped.
    pub async fn handle_audio(&self, stream_id: &str, data: &[u8]) {
        let mut state = self.state.lock().await;
        let Some(stream) = state.streams.get_mut(stream_id) else {
            warn!(stream_id, bytes = data.len(), "Dropping audio for unknown stream");
            return;
        };
        if let Some(sink) = stream.sink.as_mut() {
            if let Err(e) = sink.write(data).await {
                warn!(stream_id, error = %e, "Playback write failed");
            }
        }
    }

    pub async fn handle_audio_end(&self, stream_id: &str) {
        let (stream, stopped_speaking, playing) = {
            let mut state = self.state.lock().await;
            let Some(stream) = state.streams.remove(stream_id) else {
                warn!(stream_id, "Audio end for unknown stream");
                return;
            };
            let pid = stream.participant_id.as_str();
            if state.streams.values().any(|s| s.participant_id == pid) {
                (stream, false, None)
            } else {
                let was_speaking = state.speakers.is_speaking(pid);
                let playing = state.speakers.set(pid, false);
                (stream, was_speaking, playing)
            }
        };
        self.finish_stream(stream_id, stream, stopped_speaking).await;
        if let Some(playing) = playing {
            self.playing_changed(playing).await;
        }
    }

    /// Close every stream of a participant that left the room.
    pub async fn drop_participant(&self, participant_id: &str) {
        let (streams, was_speaking, playing) = {
            let mut state = self.state.lock().await;
            let ids: Vec<String> = state
                .streams
                .iter()
                .filter(|(_, s)| s.participant_id == participant_id)
                .map(|(id, _)| id.clone())
                .collect();
            let streams: Vec<(String, InboundStream)> = ids
                .into_iter()
                .filter_map(|id| state.streams.remove(&id).map(|s| (id, s)))
                .collect();
            let was_speaking = state.speakers.is_speaking(participant_id);
            let playing = state.speakers.remove(participant_id);
            (streams, was_speaking, playing)
        };

        if !streams.is_empty() {
            debug!(participant_id, count = streams.len(), "Closing dangling audio streams");
        }
        let last = streams.len().saturating_sub(1);
        for (i, (stream_id, stream)) in streams.into_iter().enumerate() {
            self.finish_stream(&stream_id, stream, was_speaking && i == last)
                .await;
        }
        if let Some(playing) = playing {
            self.playing_changed(playing).await;
        }
    }

    async fn finish_stream(&self, stream_id: &str, stream: InboundStream, stopped_speaking: bool) {
        if let Some(sink) = stream.sink {
            sink.close().await;
        }
        debug!(participant_id = %stream.participant_id, stream_id, "Inbound audio stream closed");
        self.events
            .emit(AudioEvent::StreamClosed {
                participant_id: stream.participant_id.clone(),
                stream_id: stream_id.to_string(),
            })
            .await;
        if stopped_speaking {
            self.events
                .emit(AudioEvent::SpeakingChanged {
                    participant_id: stream.participant_id,
                    speaking: false,
                })
                .await;
        }
    }

    async fn playing_changed(&self, playing: bool) {
        if let Some(capture) = self.capture_slot().as_ref() {
            capture.paused.send_replace(playing);
        }
        debug!(playing, "Remote playback changed");
        self.events.emit(AudioEvent::PlayingChanged(playing)).await;
    }

    pub async fn is_playing(&self) -> bool {
        self.state.lock().await.speakers.is_playing()
    }

    pub async fn is_speaking(&self, participant_id: &str) -> bool {
        self.state.lock().await.speakers.is_speaking(participant_id)
    }

    pub async fn has_stream(&self, stream_id: &str) -> bool {
        self.state.lock().await.streams.contains_key(stream_id)
    }

    pub async fn stream_count(&self) -> usize {
        self.state.lock().await.streams.len()
    }

    pub async fn local_speaking(&self) -> bool {
        self.state.lock().await.speakers.local_speaking()
    }

    // -- outbound --

    /// Open the capture device and start segmenting. Returns `false` when
    /// audio is disabled or there is no capture device.
    pub async fn start_capture(self: &Arc<Self>) -> Result<bool, AudioError> {
        if !self.config.enabled || self.cancel.is_cancelled() {
            return Ok(false);
        }
        let Some(device) = self.devices.capture.clone() else {
            return Ok(false);
        };
        if self.is_capturing() {
            return Ok(true);
        }

        let blocks = device
            .open(self.config.sample_rate, self.config.block_size())
            .await?;
        let playing = self.is_playing().await;
        let (paused_tx, paused_rx) = watch::channel(playing);
        let cancel = self.cancel.child_token();
        {
            let mut slot = self.capture_slot();
            if slot.is_some() {
                return Ok(true);
            }
            *slot = Some(CaptureControl {
                paused: paused_tx,
                cancel: cancel.clone(),
            });
        }

        info!(
            room = %self.conversation.key(),
            sample_rate = self.config.sample_rate,
            block_size = self.config.block_size(),
            "Audio capture started"
        );
        tokio::spawn(Arc::clone(self).run_capture(blocks, paused_rx, cancel));
        Ok(true)
    }

    pub fn stop_capture(&self) {
        if let Some(capture) = self.capture_slot().take() {
            capture.cancel.cancel();
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.capture_slot().is_some()
    }

    pub fn is_capture_paused(&self) -> bool {
        self.capture_slot()
            .as_ref()
            .is_some_and(|c| *c.paused.borrow())
    }

    async fn run_capture(
        self: Arc<Self>,
        mut blocks: mpsc::Receiver<Vec<f32>>,
        mut paused: watch::Receiver<bool>,
        cancel: CancellationToken,
    ) {
        let threshold = self.config.vad.energy_threshold as f32;
        let mut segmenter = VoiceSegmenter::new(EnergyVad::new(threshold));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = paused.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if *paused.borrow_and_update() {
                        segmenter.reset();
                        self.set_local_speaking(false).await;
                        debug!("Capture paused");
                    } else {
                        debug!("Capture resumed");
                    }
                }
                block = blocks.recv() => {
                    let Some(block) = block else {
                        debug!("Capture device closed");
                        break;
                    };
                    if *paused.borrow() {
                        continue;
                    }
                    match segmenter.push(block) {
                        Some(Segment::VoiceStart) => self.set_local_speaking(true).await,
                        Some(Segment::Utterance(buffers)) => {
                            self.send_utterance(buffers).await;
                            self.set_local_speaking(false).await;
                        }
                        None => {}
                    }
                }
            }
        }

        self.set_local_speaking(false).await;
        cancel.cancel();
        {
            let mut slot = self.capture_slot();
            if slot.as_ref().is_some_and(|c| c.cancel.is_cancelled()) {
                *slot = None;
            }
        }
        info!(room = %self.conversation.key(), "Audio capture stopped");
    }

    async fn set_local_speaking(&self, speaking: bool) {
        let changed = self.state.lock().await.speakers.set_local(speaking);
        if changed {
            self.events
                .emit(AudioEvent::LocalSpeakingChanged(speaking))
                .await;
        }
    }

    async fn send_utterance(&self, buffers: Vec<Vec<f32>>) {
        let data = match self.encoder.encode(&buffers, self.config.sample_rate).await {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, "Failed to encode utterance");
                return;
            }
        };
        let bytes = data.len();

        let transcript = match &self.devices.transcriber {
            Some(transcriber) => match transcriber.transcribe(&data, self.encoder.media_type()).await {
                Ok(text) => Some(text),
                Err(e) => {
                    warn!(error = %e, "Transcription failed");
                    None
                }
            },
            None => None,
        };

        let stream = OutboundAudioStream::from_bytes(self.encoder.media_type(), data);
        let stream_id = stream.id.clone();
        self.conversation.add_audio_stream(stream).await;
        debug!(stream_id = %stream_id, bytes, "Utterance sent");
        self.events
            .emit(AudioEvent::UtteranceSent { stream_id, bytes })
            .await;

        if let Some(text) = transcript.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            let message = ActionMessage::new(
                self.participant.id.as_str(),
                self.participant.name.as_str(),
                "say",
                serde_json::json!({ "text": text }),
            );
            self.conversation.add_local_and_remote_message(message).await;
        }
    }

    /// Stop capture and close every inbound sink.
    pub async fn close(&self) {
        self.cancel.cancel();
        self.stop_capture();
        let streams: Vec<InboundStream> = {
            let mut state = self.state.lock().await;
            state.speakers.clear();
            state.speakers.set_local(false);
            state.streams.drain().map(|(_, s)| s).collect()
        };
        for sink in streams.into_iter().filter_map(|s| s.sink) {
            sink.close().await;
        }
    }
}
