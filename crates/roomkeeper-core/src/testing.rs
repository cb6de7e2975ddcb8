//! In-memory collaborators for tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use roomkeeper_common::{AudioError, TransportError};
use tokio::sync::mpsc;

use crate::audio::{CaptureDevice, PlaybackFactory, PlaybackStream, Transcriber};
use crate::conversation::ActionMessage;
use crate::membership::RoomSpec;
use crate::participant::{Participant, PresenceRecord};
use crate::session::{Transport, TransportConnection, TransportEvent, TransportHandle};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Poll `check` until it holds or a second passes.
pub(crate) async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Something a session sent over the fake transport.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Sent {
    PlayerSpec(PresenceRecord),
    Chat(ActionMessage),
    AudioStart { stream_id: String, media_type: String },
    Audio { stream_id: String, data: Vec<u8> },
    AudioEnd { stream_id: String },
    Disconnect,
}

type SentLog = Arc<Mutex<Vec<(String, Sent)>>>;

struct Live {
    events: mpsc::Sender<TransportEvent>,
    handle: Arc<FakeHandle>,
}

#[derive(Default)]
struct FakeState {
    connects: HashMap<String, usize>,
    fail_next: HashSet<String>,
    live: HashMap<String, Live>,
}

/// Transport whose rooms are driven by the test.
#[derive(Default)]
pub(crate) struct FakeTransport {
    state: Mutex<FakeState>,
    sent: SentLog,
    connect_delay: Mutex<Option<Duration>>,
}

impl FakeTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn connect_count(&self, key: &str) -> usize {
        lock(&self.state).connects.get(key).copied().unwrap_or(0)
    }

    pub(crate) fn total_connects(&self) -> usize {
        lock(&self.state).connects.values().sum()
    }

    pub(crate) fn fail_next_connect(&self, key: &str) {
        lock(&self.state).fail_next.insert(key.to_string());
    }

    pub(crate) fn set_connect_delay(&self, delay: Duration) {
        *lock(&self.connect_delay) = Some(delay);
    }

    pub(crate) fn is_connected(&self, key: &str) -> bool {
        lock(&self.state)
            .live
            .get(key)
            .is_some_and(|live| live.handle.is_connected())
    }

    /// Deliver an inbound event to the latest connection for `key`.
    pub(crate) async fn inject(&self, key: &str, event: TransportEvent) {
        let sender = lock(&self.state).live.get(key).map(|l| l.events.clone());
        if let Some(sender) = sender {
            let _ = sender.send(event).await;
        }
    }

    /// Simulate the server dropping the room.
    pub(crate) async fn drop_connection(&self, key: &str) {
        let live = lock(&self.state).live.remove(key);
        if let Some(live) = live {
            live.handle.connected.store(false, Ordering::SeqCst);
            let _ = live
                .events
                .send(TransportEvent::Disconnected {
                    reason: Some("server closed".into()),
                })
                .await;
        }
    }

    pub(crate) fn sent(&self, key: &str) -> Vec<Sent> {
        lock(&self.sent)
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, s)| s.clone())
            .collect()
    }

    pub(crate) fn sent_chats(&self, key: &str) -> Vec<ActionMessage> {
        self.sent(key)
            .into_iter()
            .filter_map(|s| match s {
                Sent::Chat(m) => Some(m),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(
        &self,
        spec: &RoomSpec,
        _participant: &Participant,
    ) -> Result<TransportConnection, TransportError> {
        let key = spec.key();
        let delay = *lock(&self.connect_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = lock(&self.state);
        *state.connects.entry(key.clone()).or_default() += 1;
        if state.fail_next.remove(&key) {
            return Err(TransportError::Connect(format!("{key} refused")));
        }

        let (events_tx, events_rx) = mpsc::channel(64);
        let handle = Arc::new(FakeHandle {
            key: key.clone(),
            connected: AtomicBool::new(true),
            sent: Arc::clone(&self.sent),
        });
        state.live.insert(
            key,
            Live {
                events: events_tx,
                handle: Arc::clone(&handle),
            },
        );
        Ok(TransportConnection {
            handle,
            events: events_rx,
        })
    }
}

pub(crate) struct FakeHandle {
    key: String,
    connected: AtomicBool,
    sent: SentLog,
}

impl FakeHandle {
    fn record(&self, sent: Sent) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Closed);
        }
        lock(&self.sent).push((self.key.clone(), sent));
        Ok(())
    }
}

#[async_trait]
impl TransportHandle for FakeHandle {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn set_local_player(&self, record: &PresenceRecord) -> Result<(), TransportError> {
        self.record(Sent::PlayerSpec(record.clone()))
    }

    async fn send_chat_message(&self, message: &ActionMessage) -> Result<(), TransportError> {
        self.record(Sent::Chat(message.clone()))
    }

    async fn add_audio_source(&self, stream_id: &str, media_type: &str) -> Result<(), TransportError> {
        self.record(Sent::AudioStart {
            stream_id: stream_id.to_string(),
            media_type: media_type.to_string(),
        })
    }

    async fn send_audio(&self, stream_id: &str, data: &[u8]) -> Result<(), TransportError> {
        self.record(Sent::Audio {
            stream_id: stream_id.to_string(),
            data: data.to_vec(),
        })
    }

    async fn remove_audio_source(&self, stream_id: &str) -> Result<(), TransportError> {
        self.record(Sent::AudioEnd {
            stream_id: stream_id.to_string(),
        })
    }

    async fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            lock(&self.sent).push((self.key.clone(), Sent::Disconnect));
        }
    }
}

// ---------------------------------------------------------------------------
// Audio
// ---------------------------------------------------------------------------

/// Capture device fed by the test through the returned sender.
pub(crate) struct FakeCapture {
    blocks: Mutex<Option<mpsc::Receiver<Vec<f32>>>>,
}

impl FakeCapture {
    pub(crate) fn new() -> (Arc<Self>, mpsc::Sender<Vec<f32>>) {
        let (tx, rx) = mpsc::channel(64);
        let capture = Arc::new(Self {
            blocks: Mutex::new(Some(rx)),
        });
        (capture, tx)
    }
}

#[async_trait]
impl CaptureDevice for FakeCapture {
    async fn open(
        &self,
        _sample_rate: u32,
        _block_size: usize,
    ) -> Result<mpsc::Receiver<Vec<f32>>, AudioError> {
        lock(&self.blocks)
            .take()
            .ok_or_else(|| AudioError::Device("capture already open".into()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PlaybackOp {
    Open(String),
    Write(String, usize),
    Close(String),
}

/// Playback that records what it was asked to do.
#[derive(Default)]
pub(crate) struct RecordingPlayback {
    ops: Arc<Mutex<Vec<PlaybackOp>>>,
}

impl RecordingPlayback {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn ops(&self) -> Vec<PlaybackOp> {
        lock(&self.ops).clone()
    }
}

#[async_trait]
impl PlaybackFactory for RecordingPlayback {
    async fn open(
        &self,
        _participant_id: &str,
        stream_id: &str,
        _media_type: &str,
    ) -> Result<Box<dyn PlaybackStream>, AudioError> {
        lock(&self.ops).push(PlaybackOp::Open(stream_id.to_string()));
        Ok(Box::new(RecordingSink {
            stream_id: stream_id.to_string(),
            ops: Arc::clone(&self.ops),
        }))
    }
}

struct RecordingSink {
    stream_id: String,
    ops: Arc<Mutex<Vec<PlaybackOp>>>,
}

#[async_trait]
impl PlaybackStream for RecordingSink {
    async fn write(&mut self, data: &[u8]) -> Result<(), AudioError> {
        lock(&self.ops).push(PlaybackOp::Write(self.stream_id.clone(), data.len()));
        Ok(())
    }

    async fn close(self: Box<Self>) {
        lock(&self.ops).push(PlaybackOp::Close(self.stream_id.clone()));
    }
}

pub(crate) struct FixedTranscriber(pub(crate) &'static str);

#[async_trait]
impl Transcriber for FixedTranscriber {
    async fn transcribe(&self, _audio: &[u8], _media_type: &str) -> Result<String, AudioError> {
        Ok(self.0.to_string())
    }
}
