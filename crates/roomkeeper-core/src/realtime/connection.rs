//! WebSocket room connection: handshake, heartbeat, command forwarder and
//! reader tasks. Reconnecting is left to the caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use roomkeeper_common::TransportError;
use roomkeeper_config::schema::TransportConfig;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::protocol::{frame_to_events, Frame};
use crate::conversation::ActionMessage;
use crate::membership::RoomSpec;
use crate::participant::{Participant, PresenceRecord};
use crate::session::{Transport, TransportConnection, TransportEvent, TransportHandle};

const EVENT_CAPACITY: usize = 256;
const COMMAND_CAPACITY: usize = 64;

/// [`Transport`] over a JSON-framed WebSocket per room.
#[derive(Debug, Clone)]
pub struct WsTransport {
    connect_timeout: Duration,
    heartbeat_interval: Duration,
}

impl WsTransport {
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            connect_timeout: Duration::from_secs(u64::from(config.connect_timeout_secs)),
            heartbeat_interval: Duration::from_secs(u64::from(config.heartbeat_interval_secs)),
        }
    }

    pub fn with_intervals(connect_timeout: Duration, heartbeat_interval: Duration) -> Self {
        Self {
            connect_timeout,
            heartbeat_interval,
        }
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new(&TransportConfig::default())
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(
        &self,
        spec: &RoomSpec,
        participant: &Participant,
    ) -> Result<TransportConnection, TransportError> {
        info!(room = %spec, "Connecting to room endpoint");

        let handshake = handshake(spec, participant);
        let (ws, welcome) = tokio::time::timeout(self.connect_timeout, handshake)
            .await
            .map_err(|_| {
                TransportError::Connect(format!(
                    "timed out after {}ms",
                    self.connect_timeout.as_millis()
                ))
            })??;
        let initial = frame_to_events(welcome)?;

        let shared = Arc::new(Shared::default());
        shared.connected.store(true, Ordering::SeqCst);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);

        let (ws_write, ws_read) = ws.split();
        let ws_write = Arc::new(Mutex::new(ws_write));

        tokio::spawn(heartbeat_task(
            Arc::clone(&ws_write),
            self.heartbeat_interval,
            shared.cancel.clone(),
        ));
        tokio::spawn(command_forwarder(
            command_rx,
            ws_write,
            shared.cancel.clone(),
        ));
        tokio::spawn(reader_task(
            ws_read,
            initial,
            event_tx,
            Arc::clone(&shared),
            spec.key(),
        ));

        info!(room = %spec, "Room connected");
        Ok(TransportConnection {
            handle: Arc::new(WsHandle {
                commands: command_tx,
                shared,
            }),
            events: event_rx,
        })
    }
}

type Socket = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Open the socket, say hello and wait for the welcome.
async fn handshake(
    spec: &RoomSpec,
    participant: &Participant,
) -> Result<(Socket, Frame), TransportError> {
    let (mut ws, _) = tokio_tungstenite::connect_async(spec.endpoint_url.as_str())
        .await
        .map_err(|e| TransportError::Connect(e.to_string()))?;

    let hello = Frame::Hello {
        room: spec.room.clone(),
        participant_id: participant.id.clone(),
    };
    ws.send(WsMessage::Text(hello.to_json()?.into()))
        .await
        .map_err(|e| TransportError::Connect(e.to_string()))?;

    while let Some(msg) = ws.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => match Frame::from_json(&text)? {
                welcome @ Frame::Welcome { .. } => return Ok((ws, welcome)),
                Frame::Error { message } => return Err(TransportError::Connect(message)),
                other => debug!(frame = ?other, "Frame before welcome ignored"),
            },
            Ok(WsMessage::Close(_)) => break,
            Err(e) => return Err(TransportError::Connect(e.to_string())),
            _ => {}
        }
    }
    Err(TransportError::Connect(
        "endpoint closed during handshake".to_string(),
    ))
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Shared {
    connected: AtomicBool,
    /// Set once we asked to leave; the reader then stays quiet.
    closing: AtomicBool,
    cancel: CancellationToken,
}

enum Command {
    Send {
        frame: Frame,
        reply: oneshot::Sender<Result<(), TransportError>>,
    },
    Disconnect {
        done: oneshot::Sender<()>,
    },
}

struct WsHandle {
    commands: mpsc::Sender<Command>,
    shared: Arc<Shared>,
}

impl WsHandle {
    async fn send_frame(&self, frame: Frame) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Closed);
        }
        let (reply, result) = oneshot::channel();
        self.commands
            .send(Command::Send { frame, reply })
            .await
            .map_err(|_| TransportError::Closed)?;
        result.await.map_err(|_| TransportError::Closed)?
    }
}

#[async_trait]
impl TransportHandle for WsHandle {
    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    async fn set_local_player(&self, record: &PresenceRecord) -> Result<(), TransportError> {
        self.send_frame(Frame::PlayerSpec {
            spec: record.clone(),
        })
        .await
    }

    async fn send_chat_message(&self, message: &ActionMessage) -> Result<(), TransportError> {
        self.send_frame(Frame::Chat {
            from: None,
            message: message.clone(),
        })
        .await
    }

    async fn add_audio_source(&self, stream_id: &str, media_type: &str) -> Result<(), TransportError> {
        self.send_frame(Frame::AudioStart {
            from: None,
            stream_id: stream_id.to_string(),
            media_type: media_type.to_string(),
        })
        .await
    }

    async fn send_audio(&self, stream_id: &str, data: &[u8]) -> Result<(), TransportError> {
        self.send_frame(Frame::audio(stream_id, data)).await
    }

    async fn remove_audio_source(&self, stream_id: &str) -> Result<(), TransportError> {
        self.send_frame(Frame::AudioEnd {
            from: None,
            stream_id: stream_id.to_string(),
        })
        .await
    }

    async fn disconnect(&self) {
        if self.shared.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.connected.store(false, Ordering::SeqCst);
        let (done, finished) = oneshot::channel();
        if self.commands.send(Command::Disconnect { done }).await.is_ok() {
            let _ = finished.await;
        }
        self.shared.cancel.cancel();
    }
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

async fn heartbeat_task<S>(ws_write: Arc<Mutex<S>>, period: Duration, cancel: CancellationToken)
where
    S: Sink<WsMessage> + Unpin,
{
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    let Ok(json) = Frame::Heartbeat.to_json() else {
        return;
    };
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let mut writer = ws_write.lock().await;
                if writer.send(WsMessage::Text(json.clone().into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Command Forwarder
// ---------------------------------------------------------------------------

async fn command_forwarder<S>(
    mut commands: mpsc::Receiver<Command>,
    ws_write: Arc<Mutex<S>>,
    cancel: CancellationToken,
) where
    S: Sink<WsMessage> + Unpin,
    S::Error: std::fmt::Display,
{
    loop {
        let cmd = tokio::select! {
            _ = cancel.cancelled() => break,
            cmd = commands.recv() => match cmd {
                Some(cmd) => cmd,
                None => break,
            },
        };
        match cmd {
            Command::Send { frame, reply } => {
                let result = match frame.to_json() {
                    Ok(json) => {
                        let mut writer = ws_write.lock().await;
                        writer
                            .send(WsMessage::Text(json.into()))
                            .await
                            .map_err(|e| TransportError::Protocol(e.to_string()))
                    }
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Command::Disconnect { done } => {
                let mut writer = ws_write.lock().await;
                if let Ok(json) = Frame::Leave.to_json() {
                    let _ = writer.send(WsMessage::Text(json.into())).await;
                }
                let _ = writer.send(WsMessage::Close(None)).await;
                let _ = done.send(());
                return;
            }
        }
    }

    // Remote side went away; fail whatever is still queued.
    commands.close();
    while let Some(cmd) = commands.recv().await {
        match cmd {
            Command::Send { reply, .. } => {
                let _ = reply.send(Err(TransportError::Closed));
            }
            Command::Disconnect { done } => {
                let _ = done.send(());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

async fn reader_task<St>(
    mut ws_read: St,
    initial: Vec<TransportEvent>,
    event_tx: mpsc::Sender<TransportEvent>,
    shared: Arc<Shared>,
    room: String,
) where
    St: Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    for event in initial {
        if event_tx.send(event).await.is_err() {
            shared.cancel.cancel();
            return;
        }
    }

    let reason = loop {
        let msg = tokio::select! {
            _ = shared.cancel.cancelled() => return,
            msg = ws_read.next() => msg,
        };
        match msg {
            Some(Ok(WsMessage::Text(text))) => {
                let events = match Frame::from_json(&text).and_then(frame_to_events) {
                    Ok(events) => events,
                    Err(e) => {
                        warn!(room = %room, error = %e, "Dropping bad frame");
                        continue;
                    }
                };
                for event in events {
                    if event_tx.send(event).await.is_err() {
                        debug!(room = %room, "Event receiver gone, stopping reader");
                        shared.cancel.cancel();
                        return;
                    }
                }
            }
            Some(Ok(WsMessage::Close(frame))) => {
                info!(room = %room, "Endpoint closed connection");
                break frame.map(|f| f.reason.to_string()).filter(|r| !r.is_empty());
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!(room = %room, error = %e, "WebSocket error");
                break Some(e.to_string());
            }
            None => break None,
        }
    };

    shared.connected.store(false, Ordering::SeqCst);
    shared.cancel.cancel();
    if !shared.closing.load(Ordering::SeqCst) {
        let _ = event_tx.send(TransportEvent::Disconnected { reason }).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Scene;
    use crate::realtime::protocol::Peer;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
    use tokio_tungstenite::accept_async;

    /// A single-client room endpoint. Frames the client sends show up on
    /// `received`; `Some(frame)` on `push` is sent to the client, `None`
    /// closes the socket.
    struct MockRoom {
        url: String,
        received: UnboundedReceiver<Frame>,
        push: UnboundedSender<Option<Frame>>,
    }

    async fn mock_room(welcome: Option<Frame>) -> MockRoom {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (received_tx, received) = mpsc::unbounded_channel();
        let (push, mut push_rx) = mpsc::unbounded_channel::<Option<Frame>>();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = accept_async(stream).await.unwrap();
            let (mut write, mut read) = ws.split();
            loop {
                tokio::select! {
                    msg = read.next() => match msg {
                        Some(Ok(WsMessage::Text(text))) => {
                            let frame = Frame::from_json(&text).unwrap();
                            if matches!(frame, Frame::Hello { .. }) {
                                let reply = welcome.clone().unwrap_or(Frame::Error {
                                    message: "room is full".into(),
                                });
                                write
                                    .send(WsMessage::Text(reply.to_json().unwrap().into()))
                                    .await
                                    .unwrap();
                            }
                            let _ = received_tx.send(frame);
                        }
                        Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                        Some(Ok(_)) => {}
                    },
                    cmd = push_rx.recv() => match cmd {
                        Some(Some(frame)) => {
                            write
                                .send(WsMessage::Text(frame.to_json().unwrap().into()))
                                .await
                                .unwrap();
                        }
                        _ => {
                            let _ = write.send(WsMessage::Close(None)).await;
                            break;
                        }
                    },
                }
            }
        });

        MockRoom {
            url,
            received,
            push,
        }
    }

    fn welcome() -> Frame {
        Frame::Welcome {
            participants: vec![Peer {
                participant_id: "ally".into(),
                player_spec: Some(serde_json::json!({"name": "Ally"})),
            }],
            scene: Some(Scene {
                name: "Tavern".into(),
                description: String::new(),
            }),
        }
    }

    fn transport() -> WsTransport {
        WsTransport::with_intervals(Duration::from_secs(2), Duration::from_secs(60))
    }

    async fn next_event(events: &mut mpsc::Receiver<TransportEvent>) -> Option<TransportEvent> {
        tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("timed out waiting for event")
    }

    async fn next_frame(room: &mut MockRoom) -> Frame {
        tokio::time::timeout(Duration::from_secs(2), room.received.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("server gone")
    }

    #[tokio::test]
    async fn handshake_delivers_roster_and_scene() {
        let mut room = mock_room(Some(welcome())).await;
        let spec = RoomSpec::new("lobby", &room.url);
        let me = Participant::generate("Bot");

        let mut conn = transport().connect(&spec, &me).await.unwrap();

        match next_frame(&mut room).await {
            Frame::Hello {
                room,
                participant_id,
            } => {
                assert_eq!(room, "lobby");
                assert_eq!(participant_id, me.id);
            }
            other => panic!("unexpected {other:?}"),
        }
        match next_event(&mut conn.events).await {
            Some(TransportEvent::PresenceJoin {
                participant_id,
                player_spec: Some(record),
            }) => {
                assert_eq!(participant_id, "ally");
                assert_eq!(record.name, "Ally");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            next_event(&mut conn.events).await,
            Some(TransportEvent::SceneChanged(Some(_)))
        ));
        assert!(conn.handle.is_connected());
    }

    #[tokio::test]
    async fn outbound_calls_become_frames() {
        let mut room = mock_room(Some(welcome())).await;
        let spec = RoomSpec::new("lobby", &room.url);
        let me = Participant::generate("Bot");
        let conn = transport().connect(&spec, &me).await.unwrap();
        let _hello = next_frame(&mut room).await;

        conn.handle.set_local_player(&me.to_presence()).await.unwrap();
        let msg = ActionMessage::new(&me.id, "Bot", "say", serde_json::json!({"text": "hi"}));
        conn.handle.send_chat_message(&msg).await.unwrap();
        conn.handle.add_audio_source("s1", "audio/pcm").await.unwrap();
        conn.handle.send_audio("s1", &[9, 9]).await.unwrap();
        conn.handle.remove_audio_source("s1").await.unwrap();

        assert!(matches!(next_frame(&mut room).await, Frame::PlayerSpec { spec } if spec.participant_id == me.id));
        assert!(matches!(next_frame(&mut room).await, Frame::Chat { from: None, message } if message == msg));
        assert!(matches!(next_frame(&mut room).await, Frame::AudioStart { stream_id, .. } if stream_id == "s1"));
        assert_eq!(next_frame(&mut room).await, Frame::audio("s1", &[9, 9]));
        assert!(matches!(next_frame(&mut room).await, Frame::AudioEnd { stream_id, .. } if stream_id == "s1"));
    }

    #[tokio::test]
    async fn relayed_frames_become_events() {
        let room = mock_room(Some(welcome())).await;
        let spec = RoomSpec::new("lobby", &room.url);
        let mut conn = transport()
            .connect(&spec, &Participant::generate("Bot"))
            .await
            .unwrap();
        next_event(&mut conn.events).await;
        next_event(&mut conn.events).await;

        let msg = ActionMessage::new("ally", "Ally", "say", serde_json::json!({"text": "hey"}));
        room.push
            .send(Some(Frame::Chat {
                from: Some("ally".into()),
                message: msg.clone(),
            }))
            .unwrap();
        room.push
            .send(Some(Frame::Error {
                message: "ignored".into(),
            }))
            .unwrap();
        room.push
            .send(Some(Frame::Part {
                participant_id: "ally".into(),
            }))
            .unwrap();

        match next_event(&mut conn.events).await {
            Some(TransportEvent::Chat {
                participant_id,
                message,
            }) => {
                assert_eq!(participant_id, "ally");
                assert_eq!(message, msg);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            next_event(&mut conn.events).await,
            Some(TransportEvent::PresenceLeave { participant_id }) if participant_id == "ally"
        ));
    }

    #[tokio::test]
    async fn remote_close_reports_disconnect() {
        let room = mock_room(Some(welcome())).await;
        let spec = RoomSpec::new("lobby", &room.url);
        let mut conn = transport()
            .connect(&spec, &Participant::generate("Bot"))
            .await
            .unwrap();
        next_event(&mut conn.events).await;
        next_event(&mut conn.events).await;

        room.push.send(None).unwrap();

        assert!(matches!(
            next_event(&mut conn.events).await,
            Some(TransportEvent::Disconnected { .. })
        ));
        assert!(next_event(&mut conn.events).await.is_none());
        assert!(!conn.handle.is_connected());
        assert!(matches!(
            conn.handle.send_chat_message(&ActionMessage::typing("me", "Bot", true)).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn local_disconnect_sends_leave_quietly() {
        let mut room = mock_room(Some(welcome())).await;
        let spec = RoomSpec::new("lobby", &room.url);
        let mut conn = transport()
            .connect(&spec, &Participant::generate("Bot"))
            .await
            .unwrap();
        let _hello = next_frame(&mut room).await;
        next_event(&mut conn.events).await;
        next_event(&mut conn.events).await;

        conn.handle.disconnect().await;
        conn.handle.disconnect().await;

        assert_eq!(next_frame(&mut room).await, Frame::Leave);
        assert!(!conn.handle.is_connected());
        assert!(next_event(&mut conn.events).await.is_none());
    }

    #[tokio::test]
    async fn heartbeat_is_sent_periodically() {
        let mut room = mock_room(Some(welcome())).await;
        let spec = RoomSpec::new("lobby", &room.url);
        let transport =
            WsTransport::with_intervals(Duration::from_secs(2), Duration::from_millis(50));
        let _conn = transport
            .connect(&spec, &Participant::generate("Bot"))
            .await
            .unwrap();
        let _hello = next_frame(&mut room).await;

        assert_eq!(next_frame(&mut room).await, Frame::Heartbeat);
    }

    #[tokio::test]
    async fn rejected_hello_fails_connect() {
        let room = mock_room(None).await;
        let spec = RoomSpec::new("lobby", &room.url);
        let result = transport().connect(&spec, &Participant::generate("Bot")).await;
        assert!(matches!(result, Err(TransportError::Connect(m)) if m == "room is full"));
    }

    #[tokio::test]
    async fn silent_endpoint_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let transport =
            WsTransport::with_intervals(Duration::from_millis(100), Duration::from_secs(60));
        let result = transport
            .connect(&RoomSpec::new("lobby", &url), &Participant::generate("Bot"))
            .await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
    }
}
