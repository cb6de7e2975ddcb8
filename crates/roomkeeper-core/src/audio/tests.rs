use std::sync::{Arc, Mutex};
use std::time::Duration;

use roomkeeper_config::schema::{AudioConfig, VadConfig};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::conversation::{ConversationState, MessageFilter};
use crate::participant::Participant;
use crate::testing::{eventually, FakeCapture, FixedTranscriber, PlaybackOp, RecordingPlayback};

struct Fixture {
    pipeline: Arc<AudioPipeline>,
    conversation: Arc<ConversationState>,
    outbound: mpsc::Receiver<OutboundAudioStream>,
    events: Arc<Mutex<Vec<AudioEvent>>>,
}

fn enabled() -> AudioConfig {
    AudioConfig {
        enabled: true,
        vad: VadConfig {
            energy_threshold: 0.1,
        },
        ..Default::default()
    }
}

fn fixture(devices: AudioDevices, config: AudioConfig) -> Fixture {
    let (conversation, outbound) = ConversationState::new("wss://x/room:abc", 50);
    let conversation = Arc::new(conversation);
    let pipeline = Arc::new(AudioPipeline::new(
        Participant::generate("Bot"),
        Arc::clone(&conversation),
        devices,
        config,
        CancellationToken::new(),
    ));

    let events = Arc::new(Mutex::new(Vec::new()));
    let e = Arc::clone(&events);
    pipeline.events().subscribe(move |event| {
        let e = Arc::clone(&e);
        async move {
            e.lock().unwrap().push(event);
            Ok(())
        }
    });

    Fixture {
        pipeline,
        conversation,
        outbound,
        events,
    }
}

fn speech() -> Vec<f32> {
    vec![0.5; 8]
}

fn silence() -> Vec<f32> {
    vec![0.0; 8]
}

fn local_changes(events: &Mutex<Vec<AudioEvent>>) -> Vec<bool> {
    events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            AudioEvent::LocalSpeakingChanged(v) => Some(*v),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn inbound_stream_lifecycle() {
    let playback = RecordingPlayback::new();
    let f = fixture(
        AudioDevices {
            playback: Some(playback.clone()),
            ..Default::default()
        },
        AudioConfig::default(),
    );
    let audio = &f.pipeline;

    audio.handle_audio_start("ally", "s1", "audio/opus").await;
    assert!(audio.has_stream("s1").await);
    assert!(audio.is_speaking("ally").await);
    assert!(audio.is_playing().await);

    for _ in 0..3 {
        audio.handle_audio("s1", &[0u8; 4]).await;
    }
    audio.handle_audio_end("s1").await;

    assert!(!audio.has_stream("s1").await);
    assert!(!audio.is_speaking("ally").await);
    assert!(!audio.is_playing().await);
    assert_eq!(
        playback.ops(),
        vec![
            PlaybackOp::Open("s1".into()),
            PlaybackOp::Write("s1".into(), 4),
            PlaybackOp::Write("s1".into(), 4),
            PlaybackOp::Write("s1".into(), 4),
            PlaybackOp::Close("s1".into()),
        ]
    );
    assert_eq!(
        *f.events.lock().unwrap(),
        vec![
            AudioEvent::StreamOpened {
                participant_id: "ally".into(),
                stream_id: "s1".into(),
            },
            AudioEvent::SpeakingChanged {
                participant_id: "ally".into(),
                speaking: true,
            },
            AudioEvent::PlayingChanged(true),
            AudioEvent::StreamClosed {
                participant_id: "ally".into(),
                stream_id: "s1".into(),
            },
            AudioEvent::SpeakingChanged {
                participant_id: "ally".into(),
                speaking: false,
            },
            AudioEvent::PlayingChanged(false),
        ]
    );
}

#[tokio::test]
async fn unknown_stream_data_is_dropped() {
    let f = fixture(AudioDevices::default(), AudioConfig::default());
    f.pipeline.handle_audio("ghost", &[1, 2, 3]).await;
    f.pipeline.handle_audio_end("ghost").await;
    assert_eq!(f.pipeline.stream_count().await, 0);
    assert!(f.events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn second_stream_keeps_speaker_flag_until_both_end() {
    let f = fixture(AudioDevices::default(), AudioConfig::default());
    let audio = &f.pipeline;

    audio.handle_audio_start("ally", "s1", "audio/opus").await;
    audio.handle_audio_start("ally", "s2", "audio/opus").await;
    audio.handle_audio_end("s1").await;
    assert!(audio.is_speaking("ally").await);

    audio.handle_audio_end("s2").await;
    assert!(!audio.is_speaking("ally").await);
}

#[tokio::test]
async fn capture_is_off_without_device_or_when_disabled() {
    let f = fixture(AudioDevices::default(), enabled());
    assert!(!f.pipeline.start_capture().await.unwrap());

    let (capture, _tx) = FakeCapture::new();
    let f = fixture(
        AudioDevices {
            capture: Some(capture),
            ..Default::default()
        },
        AudioConfig::default(),
    );
    assert!(!f.pipeline.start_capture().await.unwrap());
    assert!(!f.pipeline.is_capturing());
}

#[tokio::test]
async fn utterance_becomes_an_outbound_stream() {
    let (capture, tx) = FakeCapture::new();
    let mut f = fixture(
        AudioDevices {
            capture: Some(capture),
            ..Default::default()
        },
        enabled(),
    );
    assert!(f.pipeline.start_capture().await.unwrap());

    for block in [silence(), speech(), speech(), silence()] {
        tx.send(block).await.unwrap();
    }

    let mut stream = tokio::time::timeout(Duration::from_secs(1), f.outbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stream.media_type, "audio/pcm-f32");
    // Pre-roll, two speech blocks and the trailing silent block.
    assert_eq!(stream.chunks.recv().await.unwrap().len(), 4 * 8 * 4);

    let events = Arc::clone(&f.events);
    assert!(eventually(|| local_changes(&events) == vec![true, false]).await);
    assert!(events
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, AudioEvent::UtteranceSent { bytes: 128, .. })));
}

#[tokio::test]
async fn transcript_is_posted_as_a_say_message() {
    let (capture, tx) = FakeCapture::new();
    let mut f = fixture(
        AudioDevices {
            capture: Some(capture),
            transcriber: Some(Arc::new(FixedTranscriber(" hello there "))),
            ..Default::default()
        },
        enabled(),
    );
    f.pipeline.start_capture().await.unwrap();

    for block in [speech(), silence()] {
        tx.send(block).await.unwrap();
    }
    let _stream = f.outbound.recv().await.unwrap();

    let conversation = Arc::clone(&f.conversation);
    assert!(eventually(|| conversation.message_count() == 1).await);
    let messages = conversation.get_cached_messages(&MessageFilter::new()).unwrap();
    assert_eq!(messages[0].method, "say");
    assert_eq!(messages[0].args["text"], "hello there");
}

#[tokio::test]
async fn remote_speech_ducks_capture() {
    let (capture, tx) = FakeCapture::new();
    let f = fixture(
        AudioDevices {
            capture: Some(capture),
            ..Default::default()
        },
        enabled(),
    );
    let audio = &f.pipeline;
    audio.start_capture().await.unwrap();

    audio.handle_audio_start("ally", "s1", "audio/opus").await;
    assert!(audio.is_capture_paused());

    tx.send(speech()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(local_changes(&f.events).is_empty());

    audio.handle_audio_end("s1").await;
    assert!(!audio.is_capture_paused());

    tx.send(speech()).await.unwrap();
    let events = Arc::clone(&f.events);
    assert!(eventually(|| local_changes(&events) == vec![true]).await);
}

#[tokio::test]
async fn close_releases_capture_and_sinks() {
    let (capture, _tx) = FakeCapture::new();
    let playback = RecordingPlayback::new();
    let f = fixture(
        AudioDevices {
            capture: Some(capture),
            playback: Some(playback.clone()),
            ..Default::default()
        },
        enabled(),
    );
    f.pipeline.start_capture().await.unwrap();
    f.pipeline.handle_audio_start("ally", "s1", "audio/opus").await;

    f.pipeline.close().await;

    assert!(!f.pipeline.is_capturing());
    assert_eq!(f.pipeline.stream_count().await, 0);
    assert_eq!(playback.ops().last(), Some(&PlaybackOp::Close("s1".into())));
    // A closed pipeline does not capture again.
    assert!(!f.pipeline.start_capture().await.unwrap());
}
