use roomkeeper_common::new_stream_id;
use tokio::sync::mpsc;

const CHUNK_BUFFER: usize = 64;

/// An outbound audio stream: one utterance or clip, sent as
/// `start`, data chunks, `end` under a fresh id.
#[derive(Debug)]
pub struct OutboundAudioStream {
    pub id: String,
    pub media_type: String,
    pub chunks: mpsc::Receiver<Vec<u8>>,
}

impl OutboundAudioStream {
    /// A stream fed through the returned sender. The stream ends when the
    /// sender is dropped.
    pub fn channel(media_type: impl Into<String>) -> (mpsc::Sender<Vec<u8>>, Self) {
        let (tx, rx) = mpsc::channel(CHUNK_BUFFER);
        let stream = Self {
            id: new_stream_id(),
            media_type: media_type.into(),
            chunks: rx,
        };
        (tx, stream)
    }

    /// A complete stream holding a single chunk.
    pub fn from_bytes(media_type: impl Into<String>, data: Vec<u8>) -> Self {
        let (tx, stream) = Self::channel(media_type);
        // Fresh channel with spare capacity.
        let _ = tx.try_send(data);
        stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn from_bytes_yields_one_chunk_then_ends() {
        let mut stream = OutboundAudioStream::from_bytes("audio/pcm-f32", vec![1, 2, 3]);
        assert_eq!(stream.id.len(), 12);
        assert_eq!(stream.chunks.recv().await, Some(vec![1, 2, 3]));
        assert_eq!(stream.chunks.recv().await, None);
    }
}
