/// Decides whether a block of samples contains speech.
pub trait VoiceActivityDetector: Send {
    fn detect(&mut self, block: &[f32]) -> bool;
}

/// RMS energy threshold detector.
#[derive(Debug, Clone)]
pub struct EnergyVad {
    threshold: f32,
}

impl EnergyVad {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn rms(block: &[f32]) -> f32 {
        if block.is_empty() {
            return 0.0;
        }
        let sum: f32 = block.iter().map(|s| s * s).sum();
        (sum / block.len() as f32).sqrt()
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn detect(&mut self, block: &[f32]) -> bool {
        Self::rms(block) >= self.threshold
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Speech started on this block.
    VoiceStart,
    /// Speech ended; all buffered blocks, pre-roll and trailing block included.
    Utterance(Vec<Vec<f32>>),
}

/// Splits a block stream into utterances.
///
/// While silent only the most recent block is kept, so an utterance starts
/// with one block of pre-roll.
pub struct VoiceSegmenter<D> {
    detector: D,
    buffers: Vec<Vec<f32>>,
    last_detected: bool,
}

impl<D: VoiceActivityDetector> VoiceSegmenter<D> {
    pub fn new(detector: D) -> Self {
        Self {
            detector,
            buffers: Vec::new(),
            last_detected: false,
        }
    }

    pub fn push(&mut self, block: Vec<f32>) -> Option<Segment> {
        let detected = self.detector.detect(&block);
        self.buffers.push(block);

        let segment = match (self.last_detected, detected) {
            (false, true) => Some(Segment::VoiceStart),
            (true, false) => Some(Segment::Utterance(std::mem::take(&mut self.buffers))),
            (false, false) => {
                let keep_from = self.buffers.len() - 1;
                self.buffers.drain(..keep_from);
                None
            }
            (true, true) => None,
        };
        self.last_detected = detected;
        segment
    }

    pub fn is_active(&self) -> bool {
        self.last_detected
    }

    pub fn buffered(&self) -> usize {
        self.buffers.len()
    }

    /// Drop buffered audio and forget any speech in progress.
    pub fn reset(&mut self) {
        self.buffers.clear();
        self.last_detected = false;
    }
}
