use std::collections::HashMap;

/// Who is speaking in a room.
///
/// Tracks a flag per remote participant, the derived "anyone remote is
/// speaking" value, and whether we are speaking ourselves. Setters report
/// a change of the derived value so callers can duck on edges only.
#[derive(Debug, Default)]
pub struct SpeakerMap {
    speakers: HashMap<String, bool>,
    playing: bool,
    local_speaking: bool,
}

impl SpeakerMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `Some(playing)` when the derived value flips.
    pub fn set(&mut self, participant_id: &str, speaking: bool) -> Option<bool> {
        self.speakers.insert(participant_id.to_string(), speaking);
        self.refresh()
    }

    pub fn remove(&mut self, participant_id: &str) -> Option<bool> {
        self.speakers.remove(participant_id);
        self.refresh()
    }

    pub fn clear(&mut self) -> Option<bool> {
        self.speakers.clear();
        self.refresh()
    }

    fn refresh(&mut self) -> Option<bool> {
        let playing = self.speakers.values().any(|s| *s);
        if playing == self.playing {
            return None;
        }
        self.playing = playing;
        Some(playing)
    }

    pub fn is_speaking(&self, participant_id: &str) -> bool {
        self.speakers.get(participant_id).copied().unwrap_or(false)
    }

    /// True while any remote participant is speaking.
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Returns whether the flag changed.
    pub fn set_local(&mut self, speaking: bool) -> bool {
        let changed = self.local_speaking != speaking;
        self.local_speaking = speaking;
        changed
    }

    pub fn local_speaking(&self) -> bool {
        self.local_speaking
    }
}
