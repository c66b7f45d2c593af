//! Metronome follower.
//!
//! Clicks once per beat of a designated track. It reads that track's offset
//! and the shared tick source and never touches track playback. Crossing
//! detection is best effort: with an update period longer than a beat some
//! clicks are skipped.

use std::time::Instant;

use crate::clock::Clock;
use crate::sink::NoteSink;
use crate::track::TrackId;

/// How long a click sounds, in beats.
pub const CLICK_LENGTH_BEATS: f64 = 0.2;

pub struct Metronome {
    track: TrackId,
    bpm: u32,
    pitch: i32,
    sink: Box<dyn NoteSink>,
    last_beat: Option<i64>,
    /// Beat position at which the sounding click ends
    click_off_at: Option<f64>,
}

impl Metronome {
    pub fn new(track: TrackId, bpm: u32, pitch: i32, sink: Box<dyn NoteSink>) -> Self {
        Self {
            track,
            bpm: bpm.max(1),
            pitch,
            sink,
            last_beat: None,
            click_off_at: None,
        }
    }

    pub fn track(&self) -> TrackId {
        self.track
    }

    /// End any sounding click and forget the last beat seen.
    pub fn silence(&mut self) {
        if self.click_off_at.take().is_some() {
            self.sink.note(self.pitch, false);
        }
        self.last_beat = None;
    }

    pub fn update_at(&mut self, clock: &Clock, now: Instant) {
        let Ok(beats) = clock.beats_since_offset_at(self.track, self.bpm, now) else {
            return;
        };

        if let Some(off_at) = self.click_off_at {
            if beats >= off_at {
                self.sink.note(self.pitch, false);
                self.click_off_at = None;
            }
        }

        let beat = beats.floor() as i64;
        if self.last_beat == Some(beat) {
            return;
        }
        if self.click_off_at.take().is_some() {
            self.sink.note(self.pitch, false);
        }
        self.sink.note(self.pitch, true);
        self.click_off_at = Some(beat as f64 + CLICK_LENGTH_BEATS);
        self.last_beat = Some(beat);
        log::trace!("Metronome click at beat {} of {}", beat, self.track);
    }
}
