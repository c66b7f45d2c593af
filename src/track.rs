//! Track identity, mode and per-track data.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::schedule::TrackSchedule;

/// Stable index of a track within the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TrackId(pub usize);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // 1-based for humans
        write!(f, "track {}", self.0 + 1)
    }
}

/// What a track is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackMode {
    #[default]
    Disabled,
    Recording,
    Playing,
}

impl fmt::Display for TrackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrackMode::Disabled => "DISABLED",
            TrackMode::Recording => "RECORD",
            TrackMode::Playing => "PLAY",
        };
        f.write_str(name)
    }
}

/// Instrument settings carried with a track for its sound output.
///
/// The looper only stores and forwards these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthSettings {
    /// Instrument (program) index
    pub program: u32,
    /// Output pitch of schedule pitch 0
    pub midi_offset: i32,
    /// Output volume, 0-127
    pub volume: u8,
}

impl Default for SynthSettings {
    fn default() -> Self {
        Self {
            program: 0,
            midi_offset: 60,
            volume: 60,
        }
    }
}

/// Default recording quantization grid (divisions per beat); 12 allows triplets.
pub const DEFAULT_QUANTIZE_SUBDIVISIONS: u32 = 12;

/// One looping track.
#[derive(Debug, Clone, Default)]
pub struct Track {
    pub mode: TrackMode,
    pub schedule: TrackSchedule,
    pub synth: SynthSettings,
    /// Grid (divisions per beat) recorded beats snap to, if any
    pub quantize: Option<u32>,
    /// Track whose tempo and loop length this one mirrors
    pub follows: Option<TrackId>,
    /// Pitches pressed while recording and not yet released
    pub held: Vec<i32>,
}

impl Track {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snap a recorded beat to the quantize grid, wrapping into the loop.
    pub fn quantize_beat(&self, beat: f64) -> f64 {
        let Some(subdivisions) = self.quantize.filter(|&s| s > 0) else {
            return beat;
        };
        let grid = subdivisions as f64;
        let snapped = (beat * grid).round() / grid;
        let loop_beats = self.schedule.beats_per_loop() as f64;
        if snapped >= loop_beats {
            snapped - loop_beats
        } else {
            snapped
        }
    }
}
