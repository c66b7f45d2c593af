//! Persisted track state and session files.
//!
//! A track is saved as a [`TrackRecord`]: tempo, loop length, the event list
//! as three parallel arrays, and the synth settings. A session file is a
//! YAML map from track index to record.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{LooperError, Result};
use crate::schedule::{ScheduleEvent, TrackSchedule};
use crate::track::SynthSettings;

/// Saved state of one track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub bpm: u32,
    /// Beats per loop
    pub bpl: u32,
    pub schedule_beats_beats: Vec<f64>,
    pub schedule_beats_pitches: Vec<i32>,
    pub schedule_beats_onoff: Vec<bool>,
    pub program: u32,
    pub midi_offset: i32,
    pub volume: u8,
}

impl TrackRecord {
    pub fn new(schedule: &TrackSchedule, synth: &SynthSettings) -> Self {
        let events = schedule.events();
        Self {
            bpm: schedule.bpm(),
            bpl: schedule.beats_per_loop(),
            schedule_beats_beats: events.iter().map(|e| e.beat).collect(),
            schedule_beats_pitches: events.iter().map(|e| e.pitch).collect(),
            schedule_beats_onoff: events.iter().map(|e| e.is_on).collect(),
            program: synth.program,
            midi_offset: synth.midi_offset,
            volume: synth.volume,
        }
    }

    /// Rebuild the schedule and synth settings this record describes.
    pub fn to_parts(&self) -> Result<(TrackSchedule, SynthSettings)> {
        let count = self.schedule_beats_beats.len();
        if self.schedule_beats_pitches.len() != count || self.schedule_beats_onoff.len() != count {
            return Err(LooperError::InvalidRecord(format!(
                "event arrays differ in length ({} beats, {} pitches, {} on/off flags)",
                count,
                self.schedule_beats_pitches.len(),
                self.schedule_beats_onoff.len()
            )));
        }

        let events = self
            .schedule_beats_beats
            .iter()
            .zip(&self.schedule_beats_pitches)
            .zip(&self.schedule_beats_onoff)
            .map(|((&beat, &pitch), &is_on)| ScheduleEvent::new(beat, pitch, is_on))
            .collect();
        let schedule = TrackSchedule::with_events(self.bpm, self.bpl, events)?;
        let synth = SynthSettings {
            program: self.program,
            midi_offset: self.midi_offset,
            volume: self.volume,
        };
        Ok((schedule, synth))
    }
}

/// All saved tracks of a session, keyed by track index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionFile {
    pub tracks: BTreeMap<usize, TrackRecord>,
}

impl SessionFile {
    /// File name for a new save, stamped with the local time.
    pub fn default_file_name() -> PathBuf {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        PathBuf::from(format!("session-{}.yaml", stamp))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse session YAML")
    }

    pub fn to_yaml(&self) -> anyhow::Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize session")
    }

    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read session file {}", path.display()))?;
        Self::from_yaml(&content)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        fs::write(path, self.to_yaml()?)
            .with_context(|| format!("Failed to write session file {}", path.display()))
    }
}
