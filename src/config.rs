//! Configuration persistence for the looper.
//!
//! Saves and loads looper configuration to/from YAML files.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::tick::DEFAULT_TICK_RATE;
use crate::track::TrackId;

/// MIDI output settings for one track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackOutput {
    /// MIDI channel (1-16, 1-indexed for YAML readability)
    #[serde(default = "default_channel")]
    pub channel: u8,
}

impl Default for TrackOutput {
    fn default() -> Self {
        Self {
            channel: default_channel(),
        }
    }
}

/// Click track settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetronomeConfig {
    /// Track the click follows (1-based)
    #[serde(default = "default_metronome_track")]
    pub track: usize,
    #[serde(default = "default_metronome_bpm")]
    pub bpm: u32,
    /// MIDI note of the click
    #[serde(default = "default_metronome_pitch")]
    pub pitch: u8,
    #[serde(default = "default_metronome_channel")]
    pub channel: u8,
}

impl MetronomeConfig {
    pub fn track_id(&self) -> TrackId {
        TrackId(self.track.saturating_sub(1))
    }
}

impl Default for MetronomeConfig {
    fn default() -> Self {
        Self {
            track: default_metronome_track(),
            bpm: default_metronome_bpm(),
            pitch: default_metronome_pitch(),
            channel: default_metronome_channel(),
        }
    }
}

/// Complete looper configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LooperConfig {
    /// Ticks per second of the shared tick source
    #[serde(default = "default_tick_rate")]
    pub tick_rate: u32,
    /// Period of the dispatch loop
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,
    #[serde(default = "default_track_count")]
    pub track_count: usize,
    /// MIDI output port name filter (substring match)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_device: Option<String>,
    /// MIDI input port name filter (substring match)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_device: Option<String>,
    /// Incoming MIDI note that maps to schedule pitch 0
    #[serde(default = "default_input_base_note")]
    pub input_base_note: u8,
    /// Per-track output settings, keyed by 1-based track number
    #[serde(default)]
    pub tracks: BTreeMap<usize, TrackOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metronome: Option<MetronomeConfig>,
}

fn default_tick_rate() -> u32 {
    DEFAULT_TICK_RATE
}

fn default_update_interval_ms() -> u64 {
    20
}

fn default_track_count() -> usize {
    4
}

fn default_input_base_note() -> u8 {
    60
}

fn default_channel() -> u8 {
    1
}

fn default_metronome_track() -> usize {
    1
}

fn default_metronome_bpm() -> u32 {
    60
}

fn default_metronome_pitch() -> u8 {
    76
}

fn default_metronome_channel() -> u8 {
    10
}

impl Default for LooperConfig {
    fn default() -> Self {
        Self {
            tick_rate: default_tick_rate(),
            update_interval_ms: default_update_interval_ms(),
            track_count: default_track_count(),
            output_device: None,
            input_device: None,
            input_base_note: default_input_base_note(),
            tracks: BTreeMap::new(),
            metronome: None,
        }
    }
}

impl LooperConfig {
    /// Get the default config file path.
    pub fn default_path() -> PathBuf {
        PathBuf::from("looper_config.yaml")
    }

    /// Load configuration from a YAML file. A missing file gives the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config YAML {}", path.display()))
    }

    /// Save configuration to a YAML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file {}", path.display()))
    }

    /// Output settings for a track, default if not configured.
    pub fn track_output(&self, id: TrackId) -> TrackOutput {
        self.tracks.get(&(id.0 + 1)).cloned().unwrap_or_default()
    }
}
