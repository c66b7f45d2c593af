//! Beat-domain track schedules and their tick-domain form.
//!
//! A [`TrackSchedule`] is what a track records and persists: tempo, loop
//! length and a beat-ordered list of note events. Playback never reads it
//! directly. The clock converts it into a [`TickSchedule`] when it is posted,
//! and the tick form is immutable afterwards, so there is no way for playback
//! to observe ticks derived from an older tempo or event list.

use crate::error::{LooperError, Result};

/// Tempo used by freshly created tracks.
pub const DEFAULT_BPM: u32 = 60;

/// Loop length (in beats) used by freshly created tracks.
pub const DEFAULT_BEATS_PER_LOOP: u32 = 16;

const SECONDS_PER_MINUTE: i64 = 60;

/// A note event at a musical position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleEvent {
    /// Position in beats from loop start
    pub beat: f64,
    pub pitch: i32,
    pub is_on: bool,
}

impl ScheduleEvent {
    pub fn new(beat: f64, pitch: i32, is_on: bool) -> Self {
        Self { beat, pitch, is_on }
    }

    pub fn on(beat: f64, pitch: i32) -> Self {
        Self::new(beat, pitch, true)
    }

    pub fn off(beat: f64, pitch: i32) -> Self {
        Self::new(beat, pitch, false)
    }
}

/// Validate a tempo or loop length value.
pub fn check_positive(name: &str, value: u32) -> Result<u32> {
    if value == 0 {
        return Err(LooperError::InvalidTiming(format!("{} must be positive", name)));
    }
    Ok(value)
}

/// One track's musical schedule.
///
/// Events are kept sorted by beat; events sharing a beat stay in the order
/// they were added.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackSchedule {
    bpm: u32,
    beats_per_loop: u32,
    events: Vec<ScheduleEvent>,
}

impl TrackSchedule {
    pub fn new(bpm: u32, beats_per_loop: u32) -> Result<Self> {
        Ok(Self {
            bpm: check_positive("bpm", bpm)?,
            beats_per_loop: check_positive("beats per loop", beats_per_loop)?,
            events: Vec::new(),
        })
    }

    pub fn with_events(bpm: u32, beats_per_loop: u32, events: Vec<ScheduleEvent>) -> Result<Self> {
        let mut schedule = Self::new(bpm, beats_per_loop)?;
        schedule.set_events(events);
        Ok(schedule)
    }

    pub fn bpm(&self) -> u32 {
        self.bpm
    }

    pub fn beats_per_loop(&self) -> u32 {
        self.beats_per_loop
    }

    pub fn events(&self) -> &[ScheduleEvent] {
        &self.events
    }

    pub fn set_bpm(&mut self, bpm: u32) -> Result<()> {
        self.bpm = check_positive("bpm", bpm)?;
        Ok(())
    }

    pub fn set_beats_per_loop(&mut self, beats_per_loop: u32) -> Result<()> {
        self.beats_per_loop = check_positive("beats per loop", beats_per_loop)?;
        Ok(())
    }

    /// Replace all events. The new list is stably sorted by beat.
    ///
    /// Beats that are negative or not finite are moved to beat 0.
    pub fn set_events(&mut self, mut events: Vec<ScheduleEvent>) {
        for event in &mut events {
            if !event.beat.is_finite() || event.beat < 0.0 {
                event.beat = 0.0;
            }
        }
        events.sort_by(|a, b| a.beat.total_cmp(&b.beat));
        self.events = events;
    }

    /// Insert one event, after any existing events at the same beat.
    pub fn insert_event(&mut self, mut event: ScheduleEvent) {
        if !event.beat.is_finite() || event.beat < 0.0 {
            event.beat = 0.0;
        }
        let idx = self.events.partition_point(|e| e.beat <= event.beat);
        self.events.insert(idx, event);
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    /// Derive the tick-domain schedule for a clock running at `tick_rate`.
    pub fn to_ticks(&self, tick_rate: u32) -> TickSchedule {
        let ticks_per_beat = (SECONDS_PER_MINUTE * tick_rate as i64) as f64 / self.bpm as f64;
        let events = self
            .events
            .iter()
            .map(|e| TickEvent {
                tick: (e.beat * ticks_per_beat).floor() as i64,
                pitch: e.pitch,
                is_on: e.is_on,
            })
            .collect();

        TickSchedule {
            events,
            span_numerator: self.beats_per_loop as i64 * SECONDS_PER_MINUTE * tick_rate as i64,
            span_denominator: self.bpm as i64,
        }
    }
}

impl Default for TrackSchedule {
    fn default() -> Self {
        Self {
            bpm: DEFAULT_BPM,
            beats_per_loop: DEFAULT_BEATS_PER_LOOP,
            events: Vec::new(),
        }
    }
}

/// A note event at a loop-relative tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickEvent {
    /// Fires once the local tick is at or past this value
    pub tick: i64,
    pub pitch: i32,
    pub is_on: bool,
}

/// Tick-domain snapshot of a [`TrackSchedule`].
///
/// The loop length is kept as the exact ratio
/// `beats_per_loop * 60 * tick_rate / bpm` so that local positions computed
/// from it never drift against the global tick count, even when a loop is
/// not a whole number of ticks long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickSchedule {
    events: Vec<TickEvent>,
    span_numerator: i64,
    span_denominator: i64,
}

impl TickSchedule {
    pub fn events(&self) -> &[TickEvent] {
        &self.events
    }

    /// Number of distinct local tick values in one loop.
    pub fn ticks_per_loop(&self) -> i64 {
        (self.span_numerator + self.span_denominator - 1) / self.span_denominator
    }

    /// Loop-relative tick for `elapsed` ticks since the track's loop zero.
    ///
    /// Always in `0..ticks_per_loop()`, including for negative `elapsed`.
    pub fn local_tick(&self, elapsed: i64) -> i64 {
        let scaled = elapsed as i128 * self.span_denominator as i128;
        let within = scaled.rem_euclid(self.span_numerator as i128);
        (within / self.span_denominator as i128) as i64
    }
}
