//! The track collection and everything that changes it.
//!
//! [`SessionState`] owns every [`Track`] together with the [`Clock`] and the
//! optional [`Metronome`]. It is the single place where track modes change,
//! so the side effects of each transition live in one function
//! ([`SessionState::set_mode_at`]). Tempo and loop-length edits cascade from
//! a track to the tracks following it; follow relations are plain ids held by
//! the follower, and the cascade is driven from here.
//!
//! # Thread Safety
//! [`Session`] is a cloneable handle around `Arc<Mutex<SessionState>>`. The
//! periodic update thread and the input callbacks both go through it, so every
//! read-modify-write of track state is serialized. Tick queries use the shared
//! tick source and never take the lock.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, MutexGuard};

use crate::clock::Clock;
use crate::error::{LooperError, Result};
use crate::metronome::Metronome;
use crate::persist::{SessionFile, TrackRecord};
use crate::schedule::{check_positive, ScheduleEvent};
use crate::sink::NoteSink;
use crate::tick::TickSource;
use crate::track::{SynthSettings, Track, TrackId, TrackMode};

/// Snapshot of one track for display.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackStatus {
    pub id: TrackId,
    pub mode: TrackMode,
    pub bpm: u32,
    pub beats_per_loop: u32,
    pub event_count: usize,
    pub follows: Option<TrackId>,
    pub quantize: Option<u32>,
    /// Current beat, while recording or playing
    pub position: Option<f64>,
}

pub struct SessionState {
    clock: Clock,
    tracks: Vec<Track>,
    metronome: Option<Metronome>,
}

impl SessionState {
    /// Create a session with one track per sink.
    pub fn new(tick_rate: u32, sinks: Vec<Box<dyn NoteSink>>) -> Self {
        let tracks = vec![Track::new(); sinks.len()];
        Self {
            clock: Clock::new(tick_rate, sinks),
            tracks,
            metronome: None,
        }
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn track(&self, id: TrackId) -> Result<&Track> {
        self.tracks.get(id.0).ok_or(LooperError::UnknownTrack(id))
    }

    fn track_mut(&mut self, id: TrackId) -> Result<&mut Track> {
        self.tracks.get_mut(id.0).ok_or(LooperError::UnknownTrack(id))
    }

    pub fn mode(&self, id: TrackId) -> Result<TrackMode> {
        Ok(self.track(id)?.mode)
    }

    pub fn set_metronome(&mut self, metronome: Option<Metronome>) {
        if let Some(old) = &mut self.metronome {
            old.silence();
        }
        self.metronome = metronome;
    }

    pub fn set_mode(&mut self, id: TrackId, mode: TrackMode) -> Result<()> {
        self.set_mode_at(id, mode, Instant::now())
    }

    /// Move a track to `mode`, applying the transition's clock side effects.
    ///
    /// | to        | effect |
    /// |-----------|--------|
    /// | Disabled  | deactivate in the clock; schedule kept |
    /// | Recording | clear the schedule, loop zero to now, deactivate |
    /// | Playing   | post the schedule; enable, keeping the loop zero only when coming from Recording |
    ///
    /// Leaving Recording releases every key still held: the note-off is
    /// recorded at the current beat and sent to the sink. Moving to the
    /// current mode does nothing.
    pub fn set_mode_at(&mut self, id: TrackId, mode: TrackMode, now: Instant) -> Result<()> {
        let previous = self.track(id)?.mode;
        if previous == mode {
            return Ok(());
        }

        if previous == TrackMode::Recording {
            let held = std::mem::take(&mut self.track_mut(id)?.held);
            for pitch in held {
                self.stamp_event_at(id, pitch, false, now)?;
            }
        }

        match mode {
            TrackMode::Disabled => {
                self.clock.disable_track(id)?;
            }
            TrackMode::Recording => {
                let track = self.track_mut(id)?;
                track.schedule.clear_events();
                track.held.clear();
                self.clock.reset_track_offset_at(id, now)?;
                self.clock.disable_track(id)?;
            }
            TrackMode::Playing => {
                let keep_offset = previous == TrackMode::Recording;
                self.clock.post_schedule(id, &self.tracks[id.0].schedule)?;
                self.clock.enable_track_at(id, keep_offset, now)?;
            }
        }

        self.track_mut(id)?.mode = mode;
        log::info!("{}: {} -> {}", id, previous, mode);
        Ok(())
    }

    pub fn record_event(&mut self, id: TrackId, pitch: i32, turn_on: bool) -> Result<bool> {
        self.record_event_at(id, pitch, turn_on, Instant::now())
    }

    /// Add a played note to a recording track at its current beat.
    ///
    /// Returns whether the event was recorded; tracks that are not recording
    /// ignore it. Recorded notes are also sent to the track's sink so the
    /// performer hears them.
    pub fn record_event_at(&mut self, id: TrackId, pitch: i32, turn_on: bool, now: Instant) -> Result<bool> {
        let track = self.track_mut(id)?;
        if track.mode != TrackMode::Recording {
            return Ok(false);
        }

        if turn_on {
            track.held.push(pitch);
        } else if let Some(pos) = track.held.iter().rposition(|&p| p == pitch) {
            track.held.remove(pos);
        }
        self.stamp_event_at(id, pitch, turn_on, now)?;
        Ok(true)
    }

    /// Insert a note at the track's current beat and monitor it.
    fn stamp_event_at(&mut self, id: TrackId, pitch: i32, turn_on: bool, now: Instant) -> Result<()> {
        let track = self.track(id)?;
        let schedule = &track.schedule;
        let beat =
            self.clock
                .get_current_beat_at(id, schedule.bpm(), schedule.beats_per_loop(), now)?;
        let beat = track.quantize_beat(beat);

        self.track_mut(id)?
            .schedule
            .insert_event(ScheduleEvent::new(beat, pitch, turn_on));
        self.clock.monitor(id, pitch, turn_on)?;
        log::trace!("{} recorded {} {} at beat {:.3}", id, pitch, turn_on, beat);
        Ok(())
    }

    pub fn key_event(&mut self, pitch: i32, turn_on: bool) -> usize {
        self.key_event_at(pitch, turn_on, Instant::now())
    }

    /// Offer a played note to every track. Returns how many recorded it.
    pub fn key_event_at(&mut self, pitch: i32, turn_on: bool, now: Instant) -> usize {
        let mut recorded = 0;
        for idx in 0..self.tracks.len() {
            match self.record_event_at(TrackId(idx), pitch, turn_on, now) {
                Ok(true) => recorded += 1,
                Ok(false) => {}
                Err(e) => log::warn!("{}: key event not recorded: {}", TrackId(idx), e),
            }
        }
        recorded
    }

    /// Set a track's tempo. A track that was following another stops
    /// following it; tracks following this one take the new tempo.
    pub fn set_bpm(&mut self, id: TrackId, bpm: u32) -> Result<()> {
        check_positive("bpm", bpm)?;
        let beats_per_loop = self.track(id)?.schedule.beats_per_loop();
        self.unfollow(id)?;
        self.apply_timing(id, bpm, beats_per_loop)
    }

    /// Set a track's loop length in beats, with the same follow rules as
    /// [`SessionState::set_bpm`].
    pub fn set_beats_per_loop(&mut self, id: TrackId, beats_per_loop: u32) -> Result<()> {
        check_positive("beats per loop", beats_per_loop)?;
        let bpm = self.track(id)?.schedule.bpm();
        self.unfollow(id)?;
        self.apply_timing(id, bpm, beats_per_loop)
    }

    /// Install timing on a track, re-post it and cascade to its followers.
    /// Offsets are not touched.
    fn apply_timing(&mut self, id: TrackId, bpm: u32, beats_per_loop: u32) -> Result<()> {
        let mut pending = vec![id];
        // Follow relations are acyclic, but never visit more tracks than exist
        let mut budget = self.tracks.len();

        while let Some(current) = pending.pop() {
            if budget == 0 {
                break;
            }
            budget -= 1;

            let track = self.track_mut(current)?;
            track.schedule.set_bpm(bpm)?;
            track.schedule.set_beats_per_loop(beats_per_loop)?;
            self.clock.post_schedule(current, &self.tracks[current.0].schedule)?;
            log::info!("{}: {} bpm, {} beats per loop", current, bpm, beats_per_loop);

            pending.extend(self.followers(current));
        }
        Ok(())
    }

    /// Tracks directly following `id`.
    pub fn followers(&self, id: TrackId) -> Vec<TrackId> {
        self.tracks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.follows == Some(id))
            .map(|(idx, _)| TrackId(idx))
            .collect()
    }

    /// Make `id` mirror `reference`'s tempo, loop length and phase.
    pub fn follow(&mut self, id: TrackId, reference: TrackId) -> Result<()> {
        self.track(id)?;
        let reference_schedule = &self.track(reference)?.schedule;
        let (bpm, beats_per_loop) = (reference_schedule.bpm(), reference_schedule.beats_per_loop());

        if id == reference {
            return Err(LooperError::InvalidFollow(format!("{} cannot follow itself", id)));
        }
        let mut cursor = Some(reference);
        while let Some(current) = cursor {
            if current == id {
                return Err(LooperError::InvalidFollow(format!(
                    "{} already follows {}",
                    reference, id
                )));
            }
            cursor = self.tracks[current.0].follows;
        }

        self.track_mut(id)?.follows = Some(reference);
        self.apply_timing(id, bpm, beats_per_loop)?;
        self.clock.sync(id, reference)?;
        log::info!("{} follows {}", id, reference);
        Ok(())
    }

    pub fn unfollow(&mut self, id: TrackId) -> Result<()> {
        if let Some(reference) = self.track_mut(id)?.follows.take() {
            log::info!("{} no longer follows {}", id, reference);
        }
        Ok(())
    }

    pub fn set_quantize(&mut self, id: TrackId, subdivisions: Option<u32>) -> Result<()> {
        self.track_mut(id)?.quantize = subdivisions.filter(|&s| s > 0);
        Ok(())
    }

    pub fn set_synth(&mut self, id: TrackId, settings: SynthSettings) -> Result<()> {
        self.clock.configure_sink(id, &settings)?;
        self.track_mut(id)?.synth = settings;
        Ok(())
    }

    pub fn sync_track_starts(&mut self) -> Result<()> {
        self.sync_track_starts_at(Instant::now())
    }

    pub fn sync_track_starts_at(&mut self, now: Instant) -> Result<()> {
        self.clock.sync_track_starts_at(now)
    }

    pub fn export_track(&self, id: TrackId) -> Result<TrackRecord> {
        let track = self.track(id)?;
        Ok(TrackRecord::new(&track.schedule, &track.synth))
    }

    /// Replace a track's contents from a saved record. The track is disabled
    /// first; its followers take the loaded timing.
    pub fn load_track(&mut self, id: TrackId, record: &TrackRecord) -> Result<()> {
        self.track(id)?;
        let (schedule, synth) = record.to_parts()?;

        self.set_mode(id, TrackMode::Disabled)?;
        self.unfollow(id)?;
        let (bpm, beats_per_loop) = (schedule.bpm(), schedule.beats_per_loop());
        self.track_mut(id)?.schedule = schedule;
        self.apply_timing(id, bpm, beats_per_loop)?;
        self.set_synth(id, synth)?;
        log::info!("{}: loaded {} events", id, record.schedule_beats_beats.len());
        Ok(())
    }

    pub fn export_session(&self) -> SessionFile {
        let tracks = self
            .tracks
            .iter()
            .enumerate()
            .map(|(idx, t)| (idx, TrackRecord::new(&t.schedule, &t.synth)))
            .collect();
        SessionFile { tracks }
    }

    /// Load every record that has a matching track. Records for tracks
    /// beyond the session's track count are skipped.
    pub fn load_session(&mut self, file: &SessionFile) -> Result<usize> {
        let mut loaded = 0;
        for (&idx, record) in &file.tracks {
            if idx >= self.tracks.len() {
                log::warn!("Skipping saved {}: session has {} tracks", TrackId(idx), self.tracks.len());
                continue;
            }
            self.load_track(TrackId(idx), record)?;
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Current beat of a recording or playing track.
    pub fn position_at(&self, id: TrackId, now: Instant) -> Result<Option<f64>> {
        let track = self.track(id)?;
        if track.mode == TrackMode::Disabled {
            return Ok(None);
        }
        let schedule = &track.schedule;
        match self
            .clock
            .get_current_beat_at(id, schedule.bpm(), schedule.beats_per_loop(), now)
        {
            Ok(beat) => Ok(Some(beat)),
            Err(LooperError::NotStarted) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn status_at(&self, now: Instant) -> Vec<TrackStatus> {
        self.tracks
            .iter()
            .enumerate()
            .map(|(idx, t)| TrackStatus {
                id: TrackId(idx),
                mode: t.mode,
                bpm: t.schedule.bpm(),
                beats_per_loop: t.schedule.beats_per_loop(),
                event_count: t.schedule.events().len(),
                follows: t.follows,
                quantize: t.quantize,
                position: self.position_at(TrackId(idx), now).ok().flatten(),
            })
            .collect()
    }

    pub fn on_update(&mut self) {
        self.on_update_at(Instant::now());
    }

    /// One driver period: dispatch due notes on every track, then let the
    /// metronome click if the track it follows is running.
    pub fn on_update_at(&mut self, now: Instant) {
        self.clock.on_update_at(now);

        if let Some(metronome) = &mut self.metronome {
            let running = self
                .tracks
                .get(metronome.track().0)
                .is_some_and(|t| t.mode != TrackMode::Disabled);
            if running {
                metronome.update_at(&self.clock, now);
            } else {
                metronome.silence();
            }
        }
    }
}

/// Shared handle to a [`SessionState`].
#[derive(Clone)]
pub struct Session {
    state: Arc<Mutex<SessionState>>,
    ticks: Arc<TickSource>,
}

impl Session {
    pub fn new(tick_rate: u32, sinks: Vec<Box<dyn NoteSink>>) -> Self {
        Self::from_state(SessionState::new(tick_rate, sinks))
    }

    pub fn from_state(state: SessionState) -> Self {
        let ticks = state.clock.tick_source();
        Self {
            state: Arc::new(Mutex::new(state)),
            ticks,
        }
    }

    /// Exclusive access for a sequence of operations that must not interleave
    /// with updates.
    pub fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock()
    }

    /// Current global tick, without taking the session lock.
    pub fn current_tick(&self) -> Result<i64> {
        self.ticks.current_tick()
    }

    pub fn on_update(&self) {
        self.state.lock().on_update();
    }

    pub fn key_event(&self, pitch: i32, turn_on: bool) -> usize {
        self.state.lock().key_event(pitch, turn_on)
    }

    pub fn set_mode(&self, id: TrackId, mode: TrackMode) -> Result<()> {
        self.state.lock().set_mode(id, mode)
    }
}
