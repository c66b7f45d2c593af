//! Tick clock and multi-track dispatch.
//!
//! This module handles:
//! - Converting wall-clock time into ticks through a shared [`TickSource`]
//! - Holding each track's posted [`TickSchedule`], loop offset and cursor
//! - Dispatching due note commands to each track's sink on every update
//! - Phase operations: resetting, aligning and copying track offsets
//!
//! Every track lives in one record indexed by [`TrackId`], so offset,
//! activity, cursor and schedule can never disagree about which tracks exist.
//!
//! # Thread Safety
//! [`Clock`] itself is not locked; the session wraps it in a mutex together
//! with the tracks. The tick source is shared behind an `Arc` and can be read
//! from any thread without that lock.

use std::sync::Arc;
use std::time::Instant;

use crate::cursor::PlaybackCursor;
use crate::error::{LooperError, Result};
use crate::schedule::{TickSchedule, TrackSchedule};
use crate::sink::NoteSink;
use crate::tick::TickSource;
use crate::track::{SynthSettings, TrackId};

const SECONDS_PER_MINUTE: f64 = 60.0;

/// Playback state the clock keeps for one track.
struct ClockTrack {
    /// Global tick of this track's local tick zero
    offset_tick: i64,
    active: bool,
    cursor: PlaybackCursor,
    schedule: Option<TickSchedule>,
    sink: Box<dyn NoteSink>,
}

impl ClockTrack {
    fn new(sink: Box<dyn NoteSink>) -> Self {
        Self {
            offset_tick: 0,
            active: false,
            cursor: PlaybackCursor::new(),
            schedule: None,
            sink,
        }
    }
}

pub struct Clock {
    ticks: Arc<TickSource>,
    tracks: Vec<ClockTrack>,
}

impl Clock {
    /// Create a clock with one track per sink.
    pub fn new(tick_rate: u32, sinks: Vec<Box<dyn NoteSink>>) -> Self {
        Self {
            ticks: Arc::new(TickSource::new(tick_rate)),
            tracks: sinks.into_iter().map(ClockTrack::new).collect(),
        }
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn tick_rate(&self) -> u32 {
        self.ticks.tick_rate()
    }

    pub fn tick_source(&self) -> Arc<TickSource> {
        self.ticks.clone()
    }

    pub fn is_started(&self) -> bool {
        self.ticks.is_started()
    }

    pub fn current_tick(&self) -> Result<i64> {
        self.ticks.current_tick()
    }

    pub fn current_tick_at(&self, now: Instant) -> Result<i64> {
        self.ticks.current_tick_at(now)
    }

    fn track(&self, id: TrackId) -> Result<&ClockTrack> {
        self.tracks.get(id.0).ok_or(LooperError::UnknownTrack(id))
    }

    fn track_mut(&mut self, id: TrackId) -> Result<&mut ClockTrack> {
        self.tracks.get_mut(id.0).ok_or(LooperError::UnknownTrack(id))
    }

    pub fn is_active(&self, id: TrackId) -> Result<bool> {
        Ok(self.track(id)?.active)
    }

    pub fn offset(&self, id: TrackId) -> Result<i64> {
        Ok(self.track(id)?.offset_tick)
    }

    /// The schedule playback is currently using for a track, if one was posted.
    pub fn posted_schedule(&self, id: TrackId) -> Result<Option<&TickSchedule>> {
        Ok(self.track(id)?.schedule.as_ref())
    }

    pub fn enable_track(&mut self, id: TrackId, keep_offset: bool) -> Result<()> {
        self.enable_track_at(id, keep_offset, Instant::now())
    }

    /// Activate a track, starting the tick source if needed.
    ///
    /// The cursor rewinds to the loop start. With `keep_offset` the track's
    /// loop zero stays where it was; otherwise it moves to `now`.
    pub fn enable_track_at(&mut self, id: TrackId, keep_offset: bool, now: Instant) -> Result<()> {
        self.track(id)?;
        self.ticks.start_at(now);
        let tick = self.ticks.current_tick_at(now)?;

        let track = self.track_mut(id)?;
        track.active = true;
        track.cursor.reset();
        if !keep_offset {
            track.offset_tick = tick;
        }
        log::debug!("Enabled {} (offset {}, kept: {})", id, track.offset_tick, keep_offset);
        Ok(())
    }

    /// Deactivate a track and silence its sink. Schedule, offset and cursor
    /// are left as they are.
    pub fn disable_track(&mut self, id: TrackId) -> Result<()> {
        let track = self.track_mut(id)?;
        if track.active {
            track.sink.all_notes_off();
        }
        track.active = false;
        log::debug!("Disabled {}", id);
        Ok(())
    }

    /// Install a track's schedule for playback.
    ///
    /// This is the only way playback sees schedule changes; tick positions
    /// are derived here from the schedule's current tempo and loop length.
    /// The cursor moves to the first new event after the last played tick.
    pub fn post_schedule(&mut self, id: TrackId, schedule: &TrackSchedule) -> Result<()> {
        let tick_rate = self.tick_rate();
        let track = self.track_mut(id)?;
        let ticks = schedule.to_ticks(tick_rate);
        track.cursor.seek(&ticks);
        log::debug!(
            "Posted schedule for {}: {} events, {} ticks per loop",
            id,
            ticks.events().len(),
            ticks.ticks_per_loop()
        );
        track.schedule = Some(ticks);
        Ok(())
    }

    pub fn reset_track_offset(&mut self, id: TrackId) -> Result<()> {
        self.reset_track_offset_at(id, Instant::now())
    }

    /// Move a track's loop zero to `now` without touching its activity or
    /// cursor. Starts the tick source if needed so recording can timestamp.
    pub fn reset_track_offset_at(&mut self, id: TrackId, now: Instant) -> Result<()> {
        self.track(id)?;
        self.ticks.start_at(now);
        let tick = self.ticks.current_tick_at(now)?;
        self.track_mut(id)?.offset_tick = tick;
        Ok(())
    }

    pub fn sync_track_starts(&mut self) -> Result<()> {
        self.sync_track_starts_at(Instant::now())
    }

    /// Put every track's loop zero at the same tick.
    pub fn sync_track_starts_at(&mut self, now: Instant) -> Result<()> {
        let tick = self.ticks.current_tick_at(now)?;
        for track in &mut self.tracks {
            track.offset_tick = tick;
        }
        log::info!("Synced all track starts to tick {}", tick);
        Ok(())
    }

    /// Copy `reference`'s loop zero to `target`.
    pub fn sync(&mut self, target: TrackId, reference: TrackId) -> Result<()> {
        let offset = self.track(reference)?.offset_tick;
        self.track_mut(target)?.offset_tick = offset;
        log::debug!("Synced {} phase to {}", target, reference);
        Ok(())
    }

    pub fn get_current_beat(&self, id: TrackId, bpm: u32, beats_per_loop: u32) -> Result<f64> {
        self.get_current_beat_at(id, bpm, beats_per_loop, Instant::now())
    }

    /// Musical position of a track at `now`, in `0..beats_per_loop`.
    pub fn get_current_beat_at(
        &self,
        id: TrackId,
        bpm: u32,
        beats_per_loop: u32,
        now: Instant,
    ) -> Result<f64> {
        let offset = self.track(id)?.offset_tick;
        let elapsed = self.ticks.current_tick_at(now)? - offset;
        let beat = self.ticks_to_beats(elapsed, bpm);
        Ok(beat.rem_euclid(beats_per_loop.max(1) as f64))
    }

    /// Beats elapsed since a track's loop zero, without wrapping.
    pub fn beats_since_offset_at(&self, id: TrackId, bpm: u32, now: Instant) -> Result<f64> {
        let offset = self.track(id)?.offset_tick;
        let elapsed = self.ticks.current_tick_at(now)? - offset;
        Ok(self.ticks_to_beats(elapsed, bpm))
    }

    fn ticks_to_beats(&self, ticks: i64, bpm: u32) -> f64 {
        ticks as f64 * bpm as f64 / (self.tick_rate() as f64 * SECONDS_PER_MINUTE)
    }

    /// Send a note straight to a track's sink (live monitoring).
    pub fn monitor(&mut self, id: TrackId, pitch: i32, turn_on: bool) -> Result<()> {
        self.track_mut(id)?.sink.note(pitch, turn_on);
        Ok(())
    }

    pub fn configure_sink(&mut self, id: TrackId, settings: &SynthSettings) -> Result<()> {
        self.track_mut(id)?.sink.configure(settings);
        Ok(())
    }

    pub fn on_update(&mut self) {
        self.on_update_at(Instant::now());
    }

    /// Dispatch everything that became due on every active track.
    pub fn on_update_at(&mut self, now: Instant) {
        let Ok(tick) = self.ticks.current_tick_at(now) else {
            return;
        };

        for (idx, track) in self.tracks.iter_mut().enumerate() {
            if !track.active {
                continue;
            }
            let Some(schedule) = &track.schedule else {
                continue;
            };

            let local_tick = schedule.local_tick(tick - track.offset_tick);
            let commands = track.cursor.advance(local_tick, schedule);
            for command in commands {
                log::trace!(
                    "{} local tick {}: note {} {}",
                    TrackId(idx),
                    local_tick,
                    command.pitch,
                    if command.on { "on" } else { "off" }
                );
                track.sink.note(command.pitch, command.on);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::ScheduleEvent;
    use crate::sink::{MemorySink, SinkEvent};
    use crate::tick::instant_for_tick;

    const RATE: u32 = 1024;

    fn make_clock(tracks: usize) -> (Clock, Vec<MemorySink>) {
        let sinks: Vec<MemorySink> = (0..tracks).map(|_| MemorySink::new()).collect();
        let boxed = sinks
            .iter()
            .map(|s| Box::new(s.clone()) as Box<dyn NoteSink>)
            .collect();
        (Clock::new(RATE, boxed), sinks)
    }

    fn one_note_schedule() -> TrackSchedule {
        TrackSchedule::with_events(60, 4, vec![ScheduleEvent::on(0.0, 60), ScheduleEvent::off(1.0, 60)])
            .unwrap()
    }

    #[test]
    fn test_unstarted_clock() {
        let (mut clock, sinks) = make_clock(1);
        assert!(!clock.is_started());
        assert_eq!(clock.current_tick(), Err(LooperError::NotStarted));
        assert_eq!(clock.get_current_beat(TrackId(0), 60, 4), Err(LooperError::NotStarted));
        assert_eq!(clock.sync_track_starts(), Err(LooperError::NotStarted));

        // Updating an unstarted clock does nothing
        clock.on_update();
        assert!(sinks[0].events().is_empty());
    }

    #[test]
    fn test_unknown_track() {
        let (mut clock, _) = make_clock(2);
        let bad = TrackId(2);
        assert_eq!(clock.enable_track(bad, false), Err(LooperError::UnknownTrack(bad)));
        assert_eq!(clock.disable_track(bad), Err(LooperError::UnknownTrack(bad)));
        assert_eq!(
            clock.post_schedule(bad, &TrackSchedule::default()),
            Err(LooperError::UnknownTrack(bad))
        );
        assert_eq!(clock.sync(bad, TrackId(0)), Err(LooperError::UnknownTrack(bad)));
        assert_eq!(clock.sync(TrackId(0), bad), Err(LooperError::UnknownTrack(bad)));
        // A failed enable must not start the tick source
        assert!(!clock.is_started());
    }

    #[test]
    fn test_enable_starts_tick_source() {
        let (mut clock, _) = make_clock(1);
        let epoch = Instant::now();
        clock.enable_track_at(TrackId(0), false, epoch).unwrap();

        assert!(clock.is_started());
        assert!(clock.is_active(TrackId(0)).unwrap());
        assert_eq!(clock.offset(TrackId(0)), Ok(0));
    }

    #[test]
    fn test_scenario_dispatch() {
        let (mut clock, sinks) = make_clock(1);
        let epoch = Instant::now();
        let id = TrackId(0);

        clock.post_schedule(id, &one_note_schedule()).unwrap();
        clock.enable_track_at(id, false, epoch).unwrap();
        assert_eq!(clock.posted_schedule(id).unwrap().unwrap().ticks_per_loop(), 4096);

        clock.on_update_at(instant_for_tick(epoch, RATE, 0));
        assert_eq!(sinks[0].take_notes(), vec![(60, true)]);
        clock.on_update_at(instant_for_tick(epoch, RATE, 512));
        assert!(sinks[0].take_notes().is_empty());
        clock.on_update_at(instant_for_tick(epoch, RATE, 1024));
        assert_eq!(sinks[0].take_notes(), vec![(60, false)]);
        clock.on_update_at(instant_for_tick(epoch, RATE, 1536));
        assert!(sinks[0].take_notes().is_empty());

        for tick in (2048..4096).step_by(256) {
            clock.on_update_at(instant_for_tick(epoch, RATE, tick));
        }
        assert!(sinks[0].take_notes().is_empty());

        clock.on_update_at(instant_for_tick(epoch, RATE, 4096));
        assert_eq!(sinks[0].take_notes(), vec![(60, true)]);
        clock.on_update_at(instant_for_tick(epoch, RATE, 5120));
        assert_eq!(sinks[0].take_notes(), vec![(60, false)]);
    }

    #[test]
    fn test_inactive_track_not_dispatched() {
        let (mut clock, sinks) = make_clock(2);
        let epoch = Instant::now();

        clock.post_schedule(TrackId(0), &one_note_schedule()).unwrap();
        clock.post_schedule(TrackId(1), &one_note_schedule()).unwrap();
        clock.enable_track_at(TrackId(0), false, epoch).unwrap();

        clock.on_update_at(instant_for_tick(epoch, RATE, 10));
        assert_eq!(sinks[0].notes(), vec![(60, true)]);
        assert!(sinks[1].notes().is_empty());
    }

    #[test]
    fn test_active_without_schedule_is_skipped() {
        let (mut clock, sinks) = make_clock(1);
        let epoch = Instant::now();
        clock.enable_track_at(TrackId(0), false, epoch).unwrap();
        clock.on_update_at(instant_for_tick(epoch, RATE, 100));
        assert!(sinks[0].events().is_empty());
    }

    #[test]
    fn test_disable_keeps_state_and_silences() {
        let (mut clock, sinks) = make_clock(1);
        let epoch = Instant::now();
        let id = TrackId(0);

        clock.post_schedule(id, &one_note_schedule()).unwrap();
        clock.enable_track_at(id, false, instant_for_tick(epoch, RATE, 0)).unwrap();
        clock.enable_track_at(id, false, instant_for_tick(epoch, RATE, 100)).unwrap();
        let offset = clock.offset(id).unwrap();

        clock.disable_track(id).unwrap();
        assert!(!clock.is_active(id).unwrap());
        assert_eq!(clock.offset(id), Ok(offset));
        assert!(clock.posted_schedule(id).unwrap().is_some());
        assert_eq!(sinks[0].events(), vec![SinkEvent::AllNotesOff]);

        clock.on_update_at(instant_for_tick(epoch, RATE, 200));
        assert!(sinks[0].notes().is_empty());
    }

    #[test]
    fn test_enable_keep_offset() {
        let (mut clock, _) = make_clock(1);
        let epoch = Instant::now();
        let id = TrackId(0);

        clock.reset_track_offset_at(id, instant_for_tick(epoch, RATE, 0)).unwrap();
        clock.reset_track_offset_at(id, instant_for_tick(epoch, RATE, 300)).unwrap();
        clock.enable_track_at(id, true, instant_for_tick(epoch, RATE, 900)).unwrap();
        assert_eq!(clock.offset(id), Ok(300));

        clock.enable_track_at(id, false, instant_for_tick(epoch, RATE, 1000)).unwrap();
        assert_eq!(clock.offset(id), Ok(1000));
    }

    #[test]
    fn test_reset_offset_leaves_activity() {
        let (mut clock, _) = make_clock(1);
        let epoch = Instant::now();
        let id = TrackId(0);

        clock.reset_track_offset_at(id, epoch).unwrap();
        assert!(clock.is_started());
        assert!(!clock.is_active(id).unwrap());
    }

    #[test]
    fn test_sync_track_starts_aligns_beats() {
        let (mut clock, _) = make_clock(3);
        let epoch = Instant::now();

        clock.enable_track_at(TrackId(0), false, instant_for_tick(epoch, RATE, 0)).unwrap();
        clock.enable_track_at(TrackId(1), false, instant_for_tick(epoch, RATE, 777)).unwrap();
        clock.enable_track_at(TrackId(2), false, instant_for_tick(epoch, RATE, 5000)).unwrap();

        let now = instant_for_tick(epoch, RATE, 9000);
        clock.sync_track_starts_at(now).unwrap();

        let timings = [(60, 4), (90, 7), (133, 16)];
        for (idx, (bpm, bpl)) in timings.iter().enumerate() {
            let beat = clock.get_current_beat_at(TrackId(idx), *bpm, *bpl, now).unwrap();
            assert_eq!(beat, 0.0);
        }
    }

    #[test]
    fn test_sync_copies_offset() {
        let (mut clock, _) = make_clock(2);
        let epoch = Instant::now();
        clock.tick_source().start_at(epoch);

        clock.enable_track_at(TrackId(0), false, instant_for_tick(epoch, RATE, 123)).unwrap();
        clock.enable_track_at(TrackId(1), false, instant_for_tick(epoch, RATE, 456)).unwrap();
        clock.sync(TrackId(1), TrackId(0)).unwrap();

        assert_eq!(clock.offset(TrackId(1)), Ok(123));
        assert_eq!(clock.offset(TrackId(0)), Ok(123));
    }

    #[test]
    fn test_current_beat() {
        let (mut clock, _) = make_clock(1);
        let epoch = Instant::now();
        let id = TrackId(0);
        clock.reset_track_offset_at(id, epoch).unwrap();

        // 1024 ticks at 60 bpm = 1 beat
        let beat = clock.get_current_beat_at(id, 60, 4, instant_for_tick(epoch, RATE, 1536)).unwrap();
        assert_eq!(beat, 1.5);
        // Wraps at the loop length
        let beat = clock.get_current_beat_at(id, 60, 4, instant_for_tick(epoch, RATE, 5120)).unwrap();
        assert_eq!(beat, 1.0);
        // Tempo scales position
        let beat = clock.get_current_beat_at(id, 120, 4, instant_for_tick(epoch, RATE, 1024)).unwrap();
        assert_eq!(beat, 2.0);
    }

    #[test]
    fn test_tracks_keep_their_own_phase() {
        let (mut clock, sinks) = make_clock(2);
        let epoch = Instant::now();

        clock.post_schedule(TrackId(0), &one_note_schedule()).unwrap();
        clock.post_schedule(TrackId(1), &one_note_schedule()).unwrap();
        clock.enable_track_at(TrackId(0), false, instant_for_tick(epoch, RATE, 0)).unwrap();
        clock.enable_track_at(TrackId(1), false, instant_for_tick(epoch, RATE, 2048)).unwrap();

        for tick in (0..6144).step_by(128) {
            clock.on_update_at(instant_for_tick(epoch, RATE, tick));
            if tick == 1024 {
                assert_eq!(sinks[0].notes(), vec![(60, true), (60, false)]);
                assert!(sinks[1].notes().is_empty());
            }
        }
        // Track 1 started half a loop later: one full note so far
        assert_eq!(sinks[1].notes(), vec![(60, true), (60, false)]);
    }

    #[test]
    fn test_post_schedule_replaces_playback() {
        let (mut clock, sinks) = make_clock(1);
        let epoch = Instant::now();
        let id = TrackId(0);

        clock.post_schedule(id, &one_note_schedule()).unwrap();
        clock.enable_track_at(id, false, epoch).unwrap();
        clock.on_update_at(instant_for_tick(epoch, RATE, 0));
        clock.on_update_at(instant_for_tick(epoch, RATE, 1100));
        sinks[0].clear();

        let changed =
            TrackSchedule::with_events(60, 4, vec![ScheduleEvent::on(2.0, 72), ScheduleEvent::off(3.0, 72)])
                .unwrap();
        clock.post_schedule(id, &changed).unwrap();
        clock.on_update_at(instant_for_tick(epoch, RATE, 3500));
        // Both new events lie ahead of tick 1100 and fall due in one update
        assert!(sinks[0].notes().is_empty());
        clock.on_update_at(instant_for_tick(epoch, RATE, 4200));
        clock.on_update_at(instant_for_tick(epoch, RATE, 6200));
        assert_eq!(sinks[0].notes(), vec![(72, true)]);
    }

    #[test]
    fn test_new_content_behind_cursor_waits_for_next_loop() {
        let (mut clock, sinks) = make_clock(1);
        let epoch = Instant::now();
        let id = TrackId(0);

        clock.post_schedule(id, &one_note_schedule()).unwrap();
        clock.enable_track_at(id, false, epoch).unwrap();
        clock.on_update_at(instant_for_tick(epoch, RATE, 0));
        clock.on_update_at(instant_for_tick(epoch, RATE, 2000));
        sinks[0].clear();

        let changed = TrackSchedule::with_events(
            60,
            4,
            vec![
                ScheduleEvent::on(0.25, 70),
                ScheduleEvent::on(0.5, 71),
                ScheduleEvent::on(0.75, 72),
                ScheduleEvent::on(2.5, 74),
            ],
        )
        .unwrap();
        clock.post_schedule(id, &changed).unwrap();

        clock.on_update_at(instant_for_tick(epoch, RATE, 2100));
        assert!(sinks[0].notes().is_empty());
        clock.on_update_at(instant_for_tick(epoch, RATE, 2600));
        assert_eq!(sinks[0].take_notes(), vec![(74, true)]);

        // The skipped events play on the next pass
        clock.on_update_at(instant_for_tick(epoch, RATE, 4100));
        clock.on_update_at(instant_for_tick(epoch, RATE, 4900));
        assert_eq!(sinks[0].take_notes(), vec![(70, true), (71, true), (72, true)]);
    }

    #[test]
    fn test_monitor_and_configure_reach_sink() {
        let (mut clock, sinks) = make_clock(1);
        let settings = SynthSettings {
            program: 5,
            midi_offset: 48,
            volume: 100,
        };
        clock.configure_sink(TrackId(0), &settings).unwrap();
        clock.monitor(TrackId(0), 3, true).unwrap();
        assert_eq!(
            sinks[0].events(),
            vec![SinkEvent::Configure(settings), SinkEvent::Note { pitch: 3, on: true }]
        );
    }
}
