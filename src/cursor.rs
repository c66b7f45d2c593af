//! Per-track playback cursor.
//!
//! Each clock update hands the cursor the track's current loop-relative tick.
//! The cursor works out which events of the [`TickSchedule`] became due since
//! the previous update and returns the note commands to send, in order.
//!
//! An update runs in two strictly sequential phases:
//!
//! 1. **Wraparound.** If the local tick went backwards the loop wrapped. Every
//!    note-off still ahead of the cursor is sent so no note is left hanging;
//!    note-ons still ahead are dropped. The cursor returns to the first event.
//! 2. **Forward scan.** Events up to and including the local tick are
//!    consumed. Note-offs go out immediately, note-ons are held back until the
//!    scan ends. A note-off that finds a held note-on of the same pitch cancels
//!    it and is not sent itself, so a note that starts and ends inside one
//!    update makes no sound and sends nothing.

use crate::schedule::TickSchedule;

/// A note command produced by playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteCommand {
    pub pitch: i32,
    pub on: bool,
}

impl NoteCommand {
    pub fn on(pitch: i32) -> Self {
        Self { pitch, on: true }
    }

    pub fn off(pitch: i32) -> Self {
        Self { pitch, on: false }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackCursor {
    /// Index of the next event not yet dispatched this loop
    next_event_idx: usize,
    /// Local tick seen by the previous update, `None` until the first one
    prev_local_tick: Option<i64>,
}

impl PlaybackCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewind to the start of the loop.
    pub fn reset(&mut self) {
        self.next_event_idx = 0;
        self.prev_local_tick = None;
    }

    pub fn next_event_idx(&self) -> usize {
        self.next_event_idx
    }

    pub fn prev_local_tick(&self) -> Option<i64> {
        self.prev_local_tick
    }

    /// Position the cursor in a newly posted schedule: events at or before
    /// the last local tick count as already played this loop.
    pub fn seek(&mut self, schedule: &TickSchedule) {
        self.next_event_idx = match self.prev_local_tick {
            Some(prev) => schedule.events().partition_point(|e| e.tick <= prev),
            None => 0,
        };
    }

    /// Advance to `local_tick` and return the commands that became due.
    pub fn advance(&mut self, local_tick: i64, schedule: &TickSchedule) -> Vec<NoteCommand> {
        let events = schedule.events();
        let mut commands = Vec::new();

        if self.prev_local_tick.is_some_and(|prev| local_tick < prev) {
            let pending = events.get(self.next_event_idx..).unwrap_or_default();
            commands.extend(
                pending
                    .iter()
                    .filter(|e| !e.is_on)
                    .map(|e| NoteCommand::off(e.pitch)),
            );
            self.next_event_idx = 0;
        }

        let mut held_ons: Vec<i32> = Vec::new();
        while let Some(event) = events.get(self.next_event_idx) {
            if event.tick > local_tick {
                break;
            }
            if event.is_on {
                held_ons.push(event.pitch);
            } else if let Some(pos) = held_ons.iter().rposition(|&p| p == event.pitch) {
                held_ons.remove(pos);
            } else {
                commands.push(NoteCommand::off(event.pitch));
            }
            self.next_event_idx += 1;
        }
        commands.extend(held_ons.into_iter().map(NoteCommand::on));

        self.prev_local_tick = Some(local_tick);
        commands
    }
}
