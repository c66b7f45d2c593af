//! Note command sinks.
//!
//! The looper never synthesizes sound. Each track hands its note commands to
//! a [`NoteSink`]; the binary wires these to MIDI output.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::track::SynthSettings;

/// Receiver of one track's note commands.
///
/// Calls are fire-and-forget: a sink that fails to deliver deals with that
/// itself.
pub trait NoteSink: Send {
    fn note(&mut self, pitch: i32, turn_on: bool);

    /// Silence every note this sink has sounding.
    fn all_notes_off(&mut self) {}

    /// Apply per-track synth settings (instrument, pitch offset, volume).
    fn configure(&mut self, _settings: &SynthSettings) {}
}

/// Sink that writes every command to the log.
pub struct LogSink {
    label: String,
}

impl LogSink {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into() }
    }
}

impl NoteSink for LogSink {
    fn note(&mut self, pitch: i32, turn_on: bool) {
        log::info!("{}: note {} {}", self.label, pitch, if turn_on { "on" } else { "off" });
    }

    fn all_notes_off(&mut self) {
        log::info!("{}: all notes off", self.label);
    }
}

/// Something a [`MemorySink`] was asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Note { pitch: i32, on: bool },
    AllNotesOff,
    Configure(SynthSettings),
}

/// Sink that keeps every command in a shared list.
///
/// Clones share the same list, so a test can hand one clone to the clock and
/// inspect the other.
#[derive(Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<SinkEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().clone()
    }

    /// Only the note commands, as `(pitch, on)` pairs.
    pub fn notes(&self) -> Vec<(i32, bool)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Note { pitch, on } => Some((*pitch, *on)),
                _ => None,
            })
            .collect()
    }

    /// Remove and return the recorded note commands.
    pub fn take_notes(&self) -> Vec<(i32, bool)> {
        let notes = self.notes();
        self.events.lock().clear();
        notes
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl NoteSink for MemorySink {
    fn note(&mut self, pitch: i32, turn_on: bool) {
        self.events.lock().push(SinkEvent::Note { pitch, on: turn_on });
    }

    fn all_notes_off(&mut self) {
        self.events.lock().push(SinkEvent::AllNotesOff);
    }

    fn configure(&mut self, settings: &SynthSettings) {
        self.events.lock().push(SinkEvent::Configure(settings.clone()));
    }
}
