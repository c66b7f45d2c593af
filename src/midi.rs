//! MIDI protocol constants and hardware I/O.
//!
//! Track output goes through [`MidiNoteSink`], which turns looper pitches
//! into channel messages on a shared [`MidiOut`] connection. Keyboard input
//! is parsed into note events and offered to every track of a [`Session`].

use std::sync::Arc;

use anyhow::{anyhow, Context};
use midir::{MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use parking_lot::Mutex;

use crate::session::Session;
use crate::sink::NoteSink;
use crate::track::SynthSettings;

/// Note Off (channel in the low nibble)
pub const NOTE_OFF: u8 = 0x80;

/// Note On; velocity 0 also means note off
pub const NOTE_ON: u8 = 0x90;

/// Control Change
pub const CONTROL_CHANGE: u8 = 0xB0;

/// Program Change
pub const PROGRAM_CHANGE: u8 = 0xC0;

/// Controller number of the All Notes Off channel mode message
pub const ALL_NOTES_OFF_CC: u8 = 123;

const MAX_DATA: i32 = 0x7F;

/// Pick a port: the first whose name contains `filter`, otherwise the IAC
/// Driver, otherwise the first port.
pub fn select_port(names: &[String], filter: Option<&str>) -> Option<usize> {
    if names.is_empty() {
        return None;
    }
    filter
        .and_then(|f| names.iter().position(|n| n.contains(f)))
        .or_else(|| names.iter().position(|n| n.contains("IAC")))
        .or(Some(0))
}

/// Channel byte (1-16 in, 0-15 out).
fn channel_nibble(channel: u8) -> u8 {
    channel.clamp(1, 16) - 1
}

/// Note on/off message, or `None` if the note is outside 0-127.
pub fn note_message(channel: u8, note: i32, velocity: u8, turn_on: bool) -> Option<[u8; 3]> {
    if !(0..=MAX_DATA).contains(&note) {
        return None;
    }
    let status = if turn_on { NOTE_ON } else { NOTE_OFF };
    Some([status | channel_nibble(channel), note as u8, velocity.min(0x7F)])
}

/// Decode a note message into (note, on). Note On with velocity 0 is an off.
pub fn parse_note(message: &[u8]) -> Option<(u8, bool)> {
    let &[status, note, velocity, ..] = message else {
        return None;
    };
    match status & 0xF0 {
        NOTE_ON => Some((note, velocity > 0)),
        NOTE_OFF => Some((note, false)),
        _ => None,
    }
}

/// Wrapper for MIDI output connection.
pub struct MidiOut {
    connection: MidiOutputConnection,
    pub port_name: String,
}

impl MidiOut {
    /// Connect to the output port matching `filter`, preferring IAC Driver on macOS.
    pub fn new(filter: Option<&str>) -> anyhow::Result<Self> {
        let midi_out = MidiOutput::new("looper-out").context("Failed to create MIDI output")?;

        let ports = midi_out.ports();
        let names: Vec<String> = ports
            .iter()
            .map(|p| midi_out.port_name(p).unwrap_or_else(|_| "Unknown".to_string()))
            .collect();
        let port_idx = select_port(&names, filter).ok_or_else(|| anyhow!("No MIDI output ports found"))?;
        let port_name = names[port_idx].clone();

        let connection = midi_out
            .connect(&ports[port_idx], "looper-out")
            .map_err(|e| anyhow!("Failed to connect MIDI output {}: {}", port_name, e))?;

        log::info!("MIDI output connected to: {}", port_name);
        Ok(Self {
            connection,
            port_name,
        })
    }

    /// Send a MIDI message.
    pub fn send(&mut self, message: &[u8]) -> anyhow::Result<()> {
        self.connection
            .send(message)
            .map_err(|e| anyhow!("Failed to send MIDI to {}: {}", self.port_name, e))
    }
}

pub type SharedMidiOut = Arc<Mutex<MidiOut>>;

/// Plays one track on one MIDI channel of a shared output.
pub struct MidiNoteSink {
    out: SharedMidiOut,
    channel: u8,
    settings: SynthSettings,
}

impl MidiNoteSink {
    pub fn new(out: SharedMidiOut, channel: u8) -> Self {
        Self {
            out,
            channel,
            settings: SynthSettings::default(),
        }
    }

    fn send(&self, message: &[u8]) {
        if let Err(e) = self.out.lock().send(message) {
            log::warn!("{}", e);
        }
    }
}

impl NoteSink for MidiNoteSink {
    fn note(&mut self, pitch: i32, turn_on: bool) {
        let note = pitch.saturating_add(self.settings.midi_offset);
        match note_message(self.channel, note, self.settings.volume, turn_on) {
            Some(message) => self.send(&message),
            None => log::debug!("Note {} out of MIDI range on channel {}", note, self.channel),
        }
    }

    fn all_notes_off(&mut self) {
        self.send(&[CONTROL_CHANGE | channel_nibble(self.channel), ALL_NOTES_OFF_CC, 0]);
    }

    fn configure(&mut self, settings: &SynthSettings) {
        self.settings = settings.clone();
        let program = settings.program.min(MAX_DATA as u32) as u8;
        self.send(&[PROGRAM_CHANGE | channel_nibble(self.channel), program]);
    }
}

/// Listen to a MIDI keyboard and feed its notes to the session.
///
/// `base_note` is the incoming note that records as pitch 0. The returned
/// connection must be kept alive for as long as input is wanted.
pub fn connect_input(
    filter: Option<&str>,
    base_note: u8,
    session: Session,
) -> anyhow::Result<MidiInputConnection<()>> {
    let midi_in = MidiInput::new("looper-in").context("Failed to create MIDI input")?;

    let ports = midi_in.ports();
    let names: Vec<String> = ports
        .iter()
        .map(|p| midi_in.port_name(p).unwrap_or_else(|_| "Unknown".to_string()))
        .collect();
    let port_idx = select_port(&names, filter).ok_or_else(|| anyhow!("No MIDI input ports found"))?;
    let port_name = names[port_idx].clone();

    let connection = midi_in
        .connect(
            &ports[port_idx],
            "looper-in",
            move |_timestamp, message, _| {
                if let Some((note, turn_on)) = parse_note(message) {
                    session.key_event(note as i32 - base_note as i32, turn_on);
                }
            },
            (),
        )
        .map_err(|e| anyhow!("Failed to connect MIDI input {}: {}", port_name, e))?;

    log::info!("MIDI input connected to: {}", port_name);
    Ok(connection)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_select_port() {
        let ports = names(&["USB Keys", "IAC Driver Bus 1", "Synth"]);
        assert_eq!(select_port(&ports, Some("Synth")), Some(2));
        assert_eq!(select_port(&ports, None), Some(1));
        assert_eq!(select_port(&ports, Some("missing")), Some(1));
        assert_eq!(select_port(&names(&["A", "B"]), None), Some(0));
        assert_eq!(select_port(&[], None), None);
    }

    #[test]
    fn test_note_message() {
        assert_eq!(note_message(1, 60, 100, true), Some([0x90, 60, 100]));
        assert_eq!(note_message(10, 60, 0, false), Some([0x89, 60, 0]));
        assert_eq!(note_message(1, 128, 100, true), None);
        assert_eq!(note_message(1, -1, 100, true), None);
        // Velocity is 7-bit
        assert_eq!(note_message(1, 0, 200, true), Some([0x90, 0, 0x7F]));
    }

    #[test]
    fn test_parse_note() {
        assert_eq!(parse_note(&[0x90, 64, 90]), Some((64, true)));
        assert_eq!(parse_note(&[0x93, 64, 0]), Some((64, false)));
        assert_eq!(parse_note(&[0x80, 64, 40]), Some((64, false)));
        assert_eq!(parse_note(&[0xB0, 123, 0]), None);
        assert_eq!(parse_note(&[0xF8]), None);
    }
}
