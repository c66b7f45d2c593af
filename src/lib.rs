//! Multi-track live looping sequencer core.
//!
//! Tracks record notes against their own loop and play them back from a
//! shared tick clock. See [`session::Session`] for the entry point.

pub mod clock;
pub mod command;
pub mod config;
pub mod cursor;
pub mod error;
pub mod metronome;
pub mod midi;
pub mod persist;
pub mod schedule;
pub mod session;
pub mod sink;
pub mod tick;
pub mod track;

pub use clock::Clock;
pub use error::{LooperError, Result};
pub use schedule::{ScheduleEvent, TrackSchedule};
pub use session::{Session, SessionState};
pub use sink::NoteSink;
pub use tick::TickSource;
pub use track::{SynthSettings, Track, TrackId, TrackMode};
