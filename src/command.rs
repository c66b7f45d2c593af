//! Line commands accepted by the headless driver.
//!
//! Track numbers are 1-based on the command line and converted to
//! [`TrackId`]s here.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context};

use crate::track::{TrackId, TrackMode};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Mode(TrackId, TrackMode),
    Bpm(TrackId, u32),
    BeatsPerLoop(TrackId, u32),
    Quantize(TrackId, Option<u32>),
    Follow(TrackId, TrackId),
    Unfollow(TrackId),
    Sync,
    Status,
    /// Save the session; no path means a timestamped file name
    Save(Option<PathBuf>),
    Load(PathBuf),
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  rec N            record track N (clears it)
  play N           play track N
  off N            disable track N
  bpm N V          set track N tempo
  bpl N V          set track N beats per loop
  quantize N V|off quantize track N recording to V steps per beat
  follow N M       track N mirrors track M's timing
  unfollow N       stop following
  sync             restart every track's loop now
  status           show all tracks
  save [PATH]      save the session
  load PATH        load a session
  quit";

fn track_arg(arg: Option<&str>) -> anyhow::Result<TrackId> {
    let arg = arg.ok_or_else(|| anyhow!("missing track number"))?;
    let number: usize = arg
        .parse()
        .with_context(|| format!("bad track number '{}'", arg))?;
    if number == 0 {
        bail!("track numbers start at 1");
    }
    Ok(TrackId(number - 1))
}

fn value_arg(arg: Option<&str>) -> anyhow::Result<u32> {
    let arg = arg.ok_or_else(|| anyhow!("missing value"))?;
    arg.parse().with_context(|| format!("bad value '{}'", arg))
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> anyhow::Result<Self> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            bail!("empty command");
        };

        let command = match name.to_ascii_lowercase().as_str() {
            "rec" | "record" => Command::Mode(track_arg(words.next())?, TrackMode::Recording),
            "play" => Command::Mode(track_arg(words.next())?, TrackMode::Playing),
            "off" | "disable" => Command::Mode(track_arg(words.next())?, TrackMode::Disabled),
            "bpm" => Command::Bpm(track_arg(words.next())?, value_arg(words.next())?),
            "bpl" => Command::BeatsPerLoop(track_arg(words.next())?, value_arg(words.next())?),
            "quantize" | "q" => {
                let id = track_arg(words.next())?;
                match words.next() {
                    Some("off") => Command::Quantize(id, None),
                    arg => Command::Quantize(id, Some(value_arg(arg)?)),
                }
            }
            "follow" => Command::Follow(track_arg(words.next())?, track_arg(words.next())?),
            "unfollow" => Command::Unfollow(track_arg(words.next())?),
            "sync" => Command::Sync,
            "status" | "s" => Command::Status,
            "save" => Command::Save(words.next().map(PathBuf::from)),
            "load" => Command::Load(
                words
                    .next()
                    .map(PathBuf::from)
                    .ok_or_else(|| anyhow!("missing file path"))?,
            ),
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => bail!("unknown command '{}'", other),
        };
        Ok(command)
    }
}
