//! Headless looper: plays tracks to MIDI, records from a MIDI keyboard and
//! takes commands on stdin.

mod logging;

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use log::LevelFilter;
use parking_lot::Mutex;

use tickloop::command::{Command, HELP};
use tickloop::config::LooperConfig;
use tickloop::metronome::Metronome;
use tickloop::midi::{self, MidiNoteSink, MidiOut, SharedMidiOut};
use tickloop::persist::SessionFile;
use tickloop::session::{Session, SessionState, TrackStatus};
use tickloop::sink::{LogSink, NoteSink};
use tickloop::{SynthSettings, TrackId, TrackMode};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (YAML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of tracks, overriding the config
    #[arg(long)]
    tracks: Option<usize>,

    /// Session file to load at startup
    #[arg(long)]
    session: Option<PathBuf>,

    /// Log notes instead of opening MIDI ports
    #[arg(long)]
    no_midi: bool,

    #[arg(long, default_value = "info")]
    log_level: LevelFilter,

    /// Also write a debug log to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init_logger(args.log_level, args.log_file.as_deref())?;
    log::info!("Looper starting");

    let config_path = args.config.clone().unwrap_or_else(LooperConfig::default_path);
    let mut config = LooperConfig::load(&config_path)?;
    if let Some(tracks) = args.tracks {
        config.track_count = tracks;
    }
    if config.track_count == 0 {
        bail!("At least one track is required");
    }

    let midi_out = if args.no_midi {
        None
    } else {
        match MidiOut::new(config.output_device.as_deref()) {
            Ok(out) => Some(Arc::new(Mutex::new(out))),
            Err(e) => {
                log::warn!("{:#}; logging notes instead", e);
                None
            }
        }
    };

    let mut state = SessionState::new(config.tick_rate, build_sinks(&config, midi_out.as_ref()));
    if let Some(metronome) = &config.metronome {
        let sink: Box<dyn NoteSink> = match &midi_out {
            Some(out) => {
                let mut sink = MidiNoteSink::new(out.clone(), metronome.channel);
                sink.configure(&SynthSettings {
                    program: 0,
                    midi_offset: 0,
                    volume: 100,
                });
                Box::new(sink)
            }
            None => Box::new(LogSink::new("metronome")),
        };
        state.set_metronome(Some(Metronome::new(
            metronome.track_id(),
            metronome.bpm,
            metronome.pitch as i32,
            sink,
        )));
    }
    if let Some(path) = &args.session {
        let loaded = state.load_session(&SessionFile::load(path)?)?;
        log::info!("Loaded {} tracks from {}", loaded, path.display());
    }

    let session = Session::from_state(state);

    let _input = if args.no_midi {
        None
    } else {
        match midi::connect_input(config.input_device.as_deref(), config.input_base_note, session.clone()) {
            Ok(connection) => Some(connection),
            Err(e) => {
                log::warn!("{:#}; no keyboard input", e);
                None
            }
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    let updater = {
        let session = session.clone();
        let running = running.clone();
        let period = Duration::from_millis(config.update_interval_ms.max(1));
        thread::spawn(move || {
            while running.load(Ordering::Relaxed) {
                session.on_update();
                thread::sleep(period);
            }
        })
    };

    println!("{}", HELP);
    for line in io::stdin().lock().lines() {
        let line = line.context("Failed to read stdin")?;
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<Command>() {
            Ok(Command::Quit) => break,
            Ok(command) => {
                if let Err(e) = run_command(&session, command) {
                    println!("error: {:#}", e);
                }
            }
            Err(e) => println!("{:#}", e),
        }
    }

    running.store(false, Ordering::Relaxed);
    updater.join().map_err(|_| anyhow!("Update thread panicked"))?;

    let mut state = session.lock();
    for idx in 0..state.track_count() {
        state.set_mode(TrackId(idx), TrackMode::Disabled)?;
    }
    state.set_metronome(None);
    log::info!("Looper stopped");
    Ok(())
}

fn build_sinks(config: &LooperConfig, midi_out: Option<&SharedMidiOut>) -> Vec<Box<dyn NoteSink>> {
    (0..config.track_count)
        .map(|idx| {
            let id = TrackId(idx);
            match midi_out {
                Some(out) => {
                    let channel = config.track_output(id).channel;
                    Box::new(MidiNoteSink::new(out.clone(), channel)) as Box<dyn NoteSink>
                }
                None => Box::new(LogSink::new(id.to_string())),
            }
        })
        .collect()
}

fn run_command(session: &Session, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Mode(id, mode) => session.set_mode(id, mode)?,
        Command::Bpm(id, bpm) => session.lock().set_bpm(id, bpm)?,
        Command::BeatsPerLoop(id, beats) => session.lock().set_beats_per_loop(id, beats)?,
        Command::Quantize(id, subdivisions) => session.lock().set_quantize(id, subdivisions)?,
        Command::Follow(id, reference) => session.lock().follow(id, reference)?,
        Command::Unfollow(id) => session.lock().unfollow(id)?,
        Command::Sync => session.lock().sync_track_starts()?,
        Command::Status => {
            let status = session.lock().status_at(Instant::now());
            for track in &status {
                println!("{}", format_status(track));
            }
        }
        Command::Save(path) => {
            let path = path.unwrap_or_else(SessionFile::default_file_name);
            let file = session.lock().export_session();
            file.save(&path)?;
            println!("saved {}", path.display());
        }
        Command::Load(path) => {
            let file = SessionFile::load(&path)?;
            let loaded = session.lock().load_session(&file)?;
            println!("loaded {} tracks from {}", loaded, path.display());
        }
        Command::Help => println!("{}", HELP),
        Command::Quit => {}
    }
    Ok(())
}

fn format_status(track: &TrackStatus) -> String {
    let mut line = format!(
        "{:<9} {:<8} {:>3} bpm {:>3} beats {:>4} events",
        track.id.to_string(),
        track.mode.to_string(),
        track.bpm,
        track.beats_per_loop,
        track.event_count
    );
    if let Some(beat) = track.position {
        line.push_str(&format!("  beat {:>6.2}", beat));
    }
    if let Some(quantize) = track.quantize {
        line.push_str(&format!("  quantize 1/{}", quantize));
    }
    if let Some(reference) = track.follows {
        line.push_str(&format!("  follows {}", reference));
    }
    line
}
