use simplelog::*;
use std::fs::OpenOptions;
use std::path::Path;

/// Log to stderr at `level`, and additionally to `log_file` at debug if given.
pub fn init_logger(level: LevelFilter, log_file: Option<&Path>) -> anyhow::Result<()> {
    let config = ConfigBuilder::new()
        .set_time_format_rfc3339()
        .build();

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        config.clone(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )];

    if let Some(path) = log_file {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        loggers.push(WriteLogger::new(LevelFilter::Debug.max(level), config, file));
    }

    CombinedLogger::init(loggers)?;
    Ok(())
}
