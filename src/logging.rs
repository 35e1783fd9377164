//! `fern`-backed logger setup, mirroring the daemon's own convention of a
//! single timestamped line per record with module path and level.

use std::str::FromStr;

/// Initializes the global logger at `level` ("trace"/"debug"/"info"/
/// "warn"/"error"), writing to stdout. Returns an error if a logger is
/// already set (e.g. called twice, or from within a test harness that sets
/// its own).
pub fn setup(level: &str) -> Result<(), fern::InitError> {
    let level = log::LevelFilter::from_str(level).unwrap_or(log::LevelFilter::Info);

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}][{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stdout())
        .apply()?;

    Ok(())
}
