//! Logging setup
//!
//! Stdout verbosity follows `-v`/`-q`; a full debug log of every invocation
//! additionally lands in `$COU_DATA/log/cou-YYYYMMDDhhmmss.log`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub fn stdout_level(quiet: bool, verbosity: u8) -> &'static str {
    if quiet {
        return "off";
    }
    match verbosity {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    }
}

/// Initialize logging. Returns the logfile path, or `None` when the log
/// directory is not writable (stdout logging still works then).
pub fn setup(data_dir: &Path, quiet: bool, verbosity: u8) -> Option<PathBuf> {
    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .without_time()
        .with_filter(EnvFilter::new(stdout_level(quiet, verbosity)));

    let log_dir = data_dir.join("log");
    let logfile = log_dir.join(format!(
        "cou-{}.log",
        chrono::Local::now().format("%Y%m%d%H%M%S")
    ));
    let file = fs::create_dir_all(&log_dir)
        .and_then(|_| fs::File::create(&logfile))
        .ok();

    match file {
        Some(file) => {
            let file_layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .with_filter(EnvFilter::new("debug"));
            tracing_subscriber::registry()
                .with(stdout_layer)
                .with(file_layer)
                .init();
            Some(logfile)
        }
        None => {
            tracing_subscriber::registry().with(stdout_layer).init();
            eprintln!(
                "warning: cannot write the logfile under {}; continuing without it",
                log_dir.display()
            );
            None
        }
    }
}
