//! Tracing subscriber setup for the binary.
//!
//! Filter priority: explicit directive (`--log-level`) > `RUST_LOG` >
//! [`DEFAULT_DIRECTIVE`]. Logs go to stderr so they never mix with
//! conversation output on stdout, and optionally to a file as well.

use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const DEFAULT_DIRECTIVE: &str = "parlance=info";

/// Build the filter from an explicit directive, the environment, or the default.
pub fn build_filter(directive: Option<&str>) -> io::Result<EnvFilter> {
    match directive {
        Some(d) => EnvFilter::try_new(d).map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("bad log directive '{d}': {e}"))
        }),
        None => Ok(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))),
    }
}

/// Install the global subscriber. Calling it again is a no-op.
pub fn init(directive: Option<&str>, log_file: Option<&Path>) -> io::Result<()> {
    let filter = build_filter(directive)?;

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .with(file_layer)
        .try_init()
        .ok();
    Ok(())
}
