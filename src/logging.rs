//! Logger initialisation.
//!
//! `RUST_LOG` always wins; otherwise the configured level is used. When a log
//! file is configured, records are appended there instead of stderr.

use std::fs::OpenOptions;

use env_logger::{Builder, Env, Target};

use crate::config::LoggingConfig;

/// Install the global logger. Safe to call more than once; later calls are
/// no-ops.
pub fn init(config: &LoggingConfig, level_override: Option<&str>) {
    let level = level_override.unwrap_or(&config.level);
    let mut builder = Builder::from_env(Env::default().default_filter_or(level));
    builder.format_timestamp_secs();

    if let Some(path) = &config.file {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("Cannot open log file {}: {e}", path.display()),
        }
    }

    let _ = builder.try_init();
}
