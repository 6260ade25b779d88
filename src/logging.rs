//! Log routing for the CLI.
//!
//! `synth` and `describe` may print to stdout, so events never go there.
//! They are written to stderr and mirrored into a log file, `logs/docstack.log`
//! unless `DOCSTACK_LOG_FILE` names another path. An empty `DOCSTACK_LOG_FILE`
//! turns the file copy off.
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const LOG_FILE_ENV: &str = "DOCSTACK_LOG_FILE";
const DEFAULT_LOG_FILE: &str = "logs/docstack.log";

/// Install the global subscriber. `RUST_LOG` filters both outputs and defaults to `info`.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer);

    let file_writer = log_file_path(std::env::var(LOG_FILE_ENV).ok())
        .and_then(|path| open_log_file(&path))
        .map(file_writer);
    match file_writer {
        Some(writer) => {
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .compact();
            registry.with(file_layer).init();
        }
        None => registry.init(),
    }
}

/// Where the file copy of the log goes, given the raw `DOCSTACK_LOG_FILE` value.
fn log_file_path(configured: Option<String>) -> Option<PathBuf> {
    match configured {
        None => Some(PathBuf::from(DEFAULT_LOG_FILE)),
        Some(path) if path.trim().is_empty() => None,
        Some(path) => Some(PathBuf::from(path)),
    }
}

fn open_log_file(path: &Path) -> Option<File> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        if let Err(err) = std::fs::create_dir_all(parent) {
            eprintln!("Failed to create log directory {}: {err}", parent.display());
            return None;
        }
    }
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => Some(file),
        Err(err) => {
            eprintln!("Failed to open log file {}: {err}", path.display());
            None
        }
    }
}

// The guard flushes buffered lines on drop, so it lives for the whole process.
fn file_writer(file: File) -> NonBlocking {
    let (non_blocking, guard) = tracing_appender::non_blocking(file);
    let _ = LOG_GUARD.set(guard);
    non_blocking
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_defaults_under_logs_and_can_be_disabled() {
        assert_eq!(log_file_path(None), Some(PathBuf::from("logs/docstack.log")));
        assert_eq!(
            log_file_path(Some("/tmp/synth.log".into())),
            Some(PathBuf::from("/tmp/synth.log"))
        );
        assert_eq!(log_file_path(Some("  ".into())), None);
    }

    #[test]
    fn log_file_directories_are_created_and_appended_to() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/run.log");

        assert!(open_log_file(&path).is_some());
        std::fs::write(&path, "first\n").unwrap();
        {
            use std::io::Write;
            let mut file = open_log_file(&path).unwrap();
            file.write_all(b"second\n").unwrap();
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }
}
