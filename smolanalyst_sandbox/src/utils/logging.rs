//! # Logging Initialization
//!
//! Sets up the `tracing` subscriber for the sandbox binary and for tests.
//!
//! - **Filter**: `RUST_LOG` when set, otherwise `"{level},smolanalyst_sandbox=debug"`.
//! - **File logging** (`log_to_file = true`): a daily rolling file in the user
//!   cache directory (via `directories`), written through a non-blocking
//!   `tracing_appender` writer without ANSI colors.
//! - **Stderr logging**: used when requested, and as the fallback whenever the
//!   cache directory is unavailable or not writable.
//!
//! Initialization happens at most once per process; later calls are no-ops.
//!
//! Log files are written with `std::fs` directly rather than through
//! [`crate::fs`], so logging keeps working while a sandbox scope is active.

use anyhow::Result;
use directories::ProjectDirs;
use std::{io::stderr, path::Path, sync::Once};
use tracing_subscriber::{EnvFilter, fmt::layer, prelude::*};

static INIT: Once = Once::new();

/// Verbose stderr logging for tests.
pub fn init_test_logging() {
    let _ = init_logging("trace", false);
}

/// Install the global subscriber.
///
/// # Errors
///
/// Currently infallible; falls back to stderr instead of failing.
pub fn init_logging(log_level: &str, log_to_file: bool) -> Result<()> {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("{log_level},smolanalyst_sandbox=debug")));

        if log_to_file
            && let Some(proj_dirs) = ProjectDirs::from("com", "SmolAnalyst", "smolanalyst")
        {
            let log_dir = proj_dirs.cache_dir();

            // tracing_appender::rolling::daily panics on permission errors.
            let file_appender = if can_write_to(log_dir) {
                std::panic::catch_unwind(|| {
                    tracing_appender::rolling::daily(log_dir, "smolanalyst_sandbox.log")
                })
                .ok()
            } else {
                None
            };

            if let Some(file_appender) = file_appender {
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(layer().with_writer(non_blocking).with_ansi(false))
                    .init();
                // Leaked so buffered lines are flushed at exit.
                Box::leak(Box::new(guard));
                return;
            }
        }

        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer().with_writer(stderr).with_ansi(true))
            .init();
    });

    Ok(())
}

/// Create `dir` if needed and check that a file can be written in it.
fn can_write_to(dir: &Path) -> bool {
    if std::fs::create_dir_all(dir).is_err() {
        return false;
    }
    let marker = dir.join(".smolanalyst_log_check");
    match std::fs::write(&marker, "ok") {
        Ok(()) => {
            let _ = std::fs::remove_file(&marker);
            true
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_can_write_to_creates_directory() {
        let temp = tempdir().unwrap();
        let nested = temp.path().join("logs").join("daily");
        assert!(can_write_to(&nested));
        assert!(nested.is_dir());
        assert!(!nested.join(".smolanalyst_log_check").exists());
    }

    #[test]
    fn test_init_is_idempotent() {
        init_test_logging();
        assert!(init_logging("info", true).is_ok());
    }
}
