// EDB - Ethereum Debugger
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Logging configuration for RDB components
//!
//! Provides centralized logging setup with:
//! - Structured console output with timestamps
//! - Optional file logging with daily rotation
//! - `RUST_LOG` support, defaulting to INFO
//! - A once-only initializer for tests

use std::{env, fs, path::PathBuf, sync::Once};

use eyre::{eyre, Result};
use once_cell::sync::OnceCell;
use tracing::Level;
use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, time::LocalTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Keeps the non-blocking file writer alive for the lifetime of the process
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Initialize logging for an RDB component
///
/// Console output is always enabled. With `enable_file_logging`, logs are also
/// written to `<tmp>/rdb-logs/<component>/<component>.log`, rotated daily.
///
/// # Arguments
/// * `component_name` - Name of the component (e.g., "rdb-engine")
/// * `enable_file_logging` - Whether to also log to a file
///
/// # Examples
/// ```rust,no_run
/// use rdb_common::logging;
///
/// fn main() -> eyre::Result<()> {
///     logging::init_logging("rdb", false)?;
///     tracing::info!("Debugger started");
///     Ok(())
/// }
/// ```
pub fn init_logging(component_name: &str, enable_file_logging: bool) -> Result<()> {
    let env_filter = default_env_filter(Level::INFO)?;

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_timer(LocalTime::rfc_3339())
        .with_ansi(true);

    if enable_file_logging {
        let log_dir = create_log_directory(component_name)?;

        let file_appender = rolling::daily(&log_dir, format!("{component_name}.log"));
        let (non_blocking_appender, guard) = non_blocking(file_appender);
        let _ = FILE_GUARD.set(guard);

        let file_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_timer(LocalTime::rfc_3339())
            .with_ansi(false)
            .with_writer(non_blocking_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer.with_filter(EnvFilter::from_default_env()))
            .try_init()
            .map_err(|e| eyre!("Failed to initialize tracing subscriber: {e}"))?;

        tracing::info!(
            component = component_name,
            log_dir = %log_dir.display(),
            "Logging initialized with console and file output"
        );
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .try_init()
            .map_err(|e| eyre!("Failed to initialize tracing subscriber: {e}"))?;

        tracing::info!(component = component_name, "Logging initialized with console output only");
    }

    Ok(())
}

/// Build a filter from `RUST_LOG`, falling back to `level`
fn default_env_filter(level: Level) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.as_str()))
        .map_err(|e| eyre!("Failed to create environment filter: {e}"))
}

/// Create log directory in system temp folder
fn create_log_directory(component_name: &str) -> Result<PathBuf> {
    let log_dir = env::temp_dir().join("rdb-logs").join(component_name);
    fs::create_dir_all(&log_dir)?;
    Ok(log_dir)
}

/// Initialize simple logging (console only, compact format)
///
/// # Arguments
/// * `level` - The default log level to use
pub fn init_simple_logging(level: Level) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(default_env_filter(level)?)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|e| eyre!("Failed to initialize simple logging: {e}"))
}

static TEST_LOGGING_INIT: Once = Once::new();

/// Logging initialization for tests, safe to call from every test
///
/// Initializes console-only logging once per process, at `default_level` (INFO if
/// `None`) unless `RUST_LOG` says otherwise.
///
/// # Usage
/// ```rust
/// use rdb_common::logging;
///
/// logging::ensure_test_logging(None);
/// tracing::info!("This will work safely in any test!");
/// ```
pub fn ensure_test_logging(default_level: Option<Level>) {
    TEST_LOGGING_INIT.call_once(|| {
        // A subscriber may already be installed by the harness, which is fine
        let _ = init_simple_logging(default_level.unwrap_or(Level::INFO));
    });
}
