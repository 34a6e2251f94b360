//! Logging system configuration and initialization
//!
//! This module provides the logging setup used by the binary:
//! - File logging with rotation of the previous run's file
//! - Configuration file based log level control (`RUST_LOG` wins)
//! - Structured JSON logging (optional)
//! - Console and file output support
//! - Local timezone timestamps

#![allow(clippy::uninlined_format_args)]

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};
use lazy_static::lazy_static;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{info, warn};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    filter::Directive,
    fmt::{self, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

pub use crate::infrastructure::config::LoggingConfig;

// Global guard to keep the log file writer alive
lazy_static! {
    static ref LOG_GUARDS: Mutex<Vec<tracing_appender::non_blocking::WorkerGuard>> =
        Mutex::new(Vec::new());
}

/// Local time formatter with millisecond precision
struct LocalTimeFormatter;

impl FormatTime for LocalTimeFormatter {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%d %H:%M:%S%.3f %:z"))
    }
}

/// Get the log directory: configured, or `logs/` next to the executable
pub fn get_log_directory(config: &LoggingConfig) -> PathBuf {
    if let Some(dir) = &config.log_dir {
        return dir.clone();
    }
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());

    exe_dir.join("logs")
}

/// Initialize the logging system with default configuration
pub fn init_logging() -> Result<()> {
    init_logging_with_config(LoggingConfig::default())
}

/// Rename the previous run's log file with its timestamp.
///
/// Returns the new file name, if a file was rotated.
fn rotate_existing_log_file(log_dir: &Path, log_file_name: &str) -> Result<Option<String>> {
    let log_file_path = log_dir.join(log_file_name);
    if !log_file_path.exists() {
        return Ok(None);
    }

    let metadata = std::fs::metadata(&log_file_path)
        .with_context(|| format!("Failed to get log file metadata: {:?}", log_file_path))?;
    let file_time = metadata
        .modified()
        .or_else(|_| metadata.created())
        .unwrap_or_else(|_| std::time::SystemTime::now());
    let stamp: DateTime<Local> = file_time.into();

    let file_stem = log_file_name.trim_end_matches(".log");
    let timestamped_name = format!("{}.{}.log", file_stem, stamp.format("%Y%m%dT%H%M%S"));
    let timestamped_path = log_dir.join(&timestamped_name);

    std::fs::rename(&log_file_path, &timestamped_path).map_err(|e| {
        anyhow!(
            "Failed to rotate log file {} to {}: {}",
            log_file_path.display(),
            timestamped_path.display(),
            e
        )
    })?;

    Ok(Some(timestamped_name))
}

/// Build the filter: `RUST_LOG` if set, otherwise the configured level plus
/// the per-module overrides.
fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let mut filter = EnvFilter::try_new(&config.level)
        .with_context(|| format!("Invalid log level '{}'", config.level))?;

    // Dependency noise stays down unless TRACE is requested
    if !config.level.to_lowercase().contains("trace") {
        for (module, level) in &config.module_filters {
            let directive = format!("{}={}", module, level)
                .parse::<Directive>()
                .with_context(|| format!("Invalid module filter {}={}", module, level))?;
            filter = filter.add_directive(directive);
        }
    }
    let own = format!("rate_panel_lib={}", config.level)
        .parse::<Directive>()
        .with_context(|| format!("Invalid log level '{}'", config.level))?;
    Ok(filter.add_directive(own))
}

/// Initialize logging with custom configuration
///
/// # Environment Variable Override
/// ```bash
/// # Show HTTP details during a run
/// RUST_LOG="debug,reqwest=debug,hyper=debug" rate-panel config.json
/// ```
pub fn init_logging_with_config(config: LoggingConfig) -> Result<()> {
    if !config.file_output && !config.console_output {
        return Err(anyhow!("No logging output configured"));
    }

    let log_dir = get_log_directory(&config);
    let mut rotated = None;
    if config.file_output {
        std::fs::create_dir_all(&log_dir)
            .with_context(|| format!("Failed to create log directory {:?}", log_dir))?;
        rotated = rotate_existing_log_file(&log_dir, &config.file_name)?;
    }

    let env_filter = build_env_filter(&config)?;

    let file_layer = if config.file_output {
        let file_appender = rolling::never(&log_dir, &config.file_name);
        let (file_writer, file_guard) = non_blocking(file_appender);

        // Store the guard globally to prevent it from being dropped
        LOG_GUARDS
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(file_guard);

        let layer = if config.json_format {
            fmt::Layer::new()
                .json()
                .with_writer(file_writer)
                .with_timer(LocalTimeFormatter)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .boxed()
        } else {
            fmt::Layer::new()
                .with_writer(file_writer)
                .with_timer(LocalTimeFormatter)
                .with_target(false)
                .with_ansi(false)
                .boxed()
        };
        Some(layer)
    } else {
        None
    };

    let console_layer = config.console_output.then(|| {
        fmt::Layer::new()
            .with_writer(std::io::stdout)
            .with_timer(LocalTimeFormatter)
            .with_target(false)
    });

    Registry::default()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))?;

    info!("Logging system initialized");
    info!("Log directory: {:?}", log_dir);
    info!("Log level: {}", config.level);
    if let Some(name) = rotated {
        info!("Rotated existing log file to: {}", name);
    }

    if config.file_output && config.auto_cleanup_logs {
        cleanup_old_logs(&log_dir, &config)?;
    }

    Ok(())
}

/// Log system information for diagnostics
pub fn log_system_info(config: &LoggingConfig) {
    info!("=== Rate Panel System Information ===");
    info!("Application version: {}", env!("CARGO_PKG_VERSION"));
    info!("Operating system: {}", std::env::consts::OS);
    info!("Architecture: {}", std::env::consts::ARCH);

    if let Ok(current_dir) = std::env::current_dir() {
        info!("Working directory: {:?}", current_dir);
    }

    info!("Log directory: {:?}", get_log_directory(config));
    info!("=====================================");
}

/// `.log` files of `log_dir`, newest first
fn list_log_files(log_dir: &Path) -> Result<Vec<(PathBuf, std::time::SystemTime)>> {
    let mut log_files = Vec::new();
    for entry in std::fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_log = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(".log"));
        if path.is_file() && is_log {
            if let Ok(modified) = entry.metadata().and_then(|m| m.modified()) {
                log_files.push((path, modified));
            }
        }
    }
    log_files.sort_by(|a, b| b.1.cmp(&a.1));
    Ok(log_files)
}

/// Clean up old log files based on configuration. Returns the number of
/// files removed.
fn cleanup_old_logs(log_dir: &Path, config: &LoggingConfig) -> Result<usize> {
    if !log_dir.exists() {
        return Ok(0);
    }

    let log_files = list_log_files(log_dir)?;
    let keep = if config.keep_only_latest {
        1
    } else {
        config.max_files.max(1) as usize
    };
    if log_files.len() <= keep {
        return Ok(0);
    }

    info!("Removing {} old log files (keeping {})", log_files.len() - keep, keep);
    let mut removed = 0;
    for (path, _) in log_files.iter().skip(keep) {
        if let Err(e) = std::fs::remove_file(path) {
            warn!("Failed to remove old log file {:?}: {}", path, e);
        } else {
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_in(dir: &Path) -> LoggingConfig {
        LoggingConfig {
            log_dir: Some(dir.to_path_buf()),
            ..LoggingConfig::default()
        }
    }

    #[test]
    fn test_logging_config_default() {
        let config = LoggingConfig::default();
        assert!(!config.level.is_empty());
        assert!(config.console_output);
        assert!(config.file_output);
    }

    #[test]
    fn test_configured_log_directory_wins() {
        let dir = TempDir::new().unwrap();
        assert_eq!(get_log_directory(&config_in(dir.path())), dir.path());
        assert!(get_log_directory(&LoggingConfig::default())
            .to_string_lossy()
            .ends_with("logs"));
    }

    #[test]
    fn test_rotation_renames_previous_file() {
        let dir = TempDir::new().unwrap();
        assert_eq!(rotate_existing_log_file(dir.path(), "rate-panel.log").unwrap(), None);

        std::fs::write(dir.path().join("rate-panel.log"), "previous run").unwrap();
        let rotated = rotate_existing_log_file(dir.path(), "rate-panel.log")
            .unwrap()
            .unwrap();
        assert!(rotated.starts_with("rate-panel."));
        assert!(!dir.path().join("rate-panel.log").exists());
        assert!(dir.path().join(rotated).exists());
    }

    #[test]
    fn test_cleanup_keeps_newest_files() {
        let dir = TempDir::new().unwrap();
        for i in 0..4 {
            std::fs::write(dir.path().join(format!("old-{i}.log")), "x").unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "kept").unwrap();

        let config = LoggingConfig {
            max_files: 2,
            ..config_in(dir.path())
        };
        assert_eq!(cleanup_old_logs(dir.path(), &config).unwrap(), 2);
        assert_eq!(list_log_files(dir.path()).unwrap().len(), 2);
        assert!(dir.path().join("notes.txt").exists());
    }
}
