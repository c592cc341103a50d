//! Logging Infrastructure
//!
//! Structured logging setup with support for both development and production environments
//! Features:
//! - Daily rotating application logs (deleted after 14 days)
//! - Permanent remediation logs (stop-list changes, never deleted)
//! - Permanent operator logs (operator notifications, never deleted)

use std::fs;
use std::path::Path;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, prelude::*};

/// Log target for stop-list remediation events
pub const REMEDIATION_TARGET: &str = "remediation";
/// Log target for operator notifications
pub const OPERATOR_TARGET: &str = "operator";

/// Application logs older than this are removed by [`cleanup_old_logs`]
const APP_LOG_RETENTION_DAYS: i64 = 14;

/// Clean up old application log files (older than 14 days)
///
/// Call this periodically (e.g., daily) to maintain log size
pub fn cleanup_old_logs(log_dir: &Path) -> anyhow::Result<usize> {
    let cutoff = chrono::Utc::now().date_naive() - chrono::Duration::days(APP_LOG_RETENTION_DAYS);
    let mut removed = 0;

    // Application logs subdirectory
    let app_log_dir = log_dir.join("app");
    if !app_log_dir.exists() {
        return Ok(0);
    }

    for entry in fs::read_dir(app_log_dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        // Match app.YYYY-MM-DD pattern produced by the daily appender
        if let Some(date_part) = name.strip_prefix("app.")
            && let Ok(date) = chrono::NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
            && date < cutoff
        {
            fs::remove_file(&path)?;
            removed += 1;
            tracing::info!(file = %name, "Deleted old log file");
        }
    }

    Ok(removed)
}

fn is_permanent_target(target: &str) -> bool {
    target == REMEDIATION_TARGET || target == OPERATOR_TARGET
}

/// Initialize the logging system with daily rotating logs
///
/// # Arguments
/// * `level` - Log level (e.g., "info", "debug", "warn")
/// * `json_format` - Whether to use JSON format (true for production, false for development)
/// * `log_dir` - Optional directory for file logging (e.g., Some("./work_dir/logs"))
///
/// # Examples
/// ```no_run
/// # use crab_delivery::utils::logger::init_logger_with_file;
/// // Development setup (console only)
/// init_logger_with_file("debug", false, None)?;
///
/// // Production setup (console + file)
/// init_logger_with_file("info", true, Some(std::path::Path::new("./work_dir/logs")))?;
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn init_logger_with_file(
    level: &str,
    json_format: bool,
    log_dir: Option<&Path>,
) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::registry().with(env_filter);

    // Console layer
    let console_layer = if json_format {
        fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    let Some(dir) = log_dir else {
        subscriber.with(console_layer).try_init()?;
        return Ok(());
    };

    // Create subdirectories for each log type
    let app_log_dir = dir.join("app");
    let remediation_log_dir = dir.join(REMEDIATION_TARGET);
    let operator_log_dir = dir.join(OPERATOR_TARGET);
    fs::create_dir_all(&app_log_dir)?;
    fs::create_dir_all(&remediation_log_dir)?;
    fs::create_dir_all(&operator_log_dir)?;

    // Standard application logs (rotated daily, subject to 14-day cleanup)
    let app_log = RollingFileAppender::new(Rotation::DAILY, app_log_dir, "app");
    let app_layer = file_layer(app_log, json_format)
        .with_filter(tracing_subscriber::filter::filter_fn(|meta| {
            !is_permanent_target(meta.target())
        }));

    // Permanent remediation logs (never deleted)
    let remediation_log =
        RollingFileAppender::new(Rotation::DAILY, remediation_log_dir, REMEDIATION_TARGET);
    let remediation_layer = file_layer(remediation_log, json_format)
        .with_filter(tracing_subscriber::filter::filter_fn(|meta| {
            meta.target() == REMEDIATION_TARGET
        }));

    // Permanent operator notification logs (never deleted)
    let operator_log = RollingFileAppender::new(Rotation::DAILY, operator_log_dir, OPERATOR_TARGET);
    let operator_layer = file_layer(operator_log, json_format)
        .with_filter(tracing_subscriber::filter::filter_fn(|meta| {
            meta.target() == OPERATOR_TARGET
        }));

    subscriber
        .with(console_layer)
        .with(app_layer)
        .with(remediation_layer)
        .with(operator_layer)
        .try_init()?;

    // Cleanup runs once per process start
    if let Err(e) = cleanup_old_logs(dir) {
        tracing::error!(error = %e, "Failed to cleanup old logs");
    }

    Ok(())
}

fn file_layer<S>(
    appender: RollingFileAppender,
    json_format: bool,
) -> Box<dyn Layer<S> + Send + Sync + 'static>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    let writer = std::sync::Mutex::new(appender);
    if json_format {
        fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_writer(writer)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false)
            .with_writer(writer)
            .boxed()
    }
}

/// Initialize the logging system (console only)
///
/// Convenience function for console-only logging
pub fn init_logger(level: &str, json_format: bool) -> anyhow::Result<()> {
    init_logger_with_file(level, json_format, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_removes_only_old_app_logs() {
        let dir = tempfile::tempdir().unwrap();
        let app_dir = dir.path().join("app");
        fs::create_dir_all(&app_dir).unwrap();

        let old = chrono::Utc::now().date_naive() - chrono::Duration::days(30);
        let recent = chrono::Utc::now().date_naive();
        let old_file = app_dir.join(format!("app.{}", old.format("%Y-%m-%d")));
        let recent_file = app_dir.join(format!("app.{}", recent.format("%Y-%m-%d")));
        let unrelated = app_dir.join("notes.txt");
        fs::write(&old_file, "old").unwrap();
        fs::write(&recent_file, "new").unwrap();
        fs::write(&unrelated, "keep").unwrap();

        let removed = cleanup_old_logs(dir.path()).unwrap();

        assert_eq!(removed, 1);
        assert!(!old_file.exists());
        assert!(recent_file.exists());
        assert!(unrelated.exists());
    }

    #[test]
    fn test_cleanup_without_app_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(cleanup_old_logs(dir.path()).unwrap(), 0);
    }

    #[test]
    fn test_permanent_targets() {
        assert!(is_permanent_target("operator"));
        assert!(is_permanent_target("remediation"));
        assert!(!is_permanent_target("crab_delivery::orders::sweep"));
    }
}
