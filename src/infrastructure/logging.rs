//! Logging setup
//!
//! Console output plus a daily-rolling file under `logs/`. The returned
//! guard must stay alive for the process lifetime or buffered file output
//! is lost.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init_logging(log_dir: &Path) -> WorkerGuard {
    if !log_dir.exists() {
        let _ = std::fs::create_dir_all(log_dir);
    }

    let appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "triarb.log");
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_names(true);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_level(true);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(file_layer)
        .with(console_layer)
        .init();

    tracing::info!(dir = %log_dir.display(), "logging initialized");

    guard
}
