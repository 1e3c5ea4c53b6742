use anyhow::Context;
use file_rotate::{compression::Compression, suffix::AppendCount, ContentLimit, FileRotate};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, fmt::time::UtcTime, prelude::*, EnvFilter};

use crate::config::{LogConfig, DEFAULT_LOG_FILTER};

pub const LOG_FILE_NAME: &str = "kinledger.log";

/// Install the JSON subscriber on stderr, plus a size-rotated file sink when
/// `log_dir` is set. Keep the returned guard alive so buffered lines are flushed.
pub fn init_logging(cfg: &LogConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let _ = tracing_log::LogTracer::init();

    let filter = EnvFilter::try_new(&cfg.filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let (file_layer, guard) = match &cfg.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create log directory {}", dir.display()))?;
            let rotating = FileRotate::new(
                dir.join(LOG_FILE_NAME),
                AppendCount::new(cfg.max_files),
                ContentLimit::BytesSurpassed(cfg.max_bytes),
                Compression::None,
                #[cfg(unix)]
                None,
            );
            let (writer, guard) = tracing_appender::non_blocking(rotating);
            let layer = fmt::layer()
                .json()
                .with_target(true)
                .with_ansi(false)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let stderr_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_timer(UtcTime::rfc_3339())
        .with_writer(std::io::stderr);

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer);
    // LogTracer is installed above, so skip `try_init` which would install it again.
    let _ = tracing::subscriber::set_global_default(subscriber);

    tracing::debug!(target: "kinledger", event = "logging_ready", file_sink = guard.is_some());
    Ok(guard)
}
