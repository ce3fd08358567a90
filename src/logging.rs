use once_cell::sync::OnceCell;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Initialise logging. The level is `debug` when `debug` is set and `info`
/// otherwise. `RUST_LOG` may override the level only in debug mode.
///
/// When `log_file` is given, events are also appended to that file through a
/// non-blocking writer. Calling this more than once keeps the first subscriber.
pub fn init(debug: bool, log_file: Option<PathBuf>) {
    let level = if debug { "debug" } else { "info" };

    let filter = if debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    } else {
        EnvFilter::new(level)
    };

    let file_layer = log_file.and_then(|path| {
        let file_name = path.file_name()?.to_owned();
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        if let Err(err) = std::fs::create_dir_all(&dir) {
            eprintln!("failed to create log dir {}: {err}", dir.display());
            return None;
        }
        let appender = tracing_appender::rolling::never(dir, file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        Some(fmt::layer().with_writer(writer).with_ansi(false))
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init();
}
