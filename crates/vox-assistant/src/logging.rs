use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

/// Installs the global subscriber: a non-blocking file layer plus an
/// optional stdout layer. `RUST_LOG` takes precedence over `config.level`.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the life of the process. Returns `None` when the log directory cannot be
/// created or a subscriber is already installed.
pub fn init_tracing(config: &LogConfig) -> Option<WorkerGuard> {
    let log_dir = match config.file_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    };
    if let Err(error) = std::fs::create_dir_all(&log_dir) {
        eprintln!(
            "warning: failed to create log dir {}: {error}",
            log_dir.display()
        );
        return None;
    }
    let file_name = config
        .file_path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "vox.log".into());

    let appender = tracing_appender::rolling::never(&log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.level.clone()));
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(non_blocking);

    let init_result = if config.stdout {
        let stdout_layer = tracing_subscriber::fmt::layer().with_ansi(false);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .with(stdout_layer)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .try_init()
    };

    match init_result {
        Ok(()) => Some(guard),
        Err(error) => {
            eprintln!("warning: tracing already initialized: {error}");
            None
        }
    }
}
