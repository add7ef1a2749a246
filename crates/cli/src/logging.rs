use std::path::Path;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Keeps the non-blocking log writers alive; drop it to flush them.
pub struct LogGuard {
    _writers: Vec<WorkerGuard>,
}

/// Install the global subscriber for a `wca` run.
///
/// Human-readable events go to stderr so `wca cat` can stream blob bytes on
/// stdout. With a `log_dir`, events are also appended to `wca.<date>.log`,
/// rotated daily. `RUST_LOG` overrides `level` for both.
pub fn init_logging(level: Level, log_dir: Option<&Path>) -> LogGuard {
    let mut writers = Vec::new();

    let (stderr, guard) = tracing_appender::non_blocking(std::io::stderr());
    writers.push(guard);
    let mut layers: Vec<BoxedLayer> = vec![tracing_subscriber::fmt::layer()
        .compact()
        .with_target(false)
        .with_writer(stderr)
        .with_filter(filter(level))
        .boxed()];

    let file_error = match log_dir.map(open_log_file) {
        Some(Ok(appender)) => {
            let (file, guard) = tracing_appender::non_blocking(appender);
            writers.push(guard);
            layers.push(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_filter(filter(level))
                    .boxed(),
            );
            None
        }
        Some(Err(e)) => Some(e),
        None => None,
    };

    tracing_subscriber::registry().with(layers).init();

    if let (Some(dir), Some(e)) = (log_dir, file_error) {
        tracing::warn!(dir = %dir.display(), error = %e, "file logging disabled");
    }

    log_panics();
    LogGuard { _writers: writers }
}

fn filter(level: Level) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
}

fn open_log_file(dir: &Path) -> Result<RollingFileAppender, String> {
    std::fs::create_dir_all(dir).map_err(|e| e.to_string())?;
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("wca")
        .filename_suffix("log")
        .build(dir)
        .map_err(|e| e.to_string())
}

/// Route panics through `tracing` so they reach the log file, then run the
/// default hook.
fn log_panics() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| info.payload().downcast_ref::<String>().map(String::as_str))
            .unwrap_or("<non-string payload>");
        let location = info
            .location()
            .map(|loc| loc.to_string())
            .unwrap_or_default();
        tracing::error!(%location, payload, "panicked");
        default_hook(info);
    }));
}
