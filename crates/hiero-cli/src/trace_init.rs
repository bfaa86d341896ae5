use tracing_subscriber::EnvFilter;

fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Human-readable logs on stderr, `RUST_LOG` overriding the default level.
pub fn init_stderr(verbose: bool) {
    let default = if verbose { "hiero_core=debug" } else { "hiero_core=info" };
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(env_filter(default))
        .try_init();
}

#[cfg(feature = "trace")]
mod file {
    use std::path::Path;
    use std::sync::Once;

    static INIT: Once = Once::new();

    pub fn init_tracing(log_dir: &Path) {
        INIT.call_once(|| {
            let file_appender = tracing_appender::rolling::never(log_dir, "hiero-trace.jsonl");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            // The writer must outlive every decode thread.
            std::mem::forget(guard);

            let _ = tracing_subscriber::fmt()
                .json()
                .with_writer(non_blocking)
                .with_target(true)
                .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
                .with_env_filter(super::env_filter("hiero_core=debug"))
                .try_init();
        });
    }
}

/// JSON span trace written to `<log_dir>/hiero-trace.jsonl`. Falls back to
/// stderr logging when built without the `trace` feature.
#[cfg(feature = "trace")]
pub fn init_tracing(log_dir: &std::path::Path) {
    file::init_tracing(log_dir);
}

#[cfg(not(feature = "trace"))]
pub fn init_tracing(_log_dir: &std::path::Path) {
    eprintln!("Warning: built without the `trace` feature, logging to stderr");
    init_stderr(true);
}
