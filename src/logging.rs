use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log the time spent since `$start` at trace level.
///
/// ```rust,ignore
/// let start = Instant::now();
/// // ... some work ...
/// trace_time!(start, file = ?path, "sort_chunk");
/// ```
#[macro_export]
macro_rules! trace_time {
    ($start:expr, $($arg:tt)+) => {
        tracing::trace!(elapsed = ?$start.elapsed(), $($arg)+)
    };
}

/// Initialize structured logging on stderr.
///
/// `RUST_LOG` or `THESAURUS_LOG` override the level picked from the flags.
pub fn init_tracing(
    verbose: bool,
    log_level: Option<&str>,
    log_json: bool,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let level = match (verbose, log_level) {
        (_, Some(level)) => level,
        (true, None) => "debug",
        (false, None) => "info",
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_from_env("THESAURUS_LOG"))
        .unwrap_or_else(|_| {
            EnvFilter::new(if level.contains('=') {
                level.to_string()
            } else {
                format!("thesaurus_builder={}", level)
            })
        });

    let registry = tracing_subscriber::registry().with(filter);

    if log_json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .try_init()?;
    }

    Ok(())
}
