use tracing_subscriber::{fmt, EnvFilter};

/// Output format for the process-wide subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, one event per line.
    Pretty,
    /// Newline-delimited JSON (suitable for Vector / Loki).
    Json,
}

impl LogFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Build the filter: `RUST_LOG` wins, otherwise `default_level`
/// (e.g. "info" or "wd_daemon=debug,warn").
fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install the global subscriber.
///
/// Returns `false` when a subscriber was already installed (e.g. a second
/// call from another test); the existing one is kept.
pub fn init_logging(service_name: &str, default_level: &str, format: LogFormat) -> bool {
    let installed = match format {
        LogFormat::Pretty => fmt()
            .with_env_filter(filter(default_level))
            .with_target(true)
            .with_thread_ids(false)
            .with_file(true)
            .with_line_number(true)
            .try_init()
            .is_ok(),
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter(default_level))
            .with_target(true)
            .with_current_span(true)
            .try_init()
            .is_ok(),
    };

    if installed {
        tracing::info!(service = service_name, format = ?format, "logging initialised");
    }
    installed
}
