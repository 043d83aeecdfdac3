//! Workout Core Library
//!
//! Logging setup shared by the workout bridge services. The filter comes
//! from `RUST_LOG` when set; otherwise the service and the bridge library
//! log at `info`.

use tracing_subscriber::EnvFilter;

/// Output format of the tracing subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable, for development
    #[default]
    Pretty,
    /// One JSON object per line, for production
    Json,
}

impl LogFormat {
    /// Parse a format name; anything but `json` is pretty.
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }

    /// Read the format from `WORKOUT_LOG_FORMAT`.
    pub fn from_env() -> Self {
        std::env::var("WORKOUT_LOG_FORMAT")
            .map(|v| Self::parse(&v))
            .unwrap_or_default()
    }
}

/// Filter directives used when `RUST_LOG` is not set
pub fn default_directives(service_name: &str) -> String {
    format!(
        "{}=info,workout_bridge=info,tower_http=info",
        service_name.replace('-', "_")
    )
}

fn env_filter(service_name: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(service_name)))
}

/// Initialize tracing with standard configuration
pub fn init_tracing(service_name: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(service_name))
        .init();
}

/// Initialize tracing with JSON output (for production)
pub fn init_tracing_json(service_name: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(service_name))
        .json()
        .init();
}

/// Initialize tracing in the given format.
pub fn init_tracing_with(service_name: &str, format: LogFormat) {
    match format {
        LogFormat::Pretty => init_tracing(service_name),
        LogFormat::Json => init_tracing_json(service_name),
    }
}
