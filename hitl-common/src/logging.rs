//! Logging setup and trace ids.
//!
//! Logs go to stderr so they never interleave with conversation output on
//! stdout. Noisy library modules (HTTP stack, TLS, SQLite) are held at
//! `warn` unless `RUST_LOG` says otherwise.

use std::str::FromStr;

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Modules capped at `warn`.
pub const NOISY_MODULES: &[&str] = &["hyper", "hyper_util", "reqwest", "h2", "rustls", "rusqlite"];

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable, colored
    #[default]
    Pretty,
    /// One JSON object per line, with span context
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}' (expected 'pretty' or 'json')")),
        }
    }
}

fn build_directives(log_level: &str) -> String {
    NOISY_MODULES
        .iter()
        .fold(String::from(log_level), |mut directives, module| {
            directives.push_str(&format!(",{module}=warn"));
            directives
        })
}

/// `RUST_LOG` wins when set.
fn build_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(build_directives(log_level)))
}

/// Install the global subscriber. Later calls are no-ops.
///
/// An unrecognised `log_format` falls back to pretty output.
pub fn init_logging(log_level: &str, log_format: &str) {
    let format = log_format.parse::<LogFormat>();
    let subscriber = tracing_subscriber::registry().with(build_filter(log_level));

    match format.clone().unwrap_or_default() {
        LogFormat::Json => {
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_span_events(FmtSpan::CLOSE)
                .with_current_span(true)
                .with_target(true)
                .with_file(true)
                .with_line_number(true);
            let _ = subscriber.with(layer).try_init();
        }
        LogFormat::Pretty => {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true)
                .with_target(true);
            let _ = subscriber.with(layer).try_init();
        }
    }

    if let Err(reason) = format {
        tracing::warn!(%reason, "Falling back to pretty logs");
    }
    tracing::debug!(log_level = %log_level, log_format = %log_format, "Logging initialized");
}

/// Id correlating every log line of one submit/resume.
pub fn generate_trace_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directives_suppress_noise() {
        let directives = build_directives("debug");
        assert!(directives.starts_with("debug,"));
        assert!(directives.contains(",hyper=warn"));
        assert!(directives.contains(",rusqlite=warn"));
        assert_eq!(directives.matches("=warn").count(), NOISY_MODULES.len());
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("json".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!(" Pretty ".parse::<LogFormat>(), Ok(LogFormat::Pretty));
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_generate_trace_id() {
        let a = generate_trace_id();
        let b = generate_trace_id();
        assert_eq!(a.len(), 36);
        assert_ne!(a, b);
    }

    #[test]
    fn test_init_logging_twice_is_harmless() {
        init_logging("info", "pretty");
        init_logging("debug", "json");
    }
}
