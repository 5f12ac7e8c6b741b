//! Logging.

use anyhow::Error as GenericError;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _, EnvFilter, Layer as _};

mod layer;
use self::layer::build_formatting_layer;

const LOG_LEVEL_ENV_VAR: &str = "FAULTLINE_LOG_LEVEL";
const LOG_FORMAT_JSON_ENV_VAR: &str = "FAULTLINE_LOG_FORMAT_JSON";

/// Guard for the logging subsystem.
///
/// Console output is written by a background worker, so this guard must be held until the process is about to exit.
/// Dropping it flushes any buffered log lines.
#[must_use = "dropping the guard stops the background log writer"]
pub struct LoggingGuard {
    _worker_guard: WorkerGuard,
}

/// Logging configuration, as read from the environment.
#[derive(Clone, Debug, Default)]
pub(crate) struct LoggingConfiguration {
    /// Level filtering directives, in `EnvFilter` syntax.
    pub log_level: Option<String>,

    /// Whether to emit JSON instead of human-readable lines.
    pub log_format_json: bool,
}

impl LoggingConfiguration {
    fn from_env() -> Self {
        Self {
            log_level: std::env::var(LOG_LEVEL_ENV_VAR).ok(),
            log_format_json: std::env::var(LOG_FORMAT_JSON_ENV_VAR)
                .map(|s| parse_bool_flag(&s))
                .unwrap_or(false),
        }
    }

    fn as_env_filter(&self, default_level: LevelFilter) -> EnvFilter {
        let builder = EnvFilter::builder().with_default_directive(default_level.into());
        match self.log_level.as_deref() {
            Some(directives) => builder.parse_lossy(directives),
            None => builder.parse_lossy(""),
        }
    }
}

fn parse_bool_flag(raw: &str) -> bool {
    let value = raw.trim().to_lowercase();
    value == "true" || value == "1"
}

/// Logs a message to standard error and exits the process with a non-zero exit code.
pub fn fatal_and_exit(message: String) {
    eprintln!("FATAL: {}", message);
    std::process::exit(1);
}

/// Initializes the logging subsystem for `tracing`.
///
/// This function reads the `FAULTLINE_LOG_LEVEL` environment variable to determine the filtering directives to use,
/// falling back to `default_level` (or `INFO` when not given). It also reads `FAULTLINE_LOG_FORMAT_JSON`: when set to
/// `true` or `1`, log lines are written as flattened JSON objects. Otherwise, they are written as
/// `<timestamp> [<LEVEL>]: <message>`, followed by any structured fields.
///
/// # Errors
///
/// If the logging subsystem was already initialized, an error will be returned.
pub fn initialize_logging(default_level: Option<LevelFilter>) -> Result<LoggingGuard, GenericError> {
    let config = LoggingConfiguration::from_env();
    let level_filter = config.as_env_filter(default_level.unwrap_or(LevelFilter::INFO));

    let (nb_stdout, worker_guard) = tracing_appender::non_blocking(std::io::stdout());

    tracing_subscriber::registry()
        .with(build_formatting_layer(&config, nb_stdout).with_filter(level_filter))
        .try_init()?;

    Ok(LoggingGuard {
        _worker_guard: worker_guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_flag_parsing() {
        assert!(parse_bool_flag("true"));
        assert!(parse_bool_flag(" TRUE "));
        assert!(parse_bool_flag("1"));
        assert!(!parse_bool_flag("json"));
        assert!(!parse_bool_flag("0"));
        assert!(!parse_bool_flag(""));
    }

    #[test]
    fn explicit_directives_override_default_level() {
        let config = LoggingConfiguration {
            log_level: Some("debug".to_string()),
            log_format_json: false,
        };
        let filter = config.as_env_filter(LevelFilter::INFO);
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));

        let config = LoggingConfiguration::default();
        let filter = config.as_env_filter(LevelFilter::WARN);
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::WARN));
    }
}
