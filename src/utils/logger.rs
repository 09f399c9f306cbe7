use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output shape of the log stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines for interactive and one-shot runs.
    Compact,
    /// One JSON object per line for the long-running sync daemon.
    Json,
}

impl LogFormat {
    pub fn from_flags(json_logs: bool) -> Self {
        if json_logs {
            Self::Json
        } else {
            Self::Compact
        }
    }
}

// SOAP 回應很大，HTTP 堆疊的 debug 日誌一律壓到 warn
const QUIET_HTTP: &str = "hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn";

/// Filter used when `RUST_LOG` is not set.
pub fn default_directives(verbose: bool) -> String {
    let level = if verbose { "debug" } else { "info" };
    format!("ehr_sync={},{}", level, QUIET_HTTP)
}

/// Installs the global subscriber. Logs go to stderr so that `--once`
/// can print its result on stdout. A second call is a no-op.
pub fn init_logger(format: LogFormat, verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match format {
        LogFormat::Compact => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };

    if installed.is_err() {
        tracing::debug!("Logger already installed, keeping the existing one");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_follow_verbosity() {
        assert!(default_directives(false).starts_with("ehr_sync=info,"));
        assert!(default_directives(true).starts_with("ehr_sync=debug,"));
        assert!(default_directives(true).contains("reqwest=warn"));
    }

    #[test]
    fn test_log_format_from_flags() {
        assert_eq!(LogFormat::from_flags(true), LogFormat::Json);
        assert_eq!(LogFormat::from_flags(false), LogFormat::Compact);
    }

    #[test]
    fn test_second_init_is_harmless() {
        init_logger(LogFormat::Compact, false);
        init_logger(LogFormat::Json, true);
    }
}
