//! Tracing subscriber setup.

use tracing_subscriber::{fmt, EnvFilter};

/// Output format of the log stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Installs the global subscriber.
///
/// `RUST_LOG` wins over `verbosity` (0 = info, 1 = debug, 2+ = trace).
/// Returns `false` when a subscriber was already installed, which makes the
/// call safe to repeat from tests.
pub fn init_tracing(verbosity: u8, format: LogFormat) -> bool {
    let filter = match verbosity {
        0 => "model_generator=info",
        1 => "model_generator=debug",
        _ => "model_generator=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match format {
        LogFormat::Text => fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .try_init()
            .is_ok(),
        LogFormat::Json => fmt().json().with_env_filter(env_filter).try_init().is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_is_repeatable() {
        init_tracing(1, LogFormat::Text);
        assert!(!init_tracing(0, LogFormat::Json));
    }
}
