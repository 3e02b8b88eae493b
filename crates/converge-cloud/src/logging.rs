//! Tracing subscriber setup for hosts embedding the engine
//!
//! Output goes to stderr without ANSI colours: a provider's stdout belongs
//! to the process hosting it.

use tracing_subscriber::EnvFilter;

/// Filter variable checked first, before `RUST_LOG`
pub const LOG_ENV: &str = "CONVERGE_LOG";

const DEFAULT_DIRECTIVE: &str = "info";

fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the global subscriber. Panics if one is already set.
pub fn init_logging() {
    init_logging_with_default(DEFAULT_DIRECTIVE);
}

/// Install the global subscriber with a fallback filter directive
pub fn init_logging_with_default(default: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(true)
        .init();
}

/// Like [`init_logging`], but returns `false` instead of panicking when a
/// subscriber is already installed (tests, embedding hosts)
pub fn try_init_logging() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(DEFAULT_DIRECTIVE))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_init_is_repeatable() {
        let _ = try_init_logging();
        assert!(!try_init_logging());
    }

    #[test]
    fn test_filter_prefers_converge_log() {
        temp_env::with_vars(
            [(LOG_ENV, Some("converge_cloud=trace")), ("RUST_LOG", Some("warn"))],
            || {
                assert_eq!(env_filter("info").to_string(), "converge_cloud=trace");
            },
        );
    }
}
