use tracing::metadata::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

/// Environment variable holding `EnvFilter` directives (`SCOPE_LOG=debug`).
pub const LOG_ENV_VAR: &str = "SCOPE_LOG";

fn level_from_verbosity(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        _ => LevelFilter::DEBUG,
    }
}

/// Install the stderr subscriber. Returns `false` when the host already
/// installed one, which is left in place.
pub fn init(verbosity: u8) -> bool {
    let filter = EnvFilter::builder()
        .with_default_directive(level_from_verbosity(verbosity).into())
        .with_env_var(LOG_ENV_VAR)
        .from_env_lossy();

    let layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_names(true);

    Registry::default().with(filter).with(layer).try_init().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(level_from_verbosity(0), LevelFilter::WARN);
        assert_eq!(level_from_verbosity(1), LevelFilter::INFO);
        assert_eq!(level_from_verbosity(7), LevelFilter::DEBUG);
    }

    #[test]
    fn test_second_init_is_noop() {
        init(0);
        assert!(!init(2));
    }
}
