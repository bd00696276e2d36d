//! Tracing setup.

use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter directives.
pub const LOG_ENV: &str = "CONSTINO_LOG";

/// Install a stderr subscriber filtered by `CONSTINO_LOG` (default `info`).
///
/// Stdout is left to command output. Calling this more than once is harmless;
/// later calls keep the first subscriber.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    init_with_filter(filter);
}

/// Install a subscriber with an explicit filter string.
pub fn init_tracing_with_filter(filter: &str) {
    init_with_filter(EnvFilter::new(filter));
}

fn init_with_filter(filter: EnvFilter) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        init_tracing_with_filter("debug");
        init_tracing();
        tracing::info!("still logging");
    }
}
