use anyhow::{Result, anyhow};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "feed_import=info";
const DEBUG_LOG_FILTER: &str = "feed_import=debug,mongodb=info";

/// Installs the global subscriber. `RUST_LOG` wins over the debug toggle.
pub fn init_logging(debug: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if debug {
            DEBUG_LOG_FILTER
        } else {
            DEFAULT_LOG_FILTER
        })
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("failed to install log subscriber: {e}"))
}
