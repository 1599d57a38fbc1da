use anyhow::{Result, anyhow};
use tracing_subscriber::EnvFilter;

/// Installs the console subscriber. `RUST_LOG` wins over `--log-level`;
/// with neither set the level is `info`.
pub fn init(level: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.unwrap_or("info")))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow!("cannot install logger: {e}"))
}
