use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

/// Install the stderr logger. Standard output carries the CGI response, so
/// log lines must never go there.
///
/// Calling this more than once is harmless; later calls are ignored.
pub fn init_logging(filter: &str) -> Result<()> {
    let filter = EnvFilter::try_new(filter)
        .map_err(|e| anyhow!("invalid log filter '{}': {}", filter, e))?;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .try_init();
    Ok(())
}
