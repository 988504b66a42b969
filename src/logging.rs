use anyhow::anyhow;
use tracing_subscriber::EnvFilter;

/// Directive used when `RUST_LOG` is not set.
pub const DEFAULT_DIRECTIVE: &str = "cometread=info";

/// Install a formatting subscriber filtered by `RUST_LOG`, falling back to
/// `default_directive`. Fails if a global subscriber is already set.
pub fn init(default_directive: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow!("Failed to install log subscriber: {err}"))
}
