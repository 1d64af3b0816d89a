//! `tracing` subscriber setup. Logs go to stderr so they interleave with the progress bar.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "warn,lnscrape=info";
const VERBOSE_FILTER: &str = "warn,lnscrape=debug";

/// Install the global subscriber. `RUST_LOG` wins over `verbose`. A second call is a no-op.
pub fn init(verbose: bool) {
    let fallback = if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER };
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback.into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init();
}
