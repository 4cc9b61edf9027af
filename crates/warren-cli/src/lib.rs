pub mod aliases;
pub mod cli;

/// Initialise the tracing subscriber. `RUST_LOG` wins when set; otherwise
/// the default level is `info`, or `debug` when verbose output was asked
/// for.
pub fn init_tracing(verbose: bool) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let fallback = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .try_init();
}
