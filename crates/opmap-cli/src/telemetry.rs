//! Logging setup

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "warn,opmap=info,opmap_core=info";
const VERBOSE_FILTER: &str = "info,opmap=debug,opmap_core=debug";

/// Install the global subscriber; `RUST_LOG` wins over the flags
pub(crate) fn init(verbose: bool, json: bool) {
    let default = if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
    if let Err(err) = result {
        eprintln!("warning: logging already initialized: {err}");
    }
}
