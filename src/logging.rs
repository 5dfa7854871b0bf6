//! Tracing setup for binaries embedding Kestrel

use std::io::stderr;
use tracing::debug;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, prelude::*, registry, EnvFilter};

const CRATES: [&str; 5] = [
    "kestrel",
    "kestrel_objstore",
    "kestrel_operation",
    "kestrel_inventory",
    "kestrel_workflow",
];

/// Filter directives used when `RUST_LOG` is unset
pub fn default_directives(verbose: bool) -> String {
    let level = if verbose { "debug" } else { "info" };
    let mut directives: Vec<String> = CRATES.iter().map(|c| format!("{}={}", c, level)).collect();
    directives.extend(
        ["hyper=warn", "reqwest=warn", "h2=warn", "rustls=warn"]
            .iter()
            .map(|d| d.to_string()),
    );
    directives.join(",")
}

/// Install the global subscriber, logging to stderr
///
/// `RUST_LOG` takes precedence over the built-in directives. Fails if a
/// global subscriber is already set.
pub fn init_tracing(verbose: bool) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));

    registry()
        .with(filter)
        .with(fmt::layer().with_writer(stderr))
        .try_init()?;

    debug!("Global subscriber initialized");
    Ok(())
}
