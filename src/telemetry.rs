//! Tracing setup.
//!
//! Hosts embedding the engine usually own the global subscriber; `init` is
//! for binaries and tests that want a sane default. Filtering comes from
//! `LECTIO_LOG` (standard `EnvFilter` syntax), falling back to the given
//! default directive.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

pub const ENV_FILTER_VAR: &str = "LECTIO_LOG";

/// Install a global fmt subscriber. Safe to call more than once; later calls
/// are no-ops.
pub fn init(default_directive: &str) {
    let filter = EnvFilter::try_from_env(ENV_FILTER_VAR)
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let fmt = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);
    let _ = Registry::default().with(filter).with(fmt).try_init();
}
