//! Tracing setup, grounded on the teacher's `infra-common::logging::setup`
//! convention: an `EnvFilter` seeded from the `--log-level` flag (so
//! `RUST_LOG` can still override it), plain non-JSON output to stdout.

use tracing_subscriber::EnvFilter;

pub fn setup(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}
