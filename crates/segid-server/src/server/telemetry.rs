//! Log output for the server.
//!
//! Events are printed through `tracing_subscriber::fmt`. Verbosity follows
//! `RUST_LOG` and defaults to `info`:
//!
//! ```bash
//! RUST_LOG=segid=debug,info cargo run -p segid-server -- --tag order:0:1000
//! ```
//!
//! Without the `tracing` feature neither the server nor the allocator emit
//! events, but the subscriber is still installed so that dependencies using
//! `log` are captured.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_telemetry() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true)
                .pretty(),
        )
        .try_init()?;
    Ok(())
}
