//! Building blocks of the `segid-server` binary.
//!
//! - [`config`] - CLI/env configuration.
//! - [`seed`] - initial allocation rows for the in-memory store.
//! - [`routes`] - HTTP endpoints around the allocator.
//! - [`telemetry`] - log output.

pub mod config;
pub mod routes;
pub mod seed;
pub mod telemetry;
