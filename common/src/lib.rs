//! Shared process plumbing for the audio bridge binaries.
//!
//! Tracing setup, the CLI color policy and the Prometheus registry live here
//! so every binary in the workspace reports and logs the same way.

pub mod cli;
pub mod observability;

pub use cli::ColorWhen;
pub use observability::{init_tracing, MetricsContext, MetricsServerConfig};
