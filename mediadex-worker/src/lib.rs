//! # Mediadex Worker
//!
//! Runs the thumbnail worker pool against a shared Redis queue and exposes
//! the library operations to operators from the command line.
//!
//! ## Architecture
//!
//! - [`config`] merges CLI flags, environment, `mediadex.toml` and defaults
//! - [`runtime`] turns a [`config::Config`] into a [`mediadex_core::library::MediaLibrary`]
//!   with PostgreSQL or in-memory metadata and Redis or in-process thumbnail backends

pub mod config;
pub mod runtime;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,mediadex_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
