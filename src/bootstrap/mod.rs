//! Process bootstrap
//!
//! - [`config`] reads the TOML configuration file.
//! - [`tracing`] installs the global subscriber.
//! - [`wiring`] assembles adapters into a running [`vs_app::SyncRuntime`].

pub mod config;
pub mod tracing;
pub mod wiring;
