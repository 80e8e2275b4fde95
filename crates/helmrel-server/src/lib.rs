//! The helmrel process: configuration loading, logging, startup checks,
//! manifest ingestion, signal handling and the release controller.

pub mod bootstrap;
pub mod config;
pub mod config_watch;
pub mod manifests;
pub mod observability;
pub mod server;
pub mod signals;
pub mod watch;

pub use server::{HelmrelServer, ServerBuilder};
