//! # helmrel-controller
//!
//! Reconciliation engine for release records.
//!
//! ```text
//! store ──► Informer ──► classify ──► WorkQueue ──► workers ──► Reconciler ──► backend
//!              ▲                                                    │
//!              └──────────────── status write-back ◄────────────────┘
//! ```
//!
//! - [`classifier`]: which notifications become work items
//! - [`queue`]: de-duplicating, per-key single-flight, rate-limited queue
//! - [`reconciler`]: install / upgrade / uninstall decision and status write
//! - [`failure`]: `Failed` write-back after retries are exhausted, error sink
//! - [`controller`]: worker pool and lifecycle

pub mod classifier;
mod config;
pub mod controller;
mod error;
pub mod failure;
pub mod queue;
pub mod reconciler;

pub use classifier::classify;
pub use config::{ControllerConfig, DEFAULT_REPO_URL};
pub use controller::Controller;
pub use error::{ControllerError, ErrorKind, ReconcileError};
pub use failure::{ErrorSink, FailureClassifier, TracingErrorSink};
pub use queue::{ExponentialBackoff, WorkQueue};
pub use reconciler::{Action, Reconciler};
