//! Change notifications for release records.
//!
//! ```text
//! ┌──────────────┐  StoreEvent   ┌──────────┐  WatchEvent   ┌────────────┐
//! │ ReleaseStore │ ────────────► │ Informer │ ────────────► │ Controller │
//! └──────────────┘ (broadcaster) └──────────┘  (handlers)   └────────────┘
//! ```
//!
//! - [`types`]: `StoreEvent` (raw writes) and `WatchEvent` (old/new pairs)
//! - [`broadcaster`]: multi-subscriber channel the store publishes on

pub mod broadcaster;
pub mod types;

pub use broadcaster::EventBroadcaster;
pub use types::{StoreEvent, WatchEvent, WatchEventType};
