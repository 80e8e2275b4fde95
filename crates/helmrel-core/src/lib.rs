//! Core types shared by every helmrel crate.
//!
//! - [`release`]: the desired-state record (`ReleaseRecord`), its key and the
//!   deployed-instance naming function
//! - [`phase`]: the lifecycle phase and its transition rules
//! - [`events`]: storage change events, informer watch events and the
//!   broadcaster that carries them

pub mod error;
pub mod events;
pub mod phase;
pub mod release;

pub use error::{CoreError, Result};
pub use events::{EventBroadcaster, StoreEvent, WatchEvent, WatchEventType};
pub use phase::Phase;
pub use release::{
    ObjectMeta, ReleaseKey, ReleaseRecord, ReleaseSpec, ReleaseStatus, instance_name,
};
