//! # helmrel-storage
//!
//! Storage/watch collaborator for the release controller.
//!
//! - [`ReleaseStore`]: schema registration, list+watch, conflict-checked
//!   status updates
//! - [`MemoryStore`]: in-memory implementation used by tests and the
//!   manifest-directory mode of the server
//! - [`Informer`]: keyed read-through cache plus tagged watch events,
//!   with periodic resync and relist on lag

mod error;
pub mod informer;
pub mod memory;
mod traits;

pub use error::{ErrorCategory, StorageError};
pub use informer::{EventHandler, Informer, ReleaseCache};
pub use memory::MemoryStore;
pub use traits::{ListWatch, ReleaseStore, SchemaRegistration};

/// Type alias for a storage result.
pub type StorageResult<T> = Result<T, StorageError>;

/// Type alias for a shared store trait object.
pub type DynStore = std::sync::Arc<dyn ReleaseStore>;
