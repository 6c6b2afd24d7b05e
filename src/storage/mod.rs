//! Local storage collaborator
//!
//! Values are addressed by (location, domain, content) keys of 160-bit ids.

pub mod error;
pub mod locks;
pub mod store;
pub mod types;

pub use error::{StorageError, StorageResult};
pub use locks::KeyLocks;
pub use store::{MemoryStorage, MemoryStorageBuilder, Storage};
pub use types::{Id160, StorageKey, StorageStats};
