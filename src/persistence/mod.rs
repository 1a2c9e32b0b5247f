//! Concurrent-safe persistence for the local store.

pub mod frontmatter;
pub mod lock;
pub mod store;

pub use frontmatter::ParseError;
pub use lock::{DEFAULT_LOCK_TIMEOUT, LockError, LockGuard, LockInfo, LockManager};
pub use store::{Loaded, RoadmapStore, StoreError};
