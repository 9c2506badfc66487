//! Per-namespace window stores.
//!
//! A store owns a map of identifier → circular time-bucket window. Pushes
//! fold metrics into buckets through a user-supplied lambda, ticks advance
//! every window's clock, and windows whose buckets have all aged out are
//! evicted. A store may mirror itself into a shared persistent key-value
//! log; the in-memory state stays authoritative and persistence failures
//! only cost durability.

pub mod bucket;
pub mod persist;
pub mod store;
pub mod window;

pub use bucket::Bucket;
pub use persist::{PersistError, PersistentLog, SharedLog};
pub use store::{Store, StoreError};
pub use window::Window;
