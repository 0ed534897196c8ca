pub mod lock;
mod store;

pub use lock::{LockStats, StoreLock, lock_for};
pub use store::{DocumentStore, DurabilityMode};
