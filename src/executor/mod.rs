mod dispatch;
mod registry;

pub use dispatch::{Dispatched, Dispatcher, MutationPolicy};
pub use registry::{DEFAULT_SCRIPT_CACHE_CAPACITY, OperationRegistry, ScriptLoading};
