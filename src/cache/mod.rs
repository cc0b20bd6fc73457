//! Write-back object cache: in-memory authority plus background
//! persistence.

pub mod dirty;
pub mod entries;
pub mod flusher;
pub mod gate;
pub mod lock;
pub mod queue;
pub mod store;

pub use dirty::{PersistState, SaveAction, Tracked};
pub use entries::{AdvEntry, EntityKind, Flushable, PhotoEntry, UserEntry, WatchesEntry};
pub use flusher::FlushScheduler;
pub use gate::AdmissionGate;
pub use queue::DirtyQueue;
pub use store::{AdvView, CreateAdvParams, CreateUserParams, ListFilter, ObjectCache};
