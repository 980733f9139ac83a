//! Save engine: cache & registry, save coordination, slot management.
//!
//! # Invariants
//! - At most one write is in flight at any time.
//! - At most one queued (not yet started) request exists per saveable key.
//! - Cache mutation and user-visible callbacks run only inside
//!   [`SaveContext::tick`], on the calling thread.

pub mod cache;
pub mod context;
pub mod registry;
pub mod slot;

pub use cache::Cache;
pub use context::SaveContext;
pub use registry::Registry;
pub use slot::SlotPointer;
