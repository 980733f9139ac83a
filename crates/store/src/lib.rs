//! File-backed save storage.
//!
//! Layout inside the save directory:
//! ```text
//! {save_path}/{KEY}_{slot}{extension}   - one file per (saveable, slot)
//! ```
//!
//! The store never deletes files on its own; the bulk deletion operations
//! exist for administrative tooling.

pub mod file_store;

pub use file_store::{FileStore, StoreError};
