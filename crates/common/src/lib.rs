//! Shared vocabulary for the keepsake save system: slot ids, cache keys,
//! the [`Saveable`] capability, and host-provided configuration.
//!
//! # Invariants
//! - A saveable key is unique per type and stable across runs.
//! - Slot ids are positive; slot 1 is the default context.

pub mod config;
pub mod types;

pub use config::SaveConfig;
pub use types::{CacheKey, Saveable, SlotId};
