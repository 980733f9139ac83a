//! Codec pipeline: serialize ↔ version envelope ↔ compress ↔ encrypt.
//!
//! # Invariants
//! - Every stage treats empty output as failure, never as valid data.
//! - A failed encode yields no bytes at all; partial output never escapes.
//! - Only envelopes carrying the current schema version decode.

pub mod envelope;
pub mod pipeline;

pub use envelope::{Envelope, SCHEMA_VERSION};
pub use pipeline::{CodecError, decode_payload, encode_payload};
