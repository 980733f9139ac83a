use serde::{Deserialize, Serialize};

/// Current envelope schema version. Files carrying any other version are
/// treated as absent on load.
pub const SCHEMA_VERSION: u32 = 1;

/// Versioned wrapper around a serialized payload.
///
/// The payload boundary is a typed field, so extraction never depends on
/// positional text slicing in the serialized document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u32,
    pub data: serde_json::Value,
}

impl Envelope {
    /// Wrap a payload under the current schema version.
    pub fn new(data: serde_json::Value) -> Self {
        Self {
            version: SCHEMA_VERSION,
            data,
        }
    }
}
