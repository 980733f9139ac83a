use keepsake_common::{Saveable, SlotId};
use serde::{Deserialize, Serialize};

/// The active-slot record.
///
/// Persisted like any other payload so the current slot survives restarts.
/// Always present in the registry; bootstrap adopts its stored value as the
/// authoritative slot after the load pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotPointer {
    pub current_slot: SlotId,
}

impl Default for SlotPointer {
    fn default() -> Self {
        Self {
            current_slot: SlotId::DEFAULT,
        }
    }
}

impl Saveable for SlotPointer {
    const KEY: &'static str = "SlotPointer";
}
