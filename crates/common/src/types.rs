use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Identifier of an independent save context ("slot").
///
/// Every saveable instance is stored once per slot; slots never share files.
/// Ids are positive: slot 0 is never valid, and constructing one directly
/// is a host error. Use [`SlotId::new`] when the id comes from untrusted
/// input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotId(pub u32);

impl SlotId {
    /// The slot every context starts in.
    pub const DEFAULT: SlotId = SlotId(1);

    /// Checked constructor rejecting the invalid slot 0.
    pub fn new(raw: u32) -> Option<Self> {
        (raw > 0).then_some(Self(raw))
    }
}

impl Default for SlotId {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Capability for application state that can be persisted.
///
/// Implementors supply a stable key and a serializable snapshot of their
/// state. Submission to the coordinator is copy-by-value: the value passed
/// in is the value that gets written, regardless of later mutation by the
/// caller.
pub trait Saveable:
    Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static
{
    /// Stable identity of this payload type. Unique per type, must not
    /// change across runs: it is baked into file names on disk.
    const KEY: &'static str;
}

/// Addresses one cached or stored instance: a saveable key paired with a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub key: &'static str,
    pub slot: SlotId,
}

impl CacheKey {
    pub fn new(key: &'static str, slot: SlotId) -> Self {
        Self { key, slot }
    }
}
