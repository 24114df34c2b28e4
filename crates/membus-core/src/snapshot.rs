//! Persisted bank selections.
//!
//! The engine only owns which entry each named bank has selected. Storage contents and callback
//! bindings belong to whoever embeds it.

/// Stable snapshot wire-version identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u16)]
pub enum SnapshotVersion {
    /// Initial schema: bank tags and their active entries.
    V1 = 1,
}

impl SnapshotVersion {
    /// Converts a wire value to a known snapshot version.
    #[must_use]
    pub const fn from_u16(version: u16) -> Option<Self> {
        match version {
            1 => Some(Self::V1),
            _ => None,
        }
    }
}

/// Active entry of one named bank.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct BankState {
    /// Bank tag.
    pub tag: String,
    /// Selected entry index.
    pub entry: usize,
}

/// Every bank selection of one memory manager.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MemorySnapshot {
    /// Snapshot schema version.
    pub version: SnapshotVersion,
    /// Banks in tag order.
    pub banks: Vec<BankState>,
}

impl MemorySnapshot {
    /// Wraps bank states in the current schema.
    #[must_use]
    pub const fn new(banks: Vec<BankState>) -> Self {
        Self {
            version: SnapshotVersion::V1,
            banks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BankState, MemorySnapshot, SnapshotVersion};

    #[test]
    fn version_round_trips_through_wire_value() {
        assert_eq!(SnapshotVersion::from_u16(1), Some(SnapshotVersion::V1));
        assert_eq!(SnapshotVersion::from_u16(2), None);
        assert_eq!(SnapshotVersion::V1 as u16, 1);
    }

    #[test]
    fn new_snapshots_use_the_current_schema() {
        let snapshot = MemorySnapshot::new(vec![BankState {
            tag: "rombank".into(),
            entry: 3,
        }]);
        assert_eq!(snapshot.version, SnapshotVersion::V1);
        assert_eq!(snapshot.banks[0].entry, 3);
    }
}
