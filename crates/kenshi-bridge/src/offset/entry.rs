use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Kind of value an offset entry names
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize,
    Deserialize,
)]
pub enum OffsetCategory {
    /// Module-relative address of a global pointer
    Global,
    /// Module-relative entry point of a native function
    Function,
    /// Displacement of a field inside a host record
    StructureField,
}

/// Where an offset value came from, in priority order
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize,
    Deserialize,
)]
pub enum OffsetSourceKind {
    Remote,
    Scanned,
    Hardcoded,
}

/// One named offset.
///
/// Globals and functions hold a module-relative address; structure fields hold
/// a signed displacement widened to `i64`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OffsetEntry {
    pub name: &'static str,
    pub category: OffsetCategory,
    pub value: i64,
    pub source: OffsetSourceKind,
}

impl OffsetEntry {
    pub fn is_resolved(&self) -> bool {
        self.value != 0
    }
}
