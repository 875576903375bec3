//! Immutable offset database snapshot.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::entry::{OffsetCategory, OffsetEntry, OffsetSourceKind};
use super::tables::{FunctionOffsets, GlobalOffsets, StructureOffsets};

/// Schema of the tables this build understands
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseMetadata {
    pub schema_version: u32,
    /// Host build the tables were produced for; empty when unknown
    pub game_version: String,
    /// Valid for every host build
    pub is_universal: bool,
    pub created_at: DateTime<Utc>,
    /// Integrity token over the encoded tables
    pub checksum: String,
}

impl DatabaseMetadata {
    pub fn new(game_version: impl Into<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            game_version: game_version.into(),
            is_universal: false,
            created_at: Utc::now(),
            checksum: String::new(),
        }
    }

    pub fn universal(mut self, is_universal: bool) -> Self {
        self.is_universal = is_universal;
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// One resolution result: all three tables plus where they came from.
///
/// Built once per resolution attempt and never modified afterwards; a refresh
/// replaces the whole snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OffsetDatabase {
    pub metadata: DatabaseMetadata,
    pub source: OffsetSourceKind,
    pub globals: GlobalOffsets,
    pub functions: FunctionOffsets,
    pub structures: StructureOffsets,
    /// Keys the source did not produce and that were filled from the compiled-in table
    fallback: BTreeSet<&'static str>,
}

impl OffsetDatabase {
    pub fn new(
        source: OffsetSourceKind,
        mut metadata: DatabaseMetadata,
        globals: GlobalOffsets,
        functions: FunctionOffsets,
        structures: StructureOffsets,
    ) -> Self {
        if metadata.checksum.is_empty() {
            metadata.checksum = integrity_token(&globals, &functions, &structures);
        }
        Self {
            metadata,
            source,
            globals,
            functions,
            structures,
            fallback: BTreeSet::new(),
        }
    }

    /// Mark keys as having been filled from the compiled-in table
    pub fn with_fallback<I: IntoIterator<Item = &'static str>>(mut self, keys: I) -> Self {
        self.fallback.extend(keys);
        self
    }

    /// At least one critical global pointer is non-zero
    pub fn is_valid(&self) -> bool {
        self.globals.has_critical()
    }

    pub fn source_of(&self, name: &str) -> OffsetSourceKind {
        if self.fallback.contains(name) {
            OffsetSourceKind::Hardcoded
        } else {
            self.source
        }
    }

    /// Raw value of a named entry, `None` for an unknown name
    pub fn get(&self, category: OffsetCategory, name: &str) -> Option<i64> {
        match category {
            OffsetCategory::Global => self.globals.get(name).map(|v| v as i64),
            OffsetCategory::Function => self.functions.get(name).map(|v| v as i64),
            OffsetCategory::StructureField => self.structures.get(name).map(i64::from),
        }
    }

    /// Every entry in table order
    pub fn entries(&self) -> Vec<OffsetEntry> {
        let globals = self
            .globals
            .iter()
            .map(|(name, value)| (name, OffsetCategory::Global, value as i64));
        let functions = self
            .functions
            .iter()
            .map(|(name, value)| (name, OffsetCategory::Function, value as i64));
        let structures = self
            .structures
            .iter()
            .map(|(name, value)| (name, OffsetCategory::StructureField, i64::from(value)));

        globals
            .chain(functions)
            .chain(structures)
            .map(|(name, category, value)| OffsetEntry {
                name,
                category,
                value,
                source: self.source_of(name),
            })
            .collect()
    }

    pub fn resolved_count(&self) -> usize {
        self.entries().iter().filter(|e| e.is_resolved()).count()
    }
}

/// FNV-1a over the little-endian encoding of the three tables
pub fn integrity_token(
    globals: &GlobalOffsets,
    functions: &FunctionOffsets,
    structures: &StructureOffsets,
) -> String {
    let mut bytes = Vec::new();
    globals.encode(&mut bytes);
    functions.encode(&mut bytes);
    structures.encode(&mut bytes);

    let hash = bytes.iter().fold(0xcbf2_9ce4_8422_2325u64, |hash, b| {
        (hash ^ *b as u64).wrapping_mul(0x0100_0000_01b3)
    });
    format!("{:016x}", hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn database() -> OffsetDatabase {
        let mut globals = GlobalOffsets::default();
        globals.world_instance = 0x24D_8F40;
        let mut functions = FunctionOffsets::default();
        functions.spawn_character = 0x8B_3C80;
        let mut structures = StructureOffsets::default();
        structures.character_health = 0xC0;

        OffsetDatabase::new(
            OffsetSourceKind::Scanned,
            DatabaseMetadata::new("1.0.64"),
            globals,
            functions,
            structures,
        )
        .with_fallback(["SpawnCharacter"])
    }

    #[test]
    fn test_entries_carry_category_and_source() {
        let db = database();
        let entries = db.entries();
        assert_eq!(
            entries.len(),
            GlobalOffsets::KEYS.len() + FunctionOffsets::KEYS.len() + StructureOffsets::KEYS.len()
        );

        let world = &entries[0];
        assert_eq!(world.name, "Game.WorldInstance");
        assert_eq!(world.category, OffsetCategory::Global);
        assert_eq!(world.source, OffsetSourceKind::Scanned);

        let spawn = entries.iter().find(|e| e.name == "SpawnCharacter").unwrap();
        assert_eq!(spawn.source, OffsetSourceKind::Hardcoded);
        assert_eq!(spawn.value, 0x8B_3C80);

        assert_eq!(db.resolved_count(), 3);
    }

    #[test]
    fn test_get_by_category() {
        let db = database();
        assert_eq!(db.get(OffsetCategory::Global, "Game.WorldInstance"), Some(0x24D_8F40));
        assert_eq!(db.get(OffsetCategory::StructureField, "Character.Health"), Some(0xC0));
        // Names are scoped to their category
        assert_eq!(db.get(OffsetCategory::Function, "Game.WorldInstance"), None);
    }

    #[test]
    fn test_checksum_tracks_table_contents() {
        let a = database();
        let mut b = database();
        assert_eq!(a.metadata.checksum, b.metadata.checksum);

        b.globals.camera = 1;
        let recomputed = integrity_token(&b.globals, &b.functions, &b.structures);
        assert_ne!(a.metadata.checksum, recomputed);
        assert!(a.is_valid());
    }
}
