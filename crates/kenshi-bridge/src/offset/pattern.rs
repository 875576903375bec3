//! Anchor patterns: byte signatures that locate a value inside the host image.

use serde::{Deserialize, Serialize};

use super::entry::OffsetCategory;
use crate::error::{Error, Result};

/// A byte signature with wildcards and the rule for turning a match into a value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorPattern {
    pub name: String,
    /// `None` is a wildcard byte
    pub bytes: Vec<Option<u8>>,
    /// Displacement from the match start to the operand of interest
    pub offset: i32,
    /// Follow a rip-relative displacement instead of using the match address
    pub is_relative: bool,
    /// Length of the instruction the displacement is relative to
    pub relative_base: i32,
}

impl AnchorPattern {
    /// Build from IDA-style text (`48 8B 05 ?? ?? ?? ??`)
    pub fn from_ida(
        name: &str,
        pattern: &str,
        offset: i32,
        is_relative: bool,
        relative_base: i32,
    ) -> Result<Self> {
        Self {
            name: name.to_string(),
            bytes: parse_pattern(pattern)?,
            offset,
            is_relative,
            relative_base,
        }
        .validated()
    }

    /// Build from a byte string plus an `x`/`?` mask of the same length
    pub fn from_masked(
        name: &str,
        bytes: &[u8],
        mask: &str,
        offset: i32,
        is_relative: bool,
        relative_base: i32,
    ) -> Result<Self> {
        Self {
            name: name.to_string(),
            bytes: apply_mask(bytes, mask)?,
            offset,
            is_relative,
            relative_base,
        }
        .validated()
    }

    fn validated(self) -> Result<Self> {
        if self.bytes.iter().all(Option::is_none) {
            return Err(Error::InvalidPattern(format!(
                "{}: pattern has no fixed bytes",
                self.name
            )));
        }
        if self.offset < 0 || (self.is_relative && self.offset as usize + 4 > self.bytes.len()) {
            return Err(Error::InvalidPattern(format!(
                "{}: operand offset {} is outside the pattern",
                self.name, self.offset
            )));
        }
        // The displacement is relative to an address at or past the operand's end
        if self.is_relative && i64::from(self.relative_base) < i64::from(self.offset) + 4 {
            return Err(Error::InvalidPattern(format!(
                "{}: relative base {} precedes the end of the operand",
                self.name, self.relative_base
            )));
        }
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn matches(&self, window: &[u8]) -> bool {
        window.len() >= self.bytes.len()
            && self
                .bytes
                .iter()
                .zip(window)
                .all(|(p, b)| p.is_none_or(|p| p == *b))
    }

    /// Longest run of fixed bytes and its position inside the pattern
    pub fn longest_fixed_run(&self) -> (usize, Vec<u8>) {
        let mut best = (0usize, Vec::new());
        let mut current = (0usize, Vec::new());
        for (i, byte) in self.bytes.iter().enumerate() {
            match byte {
                Some(b) => {
                    if current.1.is_empty() {
                        current.0 = i;
                    }
                    current.1.push(*b);
                    if current.1.len() > best.1.len() {
                        best = current.clone();
                    }
                }
                None => current.1.clear(),
            }
        }
        best
    }

    /// IDA-style text for export
    pub fn to_ida(&self) -> String {
        format_pattern(&self.bytes)
    }

    /// Byte string (wildcards as zero) and `x`/`?` mask for export
    pub fn to_masked(&self) -> (String, String) {
        let bytes = self
            .bytes
            .iter()
            .map(|b| format!("{:02X}", b.unwrap_or(0)))
            .collect::<Vec<_>>()
            .join(" ");
        let mask = self
            .bytes
            .iter()
            .map(|b| if b.is_some() { 'x' } else { '?' })
            .collect();
        (bytes, mask)
    }

    /// Table entry this anchor resolves, matched case-insensitively by name
    pub fn target(&self) -> Option<(OffsetCategory, &'static str)> {
        ANCHOR_TARGETS
            .iter()
            .find(|(name, _, _)| name.eq_ignore_ascii_case(&self.name))
            .map(|(_, category, key)| (*category, *key))
    }
}

pub fn parse_pattern(pattern: &str) -> Result<Vec<Option<u8>>> {
    let mut bytes = Vec::new();
    for token in pattern.split_whitespace() {
        if token == "??" || token == "?" {
            bytes.push(None);
            continue;
        }

        let value = u8::from_str_radix(token, 16).map_err(|e| {
            Error::InvalidPattern(format!("Invalid pattern token '{}': {}", token, e))
        })?;
        bytes.push(Some(value));
    }

    if bytes.is_empty() {
        return Err(Error::InvalidPattern("Pattern is empty".to_string()));
    }

    Ok(bytes)
}

pub fn format_pattern(bytes: &[Option<u8>]) -> String {
    bytes
        .iter()
        .map(|b| match b {
            Some(value) => format!("{:02X}", value),
            None => "??".to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn apply_mask(bytes: &[u8], mask: &str) -> Result<Vec<Option<u8>>> {
    if bytes.len() != mask.len() {
        return Err(Error::InvalidPattern(format!(
            "Mask length {} does not match pattern length {}",
            mask.len(),
            bytes.len()
        )));
    }

    mask.chars()
        .zip(bytes)
        .map(|(m, b)| match m {
            'x' | 'X' => Ok(Some(*b)),
            '?' => Ok(None),
            other => Err(Error::InvalidPattern(format!("Invalid mask character '{}'", other))),
        })
        .collect()
}

/// Parse the byte half of a remote pattern: space-separated hex or `\x48`-escaped
pub fn parse_pattern_bytes(text: &str) -> Result<Vec<u8>> {
    let cleaned = text.replace("\\x", " ");
    cleaned
        .split_whitespace()
        .map(|token| {
            u8::from_str_radix(token, 16).map_err(|e| {
                Error::InvalidPattern(format!("Invalid pattern byte '{}': {}", token, e))
            })
        })
        .collect()
}

/// Which table entry each known anchor name fills
const ANCHOR_TARGETS: &[(&str, OffsetCategory, &str)] = &[
    ("GameWorld", OffsetCategory::Global, "Game.WorldInstance"),
    ("PlayerSquadList", OffsetCategory::Global, "Characters.PlayerSquadList"),
    ("AllCharactersList", OffsetCategory::Global, "Characters.AllCharactersList"),
    ("FactionManager", OffsetCategory::Global, "Factions.FactionList"),
    ("WeatherSystem", OffsetCategory::Global, "World.WeatherSystem"),
    ("GameTime", OffsetCategory::Global, "Game.GameTime"),
    ("InputHandler", OffsetCategory::Global, "Input.InputHandler"),
    ("CameraController", OffsetCategory::Global, "Engine.Camera"),
    ("BuildingManager", OffsetCategory::Global, "World.BuildingList"),
    ("SpawnCharacter", OffsetCategory::Function, "SpawnCharacter"),
    ("CharacterUpdate", OffsetCategory::Function, "CharacterUpdate"),
    ("CombatSystem", OffsetCategory::Function, "CombatAttack"),
    ("AIUpdate", OffsetCategory::Function, "AIUpdate"),
    ("PathfindRequest", OffsetCategory::Function, "PathfindRequest"),
    ("InventoryAddItem", OffsetCategory::Function, "AddItemToInventory"),
    ("InventoryRemoveItem", OffsetCategory::Function, "RemoveItemFromInventory"),
    ("SetFactionRelation", OffsetCategory::Function, "SetFactionRelation"),
    ("AddToSquad", OffsetCategory::Function, "AddToSquad"),
    ("SetCharacterState", OffsetCategory::Function, "SetCharacterState"),
    ("IssueMovementCommand", OffsetCategory::Function, "IssueCommand"),
    ("CharacterPositionOffset", OffsetCategory::StructureField, "Character.Position"),
];

/// Anchors whose absence makes a scan unusable
pub const CRITICAL_ANCHORS: &[&str] = &["GameWorld", "PlayerSquadList", "AllCharactersList"];

/// (name, pattern, operand offset, relative, instruction length)
const BUILTIN: &[(&str, &str, i32, bool, i32)] = &[
    ("GameWorld", "48 8B 05 ?? ?? ?? ?? 48 85 C0 74 ?? 48 8B 40 08", 3, true, 7),
    ("PlayerSquadList", "48 8D 0D ?? ?? ?? ?? E8 ?? ?? ?? ?? 48 8B D8", 3, true, 7),
    ("AllCharactersList", "48 8B 05 ?? ?? ?? ?? 48 8B 04 C8 48 85 C0", 3, true, 7),
    ("FactionManager", "48 8B 0D ?? ?? ?? ?? E8 ?? ?? ?? ?? 48 8B C8 48 8B 10", 3, true, 7),
    ("WeatherSystem", "48 8B 05 ?? ?? ?? ?? F3 0F 10 40 ?? F3 0F 58 05", 3, true, 7),
    ("GameTime", "F3 0F 10 05 ?? ?? ?? ?? F3 0F 5A C0 48 8D 4C 24", 4, true, 8),
    (
        "SpawnCharacter",
        "48 89 5C 24 ?? 48 89 74 24 ?? 57 48 83 EC 40 48 8B F2 48 8B F9",
        0,
        false,
        0,
    ),
    (
        "CharacterUpdate",
        "48 89 5C 24 ?? 48 89 6C 24 ?? 48 89 74 24 ?? 57 41 56 41 57 48 83 EC 20 48 8B E9",
        0,
        false,
        0,
    ),
    ("CharacterPositionOffset", "F3 0F 10 41 ?? F3 0F 10 49 ?? F3 0F 10 51 ??", 4, false, 0),
    ("InputHandler", "48 8B 0D ?? ?? ?? ?? 48 8B 01 FF 50 ?? 84 C0", 3, true, 7),
    ("CameraController", "48 8B 05 ?? ?? ?? ?? 48 8B 48 08 F3 0F 10", 3, true, 7),
    ("BuildingManager", "48 8B 0D ?? ?? ?? ?? 48 85 C9 74 ?? 48 8B 01 FF 90", 3, true, 7),
    (
        "CombatSystem",
        "48 89 5C 24 ?? 55 56 57 41 54 41 55 41 56 41 57 48 8D 6C 24 ?? 48 81 EC ?? ?? ?? ?? 4C 8B F2",
        0,
        false,
        0,
    ),
    (
        "AIUpdate",
        "40 53 48 83 EC 20 48 8B 41 ?? 48 8B D9 48 85 C0 74 ?? 48 8B 08",
        0,
        false,
        0,
    ),
    (
        "PathfindRequest",
        "48 89 5C 24 ?? 48 89 6C 24 ?? 48 89 74 24 ?? 48 89 7C 24 ?? 41 56 48 83 EC 30",
        0,
        false,
        0,
    ),
    (
        "InventoryAddItem",
        "48 89 5C 24 ?? 48 89 74 24 ?? 57 48 83 EC 20 49 8B F8 48 8B F2 48 8B D9",
        0,
        false,
        0,
    ),
    (
        "InventoryRemoveItem",
        "48 89 5C 24 ?? 48 89 6C 24 ?? 48 89 74 24 ?? 57 48 83 EC 30 8B EA",
        0,
        false,
        0,
    ),
    (
        "SetFactionRelation",
        "48 89 5C 24 ?? 57 48 83 EC 20 8B FA 48 8B D9 85 D2 78",
        0,
        false,
        0,
    ),
    (
        "AddToSquad",
        "48 89 5C 24 ?? 48 89 74 24 ?? 57 48 83 EC 20 48 8B FA 48 8B F1 48 85 D2",
        0,
        false,
        0,
    ),
    (
        "SetCharacterState",
        "48 89 5C 24 ?? 57 48 83 EC 20 8B FA 48 8B D9 39 91",
        0,
        false,
        0,
    ),
    (
        "IssueMovementCommand",
        "48 89 5C 24 ?? 48 89 74 24 ?? 48 89 7C 24 ?? 55 41 54 41 55 41 56 41 57",
        0,
        false,
        0,
    ),
];

/// The compiled-in anchor set
pub fn builtin_anchors() -> Vec<AnchorPattern> {
    BUILTIN
        .iter()
        .filter_map(|(name, pattern, offset, relative, base)| {
            AnchorPattern::from_ida(name, pattern, *offset, *relative, *base).ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pattern_with_wildcards() {
        let bytes = parse_pattern("48 8B 05 ?? ?? ?? ??").unwrap();
        assert_eq!(bytes.len(), 7);
        assert_eq!(bytes[2], Some(0x05));
        assert_eq!(bytes[3], None);
        assert!(parse_pattern("").is_err());
        assert!(parse_pattern("48 GG").is_err());
    }

    #[test]
    fn test_masked_pattern_matches_ida_form() {
        let masked = AnchorPattern::from_masked(
            "GameWorld",
            &[0x48, 0x8B, 0x05, 0, 0, 0, 0, 0x48],
            "xxx????x",
            3,
            true,
            7,
        )
        .unwrap();
        let ida = AnchorPattern::from_ida("GameWorld", "48 8B 05 ?? ?? ?? ?? 48", 3, true, 7).unwrap();
        assert_eq!(masked, ida);

        let (bytes, mask) = ida.to_masked();
        assert_eq!(bytes, "48 8B 05 00 00 00 00 48");
        assert_eq!(mask, "xxx????x");
    }

    #[test]
    fn test_mask_length_mismatch_rejected() {
        let err = AnchorPattern::from_masked("Bad", &[0x48, 0x8B], "x", 0, false, 0).unwrap_err();
        assert!(matches!(err, Error::InvalidPattern(_)));
    }

    #[test]
    fn test_relative_operand_must_fit() {
        assert!(AnchorPattern::from_ida("Short", "48 8B 05 ??", 3, true, 7).is_err());
        assert!(AnchorPattern::from_ida("Wild", "?? ??", 0, false, 0).is_err());
    }

    #[test]
    fn test_relative_base_behind_operand_rejected() {
        let text = "48 8B 05 ?? ?? ?? ?? 48 85 C0";
        assert!(AnchorPattern::from_ida("Negative", text, 3, true, -1).is_err());
        assert!(AnchorPattern::from_ida("Inside", text, 3, true, 6).is_err());
        assert!(AnchorPattern::from_ida("Exact", text, 3, true, 7).is_ok());
        // Only relative anchors use the base
        assert!(AnchorPattern::from_ida("Plain", text, 3, false, -1).is_ok());
    }

    #[test]
    fn test_longest_fixed_run() {
        let pattern = AnchorPattern::from_ida("Run", "48 ?? 0F 10 41 ?? F3", 0, false, 0).unwrap();
        assert_eq!(pattern.longest_fixed_run(), (2, vec![0x0F, 0x10, 0x41]));
        assert!(pattern.matches(&[0x48, 0xAA, 0x0F, 0x10, 0x41, 0xBB, 0xF3]));
        assert!(!pattern.matches(&[0x48, 0xAA, 0x0F, 0x10, 0x42, 0xBB, 0xF3]));
    }

    #[test]
    fn test_builtin_anchor_targets() {
        let anchors = builtin_anchors();
        assert_eq!(anchors.len(), 21);
        for anchor in &anchors {
            assert!(anchor.target().is_some(), "{} has no target", anchor.name);
        }

        let remote_named = AnchorPattern::from_ida("gameWorld", "48 8B 05 ?? ?? ?? ??", 3, true, 7)
            .unwrap();
        assert_eq!(
            remote_named.target(),
            Some((OffsetCategory::Global, "Game.WorldInstance"))
        );
    }
}
