//! Signature scanner over the host image.
//!
//! The image is read in fixed-size chunks that overlap by one pattern length,
//! so a match straddling a chunk boundary is still seen. Candidates come from a
//! `memchr::memmem` search for the longest fixed run of the pattern and are
//! then verified byte-by-byte with wildcards.

use memchr::memmem;
use serde::Serialize;
use tracing::{debug, info};

use super::entry::OffsetCategory;
use super::pattern::AnchorPattern;
use crate::memory::{HostHandle, ReadMemory};

const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// What a matched anchor resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScanValue {
    /// Absolute address in the host
    Address(u64),
    /// A field displacement read out of the matched instruction
    Displacement(i32),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    pub name: String,
    /// Absolute address of the first match
    pub match_address: Option<u64>,
    /// `None` when the pattern was not found or its operand could not be read
    pub value: Option<ScanValue>,
}

pub struct Scanner<'a, R: ReadMemory + ?Sized> {
    memory: &'a R,
    host: HostHandle,
    chunk_size: usize,
}

impl<'a, R: ReadMemory + ?Sized> Scanner<'a, R> {
    pub fn new(memory: &'a R, host: HostHandle) -> Self {
        Self {
            memory,
            host,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Resolve every pattern. A miss only affects its own result.
    pub fn scan_all(&self, patterns: &[AnchorPattern]) -> Vec<ScanResult> {
        let results: Vec<ScanResult> = patterns.iter().map(|p| self.scan(p)).collect();
        let found = results.iter().filter(|r| r.value.is_some()).count();
        info!("Scanned {} anchors, {} resolved", results.len(), found);
        results
    }

    pub fn scan(&self, pattern: &AnchorPattern) -> ScanResult {
        let match_address = self.find(pattern);
        let value = match_address.and_then(|address| self.resolve(pattern, address));

        match (match_address, value) {
            (None, _) => debug!("Pattern {} not found", pattern.name),
            (Some(address), None) => {
                debug!("Pattern {} matched at {:#x} but operand is unreadable", pattern.name, address)
            }
            (Some(address), Some(value)) => {
                debug!("Pattern {} matched at {:#x} -> {:?}", pattern.name, address, value)
            }
        }

        ScanResult {
            name: pattern.name.clone(),
            match_address,
            value,
        }
    }

    /// Address of the first match inside the host image
    pub fn find(&self, pattern: &AnchorPattern) -> Option<u64> {
        let len = pattern.len();
        let (run_offset, run) = pattern.longest_fixed_run();
        let finder = memmem::Finder::new(&run);

        let end = self.host.end();
        let mut address = self.host.base;

        while address < end {
            let remaining = (end - address) as usize;
            let size = (self.chunk_size + len - 1).min(remaining);
            if size < len {
                break;
            }

            match self.memory.read_bytes(address, size) {
                Ok(chunk) => {
                    for pos in finder.find_iter(&chunk) {
                        // Matches starting in the previous chunk were already tried
                        let Some(start) = pos.checked_sub(run_offset) else {
                            continue;
                        };
                        if start >= self.chunk_size || start + len > chunk.len() {
                            continue;
                        }
                        if pattern.matches(&chunk[start..start + len]) {
                            return Some(address + start as u64);
                        }
                    }
                }
                Err(e) => debug!("Skipping unreadable chunk: {}", e),
            }

            address = address.saturating_add(self.chunk_size as u64);
        }

        None
    }

    fn resolve(&self, pattern: &AnchorPattern, match_address: u64) -> Option<ScanValue> {
        let operand = match_address.checked_add(u64::try_from(pattern.offset).ok()?)?;

        if pattern.is_relative {
            let displacement = self.memory.read_i32(operand).ok()?;
            let next_instruction =
                match_address.checked_add(u64::try_from(pattern.relative_base).ok()?)?;
            let target = next_instruction.wrapping_add_signed(displacement as i64);
            return Some(ScanValue::Address(target));
        }

        if pattern
            .target()
            .is_some_and(|(category, _)| category == OffsetCategory::StructureField)
        {
            let displacement = self.memory.read_u8(operand).ok()?;
            return Some(ScanValue::Displacement(displacement as i32));
        }

        Some(ScanValue::Address(operand))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryImage, Protection};
    use crate::offset::pattern::builtin_anchors;

    const BASE: u64 = 0x1_4000_0000;

    fn image_with(code: &[(usize, &[u8])], size: usize) -> MemoryImage {
        let mut data = vec![0xCCu8; size];
        for (at, bytes) in code {
            data[*at..*at + bytes.len()].copy_from_slice(bytes);
        }
        MemoryImage::new().with_section(BASE, data, Protection::ExecuteRead)
    }

    fn anchor(name: &str) -> AnchorPattern {
        builtin_anchors()
            .into_iter()
            .find(|a| a.name == name)
            .unwrap()
    }

    #[test]
    fn test_relative_target_resolution() {
        // mov rax, [rip+0x1000]; test rax, rax; jz; mov rax, [rax+8]
        let code: &[u8] = &[
            0x48, 0x8B, 0x05, 0x00, 0x10, 0x00, 0x00, 0x48, 0x85, 0xC0, 0x74, 0x05, 0x48, 0x8B,
            0x40, 0x08,
        ];
        let image = image_with(&[(0x200, code)], 0x4000);
        let scanner = Scanner::new(&image, image.host());

        let result = scanner.scan(&anchor("GameWorld"));
        assert_eq!(result.match_address, Some(BASE + 0x200));
        assert_eq!(result.value, Some(ScanValue::Address(BASE + 0x200 + 7 + 0x1000)));
    }

    #[test]
    fn test_negative_displacement() {
        let disp = (-0x100i32).to_le_bytes();
        let code: &[u8] = &[
            0xF3, 0x0F, 0x10, 0x05, disp[0], disp[1], disp[2], disp[3], 0xF3, 0x0F, 0x5A, 0xC0,
            0x48, 0x8D, 0x4C, 0x24,
        ];
        let image = image_with(&[(0x800, code)], 0x1000);
        let scanner = Scanner::new(&image, image.host());

        let result = scanner.scan(&anchor("GameTime"));
        assert_eq!(result.value, Some(ScanValue::Address(BASE + 0x800 + 8 - 0x100)));
    }

    #[test]
    fn test_misses_are_isolated() {
        let game_world: &[u8] = &[
            0x48, 0x8B, 0x05, 0x10, 0x00, 0x00, 0x00, 0x48, 0x85, 0xC0, 0x74, 0x05, 0x48, 0x8B,
            0x40, 0x08,
        ];
        let position: &[u8] = &[
            0xF3, 0x0F, 0x10, 0x41, 0x70, 0xF3, 0x0F, 0x10, 0x49, 0x74, 0xF3, 0x0F, 0x10, 0x51,
            0x78,
        ];
        let image = image_with(&[(0x40, game_world), (0x900, position)], 0x1000);
        let scanner = Scanner::new(&image, image.host());

        let results = scanner.scan_all(&builtin_anchors());
        assert_eq!(results.len(), 21);

        let resolved: Vec<&str> = results
            .iter()
            .filter(|r| r.value.is_some())
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(resolved, vec!["GameWorld", "CharacterPositionOffset"]);

        let position = results
            .iter()
            .find(|r| r.name == "CharacterPositionOffset")
            .unwrap();
        assert_eq!(position.value, Some(ScanValue::Displacement(0x70)));
    }

    #[test]
    fn test_match_across_chunk_boundary() {
        let code: &[u8] = &[
            0x48, 0x8D, 0x0D, 0x20, 0x00, 0x00, 0x00, 0xE8, 0x00, 0x00, 0x00, 0x00, 0x48, 0x8B,
            0xD8,
        ];
        // Starts 5 bytes before the first 0x100 boundary
        let image = image_with(&[(0xFB, code)], 0x400);
        let scanner = Scanner::new(&image, image.host()).with_chunk_size(0x100);

        assert_eq!(scanner.find(&anchor("PlayerSquadList")), Some(BASE + 0xFB));
    }

    #[test]
    fn test_bad_relative_base_resolves_to_nothing() {
        let code: &[u8] = &[0x48, 0x8B, 0x05, 0x00, 0x10, 0x00, 0x00, 0x48, 0x85, 0xC0];
        let image = image_with(&[(0x10, code)], 0x100);
        let scanner = Scanner::new(&image, image.host());

        // Bypasses validation the way a hand-built table could
        let pattern = AnchorPattern {
            relative_base: -1,
            ..AnchorPattern::from_ida("Evil", "48 8B 05 ?? ?? ?? ?? 48 85 C0", 3, true, 7).unwrap()
        };
        let result = scanner.scan(&pattern);
        assert_eq!(result.match_address, Some(BASE + 0x10));
        assert_eq!(result.value, None);
    }

    #[test]
    fn test_unreadable_image_finds_nothing() {
        let image = MemoryImage::new().with_section(BASE, vec![0; 0x100], Protection::NoAccess);
        let scanner = Scanner::new(&image, image.host());
        let results = scanner.scan_all(&builtin_anchors());
        assert!(results.iter().all(|r| r.value.is_none()));
    }
}
