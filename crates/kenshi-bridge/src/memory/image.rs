//! In-memory host region.
//!
//! `MemoryImage` stands in for a live host process: a set of sections, each with
//! a base address, its bytes and a page protection. It backs the tests and lets
//! the CLI scan an image dump loaded from disk.

use std::fs;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use super::process::HostHandle;
use super::reader::{
    AccessFault, AccessResult, FaultKind, ProtectPages, Protection, ReadMemory, WriteMemory,
};

#[derive(Debug, Clone)]
struct Section {
    base: u64,
    data: Vec<u8>,
    protection: Protection,
}

impl Section {
    fn end(&self) -> u64 {
        self.base.saturating_add(self.data.len() as u64)
    }

    fn contains(&self, address: u64) -> bool {
        address >= self.base && address < self.end()
    }
}

#[derive(Debug, Default)]
pub struct MemoryImage {
    sections: RwLock<Vec<Section>>,
}

impl MemoryImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style variant of [`MemoryImage::map`]
    pub fn with_section(self, base: u64, data: Vec<u8>, protection: Protection) -> Self {
        self.map(base, data, protection);
        self
    }

    /// Map a new section. Overlapping an existing section is not checked.
    pub fn map(&self, base: u64, data: Vec<u8>, protection: Protection) {
        let mut sections = self.sections.write().unwrap_or_else(PoisonError::into_inner);
        sections.push(Section {
            base,
            data,
            protection,
        });
        sections.sort_by_key(|s| s.base);
    }

    /// Remove the section starting at `base`, simulating a freed host record
    pub fn unmap(&self, base: u64) -> bool {
        let mut sections = self.sections.write().unwrap_or_else(PoisonError::into_inner);
        let before = sections.len();
        sections.retain(|s| s.base != base);
        sections.len() != before
    }

    /// Load a raw image dump as a single executable section
    pub fn from_file<P: AsRef<Path>>(path: P, base: u64) -> std::io::Result<Self> {
        let data = fs::read(path)?;
        Ok(Self::new().with_section(base, data, Protection::ExecuteRead))
    }

    pub fn protection_at(&self, address: u64) -> Option<Protection> {
        let sections = self.sections.read().unwrap_or_else(PoisonError::into_inner);
        sections
            .iter()
            .find(|s| s.contains(address))
            .map(|s| s.protection)
    }

    /// Host handle spanning the lowest section start to the highest section end
    pub fn host(&self) -> HostHandle {
        let sections = self.sections.read().unwrap_or_else(PoisonError::into_inner);
        match (sections.first(), sections.iter().map(Section::end).max()) {
            (Some(first), Some(end)) => HostHandle::new(first.base, end - first.base),
            _ => HostHandle::new(0, 0),
        }
    }

    fn locate(sections: &[Section], address: u64, size: usize) -> AccessResult<usize> {
        let index = sections
            .iter()
            .position(|s| s.contains(address))
            .ok_or(AccessFault::new(address, size, FaultKind::Unmapped))?;

        let end = address
            .checked_add(size as u64)
            .ok_or(AccessFault::new(address, size, FaultKind::Partial))?;
        if end > sections[index].end() {
            return Err(AccessFault::new(address, size, FaultKind::Partial));
        }

        Ok(index)
    }
}

impl ReadMemory for MemoryImage {
    fn read_bytes(&self, address: u64, size: usize) -> AccessResult<Vec<u8>> {
        let sections = self.sections.read().unwrap_or_else(PoisonError::into_inner);
        let index = Self::locate(&sections, address, size)?;
        let section = &sections[index];

        if !section.protection.is_readable() {
            return Err(AccessFault::new(address, size, FaultKind::Protected));
        }

        let start = (address - section.base) as usize;
        Ok(section.data[start..start + size].to_vec())
    }
}

impl ProtectPages for MemoryImage {
    fn protect(
        &self,
        address: u64,
        size: usize,
        protection: Protection,
    ) -> AccessResult<Protection> {
        let mut sections = self.sections.write().unwrap_or_else(PoisonError::into_inner);
        let index = sections
            .iter()
            .position(|s| s.contains(address))
            .ok_or(AccessFault::new(address, size, FaultKind::Unmapped))?;

        let previous = sections[index].protection;
        sections[index].protection = protection;
        Ok(previous)
    }
}

impl WriteMemory for MemoryImage {
    fn write_unprotected(&self, address: u64, bytes: &[u8]) -> AccessResult<()> {
        let mut sections = self.sections.write().unwrap_or_else(PoisonError::into_inner);
        let index = Self::locate(&sections, address, bytes.len())?;
        let section = &mut sections[index];

        if !section.protection.is_writable() {
            return Err(AccessFault::new(address, bytes.len(), FaultKind::Protected));
        }

        let start = (address - section.base) as usize;
        section.data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> MemoryImage {
        MemoryImage::new()
            .with_section(0x1000, vec![0xAA; 0x100], Protection::ReadOnly)
            .with_section(0x4000, vec![0; 0x10], Protection::ReadWrite)
            .with_section(0x8000, vec![0; 0x10], Protection::NoAccess)
    }

    #[test]
    fn test_read_outside_mapping_faults() {
        let image = image();
        for address in [0u64, 0x0FFF, 0x1100, 0x3FFF, 0x4010, u64::MAX - 2] {
            let err = image.read_bytes(address, 4).unwrap_err();
            assert_eq!(err.address, address);
            assert!(matches!(err.kind, FaultKind::Unmapped | FaultKind::Partial));
        }
    }

    #[test]
    fn test_read_running_past_section_is_partial() {
        let err = image().read_bytes(0x10FE, 4).unwrap_err();
        assert_eq!(err.kind, FaultKind::Partial);
    }

    #[test]
    fn test_no_access_section_faults() {
        let image = image();
        assert_eq!(
            image.read_u32(0x8000).unwrap_err().kind,
            FaultKind::Protected
        );
    }

    #[test]
    fn test_write_outside_mapping_faults() {
        let image = image();
        let err = image.write_u32(0x5000, 1).unwrap_err();
        assert_eq!(err.kind, FaultKind::Unmapped);

        let err = image.write_u64(0x400C, 1).unwrap_err();
        assert_eq!(err.kind, FaultKind::Partial);
    }

    #[test]
    fn test_write_to_read_only_toggles_and_restores() {
        let image = image();
        image.write_u32(0x1000, 0x1234_5678).unwrap();

        assert_eq!(image.read_u32(0x1000).unwrap(), 0x1234_5678);
        assert_eq!(image.protection_at(0x1000), Some(Protection::ReadOnly));
    }

    #[test]
    fn test_faulting_write_still_restores_protection() {
        let image = image();
        // Starts inside the read-only section but runs past its end
        let err = image.write_u64(0x10FC, 0).unwrap_err();
        assert_eq!(err.kind, FaultKind::Partial);
        assert_eq!(image.protection_at(0x1000), Some(Protection::ReadOnly));
    }

    #[test]
    fn test_unprotected_write_respects_protection() {
        let image = image();
        let err = image.write_unprotected(0x1000, &[1]).unwrap_err();
        assert_eq!(err.kind, FaultKind::Protected);
    }

    #[test]
    fn test_host_span() {
        let host = image().host();
        assert_eq!(host.base, 0x1000);
        assert_eq!(host.size, 0x7010);
    }

    #[test]
    fn test_unmap() {
        let image = image();
        assert!(image.unmap(0x4000));
        assert!(image.read_u8(0x4000).is_err());
        assert!(!image.unmap(0x4000));
    }
}
