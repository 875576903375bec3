use strum::Display;
use thiserror::Error;
use tracing::warn;

use crate::geometry::{Quat, Vec3};

/// Why an access was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum FaultKind {
    /// No mapping at the address
    #[strum(serialize = "unmapped")]
    Unmapped,
    /// Mapped, but the page protection forbids the access
    #[strum(serialize = "protected")]
    Protected,
    /// The range starts in a mapping but runs past its end
    #[strum(serialize = "partial")]
    Partial,
    /// A called host function raised a structured exception
    #[strum(serialize = "raised")]
    Raised,
}

/// An address proved invalid at access time.
///
/// This is the only failure the memory primitive reports. It is returned once
/// to the immediate caller and never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Access fault at {address:#x} ({size} bytes): {kind}")]
pub struct AccessFault {
    pub address: u64,
    pub size: usize,
    pub kind: FaultKind,
}

impl AccessFault {
    pub fn new(address: u64, size: usize, kind: FaultKind) -> Self {
        Self {
            address,
            size,
            kind,
        }
    }
}

pub type AccessResult<T> = std::result::Result<T, AccessFault>;

/// Page protection as seen by the memory primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Protection {
    NoAccess,
    ReadOnly,
    ReadWrite,
    ExecuteRead,
    ExecuteReadWrite,
}

impl Protection {
    pub fn is_readable(self) -> bool {
        !matches!(self, Protection::NoAccess)
    }

    pub fn is_writable(self) -> bool {
        matches!(self, Protection::ReadWrite | Protection::ExecuteReadWrite)
    }

    pub fn is_executable(self) -> bool {
        matches!(self, Protection::ExecuteRead | Protection::ExecuteReadWrite)
    }
}

/// Trait for fault-isolated reads from host memory.
///
/// Implementors only provide `read_bytes`; typed readers are built on top of it.
pub trait ReadMemory {
    fn read_bytes(&self, address: u64, size: usize) -> AccessResult<Vec<u8>>;

    fn read_u8(&self, address: u64) -> AccessResult<u8> {
        Ok(fixed::<1>(self.read_bytes(address, 1)?, address)?[0])
    }

    fn read_bool(&self, address: u64) -> AccessResult<bool> {
        Ok(self.read_u8(address)? != 0)
    }

    fn read_i32(&self, address: u64) -> AccessResult<i32> {
        Ok(i32::from_le_bytes(fixed(self.read_bytes(address, 4)?, address)?))
    }

    fn read_u32(&self, address: u64) -> AccessResult<u32> {
        Ok(u32::from_le_bytes(fixed(self.read_bytes(address, 4)?, address)?))
    }

    fn read_u64(&self, address: u64) -> AccessResult<u64> {
        Ok(u64::from_le_bytes(fixed(self.read_bytes(address, 8)?, address)?))
    }

    fn read_f32(&self, address: u64) -> AccessResult<f32> {
        Ok(f32::from_le_bytes(fixed(self.read_bytes(address, 4)?, address)?))
    }

    /// Read a pointer field, mapping null to `None`
    fn read_ptr(&self, address: u64) -> AccessResult<Option<u64>> {
        let value = self.read_u64(address)?;
        Ok((value != 0).then_some(value))
    }

    fn read_vec3(&self, address: u64) -> AccessResult<Vec3> {
        let raw: [u8; 12] = fixed(self.read_bytes(address, 12)?, address)?;
        Ok(Vec3::new(
            f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            f32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
            f32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]),
        ))
    }

    fn read_quat(&self, address: u64) -> AccessResult<Quat> {
        let raw: [u8; 16] = fixed(self.read_bytes(address, 16)?, address)?;
        let f = |i: usize| f32::from_le_bytes([raw[i], raw[i + 1], raw[i + 2], raw[i + 3]]);
        Ok(Quat {
            x: f(0),
            y: f(4),
            z: f(8),
            w: f(12),
        })
    }

    /// Read an MSVC `std::string` (16-byte inline buffer or heap pointer,
    /// then size and capacity). Text is decoded as Windows-1252.
    fn read_string(&self, address: u64) -> AccessResult<String> {
        let header = |offset: u64| {
            address
                .checked_add(offset)
                .ok_or(AccessFault::new(address, 0x20, FaultKind::Unmapped))
        };
        let size = self.read_u64(header(0x10)?)? as usize;
        let capacity = self.read_u64(header(0x18)?)?;
        let size = size.min(super::layout::string::MAX_LEN);

        let bytes = if capacity < super::layout::string::INLINE_CAPACITY {
            self.read_bytes(address, size.min(15))?
        } else {
            match self.read_ptr(address)? {
                Some(data) => self.read_bytes(data, size)?,
                None => Vec::new(),
            }
        };

        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        let (text, _, _) = encoding_rs::WINDOWS_1252.decode(&bytes[..end]);
        Ok(text.into_owned())
    }
}

fn fixed<const N: usize>(bytes: Vec<u8>, address: u64) -> AccessResult<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| AccessFault::new(address, N, FaultKind::Partial))
}

/// Page protection control, used to make a range writable for one write
pub trait ProtectPages {
    /// Change the protection of the pages covering `[address, address + size)`,
    /// returning the previous protection.
    fn protect(&self, address: u64, size: usize, protection: Protection)
    -> AccessResult<Protection>;
}

/// Restores the previous page protection when dropped.
///
/// Restoration happens on every exit path, including a faulting write.
pub struct ProtectionGuard<'a, P: ProtectPages + ?Sized> {
    pages: &'a P,
    address: u64,
    size: usize,
    previous: Protection,
}

impl<'a, P: ProtectPages + ?Sized> ProtectionGuard<'a, P> {
    pub fn unlock(pages: &'a P, address: u64, size: usize) -> AccessResult<Self> {
        let previous = pages.protect(address, size, Protection::ExecuteReadWrite)?;
        Ok(Self {
            pages,
            address,
            size,
            previous,
        })
    }

    pub fn previous(&self) -> Protection {
        self.previous
    }
}

impl<P: ProtectPages + ?Sized> Drop for ProtectionGuard<'_, P> {
    fn drop(&mut self) {
        if let Err(e) = self.pages.protect(self.address, self.size, self.previous) {
            warn!(
                "Failed to restore {} protection at {:#x}: {}",
                self.previous, self.address, e
            );
        }
    }
}

/// Trait for fault-isolated writes into host memory.
///
/// `write_bytes` toggles the target pages writable, writes, and restores the
/// original protection through a [`ProtectionGuard`].
pub trait WriteMemory: ReadMemory + ProtectPages {
    /// Write without touching page protection
    fn write_unprotected(&self, address: u64, bytes: &[u8]) -> AccessResult<()>;

    fn write_bytes(&self, address: u64, bytes: &[u8]) -> AccessResult<()> {
        let _guard = ProtectionGuard::unlock(self, address, bytes.len())?;
        self.write_unprotected(address, bytes)
    }

    fn write_u8(&self, address: u64, value: u8) -> AccessResult<()> {
        self.write_bytes(address, &[value])
    }

    fn write_bool(&self, address: u64, value: bool) -> AccessResult<()> {
        self.write_u8(address, value as u8)
    }

    fn write_i32(&self, address: u64, value: i32) -> AccessResult<()> {
        self.write_bytes(address, &value.to_le_bytes())
    }

    fn write_u32(&self, address: u64, value: u32) -> AccessResult<()> {
        self.write_bytes(address, &value.to_le_bytes())
    }

    fn write_u64(&self, address: u64, value: u64) -> AccessResult<()> {
        self.write_bytes(address, &value.to_le_bytes())
    }

    fn write_f32(&self, address: u64, value: f32) -> AccessResult<()> {
        self.write_bytes(address, &value.to_le_bytes())
    }

    fn write_vec3(&self, address: u64, value: Vec3) -> AccessResult<()> {
        let mut raw = Vec::with_capacity(12);
        for f in [value.x, value.y, value.z] {
            raw.extend_from_slice(&f.to_le_bytes());
        }
        self.write_bytes(address, &raw)
    }

    fn write_quat(&self, address: u64, value: Quat) -> AccessResult<()> {
        let mut raw = Vec::with_capacity(16);
        for f in [value.x, value.y, value.z, value.w] {
            raw.extend_from_slice(&f.to_le_bytes());
        }
        self.write_bytes(address, &raw)
    }
}

/// Memory that can be shared between the worker and the presentation thread
pub trait HostMemory: WriteMemory + Send + Sync {}

impl<T: WriteMemory + Send + Sync + ?Sized> HostMemory for T {}
