use serde::{Deserialize, Serialize};

/// Opaque reference to the attached host module: load base and image size.
///
/// Owns no host memory. Every access goes through the memory primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HostHandle {
    pub base: u64,
    pub size: u64,
}

impl HostHandle {
    pub fn new(base: u64, size: u64) -> Self {
        Self { base, size }
    }

    pub fn end(&self) -> u64 {
        self.base.saturating_add(self.size)
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.base && address < self.end()
    }

    /// Module-relative offset of an absolute address inside the image
    pub fn rva(&self, address: u64) -> Option<u64> {
        self.contains(address).then(|| address - self.base)
    }
}

#[cfg(target_os = "windows")]
pub use windows_impl::LocalProcess;

#[cfg(target_os = "windows")]
mod windows_impl {
    use std::ffi::c_void;
    use std::mem::size_of;

    use tracing::debug;
    use windows::Win32::Foundation::HANDLE;
    use windows::Win32::System::Diagnostics::Debug::{ReadProcessMemory, WriteProcessMemory};
    use windows::Win32::System::LibraryLoader::GetModuleHandleW;
    use windows::Win32::System::Memory::{
        MEM_COMMIT, MEMORY_BASIC_INFORMATION, PAGE_EXECUTE_READ, PAGE_EXECUTE_READWRITE,
        PAGE_EXECUTE_WRITECOPY, PAGE_NOACCESS, PAGE_PROTECTION_FLAGS, PAGE_READONLY,
        PAGE_READWRITE, PAGE_WRITECOPY, VirtualProtect, VirtualQuery,
    };
    use windows::Win32::System::ProcessStatus::{GetModuleInformation, MODULEINFO};
    use windows::Win32::System::Threading::GetCurrentProcess;
    use windows::core::PCWSTR;

    use super::HostHandle;
    use crate::error::{Error, Result};
    use crate::memory::reader::{
        AccessFault, AccessResult, FaultKind, ProtectPages, Protection, ReadMemory, WriteMemory,
    };

    /// The host process this library is loaded into.
    ///
    /// Reads and writes go through `ReadProcessMemory`/`WriteProcessMemory` on the
    /// current-process pseudo handle, which report an invalid address as an error
    /// instead of raising an access violation.
    pub struct LocalProcess {
        handle: HANDLE,
        host: HostHandle,
    }

    // The pseudo handle returned by GetCurrentProcess is a constant and valid on every thread
    unsafe impl Send for LocalProcess {}
    unsafe impl Sync for LocalProcess {}

    impl LocalProcess {
        /// Attach to the main executable module of the current process
        pub fn attach() -> Result<Self> {
            // SAFETY: GetModuleHandleW(NULL) returns the executable's module handle and
            // GetModuleInformation writes into a stack-local MODULEINFO of the declared size.
            unsafe {
                let module = GetModuleHandleW(PCWSTR::null())
                    .map_err(|e| Error::ResolutionFailure(format!("GetModuleHandleW: {}", e)))?;
                let process = GetCurrentProcess();
                let mut info = MODULEINFO::default();
                GetModuleInformation(process, module, &mut info, size_of::<MODULEINFO>() as u32)
                    .map_err(|e| {
                        Error::ResolutionFailure(format!("GetModuleInformation: {}", e))
                    })?;

                let host = HostHandle::new(info.lpBaseOfDll as u64, info.SizeOfImage as u64);
                debug!(
                    "Attached to host module (base: {:#x}, size: {:#x})",
                    host.base, host.size
                );
                Ok(Self {
                    handle: process,
                    host,
                })
            }
        }

        pub fn host(&self) -> HostHandle {
            self.host
        }

        /// Whether `address` lies in committed, executable memory
        pub fn is_executable(&self, address: u64) -> bool {
            let mut info = MEMORY_BASIC_INFORMATION::default();
            // SAFETY: VirtualQuery only inspects the address space and fills the local struct.
            let written = unsafe {
                VirtualQuery(
                    Some(address as *const c_void),
                    &mut info,
                    size_of::<MEMORY_BASIC_INFORMATION>(),
                )
            };
            written != 0
                && info.State == MEM_COMMIT
                && from_flags(info.Protect).is_executable()
        }
    }

    fn from_flags(flags: PAGE_PROTECTION_FLAGS) -> Protection {
        // Guard/nocache modifiers live in the high bits
        let base = PAGE_PROTECTION_FLAGS(flags.0 & 0xFF);
        if base == PAGE_EXECUTE_READWRITE || base == PAGE_EXECUTE_WRITECOPY {
            Protection::ExecuteReadWrite
        } else if base == PAGE_EXECUTE_READ {
            Protection::ExecuteRead
        } else if base == PAGE_READWRITE || base == PAGE_WRITECOPY {
            Protection::ReadWrite
        } else if base == PAGE_READONLY {
            Protection::ReadOnly
        } else {
            Protection::NoAccess
        }
    }

    fn to_flags(protection: Protection) -> PAGE_PROTECTION_FLAGS {
        match protection {
            Protection::NoAccess => PAGE_NOACCESS,
            Protection::ReadOnly => PAGE_READONLY,
            Protection::ReadWrite => PAGE_READWRITE,
            Protection::ExecuteRead => PAGE_EXECUTE_READ,
            Protection::ExecuteReadWrite => PAGE_EXECUTE_READWRITE,
        }
    }

    impl ReadMemory for LocalProcess {
        fn read_bytes(&self, address: u64, size: usize) -> AccessResult<Vec<u8>> {
            if address == 0 {
                return Err(AccessFault::new(address, size, FaultKind::Unmapped));
            }

            let mut buffer = vec![0u8; size];
            let mut read = 0usize;
            // SAFETY: the destination is a heap buffer of exactly `size` bytes. An invalid
            // source address makes the call fail rather than fault.
            unsafe {
                ReadProcessMemory(
                    self.handle,
                    address as *const c_void,
                    buffer.as_mut_ptr() as *mut c_void,
                    size,
                    Some(&mut read),
                )
            }
            .map_err(|_| AccessFault::new(address, size, FaultKind::Unmapped))?;

            if read != size {
                return Err(AccessFault::new(address, size, FaultKind::Partial));
            }
            Ok(buffer)
        }
    }

    impl ProtectPages for LocalProcess {
        fn protect(
            &self,
            address: u64,
            size: usize,
            protection: Protection,
        ) -> AccessResult<Protection> {
            let mut old = PAGE_PROTECTION_FLAGS::default();
            // SAFETY: VirtualProtect validates the range itself and fails on unmapped pages.
            unsafe {
                VirtualProtect(
                    address as *const c_void,
                    size,
                    to_flags(protection),
                    &mut old,
                )
            }
            .map_err(|_| AccessFault::new(address, size, FaultKind::Unmapped))?;
            Ok(from_flags(old))
        }
    }

    impl WriteMemory for LocalProcess {
        fn write_unprotected(&self, address: u64, bytes: &[u8]) -> AccessResult<()> {
            let mut written = 0usize;
            // SAFETY: the source is a live slice; an invalid destination makes the call fail.
            unsafe {
                WriteProcessMemory(
                    self.handle,
                    address as *const c_void,
                    bytes.as_ptr() as *const c_void,
                    bytes.len(),
                    Some(&mut written),
                )
            }
            .map_err(|_| AccessFault::new(address, bytes.len(), FaultKind::Protected))?;

            if written != bytes.len() {
                return Err(AccessFault::new(address, bytes.len(), FaultKind::Partial));
            }
            Ok(())
        }
    }
}
