//! Fault-isolated access to host memory
//!
//! Every read and write returns `Result<T, AccessFault>`. Nothing above this
//! module dereferences a host address directly.

mod image;
pub mod layout;
mod process;
mod reader;

pub use image::MemoryImage;
#[cfg(target_os = "windows")]
pub use process::LocalProcess;
pub use process::HostHandle;
pub use reader::{
    AccessFault, AccessResult, FaultKind, HostMemory, ProtectPages, Protection, ProtectionGuard,
    ReadMemory, WriteMemory,
};
