//! Calls into resolved host functions.
//!
//! The bridge never calls a host function directly; it goes through
//! [`NativeCalls`] so the call site can be replaced in tests and refused on
//! platforms without an attached host.

use strum::{Display, IntoStaticStr};

use crate::geometry::Vec3;
use crate::memory::{AccessFault, AccessResult, FaultKind};

/// Host functions the bridge knows how to call, named by their function-table key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum NativeFunction {
    SpawnCharacter,
    DespawnCharacter,
    AddToSquad,
    RemoveFromSquad,
    AddItemToInventory,
    RemoveItemFromInventory,
    SetCharacterState,
    IssueCommand,
    SetFactionRelation,
}

impl NativeFunction {
    pub fn key(self) -> &'static str {
        self.into()
    }
}

/// Argument passed in an integer register
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NativeArg {
    Int(i64),
    /// Host record address
    Ptr(u64),
    /// Passed by pointer to a temporary `{x, y, z}`
    Vec3(Vec3),
}

pub trait NativeCalls: Send + Sync {
    /// Call the host function at `address` with up to four arguments.
    ///
    /// An address that is not executable host code is refused with an
    /// [`AccessFault`] before anything is called. An exception raised by the
    /// callee is caught and reported as a [`FaultKind::Raised`] fault.
    fn call(&self, function: NativeFunction, address: u64, args: &[NativeArg]) -> AccessResult<u64>;
}

/// Refuses every call; used when no host process is attached
#[derive(Debug, Clone, Copy, Default)]
pub struct NoNativeCalls;

impl NativeCalls for NoNativeCalls {
    fn call(&self, _function: NativeFunction, address: u64, _args: &[NativeArg]) -> AccessResult<u64> {
        Err(AccessFault::new(address, 0, FaultKind::Protected))
    }
}

/// Low byte of a native `bool` return
pub fn returned_true(value: u64) -> bool {
    value & 0xFF != 0
}

#[cfg(target_os = "windows")]
pub use windows_impl::ProcessCalls;

#[cfg(target_os = "windows")]
mod windows_impl {
    use std::sync::Arc;

    use tracing::warn;

    use super::{NativeArg, NativeCalls, NativeFunction};
    use crate::memory::{AccessFault, AccessResult, FaultKind, LocalProcess};

    type HostFn = unsafe extern "system" fn(u64, u64, u64, u64) -> u64;

    /// Calls functions inside the process this library is loaded into
    pub struct ProcessCalls {
        process: Arc<LocalProcess>,
    }

    impl ProcessCalls {
        pub fn new(process: Arc<LocalProcess>) -> Self {
            Self { process }
        }
    }

    impl NativeCalls for ProcessCalls {
        fn call(
            &self,
            function: NativeFunction,
            address: u64,
            args: &[NativeArg],
        ) -> AccessResult<u64> {
            if args.len() > 4 || !self.process.is_executable(address) {
                warn!("Refusing native {} at {:#x}", function, address);
                return Err(AccessFault::new(address, 0, FaultKind::Protected));
            }

            // Vectors are passed by pointer; the temporaries outlive the call
            let vectors: Vec<[f32; 3]> = args
                .iter()
                .map(|arg| match arg {
                    NativeArg::Vec3(v) => [v.x, v.y, v.z],
                    _ => [0.0; 3],
                })
                .collect();
            let mut registers = [0u64; 4];
            for (i, arg) in args.iter().enumerate() {
                registers[i] = match arg {
                    NativeArg::Int(v) => *v as u64,
                    NativeArg::Ptr(p) => *p,
                    NativeArg::Vec3(_) => vectors[i].as_ptr() as u64,
                };
            }

            // SAFETY: the address was checked to be committed executable memory and is
            // the entry of a host function resolved for `function`. On x64 Windows every
            // calling convention passes the first four integer arguments in registers,
            // so unused trailing registers are ignored by the callee.
            let entry: HostFn = unsafe { std::mem::transmute::<usize, HostFn>(address as usize) };
            // A structured exception raised inside the host function unwinds to here
            microseh::try_seh(|| unsafe {
                entry(registers[0], registers[1], registers[2], registers[3])
            })
            .map_err(|exception| {
                warn!(
                    "Native {} at {:#x} raised {:?} at {:p}",
                    function,
                    address,
                    exception.code(),
                    exception.address()
                );
                AccessFault::new(address, 0, FaultKind::Raised)
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_native_calls_refuses() {
        let err = NoNativeCalls
            .call(NativeFunction::IssueCommand, 0x1_408D_5000, &[])
            .unwrap_err();
        assert_eq!(err.kind, FaultKind::Protected);
        assert_eq!(NativeFunction::AddItemToInventory.key(), "AddItemToInventory");
    }

    #[test]
    fn test_bool_return_uses_low_byte() {
        assert!(returned_true(1));
        assert!(!returned_true(0xFFFF_FF00));
    }
}
