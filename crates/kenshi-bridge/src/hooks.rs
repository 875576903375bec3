//! Reversible function-table intercepts.
//!
//! An intercept swaps one pointer-sized slot in a host function table for a
//! replacement, keeping the original so the replacement can forward to it.
//! Slots are written through the protected write path. Every intercept still
//! installed when the table is dropped is reverted.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::error::{EntityKind, Error, Result};
use crate::memory::{AccessResult, HostMemory, ReadMemory, WriteMemory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Intercept {
    /// Address of the patched slot
    pub slot: u64,
    /// Pointer the slot held before patching
    pub original: u64,
    pub replacement: u64,
}

pub struct InterceptTable {
    memory: Arc<dyn HostMemory>,
    installed: Mutex<BTreeMap<String, Intercept>>,
}

impl InterceptTable {
    pub fn new(memory: Arc<dyn HostMemory>) -> Self {
        Self {
            memory,
            installed: Mutex::new(BTreeMap::new()),
        }
    }

    /// Patch `slot` to point at `replacement`, returning the original pointer
    pub fn install(&self, key: &str, slot: u64, replacement: u64) -> Result<u64> {
        let mut installed = self.lock();
        if installed.contains_key(key) {
            return Err(Error::InterceptExists(key.to_string()));
        }
        if let Some((other, _)) = installed.iter().find(|(_, i)| i.slot == slot) {
            return Err(Error::InterceptExists(format!("{} (slot {:#x} held by {})", key, slot, other)));
        }

        let original = self.memory.read_u64(slot)?;
        self.memory.write_u64(slot, replacement)?;
        installed.insert(
            key.to_string(),
            Intercept {
                slot,
                original,
                replacement,
            },
        );
        info!("Intercept {} installed at {:#x}", key, slot);
        Ok(original)
    }

    /// Pointer to forward to from the replacement
    pub fn original(&self, key: &str) -> Option<u64> {
        self.lock().get(key).map(|i| i.original)
    }

    pub fn get(&self, key: &str) -> Option<Intercept> {
        self.lock().get(key).copied()
    }

    pub fn is_installed(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Restore the original pointer and forget the intercept.
    ///
    /// A slot that can no longer be written stays registered so a later
    /// revert can retry.
    pub fn remove(&self, key: &str) -> Result<()> {
        let mut installed = self.lock();
        let intercept = *installed
            .get(key)
            .ok_or_else(|| Error::not_found(EntityKind::Intercept, key))?;
        self.restore(&intercept)?;
        installed.remove(key);
        debug!("Intercept {} removed", key);
        Ok(())
    }

    /// Revert every intercept, returning how many were restored
    pub fn revert_all(&self) -> usize {
        let mut installed = self.lock();
        let mut restored = 0;
        installed.retain(|key, intercept| match self.restore(intercept) {
            Ok(()) => {
                restored += 1;
                false
            }
            Err(e) => {
                warn!("Failed to revert intercept {}: {}", key, e);
                true
            }
        });
        restored
    }

    fn restore(&self, intercept: &Intercept) -> AccessResult<()> {
        // Leave a slot alone if something else re-patched it since
        let current = self.memory.read_u64(intercept.slot)?;
        if current != intercept.replacement {
            warn!(
                "Slot {:#x} holds {:#x}, not our replacement; leaving it",
                intercept.slot, current
            );
            return Ok(());
        }
        self.memory.write_u64(intercept.slot, intercept.original)
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Intercept>> {
        self.installed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for InterceptTable {
    fn drop(&mut self) {
        let restored = self.revert_all();
        if restored > 0 {
            debug!("Reverted {} intercepts on drop", restored);
        }
    }
}

impl std::fmt::Debug for InterceptTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptTable")
            .field("installed", &*self.lock())
            .finish()
    }
}
