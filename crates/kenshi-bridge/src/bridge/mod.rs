//! State bridge between host records and snapshots.
//!
//! Every host reference is an address plus a layout resolved through the
//! [`OffsetResolver`]; nothing is cached across calls, so a reload of the
//! offsets is picked up by the next operation. List walks bound the host
//! counter and skip elements that fault. Lookups by id check the local roster
//! before the global character list.

mod animation;
mod character;
mod combat;
mod enums;
mod faction;
mod fields;
mod inventory;
mod native;
mod snapshot;
mod squad;
mod world;

#[cfg(test)]
pub(crate) mod testing;

pub use animation::*;
pub use character::*;
pub use combat::*;
pub use enums::*;
pub use faction::*;
pub use inventory::*;
pub use native::*;
pub use snapshot::*;
pub use squad::*;
pub use world::*;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use self::fields::Fields;
use crate::error::{EntityKind, Error, Result};
use crate::events::{CombatCallback, EventCallbacks, InventoryCallback};
use crate::memory::{AccessFault, HostMemory, layout};
use crate::offset::OffsetResolver;

/// Which path carried out a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ApplyPath {
    /// A resolved host function was called
    Native,
    /// Record fields were written directly
    Direct,
}

#[derive(Debug, Default)]
struct BridgeState {
    tick: u64,
    callbacks: EventCallbacks,
    /// Characters whose inventory the bridge changed since the last poll
    applied_inventory: HashSet<u32>,
}

pub struct StateBridge {
    memory: Arc<dyn HostMemory>,
    resolver: Arc<OffsetResolver>,
    native: Arc<dyn NativeCalls>,
    state: Mutex<BridgeState>,
}

impl StateBridge {
    pub fn new(memory: Arc<dyn HostMemory>, resolver: Arc<OffsetResolver>) -> Self {
        Self {
            memory,
            resolver,
            native: Arc::new(NoNativeCalls),
            state: Mutex::new(BridgeState::default()),
        }
    }

    pub fn with_native_calls(mut self, native: Arc<dyn NativeCalls>) -> Self {
        self.native = native;
        self
    }

    pub fn resolver(&self) -> &Arc<OffsetResolver> {
        &self.resolver
    }

    pub fn memory(&self) -> &Arc<dyn HostMemory> {
        &self.memory
    }

    /// Resolve offsets if needed. Fails only when no offset source validates.
    pub fn initialize(&self) -> Result<()> {
        self.resolver.initialize().map(|_| ())
    }

    pub fn is_initialized(&self) -> bool {
        self.resolver.is_initialized()
    }

    pub fn current_tick(&self) -> u64 {
        self.lock().tick
    }

    /// Advance the sync tick stamped on later snapshots
    pub fn advance_tick(&self) -> u64 {
        let mut state = self.lock();
        state.tick += 1;
        state.tick
    }

    pub fn set_combat_callback(&self, callback: Option<CombatCallback>) {
        self.lock().callbacks.set_combat(callback);
    }

    pub fn set_inventory_callback(&self, callback: Option<InventoryCallback>) {
        self.lock().callbacks.set_inventory(callback);
    }

    /// Registered callbacks, cloned so they can run without the bridge lock
    pub fn callbacks(&self) -> EventCallbacks {
        self.lock().callbacks.clone()
    }

    fn lock(&self) -> MutexGuard<'_, BridgeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fields(&self) -> Fields {
        Fields::resolve(self.resolver.snapshot().as_deref())
    }

    /// Pointers held by a host array: `array_field` holds the array pointer,
    /// `count_field` the element count. A count above `cap` is treated as
    /// corrupted and yields nothing.
    fn walk_list(&self, array_field: u64, count_field: u64, cap: i32, what: &str) -> Vec<u64> {
        if array_field == 0 || count_field == 0 {
            debug!("{} list is unresolved", what);
            return Vec::new();
        }

        let count = match self.memory.read_i32(count_field) {
            Ok(count) => count,
            Err(e) => {
                debug!("Cannot read {} count: {}", what, e);
                return Vec::new();
            }
        };
        if count <= 0 {
            return Vec::new();
        }
        if count > cap {
            warn!("{} count {} exceeds {}, ignoring list", what, count, cap);
            return Vec::new();
        }

        let array = match self.memory.read_ptr(array_field) {
            Ok(Some(array)) => array,
            Ok(None) => return Vec::new(),
            Err(e) => {
                debug!("Cannot read {} array: {}", what, e);
                return Vec::new();
            }
        };

        (0..count as u64)
            .map_while(|i| array.checked_add(i * 8))
            .enumerate()
            .filter_map(|(i, slot)| match self.memory.read_ptr(slot) {
                Ok(element) => element,
                Err(e) => {
                    warn!("Skipping {} element {}: {}", what, i, e);
                    None
                }
            })
            .collect()
    }

    /// Address of the game world record
    fn world(&self) -> Option<u64> {
        let global = self.resolver.global("Game.WorldInstance");
        if global == 0 {
            return None;
        }
        self.memory.read_ptr(global).ok().flatten()
    }

    fn game_time(&self) -> f32 {
        self.world()
            .and_then(|w| self.memory.read_f32(w + layout::world::GAME_TIME).ok())
            .unwrap_or(0.0)
    }

    /// Call a resolved host function; `None` when it is unresolved or refused
    fn call_native(&self, function: NativeFunction, args: &[NativeArg]) -> Option<u64> {
        let address = self.resolver.get_function(function.key());
        if address == 0 {
            debug!("Native {} is unresolved", function);
            return None;
        }
        match self.native.call(function, address, args) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Native {} failed: {}", function, e);
                None
            }
        }
    }
}

/// Clamp into `[min, max]`, mapping NaN to `min`
pub(crate) fn bounded(value: f32, min: f32, max: f32) -> f32 {
    if value.is_nan() {
        min
    } else {
        value.max(min).min(max)
    }
}

/// A record that faulted between lookup and write is reported as gone
fn vanished(kind: EntityKind, id: impl ToString, fault: AccessFault) -> Error {
    let id = id.to_string();
    warn!("{} {} vanished during write: {}", kind, id, fault);
    Error::NotFound { kind, id }
}
