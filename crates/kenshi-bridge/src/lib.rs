//! In-process bridge between the Kenshi host and a multiplayer session.
//!
//! The crate resolves host addresses through a layered offset resolver
//! (remote document, local cache, signature scan, compiled-in table), reads
//! and writes host records through a fault-isolated memory primitive, and
//! exposes plain snapshots plus an id-addressed control surface for the
//! transport layer.

pub mod api;
pub mod bridge;
pub mod config;
pub mod error;
pub mod events;
pub mod geometry;
pub mod hooks;
pub mod interp;
pub mod memory;
pub mod offset;
pub mod shutdown;
pub mod worker;

pub use api::{ControlSurface, OutboundMessage};
pub use bridge::{ApplyPath, CharacterState, NativeCalls, NoNativeCalls, StateBridge};
pub use config::{BridgeConfig, BridgeConfigBuilder};
pub use error::{EntityKind, Error, Result};
pub use events::{BridgeEvent, CombatEvent, InventoryEvent};
pub use geometry::{Quat, Vec3};
pub use hooks::InterceptTable;
pub use interp::Interpolator;
pub use memory::{AccessFault, HostHandle, HostMemory, MemoryImage};
pub use offset::{OffsetDatabase, OffsetResolver, OffsetSourceKind};
pub use shutdown::ShutdownSignal;
pub use worker::{CommandSource, InboundCommand, SnapshotSink, SyncLoop, SyncWorker};
