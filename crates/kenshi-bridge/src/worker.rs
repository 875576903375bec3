//! Background synchronisation loop.
//!
//! Each tick: advance the sync tick, poll the local roster, report detected
//! transitions to the registered callbacks, push the snapshots to the
//! transport, then drain and apply inbound commands. No bridge lock is held
//! while the sink or the command source run.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bridge::{AiState, AnimationType, CharacterState, SquadOrder, StateBridge, WeatherType};
use crate::error::Result;
use crate::events::{BridgeEvent, CombatEvent, TransitionDetector};
use crate::geometry::Vec3;
use crate::shutdown::ShutdownSignal;

/// Receives the local snapshots once per tick
pub trait SnapshotSink: Send {
    fn push(&mut self, tick: u64, characters: &[CharacterState]) -> Result<()>;
}

/// Supplies commands received from remote peers
pub trait CommandSource: Send {
    /// Take every command queued since the previous call
    fn drain(&mut self) -> Vec<InboundCommand>;
}

/// An update from a remote peer, applied on the worker thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundCommand {
    SetCharacter(CharacterState),
    Order {
        character_id: u32,
        order: SquadOrder,
        target: Vec3,
    },
    SetAiState {
        character_id: u32,
        state: AiState,
    },
    Combat(CombatEvent),
    PlayAnimation {
        character_id: u32,
        animation: AnimationType,
        force: bool,
    },
    SetRelation {
        from: i32,
        to: i32,
        value: i32,
    },
    SetGameTime {
        hours: f32,
    },
    SetWeather {
        kind: WeatherType,
        intensity: f32,
    },
}

/// What one tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickReport {
    pub tick: u64,
    pub characters: usize,
    pub pushed: bool,
    pub applied: usize,
    pub failed: usize,
    pub combat_events: usize,
    pub inventory_events: usize,
}

/// One synchronisation step, driven by [`SyncWorker`] or called directly
pub struct SyncLoop {
    bridge: Arc<StateBridge>,
    sink: Box<dyn SnapshotSink>,
    source: Box<dyn CommandSource>,
    detector: TransitionDetector,
}

impl SyncLoop {
    pub fn new(
        bridge: Arc<StateBridge>,
        sink: Box<dyn SnapshotSink>,
        source: Box<dyn CommandSource>,
    ) -> Self {
        Self {
            bridge,
            sink,
            source,
            detector: TransitionDetector::new(),
        }
    }

    pub fn tick(&mut self) -> TickReport {
        let tick = self.bridge.advance_tick();
        let characters = self.bridge.get_player_characters();
        let mut report = TickReport {
            tick,
            characters: characters.len(),
            ..Default::default()
        };

        let mut events: Vec<BridgeEvent> = self
            .detector
            .observe_characters(&characters, tick)
            .into_iter()
            .map(BridgeEvent::Combat)
            .collect();
        report.combat_events = events.len();
        let poll = self.bridge.poll_inventories(&ids(&characters));
        for (id, items) in &poll.listings {
            if poll.applied.contains(id) {
                self.detector.rebase_inventory(*id, items);
                continue;
            }
            let changes = self.detector.observe_inventory(*id, items, tick);
            report.inventory_events += changes.len();
            events.extend(changes.into_iter().map(BridgeEvent::Inventory));
        }
        if !events.is_empty() {
            let callbacks = self.bridge.callbacks();
            for event in &events {
                callbacks.emit(event);
            }
        }

        match self.sink.push(tick, &characters) {
            Ok(()) => report.pushed = true,
            Err(e) => warn!("Snapshot push for tick {} failed: {}", tick, e),
        }

        for command in self.source.drain() {
            match self.apply(&command) {
                Ok(()) => report.applied += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!("Inbound command not applied: {}", e);
                }
            }
        }

        // Applied changes are the peer's, not ours to report back
        if report.applied > 0 {
            let characters = self.bridge.get_player_characters();
            self.detector.rebase(&characters);
            for (id, items) in &self.bridge.poll_inventories(&ids(&characters)).listings {
                self.detector.rebase_inventory(*id, items);
            }
        }

        report
    }

    fn apply(&self, command: &InboundCommand) -> Result<()> {
        debug!("Applying {:?}", command);
        let bridge = &self.bridge;
        match command {
            InboundCommand::SetCharacter(state) => bridge.set_character(state),
            InboundCommand::Order {
                character_id,
                order,
                target,
            } => bridge.issue_command(*character_id, *order, *target).map(|_| ()),
            InboundCommand::SetAiState {
                character_id,
                state,
            } => bridge.set_ai_state(*character_id, *state).map(|_| ()),
            InboundCommand::Combat(event) => bridge.apply_combat_event(event),
            InboundCommand::PlayAnimation {
                character_id,
                animation,
                force,
            } => bridge
                .play_animation(*character_id, *animation, *force)
                .map(|_| ()),
            InboundCommand::SetRelation { from, to, value } => {
                bridge.set_relation(*from, *to, *value).map(|_| ())
            }
            InboundCommand::SetGameTime { hours } => bridge.set_game_time(*hours).map(|_| ()),
            InboundCommand::SetWeather { kind, intensity } => bridge.set_weather(*kind, *intensity),
        }
    }
}

fn ids(characters: &[CharacterState]) -> Vec<u32> {
    characters.iter().map(|c| c.id).collect()
}

/// Runs a [`SyncLoop`] on its own thread until the shutdown signal fires
pub struct SyncWorker {
    shutdown: Arc<ShutdownSignal>,
    handle: Option<JoinHandle<u64>>,
}

impl SyncWorker {
    pub fn spawn(
        mut sync: SyncLoop,
        interval: Duration,
        shutdown: Arc<ShutdownSignal>,
    ) -> Result<Self> {
        let signal = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("kenshi-sync".into())
            .spawn(move || {
                info!("Sync worker started ({} ms)", interval.as_millis());
                let mut ticks = 0;
                while !signal.is_triggered() {
                    sync.tick();
                    ticks += 1;
                    if signal.wait(interval) {
                        break;
                    }
                }
                info!("Sync worker stopped after {} ticks", ticks);
                ticks
            })?;

        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the worker and wait for it; returns the number of ticks run
    pub fn stop(mut self) -> u64 {
        self.join()
    }

    fn join(&mut self) -> u64 {
        self.shutdown.trigger();
        match self.handle.take().map(JoinHandle::join) {
            Some(Ok(ticks)) => ticks,
            Some(Err(_)) => {
                warn!("Sync worker panicked");
                0
            }
            None => 0,
        }
    }
}

impl Drop for SyncWorker {
    fn drop(&mut self) {
        self.join();
    }
}
