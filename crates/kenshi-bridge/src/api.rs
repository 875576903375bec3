//! Control surface for the transport and session layer.
//!
//! Entities are addressed by opaque string ids. An id registered with
//! [`ControlSurface::spawn`] is a remote entity: its displayed position is
//! smoothed by the [`Interpolator`] and, when the host could spawn a backing
//! character, written to that character on every [`ControlSurface::update`].
//! Any other id that parses as a number addresses a local host character
//! directly.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::bridge::{AiState, AnimationType, DamageType, StateBridge};
use crate::error::{EntityKind, Error, Result};
use crate::geometry::Vec3;
use crate::hooks::InterceptTable;
use crate::interp::Interpolator;

/// Health of a remote entity with no backing character
pub const REMOTE_MAX_HEALTH: f32 = 100.0;

pub type PlayerCallback = Arc<dyn Fn(&str) + Send + Sync>;
pub type ActionCallback = Arc<dyn Fn(&str, i32, &str) + Send + Sync>;
pub type PeerCombatCallback = Arc<dyn Fn(&str, &str, DamageType, f32) + Send + Sync>;
pub type ChatCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// A message waiting for the transport; `recipient` is `None` for a broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub recipient: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone)]
struct RemoteRecord {
    /// Backing host character, if the host spawned one
    character_id: Option<u32>,
    name: String,
    faction_id: i32,
    health: f32,
    state: AiState,
    in_combat: bool,
    animation: AnimationType,
    animation_speed: f32,
    looping: bool,
}

#[derive(Default, Clone)]
struct SurfaceCallbacks {
    join: Option<PlayerCallback>,
    leave: Option<PlayerCallback>,
    action: Option<ActionCallback>,
    combat: Option<PeerCombatCallback>,
    chat: Option<ChatCallback>,
}

#[derive(Default)]
struct SurfaceState {
    initialized: bool,
    entities: HashMap<String, RemoteRecord>,
    players: BTreeSet<String>,
    outbox: VecDeque<OutboundMessage>,
    callbacks: SurfaceCallbacks,
    elapsed: f64,
}

/// How an id resolved
enum Target {
    /// Remote entity without a host character
    Detached,
    /// Host character, either backing a remote entity or addressed directly
    Character(u32),
}

pub struct ControlSurface {
    bridge: Arc<StateBridge>,
    interp: Interpolator,
    intercepts: InterceptTable,
    state: Mutex<SurfaceState>,
    /// Held across a spawn so one id never gets two host characters
    spawning: Mutex<()>,
}

impl ControlSurface {
    pub fn new(bridge: Arc<StateBridge>, interpolation_window: Duration) -> Self {
        let intercepts = InterceptTable::new(Arc::clone(bridge.memory()));
        Self {
            bridge,
            interp: Interpolator::new(interpolation_window),
            intercepts,
            state: Mutex::new(SurfaceState::default()),
            spawning: Mutex::new(()),
        }
    }

    pub fn bridge(&self) -> &Arc<StateBridge> {
        &self.bridge
    }

    pub fn interpolator(&self) -> &Interpolator {
        &self.interp
    }

    pub fn intercepts(&self) -> &InterceptTable {
        &self.intercepts
    }

    /// Resolve offsets. Safe to call again after a failure.
    pub fn initialize(&self) -> Result<()> {
        self.bridge.initialize()?;
        self.lock().initialized = true;
        info!("Control surface initialized");
        Ok(())
    }

    /// Revert intercepts, despawn the host characters backing remote
    /// entities and forget every entity, player, queued message and callback
    pub fn shutdown(&self) {
        let _spawning = self.spawning.lock().unwrap_or_else(PoisonError::into_inner);
        let reverted = self.intercepts.revert_all();
        self.interp.clear();
        let state = std::mem::take(&mut *self.lock());

        let mut despawned = 0;
        for (id, record) in &state.entities {
            let Some(character_id) = record.character_id else {
                continue;
            };
            match self.bridge.despawn_character(character_id) {
                Ok(()) => despawned += 1,
                Err(e) => warn!("Host character of {} left in place: {}", id, e),
            }
        }
        info!(
            "Control surface shut down ({} intercepts reverted, {} characters despawned)",
            reverted, despawned
        );
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    /// Register a remote entity at `position`.
    ///
    /// The host is asked to spawn a backing character; when it cannot, the
    /// entity lives only in the surface. Spawning an existing id re-places it.
    pub fn spawn(&self, id: &str, name: &str, position: Vec3, faction_id: i32) -> Result<()> {
        let _spawning = self.spawning.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = self.lock().entities.get(id) {
            debug!("{} ({}) already spawned, re-placing", id, existing.name);
            self.interp.insert(id, position);
            return Ok(());
        }

        let character_id = match self.bridge.spawn_character(faction_id, position) {
            Ok(character_id) => Some(character_id),
            Err(e) => {
                debug!("{} has no host character: {}", id, e);
                None
            }
        };

        self.interp.insert(id, position);
        self.lock().entities.insert(
            id.to_string(),
            RemoteRecord {
                character_id,
                name: name.to_string(),
                faction_id,
                health: REMOTE_MAX_HEALTH,
                state: AiState::Idle,
                in_combat: false,
                animation: AnimationType::Idle,
                animation_speed: 1.0,
                looping: false,
            },
        );
        info!("Spawned {} ({})", id, name);
        Ok(())
    }

    pub fn despawn(&self, id: &str) -> Result<()> {
        let record = self
            .lock()
            .entities
            .remove(id)
            .ok_or_else(|| Error::not_found(EntityKind::Player, id))?;
        self.interp.remove(id);

        if let Some(character_id) = record.character_id {
            match self.bridge.despawn_character(character_id) {
                Ok(()) => {}
                Err(e @ Error::Unresolved(_)) => debug!("{}: {}", id, e),
                Err(e) => warn!("Failed to despawn host character of {}: {}", id, e),
            }
        }
        info!("Despawned {}", id);
        Ok(())
    }

    pub fn get_position(&self, id: &str) -> Result<Vec3> {
        if let Some(position) = self.interp.position(id) {
            return Ok(position);
        }
        match self.target(id)? {
            Target::Character(character_id) => Ok(self.bridge.get_character(character_id)?.position),
            Target::Detached => Err(Error::not_found(EntityKind::Player, id)),
        }
    }

    /// Remote entities glide to `position` over the interpolation window;
    /// local characters are moved at once
    pub fn set_position(&self, id: &str, position: Vec3) -> Result<()> {
        if self.interp.contains(id) {
            let velocity = self
                .interp
                .entity(id)
                .map(|e| position.sub(e.target_position))
                .unwrap_or_default();
            self.interp.update(id, position, velocity);
            return Ok(());
        }
        match self.target(id)? {
            Target::Character(character_id) => self.bridge.set_position(character_id, position),
            Target::Detached => Err(Error::not_found(EntityKind::Player, id)),
        }
    }

    pub fn get_health(&self, id: &str) -> Result<f32> {
        match self.target(id)? {
            Target::Character(character_id) => Ok(self.bridge.get_character(character_id)?.health),
            Target::Detached => self.with_remote(id, |r| r.health),
        }
    }

    /// Returns the applied (clamped) health
    pub fn set_health(&self, id: &str, health: f32) -> Result<f32> {
        match self.target(id)? {
            Target::Character(character_id) => self.bridge.set_health(character_id, health),
            Target::Detached => self.with_remote(id, |r| {
                r.health = crate::bridge::bounded(health, 0.0, REMOTE_MAX_HEALTH);
                r.health
            }),
        }
    }

    /// Returns `false` when a non-cancellable animation is playing
    pub fn play_animation(&self, id: &str, animation: AnimationType, looping: bool) -> Result<bool> {
        match self.target(id)? {
            Target::Character(character_id) => {
                let started = self.bridge.play_animation(character_id, animation, false)?;
                if started {
                    self.bridge.set_animation_looping(character_id, looping)?;
                }
                Ok(started)
            }
            Target::Detached => self.with_remote(id, |r| {
                r.animation = animation;
                r.looping = looping;
                true
            }),
        }
    }

    pub fn stop_animation(&self, id: &str) -> Result<()> {
        match self.target(id)? {
            Target::Character(character_id) => self.bridge.stop_animation(character_id),
            Target::Detached => self.with_remote(id, |r| r.animation = AnimationType::Idle),
        }
    }

    pub fn blend_animation(&self, id: &str, animation: AnimationType) -> Result<()> {
        match self.target(id)? {
            Target::Character(character_id) => self.bridge.blend_animation(character_id, animation),
            Target::Detached => self.with_remote(id, |r| r.animation = animation),
        }
    }

    pub fn set_animation_speed(&self, id: &str, speed: f32) -> Result<()> {
        match self.target(id)? {
            Target::Character(character_id) => self.bridge.set_animation_speed(character_id, speed),
            Target::Detached => self.with_remote(id, |r| {
                r.animation_speed = if speed.is_nan() { 0.0 } else { speed.max(0.0) }
            }),
        }
    }

    pub fn current_animation(&self, id: &str) -> Result<AnimationType> {
        match self.target(id)? {
            Target::Character(character_id) => self.bridge.current_animation(character_id),
            Target::Detached => self.with_remote(id, |r| r.animation),
        }
    }

    pub fn set_character_state(&self, id: &str, state: AiState) -> Result<()> {
        match self.target(id)? {
            Target::Character(character_id) => self.bridge.set_ai_state(character_id, state).map(|_| ()),
            Target::Detached => self.with_remote(id, |r| r.state = state),
        }
    }

    pub fn get_character_state(&self, id: &str) -> Result<AiState> {
        match self.target(id)? {
            Target::Character(character_id) => Ok(self.bridge.get_character(character_id)?.state),
            Target::Detached => self.with_remote(id, |r| r.state),
        }
    }

    pub fn set_combat_mode(&self, id: &str, in_combat: bool) -> Result<()> {
        match self.target(id)? {
            Target::Character(character_id) => self.bridge.set_combat_mode(character_id, in_combat),
            Target::Detached => self.with_remote(id, |r| r.in_combat = in_combat),
        }
    }

    pub fn is_in_combat(&self, id: &str) -> Result<bool> {
        match self.target(id)? {
            Target::Character(character_id) => Ok(self.bridge.get_character(character_id)?.is_in_combat),
            Target::Detached => self.with_remote(id, |r| r.in_combat),
        }
    }

    pub fn get_faction(&self, id: &str) -> Result<i32> {
        match self.target(id)? {
            Target::Character(character_id) => Ok(self.bridge.get_character(character_id)?.faction_id),
            Target::Detached => self.with_remote(id, |r| r.faction_id),
        }
    }

    pub fn set_faction(&self, id: &str, faction_id: i32) -> Result<()> {
        match self.target(id)? {
            Target::Character(character_id) => {
                self.bridge.set_character_faction(character_id, faction_id)
            }
            Target::Detached => self.with_remote(id, |r| r.faction_id = faction_id),
        }
    }

    pub fn get_faction_relation(&self, from: i32, to: i32) -> Result<i32> {
        self.bridge.get_relation(from, to)
    }

    pub fn set_faction_relation(&self, from: i32, to: i32, value: i32) -> Result<()> {
        self.bridge.set_relation(from, to, value).map(|_| ())
    }

    pub fn broadcast(&self, text: &str) {
        self.lock().outbox.push_back(OutboundMessage {
            recipient: None,
            text: text.to_string(),
        });
    }

    pub fn send_to(&self, player: &str, text: &str) -> Result<()> {
        let mut state = self.lock();
        if !state.players.contains(player) {
            return Err(Error::not_found(EntityKind::Player, player));
        }
        state.outbox.push_back(OutboundMessage {
            recipient: Some(player.to_string()),
            text: text.to_string(),
        });
        Ok(())
    }

    /// Take every queued message, oldest first
    pub fn drain_outbox(&self) -> Vec<OutboundMessage> {
        self.lock().outbox.drain(..).collect()
    }

    pub fn player_joined(&self, player: &str) {
        let callback = {
            let mut state = self.lock();
            if !state.players.insert(player.to_string()) {
                return;
            }
            state.callbacks.join.clone()
        };
        info!("Player {} joined", player);
        if let Some(callback) = callback {
            callback(player);
        }
    }

    /// Forget a player and despawn their entity, if any
    pub fn player_left(&self, player: &str) {
        let (callback, spawned) = {
            let mut state = self.lock();
            if !state.players.remove(player) {
                return;
            }
            (state.callbacks.leave.clone(), state.entities.contains_key(player))
        };
        if spawned {
            if let Err(e) = self.despawn(player) {
                warn!("Failed to despawn {}: {}", player, e);
            }
        }
        info!("Player {} left", player);
        if let Some(callback) = callback {
            callback(player);
        }
    }

    pub fn connected_players(&self) -> Vec<String> {
        self.lock().players.iter().cloned().collect()
    }

    pub fn connected_player_count(&self) -> usize {
        self.lock().players.len()
    }

    pub fn total_entities(&self) -> usize {
        self.lock().entities.len()
    }

    /// Seconds accumulated by [`ControlSurface::update`]
    pub fn elapsed(&self) -> f64 {
        self.lock().elapsed
    }

    pub fn report_action(&self, player: &str, action: i32, data: &str) {
        let callback = self.lock().callbacks.action.clone();
        if let Some(callback) = callback {
            callback(player, action, data);
        }
    }

    pub fn report_combat(&self, attacker: &str, target: &str, damage_type: DamageType, damage: f32) {
        let callback = self.lock().callbacks.combat.clone();
        if let Some(callback) = callback {
            callback(attacker, target, damage_type, damage);
        }
    }

    pub fn receive_chat(&self, player: &str, text: &str) {
        let callback = self.lock().callbacks.chat.clone();
        if let Some(callback) = callback {
            callback(player, text);
        }
    }

    pub fn set_on_join(&self, callback: Option<PlayerCallback>) {
        self.lock().callbacks.join = callback;
    }

    pub fn set_on_leave(&self, callback: Option<PlayerCallback>) {
        self.lock().callbacks.leave = callback;
    }

    pub fn set_on_action(&self, callback: Option<ActionCallback>) {
        self.lock().callbacks.action = callback;
    }

    pub fn set_on_combat(&self, callback: Option<PeerCombatCallback>) {
        self.lock().callbacks.combat = callback;
    }

    pub fn set_on_chat(&self, callback: Option<ChatCallback>) {
        self.lock().callbacks.chat = callback;
    }

    /// Advance interpolation by `delta_seconds` and move backing characters
    /// to their displayed positions. Returns how many characters were moved.
    pub fn update(&self, delta_seconds: f32) -> usize {
        self.interp.tick(delta_seconds);
        let bound: Vec<(String, u32)> = {
            let mut state = self.lock();
            state.elapsed += f64::from(delta_seconds.max(0.0));
            state
                .entities
                .iter()
                .filter_map(|(id, r)| r.character_id.map(|c| (id.clone(), c)))
                .collect()
        };

        let mut moved = 0;
        for (id, character_id) in bound {
            let Some(position) = self.interp.position(&id) else {
                continue;
            };
            match self.bridge.set_position(character_id, position) {
                Ok(()) => moved += 1,
                Err(e) => debug!("Cannot place {}: {}", id, e),
            }
        }
        moved
    }

    fn target(&self, id: &str) -> Result<Target> {
        if let Some(record) = self.lock().entities.get(id) {
            return Ok(record.character_id.map_or(Target::Detached, Target::Character));
        }
        id.parse::<u32>()
            .map(Target::Character)
            .map_err(|_| Error::not_found(EntityKind::Player, id))
    }

    fn with_remote<T>(&self, id: &str, f: impl FnOnce(&mut RemoteRecord) -> T) -> Result<T> {
        self.lock()
            .entities
            .get_mut(id)
            .map(f)
            .ok_or_else(|| Error::not_found(EntityKind::Player, id))
    }

    fn lock(&self) -> MutexGuard<'_, SurfaceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::testing::{HostFixture, RecordingCalls};
    use crate::bridge::NativeFunction;

    fn surface(fixture: &HostFixture) -> ControlSurface {
        ControlSurface::new(Arc::new(fixture.bridge()), Duration::from_secs(1))
    }

    #[test]
    fn test_detached_entity_is_interpolated() {
        let fixture = HostFixture::new();
        let surface = surface(&fixture);

        surface.spawn("peer-1", "Ruka", Vec3::ZERO, 0).unwrap();
        assert_eq!(surface.total_entities(), 1);
        surface.set_position("peer-1", Vec3::new(10.0, 0.0, 0.0)).unwrap();
        assert_eq!(surface.update(0.5), 0);
        assert!((surface.get_position("peer-1").unwrap().x - 5.0).abs() < 1e-4);
        surface.update(0.75);
        assert_eq!(surface.get_position("peer-1").unwrap().x, 10.0);

        assert_eq!(surface.set_health("peer-1", 250.0).unwrap(), REMOTE_MAX_HEALTH);
        assert!(surface.play_animation("peer-1", AnimationType::Run, true).unwrap());
        assert_eq!(surface.current_animation("peer-1").unwrap(), AnimationType::Run);
        surface.set_combat_mode("peer-1", true).unwrap();
        assert!(surface.is_in_combat("peer-1").unwrap());

        surface.despawn("peer-1").unwrap();
        assert!(surface.get_position("peer-1").unwrap_err().is_not_found());
        assert!(surface.despawn("peer-1").unwrap_err().is_not_found());
    }

    #[test]
    fn test_numeric_id_addresses_host_character() {
        let mut fixture = HostFixture::new();
        fixture.character(7, "Beep", true);
        let surface = surface(&fixture);

        surface.set_position("7", Vec3::new(3.0, 0.0, 4.0)).unwrap();
        assert_eq!(surface.get_position("7").unwrap(), Vec3::new(3.0, 0.0, 4.0));
        assert_eq!(surface.set_health("7", 130.0).unwrap(), 100.0);
        surface.set_character_state("7", AiState::Sleeping).unwrap();
        assert_eq!(surface.get_character_state("7").unwrap(), AiState::Sleeping);

        assert!(surface.get_health("8").unwrap_err().is_not_found());
        assert!(surface.get_health("nobody").unwrap_err().is_not_found());
    }

    #[test]
    fn test_spawned_character_follows_interpolation() {
        let mut fixture = HostFixture::new();
        let record = fixture.character(21, "Double", false);
        let calls = Arc::new(
            RecordingCalls::new()
                .on(NativeFunction::SpawnCharacter, move |_| Ok(record))
                .on(NativeFunction::DespawnCharacter, |_| Ok(0)),
        );
        let surface = ControlSurface::new(Arc::new(fixture.bridge_with(calls.clone())), Duration::from_secs(1));

        surface.spawn("peer-2", "Double", Vec3::ZERO, 0).unwrap();
        surface.set_position("peer-2", Vec3::new(0.0, 0.0, 8.0)).unwrap();
        assert_eq!(surface.update(0.25), 1);
        let host = surface.bridge().get_character(21).unwrap().position;
        assert!((host.z - 2.0).abs() < 1e-4);

        surface.despawn("peer-2").unwrap();
        assert_eq!(calls.count(NativeFunction::DespawnCharacter), 1);
    }

    #[test]
    fn test_shutdown_despawns_backing_characters() {
        let mut fixture = HostFixture::new();
        let record = fixture.character(21, "Double", false);
        let calls = Arc::new(
            RecordingCalls::new()
                .on(NativeFunction::SpawnCharacter, move |_| Ok(record))
                .on(NativeFunction::DespawnCharacter, |_| Ok(0)),
        );
        let surface = ControlSurface::new(Arc::new(fixture.bridge_with(calls.clone())), Duration::from_secs(1));

        surface.spawn("peer-1", "Double", Vec3::ZERO, 0).unwrap();
        surface.spawn("peer-2", "Double", Vec3::ZERO, 0).unwrap();
        surface.shutdown();
        assert_eq!(calls.count(NativeFunction::DespawnCharacter), 2);
        assert_eq!(surface.total_entities(), 0);

        // Nothing is left to despawn the second time
        surface.shutdown();
        assert_eq!(calls.count(NativeFunction::DespawnCharacter), 2);
    }

    #[test]
    fn test_concurrent_spawns_create_one_character() {
        let mut fixture = HostFixture::new();
        let record = fixture.character(21, "Double", false);
        let calls = Arc::new(RecordingCalls::new().on(NativeFunction::SpawnCharacter, move |_| {
            std::thread::sleep(Duration::from_millis(5));
            Ok(record)
        }));
        let surface = Arc::new(ControlSurface::new(
            Arc::new(fixture.bridge_with(calls.clone())),
            Duration::from_secs(1),
        ));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let surface = Arc::clone(&surface);
                std::thread::spawn(move || surface.spawn("peer-1", "Double", Vec3::ZERO, 0))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }
        assert_eq!(calls.count(NativeFunction::SpawnCharacter), 1);
        assert_eq!(surface.total_entities(), 1);
    }

    #[test]
    fn test_players_and_messages() {
        let fixture = HostFixture::new();
        let surface = surface(&fixture);
        let joined = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&joined);
        surface.set_on_join(Some(Arc::new(move |p: &str| sink.lock().unwrap().push(p.to_string()))));

        surface.player_joined("alice");
        surface.player_joined("alice");
        surface.player_joined("bob");
        assert_eq!(*joined.lock().unwrap(), vec!["alice", "bob"]);
        assert_eq!(surface.connected_players(), vec!["alice", "bob"]);

        surface.broadcast("hello");
        surface.send_to("bob", "psst").unwrap();
        assert!(surface.send_to("carol", "?").unwrap_err().is_not_found());
        let outbox = surface.drain_outbox();
        assert_eq!(outbox.len(), 2);
        assert_eq!(outbox[1].recipient.as_deref(), Some("bob"));
        assert!(surface.drain_outbox().is_empty());

        surface.spawn("bob", "Bob", Vec3::ZERO, 0).unwrap();
        surface.player_left("bob");
        assert_eq!(surface.connected_player_count(), 1);
        assert_eq!(surface.total_entities(), 0);

        surface.shutdown();
        assert!(surface.connected_players().is_empty());
        assert!(!surface.is_initialized());
    }

    #[test]
    fn test_chat_and_combat_callbacks() {
        let fixture = HostFixture::new();
        let surface = surface(&fixture);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let chat = Arc::clone(&seen);
        surface.set_on_chat(Some(Arc::new(move |p: &str, t: &str| {
            chat.lock().unwrap().push(format!("{}: {}", p, t));
        })));
        let combat = Arc::clone(&seen);
        surface.set_on_combat(Some(Arc::new(move |a: &str, d: &str, dt: DamageType, dmg: f32| {
            combat.lock().unwrap().push(format!("{} hit {} ({}, {})", a, d, dt, dmg));
        })));

        surface.receive_chat("alice", "hi");
        surface.report_combat("alice", "bob", DamageType::Cut, 12.5);
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["alice: hi", "alice hit bob (Cut, 12.5)"]
        );
    }
}
