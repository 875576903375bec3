use tracing::{debug, warn};

use super::fields::CharacterFields;
use super::{
    AiState, AnimationType, ApplyPath, CharacterState, EquipSlot, Limb, LimbType, NativeArg,
    NativeFunction, SquadOrder, StateBridge, bounded, vanished,
};
use crate::error::{EntityKind, Error, Result};
use crate::geometry::{Quat, Vec3};
use crate::memory::layout::{ai, anim, body, body_part, character, equipment, item, limits};
use crate::memory::{AccessFault, AccessResult, FaultKind, ReadMemory, WriteMemory};

/// Highest blood level a character can hold
pub const MAX_BLOOD: f32 = 100.0;

impl StateBridge {
    /// Every character in the global list
    pub fn get_all_characters(&self) -> Vec<CharacterState> {
        let state = self.lock();
        let fields = self.fields().character;
        let game_time = self.game_time();
        self.all_character_records()
            .into_iter()
            .filter_map(|record| self.read_listed(record, &fields, state.tick, game_time))
            .collect()
    }

    /// Characters in the locally controlled roster
    pub fn get_player_characters(&self) -> Vec<CharacterState> {
        let state = self.lock();
        let fields = self.fields().character;
        let game_time = self.game_time();
        self.roster_records()
            .into_iter()
            .filter_map(|record| self.read_listed(record, &fields, state.tick, game_time))
            .collect()
    }

    pub fn get_character(&self, id: u32) -> Result<CharacterState> {
        let state = self.lock();
        let fields = self.fields().character;
        let record = self.require_character(id)?;
        self.read_character(record, &fields, state.tick, self.game_time())
            .map_err(|e| vanished(EntityKind::Character, id, e))
    }

    /// The character currently selected in the host UI
    pub fn get_selected_character(&self) -> Result<CharacterState> {
        let state = self.lock();
        let fields = self.fields().character;
        let global = self.resolver.global("Characters.SelectedCharacter");
        let record = (global != 0)
            .then(|| self.memory.read_ptr(global).ok().flatten())
            .flatten()
            .ok_or_else(|| Error::not_found(EntityKind::Character, "selected"))?;
        self.read_character(record, &fields, state.tick, self.game_time())
            .map_err(|e| vanished(EntityKind::Character, "selected", e))
    }

    pub fn player_character_count(&self) -> usize {
        let _state = self.lock();
        self.roster_records().len()
    }

    pub fn npc_count(&self) -> usize {
        self.get_all_characters()
            .iter()
            .filter(|c| !c.is_player_controlled)
            .count()
    }

    /// Non-player characters within `radius` of `center`
    pub fn npcs_in_range(&self, center: Vec3, radius: f32) -> Vec<CharacterState> {
        let radius_squared = radius * radius;
        self.get_all_characters()
            .into_iter()
            .filter(|c| !c.is_player_controlled)
            .filter(|c| c.position.sub(center).length_squared() <= radius_squared)
            .collect()
    }

    pub fn distance_between(&self, first: u32, second: u32) -> Result<f32> {
        let a = self.get_character(first)?;
        let b = self.get_character(second)?;
        Ok(a.position.distance(b.position))
    }

    /// Write a snapshot back to its host record.
    ///
    /// Fields are clamped to their valid domain first. The record and its body
    /// are read in full before anything is written, so a record freed since the
    /// lookup is reported as `NotFound` instead of being partially updated.
    /// Identity, links and equipment are read-only here.
    pub fn set_character(&self, state: &CharacterState) -> Result<()> {
        let _state = self.lock();
        let fields = self.fields().character;
        let record = self.require_character(state.id)?;

        self.validate_character(record, &fields, state.id)
            .map_err(|e| vanished(EntityKind::Character, state.id, e))?;
        self.write_character(record, &fields, state)
            .map_err(|e| vanished(EntityKind::Character, state.id, e))?;
        debug!("Wrote character {}", state.id);
        Ok(())
    }

    pub fn set_position(&self, id: u32, position: Vec3) -> Result<()> {
        let _state = self.lock();
        let fields = self.fields().character;
        let record = self.require_character(id)?;
        self.memory
            .write_vec3(record + fields.position, position)
            .map_err(|e| vanished(EntityKind::Character, id, e))
    }

    pub fn set_rotation(&self, id: u32, rotation: Quat) -> Result<()> {
        let _state = self.lock();
        let fields = self.fields().character;
        let record = self.require_character(id)?;
        self.memory
            .write_quat(record + fields.rotation, rotation)
            .map_err(|e| vanished(EntityKind::Character, id, e))
    }

    /// Set aggregate health, clamped to `[0, max_health]`; returns the applied value
    pub fn set_health(&self, id: u32, health: f32) -> Result<f32> {
        let _state = self.lock();
        let fields = self.fields().character;
        let record = self.require_character(id)?;
        let write = || -> AccessResult<f32> {
            let max = self.memory.read_f32(record + fields.max_health)?;
            let health = bounded(health, 0.0, max.max(0.0));
            self.memory.write_f32(record + fields.health, health)?;
            Ok(health)
        };
        write().map_err(|e| vanished(EntityKind::Character, id, e))
    }

    /// Order a character, preferring the host's own command function.
    ///
    /// When that function is unresolved or faults, the AI and character state
    /// are written directly to approximate the order.
    pub fn issue_command(&self, id: u32, order: SquadOrder, target: Vec3) -> Result<ApplyPath> {
        let _state = self.lock();
        let fields = self.fields().character;
        let record = self.require_character(id)?;
        self.command_record(record, &fields, order, target)
            .map_err(|e| vanished(EntityKind::Character, id, e))
    }

    pub fn move_to(&self, id: u32, target: Vec3) -> Result<ApplyPath> {
        self.issue_command(id, SquadOrder::Move, target)
    }

    pub fn set_ai_state(&self, id: u32, ai_state: AiState) -> Result<ApplyPath> {
        let _state = self.lock();
        let fields = self.fields().character;
        let record = self.require_character(id)?;

        let args = [NativeArg::Ptr(record), NativeArg::Int(i32::from(ai_state) as i64)];
        if self.call_native(NativeFunction::SetCharacterState, &args).is_some() {
            return Ok(ApplyPath::Native);
        }

        self.write_ai_state(record, &fields, ai_state)
            .map_err(|e| vanished(EntityKind::Character, id, e))?;
        Ok(ApplyPath::Direct)
    }

    /// Point a character at a combat target, or clear it with `None`
    pub fn set_combat_target(&self, id: u32, target: Option<u32>) -> Result<()> {
        let _state = self.lock();
        let record = self.require_character(id)?;
        let target_record = target.map(|t| self.require_character(t)).transpose()?;

        let write = || -> AccessResult<()> {
            self.memory
                .write_u64(record + character::COMBAT_TARGET, target_record.unwrap_or(0))?;
            self.memory
                .write_bool(record + character::IS_IN_COMBAT, target_record.is_some())
        };
        write().map_err(|e| vanished(EntityKind::Character, id, e))
    }

    /// Toggle the in-combat flag on the record and its AI controller
    pub fn set_combat_mode(&self, id: u32, in_combat: bool) -> Result<()> {
        let _state = self.lock();
        let fields = self.fields().character;
        let record = self.require_character(id)?;
        let write = || -> AccessResult<()> {
            if let Some(controller) = self.memory.read_ptr(record + fields.ai)? {
                self.memory.write_bool(controller + ai::IS_IN_COMBAT, in_combat)?;
            }
            self.memory.write_bool(record + character::IS_IN_COMBAT, in_combat)
        };
        write().map_err(|e| vanished(EntityKind::Character, id, e))
    }

    /// Move a character to another existing faction
    pub fn set_character_faction(&self, id: u32, faction_id: i32) -> Result<()> {
        let _state = self.lock();
        let fields = self.fields().character;
        self.require_faction(faction_id)?;
        let record = self.require_character(id)?;
        self.memory
            .write_i32(record + fields.faction, faction_id)
            .map_err(|e| vanished(EntityKind::Character, id, e))
    }

    /// Create a host character through the native spawn function, returning its id
    pub fn spawn_character(&self, faction_id: i32, position: Vec3) -> Result<u32> {
        let _state = self.lock();
        let args = [NativeArg::Int(faction_id as i64), NativeArg::Vec3(position)];
        let record = self
            .call_native(NativeFunction::SpawnCharacter, &args)
            .filter(|record| *record != 0)
            .ok_or(Error::Unresolved(NativeFunction::SpawnCharacter.key()))?;
        let id = self.memory.read_u32(record + character::ID)?;
        debug!("Spawned character {} at {:#x}", id, record);
        Ok(id)
    }

    pub fn despawn_character(&self, id: u32) -> Result<()> {
        let _state = self.lock();
        let record = self.require_character(id)?;
        self.call_native(NativeFunction::DespawnCharacter, &[NativeArg::Ptr(record)])
            .map(|_| ())
            .ok_or(Error::Unresolved(NativeFunction::DespawnCharacter.key()))
    }

    pub(super) fn roster_records(&self) -> Vec<u64> {
        self.walk_list(
            self.resolver.global("Characters.PlayerSquadList"),
            self.resolver.global("Characters.PlayerSquadCount"),
            limits::PLAYER_SQUAD,
            "player squad",
        )
    }

    pub(super) fn all_character_records(&self) -> Vec<u64> {
        self.walk_list(
            self.resolver.global("Characters.AllCharactersList"),
            self.resolver.global("Characters.AllCharactersCount"),
            limits::ALL_CHARACTERS,
            "character",
        )
    }

    /// Record of a character, checking the roster before the global list
    pub(super) fn find_character(&self, id: u32) -> Option<u64> {
        let matches = |record: &u64| {
            self.memory
                .read_u32(record + character::ID)
                .is_ok_and(|v| v == id)
        };
        self.roster_records()
            .into_iter()
            .find(matches)
            .or_else(|| self.all_character_records().into_iter().find(matches))
    }

    pub(super) fn require_character(&self, id: u32) -> Result<u64> {
        self.find_character(id)
            .ok_or_else(|| Error::not_found(EntityKind::Character, id))
    }

    pub(super) fn read_character(
        &self,
        record: u64,
        fields: &CharacterFields,
        tick: u64,
        game_time: f32,
    ) -> AccessResult<CharacterState> {
        let m = &self.memory;
        let limbs = match m.read_ptr(record + fields.body)? {
            Some(body) => self.read_limbs(body)?,
            None => Vec::new(),
        };
        let animation = match m.read_ptr(record + fields.anim_state)? {
            Some(anim) => AnimationType::from_raw(m.read_i32(anim + anim::CURRENT)?),
            None => AnimationType::default(),
        };

        Ok(CharacterState {
            id: m.read_u32(record + character::ID)?,
            name: m.read_string(record + character::NAME)?,
            position: m.read_vec3(record + fields.position)?,
            rotation: m.read_quat(record + fields.rotation)?,
            velocity: m.read_vec3(record + character::VELOCITY)?,
            health: m.read_f32(record + fields.health)?,
            max_health: m.read_f32(record + fields.max_health)?,
            blood: m.read_f32(record + fields.blood)?,
            hunger: m.read_f32(record + fields.hunger)?,
            thirst: m.read_f32(record + character::THIRST)?,
            limbs,
            state: AiState::from_raw(m.read_i32(record + fields.state)?),
            animation,
            is_unconscious: m.read_bool(record + character::IS_UNCONSCIOUS)?,
            is_dead: m.read_bool(record + character::IS_DEAD)?,
            is_in_combat: m.read_bool(record + character::IS_IN_COMBAT)?,
            is_sneaking: m.read_bool(record + character::IS_SNEAKING)?,
            is_player_controlled: m.read_bool(record + character::IS_PLAYER_CONTROLLED)?,
            equipped: self.read_equipped(record, fields)?,
            faction_id: m.read_i32(record + fields.faction)?,
            squad_id: self.linked_id(record + fields.squad),
            combat_target_id: self.linked_id(record + character::COMBAT_TARGET),
            attack_cooldown: m.read_f32(record + character::ATTACK_COOLDOWN)?,
            game_time,
            sync_tick: tick,
        })
    }

    fn read_listed(
        &self,
        record: u64,
        fields: &CharacterFields,
        tick: u64,
        game_time: f32,
    ) -> Option<CharacterState> {
        match self.read_character(record, fields, tick, game_time) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!("Skipping character at {:#x}: {}", record, e);
                None
            }
        }
    }

    fn read_limbs(&self, body: u64) -> AccessResult<Vec<Limb>> {
        (0..LimbType::COUNT)
            .map(|i| {
                let part = body + body::limb(i);
                Ok(Limb {
                    kind: LimbType::from_raw(i as i32),
                    health: self.memory.read_f32(part + body_part::HEALTH)?,
                    max_health: self.memory.read_f32(part + body_part::MAX_HEALTH)?,
                    bleeding: self.memory.read_bool(part + body_part::IS_BLEEDING)?,
                    missing: self.memory.read_bool(part + body_part::IS_MISSING)?,
                })
            })
            .collect()
    }

    /// Template id per equipment slot; a freed item reads as an empty slot
    fn read_equipped(
        &self,
        record: u64,
        fields: &CharacterFields,
    ) -> AccessResult<[u32; EquipSlot::COUNT]> {
        let mut equipped = [0; EquipSlot::COUNT];
        let Some(slots) = self.memory.read_ptr(record + fields.equipment)? else {
            return Ok(equipped);
        };
        for (slot, template) in equipped.iter_mut().enumerate() {
            let pointer = slots + equipment::POINTER + slot as u64 * 8;
            if let Some(equipped_item) = self.memory.read_ptr(pointer)? {
                *template = self
                    .memory
                    .read_u32(equipped_item + item::TEMPLATE_ID)
                    .unwrap_or(0);
            }
        }
        Ok(equipped)
    }

    /// Id of the record a pointer field links to; 0 when unlinked or unreadable
    pub(super) fn linked_id(&self, pointer_field: u64) -> u32 {
        // Characters, squads and buildings keep their id at the same offset
        match self.memory.read_ptr(pointer_field) {
            Ok(Some(linked)) => self.memory.read_u32(linked + character::ID).unwrap_or(0),
            _ => 0,
        }
    }

    fn validate_character(&self, record: u64, fields: &CharacterFields, id: u32) -> AccessResult<()> {
        self.memory.read_bytes(record, character::SIZE as usize)?;
        if let Some(body) = self.memory.read_ptr(record + fields.body)? {
            self.memory.read_bytes(body, body::SIZE as usize)?;
        }
        let current = self.memory.read_u32(record + character::ID)?;
        if current != id {
            // The slot was reused by another character
            return Err(AccessFault::new(record + character::ID, 4, FaultKind::Unmapped));
        }
        Ok(())
    }

    fn write_character(
        &self,
        record: u64,
        fields: &CharacterFields,
        state: &CharacterState,
    ) -> AccessResult<()> {
        let m = &self.memory;
        let max_health = bounded(state.max_health, 0.0, f32::MAX);
        let hunger_max = m.read_f32(record + character::HUNGER_MAX)?.max(0.0);
        let thirst_max = m.read_f32(record + character::THIRST_MAX)?.max(0.0);

        m.write_vec3(record + fields.position, state.position)?;
        m.write_quat(record + fields.rotation, state.rotation)?;
        m.write_vec3(record + character::VELOCITY, state.velocity)?;

        m.write_f32(record + fields.max_health, max_health)?;
        m.write_f32(record + fields.health, bounded(state.health, 0.0, max_health))?;
        m.write_f32(record + fields.blood, bounded(state.blood, 0.0, MAX_BLOOD))?;
        m.write_f32(record + fields.hunger, bounded(state.hunger, 0.0, hunger_max))?;
        m.write_f32(record + character::THIRST, bounded(state.thirst, 0.0, thirst_max))?;

        if let Some(body) = m.read_ptr(record + fields.body)? {
            for limb in state.limbs.iter().take(LimbType::COUNT) {
                let part = body + body::limb(limb.kind.index());
                let limb_max = m.read_f32(part + body_part::MAX_HEALTH)?;
                m.write_f32(part + body_part::HEALTH, bounded(limb.health, 0.0, limb_max))?;
                m.write_bool(part + body_part::IS_BLEEDING, limb.bleeding)?;
            }
        }

        m.write_i32(record + fields.state, state.state.into())?;
        m.write_bool(record + character::IS_UNCONSCIOUS, state.is_unconscious)?;
        m.write_bool(record + character::IS_DEAD, state.is_dead)?;
        m.write_bool(record + character::IS_IN_COMBAT, state.is_in_combat)?;
        m.write_bool(record + character::IS_SNEAKING, state.is_sneaking)?;
        Ok(())
    }

    pub(super) fn command_record(
        &self,
        record: u64,
        fields: &CharacterFields,
        order: SquadOrder,
        target: Vec3,
    ) -> AccessResult<ApplyPath> {
        let args = [
            NativeArg::Ptr(record),
            NativeArg::Int(i32::from(order) as i64),
            NativeArg::Vec3(target),
        ];
        if self.call_native(NativeFunction::IssueCommand, &args).is_some() {
            return Ok(ApplyPath::Native);
        }

        warn!("Native command unavailable at {:#x}, writing {} directly", record, order);
        self.apply_order(record, fields, order, target)?;
        Ok(ApplyPath::Direct)
    }

    fn apply_order(
        &self,
        record: u64,
        fields: &CharacterFields,
        order: SquadOrder,
        target: Vec3,
    ) -> AccessResult<()> {
        let Some(ai_state) = order.fallback_state() else {
            debug!("Order {} has no direct equivalent", order);
            return Ok(());
        };
        self.write_ai_state(record, fields, ai_state)?;
        if order == SquadOrder::Move {
            if let Some(controller) = self.memory.read_ptr(record + fields.ai)? {
                self.memory.write_vec3(controller + ai::MOVE_TARGET, target)?;
            }
        }
        Ok(())
    }

    pub(super) fn write_ai_state(
        &self,
        record: u64,
        fields: &CharacterFields,
        ai_state: AiState,
    ) -> AccessResult<()> {
        if let Some(controller) = self.memory.read_ptr(record + fields.ai)? {
            self.memory.write_i32(controller + ai::STATE, ai_state.into())?;
        }
        self.memory.write_i32(record + fields.state, ai_state.into())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::bridge::testing::{HostFixture, RecordingCalls, function_address};

    #[test]
    fn test_roster_characters_and_npcs() {
        let mut fixture = HostFixture::new();
        fixture.character(1, "Beep", true);
        let npc = fixture.character(2, "Hobbs", false);
        fixture.image().write_vec3(npc + character::POSITION, Vec3::new(30.0, 0.0, 40.0)).unwrap();
        fixture.character(3, "Ruka", true);

        let bridge = fixture.bridge();
        assert_eq!(bridge.get_player_characters().len(), 2);
        assert_eq!(bridge.get_all_characters().len(), 3);
        assert_eq!(bridge.player_character_count(), 2);
        assert_eq!(bridge.npc_count(), 1);

        // Not in the roster, found through the global list
        let hobbs = bridge.get_character(2).unwrap();
        assert_eq!(hobbs.name, "Hobbs");
        assert_eq!(hobbs.limbs.len(), LimbType::COUNT);
        assert_eq!(hobbs.rotation, Quat::IDENTITY);

        assert_eq!(bridge.npcs_in_range(Vec3::ZERO, 50.0).len(), 1);
        assert!(bridge.npcs_in_range(Vec3::ZERO, 49.0).is_empty());
        assert_eq!(bridge.distance_between(1, 2).unwrap(), 50.0);
    }

    #[test]
    fn test_unknown_character_is_not_found() {
        let mut fixture = HostFixture::new();
        fixture.character(1, "Beep", true);
        let bridge = fixture.bridge();

        assert!(bridge.get_character(99).unwrap_err().is_not_found());
        assert!(bridge.get_selected_character().unwrap_err().is_not_found());
    }

    #[test]
    fn test_selected_character() {
        let mut fixture = HostFixture::new();
        let record = fixture.character(4, "Green", true);
        fixture.select(record);
        assert_eq!(fixture.bridge().get_selected_character().unwrap().id, 4);
    }

    #[test]
    fn test_set_round_trip_clamps() {
        let mut fixture = HostFixture::new();
        fixture.character(1, "Beep", true);
        let bridge = fixture.bridge();

        let mut state = bridge.get_character(1).unwrap();
        state.position = Vec3::new(100.0, 5.0, -20.0);
        state.health = 80.0;
        state.hunger = 40.0;
        state.state = AiState::Sleeping;
        state.is_sneaking = true;
        state.limbs[LimbType::LeftArm.index()].health = 55.0;
        state.limbs[LimbType::LeftArm.index()].bleeding = true;
        bridge.set_character(&state).unwrap();
        assert_eq!(bridge.get_character(1).unwrap(), state);

        let mut wild = state.clone();
        wild.health = 250.0;
        wild.blood = -4.0;
        wild.thirst = 1000.0;
        wild.limbs[0].health = f32::NAN;
        bridge.set_character(&wild).unwrap();

        let applied = bridge.get_character(1).unwrap();
        assert_eq!(applied.health, 100.0);
        assert_eq!(applied.blood, 0.0);
        assert_eq!(applied.thirst, 100.0);
        assert_eq!(applied.limbs[0].health, 0.0);
    }

    #[test]
    fn test_set_on_vanished_body_writes_nothing() {
        let mut fixture = HostFixture::new();
        let record = fixture.character(1, "Beep", true);
        let bridge = fixture.bridge();
        let mut state = bridge.get_character(1).unwrap();

        let body = fixture.image().read_u64(record + character::BODY).unwrap();
        fixture.free(body);
        state.position = Vec3::new(9.0, 9.0, 9.0);

        assert!(bridge.set_character(&state).unwrap_err().is_not_found());
        let position = fixture.image().read_vec3(record + character::POSITION).unwrap();
        assert_eq!(position, Vec3::ZERO);
    }

    #[test]
    fn test_set_health_clamps_to_max() {
        let mut fixture = HostFixture::new();
        fixture.character(1, "Beep", true);
        let bridge = fixture.bridge();
        assert_eq!(bridge.set_health(1, 140.0).unwrap(), 100.0);
        assert_eq!(bridge.set_health(1, 35.0).unwrap(), 35.0);
        assert_eq!(bridge.get_character(1).unwrap().health, 35.0);
    }

    #[test]
    fn test_issue_command_prefers_native() {
        let mut fixture = HostFixture::new();
        let record = fixture.character(1, "Beep", true);
        let calls = Arc::new(RecordingCalls::new().on(NativeFunction::IssueCommand, |_| Ok(1)));
        let bridge = fixture.bridge_with(calls.clone());

        let target = Vec3::new(10.0, 0.0, 10.0);
        assert_eq!(bridge.issue_command(1, SquadOrder::Move, target).unwrap(), ApplyPath::Native);

        let recorded = calls.calls();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].1, function_address(NativeFunction::IssueCommand));
        assert_eq!(
            recorded[0].2,
            vec![NativeArg::Ptr(record), NativeArg::Int(3), NativeArg::Vec3(target)]
        );
        // The native path leaves the record alone
        assert_eq!(bridge.get_character(1).unwrap().state, AiState::Idle);
    }

    #[test]
    fn test_issue_command_falls_back_to_direct_write() {
        let mut fixture = HostFixture::new();
        let record = fixture.character(1, "Beep", true);
        // IssueCommand has no handler, so the call faults
        let calls = Arc::new(RecordingCalls::new());
        let bridge = fixture.bridge_with(calls.clone());

        let target = Vec3::new(-5.0, 0.0, 12.0);
        assert_eq!(bridge.move_to(1, target).unwrap(), ApplyPath::Direct);
        assert_eq!(calls.count(NativeFunction::IssueCommand), 1);

        let controller = fixture.image().read_u64(record + character::AI).unwrap();
        let image = fixture.image();
        assert_eq!(image.read_i32(controller + ai::STATE).unwrap(), AiState::Moving as i32);
        assert_eq!(image.read_vec3(controller + ai::MOVE_TARGET).unwrap(), target);
        assert_eq!(bridge.get_character(1).unwrap().state, AiState::Moving);

        assert!(bridge.issue_command(42, SquadOrder::Hold, Vec3::ZERO).unwrap_err().is_not_found());
    }

    #[test]
    fn test_raising_native_falls_back_to_direct_write() {
        let mut fixture = HostFixture::new();
        let record = fixture.character(1, "Beep", true);
        let calls = Arc::new(RecordingCalls::new().on(NativeFunction::IssueCommand, |_| {
            Err(AccessFault::new(0, 0, FaultKind::Raised))
        }));
        let bridge = fixture.bridge_with(calls.clone());

        let target = Vec3::new(3.0, 0.0, 4.0);
        assert_eq!(bridge.move_to(1, target).unwrap(), ApplyPath::Direct);
        assert_eq!(calls.count(NativeFunction::IssueCommand), 1);
        let controller = fixture.image().read_u64(record + character::AI).unwrap();
        assert_eq!(fixture.image().read_vec3(controller + ai::MOVE_TARGET).unwrap(), target);
    }

    #[test]
    fn test_set_ai_state_without_native() {
        let mut fixture = HostFixture::new();
        fixture.character(1, "Beep", true);
        let bridge = fixture.bridge();
        assert_eq!(bridge.set_ai_state(1, AiState::Guarding).unwrap(), ApplyPath::Direct);
        assert_eq!(bridge.get_character(1).unwrap().state, AiState::Guarding);
    }

    #[test]
    fn test_combat_target() {
        let mut fixture = HostFixture::new();
        fixture.character(1, "Beep", true);
        fixture.character(2, "Bandit", false);
        let bridge = fixture.bridge();

        bridge.set_combat_target(1, Some(2)).unwrap();
        let beep = bridge.get_character(1).unwrap();
        assert_eq!(beep.combat_target_id, 2);
        assert!(beep.is_in_combat);

        bridge.set_combat_target(1, None).unwrap();
        assert_eq!(bridge.get_character(1).unwrap().combat_target_id, 0);
        assert!(bridge.set_combat_target(1, Some(9)).unwrap_err().is_not_found());
    }

    #[test]
    fn test_combat_mode_sets_both_flags() {
        let mut fixture = HostFixture::new();
        let record = fixture.character(1, "Beep", true);
        let bridge = fixture.bridge();

        bridge.set_combat_mode(1, true).unwrap();
        assert!(bridge.get_character(1).unwrap().is_in_combat);
        let controller = fixture.image().read_u64(record + character::AI).unwrap();
        assert!(fixture.image().read_bool(controller + ai::IS_IN_COMBAT).unwrap());

        bridge.set_combat_mode(1, false).unwrap();
        assert!(!bridge.get_character(1).unwrap().is_in_combat);
    }

    #[test]
    fn test_spawn_needs_native() {
        let mut fixture = HostFixture::new();
        let record = fixture.character(12, "Spawned", false);
        let position = Vec3::new(1.0, 2.0, 3.0);

        let bridge = fixture.bridge();
        assert!(matches!(
            bridge.spawn_character(4, position),
            Err(Error::Unresolved("SpawnCharacter"))
        ));

        let calls = Arc::new(
            RecordingCalls::new()
                .on(NativeFunction::SpawnCharacter, move |_| Ok(record))
                .on(NativeFunction::DespawnCharacter, |_| Ok(0)),
        );
        let bridge = fixture.bridge_with(calls.clone());
        assert_eq!(bridge.spawn_character(4, position).unwrap(), 12);
        assert_eq!(
            calls.calls()[0].2,
            vec![NativeArg::Int(4), NativeArg::Vec3(position)]
        );

        bridge.despawn_character(12).unwrap();
        assert_eq!(calls.calls()[1].2, vec![NativeArg::Ptr(record)]);
        assert!(bridge.despawn_character(99).unwrap_err().is_not_found());
    }

    #[test]
    fn test_faction_change_requires_faction() {
        let mut fixture = HostFixture::new();
        fixture.character(1, "Beep", true);
        fixture.faction(3, "Shek Kingdom", crate::bridge::FactionType::Major, 4);
        let bridge = fixture.bridge();

        bridge.set_character_faction(1, 3).unwrap();
        assert_eq!(bridge.get_character(1).unwrap().faction_id, 3);
        assert!(bridge.set_character_faction(1, 8).unwrap_err().is_not_found());
        assert_eq!(bridge.get_character(1).unwrap().faction_id, 3);
    }
}
