use tracing::{debug, info, warn};

use super::fields::SquadFields;
use super::{
    ApplyPath, FormationType, NativeArg, NativeFunction, SquadOrder, SquadState, StateBridge,
    vanished,
};
use crate::error::{EntityKind, Error, Result};
use crate::geometry::Vec3;
use crate::memory::layout::{character, limits, squad, world};
use crate::memory::{AccessResult, ReadMemory, WriteMemory};

impl StateBridge {
    pub fn get_all_squads(&self) -> Vec<SquadState> {
        let state = self.lock();
        let fields = self.fields().squad;
        self.squad_records()
            .into_iter()
            .filter_map(|record| match self.read_squad(record, &fields, state.tick) {
                Ok(squad) => Some(squad),
                Err(e) => {
                    warn!("Skipping squad at {:#x}: {}", record, e);
                    None
                }
            })
            .collect()
    }

    /// Squads controlled by the local player
    pub fn get_player_squads(&self) -> Vec<SquadState> {
        self.get_all_squads()
            .into_iter()
            .filter(|s| s.is_player_squad)
            .collect()
    }

    pub fn get_squad(&self, id: u32) -> Result<SquadState> {
        let state = self.lock();
        let fields = self.fields().squad;
        let record = self.require_squad(id)?;
        self.read_squad(record, &fields, state.tick)
            .map_err(|e| vanished(EntityKind::Squad, id, e))
    }

    /// The squad the player currently controls
    pub fn get_player_squad(&self) -> Result<SquadState> {
        let state = self.lock();
        let fields = self.fields().squad;
        let record = self
            .world()
            .and_then(|w| self.memory.read_ptr(w + world::PLAYER_SQUAD).ok().flatten())
            .ok_or_else(|| Error::not_found(EntityKind::Squad, "player"))?;
        self.read_squad(record, &fields, state.tick)
            .map_err(|e| vanished(EntityKind::Squad, "player", e))
    }

    /// Record a squad order and command every member.
    ///
    /// Returns `Direct` if any member had to be commanded through its record.
    pub fn issue_squad_order(&self, id: u32, order: SquadOrder, target: Vec3) -> Result<ApplyPath> {
        let _state = self.lock();
        let fields = self.fields();
        let record = self.require_squad(id)?;

        let write = || -> AccessResult<()> {
            self.memory.write_i32(record + squad::ORDER, order.into())?;
            self.memory.write_vec3(record + squad::ORDER_TARGET, target)?;
            self.memory
                .write_bool(record + squad::IS_MOVING, order == SquadOrder::Move)
        };
        write().map_err(|e| vanished(EntityKind::Squad, id, e))?;

        let mut path = ApplyPath::Native;
        for member in self.member_records(record, &fields.squad) {
            match self.command_record(member, &fields.character, order, target) {
                Ok(ApplyPath::Direct) => path = ApplyPath::Direct,
                Ok(ApplyPath::Native) => {}
                Err(e) => warn!("Squad {} member at {:#x} not commanded: {}", id, member, e),
            }
        }
        debug!("Squad {} ordered to {} ({})", id, order, path);
        Ok(path)
    }

    pub fn set_formation(&self, id: u32, formation: FormationType) -> Result<()> {
        let _state = self.lock();
        let record = self.require_squad(id)?;
        self.memory
            .write_i32(record + squad::FORMATION, formation.into())
            .map_err(|e| vanished(EntityKind::Squad, id, e))
    }

    /// Write the order, formation and flags of a squad snapshot.
    ///
    /// Membership and leadership change only through `add_to_squad` and
    /// `remove_from_squad`; members are not commanded.
    pub fn set_squad(&self, state: &SquadState) -> Result<()> {
        let _state = self.lock();
        let record = self.require_squad(state.id)?;
        let write = || -> AccessResult<()> {
            let m = &self.memory;
            m.write_i32(record + squad::ORDER, state.order.into())?;
            m.write_vec3(record + squad::ORDER_TARGET, state.order_target)?;
            m.write_i32(record + squad::FORMATION, state.formation.into())?;
            m.write_bool(record + squad::IS_IN_COMBAT, state.is_in_combat)?;
            m.write_bool(record + squad::IS_MOVING, state.is_moving)
        };
        write().map_err(|e| vanished(EntityKind::Squad, state.id, e))?;
        debug!("Wrote squad {}", state.id);
        Ok(())
    }

    /// Move a character into a squad through the host's own function
    pub fn add_to_squad(&self, character_id: u32, squad_id: u32) -> Result<()> {
        let _state = self.lock();
        let member = self.require_character(character_id)?;
        let record = self.require_squad(squad_id)?;

        let args = [NativeArg::Ptr(record), NativeArg::Ptr(member)];
        self.call_native(NativeFunction::AddToSquad, &args)
            .ok_or(Error::Unresolved(NativeFunction::AddToSquad.key()))?;
        info!("Added character {} to squad {}", character_id, squad_id);
        Ok(())
    }

    /// Take a character out of its squad, compacting the member array
    pub fn remove_from_squad(&self, character_id: u32) -> Result<()> {
        let _state = self.lock();
        let fields = self.fields();
        let member = self.require_character(character_id)?;

        let record = self
            .memory
            .read_ptr(member + fields.character.squad)
            .map_err(|e| vanished(EntityKind::Character, character_id, e))?
            .ok_or_else(|| Error::not_found(EntityKind::Squad, format!("of {}", character_id)))?;

        self.unlink_member(record, member, &fields.squad)
            .map_err(|e| vanished(EntityKind::Squad, format!("{:#x}", record), e))?;

        let clear = || -> AccessResult<()> {
            self.memory.write_u64(member + fields.character.squad, 0)?;
            self.memory.write_bool(member + character::SQUAD_LEADER, false)
        };
        clear().map_err(|e| vanished(EntityKind::Character, character_id, e))?;
        info!("Removed character {} from its squad", character_id);
        Ok(())
    }

    fn squad_records(&self) -> Vec<u64> {
        match self.world() {
            Some(w) => self.walk_list(
                w + world::SQUADS,
                w + world::SQUAD_COUNT,
                limits::SQUADS,
                "squad",
            ),
            None => Vec::new(),
        }
    }

    fn require_squad(&self, id: u32) -> Result<u64> {
        self.squad_records()
            .into_iter()
            .find(|record| self.memory.read_u32(record + squad::ID).is_ok_and(|v| v == id))
            .ok_or_else(|| Error::not_found(EntityKind::Squad, id))
    }

    fn member_records(&self, record: u64, fields: &SquadFields) -> Vec<u64> {
        self.walk_list(
            record + fields.members,
            record + fields.member_count,
            limits::PLAYER_SQUAD,
            "squad member",
        )
    }

    fn read_squad(&self, record: u64, fields: &SquadFields, tick: u64) -> AccessResult<SquadState> {
        let m = &self.memory;
        let member_ids = self
            .member_records(record, fields)
            .into_iter()
            .take(squad::MAX_SNAPSHOT_MEMBERS)
            .filter_map(|member| m.read_u32(member + character::ID).ok())
            .collect();

        Ok(SquadState {
            id: m.read_u32(record + squad::ID)?,
            name: m.read_string(record + squad::NAME)?,
            faction_id: m.read_i32(record + fields.faction_id)?,
            leader_id: self.linked_id(record + fields.leader),
            order: SquadOrder::from_raw(m.read_i32(record + squad::ORDER)?),
            formation: FormationType::from_raw(m.read_i32(record + squad::FORMATION)?),
            order_target: m.read_vec3(record + squad::ORDER_TARGET)?,
            member_count: m.read_i32(record + fields.member_count)?,
            member_ids,
            is_in_combat: m.read_bool(record + squad::IS_IN_COMBAT)?,
            is_player_squad: m.read_bool(record + squad::IS_PLAYER_SQUAD)?,
            is_moving: m.read_bool(record + squad::IS_MOVING)?,
            sync_tick: tick,
        })
    }

    fn unlink_member(&self, record: u64, member: u64, fields: &SquadFields) -> AccessResult<()> {
        let members = self.member_records(record, fields);
        let Some(array) = self.memory.read_ptr(record + fields.members)? else {
            return Ok(());
        };
        let remaining: Vec<u64> = members.into_iter().filter(|m| *m != member).collect();

        for (i, other) in remaining.iter().enumerate() {
            self.memory.write_u64(array + i as u64 * 8, *other)?;
        }
        self.memory
            .write_i32(record + fields.member_count, remaining.len() as i32)?;

        if self.memory.read_u64(record + fields.leader)? == member {
            let leader = remaining.first().copied().unwrap_or(0);
            self.memory.write_u64(record + fields.leader, leader)?;
        }
        Ok(())
    }
}
