use tracing::{info, warn};

use super::fields::FactionFields;
use super::{ApplyPath, FactionState, FactionType, NativeArg, NativeFunction, StateBridge, vanished};
use crate::error::{EntityKind, Error, Result};
use crate::memory::layout::{faction, limits};
use crate::memory::{AccessResult, ReadMemory, WriteMemory};

/// Relation values run from sworn enemies to allies
pub const RELATION_MIN: i32 = -100;
pub const RELATION_MAX: i32 = 100;

impl StateBridge {
    pub fn get_all_factions(&self) -> Vec<FactionState> {
        let state = self.lock();
        let fields = self.fields().faction;
        self.faction_records()
            .into_iter()
            .filter_map(|record| match self.read_faction(record, &fields, state.tick) {
                Ok(faction) => Some(faction),
                Err(e) => {
                    warn!("Skipping faction at {:#x}: {}", record, e);
                    None
                }
            })
            .collect()
    }

    pub fn get_faction(&self, id: i32) -> Result<FactionState> {
        let state = self.lock();
        let fields = self.fields().faction;
        let record = self.require_faction(id)?;
        self.read_faction(record, &fields, state.tick)
            .map_err(|e| vanished(EntityKind::Faction, id, e))
    }

    pub fn get_player_faction(&self) -> Result<FactionState> {
        let state = self.lock();
        let fields = self.fields().faction;
        let global = self.resolver.global("Factions.PlayerFaction");
        let record = (global != 0)
            .then(|| self.memory.read_ptr(global).ok().flatten())
            .flatten()
            .ok_or_else(|| Error::not_found(EntityKind::Faction, "player"))?;
        self.read_faction(record, &fields, state.tick)
            .map_err(|e| vanished(EntityKind::Faction, "player", e))
    }

    /// Relation of `from` towards `to`; factions outside the relation row are neutral
    pub fn get_relation(&self, from: i32, to: i32) -> Result<i32> {
        let _state = self.lock();
        let fields = self.fields().faction;
        let record = self.require_faction(from)?;
        let read = || -> AccessResult<i32> {
            match self.relation_slot(record, &fields, to)? {
                Some(slot) => self.memory.read_i32(slot),
                None => Ok(0),
            }
        };
        read().map_err(|e| vanished(EntityKind::Faction, from, e))
    }

    /// Set the relation of `from` towards `to`, clamped to [-100, 100].
    ///
    /// The host's relation function is preferred; otherwise the relation row
    /// is written directly.
    pub fn set_relation(&self, from: i32, to: i32, value: i32) -> Result<ApplyPath> {
        let _state = self.lock();
        let fields = self.fields().faction;
        let record = self.require_faction(from)?;
        let value = value.clamp(RELATION_MIN, RELATION_MAX);

        let args = [
            NativeArg::Ptr(record),
            NativeArg::Int(to as i64),
            NativeArg::Int(value as i64),
        ];
        if self.call_native(NativeFunction::SetFactionRelation, &args).is_some() {
            return Ok(ApplyPath::Native);
        }

        let slot = self
            .relation_slot(record, &fields, to)
            .map_err(|e| vanished(EntityKind::Faction, from, e))?
            .ok_or_else(|| Error::not_found(EntityKind::Faction, to))?;
        self.memory
            .write_i32(slot, value)
            .map_err(|e| vanished(EntityKind::Faction, from, e))?;
        info!("Faction {} relation towards {} set to {}", from, to, value);
        Ok(ApplyPath::Direct)
    }

    /// Write the kind, wealth and relation row of a faction snapshot.
    ///
    /// Relations are written directly and clamped; entries past the host row
    /// are ignored and a shorter snapshot leaves the rest of the row alone.
    pub fn set_faction(&self, state: &FactionState) -> Result<()> {
        let _state = self.lock();
        let fields = self.fields().faction;
        let record = self.require_faction(state.id)?;
        let write = || -> AccessResult<()> {
            let m = &self.memory;
            m.write_i32(record + faction::KIND, state.kind.into())?;
            m.write_i32(record + faction::WEALTH, state.wealth)?;
            for (to, value) in state.relations.iter().enumerate() {
                let Some(slot) = self.relation_slot(record, &fields, to as i32)? else {
                    break;
                };
                m.write_i32(slot, (*value).clamp(RELATION_MIN, RELATION_MAX))?;
            }
            Ok(())
        };
        write().map_err(|e| vanished(EntityKind::Faction, state.id, e))?;
        info!("Wrote faction {}", state.id);
        Ok(())
    }

    fn faction_records(&self) -> Vec<u64> {
        self.walk_list(
            self.resolver.global("Factions.FactionList"),
            self.resolver.global("Factions.FactionCount"),
            limits::FACTIONS,
            "faction",
        )
    }

    pub(super) fn require_faction(&self, id: i32) -> Result<u64> {
        self.faction_records()
            .into_iter()
            .find(|record| self.memory.read_i32(record + faction::ID).is_ok_and(|v| v == id))
            .ok_or_else(|| Error::not_found(EntityKind::Faction, id))
    }

    /// Address of the relation towards `to`, `None` when outside the row
    fn relation_slot(&self, record: u64, fields: &FactionFields, to: i32) -> AccessResult<Option<u64>> {
        let count = self
            .memory
            .read_i32(record + faction::RELATION_COUNT)?
            .min(limits::FACTIONS);
        if to < 0 || to >= count {
            return Ok(None);
        }
        Ok(self
            .memory
            .read_ptr(record + fields.relations)?
            .map(|row| row + to as u64 * 4))
    }

    fn read_faction(&self, record: u64, fields: &FactionFields, tick: u64) -> AccessResult<FactionState> {
        let m = &self.memory;
        let count = m.read_i32(record + faction::RELATION_COUNT)?.clamp(0, limits::FACTIONS);
        let relations = match m.read_ptr(record + fields.relations)? {
            Some(row) => (0..count as u64)
                .map(|i| m.read_i32(row + i * 4))
                .collect::<AccessResult<Vec<i32>>>()?,
            None => Vec::new(),
        };

        Ok(FactionState {
            id: m.read_i32(record + faction::ID)?,
            name: m.read_string(record + faction::NAME)?,
            kind: FactionType::from_raw(m.read_i32(record + faction::KIND)?),
            leader_id: self.linked_id(record + fields.leader),
            member_count: m.read_i32(record + faction::MEMBER_COUNT)?,
            wealth: m.read_i32(record + faction::WEALTH)?,
            is_player_faction: m.read_bool(record + faction::IS_PLAYER_FACTION)?,
            relations,
            sync_tick: tick,
        })
    }
}
