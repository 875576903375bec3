use tracing::{info, warn};

use super::{
    BuildingState, BuildingType, ConstructionState, StateBridge, WeatherType, WorldState, bounded,
    vanished,
};
use crate::error::{EntityKind, Error, Result};
use crate::geometry::Vec3;
use crate::memory::layout::{building, cell, limits, weather, world};
use crate::memory::{AccessResult, ReadMemory, WriteMemory};

pub const HOURS_PER_DAY: f32 = 24.0;

/// Cell containing a world position, quantised on the ground plane (x, z)
pub fn world_to_cell(position: Vec3) -> (i32, i32) {
    (
        (position.x / cell::SIZE).floor() as i32,
        (position.z / cell::SIZE).floor() as i32,
    )
}

/// Centre of a cell at ground level
pub fn cell_to_world(cell_x: i32, cell_y: i32) -> Vec3 {
    let half = cell::SIZE / 2.0;
    Vec3::new(
        cell_x as f32 * cell::SIZE + half,
        0.0,
        cell_y as f32 * cell::SIZE + half,
    )
}

/// Time of day wrapped into [0, 24); non-finite input becomes midnight
fn wrap_hours(hours: f32) -> f32 {
    if hours.is_finite() {
        hours.rem_euclid(HOURS_PER_DAY)
    } else {
        0.0
    }
}

impl StateBridge {
    pub fn get_world_state(&self) -> Result<WorldState> {
        let state = self.lock();
        let record = self.require_world()?;
        let roster = self.roster_records().len() as i32;
        self.read_world(record, roster, state.tick)
            .map_err(|e| vanished(EntityKind::World, "instance", e))
    }

    /// Set the time of day, wrapped into [0, 24) hours; returns the applied value
    pub fn set_game_time(&self, hours: f32) -> Result<f32> {
        let _state = self.lock();
        let record = self.require_world()?;
        let hours = wrap_hours(hours);
        self.memory
            .write_f32(record + world::GAME_TIME, hours)
            .map_err(|e| vanished(EntityKind::World, "instance", e))?;
        Ok(hours)
    }

    /// Change the weather; intensity is clamped to [0, 1]
    pub fn set_weather(&self, kind: WeatherType, intensity: f32) -> Result<()> {
        let _state = self.lock();
        let record = self.require_world()?;
        let system = self
            .memory
            .read_ptr(record + world::WEATHER)
            .map_err(|e| vanished(EntityKind::World, "weather", e))?
            .ok_or_else(|| Error::not_found(EntityKind::World, "weather"))?;

        let write = || -> AccessResult<()> {
            self.memory.write_i32(system + weather::CURRENT, kind.into())?;
            self.memory
                .write_f32(system + weather::INTENSITY, bounded(intensity, 0.0, 1.0))
        };
        write().map_err(|e| vanished(EntityKind::World, "weather", e))?;
        info!("Weather set to {}", kind);
        Ok(())
    }

    /// Write the clock, pause flag and weather of a world snapshot.
    ///
    /// Counters, money and the player faction are host-derived and left
    /// alone. Weather is skipped when the host has no weather system.
    pub fn set_world_state(&self, state: &WorldState) -> Result<()> {
        let _state = self.lock();
        let record = self.require_world()?;
        let m = &self.memory;
        let write_clock = || -> AccessResult<()> {
            m.write_f32(record + world::GAME_TIME, wrap_hours(state.game_time))?;
            m.write_i32(record + world::GAME_DAY, state.game_day.max(0))?;
            m.write_i32(record + world::GAME_YEAR, state.game_year.max(0))?;
            m.write_f32(record + world::TIME_SCALE, bounded(state.time_scale, 0.0, f32::MAX))?;
            m.write_bool(record + world::IS_PAUSED, state.is_paused)
        };
        write_clock().map_err(|e| vanished(EntityKind::World, "instance", e))?;

        let write_weather = || -> AccessResult<()> {
            let Some(system) = m.read_ptr(record + world::WEATHER)? else {
                return Ok(());
            };
            m.write_i32(system + weather::CURRENT, state.weather.into())?;
            m.write_f32(system + weather::INTENSITY, bounded(state.weather_intensity, 0.0, 1.0))?;
            m.write_f32(system + weather::TEMPERATURE, state.temperature)?;
            m.write_f32(system + weather::WIND_SPEED, bounded(state.wind_speed, 0.0, f32::MAX))?;
            m.write_vec3(system + weather::WIND_DIRECTION, state.wind_direction)
        };
        write_weather().map_err(|e| vanished(EntityKind::World, "weather", e))?;
        info!("Wrote world state (day {}, {:.2}h)", state.game_day, state.game_time);
        Ok(())
    }

    pub fn get_all_buildings(&self) -> Vec<BuildingState> {
        let state = self.lock();
        self.building_records()
            .into_iter()
            .filter_map(|record| match self.read_building(record, state.tick) {
                Ok(building) => Some(building),
                Err(e) => {
                    warn!("Skipping building at {:#x}: {}", record, e);
                    None
                }
            })
            .collect()
    }

    pub fn get_player_buildings(&self) -> Vec<BuildingState> {
        self.get_all_buildings()
            .into_iter()
            .filter(|b| b.is_player_owned)
            .collect()
    }

    pub fn get_building(&self, id: u32) -> Result<BuildingState> {
        let state = self.lock();
        let record = self.require_building(id)?;
        self.read_building(record, state.tick)
            .map_err(|e| vanished(EntityKind::Building, id, e))
    }

    /// Set construction state and progress; progress is clamped to [0, 1]
    pub fn set_building_state(&self, id: u32, construction: ConstructionState, progress: f32) -> Result<()> {
        let _state = self.lock();
        let record = self.require_building(id)?;
        let write = || -> AccessResult<()> {
            self.memory.write_i32(record + building::STATE, construction.into())?;
            self.memory
                .write_f32(record + building::PROGRESS, bounded(progress, 0.0, 1.0))
        };
        write().map_err(|e| vanished(EntityKind::Building, id, e))
    }

    fn require_world(&self) -> Result<u64> {
        self.world()
            .ok_or_else(|| Error::not_found(EntityKind::World, "instance"))
    }

    fn building_records(&self) -> Vec<u64> {
        match self.world() {
            Some(w) => self.walk_list(
                w + world::BUILDINGS,
                w + world::BUILDING_COUNT,
                limits::BUILDINGS,
                "building",
            ),
            None => Vec::new(),
        }
    }

    fn require_building(&self, id: u32) -> Result<u64> {
        self.building_records()
            .into_iter()
            .find(|record| self.memory.read_u32(record + building::ID).is_ok_and(|v| v == id))
            .ok_or_else(|| Error::not_found(EntityKind::Building, id))
    }

    fn read_world(&self, record: u64, roster: i32, tick: u64) -> AccessResult<WorldState> {
        let m = &self.memory;
        let mut state = WorldState {
            game_time: m.read_f32(record + world::GAME_TIME)?,
            game_day: m.read_i32(record + world::GAME_DAY)?,
            game_year: m.read_i32(record + world::GAME_YEAR)?,
            time_scale: m.read_f32(record + world::TIME_SCALE)?,
            player_money: m.read_i32(record + world::PLAYER_MONEY)?,
            player_faction_id: m.read_i32(record + world::PLAYER_FACTION)?,
            player_character_count: roster,
            total_npc_count: m.read_i32(record + world::CHARACTER_COUNT)?,
            total_building_count: m.read_i32(record + world::BUILDING_COUNT)?,
            is_paused: m.read_bool(record + world::IS_PAUSED)?,
            sync_tick: tick,
            ..Default::default()
        };

        if let Some(system) = m.read_ptr(record + world::WEATHER)? {
            state.weather = WeatherType::from_raw(m.read_i32(system + weather::CURRENT)?);
            state.weather_intensity = m.read_f32(system + weather::INTENSITY)?;
            state.temperature = m.read_f32(system + weather::TEMPERATURE)?;
            state.wind_speed = m.read_f32(system + weather::WIND_SPEED)?;
            state.wind_direction = m.read_vec3(system + weather::WIND_DIRECTION)?;
        }
        Ok(state)
    }

    fn read_building(&self, record: u64, tick: u64) -> AccessResult<BuildingState> {
        let m = &self.memory;
        Ok(BuildingState {
            id: m.read_u32(record + building::ID)?,
            name: m.read_string(record + building::NAME)?,
            kind: BuildingType::from_raw(m.read_i32(record + building::KIND)?),
            state: ConstructionState::from_raw(m.read_i32(record + building::STATE)?),
            position: m.read_vec3(record + building::POSITION)?,
            rotation: m.read_quat(record + building::ROTATION)?,
            health: m.read_f32(record + building::HEALTH)?,
            max_health: m.read_f32(record + building::MAX_HEALTH)?,
            progress: m.read_f32(record + building::PROGRESS)?,
            owner_faction_id: m.read_i32(record + building::OWNER_FACTION_ID)?,
            is_player_owned: m.read_bool(record + building::IS_PLAYER_OWNED)?,
            sync_tick: tick,
        })
    }
}
