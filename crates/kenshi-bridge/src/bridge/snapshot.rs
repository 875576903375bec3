//! Snapshot records copied out of host memory.
//!
//! A snapshot owns nothing in the host and is stale the moment it is taken.
//! Every record carries the bridge tick it was produced on.

use serde::{Deserialize, Serialize};

use super::enums::{
    AiState, AnimationType, BuildingType, ConstructionState, DamageType, EquipSlot, FactionType,
    FormationType, ItemCategory, ItemGrade, LimbType, SquadOrder, WeaponType, WeatherType,
};
use crate::geometry::{Quat, Vec3};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Limb {
    pub kind: LimbType,
    pub health: f32,
    pub max_health: f32,
    pub bleeding: bool,
    pub missing: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CharacterState {
    pub id: u32,
    pub name: String,

    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,

    pub health: f32,
    pub max_health: f32,
    pub blood: f32,
    pub hunger: f32,
    pub thirst: f32,
    /// Indexed by [`LimbType`]; empty when the character has no body system
    pub limbs: Vec<Limb>,

    pub state: AiState,
    pub animation: AnimationType,
    pub is_unconscious: bool,
    pub is_dead: bool,
    pub is_in_combat: bool,
    pub is_sneaking: bool,
    pub is_player_controlled: bool,

    /// Template id per [`EquipSlot`], 0 for an empty slot
    pub equipped: [u32; EquipSlot::COUNT],

    pub faction_id: i32,
    pub squad_id: u32,
    pub combat_target_id: u32,
    pub attack_cooldown: f32,

    pub game_time: f32,
    pub sync_tick: u64,
}

impl CharacterState {
    pub fn limb(&self, kind: LimbType) -> Option<&Limb> {
        self.limbs.get(kind.index())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SquadState {
    pub id: u32,
    pub name: String,
    pub faction_id: i32,
    pub leader_id: u32,
    pub order: SquadOrder,
    pub formation: FormationType,
    pub order_target: Vec3,
    /// Host member count; `member_ids` holds at most 32 of them
    pub member_count: i32,
    pub member_ids: Vec<u32>,
    pub is_in_combat: bool,
    pub is_player_squad: bool,
    pub is_moving: bool,
    pub sync_tick: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FactionState {
    pub id: i32,
    pub name: String,
    pub kind: FactionType,
    pub leader_id: u32,
    pub member_count: i32,
    pub wealth: i32,
    pub is_player_faction: bool,
    /// Relation towards each faction id, in [-100, 100]
    pub relations: Vec<i32>,
    pub sync_tick: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorldState {
    pub game_time: f32,
    pub game_day: i32,
    pub game_year: i32,
    pub time_scale: f32,

    pub weather: WeatherType,
    pub weather_intensity: f32,
    pub temperature: f32,
    pub wind_speed: f32,
    pub wind_direction: Vec3,

    pub player_money: i32,
    pub player_faction_id: i32,
    pub player_character_count: i32,
    pub total_npc_count: i32,
    pub total_building_count: i32,
    pub is_paused: bool,
    pub sync_tick: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BuildingState {
    pub id: u32,
    pub name: String,
    pub kind: BuildingType,
    pub state: ConstructionState,
    pub position: Vec3,
    pub rotation: Quat,
    pub health: f32,
    pub max_health: f32,
    /// Construction progress in [0, 1]
    pub progress: f32,
    pub owner_faction_id: i32,
    pub is_player_owned: bool,
    pub sync_tick: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AnimationState {
    pub current: AnimationType,
    pub time: f32,
    pub speed: f32,
    pub blend_weight: f32,
    pub is_playing: bool,
    pub is_looping: bool,
    pub is_blending: bool,
    pub can_cancel: bool,
}

/// Category-specific item data, decoded only after checking the category tag
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemDetails {
    Weapon {
        weapon_type: WeaponType,
        damage_type: DamageType,
        base_damage: f32,
        attack_speed: f32,
        reach: f32,
        two_handed: bool,
    },
    Armor {
        cut_resist: f32,
        blunt_resist: f32,
        pierce_resist: f32,
        coverage_mask: u32,
    },
    Food {
        nutrition: f32,
        hydration: f32,
        freshness: f32,
    },
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemInfo {
    pub id: u32,
    pub template_id: u32,
    pub name: String,
    pub category: ItemCategory,
    pub grade: ItemGrade,
    pub condition: f32,
    pub weight: f32,
    pub value: i32,
    pub stack_count: i32,
    pub slot_index: i32,
    pub details: ItemDetails,
}

impl ItemInfo {
    /// Armor resistance against one damage type, 0 for non-armor items
    pub fn resistance(&self, damage: DamageType) -> f32 {
        match (self.details, damage) {
            (ItemDetails::Armor { cut_resist, .. }, DamageType::Cut) => cut_resist,
            (ItemDetails::Armor { blunt_resist, .. }, DamageType::Blunt) => blunt_resist,
            (ItemDetails::Armor { pierce_resist, .. }, DamageType::Pierce) => pierce_resist,
            _ => 0.0,
        }
    }
}
