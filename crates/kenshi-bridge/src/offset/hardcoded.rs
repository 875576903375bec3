//! Compiled-in offsets for the last verified host build.
//!
//! Lowest-priority source. Also used to fill entries a pattern scan did not
//! produce.

use super::database::{DatabaseMetadata, OffsetDatabase};
use super::entry::OffsetSourceKind;
use super::tables::{FunctionOffsets, GlobalOffsets, StructureOffsets};
use crate::memory::layout;

/// Host build the compiled-in tables were taken from
pub const HARDCODED_GAME_VERSION: &str = "1.0.64";

pub fn global_offsets() -> GlobalOffsets {
    GlobalOffsets {
        world_instance: 0x24D_8F40,
        game_state: 0x24D_8F48,
        game_time: 0x24D_8F50,
        game_day: 0x24D_8F58,
        player_squad_list: 0x24C_5A20,
        player_squad_count: 0x24C_5A28,
        all_characters_list: 0x24C_5B00,
        all_characters_count: 0x24C_5B08,
        selected_character: 0x24C_5A30,
        faction_list: 0x24D_2100,
        faction_count: 0x24D_2108,
        player_faction: 0x24D_2110,
        building_list: 0x24E_1000,
        building_count: 0x24E_1008,
        weather_system: 0x24E_7000,
        physics_world: 0x24F_0000,
        camera: 0x24E_7C20,
        input_handler: 0x24F_2D80,
        ..Default::default()
    }
}

pub fn function_offsets() -> FunctionOffsets {
    FunctionOffsets {
        spawn_character: 0x8B_3C80,
        despawn_character: 0x8B_4120,
        add_to_squad: 0x8B_4500,
        remove_from_squad: 0x8B_4600,
        add_item_to_inventory: 0x9C_2100,
        remove_item_from_inventory: 0x9C_2200,
        set_character_state: 0x8C_1000,
        issue_command: 0x8D_5000,
        set_faction_relation: 0x7A_2500,
        pathfind_request: 0x7B_1000,
        combat_attack: 0x8E_2000,
        ..Default::default()
    }
}

pub fn structure_offsets() -> StructureOffsets {
    use layout::{character, faction, item, squad};

    StructureOffsets {
        character_position: character::POSITION as i32,
        character_rotation: character::ROTATION as i32,
        character_health: character::HEALTH as i32,
        character_max_health: character::MAX_HEALTH as i32,
        character_blood: character::BLOOD as i32,
        character_hunger: character::HUNGER as i32,
        character_inventory: character::INVENTORY as i32,
        character_equipment: character::EQUIPMENT as i32,
        character_ai: character::AI as i32,
        character_state: character::STATE as i32,
        character_faction: character::FACTION_ID as i32,
        character_squad: character::SQUAD as i32,
        character_anim_state: character::ANIM_STATE as i32,
        character_body: character::BODY as i32,
        squad_members: squad::MEMBERS as i32,
        squad_member_count: squad::MEMBER_COUNT as i32,
        squad_leader: squad::LEADER as i32,
        squad_faction_id: squad::FACTION_ID as i32,
        faction_relations: faction::RELATIONS as i32,
        faction_members: faction::MEMBERS as i32,
        faction_leader: faction::LEADER as i32,
        item_name: item::NAME as i32,
        item_category: item::CATEGORY as i32,
        item_value: item::VALUE as i32,
        item_weight: item::WEIGHT as i32,
        item_stack_count: item::STACK_COUNT as i32,
    }
}

pub fn hardcoded_database() -> OffsetDatabase {
    OffsetDatabase::new(
        OffsetSourceKind::Hardcoded,
        DatabaseMetadata::new(HARDCODED_GAME_VERSION),
        global_offsets(),
        function_offsets(),
        structure_offsets(),
    )
}
