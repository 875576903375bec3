//! Memory layout constants for the host's data structures
//!
//! Offsets are relative to the start of each record. A handful of character
//! fields can be overridden at runtime by the resolved structure-field table;
//! the rest are fixed for the supported host builds.

/// MSVC `std::string`: 16-byte inline buffer (or heap pointer), size, capacity
pub mod string {
    pub const SIZE: u64 = 0x20;
    /// Strings with capacity below this live in the inline buffer
    pub const INLINE_CAPACITY: u64 = 16;
    /// Longest name we are willing to copy out of the host
    pub const MAX_LEN: usize = 256;
}

/// Character record
pub mod character {
    pub const ID: u64 = 0x08;
    pub const TEMPLATE_ID: u64 = 0x0C;
    pub const NAME: u64 = 0x10;

    pub const POSITION: u64 = 0x70;
    pub const ROTATION: u64 = 0x7C;
    pub const VELOCITY: u64 = 0x8C;

    pub const BODY: u64 = 0xB8;
    pub const HEALTH: u64 = 0xC0;
    pub const MAX_HEALTH: u64 = 0xC4;
    pub const BLOOD: u64 = 0xC8;
    pub const HUNGER: u64 = 0xD0;
    pub const HUNGER_MAX: u64 = 0xD4;
    pub const THIRST: u64 = 0xDC;
    pub const THIRST_MAX: u64 = 0xE0;

    pub const INVENTORY: u64 = 0xF0;
    pub const EQUIPMENT: u64 = 0xF8;

    pub const AI: u64 = 0x110;
    pub const STATE: u64 = 0x118;
    pub const ANIM_STATE: u64 = 0x140;

    pub const FACTION_ID: u64 = 0x158;
    pub const SQUAD: u64 = 0x168;
    pub const SQUAD_LEADER: u64 = 0x170;

    pub const IS_PLAYER_CONTROLLED: u64 = 0x188;
    pub const IS_UNCONSCIOUS: u64 = 0x18A;
    pub const IS_DEAD: u64 = 0x18B;
    pub const IS_IN_COMBAT: u64 = 0x18D;
    pub const IS_SNEAKING: u64 = 0x18F;

    pub const COMBAT_TARGET: u64 = 0x198;
    pub const ATTACK_COOLDOWN: u64 = 0x1A8;

    pub const CELL_X: u64 = 0x1D8;
    pub const CELL_Y: u64 = 0x1DC;

    /// Size of the record, used to size test fixtures
    pub const SIZE: u64 = 0x208;
}

/// Body part (limb) record, seven of them packed at the start of the body system
pub mod body_part {
    pub const HEALTH: u64 = 0x04;
    pub const MAX_HEALTH: u64 = 0x08;
    pub const BLEED_RATE: u64 = 0x0C;
    pub const DAMAGE: u64 = 0x10;
    pub const IS_BLEEDING: u64 = 0x18;
    pub const IS_MISSING: u64 = 0x1C;
    pub const ARMOR: u64 = 0x20;

    pub const SIZE: u64 = 0x30;
}

/// Body system record
pub mod body {
    use super::body_part;

    pub const LIMB_COUNT: usize = 7;

    pub const BLOOD_LEVEL: u64 = body_part::SIZE * LIMB_COUNT as u64;
    pub const OVERALL_HEALTH: u64 = BLOOD_LEVEL + 0x0C;

    pub const SIZE: u64 = BLOOD_LEVEL + 0x14;

    pub fn limb(index: usize) -> u64 {
        body_part::SIZE * index as u64
    }
}

/// Item record, with the category-tagged detail block after the common fields
pub mod item {
    pub const ID: u64 = 0x08;
    pub const TEMPLATE_ID: u64 = 0x0C;
    pub const NAME: u64 = 0x10;
    pub const CATEGORY: u64 = 0x30;
    pub const GRADE: u64 = 0x34;
    pub const CONDITION: u64 = 0x38;
    pub const WEIGHT: u64 = 0x40;
    pub const VALUE: u64 = 0x44;
    pub const STACK_COUNT: u64 = 0x48;

    /// Start of the per-category detail block
    pub const DETAILS: u64 = 0x50;

    pub mod weapon {
        pub const WEAPON_TYPE: u64 = 0x00;
        pub const DAMAGE_TYPE: u64 = 0x04;
        pub const BASE_DAMAGE: u64 = 0x08;
        pub const ATTACK_SPEED: u64 = 0x14;
        pub const REACH: u64 = 0x20;
        pub const IS_TWO_HANDED: u64 = 0x28;
    }

    pub mod armor {
        pub const CUT_RESIST: u64 = 0x00;
        pub const BLUNT_RESIST: u64 = 0x04;
        pub const PIERCE_RESIST: u64 = 0x08;
        pub const COVERAGE_MASK: u64 = 0x0C;
    }

    pub mod food {
        pub const NUTRITION: u64 = 0x00;
        pub const HYDRATION: u64 = 0x04;
        pub const FRESHNESS: u64 = 0x0C;
    }

    pub const SIZE: u64 = 0x90;
}

/// Inventory container and its slot array
pub mod inventory {
    pub const SLOTS: u64 = 0x10;
    pub const SLOT_COUNT: u64 = 0x18;
    pub const MONEY: u64 = 0x2C;

    /// `{ item*, index, locked }`
    pub const SLOT_SIZE: u64 = 0x10;
    pub const SLOT_ITEM: u64 = 0x00;
    pub const SLOT_INDEX: u64 = 0x08;

    pub const SIZE: u64 = 0x30;
}

/// Equipment: one item pointer per slot
pub mod equipment {
    pub const SLOT_COUNT: usize = 7;
    pub const POINTER: u64 = 8;
}

/// AI controller record
pub mod ai {
    pub const STATE: u64 = 0x10;
    pub const MOVE_TARGET: u64 = 0x40;
    pub const IS_IN_COMBAT: u64 = 0x8D;

    pub const SIZE: u64 = 0xA8;
}

/// Animation state record
pub mod anim {
    pub const CURRENT: u64 = 0x10;
    pub const TIME: u64 = 0x18;
    pub const SPEED: u64 = 0x20;
    pub const BLEND_WEIGHT: u64 = 0x24;
    pub const IS_PLAYING: u64 = 0x58;
    pub const IS_LOOPING: u64 = 0x59;
    pub const IS_BLENDING: u64 = 0x5B;
    pub const CAN_CANCEL: u64 = 0x5C;

    pub const SIZE: u64 = 0x60;
}

/// Squad record
pub mod squad {
    pub const ID: u64 = 0x08;
    pub const NAME: u64 = 0x10;
    pub const MEMBERS: u64 = 0x30;
    pub const MEMBER_COUNT: u64 = 0x38;
    pub const LEADER: u64 = 0x40;
    pub const FACTION_ID: u64 = 0x48;
    pub const ORDER: u64 = 0x58;
    pub const ORDER_TARGET: u64 = 0x5C;
    pub const FORMATION: u64 = 0x78;
    pub const IS_IN_COMBAT: u64 = 0xA4;
    pub const IS_PLAYER_SQUAD: u64 = 0xA5;
    pub const IS_MOVING: u64 = 0xA6;

    /// Member ids copied into a snapshot
    pub const MAX_SNAPSHOT_MEMBERS: usize = 32;

    pub const SIZE: u64 = 0xA8;
}

/// Faction record
pub mod faction {
    pub const ID: u64 = 0x08;
    pub const NAME: u64 = 0x10;
    pub const KIND: u64 = 0x30;
    pub const RELATIONS: u64 = 0x38;
    pub const RELATION_COUNT: u64 = 0x40;
    pub const MEMBERS: u64 = 0x48;
    pub const MEMBER_COUNT: u64 = 0x50;
    pub const LEADER: u64 = 0x68;
    pub const WEALTH: u64 = 0x7C;
    pub const IS_PLAYER_FACTION: u64 = 0x84;

    pub const SIZE: u64 = 0x90;
}

/// Weather system record
pub mod weather {
    pub const CURRENT: u64 = 0x08;
    pub const INTENSITY: u64 = 0x14;
    pub const TEMPERATURE: u64 = 0x18;
    pub const WIND_SPEED: u64 = 0x1C;
    pub const WIND_DIRECTION: u64 = 0x20;

    pub const SIZE: u64 = 0x38;
}

/// Game world record, reached through the world-instance global
pub mod world {
    pub const GAME_TIME: u64 = 0x08;
    pub const GAME_DAY: u64 = 0x0C;
    pub const GAME_YEAR: u64 = 0x10;
    pub const TIME_SCALE: u64 = 0x14;
    pub const WEATHER: u64 = 0x20;
    pub const CHARACTER_COUNT: u64 = 0x30;
    pub const SQUADS: u64 = 0x38;
    pub const SQUAD_COUNT: u64 = 0x40;
    pub const BUILDINGS: u64 = 0x58;
    pub const BUILDING_COUNT: u64 = 0x60;
    pub const PLAYER_SQUAD: u64 = 0x78;
    pub const SELECTED: u64 = 0x80;
    pub const SELECTED_COUNT: u64 = 0x88;
    pub const PLAYER_FACTION: u64 = 0x90;
    pub const PLAYER_MONEY: u64 = 0x98;
    pub const IS_PAUSED: u64 = 0x100;

    pub const SIZE: u64 = 0x108;
}

/// Building record
pub mod building {
    pub const ID: u64 = 0x08;
    pub const NAME: u64 = 0x10;
    pub const KIND: u64 = 0x30;
    pub const STATE: u64 = 0x34;
    pub const POSITION: u64 = 0x38;
    pub const ROTATION: u64 = 0x44;
    pub const HEALTH: u64 = 0x48;
    pub const MAX_HEALTH: u64 = 0x4C;
    pub const PROGRESS: u64 = 0x50;
    pub const OWNER_FACTION_ID: u64 = 0x60;
    pub const IS_PLAYER_OWNED: u64 = 0x94;

    pub const SIZE: u64 = 0xB0;
}

/// Upper bounds applied to host-resident counters before walking a list
pub mod limits {
    pub const PLAYER_SQUAD: i32 = 100;
    pub const PLAYER_SQUADS: i32 = 100;
    pub const ALL_CHARACTERS: i32 = 10_000;
    pub const SQUADS: i32 = 1_000;
    pub const FACTIONS: i32 = 1_000;
    pub const BUILDINGS: i32 = 10_000;
    pub const INVENTORY_SLOTS: i32 = 512;
}

/// World-space quantisation
pub mod cell {
    pub const SIZE: f32 = 512.0;
}
