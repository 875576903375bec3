//! Host fixture for bridge tests: a sparse memory image laid out like a live
//! host, with globals at the compiled-in offsets and records on a fake heap.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{
    FactionType, ItemCategory, LimbType, NativeArg, NativeCalls, NativeFunction, StateBridge,
};
use crate::config::BridgeConfig;
use crate::geometry::Quat;
use crate::memory::layout::{
    ai, anim, body, body_part, building, character, equipment, faction, inventory, item, squad,
    weather, world,
};
use crate::memory::{
    AccessFault, AccessResult, FaultKind, HostHandle, MemoryImage, Protection, ReadMemory,
    WriteMemory,
};
use crate::offset::{OffsetResolver, function_offsets, global_offsets};

/// Module base of the fake host
pub const BASE: u64 = 0x1_4000_0000;
const HEAP: u64 = 0x20_0000_0000;
const LIST_CAPACITY: u64 = 64;
const INVENTORY_CAPACITY: u64 = 16;

pub struct HostFixture {
    image: Arc<MemoryImage>,
    next: u64,
    roster: u64,
    all: u64,
    factions: u64,
    squads: u64,
    buildings: u64,
    world: u64,
    weather: u64,
}

impl HostFixture {
    pub fn new() -> Self {
        let image = Arc::new(MemoryImage::new());
        let globals = global_offsets();
        // Three sparse windows cover every global the bridge dereferences
        image.map(BASE + 0x24C_5A00, vec![0; 0x200], Protection::ReadWrite);
        image.map(BASE + 0x24D_2100, vec![0; 0x20], Protection::ReadWrite);
        image.map(BASE + 0x24D_8F40, vec![0; 0x20], Protection::ReadWrite);

        let mut fixture = Self {
            image,
            next: HEAP,
            roster: 0,
            all: 0,
            factions: 0,
            squads: 0,
            buildings: 0,
            world: 0,
            weather: 0,
        };

        fixture.roster = fixture.alloc(LIST_CAPACITY * 8);
        fixture.all = fixture.alloc(LIST_CAPACITY * 8);
        fixture.factions = fixture.alloc(LIST_CAPACITY * 8);
        fixture.squads = fixture.alloc(LIST_CAPACITY * 8);
        fixture.buildings = fixture.alloc(LIST_CAPACITY * 8);
        fixture.world = fixture.alloc(world::SIZE);
        fixture.weather = fixture.alloc(weather::SIZE);

        let img = &fixture.image;
        img.write_u64(BASE + globals.player_squad_list, fixture.roster).unwrap();
        img.write_u64(BASE + globals.all_characters_list, fixture.all).unwrap();
        img.write_u64(BASE + globals.faction_list, fixture.factions).unwrap();
        img.write_u64(BASE + globals.world_instance, fixture.world).unwrap();

        let w = fixture.world;
        img.write_f32(w + world::GAME_TIME, 8.0).unwrap();
        img.write_i32(w + world::GAME_DAY, 12).unwrap();
        img.write_i32(w + world::GAME_YEAR, 3).unwrap();
        img.write_f32(w + world::TIME_SCALE, 1.0).unwrap();
        img.write_u64(w + world::WEATHER, fixture.weather).unwrap();
        img.write_u64(w + world::SQUADS, fixture.squads).unwrap();
        img.write_u64(w + world::BUILDINGS, fixture.buildings).unwrap();
        img.write_f32(fixture.weather + weather::TEMPERATURE, 31.0).unwrap();
        fixture
    }

    pub fn image(&self) -> &Arc<MemoryImage> {
        &self.image
    }

    pub fn world(&self) -> u64 {
        self.world
    }

    pub fn resolver(&self) -> Arc<OffsetResolver> {
        let config = BridgeConfig::builder()
            .prefer_remote(false)
            .allow_pattern_scan(false)
            .build();
        let resolver = OffsetResolver::new(config, HostHandle::new(BASE, 0x300_0000));
        resolver.initialize().unwrap();
        Arc::new(resolver)
    }

    pub fn bridge(&self) -> StateBridge {
        StateBridge::new(self.image.clone(), self.resolver())
    }

    pub fn bridge_with(&self, native: Arc<dyn NativeCalls>) -> StateBridge {
        self.bridge().with_native_calls(native)
    }

    /// Map a zeroed read-write record on the fake heap, with a gap after it
    pub fn alloc(&mut self, size: u64) -> u64 {
        let address = self.next;
        self.image.map(address, vec![0; size as usize], Protection::ReadWrite);
        self.next += size.div_ceil(0x1000) * 0x1000 + 0x1000;
        address
    }

    /// Unmap a record so every access to it faults
    pub fn free(&self, address: u64) {
        assert!(self.image.unmap(address));
    }

    /// Store an inline (short) host string
    pub fn write_name(&self, address: u64, name: &str) {
        assert!(name.len() < 16);
        self.image.write_unprotected(address, name.as_bytes()).unwrap();
        self.image.write_u64(address + 0x10, name.len() as u64).unwrap();
        self.image.write_u64(address + 0x18, 15).unwrap();
    }

    /// A healthy character with a full body, AI, animation, inventory and
    /// equipment; player characters also join the roster
    pub fn character(&mut self, id: u32, name: &str, player: bool) -> u64 {
        let record = self.alloc(character::SIZE);
        let body_record = self.alloc(body::SIZE);
        let ai_record = self.alloc(ai::SIZE);
        let anim_record = self.alloc(anim::SIZE);
        let inventory_record = self.alloc(inventory::SIZE);
        let slots = self.alloc(INVENTORY_CAPACITY * inventory::SLOT_SIZE);
        let equipment_record = self.alloc(equipment::POINTER + equipment::SLOT_COUNT as u64 * 8);

        let img = &self.image;
        img.write_u32(record + character::ID, id).unwrap();
        self.write_name(record + character::NAME, name);
        img.write_quat(record + character::ROTATION, Quat::IDENTITY).unwrap();
        img.write_f32(record + character::HEALTH, 100.0).unwrap();
        img.write_f32(record + character::MAX_HEALTH, 100.0).unwrap();
        img.write_f32(record + character::BLOOD, 100.0).unwrap();
        img.write_f32(record + character::HUNGER, 80.0).unwrap();
        img.write_f32(record + character::HUNGER_MAX, 100.0).unwrap();
        img.write_f32(record + character::THIRST, 80.0).unwrap();
        img.write_f32(record + character::THIRST_MAX, 100.0).unwrap();
        img.write_bool(record + character::IS_PLAYER_CONTROLLED, player).unwrap();

        for i in 0..LimbType::COUNT {
            let limb = body_record + body::limb(i);
            img.write_i32(limb, i as i32).unwrap();
            img.write_f32(limb + body_part::HEALTH, 100.0).unwrap();
            img.write_f32(limb + body_part::MAX_HEALTH, 100.0).unwrap();
        }
        img.write_f32(body_record + body::BLOOD_LEVEL, 100.0).unwrap();
        img.write_f32(body_record + body::OVERALL_HEALTH, 100.0).unwrap();

        img.write_f32(anim_record + anim::SPEED, 1.0).unwrap();
        img.write_bool(anim_record + anim::CAN_CANCEL, true).unwrap();
        img.write_u64(inventory_record + inventory::SLOTS, slots).unwrap();

        img.write_u64(record + character::BODY, body_record).unwrap();
        img.write_u64(record + character::AI, ai_record).unwrap();
        img.write_u64(record + character::ANIM_STATE, anim_record).unwrap();
        img.write_u64(record + character::INVENTORY, inventory_record).unwrap();
        img.write_u64(record + character::EQUIPMENT, equipment_record).unwrap();

        if player {
            self.push(global_offsets().player_squad_count + BASE, self.roster, record);
        }
        self.push(global_offsets().all_characters_count + BASE, self.all, record);
        record
    }

    pub fn squad(&mut self, id: u32, name: &str, members: &[u64], player: bool) -> u64 {
        let record = self.alloc(squad::SIZE);
        let array = self.alloc(LIST_CAPACITY * 8);
        let img = &self.image;
        img.write_u32(record + squad::ID, id).unwrap();
        self.write_name(record + squad::NAME, name);
        img.write_u64(record + squad::MEMBERS, array).unwrap();
        img.write_bool(record + squad::IS_PLAYER_SQUAD, player).unwrap();
        for member in members {
            self.push(record + squad::MEMBER_COUNT, array, *member);
            img.write_u64(member + character::SQUAD, record).unwrap();
        }
        if let Some(leader) = members.first() {
            img.write_u64(record + squad::LEADER, *leader).unwrap();
        }
        self.push(self.world + world::SQUAD_COUNT, self.squads, record);
        if player {
            img.write_u64(self.world + world::PLAYER_SQUAD, record).unwrap();
        }
        record
    }

    /// A faction with a zeroed relation row covering `relation_count` faction ids
    pub fn faction(&mut self, id: i32, name: &str, kind: FactionType, relation_count: i32) -> u64 {
        let record = self.alloc(faction::SIZE);
        let relations = self.alloc(relation_count.max(1) as u64 * 4);
        let img = &self.image;
        img.write_i32(record + faction::ID, id).unwrap();
        self.write_name(record + faction::NAME, name);
        img.write_i32(record + faction::KIND, kind.into()).unwrap();
        img.write_u64(record + faction::RELATIONS, relations).unwrap();
        img.write_i32(record + faction::RELATION_COUNT, relation_count).unwrap();
        img.write_bool(record + faction::IS_PLAYER_FACTION, kind == FactionType::Player)
            .unwrap();
        self.push(global_offsets().faction_count + BASE, self.factions, record);
        if kind == FactionType::Player {
            img.write_u64(BASE + global_offsets().player_faction, record).unwrap();
            img.write_i32(self.world + world::PLAYER_FACTION, id).unwrap();
        }
        record
    }

    pub fn building(&mut self, id: u32, name: &str, owner_faction: i32, player: bool) -> u64 {
        let record = self.alloc(building::SIZE);
        let img = &self.image;
        img.write_u32(record + building::ID, id).unwrap();
        self.write_name(record + building::NAME, name);
        img.write_quat(record + building::ROTATION, Quat::IDENTITY).unwrap();
        img.write_f32(record + building::HEALTH, 500.0).unwrap();
        img.write_f32(record + building::MAX_HEALTH, 500.0).unwrap();
        img.write_i32(record + building::OWNER_FACTION_ID, owner_faction).unwrap();
        img.write_bool(record + building::IS_PLAYER_OWNED, player).unwrap();
        self.push(self.world + world::BUILDING_COUNT, self.buildings, record);
        record
    }

    pub fn item(&mut self, id: u32, template_id: u32, category: ItemCategory, stack: i32) -> u64 {
        let record = self.alloc(item::SIZE);
        let img = &self.image;
        img.write_u32(record + item::ID, id).unwrap();
        img.write_u32(record + item::TEMPLATE_ID, template_id).unwrap();
        img.write_i32(record + item::CATEGORY, category.into()).unwrap();
        img.write_f32(record + item::CONDITION, 1.0).unwrap();
        img.write_f32(record + item::WEIGHT, 1.5).unwrap();
        img.write_i32(record + item::VALUE, 40).unwrap();
        img.write_i32(record + item::STACK_COUNT, stack).unwrap();
        record
    }

    pub fn armor(&mut self, id: u32, cut: f32, blunt: f32, pierce: f32) -> u64 {
        let record = self.item(id, id + 1000, ItemCategory::Armor, 1);
        let details = record + item::DETAILS;
        self.image.write_f32(details + item::armor::CUT_RESIST, cut).unwrap();
        self.image.write_f32(details + item::armor::BLUNT_RESIST, blunt).unwrap();
        self.image.write_f32(details + item::armor::PIERCE_RESIST, pierce).unwrap();
        record
    }

    /// Put an item in the next free inventory slot
    pub fn give(&self, character_record: u64, item_record: u64) {
        let img = &self.image;
        let inventory_record = img.read_u64(character_record + character::INVENTORY).unwrap();
        let slots = img.read_u64(inventory_record + inventory::SLOTS).unwrap();
        let count = img.read_i32(inventory_record + inventory::SLOT_COUNT).unwrap();
        let slot = slots + count as u64 * inventory::SLOT_SIZE;
        img.write_u64(slot + inventory::SLOT_ITEM, item_record).unwrap();
        img.write_i32(slot + inventory::SLOT_INDEX, count).unwrap();
        img.write_i32(inventory_record + inventory::SLOT_COUNT, count + 1).unwrap();
    }

    /// Cover one limb with an armor item
    pub fn wear(&self, character_record: u64, limb: LimbType, armor_record: u64) {
        let body_record = self.image.read_u64(character_record + character::BODY).unwrap();
        let part = body_record + body::limb(limb.index()) + body_part::ARMOR;
        self.image.write_u64(part, armor_record).unwrap();
    }

    pub fn select(&self, character_record: u64) {
        let global = BASE + global_offsets().selected_character;
        self.image.write_u64(global, character_record).unwrap();
    }

    pub fn set_all_characters_count(&self, count: i32) {
        let global = BASE + global_offsets().all_characters_count;
        self.image.write_i32(global, count).unwrap();
    }

    fn push(&self, count_field: u64, array: u64, element: u64) {
        let count = self.image.read_i32(count_field).unwrap();
        assert!((count as u64) < LIST_CAPACITY);
        self.image.write_u64(array + count as u64 * 8, element).unwrap();
        self.image.write_i32(count_field, count + 1).unwrap();
    }
}

type Handler = Box<dyn Fn(&[NativeArg]) -> AccessResult<u64> + Send + Sync>;

/// Native-call double: records every call and answers through per-function handlers.
/// Functions without a handler fault.
#[derive(Default)]
pub struct RecordingCalls {
    handlers: HashMap<NativeFunction, Handler>,
    calls: Mutex<Vec<(NativeFunction, u64, Vec<NativeArg>)>>,
}

impl RecordingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(mut self, function: NativeFunction, handler: F) -> Self
    where
        F: Fn(&[NativeArg]) -> AccessResult<u64> + Send + Sync + 'static,
    {
        self.handlers.insert(function, Box::new(handler));
        self
    }

    pub fn calls(&self) -> Vec<(NativeFunction, u64, Vec<NativeArg>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, function: NativeFunction) -> usize {
        self.calls.lock().unwrap().iter().filter(|(f, _, _)| *f == function).count()
    }
}

impl NativeCalls for RecordingCalls {
    fn call(&self, function: NativeFunction, address: u64, args: &[NativeArg]) -> AccessResult<u64> {
        self.calls.lock().unwrap().push((function, address, args.to_vec()));
        match self.handlers.get(&function) {
            Some(handler) => handler(args),
            None => Err(AccessFault::new(address, 0, FaultKind::Unmapped)),
        }
    }
}

/// Absolute address of a compiled-in function in the fixture host
pub fn function_address(function: NativeFunction) -> u64 {
    let offset = function_offsets().get(function.key()).unwrap_or(0);
    BASE + offset
}
