//! Fixed-order offset tables.
//!
//! Each table is a plain struct with one field per known name. The field
//! order is stable: it is the order entries are listed, exported and written
//! to the binary cache.

use serde::{Deserialize, Serialize};

use super::entry::OffsetCategory;

macro_rules! offset_table {
    (
        $(#[$meta:meta])*
        $table:ident: $ty:ty, $category:expr;
        $( $field:ident => $key:literal, $remote:literal; )+
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
        pub struct $table {
            $( pub $field: $ty, )+
        }

        impl $table {
            pub const CATEGORY: OffsetCategory = $category;

            /// Qualified names in declaration order
            pub const KEYS: &'static [&'static str] = &[$($key),+];

            /// Remote document keys, index-aligned with `KEYS`
            pub const REMOTE_KEYS: &'static [&'static str] = &[$($remote),+];

            /// Encoded size of one field
            pub const FIELD_SIZE: usize = std::mem::size_of::<$ty>();

            pub fn get(&self, key: &str) -> Option<$ty> {
                match key {
                    $( $key => Some(self.$field), )+
                    _ => None,
                }
            }

            /// Set a named field; returns false for an unknown name
            pub fn set(&mut self, key: &str, value: $ty) -> bool {
                match key {
                    $( $key => { self.$field = value; true } )+
                    _ => false,
                }
            }

            pub fn iter(&self) -> impl Iterator<Item = (&'static str, $ty)> + '_ {
                [$( ($key, self.$field) ),+].into_iter()
            }

            pub fn remote_key(key: &str) -> Option<&'static str> {
                Self::KEYS
                    .iter()
                    .position(|k| *k == key)
                    .map(|i| Self::REMOTE_KEYS[i])
            }

            pub fn encoded_len() -> usize {
                Self::KEYS.len() * Self::FIELD_SIZE
            }

            pub fn encode(&self, out: &mut Vec<u8>) {
                $( out.extend_from_slice(&self.$field.to_le_bytes()); )+
            }

            /// Decode from the front of `bytes`; returns None if too short
            pub fn decode(bytes: &[u8]) -> Option<Self> {
                if bytes.len() < Self::encoded_len() {
                    return None;
                }
                let mut chunks = bytes.chunks_exact(Self::FIELD_SIZE);
                let mut next = || -> Option<$ty> {
                    Some(<$ty>::from_le_bytes(chunks.next()?.try_into().ok()?))
                };
                Some(Self {
                    $( $field: next()?, )+
                })
            }
        }
    };
}

offset_table! {
    /// Module-relative addresses of global pointers
    GlobalOffsets: u64, OffsetCategory::Global;
    world_instance => "Game.WorldInstance", "worldInstance";
    game_state => "Game.GameState", "gameState";
    game_time => "Game.GameTime", "gameTime";
    game_day => "Game.GameDay", "gameDay";
    player_squad_list => "Characters.PlayerSquadList", "playerSquadList";
    player_squad_count => "Characters.PlayerSquadCount", "playerSquadCount";
    all_characters_list => "Characters.AllCharactersList", "allCharactersList";
    all_characters_count => "Characters.AllCharactersCount", "allCharactersCount";
    selected_character => "Characters.SelectedCharacter", "selectedCharacter";
    faction_list => "Factions.FactionList", "factionList";
    faction_count => "Factions.FactionCount", "factionCount";
    player_faction => "Factions.PlayerFaction", "playerFaction";
    relation_matrix => "Factions.RelationMatrix", "relationMatrix";
    building_list => "World.BuildingList", "buildingList";
    building_count => "World.BuildingCount", "buildingCount";
    world_items_list => "World.WorldItemsList", "worldItemsList";
    world_items_count => "World.WorldItemsCount", "worldItemsCount";
    weather_system => "World.WeatherSystem", "weatherSystem";
    physics_world => "Engine.PhysicsWorld", "physicsWorld";
    camera => "Engine.Camera", "camera";
    camera_target => "Engine.CameraTarget", "cameraTarget";
    renderer => "Engine.Renderer", "renderer";
    input_handler => "Input.InputHandler", "inputHandler";
    command_queue => "Input.CommandQueue", "commandQueue";
    selected_units => "Input.SelectedUnits", "selectedUnits";
    ui_state => "Input.UIState", "uiState";
}

offset_table! {
    /// Module-relative entry points of native functions
    FunctionOffsets: u64, OffsetCategory::Function;
    spawn_character => "SpawnCharacter", "spawnCharacter";
    despawn_character => "DespawnCharacter", "despawnCharacter";
    add_to_squad => "AddToSquad", "addToSquad";
    remove_from_squad => "RemoveFromSquad", "removeFromSquad";
    add_item_to_inventory => "AddItemToInventory", "addItemToInventory";
    remove_item_from_inventory => "RemoveItemFromInventory", "removeItemFromInventory";
    set_character_state => "SetCharacterState", "setCharacterState";
    issue_command => "IssueCommand", "issueCommand";
    create_faction => "CreateFaction", "createFaction";
    set_faction_relation => "SetFactionRelation", "setFactionRelation";
    pathfind_request => "PathfindRequest", "pathfindRequest";
    combat_attack => "CombatAttack", "combatAttack";
    character_update => "CharacterUpdate", "characterUpdate";
    ai_update => "AIUpdate", "aiUpdate";
}

offset_table! {
    /// Field displacements inside host records
    StructureOffsets: i32, OffsetCategory::StructureField;
    character_position => "Character.Position", "character.position";
    character_rotation => "Character.Rotation", "character.rotation";
    character_health => "Character.Health", "character.health";
    character_max_health => "Character.MaxHealth", "character.maxHealth";
    character_blood => "Character.Blood", "character.blood";
    character_hunger => "Character.Hunger", "character.hunger";
    character_inventory => "Character.Inventory", "character.inventory";
    character_equipment => "Character.Equipment", "character.equipment";
    character_ai => "Character.AI", "character.ai";
    character_state => "Character.State", "character.state";
    character_faction => "Character.Faction", "character.faction";
    character_squad => "Character.Squad", "character.squad";
    character_anim_state => "Character.AnimState", "character.animState";
    character_body => "Character.Body", "character.body";
    squad_members => "Squad.Members", "squad.members";
    squad_member_count => "Squad.MemberCount", "squad.memberCount";
    squad_leader => "Squad.Leader", "squad.leader";
    squad_faction_id => "Squad.FactionId", "squad.factionId";
    faction_relations => "Faction.Relations", "faction.relations";
    faction_members => "Faction.Members", "faction.members";
    faction_leader => "Faction.Leader", "faction.leader";
    item_name => "Item.Name", "item.name";
    item_category => "Item.Category", "item.category";
    item_value => "Item.Value", "item.value";
    item_weight => "Item.Weight", "item.weight";
    item_stack_count => "Item.StackCount", "item.stackCount";
}

impl GlobalOffsets {
    /// Globals at least one of which must resolve for a source to be accepted
    pub const CRITICAL: &'static [&'static str] = &[
        "Game.WorldInstance",
        "Characters.PlayerSquadList",
        "Characters.AllCharactersList",
    ];

    pub fn has_critical(&self) -> bool {
        Self::CRITICAL
            .iter()
            .any(|key| self.get(key).is_some_and(|v| v != 0))
    }
}
