//! Record field displacements for one bridge operation.
//!
//! Fields covered by the resolved structure table use the resolved value;
//! a missing or zero entry falls back to the compiled-in layout.

use crate::memory::layout::{character, faction, item, squad};
use crate::offset::OffsetDatabase;

#[derive(Debug, Clone, Copy)]
pub(crate) struct CharacterFields {
    pub position: u64,
    pub rotation: u64,
    pub health: u64,
    pub max_health: u64,
    pub blood: u64,
    pub hunger: u64,
    pub inventory: u64,
    pub equipment: u64,
    pub ai: u64,
    pub state: u64,
    pub faction: u64,
    pub squad: u64,
    pub anim_state: u64,
    pub body: u64,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SquadFields {
    pub members: u64,
    pub member_count: u64,
    pub leader: u64,
    pub faction_id: u64,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct FactionFields {
    pub relations: u64,
    pub members: u64,
    pub leader: u64,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ItemFields {
    pub name: u64,
    pub category: u64,
    pub value: u64,
    pub weight: u64,
    pub stack_count: u64,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Fields {
    pub character: CharacterFields,
    pub squad: SquadFields,
    pub faction: FactionFields,
    pub item: ItemFields,
}

impl Fields {
    pub fn resolve(database: Option<&OffsetDatabase>) -> Self {
        let pick = |key: &str, default: u64| -> u64 {
            database
                .and_then(|db| db.structures.get(key))
                .filter(|v| *v > 0)
                .map_or(default, |v| v as u64)
        };

        Self {
            character: CharacterFields {
                position: pick("Character.Position", character::POSITION),
                rotation: pick("Character.Rotation", character::ROTATION),
                health: pick("Character.Health", character::HEALTH),
                max_health: pick("Character.MaxHealth", character::MAX_HEALTH),
                blood: pick("Character.Blood", character::BLOOD),
                hunger: pick("Character.Hunger", character::HUNGER),
                inventory: pick("Character.Inventory", character::INVENTORY),
                equipment: pick("Character.Equipment", character::EQUIPMENT),
                ai: pick("Character.AI", character::AI),
                state: pick("Character.State", character::STATE),
                faction: pick("Character.Faction", character::FACTION_ID),
                squad: pick("Character.Squad", character::SQUAD),
                anim_state: pick("Character.AnimState", character::ANIM_STATE),
                body: pick("Character.Body", character::BODY),
            },
            squad: SquadFields {
                members: pick("Squad.Members", squad::MEMBERS),
                member_count: pick("Squad.MemberCount", squad::MEMBER_COUNT),
                leader: pick("Squad.Leader", squad::LEADER),
                faction_id: pick("Squad.FactionId", squad::FACTION_ID),
            },
            faction: FactionFields {
                relations: pick("Faction.Relations", faction::RELATIONS),
                members: pick("Faction.Members", faction::MEMBERS),
                leader: pick("Faction.Leader", faction::LEADER),
            },
            item: ItemFields {
                name: pick("Item.Name", item::NAME),
                category: pick("Item.Category", item::CATEGORY),
                value: pick("Item.Value", item::VALUE),
                weight: pick("Item.Weight", item::WEIGHT),
                stack_count: pick("Item.StackCount", item::STACK_COUNT),
            },
        }
    }
}
