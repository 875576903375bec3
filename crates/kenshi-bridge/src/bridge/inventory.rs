use std::collections::HashSet;

use tracing::{info, warn};

use super::fields::ItemFields;
use super::{
    DamageType, ItemCategory, ItemDetails, ItemGrade, ItemInfo, NativeArg, NativeFunction,
    StateBridge, WeaponType, returned_true, vanished,
};
use crate::error::{EntityKind, Error, Result};
use crate::events::InventoryEvent;
use crate::memory::layout::{inventory, item, limits};
use crate::memory::{AccessResult, ReadMemory, WriteMemory};

/// Inventory listings taken under one lock
#[derive(Debug, Default)]
pub struct InventoryPoll {
    pub listings: Vec<(u32, Vec<ItemInfo>)>,
    /// Characters whose inventory the bridge changed since the previous poll.
    /// Those changes were already reported when they were applied.
    pub applied: HashSet<u32>,
}

impl StateBridge {
    /// Items in a character's inventory, in slot order
    pub fn get_inventory(&self, id: u32) -> Result<Vec<ItemInfo>> {
        let _state = self.lock();
        let container = self.require_inventory(id)?;
        self.read_inventory(container)
            .map_err(|e| vanished(EntityKind::Character, id, e))
    }

    /// List several inventories and take the set of bridge-applied changes
    /// atomically, so no applied change falls between the two. Characters
    /// without a readable inventory are left out.
    pub fn poll_inventories(&self, ids: &[u32]) -> InventoryPoll {
        let mut state = self.lock();
        let listings = ids
            .iter()
            .filter_map(|&id| {
                let container = self.require_inventory(id).ok()?;
                self.read_inventory(container).ok().map(|items| (id, items))
            })
            .collect();
        InventoryPoll {
            listings,
            applied: std::mem::take(&mut state.applied_inventory),
        }
    }

    pub fn get_money(&self, id: u32) -> Result<i32> {
        let _state = self.lock();
        let container = self.require_inventory(id)?;
        self.memory
            .read_i32(container + inventory::MONEY)
            .map_err(|e| vanished(EntityKind::Character, id, e))
    }

    /// Set a character's money, never below zero; returns the applied amount
    pub fn set_money(&self, id: u32, amount: i32) -> Result<i32> {
        let _state = self.lock();
        let container = self.require_inventory(id)?;
        let amount = amount.max(0);
        self.memory
            .write_i32(container + inventory::MONEY, amount)
            .map_err(|e| vanished(EntityKind::Character, id, e))?;
        Ok(amount)
    }

    /// Add items through the host's own inventory function.
    ///
    /// Returns whether the host accepted them; accepted changes are reported to
    /// the inventory callback.
    pub fn add_item(&self, id: u32, template_id: u32, quantity: i32) -> Result<bool> {
        let event = {
            let mut state = self.lock();
            let container = self.require_inventory(id)?;
            let args = [
                NativeArg::Ptr(container),
                NativeArg::Int(template_id as i64),
                NativeArg::Int(quantity as i64),
            ];
            let value = self
                .call_native(NativeFunction::AddItemToInventory, &args)
                .ok_or(Error::Unresolved(NativeFunction::AddItemToInventory.key()))?;
            if !returned_true(value) {
                return Ok(false);
            }
            state.applied_inventory.insert(id);

            // The host picks the slot; find the stack it landed in
            let landed = self
                .read_inventory(container)
                .ok()
                .and_then(|items| items.into_iter().find(|i| i.template_id == template_id));
            InventoryEvent {
                character_id: id,
                item_id: landed.as_ref().map_or(0, |i| i.id),
                template_id,
                quantity_change: quantity,
                slot_index: landed.as_ref().map_or(-1, |i| i.slot_index),
                sync_tick: state.tick,
            }
        };

        info!("Added {} x{} to character {}", template_id, quantity, id);
        self.callbacks().emit_inventory(&event);
        Ok(true)
    }

    /// Remove items from a stack through the host's own inventory function
    pub fn remove_item(&self, id: u32, item_id: u32, quantity: i32) -> Result<bool> {
        let event = {
            let mut state = self.lock();
            let container = self.require_inventory(id)?;
            let stack = self
                .read_inventory(container)
                .map_err(|e| vanished(EntityKind::Character, id, e))?
                .into_iter()
                .find(|i| i.id == item_id)
                .ok_or_else(|| Error::not_found(EntityKind::Item, item_id))?;

            let args = [
                NativeArg::Ptr(container),
                NativeArg::Int(item_id as i64),
                NativeArg::Int(quantity as i64),
            ];
            let value = self
                .call_native(NativeFunction::RemoveItemFromInventory, &args)
                .ok_or(Error::Unresolved(NativeFunction::RemoveItemFromInventory.key()))?;
            if !returned_true(value) {
                return Ok(false);
            }
            state.applied_inventory.insert(id);
            InventoryEvent {
                character_id: id,
                item_id,
                template_id: stack.template_id,
                quantity_change: -quantity,
                slot_index: stack.slot_index,
                sync_tick: state.tick,
            }
        };

        info!("Removed item {} x{} from character {}", item_id, quantity, id);
        self.callbacks().emit_inventory(&event);
        Ok(true)
    }

    /// Move items between two characters: removed from `from`, then added to `to`.
    ///
    /// If the add is refused the items are given back to `from`.
    pub fn transfer_item(&self, from: u32, to: u32, item_id: u32, quantity: i32) -> Result<bool> {
        let template_id = self
            .get_inventory(from)?
            .into_iter()
            .find(|i| i.id == item_id)
            .map(|i| i.template_id)
            .ok_or_else(|| Error::not_found(EntityKind::Item, item_id))?;
        self.require_inventory_of(to)?;

        if !self.remove_item(from, item_id, quantity)? {
            return Ok(false);
        }
        match self.add_item(to, template_id, quantity) {
            Ok(true) => Ok(true),
            outcome => {
                warn!("Transfer of item {} to {} failed, returning it to {}", item_id, to, from);
                if !matches!(self.add_item(from, template_id, quantity), Ok(true)) {
                    warn!("Could not return item {} to character {}", item_id, from);
                }
                outcome
            }
        }
    }

    fn require_inventory_of(&self, id: u32) -> Result<u64> {
        let _state = self.lock();
        self.require_inventory(id)
    }

    fn require_inventory(&self, id: u32) -> Result<u64> {
        let fields = self.fields().character;
        let record = self.require_character(id)?;
        self.memory
            .read_ptr(record + fields.inventory)
            .map_err(|e| vanished(EntityKind::Character, id, e))?
            .ok_or_else(|| Error::not_found(EntityKind::Item, format!("inventory of {}", id)))
    }

    /// Occupied slots as (slot index, item record); faulting slots are skipped
    fn slots(&self, container: u64) -> AccessResult<Vec<(i32, u64)>> {
        let m = &self.memory;
        let count = m.read_i32(container + inventory::SLOT_COUNT)?;
        if count > limits::INVENTORY_SLOTS {
            warn!("Inventory slot count {} exceeds {}, ignoring", count, limits::INVENTORY_SLOTS);
            return Ok(Vec::new());
        }
        let Some(array) = m.read_ptr(container + inventory::SLOTS)? else {
            return Ok(Vec::new());
        };

        let mut slots = Vec::new();
        for i in 0..count.max(0) as u64 {
            let Some(slot) = array.checked_add(i * inventory::SLOT_SIZE) else {
                warn!("Inventory slot array at {:#x} wraps the address space", array);
                break;
            };
            let entry = m.read_ptr(slot + inventory::SLOT_ITEM).and_then(|record| {
                Ok((m.read_i32(slot + inventory::SLOT_INDEX)?, record))
            });
            match entry {
                Ok((index, Some(record))) => slots.push((index, record)),
                Ok((_, None)) => {}
                Err(e) => warn!("Skipping inventory slot {}: {}", i, e),
            }
        }
        Ok(slots)
    }

    fn read_inventory(&self, container: u64) -> AccessResult<Vec<ItemInfo>> {
        let fields = self.fields().item;
        Ok(self
            .slots(container)?
            .into_iter()
            .filter_map(|(index, record)| match self.read_item(record, index, &fields) {
                Ok(info) => Some(info),
                Err(e) => {
                    warn!("Skipping item at {:#x}: {}", record, e);
                    None
                }
            })
            .collect())
    }

    pub(super) fn read_item(&self, record: u64, slot_index: i32, fields: &ItemFields) -> AccessResult<ItemInfo> {
        let m = &self.memory;
        let category = ItemCategory::from_raw(m.read_i32(record + fields.category)?);
        Ok(ItemInfo {
            id: m.read_u32(record + item::ID)?,
            template_id: m.read_u32(record + item::TEMPLATE_ID)?,
            name: m.read_string(record + fields.name)?,
            category,
            grade: ItemGrade::from_raw(m.read_i32(record + item::GRADE)?),
            condition: m.read_f32(record + item::CONDITION)?,
            weight: m.read_f32(record + fields.weight)?,
            value: m.read_i32(record + fields.value)?,
            stack_count: m.read_i32(record + fields.stack_count)?,
            slot_index,
            details: self.read_details(record + item::DETAILS, category)?,
        })
    }

    /// Decode the detail block; its layout depends on the category tag
    fn read_details(&self, details: u64, category: ItemCategory) -> AccessResult<ItemDetails> {
        let m = &self.memory;
        Ok(match category {
            ItemCategory::Weapon => ItemDetails::Weapon {
                weapon_type: WeaponType::from_raw(m.read_i32(details + item::weapon::WEAPON_TYPE)?),
                damage_type: DamageType::from_raw(m.read_i32(details + item::weapon::DAMAGE_TYPE)?),
                base_damage: m.read_f32(details + item::weapon::BASE_DAMAGE)?,
                attack_speed: m.read_f32(details + item::weapon::ATTACK_SPEED)?,
                reach: m.read_f32(details + item::weapon::REACH)?,
                two_handed: m.read_bool(details + item::weapon::IS_TWO_HANDED)?,
            },
            ItemCategory::Armor => ItemDetails::Armor {
                cut_resist: m.read_f32(details + item::armor::CUT_RESIST)?,
                blunt_resist: m.read_f32(details + item::armor::BLUNT_RESIST)?,
                pierce_resist: m.read_f32(details + item::armor::PIERCE_RESIST)?,
                coverage_mask: m.read_u32(details + item::armor::COVERAGE_MASK)?,
            },
            ItemCategory::Food => ItemDetails::Food {
                nutrition: m.read_f32(details + item::food::NUTRITION)?,
                hydration: m.read_f32(details + item::food::HYDRATION)?,
                freshness: m.read_f32(details + item::food::FRESHNESS)?,
            },
            _ => ItemDetails::Other,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::bridge::testing::{HostFixture, RecordingCalls};
    use crate::memory::layout::character;

    #[test]
    fn test_inventory_listing_decodes_by_category() {
        let mut fixture = HostFixture::new();
        let beep = fixture.character(1, "Beep", true);
        let bread = fixture.item(20, 200, ItemCategory::Food, 3);
        fixture
            .image()
            .write_f32(bread + item::DETAILS + item::food::NUTRITION, 25.0)
            .unwrap();
        let shirt = fixture.armor(21, 0.2, 0.1, 0.05);
        let ghost = fixture.item(22, 220, ItemCategory::Junk, 1);
        fixture.give(beep, bread);
        fixture.give(beep, ghost);
        fixture.give(beep, shirt);
        fixture.free(ghost);

        let items = fixture.bridge().get_inventory(1).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].stack_count, 3);
        assert!(matches!(items[0].details, ItemDetails::Food { nutrition, .. } if nutrition == 25.0));
        assert_eq!(items[1].slot_index, 2);
        assert_eq!(items[1].resistance(DamageType::Cut), 0.2);
    }

    #[test]
    fn test_money_never_negative() {
        let mut fixture = HostFixture::new();
        fixture.character(1, "Beep", true);
        let bridge = fixture.bridge();
        assert_eq!(bridge.set_money(1, 1500).unwrap(), 1500);
        assert_eq!(bridge.set_money(1, -20).unwrap(), 0);
        assert_eq!(bridge.get_money(1).unwrap(), 0);
    }

    #[test]
    fn test_item_changes_need_native_functions() {
        let mut fixture = HostFixture::new();
        fixture.character(1, "Beep", true);
        let err = fixture.bridge().add_item(1, 200, 2).unwrap_err();
        assert!(matches!(err, Error::Unresolved("AddItemToInventory")));
    }

    #[test]
    fn test_remove_item_emits_event() {
        let mut fixture = HostFixture::new();
        let beep = fixture.character(1, "Beep", true);
        let bread = fixture.item(20, 200, ItemCategory::Food, 3);
        fixture.give(beep, bread);

        let calls = Arc::new(
            RecordingCalls::new().on(NativeFunction::RemoveItemFromInventory, |_| Ok(1)),
        );
        let bridge = fixture.bridge_with(calls.clone());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bridge.set_inventory_callback(Some(Arc::new(move |e: &InventoryEvent| {
            sink.lock().unwrap().push(*e);
        })));

        assert!(bridge.remove_item(1, 20, 2).unwrap());
        let container = fixture.image().read_u64(beep + character::INVENTORY).unwrap();
        assert_eq!(
            calls.calls()[0].2,
            vec![NativeArg::Ptr(container), NativeArg::Int(20), NativeArg::Int(2)]
        );
        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].quantity_change, -2);
        assert_eq!(events[0].template_id, 200);

        assert!(bridge.remove_item(1, 99, 1).unwrap_err().is_not_found());
    }

    #[test]
    fn test_transfer_returns_items_when_add_is_refused() {
        let mut fixture = HostFixture::new();
        let beep = fixture.character(1, "Beep", true);
        fixture.character(2, "Ruka", true);
        let bread = fixture.item(20, 200, ItemCategory::Food, 3);
        fixture.give(beep, bread);

        let calls = Arc::new(
            RecordingCalls::new()
                .on(NativeFunction::RemoveItemFromInventory, |_| Ok(1))
                .on(NativeFunction::AddItemToInventory, |_| Ok(0)),
        );
        let bridge = fixture.bridge_with(calls.clone());

        assert!(!bridge.transfer_item(1, 2, 20, 1).unwrap());
        let adds: Vec<NativeArg> = calls
            .calls()
            .into_iter()
            .filter(|(f, _, _)| *f == NativeFunction::AddItemToInventory)
            .map(|(_, _, args)| args[0])
            .collect();
        // First to the receiver, then back to the giver
        assert_eq!(adds.len(), 2);
        let container = fixture.image().read_u64(beep + character::INVENTORY).unwrap();
        assert_eq!(adds[1], NativeArg::Ptr(container));
    }
}
