//! Domain events synthesized by the bridge.
//!
//! Events are produced in two ways: applied (an inbound combat event or an
//! inventory change made through the bridge) and detected (comparing two
//! successive polls of the same character with [`TransitionDetector`]).

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bridge::{AttackType, CharacterState, DamageType, ItemInfo, LimbType};

/// Smallest limb health drop reported as a hit
const HEALTH_EPSILON: f32 = 0.01;

/// One resolved attack
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CombatEvent {
    /// 0 when the attacker is unknown
    pub attacker_id: u32,
    pub defender_id: u32,
    pub attack_type: AttackType,
    pub damage_type: DamageType,
    pub limb: LimbType,
    pub damage: f32,
    pub was_blocked: bool,
    pub was_dodged: bool,
    pub is_critical: bool,
    pub caused_knockdown: bool,
    pub sync_tick: u64,
}

/// A stack count change; positive when items were added
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InventoryEvent {
    pub character_id: u32,
    pub item_id: u32,
    pub template_id: u32,
    pub quantity_change: i32,
    pub slot_index: i32,
    pub sync_tick: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    Combat(CombatEvent),
    Inventory(InventoryEvent),
}

pub type CombatCallback = Arc<dyn Fn(&CombatEvent) + Send + Sync>;
pub type InventoryCallback = Arc<dyn Fn(&InventoryEvent) + Send + Sync>;

/// Registered event consumers. Cloning shares the callbacks.
#[derive(Clone, Default)]
pub struct EventCallbacks {
    combat: Option<CombatCallback>,
    inventory: Option<InventoryCallback>,
}

impl EventCallbacks {
    pub fn set_combat(&mut self, callback: Option<CombatCallback>) {
        self.combat = callback;
    }

    pub fn set_inventory(&mut self, callback: Option<InventoryCallback>) {
        self.inventory = callback;
    }

    pub fn emit(&self, event: &BridgeEvent) {
        match event {
            BridgeEvent::Combat(e) => self.emit_combat(e),
            BridgeEvent::Inventory(e) => self.emit_inventory(e),
        }
    }

    pub fn emit_combat(&self, event: &CombatEvent) {
        if let Some(callback) = &self.combat {
            callback(event);
        }
    }

    pub fn emit_inventory(&self, event: &InventoryEvent) {
        if let Some(callback) = &self.inventory {
            callback(event);
        }
    }
}

impl std::fmt::Debug for EventCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventCallbacks")
            .field("combat", &self.combat.is_some())
            .field("inventory", &self.inventory.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StackRecord {
    template_id: u32,
    stack_count: i32,
    slot_index: i32,
}

/// Detects transitions between successive polls.
///
/// The first poll of a character only establishes a baseline. Characters that
/// disappear from a poll are forgotten.
#[derive(Debug, Default)]
pub struct TransitionDetector {
    characters: HashMap<u32, CharacterState>,
    inventories: HashMap<u32, HashMap<u32, StackRecord>>,
}

impl TransitionDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare a character poll against the previous one, yielding one
    /// combat event per limb whose health dropped
    pub fn observe_characters(&mut self, states: &[CharacterState], tick: u64) -> Vec<CombatEvent> {
        let mut events = Vec::new();

        for current in states {
            if let Some(previous) = self.characters.get(&current.id) {
                events.extend(limb_hits(previous, current, tick));
            }
        }

        self.characters = states.iter().map(|s| (s.id, s.clone())).collect();
        self.inventories.retain(|id, _| self.characters.contains_key(id));
        events
    }

    /// Compare one character's inventory listing against the previous one
    pub fn observe_inventory(
        &mut self,
        character_id: u32,
        items: &[ItemInfo],
        tick: u64,
    ) -> Vec<InventoryEvent> {
        let current: HashMap<u32, StackRecord> = items
            .iter()
            .map(|item| {
                (
                    item.id,
                    StackRecord {
                        template_id: item.template_id,
                        stack_count: item.stack_count,
                        slot_index: item.slot_index,
                    },
                )
            })
            .collect();

        let Some(previous) = self.inventories.insert(character_id, current.clone()) else {
            return Vec::new();
        };

        let event = |item_id: u32, record: StackRecord, change: i32| InventoryEvent {
            character_id,
            item_id,
            template_id: record.template_id,
            quantity_change: change,
            slot_index: record.slot_index,
            sync_tick: tick,
        };

        let mut events = Vec::new();
        for (item_id, record) in &current {
            let before = previous.get(item_id).map_or(0, |r| r.stack_count);
            if record.stack_count != before {
                events.push(event(*item_id, *record, record.stack_count.saturating_sub(before)));
            }
        }
        for (item_id, record) in &previous {
            if !current.contains_key(item_id) && record.stack_count != 0 {
                events.push(event(*item_id, *record, record.stack_count.saturating_neg()));
            }
        }
        events.sort_by_key(|e| e.item_id);
        events
    }

    /// Replace the baseline without reporting anything, so changes the bridge
    /// applied itself are not detected again
    pub fn rebase(&mut self, states: &[CharacterState]) {
        for state in states {
            self.characters.insert(state.id, state.clone());
        }
    }

    pub fn rebase_inventory(&mut self, character_id: u32, items: &[ItemInfo]) {
        self.inventories.remove(&character_id);
        self.observe_inventory(character_id, items, 0);
    }

    pub fn forget(&mut self, character_id: u32) {
        self.characters.remove(&character_id);
        self.inventories.remove(&character_id);
    }

    pub fn tracked(&self) -> usize {
        self.characters.len()
    }
}

fn limb_hits(previous: &CharacterState, current: &CharacterState, tick: u64) -> Vec<CombatEvent> {
    previous
        .limbs
        .iter()
        .zip(&current.limbs)
        .filter(|(before, after)| before.health - after.health > HEALTH_EPSILON)
        .map(|(before, after)| {
            let started_bleeding = !before.bleeding && after.bleeding;
            debug!(
                "Character {} took {:.1} damage to {}",
                current.id,
                before.health - after.health,
                after.kind
            );
            CombatEvent {
                attacker_id: current.combat_target_id,
                defender_id: current.id,
                attack_type: AttackType::Light,
                damage_type: if started_bleeding {
                    DamageType::Cut
                } else {
                    DamageType::Blunt
                },
                limb: after.kind,
                damage: before.health - after.health,
                was_blocked: false,
                was_dodged: false,
                is_critical: false,
                caused_knockdown: !previous.is_unconscious && current.is_unconscious,
                sync_tick: tick,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::bridge::{ItemCategory, ItemDetails, ItemGrade, Limb};

    fn character(id: u32, head: f32, bleeding: bool) -> CharacterState {
        let limbs = (0..LimbType::COUNT as i32)
            .map(|i| Limb {
                kind: LimbType::from_raw(i),
                health: if i == 0 { head } else { 100.0 },
                max_health: 100.0,
                bleeding: i == 0 && bleeding,
                missing: false,
            })
            .collect();
        CharacterState {
            id,
            limbs,
            combat_target_id: 7,
            ..Default::default()
        }
    }

    fn item(id: u32, stack_count: i32) -> ItemInfo {
        ItemInfo {
            id,
            template_id: id * 10,
            name: String::new(),
            category: ItemCategory::Food,
            grade: ItemGrade::Standard,
            condition: 1.0,
            weight: 0.5,
            value: 10,
            stack_count,
            slot_index: id as i32,
            details: ItemDetails::Other,
        }
    }

    #[test]
    fn test_first_poll_is_baseline() {
        let mut detector = TransitionDetector::new();
        assert!(detector.observe_characters(&[character(1, 50.0, false)], 1).is_empty());
        assert_eq!(detector.tracked(), 1);
    }

    #[test]
    fn test_limb_drop_becomes_combat_event() {
        let mut detector = TransitionDetector::new();
        detector.observe_characters(&[character(1, 100.0, false)], 1);
        let events = detector.observe_characters(&[character(1, 70.0, true)], 2);

        assert_eq!(events.len(), 1);
        let event = events[0];
        assert_eq!(event.defender_id, 1);
        assert_eq!(event.attacker_id, 7);
        assert_eq!(event.limb, LimbType::Head);
        assert_eq!(event.damage_type, DamageType::Cut);
        assert!((event.damage - 30.0).abs() < 1e-4);
        assert_eq!(event.sync_tick, 2);
    }

    #[test]
    fn test_rebase_hides_applied_changes() {
        let mut detector = TransitionDetector::new();
        detector.observe_characters(&[character(1, 100.0, false)], 1);
        detector.rebase(&[character(1, 60.0, true)]);
        assert!(detector.observe_characters(&[character(1, 60.0, true)], 2).is_empty());
    }

    #[test]
    fn test_inventory_changes() {
        let mut detector = TransitionDetector::new();
        detector.observe_characters(&[character(3, 100.0, false)], 1);
        assert!(detector.observe_inventory(3, &[item(1, 5), item(2, 1)], 1).is_empty());

        let events = detector.observe_inventory(3, &[item(1, 2), item(4, 3)], 2);
        let changes: Vec<(u32, i32)> = events.iter().map(|e| (e.item_id, e.quantity_change)).collect();
        assert_eq!(changes, vec![(1, -3), (2, -1), (4, 3)]);
        assert_eq!(events[2].template_id, 40);
    }

    #[test]
    fn test_corrupt_stack_counts_saturate() {
        let mut detector = TransitionDetector::new();
        detector.observe_inventory(3, &[item(1, i32::MIN), item(2, 5)], 1);

        let events = detector.observe_inventory(3, &[item(1, i32::MAX)], 2);
        let changes: Vec<(u32, i32)> = events.iter().map(|e| (e.item_id, e.quantity_change)).collect();
        assert_eq!(changes, vec![(1, i32::MAX), (2, -5)]);

        detector.observe_inventory(3, &[item(1, i32::MIN)], 3);
        let events = detector.observe_inventory(3, &[], 4);
        assert_eq!(events[0].quantity_change, i32::MAX);
    }

    #[test]
    fn test_callbacks_receive_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let mut callbacks = EventCallbacks::default();
        callbacks.set_inventory(Some(Arc::new(move |e: &InventoryEvent| {
            sink.lock().unwrap().push(e.quantity_change);
        })));

        callbacks.emit(&BridgeEvent::Inventory(InventoryEvent {
            quantity_change: 4,
            ..Default::default()
        }));
        // No combat callback registered
        callbacks.emit(&BridgeEvent::Combat(CombatEvent::default()));

        assert_eq!(*seen.lock().unwrap(), vec![4]);
    }
}
