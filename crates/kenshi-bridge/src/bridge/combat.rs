//! Damage and combat-event application.
//!
//! Follows the host's own rules: armor on the struck limb mitigates by damage
//! type, cutting damage starts bleeding, aggregate health is the mean of the
//! limb healths, and a character dies when either the aggregate or the head
//! reaches zero. A living character whose blood drops to the threshold falls
//! unconscious.

use tracing::{debug, info};

use super::fields::Fields;
use super::{AiState, AnimationType, DamageType, ItemCategory, LimbType, StateBridge, bounded, vanished};
use crate::error::{EntityKind, Error, Result};
use crate::events::CombatEvent;
use crate::memory::layout::{anim, body, body_part, character};
use crate::memory::{AccessResult, ReadMemory, WriteMemory};

/// Blood level at or below which a living character falls unconscious
pub const UNCONSCIOUS_BLOOD: f32 = 20.0;
/// Share of the raw damage a cut bleeds per second
pub const BLEED_FACTOR: f32 = 0.1;

/// Outcome of one hit
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DamageReport {
    /// Damage after armor
    pub applied: f32,
    pub limb_health: f32,
    pub aggregate_health: f32,
    pub bleeding: bool,
    pub unconscious: bool,
    pub dead: bool,
}

impl StateBridge {
    /// Hit one limb of a character
    pub fn apply_damage(
        &self,
        id: u32,
        limb: LimbType,
        damage_type: DamageType,
        damage: f32,
    ) -> Result<DamageReport> {
        let _state = self.lock();
        let fields = self.fields();
        let record = self.require_character(id)?;
        self.damage_record(record, &fields, limb, damage_type, damage)
            .map_err(|e| vanished(EntityKind::Character, id, e))?
            .ok_or_else(|| Error::not_found(EntityKind::Character, format!("body of {}", id)))
    }

    /// Apply a combat event produced elsewhere (typically a remote peer).
    ///
    /// Blocked and dodged hits do no damage but still put both sides in
    /// combat. The attacker is optional; the defender must exist. Applied
    /// events are not echoed to the combat callback.
    pub fn apply_combat_event(&self, event: &CombatEvent) -> Result<()> {
        let _state = self.lock();
        let fields = self.fields();
        let defender = self.require_character(event.defender_id)?;
        let attacker = self.find_character(event.attacker_id);

        let apply = || -> AccessResult<()> {
            if !event.was_blocked && !event.was_dodged {
                let report =
                    self.damage_record(defender, &fields, event.limb, event.damage_type, event.damage)?;
                if let Some(report) = report {
                    debug!(
                        "Character {} took {:.1} to {} ({:.1} left)",
                        event.defender_id, report.applied, event.limb, report.aggregate_health
                    );
                }
            }

            if event.caused_knockdown {
                if let Some(state) = self.memory.read_ptr(defender + fields.character.anim_state)? {
                    self.memory
                        .write_i32(state + anim::CURRENT, AnimationType::KnockDown.into())?;
                }
                self.memory.write_bool(defender + character::IS_UNCONSCIOUS, true)?;
            }

            if let Some(attacker) = attacker {
                self.memory.write_bool(attacker + character::IS_IN_COMBAT, true)?;
                self.memory.write_u64(attacker + character::COMBAT_TARGET, defender)?;
            }
            self.memory.write_bool(defender + character::IS_IN_COMBAT, true)
        };
        apply().map_err(|e| vanished(EntityKind::Character, event.defender_id, e))
    }

    fn damage_record(
        &self,
        record: u64,
        fields: &Fields,
        limb: LimbType,
        damage_type: DamageType,
        damage: f32,
    ) -> AccessResult<Option<DamageReport>> {
        let m = &self.memory;
        let Some(body_record) = m.read_ptr(record + fields.character.body)? else {
            return Ok(None);
        };
        let part = body_record + body::limb(limb.index());

        let resist = self.armor_resistance(part, fields, damage_type)?;
        let applied = bounded(damage, 0.0, f32::MAX) * (1.0 - resist);

        let limb_health = (m.read_f32(part + body_part::HEALTH)? - applied).max(0.0);
        m.write_f32(part + body_part::HEALTH, limb_health)?;
        let total = m.read_f32(part + body_part::DAMAGE)?;
        m.write_f32(part + body_part::DAMAGE, total + applied)?;

        let mut bleeding = m.read_bool(part + body_part::IS_BLEEDING)?;
        if damage_type == DamageType::Cut && !m.read_bool(part + body_part::IS_MISSING)? {
            bleeding = true;
            m.write_bool(part + body_part::IS_BLEEDING, true)?;
            m.write_f32(part + body_part::BLEED_RATE, damage * BLEED_FACTOR)?;
        }

        let mut sum = 0.0;
        for i in 0..LimbType::COUNT {
            sum += m.read_f32(body_record + body::limb(i) + body_part::HEALTH)?;
        }
        let aggregate_health = sum / LimbType::COUNT as f32;
        m.write_f32(record + fields.character.health, aggregate_health)?;
        m.write_f32(body_record + body::OVERALL_HEALTH, aggregate_health)?;

        let head = m.read_f32(body_record + body::limb(LimbType::Head.index()) + body_part::HEALTH)?;
        let blood = m.read_f32(record + fields.character.blood)?;
        let mut report = DamageReport {
            applied,
            limb_health,
            aggregate_health,
            bleeding,
            ..Default::default()
        };

        if aggregate_health <= 0.0 || head <= 0.0 {
            m.write_bool(record + character::IS_DEAD, true)?;
            self.write_ai_state(record, &fields.character, AiState::Dead)?;
            report.dead = true;
            info!("Character at {:#x} died", record);
        } else if blood <= UNCONSCIOUS_BLOOD {
            m.write_bool(record + character::IS_UNCONSCIOUS, true)?;
            self.write_ai_state(record, &fields.character, AiState::Unconscious)?;
            report.unconscious = true;
        }
        Ok(Some(report))
    }

    /// Resistance of the armor covering a limb, in [0, 1]; 0 when uncovered
    fn armor_resistance(&self, part: u64, fields: &Fields, damage_type: DamageType) -> AccessResult<f32> {
        let Some(armor) = self.memory.read_ptr(part + body_part::ARMOR)? else {
            return Ok(0.0);
        };
        let category = ItemCategory::from_raw(self.memory.read_i32(armor + fields.item.category)?);
        if category != ItemCategory::Armor {
            return Ok(0.0);
        }
        let item = self.read_item(armor, -1, &fields.item)?;
        Ok(bounded(item.resistance(damage_type), 0.0, 1.0))
    }
}
