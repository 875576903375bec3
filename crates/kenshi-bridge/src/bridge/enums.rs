use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};
use thiserror::Error;
use tracing::warn;

/// Error for invalid enum value conversion
#[derive(Debug, Error)]
#[error("Invalid {type_name} value: {value}")]
pub struct InvalidEnumValueError {
    type_name: &'static str,
    value: i32,
}

impl InvalidEnumValueError {
    pub fn new(type_name: &'static str, value: i32) -> Self {
        Self { type_name, value }
    }
}

/// Declares an `i32`-backed host enum with `TryFrom<i32>`, `as_str` and a
/// lenient `from_raw` that logs unknown values and falls back to the default.
macro_rules! host_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            #[default]
            $first:ident = $first_value:literal,
            $($variant:ident = $value:literal,)*
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            Default,
            Serialize,
            Deserialize,
            IntoStaticStr,
            Display,
            EnumString,
            EnumIter,
        )]
        #[strum(ascii_case_insensitive)]
        #[repr(i32)]
        pub enum $name {
            #[default]
            $first = $first_value,
            $($variant = $value,)*
        }

        impl TryFrom<i32> for $name {
            type Error = InvalidEnumValueError;

            fn try_from(value: i32) -> Result<Self, Self::Error> {
                match value {
                    $first_value => Ok(Self::$first),
                    $($value => Ok(Self::$variant),)*
                    _ => Err(InvalidEnumValueError::new(stringify!($name), value)),
                }
            }
        }

        impl From<$name> for i32 {
            fn from(value: $name) -> i32 {
                value as i32
            }
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                self.into()
            }

            /// Convert a value read from host memory.
            ///
            /// Unknown values are replaced with the default and logged; they
            /// show up while the host is mid-transition.
            pub fn from_raw(raw: i32) -> Self {
                raw.try_into().unwrap_or_else(|_| {
                    warn!("Invalid {} value: {}, using default", stringify!($name), raw);
                    Self::default()
                })
            }
        }
    };
}

host_enum! {
    /// Body part index into the body system
    pub enum LimbType {
        #[default]
        Head = 0,
        Chest = 1,
        Stomach = 2,
        LeftArm = 3,
        RightArm = 4,
        LeftLeg = 5,
        RightLeg = 6,
    }
}

impl LimbType {
    pub const COUNT: usize = 7;

    pub fn index(self) -> usize {
        self as usize
    }
}

host_enum! {
    pub enum DamageType {
        #[default]
        Cut = 0,
        Blunt = 1,
        Pierce = 2,
    }
}

host_enum! {
    /// Tag selecting which item detail variant is valid
    pub enum ItemCategory {
        #[default]
        Weapon = 0,
        Armor = 1,
        Food = 2,
        Medical = 3,
        Resource = 4,
        Tool = 5,
        Blueprint = 6,
        Book = 7,
        Money = 8,
        Junk = 9,
    }
}

host_enum! {
    pub enum WeaponType {
        #[default]
        Katana = 0,
        Sabre = 1,
        Hackers = 2,
        HeavyWeapons = 3,
        Blunt = 4,
        Polearms = 5,
        MartialArts = 6,
        Crossbow = 7,
    }
}

host_enum! {
    pub enum ItemGrade {
        #[default]
        Rusted = 0,
        Rusting = 1,
        Standard = 2,
        Catun = 3,
        Mk1 = 4,
        Mk2 = 5,
        Mk3 = 6,
        Edge1 = 7,
        Edge2 = 8,
        Edge3 = 9,
        Meitou = 10,
    }
}

host_enum! {
    pub enum EquipSlot {
        #[default]
        Head = 0,
        Chest = 1,
        Legs = 2,
        Boots = 3,
        MainHand = 4,
        OffHand = 5,
        Backpack = 6,
    }
}

impl EquipSlot {
    pub const COUNT: usize = 7;
}

host_enum! {
    /// AI controller state, mirrored in the character record
    pub enum AiState {
        #[default]
        Idle = 0,
        Moving = 1,
        Fighting = 2,
        Looting = 3,
        Crafting = 4,
        Sleeping = 5,
        Eating = 6,
        Healing = 7,
        FirstAid = 8,
        Building = 9,
        Mining = 10,
        Farming = 11,
        Working = 12,
        Talking = 13,
        Trading = 14,
        Fleeing = 15,
        Unconscious = 16,
        Dead = 17,
        PlayingDead = 18,
        Recovery = 19,
        Following = 20,
        Patrolling = 21,
        Guarding = 22,
    }
}

host_enum! {
    /// Order kind shared by squad orders and per-character commands
    pub enum SquadOrder {
        #[default]
        None = 0,
        Hold = 1,
        Follow = 2,
        Move = 3,
        Attack = 4,
        Patrol = 5,
        Guard = 6,
        Work = 7,
        Passive = 8,
        Aggressive = 9,
        Defensive = 10,
    }
}

impl SquadOrder {
    /// AI state that approximates this order when the native command path is unavailable
    pub fn fallback_state(self) -> Option<AiState> {
        match self {
            SquadOrder::Move => Some(AiState::Moving),
            SquadOrder::Attack => Some(AiState::Fighting),
            SquadOrder::Hold => Some(AiState::Idle),
            SquadOrder::Follow => Some(AiState::Following),
            SquadOrder::Patrol => Some(AiState::Patrolling),
            SquadOrder::Guard => Some(AiState::Guarding),
            _ => None,
        }
    }
}

host_enum! {
    pub enum FormationType {
        #[default]
        None = 0,
        Line = 1,
        Column = 2,
        Wedge = 3,
        Circle = 4,
        Scattered = 5,
    }
}

host_enum! {
    pub enum FactionType {
        #[default]
        Player = 0,
        Major = 1,
        Minor = 2,
        Bandit = 3,
        Animal = 4,
        Neutral = 5,
    }
}

host_enum! {
    pub enum WeatherType {
        #[default]
        Clear = 0,
        Cloudy = 1,
        Rain = 2,
        Storm = 3,
        Dust = 4,
        Sandstorm = 5,
        AcidRain = 6,
        Fog = 7,
    }
}

host_enum! {
    /// Construction lifecycle of a building
    pub enum ConstructionState {
        #[default]
        Blueprint = 0,
        UnderConstruction = 1,
        Complete = 2,
        Damaged = 3,
        Destroyed = 4,
    }
}

host_enum! {
    pub enum BuildingType {
        #[default]
        House = 0,
        Wall = 1,
        Gate = 2,
        Tower = 3,
        Workshop = 4,
        Storage = 5,
        Farm = 6,
        Mine = 7,
        Generator = 8,
        Turret = 9,
        Research = 10,
        Medical = 11,
        Training = 12,
    }
}

host_enum! {
    pub enum AnimationType {
        #[default]
        Idle = 0,
        Walk = 1,
        Run = 2,
        Sprint = 3,
        Sneak = 4,
        Jump = 5,
        Fall = 6,
        Land = 7,
        Swim = 8,
        AttackLight = 10,
        AttackHeavy = 11,
        AttackCombo = 12,
        Block = 13,
        Dodge = 14,
        Stagger = 15,
        KnockDown = 16,
        GetUp = 17,
        PickUp = 20,
        PutDown = 21,
        Use = 22,
        Talk = 23,
        Trade = 24,
        Sleep = 25,
        Eat = 26,
        Heal = 27,
        Craft = 28,
        Build = 29,
        Mine = 30,
        Farm = 31,
        Die = 40,
        PlayDead = 41,
        Unconscious = 42,
        Crawl = 43,
    }
}

host_enum! {
    pub enum AttackType {
        #[default]
        Light = 0,
        Heavy = 1,
        Power = 2,
        Combo = 3,
        Counter = 4,
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_try_from_matches_discriminants() {
        for anim in AnimationType::iter() {
            assert_eq!(AnimationType::try_from(anim as i32).unwrap(), anim);
        }
        for state in AiState::iter() {
            assert_eq!(AiState::try_from(i32::from(state)).unwrap(), state);
        }
    }

    #[test]
    fn test_gaps_are_rejected() {
        assert!(AnimationType::try_from(9).is_err());
        assert!(AnimationType::try_from(18).is_err());
        assert_eq!(AnimationType::from_raw(44), AnimationType::Idle);
        assert_eq!(AiState::from_raw(-1), AiState::Idle);
    }

    #[test]
    fn test_names_parse_case_insensitively() {
        assert_eq!(AnimationType::from_str("attacklight").unwrap(), AnimationType::AttackLight);
        assert_eq!(WeatherType::from_str("AcidRain").unwrap(), WeatherType::AcidRain);
        assert_eq!(LimbType::Head.as_str(), "Head");
        assert!(AnimationType::from_str("moonwalk").is_err());
    }

    #[test]
    fn test_order_fallback_states() {
        assert_eq!(SquadOrder::Move.fallback_state(), Some(AiState::Moving));
        assert_eq!(SquadOrder::Guard.fallback_state(), Some(AiState::Guarding));
        assert_eq!(SquadOrder::Passive.fallback_state(), None);
    }
}
