//! Game data lookups the clone-request sub-protocol depends on.
//!
//! The daemon treats species, items and forms as opaque numbers. Display
//! names and a handful of rule tables come from a [`GameCatalog`]
//! implementation supplied by the title integration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ── Well-known identifiers ──────────────────────────────────────────────

pub mod species {
    pub const PIKACHU: u16 = 25;
    pub const VIVILLON: u16 = 666;
    pub const ALCREMIE: u16 = 869;
    /// Paldea starters and their evolutions.
    pub const STARTERS: std::ops::RangeInclusive<u16> = 906..=914;
    pub const WO_CHIEN: u16 = 1001;
    pub const CHIEN_PAO: u16 = 1002;
    pub const TING_LU: u16 = 1003;
    pub const CHI_YU: u16 = 1004;
    pub const KORAIDON: u16 = 1007;
    pub const MIRAIDON: u16 = 1008;
    pub const WALKING_WAKE: u16 = 1009;
    pub const IRON_LEAVES: u16 = 1010;
}

pub mod version {
    pub const SCARLET: u8 = 50;
    pub const VIOLET: u8 = 51;

    pub fn is_supported(version: u8) -> bool {
        version == SCARLET || version == VIOLET
    }
}

pub mod location {
    pub const IN_GAME_TRADE: u16 = 30001;
    pub const LINK_TRADE_EGG: u16 = 30002;
    pub const LINK_TRADE_EGG_RECEIVED: u16 = 30023;
    pub const TERA_RAID: u16 = 30024;
    /// Met location applied to hatched payloads built from a specification.
    pub const HATCHED_DEFAULT: u16 = 50;
    /// Gift locations that share a fixed level-5 encounter.
    pub const SALVATORE: [u16; 2] = [130, 131];
}

pub const NATURES: [&str; 25] = [
    "Hardy", "Lonely", "Brave", "Adamant", "Naughty", "Bold", "Docile", "Relaxed", "Impish",
    "Lax", "Timid", "Hasty", "Serious", "Jolly", "Naive", "Modest", "Mild", "Quiet", "Bashful",
    "Rash", "Calm", "Gentle", "Sassy", "Careful", "Quirky",
];

/// Language name as it appears in a generated specification.
pub fn language_name(id: u8) -> Option<&'static str> {
    Some(match id {
        0 => "Hacker",
        1 => "Japanese",
        2 => "English",
        3 => "French",
        4 => "Italian",
        5 => "German",
        7 => "Spanish",
        8 => "Korean",
        9 => "ChineseS",
        10 => "ChineseT",
        _ => return None,
    })
}

// ── Ball ────────────────────────────────────────────────────────────────

macro_rules! named_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $id:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn id(self) -> u8 {
                match self {
                    $($name::$variant => $id),+
                }
            }

            pub fn from_id(id: u8) -> Option<Self> {
                match id {
                    $($id => Some($name::$variant),)+
                    _ => None,
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $($name::$variant => stringify!($variant)),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }

        /// Case-insensitive name lookup.
        impl FromStr for $name {
            type Err = ();

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.name().eq_ignore_ascii_case(s))
                    .ok_or(())
            }
        }
    };
}

named_enum! {
    /// Capture container.
    Ball {
        None = 0,
        Master = 1,
        Ultra = 2,
        Great = 3,
        Poke = 4,
        Safari = 5,
        Net = 6,
        Dive = 7,
        Nest = 8,
        Repeat = 9,
        Timer = 10,
        Luxury = 11,
        Premier = 12,
        Dusk = 13,
        Heal = 14,
        Quick = 15,
        Cherish = 16,
        Fast = 17,
        Level = 18,
        Lure = 19,
        Heavy = 20,
        Love = 21,
        Friend = 22,
        Moon = 23,
        Sport = 24,
        Dream = 25,
        Beast = 26,
        Strange = 27,
        LAPoke = 28,
        LAGreat = 29,
        LAUltra = 30,
        LAFeather = 31,
        LAWing = 32,
        LAJet = 33,
        LAHeavy = 34,
        LALeaden = 35,
        LAGigaton = 36,
        LAOrigin = 37,
    }
}

impl Ball {
    /// Containers from the legacy title that cannot be applied here.
    pub fn is_legacy(self) -> bool {
        self.id() >= Ball::LAPoke.id()
    }
}

named_enum! {
    /// Elemental affinity used for the tera override.
    TeraType {
        Normal = 0,
        Fighting = 1,
        Flying = 2,
        Poison = 3,
        Ground = 4,
        Rock = 5,
        Bug = 6,
        Ghost = 7,
        Steel = 8,
        Fire = 9,
        Water = 10,
        Grass = 11,
        Electric = 12,
        Psychic = 13,
        Ice = 14,
        Dragon = 15,
        Dark = 16,
        Fairy = 17,
    }
}

// ── Catalog contract ────────────────────────────────────────────────────

/// Gender distribution of a species form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenderRatio {
    Genderless,
    FemaleOnly,
    MaleOnly,
    Mixed,
}

/// Where a species form can be encountered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EncounterOrigins {
    /// Has at least one encounter in the current title.
    pub native: bool,
    /// Only obtainable in the legacy title.
    pub legacy_only: bool,
}

/// Display names and rule lookups for one title.
pub trait GameCatalog: Send + Sync {
    /// Exclusive upper bound of valid species ids.
    fn species_count(&self) -> u16;

    fn species_name(&self, species: u16) -> Option<String>;

    /// Display name of an item, e.g. `"Dusk Ball"` or `"Fire Tera Shard"`.
    fn item_name(&self, item: u16) -> Option<String>;

    fn is_held_item_allowed(&self, item: u16) -> bool;

    /// Form name when `form` is within range for `species`.
    fn form_name(&self, species: u16, form: u8) -> Option<String>;

    fn ability_name(&self, species: u16, form: u8, index: u8) -> Option<String>;

    fn gender_ratio(&self, species: u16, form: u8) -> GenderRatio;

    fn encounter_origins(&self, species: u16, form: u8) -> EncounterOrigins;
}
