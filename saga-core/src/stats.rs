//! Ability scores and the numbers derived from them.
//!
//! Also holds the class rule table: which ability drives weapon attacks,
//! hit die size, spellcasting ability and slot progression per class.

use crate::dice::DieType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// Abilities
// ============================================================================

/// The six ability scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ability {
    Strength,
    Dexterity,
    Constitution,
    Intelligence,
    Wisdom,
    Charisma,
}

impl Ability {
    pub fn abbreviation(&self) -> &'static str {
        match self {
            Ability::Strength => "STR",
            Ability::Dexterity => "DEX",
            Ability::Constitution => "CON",
            Ability::Intelligence => "INT",
            Ability::Wisdom => "WIS",
            Ability::Charisma => "CHA",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Ability::Strength => "Strength",
            Ability::Dexterity => "Dexterity",
            Ability::Constitution => "Constitution",
            Ability::Intelligence => "Intelligence",
            Ability::Wisdom => "Wisdom",
            Ability::Charisma => "Charisma",
        }
    }

    pub fn all() -> [Ability; 6] {
        [
            Ability::Strength,
            Ability::Dexterity,
            Ability::Constitution,
            Ability::Intelligence,
            Ability::Wisdom,
            Ability::Charisma,
        ]
    }
}

impl fmt::Display for Ability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.abbreviation())
    }
}

/// Modifier for a raw ability score: `floor((score - 10) / 2)`.
///
/// Rounds toward negative infinity, so 9 gives -1 and 7 gives -2.
pub fn ability_modifier(score: i32) -> i32 {
    (score - 10).div_euclid(2)
}

/// Proficiency bonus by character level: +2 at 1-4, then +1 every four levels.
pub fn proficiency_bonus(level: u8) -> i32 {
    match level {
        0..=4 => 2,
        5..=8 => 3,
        9..=12 => 4,
        13..=16 => 5,
        _ => 6,
    }
}

/// Ability scores container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbilityScores {
    pub strength: i32,
    pub dexterity: i32,
    pub constitution: i32,
    pub intelligence: i32,
    pub wisdom: i32,
    pub charisma: i32,
}

impl AbilityScores {
    pub fn new(str: i32, dex: i32, con: i32, int: i32, wis: i32, cha: i32) -> Self {
        Self {
            strength: str,
            dexterity: dex,
            constitution: con,
            intelligence: int,
            wisdom: wis,
            charisma: cha,
        }
    }

    pub fn get(&self, ability: Ability) -> i32 {
        match ability {
            Ability::Strength => self.strength,
            Ability::Dexterity => self.dexterity,
            Ability::Constitution => self.constitution,
            Ability::Intelligence => self.intelligence,
            Ability::Wisdom => self.wisdom,
            Ability::Charisma => self.charisma,
        }
    }

    pub fn set(&mut self, ability: Ability, value: i32) {
        match ability {
            Ability::Strength => self.strength = value,
            Ability::Dexterity => self.dexterity = value,
            Ability::Constitution => self.constitution = value,
            Ability::Intelligence => self.intelligence = value,
            Ability::Wisdom => self.wisdom = value,
            Ability::Charisma => self.charisma = value,
        }
    }

    pub fn modifier(&self, ability: Ability) -> i32 {
        ability_modifier(self.get(ability))
    }
}

impl Default for AbilityScores {
    fn default() -> Self {
        Self::new(10, 10, 10, 10, 10, 10)
    }
}

// ============================================================================
// Skills
// ============================================================================

/// Trainable skills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Skill {
    Athletics,
    Acrobatics,
    SleightOfHand,
    Stealth,
    Arcana,
    History,
    Investigation,
    Nature,
    Religion,
    AnimalHandling,
    Insight,
    Medicine,
    Perception,
    Survival,
    Deception,
    Intimidation,
    Performance,
    Persuasion,
}

impl Skill {
    pub fn ability(&self) -> Ability {
        match self {
            Skill::Athletics => Ability::Strength,
            Skill::Acrobatics | Skill::SleightOfHand | Skill::Stealth => Ability::Dexterity,
            Skill::Arcana
            | Skill::History
            | Skill::Investigation
            | Skill::Nature
            | Skill::Religion => Ability::Intelligence,
            Skill::AnimalHandling
            | Skill::Insight
            | Skill::Medicine
            | Skill::Perception
            | Skill::Survival => Ability::Wisdom,
            Skill::Deception | Skill::Intimidation | Skill::Performance | Skill::Persuasion => {
                Ability::Charisma
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Skill::Athletics => "Athletics",
            Skill::Acrobatics => "Acrobatics",
            Skill::SleightOfHand => "Sleight of Hand",
            Skill::Stealth => "Stealth",
            Skill::Arcana => "Arcana",
            Skill::History => "History",
            Skill::Investigation => "Investigation",
            Skill::Nature => "Nature",
            Skill::Religion => "Religion",
            Skill::AnimalHandling => "Animal Handling",
            Skill::Insight => "Insight",
            Skill::Medicine => "Medicine",
            Skill::Perception => "Perception",
            Skill::Survival => "Survival",
            Skill::Deception => "Deception",
            Skill::Intimidation => "Intimidation",
            Skill::Performance => "Performance",
            Skill::Persuasion => "Persuasion",
        }
    }
}

impl fmt::Display for Skill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ============================================================================
// Class rules
// ============================================================================

/// How a class gains spell slots as it levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotProgression {
    None,
    Full,
    Half,
    /// Few slots, all of the highest available level, back on a short rest.
    Pact,
}

/// Spell slots per level 1..=9 for a full caster at each character level.
const FULL_CASTER_SLOTS: [[u8; 9]; 20] = [
    [2, 0, 0, 0, 0, 0, 0, 0, 0],
    [3, 0, 0, 0, 0, 0, 0, 0, 0],
    [4, 2, 0, 0, 0, 0, 0, 0, 0],
    [4, 3, 0, 0, 0, 0, 0, 0, 0],
    [4, 3, 2, 0, 0, 0, 0, 0, 0],
    [4, 3, 3, 0, 0, 0, 0, 0, 0],
    [4, 3, 3, 1, 0, 0, 0, 0, 0],
    [4, 3, 3, 2, 0, 0, 0, 0, 0],
    [4, 3, 3, 3, 1, 0, 0, 0, 0],
    [4, 3, 3, 3, 2, 0, 0, 0, 0],
    [4, 3, 3, 3, 2, 1, 0, 0, 0],
    [4, 3, 3, 3, 2, 1, 0, 0, 0],
    [4, 3, 3, 3, 2, 1, 1, 0, 0],
    [4, 3, 3, 3, 2, 1, 1, 0, 0],
    [4, 3, 3, 3, 2, 1, 1, 1, 0],
    [4, 3, 3, 3, 2, 1, 1, 1, 0],
    [4, 3, 3, 3, 2, 1, 1, 1, 1],
    [4, 3, 3, 3, 3, 1, 1, 1, 1],
    [4, 3, 3, 3, 3, 2, 1, 1, 1],
    [4, 3, 3, 3, 3, 2, 2, 1, 1],
];

impl SlotProgression {
    /// Slot totals per spell level (index 0 = 1st level) at a character level.
    pub fn slots_at(&self, level: u8) -> [u8; 9] {
        let level = level.clamp(1, 20);
        match self {
            SlotProgression::None => [0; 9],
            SlotProgression::Full => FULL_CASTER_SLOTS[level as usize - 1],
            SlotProgression::Half => {
                if level < 2 {
                    [0; 9]
                } else {
                    FULL_CASTER_SLOTS[level.div_ceil(2) as usize - 1]
                }
            }
            SlotProgression::Pact => {
                let (count, slot_level) = match level {
                    1 => (1, 1),
                    2 => (2, 1),
                    3..=4 => (2, 2),
                    5..=6 => (2, 3),
                    7..=8 => (2, 4),
                    9..=10 => (2, 5),
                    11..=16 => (3, 5),
                    _ => (4, 5),
                };
                let mut slots = [0; 9];
                slots[slot_level - 1] = count;
                slots
            }
        }
    }
}

/// Rules attached to a character class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassProfile {
    pub name: String,
    pub hit_die: DieType,
    /// Ability used for weapon attack and damage rolls.
    pub weapon_ability: Ability,
    pub spellcasting_ability: Option<Ability>,
    pub slot_progression: SlotProgression,
    pub saving_throws: Vec<Ability>,
}

impl ClassProfile {
    pub fn new(name: impl Into<String>, hit_die: DieType, weapon_ability: Ability) -> Self {
        Self {
            name: name.into(),
            hit_die,
            weapon_ability,
            spellcasting_ability: None,
            slot_progression: SlotProgression::None,
            saving_throws: Vec::new(),
        }
    }

    pub fn with_spellcasting(mut self, ability: Ability, progression: SlotProgression) -> Self {
        self.spellcasting_ability = Some(ability);
        self.slot_progression = progression;
        self
    }

    pub fn with_saving_throws(mut self, saves: impl IntoIterator<Item = Ability>) -> Self {
        self.saving_throws = saves.into_iter().collect();
        self
    }

    /// Whether spell slots come back on a short rest.
    pub fn short_rest_restores_slots(&self) -> bool {
        self.slot_progression == SlotProgression::Pact
    }
}

lazy_static::lazy_static! {
    /// Built-in class table.
    static ref STANDARD_CLASSES: ClassBook = build_standard_classes();
}

/// Lookup table from class name to its rules, with a default profile for
/// classes nobody registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassBook {
    classes: HashMap<String, ClassProfile>,
    fallback: ClassProfile,
}

impl ClassBook {
    /// An empty book that resolves every class to `fallback`.
    pub fn new(fallback: ClassProfile) -> Self {
        Self {
            classes: HashMap::new(),
            fallback,
        }
    }

    /// The built-in classes.
    pub fn standard() -> Self {
        STANDARD_CLASSES.clone()
    }

    /// Register or replace a class profile.
    pub fn insert(&mut self, profile: ClassProfile) {
        self.classes.insert(profile.name.to_lowercase(), profile);
    }

    pub fn with(mut self, profile: ClassProfile) -> Self {
        self.insert(profile);
        self
    }

    /// Look up a class by name (case-insensitive).
    pub fn find(&self, class: &str) -> Option<&ClassProfile> {
        self.classes.get(&class.to_lowercase())
    }

    /// Look up a class, falling back to the default profile.
    pub fn get(&self, class: &str) -> &ClassProfile {
        match self.find(class) {
            Some(profile) => profile,
            None => {
                tracing::warn!(class, "unknown class, using default profile");
                &self.fallback
            }
        }
    }
}

impl Default for ClassBook {
    fn default() -> Self {
        Self::standard()
    }
}

fn build_standard_classes() -> ClassBook {
    use Ability::*;

    ClassBook::new(ClassProfile::new("Adventurer", DieType::D8, Strength))
        .with(
            ClassProfile::new("Fighter", DieType::D10, Strength)
                .with_saving_throws([Strength, Constitution]),
        )
        .with(
            ClassProfile::new("Rogue", DieType::D8, Dexterity)
                .with_saving_throws([Dexterity, Intelligence]),
        )
        .with(
            ClassProfile::new("Wizard", DieType::D6, Strength)
                .with_spellcasting(Intelligence, SlotProgression::Full)
                .with_saving_throws([Intelligence, Wisdom]),
        )
        .with(
            ClassProfile::new("Cleric", DieType::D8, Strength)
                .with_spellcasting(Wisdom, SlotProgression::Full)
                .with_saving_throws([Wisdom, Charisma]),
        )
        .with(
            ClassProfile::new("Ranger", DieType::D10, Dexterity)
                .with_spellcasting(Wisdom, SlotProgression::Half)
                .with_saving_throws([Strength, Dexterity]),
        )
        .with(
            ClassProfile::new("Paladin", DieType::D10, Strength)
                .with_spellcasting(Charisma, SlotProgression::Half)
                .with_saving_throws([Wisdom, Charisma]),
        )
        .with(
            ClassProfile::new("Warlock", DieType::D8, Strength)
                .with_spellcasting(Charisma, SlotProgression::Pact)
                .with_saving_throws([Wisdom, Charisma]),
        )
}
