//! Testing utilities for the rules engine.
//!
//! - [`ScriptedDice`] replays predetermined die faces so fights and checks
//!   are reproducible
//! - `sample_*` builders return ready-made level 1 characters

use crate::character::{Character, HitPoints, Recharge, SpecialAbility, Weapon};
use crate::dice::DiceSource;
use crate::stats::{AbilityScores, ClassBook, Skill};
use std::collections::VecDeque;

/// A dice source that returns queued faces in order.
///
/// Each face is clamped into `1..=sides` for the die being rolled. Once the
/// queue is empty every roll comes up 1.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDice {
    faces: VecDeque<u32>,
    rolls: usize,
}

impl ScriptedDice {
    pub fn new(faces: impl IntoIterator<Item = u32>) -> Self {
        Self {
            faces: faces.into_iter().collect(),
            rolls: 0,
        }
    }

    /// Queue more faces after the current ones.
    pub fn push(&mut self, faces: impl IntoIterator<Item = u32>) {
        self.faces.extend(faces);
    }

    /// Faces not yet rolled.
    pub fn remaining(&self) -> usize {
        self.faces.len()
    }

    /// Number of dice rolled so far.
    pub fn rolls(&self) -> usize {
        self.rolls
    }
}

impl DiceSource for ScriptedDice {
    fn roll(&mut self, sides: u32) -> u32 {
        self.rolls += 1;
        self.faces.pop_front().unwrap_or(1).clamp(1, sides.max(1))
    }
}

fn strings(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// Level 1 fighter: STR 16, DEX 12, CON 14, AC 16, 12 HP, longsword.
pub fn sample_fighter() -> Character {
    let mut character = Character::new("Brannoc", ClassBook::standard().get("Fighter"));
    character.race = "Human".to_string();
    character.ability_scores = AbilityScores::new(16, 12, 14, 10, 12, 8);
    character.hit_points = HitPoints::new(12);
    character.armor_class = 16;
    character
        .proficiencies
        .skills
        .extend([Skill::Athletics, Skill::Perception, Skill::Intimidation]);
    character.weapons.push(Weapon::new("Longsword", "1d8"));
    character.special_abilities.push(
        SpecialAbility::new("Second Wind", "Regain 1d10 + fighter level HP").limited(1, Recharge::ShortRest),
    );
    character.special_abilities.push(
        SpecialAbility::new("Action Surge", "Take one additional action").limited(1, Recharge::ShortRest),
    );
    character
}

/// Level 1 rogue: DEX 16, trained in Stealth, 9 HP, rapier.
pub fn sample_rogue() -> Character {
    let mut character = Character::new("Vex", ClassBook::standard().get("Rogue"));
    character.race = "Halfling".to_string();
    character.ability_scores = AbilityScores::new(8, 16, 12, 13, 10, 14);
    character.hit_points = HitPoints::new(9);
    character.armor_class = 14;
    character.proficiencies.skills.extend([
        Skill::Stealth,
        Skill::SleightOfHand,
        Skill::Acrobatics,
        Skill::Perception,
    ]);
    character.weapons.push(Weapon::new("Rapier", "1d8"));
    character.weapons.push(Weapon::new("Shortbow", "1d6"));
    character
}

/// Level 1 wizard: INT 16, 7 HP, two 1st-level slots, three spells prepared.
pub fn sample_wizard() -> Character {
    let mut character = Character::new("Elira", ClassBook::standard().get("Wizard"));
    character.race = "Elf".to_string();
    character.ability_scores = AbilityScores::new(8, 14, 12, 16, 13, 10);
    character.hit_points = HitPoints::new(7);
    character.armor_class = 12;
    character.weapons.push(Weapon::new("Quarterstaff", "1d6"));
    if let Some(casting) = character.spellcasting.as_mut() {
        casting.cantrips = strings(&["Fire Bolt", "Ray of Frost", "Light"]);
        casting.known_spells = strings(&[
            "Magic Missile",
            "Burning Hands",
            "Shield",
            "Thunderwave",
            "Detect Magic",
        ]);
        casting.prepared_spells = strings(&["Magic Missile", "Burning Hands", "Shield"]);
    }
    character
}

/// Level 1 cleric companion: WIS 16, 10 HP, healing spells prepared.
pub fn sample_companion() -> Character {
    let mut character = Character::new("Sister Maren", ClassBook::standard().get("Cleric"));
    character.race = "Dwarf".to_string();
    character.ability_scores = AbilityScores::new(14, 10, 14, 10, 16, 12);
    character.hit_points = HitPoints::new(10);
    character.armor_class = 16;
    character.weapons.push(Weapon::new("Mace", "1d6"));
    if let Some(casting) = character.spellcasting.as_mut() {
        casting.cantrips = strings(&["Sacred Flame"]);
        casting.known_spells = strings(&["Cure Wounds", "Healing Word", "Guiding Bolt"]);
        casting.prepared_spells = casting.known_spells.clone();
    }
    character
}
