//! Spell table and spell combat mechanics.
//!
//! Spells are looked up by name (case-insensitive). A name missing from the
//! table resolves to a plain damaging spell instead of failing the cast.

use crate::dice::{DiceExpression, DieType};
use crate::stats::Ability;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How a damaging spell decides whether it lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpellResolution {
    /// Spell attack roll against armor class.
    Attack,
    /// Each target saves against the caster's spell save DC.
    Save { ability: Ability, half_on_save: bool },
    /// Always hits.
    Automatic,
}

/// Which combatants a spell can affect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetShape {
    Single,
    /// Up to this many declared enemy targets.
    Multiple(u8),
    AllEnemies,
    /// A single party member (healing).
    Ally,
}

impl TargetShape {
    pub fn targets_party(&self) -> bool {
        matches!(self, TargetShape::Ally)
    }
}

/// What the spell does when it lands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpellEffect {
    Damage {
        dice: DiceExpression,
        resolution: SpellResolution,
    },
    Healing {
        dice: DiceExpression,
        /// Add the caster's spellcasting modifier to the amount healed.
        add_modifier: bool,
    },
    /// No mechanical effect the engine resolves; only the slot is spent.
    Utility,
}

/// A spell definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpellData {
    pub name: String,
    /// 0 for cantrips.
    pub level: u8,
    pub effect: SpellEffect,
    pub shape: TargetShape,
    /// Dice added per slot level above the spell's own level.
    pub upcast: Option<(u32, DieType)>,
}

impl SpellData {
    pub fn new(name: impl Into<String>, level: u8, effect: SpellEffect, shape: TargetShape) -> Self {
        Self {
            name: name.into(),
            level,
            effect,
            shape,
            upcast: None,
        }
    }

    pub fn upcast(mut self, count: u32, die: DieType) -> Self {
        self.upcast = Some((count, die));
        self
    }

    /// Check if this is a cantrip.
    pub fn is_cantrip(&self) -> bool {
        self.level == 0
    }

    /// Cantrip damage dice multiplier at a caster level (1, 2, 3 or 4).
    pub fn cantrip_dice_count(caster_level: u8) -> u32 {
        match caster_level {
            0..=4 => 1,
            5..=10 => 2,
            11..=16 => 3,
            _ => 4,
        }
    }

    /// Scale a base dice expression for caster level and slot level.
    pub fn scaled_dice(&self, base: &DiceExpression, caster_level: u8, slot_level: u8) -> DiceExpression {
        if self.is_cantrip() {
            let factor = Self::cantrip_dice_count(caster_level);
            let mut expr = base.clone();
            for component in &mut expr.components {
                component.count *= factor;
            }
            return expr.plus(0);
        }
        match self.upcast {
            Some((count, die)) if slot_level > self.level => {
                base.with_extra_dice(count * u32::from(slot_level - self.level), die)
            }
            _ => base.clone(),
        }
    }
}

lazy_static::lazy_static! {
    /// Built-in spell table.
    static ref STANDARD_SPELLS: SpellBook = build_standard_spells();
}

/// Lookup table of spells with a default for unknown names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpellBook {
    spells: HashMap<String, SpellData>,
    fallback: SpellData,
}

impl SpellBook {
    pub fn new(fallback: SpellData) -> Self {
        Self {
            spells: HashMap::new(),
            fallback,
        }
    }

    /// The built-in spell list.
    pub fn standard() -> Self {
        STANDARD_SPELLS.clone()
    }

    pub fn insert(&mut self, spell: SpellData) {
        self.spells.insert(spell.name.to_lowercase(), spell);
    }

    pub fn with(mut self, spell: SpellData) -> Self {
        self.insert(spell);
        self
    }

    pub fn find(&self, name: &str) -> Option<&SpellData> {
        self.spells.get(&name.to_lowercase())
    }

    /// Look up a spell, falling back to the default definition. The fallback
    /// keeps the requested name and is treated as a 1st-level spell.
    pub fn get(&self, name: &str) -> SpellData {
        match self.find(name) {
            Some(spell) => spell.clone(),
            None => {
                tracing::warn!(spell = name, "unknown spell, using default definition");
                SpellData {
                    name: name.to_string(),
                    ..self.fallback.clone()
                }
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &SpellData> {
        self.spells.values()
    }
}

impl Default for SpellBook {
    fn default() -> Self {
        Self::standard()
    }
}

fn damage(count: u32, die: DieType, modifier: i32, resolution: SpellResolution) -> SpellEffect {
    SpellEffect::Damage {
        dice: DiceExpression::new(count, die, modifier),
        resolution,
    }
}

fn save(ability: Ability, half_on_save: bool) -> SpellResolution {
    SpellResolution::Save {
        ability,
        half_on_save,
    }
}

fn heal(count: u32, die: DieType) -> SpellEffect {
    SpellEffect::Healing {
        dice: DiceExpression::new(count, die, 0),
        add_modifier: true,
    }
}

fn build_standard_spells() -> SpellBook {
    use DieType::*;
    use SpellResolution::*;
    use TargetShape::*;

    SpellBook::new(SpellData::new("Unknown Spell", 1, damage(1, D6, 0, Attack), Single))
        // Cantrips
        .with(SpellData::new("Fire Bolt", 0, damage(1, D10, 0, Attack), Single))
        .with(SpellData::new("Ray of Frost", 0, damage(1, D8, 0, Attack), Single))
        .with(SpellData::new("Eldritch Blast", 0, damage(1, D10, 0, Attack), Single))
        .with(SpellData::new(
            "Sacred Flame",
            0,
            damage(1, D8, 0, save(Ability::Dexterity, false)),
            Single,
        ))
        .with(SpellData::new(
            "Acid Splash",
            0,
            damage(1, D6, 0, save(Ability::Dexterity, false)),
            Multiple(2),
        ))
        .with(SpellData::new("Light", 0, SpellEffect::Utility, Single))
        .with(SpellData::new("Mage Hand", 0, SpellEffect::Utility, Single))
        // 1st level
        .with(SpellData::new("Magic Missile", 1, damage(3, D4, 3, Automatic), Single).upcast(1, D4))
        .with(
            SpellData::new(
                "Burning Hands",
                1,
                damage(3, D6, 0, save(Ability::Dexterity, true)),
                Multiple(3),
            )
            .upcast(1, D6),
        )
        .with(
            SpellData::new(
                "Thunderwave",
                1,
                damage(2, D8, 0, save(Ability::Constitution, true)),
                Multiple(3),
            )
            .upcast(1, D8),
        )
        .with(SpellData::new("Guiding Bolt", 1, damage(4, D6, 0, Attack), Single).upcast(1, D6))
        .with(SpellData::new("Chromatic Orb", 1, damage(3, D8, 0, Attack), Single).upcast(1, D8))
        .with(SpellData::new("Cure Wounds", 1, heal(1, D8), Ally).upcast(1, D8))
        .with(SpellData::new("Healing Word", 1, heal(1, D4), Ally).upcast(1, D4))
        .with(SpellData::new("Shield", 1, SpellEffect::Utility, Ally))
        .with(SpellData::new("Detect Magic", 1, SpellEffect::Utility, Single))
        // 2nd level
        .with(SpellData::new("Scorching Ray", 2, damage(6, D6, 0, Attack), Single).upcast(2, D6))
        .with(
            SpellData::new(
                "Shatter",
                2,
                damage(3, D8, 0, save(Ability::Constitution, true)),
                Multiple(4),
            )
            .upcast(1, D8),
        )
        // 3rd level
        .with(
            SpellData::new(
                "Fireball",
                3,
                damage(8, D6, 0, save(Ability::Dexterity, true)),
                AllEnemies,
            )
            .upcast(1, D6),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_lookup() {
        let book = SpellBook::standard();
        assert!(book.find("FIREBALL").is_some());
        assert!(book.find("fire bolt").is_some());
        assert_eq!(book.get("magic missile").level, 1);
    }

    #[test]
    fn test_unknown_spell_falls_back() {
        let book = SpellBook::standard();
        let spell = book.get("Wish Upon a Star");
        assert_eq!(spell.name, "Wish Upon a Star");
        assert_eq!(spell.level, 1);
        assert!(matches!(spell.effect, SpellEffect::Damage { .. }));
    }

    #[test]
    fn test_cantrip_scaling() {
        let book = SpellBook::standard();
        let fire_bolt = book.get("Fire Bolt");
        let SpellEffect::Damage { dice, .. } = &fire_bolt.effect else {
            panic!("fire bolt deals damage");
        };
        assert_eq!(fire_bolt.scaled_dice(dice, 1, 0).notation(), "1d10");
        assert_eq!(fire_bolt.scaled_dice(dice, 5, 0).notation(), "2d10");
        assert_eq!(fire_bolt.scaled_dice(dice, 17, 0).notation(), "4d10");
    }

    #[test]
    fn test_upcasting_adds_dice() {
        let book = SpellBook::standard();
        let fireball = book.get("Fireball");
        let SpellEffect::Damage { dice, .. } = &fireball.effect else {
            panic!("fireball deals damage");
        };
        assert_eq!(fireball.scaled_dice(dice, 5, 3).notation(), "8d6");
        assert_eq!(fireball.scaled_dice(dice, 9, 5).notation(), "10d6");
    }
}
