//! Character, companion and party state.
//!
//! These are the records the presentation layer polls between operations:
//! every field here is kept consistent by the engine at each quiescent point.

use crate::dice::DieType;
use crate::stats::{proficiency_bonus, Ability, AbilityScores, ClassProfile, Skill};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

/// Unique identifier for characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharacterId(pub Uuid);

impl CharacterId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CharacterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CharacterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Hit Points and Hit Dice
// ============================================================================

/// Hit points, always within `0..=maximum`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitPoints {
    pub current: i32,
    pub maximum: i32,
}

impl HitPoints {
    pub fn new(maximum: i32) -> Self {
        let maximum = maximum.max(1);
        Self {
            current: maximum,
            maximum,
        }
    }

    /// Reduce current HP, stopping at zero.
    pub fn take_damage(&mut self, amount: i32) -> DamageResult {
        let amount = amount.max(0);
        let before = self.current;
        self.current = (self.current - amount).max(0);
        DamageResult {
            damage_taken: before - self.current,
            dropped_to_zero: before > 0 && self.current == 0,
        }
    }

    /// Restore HP up to the maximum. Returns the amount actually healed.
    pub fn heal(&mut self, amount: i32) -> i32 {
        let old = self.current;
        self.current = (self.current + amount.max(0)).min(self.maximum);
        self.current - old
    }

    pub fn restore_full(&mut self) {
        self.current = self.maximum;
    }

    pub fn is_down(&self) -> bool {
        self.current <= 0
    }

    pub fn is_full(&self) -> bool {
        self.current >= self.maximum
    }
}

/// Result of taking damage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DamageResult {
    pub damage_taken: i32,
    pub dropped_to_zero: bool,
}

/// Hit dice pool; a character has one die per level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitDice {
    pub die: DieType,
    pub total: u8,
    pub remaining: u8,
}

impl HitDice {
    pub fn new(die: DieType, total: u8) -> Self {
        Self {
            die,
            total,
            remaining: total,
        }
    }

    /// Recover up to `count` spent dice. Returns how many came back.
    pub fn recover(&mut self, count: u8) -> u8 {
        let before = self.remaining;
        self.remaining = self.remaining.saturating_add(count).min(self.total);
        self.remaining - before
    }
}

// ============================================================================
// Spellcasting
// ============================================================================

/// Spell slot tracking for slot levels 1 through 9.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpellSlots {
    pub slots: [SlotInfo; 9],
}

impl SpellSlots {
    pub fn new() -> Self {
        Self {
            slots: [SlotInfo::default(); 9],
        }
    }

    /// Slots with the given totals (index 0 = 1st level), none used.
    pub fn with_totals(totals: [u8; 9]) -> Self {
        let mut slots = Self::new();
        slots.set_totals(totals);
        slots
    }

    pub fn get(&self, level: u8) -> Option<&SlotInfo> {
        if (1..=9).contains(&level) {
            self.slots.get(level as usize - 1)
        } else {
            None
        }
    }

    /// Remaining charges at a slot level.
    pub fn available(&self, level: u8) -> u8 {
        self.get(level).map(SlotInfo::available).unwrap_or(0)
    }

    /// Spend one slot. Returns false (and changes nothing) if none remain.
    pub fn use_slot(&mut self, level: u8) -> bool {
        if (1..=9).contains(&level) {
            let slot = &mut self.slots[level as usize - 1];
            if slot.available() > 0 {
                slot.used += 1;
                return true;
            }
        }
        false
    }

    pub fn recover_all(&mut self) {
        for slot in &mut self.slots {
            slot.used = 0;
        }
    }

    /// Replace totals, keeping expended slots expended where still possible.
    pub fn set_totals(&mut self, totals: [u8; 9]) {
        for (slot, total) in self.slots.iter_mut().zip(totals) {
            slot.total = total;
            slot.used = slot.used.min(total);
        }
    }

    pub fn total_available(&self) -> u32 {
        self.slots.iter().map(|s| s.available() as u32).sum()
    }
}

impl Default for SpellSlots {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SlotInfo {
    pub total: u8,
    pub used: u8,
}

impl SlotInfo {
    pub fn available(&self) -> u8 {
        self.total.saturating_sub(self.used)
    }
}

/// Spellcasting data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spellcasting {
    pub ability: Ability,
    pub known_spells: Vec<String>,
    pub prepared_spells: Vec<String>,
    pub cantrips: Vec<String>,
    pub spell_slots: SpellSlots,
}

impl Spellcasting {
    pub fn new(ability: Ability) -> Self {
        Self {
            ability,
            known_spells: Vec::new(),
            prepared_spells: Vec::new(),
            cantrips: Vec::new(),
            spell_slots: SpellSlots::new(),
        }
    }

    pub fn knows(&self, spell: &str) -> bool {
        contains_name(&self.known_spells, spell)
    }

    pub fn is_prepared(&self, spell: &str) -> bool {
        contains_name(&self.prepared_spells, spell)
    }

    pub fn is_cantrip(&self, spell: &str) -> bool {
        contains_name(&self.cantrips, spell)
    }

    /// Cantrips are always castable; other spells must be prepared.
    pub fn can_cast(&self, spell: &str) -> bool {
        self.is_cantrip(spell) || self.is_prepared(spell)
    }
}

fn contains_name(names: &[String], name: &str) -> bool {
    names.iter().any(|n| n.eq_ignore_ascii_case(name))
}

// ============================================================================
// Equipment and abilities
// ============================================================================

/// A weapon the character can attack with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Weapon {
    pub name: String,
    /// Damage dice before the ability modifier, e.g. "1d8".
    pub damage_dice: String,
}

impl Weapon {
    pub fn new(name: impl Into<String>, damage_dice: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            damage_dice: damage_dice.into(),
        }
    }

    /// Bare fists, used when a character has no weapon listed.
    pub fn unarmed() -> Self {
        Self::new("Unarmed Strike", "1")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recharge {
    ShortRest,
    LongRest,
}

/// Limited use tracking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureUses {
    pub current: u8,
    pub maximum: u8,
    pub recharge: Recharge,
}

/// A class or racial ability, optionally with limited uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialAbility {
    pub name: String,
    pub description: String,
    pub uses: Option<FeatureUses>,
}

impl SpecialAbility {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            uses: None,
        }
    }

    pub fn limited(mut self, maximum: u8, recharge: Recharge) -> Self {
        self.uses = Some(FeatureUses {
            current: maximum,
            maximum,
            recharge,
        });
        self
    }
}

/// One inventory line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryEntry {
    pub item: String,
    pub quantity: u32,
}

/// Ordered list of carried items.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    pub items: Vec<InventoryEntry>,
}

impl Inventory {
    /// Add items, stacking onto an existing line with the same identifier.
    pub fn add(&mut self, item: impl Into<String>, quantity: u32) {
        let item = item.into();
        if quantity == 0 {
            return;
        }
        match self
            .items
            .iter_mut()
            .find(|e| e.item.eq_ignore_ascii_case(&item))
        {
            Some(entry) => entry.quantity += quantity,
            None => self.items.push(InventoryEntry { item, quantity }),
        }
    }

    /// Remove items. Returns false (and changes nothing) if there are too few.
    pub fn remove(&mut self, item: &str, quantity: u32) -> bool {
        let Some(idx) = self
            .items
            .iter()
            .position(|e| e.item.eq_ignore_ascii_case(item))
        else {
            return false;
        };
        let entry = &mut self.items[idx];
        if entry.quantity < quantity {
            return false;
        }
        entry.quantity -= quantity;
        if entry.quantity == 0 {
            self.items.remove(idx);
        }
        true
    }

    pub fn quantity(&self, item: &str) -> u32 {
        self.items
            .iter()
            .find(|e| e.item.eq_ignore_ascii_case(item))
            .map(|e| e.quantity)
            .unwrap_or(0)
    }

    pub fn has(&self, item: &str) -> bool {
        self.quantity(item) > 0
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Trained saving throws and skills.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proficiencies {
    pub saves: HashSet<Ability>,
    pub skills: HashSet<Skill>,
}

// ============================================================================
// Character
// ============================================================================

/// A player character or companion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    pub id: CharacterId,
    pub name: String,
    pub class: String,
    pub race: String,
    pub level: u8,
    pub experience: u32,

    pub ability_scores: AbilityScores,
    pub hit_points: HitPoints,
    pub hit_dice: HitDice,
    pub armor_class: i32,

    pub proficiencies: Proficiencies,
    pub spellcasting: Option<Spellcasting>,
    pub weapons: Vec<Weapon>,
    pub special_abilities: Vec<SpecialAbility>,
    pub inventory: Inventory,
}

impl Character {
    /// A level 1 character of the given class with average scores.
    pub fn new(name: impl Into<String>, class: &ClassProfile) -> Self {
        let hp = class.hit_die.sides() as i32;
        Self {
            id: CharacterId::new(),
            name: name.into(),
            class: class.name.clone(),
            race: "Human".to_string(),
            level: 1,
            experience: 0,
            ability_scores: AbilityScores::default(),
            hit_points: HitPoints::new(hp),
            hit_dice: HitDice::new(class.hit_die, 1),
            armor_class: 10,
            proficiencies: Proficiencies {
                saves: class.saving_throws.iter().copied().collect(),
                skills: HashSet::new(),
            },
            spellcasting: class.spellcasting_ability.map(|ability| {
                let mut casting = Spellcasting::new(ability);
                casting.spell_slots = SpellSlots::with_totals(class.slot_progression.slots_at(1));
                casting
            }),
            weapons: Vec::new(),
            special_abilities: Vec::new(),
            inventory: Inventory::default(),
        }
    }

    pub fn proficiency_bonus(&self) -> i32 {
        proficiency_bonus(self.level)
    }

    pub fn modifier(&self, ability: Ability) -> i32 {
        self.ability_scores.modifier(ability)
    }

    pub fn initiative_modifier(&self) -> i32 {
        self.modifier(Ability::Dexterity)
    }

    /// Saving throw bonus, adding proficiency for trained saves.
    pub fn save_bonus(&self, ability: Ability) -> i32 {
        let ability_mod = self.modifier(ability);
        if self.proficiencies.saves.contains(&ability) {
            ability_mod + self.proficiency_bonus()
        } else {
            ability_mod
        }
    }

    pub fn skill_bonus(&self, skill: Skill) -> i32 {
        let ability_mod = self.modifier(skill.ability());
        if self.proficiencies.skills.contains(&skill) {
            ability_mod + self.proficiency_bonus()
        } else {
            ability_mod
        }
    }

    /// Attack bonus with weapons, using the class's primary ability.
    pub fn weapon_attack_bonus(&self, class: &ClassProfile) -> i32 {
        self.modifier(class.weapon_ability) + self.proficiency_bonus()
    }

    /// Flat damage added to weapon hits.
    pub fn weapon_damage_bonus(&self, class: &ClassProfile) -> i32 {
        self.modifier(class.weapon_ability)
    }

    pub fn spell_attack_bonus(&self) -> Option<i32> {
        self.spellcasting
            .as_ref()
            .map(|s| self.modifier(s.ability) + self.proficiency_bonus())
    }

    /// `8 + spellcasting modifier + proficiency bonus`.
    pub fn spell_save_dc(&self) -> Option<i32> {
        self.spell_attack_bonus().map(|bonus| 8 + bonus)
    }

    pub fn weapon(&self, name: &str) -> Option<&Weapon> {
        self.weapons
            .iter()
            .find(|w| w.name.eq_ignore_ascii_case(name))
    }

    /// The named weapon, the first listed weapon, or an unarmed strike.
    pub fn weapon_or_default(&self, name: Option<&str>) -> Option<Weapon> {
        match name {
            Some(name) => self.weapon(name).cloned(),
            None => Some(self.weapons.first().cloned().unwrap_or_else(Weapon::unarmed)),
        }
    }

    pub fn is_conscious(&self) -> bool {
        !self.hit_points.is_down()
    }
}

// ============================================================================
// Party
// ============================================================================

/// Which party member an action or effect concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartyMember {
    Player,
    Companion,
}

/// The player character and an optional companion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    pub player: Character,
    pub companion: Option<Character>,
}

impl Party {
    pub fn new(player: Character) -> Self {
        Self {
            player,
            companion: None,
        }
    }

    pub fn with_companion(mut self, companion: Character) -> Self {
        self.companion = Some(companion);
        self
    }

    pub fn member(&self, who: PartyMember) -> Option<&Character> {
        match who {
            PartyMember::Player => Some(&self.player),
            PartyMember::Companion => self.companion.as_ref(),
        }
    }

    pub fn member_mut(&mut self, who: PartyMember) -> Option<&mut Character> {
        match who {
            PartyMember::Player => Some(&mut self.player),
            PartyMember::Companion => self.companion.as_mut(),
        }
    }

    /// Members present in the party, player first.
    pub fn roster(&self) -> Vec<PartyMember> {
        let mut roster = vec![PartyMember::Player];
        if self.companion.is_some() {
            roster.push(PartyMember::Companion);
        }
        roster
    }

    pub fn members_mut(&mut self) -> impl Iterator<Item = &mut Character> {
        std::iter::once(&mut self.player).chain(self.companion.as_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::ClassBook;

    #[test]
    fn test_hit_points_clamp() {
        let mut hp = HitPoints::new(20);
        let result = hp.take_damage(25);
        assert_eq!(hp.current, 0);
        assert_eq!(result.damage_taken, 20);
        assert!(result.dropped_to_zero);

        let again = hp.take_damage(5);
        assert_eq!(hp.current, 0);
        assert!(!again.dropped_to_zero);

        assert_eq!(hp.heal(50), 20);
        assert_eq!(hp.current, 20);
    }

    #[test]
    fn test_spell_slots() {
        let mut slots = SpellSlots::with_totals([2, 1, 0, 0, 0, 0, 0, 0, 0]);
        assert!(slots.use_slot(1));
        assert!(slots.use_slot(1));
        assert!(!slots.use_slot(1));
        assert!(!slots.use_slot(3));
        assert!(!slots.use_slot(0));
        assert_eq!(slots.available(2), 1);
        slots.recover_all();
        assert_eq!(slots.available(1), 2);
    }

    #[test]
    fn test_set_totals_keeps_usage() {
        let mut slots = SpellSlots::with_totals([2, 0, 0, 0, 0, 0, 0, 0, 0]);
        slots.use_slot(1);
        slots.set_totals([3, 1, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(slots.available(1), 2);
        assert_eq!(slots.available(2), 1);
    }

    #[test]
    fn test_inventory_stacks_and_removes() {
        let mut inventory = Inventory::default();
        inventory.add("Healing Potion", 1);
        inventory.add("Rope", 1);
        inventory.add("healing potion", 2);
        assert_eq!(inventory.items.len(), 2);
        assert_eq!(inventory.quantity("Healing Potion"), 3);

        assert!(!inventory.remove("Healing Potion", 4));
        assert_eq!(inventory.quantity("Healing Potion"), 3);

        assert!(inventory.remove("Healing Potion", 3));
        assert!(!inventory.has("Healing Potion"));
        assert_eq!(inventory.items[0].item, "Rope");
    }

    #[test]
    fn test_derived_bonuses() {
        let classes = ClassBook::standard();
        let rogue_class = classes.get("Rogue");
        let mut rogue = Character::new("Vex", rogue_class);
        rogue.ability_scores = AbilityScores::new(8, 16, 12, 13, 10, 14);

        assert_eq!(rogue.save_bonus(Ability::Dexterity), 5);
        assert_eq!(rogue.save_bonus(Ability::Strength), -1);
        assert_eq!(rogue.weapon_attack_bonus(rogue_class), 5);

        let fighter = classes.get("Fighter");
        assert_eq!(rogue.weapon_attack_bonus(fighter), 1);
        assert!(rogue.spell_save_dc().is_none());
    }

    #[test]
    fn test_spell_save_dc() {
        let classes = ClassBook::standard();
        let mut wizard = Character::new("Elira", classes.get("Wizard"));
        wizard.ability_scores.intelligence = 16;
        assert_eq!(wizard.spell_attack_bonus(), Some(5));
        assert_eq!(wizard.spell_save_dc(), Some(13));
        let casting = wizard.spellcasting.as_ref().unwrap();
        assert_eq!(casting.spell_slots.available(1), 2);
    }

    #[test]
    fn test_party_roster() {
        let classes = ClassBook::standard();
        let party = Party::new(Character::new("A", classes.get("Fighter")));
        assert_eq!(party.roster(), vec![PartyMember::Player]);
        assert!(party.member(PartyMember::Companion).is_none());

        let party = party.with_companion(Character::new("B", classes.get("Cleric")));
        assert_eq!(party.roster().len(), 2);
    }
}
