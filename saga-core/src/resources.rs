//! Character resource lifecycle: experience, rests, spell slots and
//! spell preparation.

use crate::character::{Character, Party, Recharge};
use crate::config::{HitDiceRecovery, RulesConfig};
use crate::dice::{roll_die, DiceSource};
use crate::encounter::{Bestiary, Encounter, EnemyGroup};
use crate::error::{RulesError, RulesResult};
use crate::spells::{SpellBook, SpellData};
use crate::stats::{Ability, ClassBook, ClassProfile};
use serde::{Deserialize, Serialize};

// ============================================================================
// Experience
// ============================================================================

/// XP for one enemy of `kind`.
///
/// Encounter stat blocks win over the bestiary. Types found in neither use
/// the configured default.
pub fn enemy_xp(kind: &str, encounter: &Encounter, bestiary: &Bestiary, config: &RulesConfig) -> u32 {
    let profile = encounter
        .stat_blocks
        .iter()
        .find(|p| p.kind.eq_ignore_ascii_case(kind))
        .or_else(|| bestiary.find(kind));
    match profile {
        Some(profile) => profile.xp,
        None => {
            tracing::warn!(kind, xp = config.default_xp, "no XP value for enemy type, using default");
            config.default_xp
        }
    }
}

/// Total XP for a set of defeated enemy groups.
pub fn xp_reward(
    defeated: &[EnemyGroup],
    encounter: &Encounter,
    bestiary: &Bestiary,
    config: &RulesConfig,
) -> u32 {
    defeated
        .iter()
        .map(|group| enemy_xp(&group.kind, encounter, bestiary, config).saturating_mul(group.count))
        .fold(0u32, u32::saturating_add)
}

/// What an experience award changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperienceReport {
    pub amount: u32,
    pub total: u32,
    pub old_level: u8,
    pub new_level: u8,
    /// Maximum HP added across every level gained.
    pub hp_gained: i32,
}

impl ExperienceReport {
    pub fn leveled_up(&self) -> bool {
        self.new_level > self.old_level
    }

    pub fn levels_gained(&self) -> u8 {
        self.new_level - self.old_level
    }
}

/// Advance `character` by a single level.
///
/// Grows the hit-die pool by one, raises maximum and current HP by the
/// class's fixed per-level value plus the Constitution modifier (at least 1)
/// and resets slot totals to the class progression. Returns the HP gained.
pub fn level_up(character: &mut Character, class: &ClassProfile) -> i32 {
    character.level = character.level.saturating_add(1);

    let gain = (class.hit_die.average() + character.modifier(Ability::Constitution)).max(1);
    character.hit_points.maximum += gain;
    character.hit_points.current = (character.hit_points.current + gain).min(character.hit_points.maximum);

    character.hit_dice.total = character.hit_dice.total.saturating_add(1);
    character.hit_dice.remaining = character.hit_dice.remaining.saturating_add(1);

    if let Some(casting) = character.spellcasting.as_mut() {
        casting
            .spell_slots
            .set_totals(class.slot_progression.slots_at(character.level));
    }

    tracing::info!(
        character = %character.name,
        level = character.level,
        hp_gained = gain,
        "level up"
    );
    gain
}

/// Add experience, processing every level threshold crossed.
pub fn award_experience(
    character: &mut Character,
    amount: u32,
    classes: &ClassBook,
    config: &RulesConfig,
) -> ExperienceReport {
    let old_level = character.level;
    character.experience = character.experience.saturating_add(amount);

    let target = config.level_for_xp(character.experience);
    let class = classes.get(&character.class);
    let mut hp_gained = 0;
    while character.level < target {
        hp_gained += level_up(character, class);
    }

    tracing::debug!(
        character = %character.name,
        amount,
        total = character.experience,
        "experience awarded"
    );

    ExperienceReport {
        amount,
        total: character.experience,
        old_level,
        new_level: character.level,
        hp_gained,
    }
}

/// Fraction of the way from the current level's threshold to the next.
/// 1.0 once no higher level is configured.
pub fn xp_progress(character: &Character, config: &RulesConfig) -> f32 {
    let floor = config.xp_required(character.level).unwrap_or(0);
    let Some(next) = config.xp_required(character.level.saturating_add(1)) else {
        return 1.0;
    };
    if next <= floor {
        return 1.0;
    }
    let earned = character.experience.saturating_sub(floor);
    (earned as f32 / (next - floor) as f32).clamp(0.0, 1.0)
}

// ============================================================================
// Rests
// ============================================================================

/// Result of spending hit dice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitDiceReport {
    /// Raw face of each die spent.
    pub rolls: Vec<u32>,
    pub healed: i32,
    pub remaining: u8,
}

/// Spend `count` hit dice, healing `roll + CON` (at least 1) per die.
pub fn spend_hit_dice(
    character: &mut Character,
    count: u8,
    dice: &mut dyn DiceSource,
) -> RulesResult<HitDiceReport> {
    if count == 0 {
        return Err(RulesError::action("must spend at least one hit die"));
    }
    if count > character.hit_dice.remaining {
        return Err(RulesError::action(format!(
            "{} has {} hit dice left, cannot spend {}",
            character.name, character.hit_dice.remaining, count
        )));
    }

    let sides = i64::from(character.hit_dice.die.sides());
    let con = character.modifier(Ability::Constitution);
    let mut rolls = Vec::with_capacity(count as usize);
    let mut total = 0;
    for _ in 0..count {
        let face = roll_die(dice, sides)?;
        rolls.push(face);
        total += (face as i32 + con).max(1);
    }

    character.hit_dice.remaining -= count;
    let healed = character.hit_points.heal(total);
    tracing::info!(
        character = %character.name,
        spent = count,
        healed,
        remaining = character.hit_dice.remaining,
        "hit dice spent"
    );

    Ok(HitDiceReport {
        rolls,
        healed,
        remaining: character.hit_dice.remaining,
    })
}

/// Restore what a short rest gives back besides spent hit dice.
pub fn short_rest_recovery(character: &mut Character, class: &ClassProfile) {
    for ability in &mut character.special_abilities {
        if let Some(uses) = ability.uses.as_mut() {
            if uses.recharge == Recharge::ShortRest {
                uses.current = uses.maximum;
            }
        }
    }
    if class.short_rest_restores_slots() {
        if let Some(casting) = character.spellcasting.as_mut() {
            casting.spell_slots.recover_all();
        }
    }
}

/// Apply a short rest to every party member.
pub fn short_rest(party: &mut Party, classes: &ClassBook) {
    for member in party.members_mut() {
        let class = classes.get(&member.class);
        short_rest_recovery(member, class);
    }
    tracing::info!("short rest finished");
}

/// Hit dice a long rest gives back for a pool of `total`.
pub fn long_rest_hit_dice(total: u8, recovery: HitDiceRecovery) -> u8 {
    match recovery {
        HitDiceRecovery::Half => (total / 2).max(1),
        HitDiceRecovery::All => total,
    }
}

/// Fully rest one character.
pub fn long_rest_recovery(character: &mut Character, config: &RulesConfig) {
    character.hit_points.restore_full();
    let recovered = long_rest_hit_dice(character.hit_dice.total, config.hit_dice_recovery);
    character.hit_dice.recover(recovered);
    if let Some(casting) = character.spellcasting.as_mut() {
        casting.spell_slots.recover_all();
    }
    for ability in &mut character.special_abilities {
        if let Some(uses) = ability.uses.as_mut() {
            uses.current = uses.maximum;
        }
    }
}

/// Long rest for the whole party, including members at 0 HP.
pub fn long_rest(party: &mut Party, config: &RulesConfig) {
    for member in party.members_mut() {
        long_rest_recovery(member, config);
    }
    tracing::info!(
        hp = party.player.hit_points.current,
        "long rest finished"
    );
}

// ============================================================================
// Spell slots and preparation
// ============================================================================

/// Spend one slot of `level`, refusing when none is left.
pub fn expend_spell_slot(character: &mut Character, level: u8) -> RulesResult<()> {
    let name = character.name.clone();
    let casting = character
        .spellcasting
        .as_mut()
        .ok_or_else(|| RulesError::action(format!("{name} cannot cast spells")))?;
    if !(1..=9).contains(&level) {
        return Err(RulesError::action(format!("no level {level} spell slots exist")));
    }
    if !casting.spell_slots.use_slot(level) {
        return Err(RulesError::action(format!(
            "{name} has no level {level} spell slots remaining"
        )));
    }
    Ok(())
}

/// The slot level a cast would spend: `None` for cantrips, otherwise the
/// requested level (or the spell's own) once a slot of it is confirmed free.
pub fn slot_for_cast(
    character: &Character,
    spell: &SpellData,
    requested: Option<u8>,
) -> RulesResult<Option<u8>> {
    let casting = character
        .spellcasting
        .as_ref()
        .ok_or_else(|| RulesError::action(format!("{} cannot cast spells", character.name)))?;
    if !casting.can_cast(&spell.name) {
        return Err(RulesError::action(format!(
            "{} has not prepared {}",
            character.name, spell.name
        )));
    }
    if spell.is_cantrip() || casting.is_cantrip(&spell.name) {
        return Ok(None);
    }
    let level = requested.unwrap_or(spell.level);
    if level < spell.level || level > 9 {
        return Err(RulesError::action(format!(
            "{} cannot be cast with a level {level} slot",
            spell.name
        )));
    }
    if casting.spell_slots.available(level) == 0 {
        return Err(RulesError::action(format!(
            "{} has no level {level} spell slots remaining",
            character.name
        )));
    }
    Ok(Some(level))
}

/// Prepared-spell cap: spellcasting modifier plus level, at least 1.
pub fn max_prepared_spells(character: &Character) -> usize {
    let Some(casting) = character.spellcasting.as_ref() else {
        return 0;
    };
    (character.modifier(casting.ability) + i32::from(character.level)).max(1) as usize
}

/// Prepare a known, levelled spell. Preparing an already prepared spell
/// changes nothing.
pub fn prepare_spell(character: &mut Character, spell: &str, spells: &SpellBook) -> RulesResult<()> {
    let cap = max_prepared_spells(character);
    let name = character.name.clone();
    let casting = character
        .spellcasting
        .as_mut()
        .ok_or_else(|| RulesError::action(format!("{name} cannot cast spells")))?;

    if casting.is_cantrip(spell) || spells.find(spell).is_some_and(|s| s.is_cantrip()) {
        return Err(RulesError::action(format!(
            "{spell} is a cantrip and needs no preparation"
        )));
    }
    if !casting.knows(spell) {
        return Err(RulesError::action(format!("{name} does not know {spell}")));
    }
    if casting.is_prepared(spell) {
        return Ok(());
    }
    if casting.prepared_spells.len() >= cap {
        return Err(RulesError::action(format!(
            "{name} already has {cap} spells prepared"
        )));
    }

    casting.prepared_spells.push(spell.to_string());
    tracing::debug!(character = %name, spell, "spell prepared");
    Ok(())
}

pub fn unprepare_spell(character: &mut Character, spell: &str) -> RulesResult<()> {
    let name = character.name.clone();
    let casting = character
        .spellcasting
        .as_mut()
        .ok_or_else(|| RulesError::action(format!("{name} cannot cast spells")))?;
    let Some(idx) = casting
        .prepared_spells
        .iter()
        .position(|s| s.eq_ignore_ascii_case(spell))
    else {
        return Err(RulesError::action(format!("{spell} is not prepared")));
    };
    casting.prepared_spells.remove(idx);
    Ok(())
}
