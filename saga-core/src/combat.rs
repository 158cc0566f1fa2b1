//! Turn-based combat between the party and an encounter's enemies.
//!
//! The engine moves through `Idle -> Active -> Resolved`. Starting an
//! encounter rolls initiative and materializes a [`CombatantState`] for every
//! party member and enemy; each call to [`CombatEngine::play_round`] resolves
//! the party's declared actions and then the surviving enemies' turns.
//!
//! A round is validated completely before anything is rolled, then resolved
//! against copies of the party and combatant states that are only committed
//! when the round finishes. A refused round changes nothing.

use crate::character::{Character, Party, PartyMember, Weapon};
use crate::check::{resolve_check, CheckKind};
use crate::config::{Rulebook, RulesConfig};
use crate::dice::{roll_check, roll_die, Advantage, CheckRoll, DiceExpression, DiceSource};
use crate::encounter::{Encounter, EnemyGroup, EnemyProfile, TargetPolicy};
use crate::error::{RulesError, RulesResult};
use crate::items::{ConsumableItem, ItemEffect};
use crate::spells::{SpellData, SpellEffect, SpellResolution, TargetShape};
use crate::stats::Ability;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifies one combatant within an encounter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CombatantId(pub Uuid);

impl CombatantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CombatantId {
    fn default() -> Self {
        Self::new()
    }
}

/// Which side a combatant fights on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Party(PartyMember),
    Enemy,
}

/// Live, per-fight state of one combatant.
///
/// Party members' hit points live on their [`Character`]; the copy here is
/// refreshed after every round so the whole fight can be read from one list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombatantState {
    pub id: CombatantId,
    pub name: String,
    pub side: Side,
    pub current_hp: i32,
    pub max_hp: i32,
    pub armor_class: i32,
    pub initiative: i32,
    pub initiative_modifier: i32,
    /// Stat block for enemies.
    pub profile: Option<EnemyProfile>,
    /// Index into the enemy's attack list, used round-robin.
    pub next_attack: usize,
}

impl CombatantState {
    fn from_character(character: &Character, member: PartyMember, initiative: i32) -> Self {
        Self {
            id: CombatantId::new(),
            name: character.name.clone(),
            side: Side::Party(member),
            current_hp: character.hit_points.current,
            max_hp: character.hit_points.maximum,
            armor_class: character.armor_class,
            initiative,
            initiative_modifier: character.initiative_modifier(),
            profile: None,
            next_attack: 0,
        }
    }

    fn from_profile(profile: EnemyProfile, name: String, initiative: i32) -> Self {
        Self {
            id: CombatantId::new(),
            name,
            side: Side::Enemy,
            current_hp: profile.max_hp,
            max_hp: profile.max_hp,
            armor_class: profile.armor_class,
            initiative,
            initiative_modifier: profile.initiative_modifier,
            profile: Some(profile),
            next_attack: 0,
        }
    }

    pub fn is_enemy(&self) -> bool {
        self.side == Side::Enemy
    }

    pub fn is_down(&self) -> bool {
        self.current_hp <= 0
    }

    /// Enemy type, if this is an enemy.
    pub fn kind(&self) -> Option<&str> {
        self.profile.as_ref().map(|p| p.kind.as_str())
    }

    fn take_damage(&mut self, amount: i32) -> bool {
        let was_up = !self.is_down();
        self.current_hp = (self.current_hp - amount.max(0)).max(0);
        was_up && self.is_down()
    }
}

// ============================================================================
// Actions
// ============================================================================

/// Who a spell is aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    Enemy(CombatantId),
    Ally(PartyMember),
}

/// What a party member does on their turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CombatAction {
    /// Weapon attack. `None` uses the first listed weapon, or bare hands.
    Attack {
        weapon: Option<String>,
        target: CombatantId,
    },
    /// Cast a spell. Levelled spells use `slot_level`, defaulting to the
    /// spell's own level.
    CastSpell {
        spell: String,
        slot_level: Option<u8>,
        targets: Vec<Target>,
    },
    UseItem {
        item: String,
        target: PartyMember,
    },
    Flee,
}

/// A declared action for one party member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyAction {
    pub actor: PartyMember,
    pub action: CombatAction,
}

impl PartyAction {
    pub fn new(actor: PartyMember, action: CombatAction) -> Self {
        Self { actor, action }
    }

    pub fn attack(actor: PartyMember, target: CombatantId) -> Self {
        Self::new(
            actor,
            CombatAction::Attack {
                weapon: None,
                target,
            },
        )
    }

    pub fn cast(actor: PartyMember, spell: impl Into<String>, targets: Vec<Target>) -> Self {
        Self::new(
            actor,
            CombatAction::CastSpell {
                spell: spell.into(),
                slot_level: None,
                targets,
            },
        )
    }

    pub fn use_item(actor: PartyMember, item: impl Into<String>, target: PartyMember) -> Self {
        Self::new(
            actor,
            CombatAction::UseItem {
                item: item.into(),
                target,
            },
        )
    }

    pub fn flee(actor: PartyMember) -> Self {
        Self::new(actor, CombatAction::Flee)
    }
}

/// An action that passed validation, with its table lookups done.
#[derive(Debug, Clone)]
enum PlannedAction {
    Attack {
        actor: PartyMember,
        weapon: Weapon,
        damage: DiceExpression,
        attack_bonus: i32,
        target: CombatantId,
    },
    Cast {
        actor: PartyMember,
        spell: SpellData,
        slot_level: Option<u8>,
        targets: Vec<Target>,
    },
    UseItem {
        actor: PartyMember,
        item: ConsumableItem,
        target: PartyMember,
    },
    Flee {
        actor: PartyMember,
    },
}

// ============================================================================
// Events and outcomes
// ============================================================================

/// How an encounter ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeKind {
    Victory,
    Defeat,
    Fled,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeKind::Victory => write!(f, "Victory"),
            OutcomeKind::Defeat => write!(f, "Defeat"),
            OutcomeKind::Fled => write!(f, "Fled"),
        }
    }
}

/// Terminal record of an encounter, handed back to the narrative layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncounterOutcome {
    pub kind: OutcomeKind,
    /// Enemies defeated before the end, grouped by type.
    pub defeated: Vec<EnemyGroup>,
    pub next_scene: String,
    pub rounds: u32,
}

/// One line of the combat log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CombatEvent {
    Initiative {
        name: String,
        roll: CheckRoll,
    },
    AttackHit {
        attacker: String,
        target: String,
        with: String,
        roll: CheckRoll,
        damage: i32,
        critical: bool,
    },
    AttackMissed {
        attacker: String,
        target: String,
        with: String,
        roll: CheckRoll,
    },
    SpellCast {
        caster: String,
        spell: String,
        slot_level: Option<u8>,
    },
    SavingThrow {
        target: String,
        roll: CheckRoll,
        dc: i32,
        saved: bool,
    },
    SpellDamage {
        spell: String,
        target: String,
        damage: i32,
    },
    Healed {
        source: String,
        target: String,
        amount: i32,
    },
    HitDiceRestored {
        target: String,
        amount: u8,
    },
    ItemUsed {
        user: String,
        item: String,
    },
    /// The declared target fell earlier in the round, or no enemy is left
    /// to flee from.
    NoTarget {
        actor: String,
    },
    Defeated {
        name: String,
    },
    Down {
        name: String,
    },
    FleeAttempt {
        name: String,
        roll: Option<CheckRoll>,
        escaped: bool,
    },
    EncounterEnded {
        outcome: OutcomeKind,
    },
}

impl fmt::Display for CombatEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CombatEvent::Initiative { name, roll } => {
                write!(f, "{name} rolls initiative: {roll}")
            }
            CombatEvent::AttackHit {
                attacker,
                target,
                with,
                roll,
                damage,
                critical,
            } => {
                let crit = if *critical { " Critical hit!" } else { "" };
                write!(
                    f,
                    "{attacker} hits {target} with {with} ({roll}) for {damage} damage.{crit}"
                )
            }
            CombatEvent::AttackMissed {
                attacker,
                target,
                with,
                roll,
            } => write!(f, "{attacker} misses {target} with {with} ({roll})."),
            CombatEvent::SpellCast {
                caster,
                spell,
                slot_level,
            } => match slot_level {
                Some(level) => write!(f, "{caster} casts {spell} (level {level} slot)."),
                None => write!(f, "{caster} casts {spell}."),
            },
            CombatEvent::SavingThrow {
                target,
                roll,
                dc,
                saved,
            } => {
                let result = if *saved { "saves" } else { "fails" };
                write!(f, "{target} {result} against DC {dc} ({roll}).")
            }
            CombatEvent::SpellDamage {
                spell,
                target,
                damage,
            } => write!(f, "{spell} deals {damage} damage to {target}."),
            CombatEvent::Healed {
                source,
                target,
                amount,
            } => write!(f, "{source} restores {amount} HP to {target}."),
            CombatEvent::HitDiceRestored { target, amount } => {
                write!(f, "{target} recovers {amount} hit dice.")
            }
            CombatEvent::ItemUsed { user, item } => write!(f, "{user} uses {item}."),
            CombatEvent::NoTarget { actor } => {
                write!(f, "{actor}'s target has already fallen.")
            }
            CombatEvent::Defeated { name } => write!(f, "{name} is defeated!"),
            CombatEvent::Down { name } => write!(f, "{name} falls unconscious!"),
            CombatEvent::FleeAttempt {
                name,
                roll,
                escaped,
            } => match (roll, escaped) {
                (None, _) => write!(f, "{name} flees."),
                (Some(roll), true) => write!(f, "{name} escapes ({roll})."),
                (Some(roll), false) => write!(f, "{name} fails to escape ({roll})."),
            },
            CombatEvent::EncounterEnded { outcome } => write!(f, "Combat ends: {outcome}."),
        }
    }
}

/// What happened during one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundReport {
    pub round: u32,
    pub events: Vec<CombatEvent>,
    /// Set when the round ended the encounter.
    pub outcome: Option<EncounterOutcome>,
}

// ============================================================================
// Engine
// ============================================================================

/// Lifecycle of the combat engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CombatPhase {
    Idle,
    Active,
    Resolved(EncounterOutcome),
}

/// The combat state machine. Holds at most one live encounter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombatEngine {
    phase: CombatPhase,
    encounter: Option<Encounter>,
    /// Everyone still in the fight, in initiative order.
    combatants: Vec<CombatantState>,
    defeated: Vec<EnemyGroup>,
    round: u32,
    log: Vec<CombatEvent>,
}

impl Default for CombatEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CombatEngine {
    pub fn new() -> Self {
        Self {
            phase: CombatPhase::Idle,
            encounter: None,
            combatants: Vec::new(),
            defeated: Vec::new(),
            round: 0,
            log: Vec::new(),
        }
    }

    pub fn phase(&self) -> &CombatPhase {
        &self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase == CombatPhase::Active
    }

    pub fn outcome(&self) -> Option<&EncounterOutcome> {
        match &self.phase {
            CombatPhase::Resolved(outcome) => Some(outcome),
            _ => None,
        }
    }

    /// The template of the current or most recent encounter.
    pub fn encounter(&self) -> Option<&Encounter> {
        self.encounter.as_ref()
    }

    /// Everyone still in the fight, in initiative order.
    pub fn combatants(&self) -> &[CombatantState] {
        &self.combatants
    }

    /// Surviving enemies in initiative order.
    pub fn enemies(&self) -> impl Iterator<Item = &CombatantState> {
        self.combatants.iter().filter(|c| c.is_enemy())
    }

    pub fn combatant(&self, id: CombatantId) -> Option<&CombatantState> {
        self.combatants.iter().find(|c| c.id == id)
    }

    /// Number of completed rounds.
    pub fn round(&self) -> u32 {
        self.round
    }

    /// Every event since the encounter started.
    pub fn log(&self) -> &[CombatEvent] {
        &self.log
    }

    /// Begin `encounter`, discarding any previous fight entirely.
    pub fn start(
        &mut self,
        encounter: Encounter,
        party: &Party,
        rules: &Rulebook,
        dice: &mut dyn DiceSource,
    ) -> Vec<CombatEvent> {
        let mut combatants = Vec::new();
        let mut events = Vec::new();

        for member in party.roster() {
            if let Some(character) = party.member(member) {
                let roll = roll_check(dice, character.initiative_modifier());
                events.push(CombatEvent::Initiative {
                    name: character.name.clone(),
                    roll,
                });
                combatants.push(CombatantState::from_character(character, member, roll.total));
            }
        }

        for group in &encounter.enemies {
            let profile = encounter.profile(&group.kind, &rules.bestiary);
            for n in 1..=group.count {
                let name = if group.count > 1 {
                    format!("{} {}", profile.name, n)
                } else {
                    profile.name.clone()
                };
                let roll = roll_check(dice, profile.initiative_modifier);
                events.push(CombatEvent::Initiative {
                    name: name.clone(),
                    roll,
                });
                combatants.push(CombatantState::from_profile(profile.clone(), name, roll.total));
            }
        }

        // Highest initiative first, modifier breaks ties.
        combatants.sort_by(|a, b| {
            b.initiative
                .cmp(&a.initiative)
                .then_with(|| b.initiative_modifier.cmp(&a.initiative_modifier))
        });

        tracing::info!(
            encounter = %encounter.name,
            enemies = encounter.enemy_count(),
            "encounter started"
        );

        self.phase = CombatPhase::Active;
        self.encounter = Some(encounter);
        self.combatants = combatants;
        self.defeated = Vec::new();
        self.round = 0;
        self.log = events.clone();
        events
    }

    /// Abandon an active encounter without an outcome.
    pub fn end_encounter(&mut self) -> RulesResult<()> {
        match self.phase {
            CombatPhase::Active => {
                tracing::info!(round = self.round, "encounter abandoned");
                self.phase = CombatPhase::Idle;
                self.combatants.clear();
                self.defeated.clear();
                Ok(())
            }
            CombatPhase::Idle => Err(RulesError::transition("no encounter is in progress")),
            CombatPhase::Resolved(_) => {
                Err(RulesError::transition("the encounter has already ended"))
            }
        }
    }

    /// Resolve one full round: the party's actions, then the enemies'.
    pub fn play_round(
        &mut self,
        party: &mut Party,
        actions: &[PartyAction],
        rules: &Rulebook,
        dice: &mut dyn DiceSource,
    ) -> RulesResult<RoundReport> {
        if !self.is_active() {
            return Err(RulesError::transition("no active encounter to advance"));
        }
        let encounter = self
            .encounter
            .clone()
            .ok_or_else(|| RulesError::transition("no active encounter to advance"))?;
        let plan = self.validate(party, actions, &encounter, rules)?;

        let mut round = RoundState {
            party: party.clone(),
            combatants: self.combatants.clone(),
            defeated: self.defeated.clone(),
            events: Vec::new(),
            fled: false,
            config: &rules.config,
        };
        let number = self.round + 1;
        let kind = round.resolve(plan, dice)?;

        let outcome = kind.map(|kind| {
            round.events.push(CombatEvent::EncounterEnded { outcome: kind });
            let next_scene = match kind {
                OutcomeKind::Victory => encounter.victory_scene.clone(),
                OutcomeKind::Defeat => encounter.defeat_scene.clone(),
                OutcomeKind::Fled => encounter.flee_scene.clone().unwrap_or_default(),
            };
            EncounterOutcome {
                kind,
                defeated: round.defeated.clone(),
                next_scene,
                rounds: number,
            }
        });

        // Commit.
        round.sync_party_hp();
        *party = round.party;
        self.combatants = round.combatants;
        self.defeated = round.defeated;
        self.round = number;
        self.log.extend(round.events.iter().cloned());
        if let Some(outcome) = &outcome {
            tracing::info!(
                encounter = %encounter.name,
                outcome = %outcome.kind,
                rounds = number,
                "encounter resolved"
            );
            self.phase = CombatPhase::Resolved(outcome.clone());
        }

        Ok(RoundReport {
            round: number,
            events: round.events,
            outcome,
        })
    }

    /// Check every declared action against the current state.
    fn validate(
        &self,
        party: &Party,
        actions: &[PartyAction],
        encounter: &Encounter,
        rules: &Rulebook,
    ) -> RulesResult<Vec<PlannedAction>> {
        let mut plan = Vec::with_capacity(actions.len());
        let mut acted = Vec::new();

        for declared in actions {
            let actor = declared.actor;
            let character = party
                .member(actor)
                .ok_or_else(|| RulesError::action(format!("{actor:?} is not in the party")))?;
            if !character.is_conscious() {
                return Err(RulesError::action(format!(
                    "{} is down and cannot act",
                    character.name
                )));
            }
            if acted.contains(&actor) {
                return Err(RulesError::action(format!(
                    "{} has already acted this round",
                    character.name
                )));
            }
            acted.push(actor);

            let planned = match &declared.action {
                CombatAction::Attack { weapon, target } => {
                    self.live_enemy(*target)?;
                    let weapon = character.weapon_or_default(weapon.as_deref()).ok_or_else(|| {
                        RulesError::action(format!(
                            "{} has no weapon named {}",
                            character.name,
                            weapon.as_deref().unwrap_or_default()
                        ))
                    })?;
                    let class = rules.classes.get(&character.class);
                    let damage = weapon_damage(&weapon).plus(character.weapon_damage_bonus(class));
                    PlannedAction::Attack {
                        actor,
                        attack_bonus: character.weapon_attack_bonus(class),
                        weapon,
                        damage,
                        target: *target,
                    }
                }
                CombatAction::CastSpell {
                    spell,
                    slot_level,
                    targets,
                } => self.validate_spell(party, character, actor, spell, *slot_level, targets, rules)?,
                CombatAction::UseItem { item, target } => {
                    if !character.inventory.has(item) {
                        return Err(RulesError::action(format!(
                            "{} has no {item}",
                            character.name
                        )));
                    }
                    let item = rules
                        .items
                        .get(item)
                        .cloned()
                        .ok_or_else(|| RulesError::action(format!("{item} cannot be used")))?;
                    if party.member(*target).is_none() {
                        return Err(RulesError::action(format!("{target:?} is not in the party")));
                    }
                    PlannedAction::UseItem {
                        actor,
                        item,
                        target: *target,
                    }
                }
                CombatAction::Flee => {
                    if encounter.flee_scene.is_none() {
                        return Err(RulesError::action("there is no escape from this fight"));
                    }
                    PlannedAction::Flee { actor }
                }
            };
            plan.push(planned);
        }

        Ok(plan)
    }

    #[allow(clippy::too_many_arguments)]
    fn validate_spell(
        &self,
        party: &Party,
        caster: &Character,
        actor: PartyMember,
        spell_name: &str,
        slot_level: Option<u8>,
        targets: &[Target],
        rules: &Rulebook,
    ) -> RulesResult<PlannedAction> {
        if caster.spellcasting.is_none() {
            return Err(RulesError::action(format!("{} cannot cast spells", caster.name)));
        }
        let spell = rules.spells.get(spell_name);
        let slot_level = crate::resources::slot_for_cast(caster, &spell, slot_level)?;

        let targets = match (&spell.effect, spell.shape) {
            (SpellEffect::Utility, _) => Vec::new(),
            (_, TargetShape::AllEnemies) => Vec::new(),
            (_, TargetShape::Ally) => {
                let target = match targets {
                    [] => Target::Ally(actor),
                    [Target::Ally(member)] => Target::Ally(*member),
                    _ => {
                        return Err(RulesError::action(format!(
                            "{} targets a single ally",
                            spell.name
                        )))
                    }
                };
                if let Target::Ally(member) = target {
                    if party.member(member).is_none() {
                        return Err(RulesError::action(format!("{member:?} is not in the party")));
                    }
                }
                vec![target]
            }
            (_, shape) => {
                let max = match shape {
                    TargetShape::Multiple(n) => usize::from(n),
                    _ => 1,
                };
                if targets.is_empty() || targets.len() > max {
                    return Err(RulesError::action(format!(
                        "{} needs between 1 and {max} enemy targets",
                        spell.name
                    )));
                }
                for target in targets {
                    match target {
                        Target::Enemy(id) => {
                            self.live_enemy(*id)?;
                        }
                        Target::Ally(_) => {
                            return Err(RulesError::action(format!(
                                "{} must target enemies",
                                spell.name
                            )))
                        }
                    }
                }
                targets.to_vec()
            }
        };

        Ok(PlannedAction::Cast {
            actor,
            spell,
            slot_level,
            targets,
        })
    }

    fn live_enemy(&self, id: CombatantId) -> RulesResult<&CombatantState> {
        match self.combatant(id) {
            Some(c) if c.is_enemy() && !c.is_down() => Ok(c),
            Some(c) if !c.is_enemy() => Err(RulesError::action(format!("{} is an ally", c.name))),
            _ => Err(RulesError::action("that enemy has already been defeated")),
        }
    }
}

/// Parse a weapon's damage notation, falling back to 1d4.
fn weapon_damage(weapon: &Weapon) -> DiceExpression {
    DiceExpression::parse(&weapon.damage_dice).unwrap_or_else(|err| {
        tracing::warn!(weapon = %weapon.name, %err, "bad weapon damage, using 1d4");
        DiceExpression::new(1, crate::dice::DieType::D4, 0)
    })
}

/// Apply a consumable's effect to `recipient` and describe what happened.
pub(crate) fn apply_item(
    recipient: &mut Character,
    item: &ConsumableItem,
    dice: &mut dyn DiceSource,
) -> CombatEvent {
    match &item.effect {
        ItemEffect::Heal(expr) => {
            let amount = recipient.hit_points.heal(expr.roll(dice).total.max(0));
            CombatEvent::Healed {
                source: item.name.clone(),
                target: recipient.name.clone(),
                amount,
            }
        }
        ItemEffect::RestoreHitDice(count) => CombatEvent::HitDiceRestored {
            target: recipient.name.clone(),
            amount: recipient.hit_dice.recover(*count),
        },
    }
}

/// Whether an attack roll lands, and whether it is a critical hit.
fn attack_lands(roll: &CheckRoll, armor_class: i32, config: &RulesConfig) -> (bool, bool) {
    if roll.is_natural_1() {
        return (false, false);
    }
    if config.natural_twenty_crits && roll.is_natural_20() {
        return (true, true);
    }
    (roll.total >= armor_class, false)
}

/// Working copy of everything a round may change.
struct RoundState<'a> {
    party: Party,
    combatants: Vec<CombatantState>,
    defeated: Vec<EnemyGroup>,
    events: Vec<CombatEvent>,
    fled: bool,
    config: &'a RulesConfig,
}

impl RoundState<'_> {
    fn resolve(
        &mut self,
        plan: Vec<PlannedAction>,
        dice: &mut dyn DiceSource,
    ) -> RulesResult<Option<OutcomeKind>> {
        for action in plan {
            self.resolve_action(action, dice)?;
            if self.fled {
                break;
            }
        }

        self.remove_defeated();
        if let Some(outcome) = self.terminal() {
            return Ok(Some(outcome));
        }

        self.enemy_turns(dice)?;
        Ok(self.terminal())
    }

    fn terminal(&self) -> Option<OutcomeKind> {
        if self.party.player.hit_points.is_down() {
            Some(OutcomeKind::Defeat)
        } else if !self.enemies_standing() {
            Some(OutcomeKind::Victory)
        } else if self.fled {
            Some(OutcomeKind::Fled)
        } else {
            None
        }
    }

    fn enemies_standing(&self) -> bool {
        self.combatants.iter().any(|c| c.is_enemy() && !c.is_down())
    }

    fn member(&self, who: PartyMember) -> RulesResult<&Character> {
        self.party
            .member(who)
            .ok_or_else(|| RulesError::action(format!("{who:?} is not in the party")))
    }

    fn member_mut(&mut self, who: PartyMember) -> RulesResult<&mut Character> {
        self.party
            .member_mut(who)
            .ok_or_else(|| RulesError::action(format!("{who:?} is not in the party")))
    }

    fn enemy_mut(&mut self, id: CombatantId) -> Option<&mut CombatantState> {
        self.combatants
            .iter_mut()
            .find(|c| c.id == id && c.is_enemy() && !c.is_down())
    }

    fn resolve_action(&mut self, action: PlannedAction, dice: &mut dyn DiceSource) -> RulesResult<()> {
        match action {
            PlannedAction::Attack {
                actor,
                weapon,
                damage,
                attack_bonus,
                target,
            } => {
                let attacker = self.member(actor)?.name.clone();
                let config = self.config;
                let Some(enemy) = self.enemy_mut(target) else {
                    self.events.push(CombatEvent::NoTarget { actor: attacker });
                    return Ok(());
                };
                let roll = roll_check(dice, attack_bonus);
                let (hit, critical) = attack_lands(&roll, enemy.armor_class, config);
                let target_name = enemy.name.clone();
                if !hit {
                    tracing::debug!(%attacker, target = %target_name, total = roll.total, "attack missed");
                    self.events.push(CombatEvent::AttackMissed {
                        attacker,
                        target: target_name,
                        with: weapon.name,
                        roll,
                    });
                    return Ok(());
                }
                let expr = if critical { damage.doubled_dice() } else { damage };
                let amount = expr.roll(dice).total.max(0);
                let dropped = enemy.take_damage(amount);
                tracing::debug!(%attacker, target = %target_name, damage = amount, critical, "attack hit");
                self.events.push(CombatEvent::AttackHit {
                    attacker,
                    target: target_name.clone(),
                    with: weapon.name,
                    roll,
                    damage: amount,
                    critical,
                });
                if dropped {
                    self.events.push(CombatEvent::Defeated { name: target_name });
                }
            }
            PlannedAction::Cast {
                actor,
                spell,
                slot_level,
                targets,
            } => self.resolve_spell(actor, spell, slot_level, targets, dice)?,
            PlannedAction::UseItem {
                actor,
                item,
                target,
            } => {
                let user = self.member_mut(actor)?;
                if !user.inventory.remove(&item.name, 1) {
                    return Err(RulesError::action(format!("{} has no {}", user.name, item.name)));
                }
                let user = user.name.clone();
                self.events.push(CombatEvent::ItemUsed {
                    user,
                    item: item.name.clone(),
                });
                let recipient = self.member_mut(target)?;
                let effect = apply_item(recipient, &item, dice);
                self.events.push(effect);
            }
            PlannedAction::Flee { actor } => {
                if !self.enemies_standing() {
                    let name = self.member(actor)?.name.clone();
                    self.events.push(CombatEvent::NoTarget { actor: name });
                    return Ok(());
                }
                let pursued = self
                    .combatants
                    .iter()
                    .any(|c| c.is_enemy() && !c.is_down() && c.profile.as_ref().is_some_and(|p| p.pursues));
                let character = self.member(actor)?;
                let name = character.name.clone();
                if pursued {
                    let check = resolve_check(
                        character,
                        CheckKind::Ability(Ability::Dexterity),
                        self.config.flee_dc,
                        Advantage::Normal,
                        self.config,
                        dice,
                    );
                    let escaped = check.outcome.is_success();
                    self.events.push(CombatEvent::FleeAttempt {
                        name,
                        roll: Some(check.roll),
                        escaped,
                    });
                    self.fled = escaped;
                } else {
                    self.events.push(CombatEvent::FleeAttempt {
                        name,
                        roll: None,
                        escaped: true,
                    });
                    self.fled = true;
                }
            }
        }
        Ok(())
    }

    fn resolve_spell(
        &mut self,
        actor: PartyMember,
        spell: SpellData,
        slot_level: Option<u8>,
        targets: Vec<Target>,
        dice: &mut dyn DiceSource,
    ) -> RulesResult<()> {
        let caster = self.member_mut(actor)?;
        if let Some(level) = slot_level {
            crate::resources::expend_spell_slot(caster, level)?;
        }
        let caster_name = caster.name.clone();
        let caster_level = caster.level;
        let attack_bonus = caster.spell_attack_bonus().unwrap_or(0);
        let save_dc = caster.spell_save_dc().unwrap_or(10);
        let casting_mod = caster
            .spellcasting
            .as_ref()
            .map(|s| caster.modifier(s.ability))
            .unwrap_or(0);

        tracing::debug!(caster = %caster_name, spell = %spell.name, ?slot_level, "spell cast");
        self.events.push(CombatEvent::SpellCast {
            caster: caster_name.clone(),
            spell: spell.name.clone(),
            slot_level,
        });
        let cast_level = slot_level.unwrap_or(spell.level);

        match &spell.effect {
            SpellEffect::Utility => {}
            SpellEffect::Healing { dice: base, add_modifier } => {
                let expr = spell.scaled_dice(base, caster_level, cast_level);
                let bonus = if *add_modifier { casting_mod } else { 0 };
                for target in targets {
                    if let Target::Ally(member) = target {
                        let amount = (expr.roll(dice).total + bonus).max(0);
                        let recipient = self.member_mut(member)?;
                        let healed = recipient.hit_points.heal(amount);
                        let name = recipient.name.clone();
                        self.events.push(CombatEvent::Healed {
                            source: spell.name.clone(),
                            target: name,
                            amount: healed,
                        });
                    }
                }
            }
            SpellEffect::Damage { dice: base, resolution } => {
                let expr = spell.scaled_dice(base, caster_level, cast_level);
                let ids: Vec<CombatantId> = if spell.shape == TargetShape::AllEnemies {
                    self.combatants
                        .iter()
                        .filter(|c| c.is_enemy() && !c.is_down())
                        .map(|c| c.id)
                        .collect()
                } else {
                    targets
                        .iter()
                        .filter_map(|t| match t {
                            Target::Enemy(id) => Some(*id),
                            Target::Ally(_) => None,
                        })
                        .collect()
                };

                // Save and automatic damage is rolled once and shared by every target.
                let shared = match *resolution {
                    SpellResolution::Attack => 0,
                    _ if ids.is_empty() => 0,
                    _ => expr.roll(dice).total.max(0),
                };

                for id in ids {
                    let config = self.config;
                    let Some(enemy) = self.enemy_mut(id) else {
                        self.events.push(CombatEvent::NoTarget {
                            actor: caster_name.clone(),
                        });
                        continue;
                    };
                    let target_name = enemy.name.clone();
                    let save_bonus = enemy.profile.as_ref().map(|p| p.save_bonus).unwrap_or(0);
                    let armor_class = enemy.armor_class;

                    // `None` is a missed spell attack.
                    let amount = match *resolution {
                        SpellResolution::Automatic => Some(shared),
                        SpellResolution::Attack => {
                            let roll = roll_check(dice, attack_bonus);
                            let (hit, critical) = attack_lands(&roll, armor_class, config);
                            if hit {
                                let expr = if critical { expr.doubled_dice() } else { expr.clone() };
                                Some(expr.roll(dice).total.max(0))
                            } else {
                                self.events.push(CombatEvent::AttackMissed {
                                    attacker: caster_name.clone(),
                                    target: target_name.clone(),
                                    with: spell.name.clone(),
                                    roll,
                                });
                                None
                            }
                        }
                        SpellResolution::Save { half_on_save, .. } => {
                            let roll = roll_check(dice, save_bonus);
                            let saved = roll.total >= save_dc;
                            self.events.push(CombatEvent::SavingThrow {
                                target: target_name.clone(),
                                roll,
                                dc: save_dc,
                                saved,
                            });
                            Some(match (saved, half_on_save) {
                                (false, _) => shared,
                                (true, true) => shared / 2,
                                (true, false) => 0,
                            })
                        }
                    };
                    let Some(amount) = amount else {
                        continue;
                    };

                    let dropped = match self.enemy_mut(id) {
                        Some(enemy) => enemy.take_damage(amount),
                        None => false,
                    };
                    self.events.push(CombatEvent::SpellDamage {
                        spell: spell.name.clone(),
                        target: target_name.clone(),
                        damage: amount,
                    });
                    if dropped {
                        self.events.push(CombatEvent::Defeated { name: target_name });
                    }
                }
            }
        }
        Ok(())
    }

    /// Move enemies at 0 HP out of the fight and tally them by type.
    fn remove_defeated(&mut self) {
        let (down, alive): (Vec<_>, Vec<_>) = std::mem::take(&mut self.combatants)
            .into_iter()
            .partition(|c| c.is_enemy() && c.is_down());
        self.combatants = alive;
        for enemy in down {
            let kind = enemy.kind().unwrap_or("unknown").to_string();
            match self.defeated.iter_mut().find(|g| g.kind == kind) {
                Some(group) => group.count += 1,
                None => self.defeated.push(EnemyGroup::new(kind, 1)),
            }
        }
    }

    /// Party members who can still be attacked, player first.
    fn conscious_members(&self) -> Vec<PartyMember> {
        self.party
            .roster()
            .into_iter()
            .filter(|m| self.party.member(*m).is_some_and(|c| c.is_conscious()))
            .collect()
    }

    fn pick_target(
        &self,
        policy: TargetPolicy,
        dice: &mut dyn DiceSource,
    ) -> RulesResult<Option<PartyMember>> {
        let candidates = self.conscious_members();
        if candidates.is_empty() {
            return Ok(None);
        }
        let hp = |m: &PartyMember| {
            self.party
                .member(*m)
                .map(|c| c.hit_points.current)
                .unwrap_or(0)
        };
        let target = match policy {
            TargetPolicy::Player if candidates.contains(&PartyMember::Player) => {
                PartyMember::Player
            }
            TargetPolicy::Player | TargetPolicy::LowestHp => candidates
                .iter()
                .copied()
                .min_by_key(|m| hp(m))
                .unwrap_or(PartyMember::Player),
            TargetPolicy::HighestHp => candidates
                .iter()
                .copied()
                .rev()
                .max_by_key(|m| hp(m))
                .unwrap_or(PartyMember::Player),
            TargetPolicy::Random => {
                let idx = roll_die(dice, candidates.len() as i64)? as usize - 1;
                candidates[idx]
            }
        };
        Ok(Some(target))
    }

    fn enemy_turns(&mut self, dice: &mut dyn DiceSource) -> RulesResult<()> {
        let order: Vec<CombatantId> = self
            .combatants
            .iter()
            .filter(|c| c.is_enemy())
            .map(|c| c.id)
            .collect();

        for id in order {
            let Some(enemy) = self.combatants.iter_mut().find(|c| c.id == id) else {
                continue;
            };
            let Some(profile) = enemy.profile.clone() else {
                continue;
            };
            if profile.attacks.is_empty() {
                continue;
            }
            let attack = profile.attacks[enemy.next_attack % profile.attacks.len()].clone();
            enemy.next_attack += 1;
            let attacker = enemy.name.clone();

            let Some(target) = self.pick_target(profile.target_policy, dice)? else {
                break;
            };
            let config = self.config;
            let victim = self.member_mut(target)?;
            let roll = roll_check(dice, attack.attack_bonus);
            let (hit, critical) = attack_lands(&roll, victim.armor_class, config);
            let target_name = victim.name.clone();

            if !hit {
                self.events.push(CombatEvent::AttackMissed {
                    attacker,
                    target: target_name,
                    with: attack.name,
                    roll,
                });
                continue;
            }

            let expr = if critical {
                attack.damage.doubled_dice()
            } else {
                attack.damage.clone()
            };
            let amount = expr.roll(dice).total.max(0);
            let result = victim.hit_points.take_damage(amount);
            tracing::debug!(%attacker, target = %target_name, damage = amount, "enemy attack hit");
            self.events.push(CombatEvent::AttackHit {
                attacker,
                target: target_name.clone(),
                with: attack.name,
                roll,
                damage: result.damage_taken,
                critical,
            });
            if result.dropped_to_zero {
                self.events.push(CombatEvent::Down { name: target_name });
                if target == PartyMember::Player {
                    break;
                }
            }
        }
        Ok(())
    }

    fn sync_party_hp(&mut self) {
        for combatant in &mut self.combatants {
            if let Side::Party(member) = combatant.side {
                if let Some(character) = self.party.member(member) {
                    combatant.current_hp = character.hit_points.current;
                    combatant.max_hp = character.hit_points.maximum;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::SpellSlots;
    use crate::encounter::EnemyAttack;
    use crate::testing::{sample_companion, sample_fighter, sample_wizard, ScriptedDice};

    fn dummy(hp: i32) -> EnemyProfile {
        EnemyProfile::new("dummy", "Training Dummy", hp, 10)
            .attack(EnemyAttack::new("Thump", 2, DiceExpression::flat(3)))
            .xp(10)
    }

    fn dummy_fight(hp: i32, count: u32) -> Encounter {
        Encounter::new("Practice", "yard_won", "yard_lost")
            .with_stat_block(dummy(hp))
            .with_enemies("dummy", count)
            .with_flee_scene("yard_gate")
    }

    fn started(encounter: Encounter, party: &Party, dice: &mut ScriptedDice) -> CombatEngine {
        let mut engine = CombatEngine::new();
        engine.start(encounter, party, &Rulebook::standard(), dice);
        engine
    }

    fn first_enemy(engine: &CombatEngine) -> CombatantId {
        engine.enemies().next().unwrap().id
    }

    #[test]
    fn test_start_orders_initiative() {
        let party = Party::new(sample_fighter());
        let mut dice = ScriptedDice::new([5, 18]);
        let engine = started(dummy_fight(10, 1), &party, &mut dice);
        assert!(engine.is_active());
        assert_eq!(engine.combatants().len(), 2);
        assert_eq!(engine.combatants()[0].name, "Training Dummy");
        assert_eq!(engine.combatants()[1].side, Side::Party(PartyMember::Player));
    }

    #[test]
    fn test_exact_lethal_damage_is_victory() {
        let mut fighter = sample_fighter();
        // Flat 7 plus STR +3.
        fighter.weapons = vec![Weapon::new("Practice Maul", "7")];
        let mut party = Party::new(fighter);
        let rules = Rulebook::standard();
        let mut dice = ScriptedDice::new([10, 10]);
        let mut engine = started(dummy_fight(10, 1), &party, &mut dice);
        let target = first_enemy(&engine);

        let mut dice = ScriptedDice::new([15]);
        let report = engine
            .play_round(&mut party, &[PartyAction::attack(PartyMember::Player, target)], &rules, &mut dice)
            .unwrap();

        let outcome = report.outcome.unwrap();
        assert_eq!(outcome.kind, OutcomeKind::Victory);
        assert_eq!(outcome.next_scene, "yard_won");
        assert_eq!(outcome.defeated, vec![EnemyGroup::new("dummy", 1)]);
        assert_eq!(engine.enemies().count(), 0);
        assert!(matches!(engine.phase(), CombatPhase::Resolved(_)));
        assert!(report
            .events
            .iter()
            .any(|e| matches!(e, CombatEvent::AttackHit { damage: 10, .. })));
    }

    #[test]
    fn test_overkill_clamps_at_zero() {
        let mut fighter = sample_fighter();
        fighter.weapons = vec![Weapon::new("Greatsword", "20")];
        let mut party = Party::new(fighter);
        let rules = Rulebook::standard();
        let mut engine = started(dummy_fight(5, 2), &party, &mut ScriptedDice::new([1, 1, 1]));
        let target = first_enemy(&engine);

        let report = engine
            .play_round(
                &mut party,
                &[PartyAction::attack(PartyMember::Player, target)],
                &rules,
                &mut ScriptedDice::new([15]),
            )
            .unwrap();
        assert!(report.outcome.is_none());
        assert_eq!(engine.enemies().count(), 1);
        assert!(engine.enemies().all(|e| e.current_hp >= 0));
    }

    #[test]
    fn test_natural_one_misses_and_twenty_crits() {
        let config = RulesConfig::default();
        let nat1 = CheckRoll { natural: 1, modifier: 30, total: 31 };
        assert_eq!(attack_lands(&nat1, 10, &config), (false, false));
        let nat20 = CheckRoll { natural: 20, modifier: -10, total: 10 };
        assert_eq!(attack_lands(&nat20, 25, &config), (true, true));
        let no_crits = config.with_natural_twenty_crits(false);
        assert_eq!(attack_lands(&nat20, 25, &no_crits), (false, false));
    }

    #[test]
    fn test_refused_round_changes_nothing() {
        let mut party = Party::new(sample_wizard());
        let rules = Rulebook::standard();
        let mut engine = started(dummy_fight(10, 1), &party, &mut ScriptedDice::new([10, 10]));
        let target = first_enemy(&engine);
        let party_before = party.clone();
        let combatants_before = engine.combatants().to_vec();

        // Valid attack followed by an action for an absent companion.
        let actions = [
            PartyAction::attack(PartyMember::Player, target),
            PartyAction::cast(PartyMember::Companion, "Fireball", vec![]),
        ];
        let err = engine
            .play_round(&mut party, &actions, &rules, &mut ScriptedDice::new([20, 4]))
            .unwrap_err();
        assert!(err.is_invalid_action());
        assert_eq!(party, party_before);
        assert_eq!(engine.combatants(), combatants_before.as_slice());
        assert_eq!(engine.round(), 0);
    }

    #[test]
    fn test_spell_needs_slot() {
        let mut party = Party::new(sample_wizard());
        let rules = Rulebook::standard();
        let mut engine = started(dummy_fight(40, 1), &party, &mut ScriptedDice::new([10, 10]));
        let target = first_enemy(&engine);
        party
            .player
            .spellcasting
            .as_mut()
            .unwrap()
            .spell_slots
            .slots[0]
            .used = 2;

        let cast = PartyAction::cast(
            PartyMember::Player,
            "Magic Missile",
            vec![Target::Enemy(target)],
        );
        let err = engine
            .play_round(&mut party, &[cast], &rules, &mut ScriptedDice::default())
            .unwrap_err();
        assert!(err.is_invalid_action());
    }

    #[test]
    fn test_spell_consumes_slot_and_damages() {
        let mut party = Party::new(sample_wizard());
        let rules = Rulebook::standard();
        let mut engine = started(dummy_fight(40, 1), &party, &mut ScriptedDice::new([10, 10]));
        let target = first_enemy(&engine);

        let cast = PartyAction::cast(
            PartyMember::Player,
            "Magic Missile",
            vec![Target::Enemy(target)],
        );
        // Three d4 faces for 3d4+3, then the dummy's attack misses on a 1.
        let report = engine
            .play_round(&mut party, &[cast], &rules, &mut ScriptedDice::new([2, 3, 4, 1]))
            .unwrap();
        assert!(report
            .events
            .iter()
            .any(|e| matches!(e, CombatEvent::SpellDamage { damage: 12, .. })));
        assert_eq!(engine.combatant(target).unwrap().current_hp, 28);
        let slots = &party.player.spellcasting.as_ref().unwrap().spell_slots;
        assert_eq!(slots.available(1), 1);
    }

    #[test]
    fn test_cantrip_costs_no_slot() {
        let mut party = Party::new(sample_wizard());
        let rules = Rulebook::standard();
        let mut engine = started(dummy_fight(40, 1), &party, &mut ScriptedDice::new([10, 10]));
        let target = first_enemy(&engine);
        let cast = PartyAction::cast(PartyMember::Player, "Fire Bolt", vec![Target::Enemy(target)]);
        engine
            .play_round(&mut party, &[cast], &rules, &mut ScriptedDice::new([15, 7, 1]))
            .unwrap();
        let slots = &party.player.spellcasting.as_ref().unwrap().spell_slots;
        assert_eq!(slots.available(1), 2);
        assert_eq!(engine.combatant(target).unwrap().current_hp, 33);
    }

    #[test]
    fn test_attack_on_defeated_enemy_refused() {
        let mut fighter = sample_fighter();
        fighter.weapons = vec![Weapon::new("Greatsword", "20")];
        let mut party = Party::new(fighter);
        let rules = Rulebook::standard();
        let mut engine = started(dummy_fight(5, 2), &party, &mut ScriptedDice::new([1, 1, 1]));
        let target = first_enemy(&engine);
        engine
            .play_round(
                &mut party,
                &[PartyAction::attack(PartyMember::Player, target)],
                &rules,
                &mut ScriptedDice::new([15]),
            )
            .unwrap();

        let err = engine
            .play_round(
                &mut party,
                &[PartyAction::attack(PartyMember::Player, target)],
                &rules,
                &mut ScriptedDice::new([15]),
            )
            .unwrap_err();
        assert!(err.is_invalid_action());
    }

    #[test]
    fn test_round_after_resolution_refused() {
        let mut fighter = sample_fighter();
        fighter.weapons = vec![Weapon::new("Greatsword", "20")];
        let mut party = Party::new(fighter);
        let rules = Rulebook::standard();
        let mut engine = started(dummy_fight(5, 1), &party, &mut ScriptedDice::new([1, 1]));
        let target = first_enemy(&engine);
        engine
            .play_round(
                &mut party,
                &[PartyAction::attack(PartyMember::Player, target)],
                &rules,
                &mut ScriptedDice::new([15]),
            )
            .unwrap();
        let err = engine
            .play_round(&mut party, &[], &rules, &mut ScriptedDice::default())
            .unwrap_err();
        assert!(err.is_invalid_transition());
        assert!(engine.end_encounter().unwrap_err().is_invalid_transition());
    }

    #[test]
    fn test_enemy_downs_player_is_defeat() {
        let mut fighter = sample_fighter();
        fighter.hit_points.current = 2;
        let mut party = Party::new(fighter);
        let rules = Rulebook::standard();
        let mut engine = started(dummy_fight(30, 1), &party, &mut ScriptedDice::new([10, 10]));

        // No party action; the dummy hits for a flat 3.
        let report = engine
            .play_round(&mut party, &[], &rules, &mut ScriptedDice::new([18]))
            .unwrap();
        let outcome = report.outcome.unwrap();
        assert_eq!(outcome.kind, OutcomeKind::Defeat);
        assert_eq!(outcome.next_scene, "yard_lost");
        assert_eq!(party.player.hit_points.current, 0);
    }

    #[test]
    fn test_companion_down_continues() {
        let mut companion = sample_companion();
        companion.hit_points.current = 1;
        let mut party = Party::new(sample_fighter()).with_companion(companion);
        let rules = Rulebook::standard();
        let mut engine = started(dummy_fight(30, 1), &party, &mut ScriptedDice::new([10, 10, 10]));

        // Lowest HP targeting picks the companion.
        let report = engine
            .play_round(&mut party, &[], &rules, &mut ScriptedDice::new([18]))
            .unwrap();
        assert!(report.outcome.is_none());
        assert!(party.companion.as_ref().unwrap().hit_points.is_down());
        assert!(engine.is_active());

        let err = engine
            .play_round(
                &mut party,
                &[PartyAction::flee(PartyMember::Companion)],
                &rules,
                &mut ScriptedDice::default(),
            )
            .unwrap_err();
        assert!(err.is_invalid_action());
    }

    #[test]
    fn test_unopposed_flee() {
        let mut party = Party::new(sample_fighter());
        let rules = Rulebook::standard();
        let mut engine = started(dummy_fight(30, 1), &party, &mut ScriptedDice::new([10, 10]));
        let report = engine
            .play_round(&mut party, &[PartyAction::flee(PartyMember::Player)], &rules, &mut ScriptedDice::default())
            .unwrap();
        let outcome = report.outcome.unwrap();
        assert_eq!(outcome.kind, OutcomeKind::Fled);
        assert_eq!(outcome.next_scene, "yard_gate");
        assert!(outcome.defeated.is_empty());
    }

    #[test]
    fn test_pursued_flee_needs_check() {
        let mut party = Party::new(sample_fighter());
        let rules = Rulebook::standard();
        let encounter = Encounter::new("Crypt", "won", "lost")
            .with_enemies("skeleton", 1)
            .with_flee_scene("outside");
        let mut engine = started(encounter, &party, &mut ScriptedDice::new([10, 10]));

        // Fighter DEX 12 (+1): a 3 fails against DC 10, then the skeleton misses.
        let report = engine
            .play_round(&mut party, &[PartyAction::flee(PartyMember::Player)], &rules, &mut ScriptedDice::new([3, 1]))
            .unwrap();
        assert!(report.outcome.is_none());
        assert!(report
            .events
            .iter()
            .any(|e| matches!(e, CombatEvent::FleeAttempt { escaped: false, .. })));

        let report = engine
            .play_round(&mut party, &[PartyAction::flee(PartyMember::Player)], &rules, &mut ScriptedDice::new([12]))
            .unwrap();
        assert_eq!(report.outcome.unwrap().kind, OutcomeKind::Fled);
    }

    #[test]
    fn test_flee_without_exit_refused() {
        let mut party = Party::new(sample_fighter());
        let rules = Rulebook::standard();
        let encounter = Encounter::new("Pit", "won", "lost").with_enemies("goblin", 1);
        let mut engine = started(encounter, &party, &mut ScriptedDice::new([10, 10]));
        let err = engine
            .play_round(&mut party, &[PartyAction::flee(PartyMember::Player)], &rules, &mut ScriptedDice::default())
            .unwrap_err();
        assert!(err.is_invalid_action());
    }

    #[test]
    fn test_potion_heals_and_is_consumed() {
        let mut fighter = sample_fighter();
        fighter.hit_points.current = 3;
        fighter.inventory.add("Healing Potion", 1);
        let mut party = Party::new(fighter);
        let rules = Rulebook::standard();
        let mut engine = started(dummy_fight(30, 1), &party, &mut ScriptedDice::new([10, 10]));

        let action = PartyAction::use_item(PartyMember::Player, "Healing Potion", PartyMember::Player);
        engine
            .play_round(&mut party, &[action.clone()], &rules, &mut ScriptedDice::new([2, 3, 1]))
            .unwrap();
        assert_eq!(party.player.hit_points.current, 10);
        assert!(!party.player.inventory.has("Healing Potion"));

        let err = engine
            .play_round(&mut party, &[action], &rules, &mut ScriptedDice::default())
            .unwrap_err();
        assert!(err.is_invalid_action());
    }

    #[test]
    fn test_restart_discards_prior_state() {
        let mut fighter = sample_fighter();
        fighter.weapons = vec![Weapon::new("Club", "4")];
        let mut party = Party::new(fighter);
        let rules = Rulebook::standard();
        let mut engine = started(dummy_fight(30, 1), &party, &mut ScriptedDice::new([10, 10]));
        let target = first_enemy(&engine);
        engine
            .play_round(
                &mut party,
                &[PartyAction::attack(PartyMember::Player, target)],
                &rules,
                &mut ScriptedDice::new([15, 1]),
            )
            .unwrap();
        assert_eq!(engine.combatant(target).unwrap().current_hp, 23);

        let encounter = engine.encounter().cloned().unwrap();
        engine.start(encounter, &party, &rules, &mut ScriptedDice::new([10, 10]));
        assert_eq!(engine.round(), 0);
        assert!(engine.enemies().all(|e| e.current_hp == 30));
        assert!(engine.combatant(target).is_none());
    }

    #[test]
    fn test_end_encounter_abandons() {
        let party = Party::new(sample_fighter());
        let mut engine = started(dummy_fight(30, 1), &party, &mut ScriptedDice::new([10, 10]));
        engine.end_encounter().unwrap();
        assert_eq!(engine.phase(), &CombatPhase::Idle);
        assert!(engine.outcome().is_none());
        assert!(engine.end_encounter().unwrap_err().is_invalid_transition());
    }

    #[test]
    fn test_flee_after_last_enemy_falls_is_victory() {
        let mut fighter = sample_fighter();
        fighter.weapons = vec![Weapon::new("Warhammer", "7")];
        let mut party = Party::new(fighter).with_companion(sample_companion());
        let rules = Rulebook::standard();
        let mut engine = started(dummy_fight(10, 1), &party, &mut ScriptedDice::new([10, 10, 10]));
        let target = first_enemy(&engine);

        let actions = [
            PartyAction::attack(PartyMember::Player, target),
            PartyAction::flee(PartyMember::Companion),
        ];
        let report = engine
            .play_round(&mut party, &actions, &rules, &mut ScriptedDice::new([15]))
            .unwrap();
        let outcome = report.outcome.unwrap();
        assert_eq!(outcome.kind, OutcomeKind::Victory);
        assert_eq!(outcome.next_scene, "yard_won");
        assert!(report
            .events
            .iter()
            .any(|e| matches!(e, CombatEvent::NoTarget { actor } if actor == "Sister Maren")));
        assert!(!report
            .events
            .iter()
            .any(|e| matches!(e, CombatEvent::FleeAttempt { .. })));
    }

    /// Who a lone dummy with `policy` swings at in an empty round.
    fn target_of(policy: TargetPolicy, party: &Party, faces: &[u32]) -> String {
        let mut party = party.clone();
        let encounter = Encounter::new("Practice", "won", "lost")
            .with_stat_block(dummy(30).targeting(policy))
            .with_enemies("dummy", 1);
        let mut engine = started(encounter, &party, &mut ScriptedDice::new([10, 10, 10]));
        let report = engine
            .play_round(
                &mut party,
                &[],
                &Rulebook::standard(),
                &mut ScriptedDice::new(faces.iter().copied()),
            )
            .unwrap();
        report
            .events
            .iter()
            .find_map(|e| match e {
                CombatEvent::AttackHit { target, .. } | CombatEvent::AttackMissed { target, .. } => {
                    Some(target.clone())
                }
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn test_lowest_hp_targets_wounded_member() {
        let mut companion = sample_companion();
        companion.hit_points.current = 4;
        let party = Party::new(sample_fighter()).with_companion(companion);
        assert_eq!(target_of(TargetPolicy::LowestHp, &party, &[18]), "Sister Maren");

        // A tie goes to the player.
        let mut party = party;
        party.player.hit_points.current = 4;
        assert_eq!(target_of(TargetPolicy::LowestHp, &party, &[18]), "Brannoc");
    }

    #[test]
    fn test_highest_hp_targets_healthiest_member() {
        let party = Party::new(sample_fighter()).with_companion(sample_companion());
        assert_eq!(target_of(TargetPolicy::HighestHp, &party, &[18]), "Brannoc");

        let mut wounded = party.clone();
        wounded.player.hit_points.current = 5;
        assert_eq!(target_of(TargetPolicy::HighestHp, &wounded, &[18]), "Sister Maren");

        let mut tied = party;
        tied.player.hit_points.current = 10;
        assert_eq!(target_of(TargetPolicy::HighestHp, &tied, &[18]), "Brannoc");
    }

    #[test]
    fn test_player_and_random_policies() {
        let mut companion = sample_companion();
        companion.hit_points.current = 1;
        let party = Party::new(sample_fighter()).with_companion(companion);
        assert_eq!(target_of(TargetPolicy::Player, &party, &[18]), "Brannoc");

        // The first face picks among the two conscious members.
        assert_eq!(target_of(TargetPolicy::Random, &party, &[2, 18]), "Sister Maren");
        assert_eq!(target_of(TargetPolicy::Random, &party, &[1, 18]), "Brannoc");
    }

    fn enemy_ids(engine: &CombatEngine) -> Vec<CombatantId> {
        engine.enemies().map(|e| e.id).collect()
    }

    #[test]
    fn test_burning_hands_shares_one_damage_roll() {
        let mut party = Party::new(sample_wizard());
        let rules = Rulebook::standard();
        let mut engine = started(dummy_fight(30, 2), &party, &mut ScriptedDice::new([10, 10, 10]));
        let ids = enemy_ids(&engine);
        let targets = ids.iter().map(|id| Target::Enemy(*id)).collect();

        // 3d6 rolled once for 18, then saves against DC 13: the first
        // dummy makes it for half, the second fails. Both dummies then miss.
        let cast = PartyAction::cast(PartyMember::Player, "Burning Hands", targets);
        let report = engine
            .play_round(&mut party, &[cast], &rules, &mut ScriptedDice::new([6, 6, 6, 15, 3, 1, 1]))
            .unwrap();

        assert_eq!(engine.combatant(ids[0]).unwrap().current_hp, 21);
        assert_eq!(engine.combatant(ids[1]).unwrap().current_hp, 12);
        let saves: Vec<bool> = report
            .events
            .iter()
            .filter_map(|e| match e {
                CombatEvent::SavingThrow { saved, dc, .. } => {
                    assert_eq!(*dc, 13);
                    Some(*saved)
                }
                _ => None,
            })
            .collect();
        assert_eq!(saves, vec![true, false]);
    }

    #[test]
    fn test_fireball_hits_every_enemy() {
        let mut wizard = sample_wizard();
        if let Some(casting) = wizard.spellcasting.as_mut() {
            casting.prepared_spells.push("Fireball".to_string());
            casting.spell_slots = SpellSlots::with_totals([2, 0, 1, 0, 0, 0, 0, 0, 0]);
        }
        let mut party = Party::new(wizard);
        let rules = Rulebook::standard();
        let mut engine = started(dummy_fight(30, 3), &party, &mut ScriptedDice::new([10, 10, 10, 10]));
        let ids = enemy_ids(&engine);

        // 8d6 of threes for 24; saves of 20, 2 and 2.
        let faces = [3, 3, 3, 3, 3, 3, 3, 3, 20, 2, 2];
        let cast = PartyAction::cast(PartyMember::Player, "Fireball", vec![]);
        engine
            .play_round(&mut party, &[cast], &rules, &mut ScriptedDice::new(faces))
            .unwrap();

        let hp: Vec<i32> = ids
            .iter()
            .map(|id| engine.combatant(*id).unwrap().current_hp)
            .collect();
        assert_eq!(hp, vec![18, 6, 6]);
        let slots = &party.player.spellcasting.as_ref().unwrap().spell_slots;
        assert_eq!(slots.available(3), 0);
        assert_eq!(slots.available(1), 2);
    }

    #[test]
    fn test_too_many_spell_targets_refused() {
        let mut party = Party::new(sample_wizard());
        let rules = Rulebook::standard();
        let mut engine = started(dummy_fight(30, 4), &party, &mut ScriptedDice::new([10; 5]));
        let party_before = party.clone();
        let combatants_before = engine.combatants().to_vec();

        let targets = enemy_ids(&engine).into_iter().map(Target::Enemy).collect();
        let cast = PartyAction::cast(PartyMember::Player, "Burning Hands", targets);
        let err = engine
            .play_round(&mut party, &[cast], &rules, &mut ScriptedDice::new([6; 10]))
            .unwrap_err();
        assert!(err.is_invalid_action());
        assert_eq!(party, party_before);
        assert_eq!(engine.combatants(), combatants_before.as_slice());
    }

    #[test]
    fn test_event_display() {
        let event = CombatEvent::AttackHit {
            attacker: "Aria".into(),
            target: "Goblin".into(),
            with: "Rapier".into(),
            roll: CheckRoll { natural: 14, modifier: 5, total: 19 },
            damage: 7,
            critical: false,
        };
        assert_eq!(
            event.to_string(),
            "Aria hits Goblin with Rapier ([14] + 5 = 19) for 7 damage."
        );
    }
}
