//! GameSession - the narrative-facing API of the rules engine.
//!
//! A session owns the party, the combat engine, the rest in progress and the
//! current scene. The narrative layer feeds it scene choices and combat
//! actions; every operation either applies completely or is refused with the
//! session left as it was.

use crate::character::{Character, InventoryEntry, Party, PartyMember};
use crate::check::{CheckResult, SkillCheckRequest};
use crate::combat::{self, CombatEngine, CombatEvent, OutcomeKind, PartyAction, RoundReport};
use crate::config::Rulebook;
use crate::dice::{DiceSource, RandomDice};
use crate::encounter::Encounter;
use crate::error::{RulesError, RulesResult};
use crate::resources::{self, ExperienceReport, HitDiceReport};
use crate::spells::SpellEffect;
use serde::{Deserialize, Serialize};

/// Configuration for creating a new game session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Scene the story opens on.
    pub starting_scene: String,

    /// Tables and rule constants.
    pub rules: Rulebook,

    /// Seed for reproducible dice. `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl SessionConfig {
    pub fn new(starting_scene: impl Into<String>) -> Self {
        Self {
            starting_scene: starting_scene.into(),
            rules: Rulebook::standard(),
            seed: None,
        }
    }

    pub fn with_rules(mut self, rules: Rulebook) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Length of a rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestKind {
    Short,
    Long,
}

/// A rest that has been started but not finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRest {
    pub kind: RestKind,
    pub next_scene: String,
}

/// A state change picked by the narrative layer, directly or as the branch of
/// a skill check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Consequence {
    Goto(String),
    GainItems {
        items: Vec<InventoryEntry>,
        next_scene: String,
    },
    JoinCompanion {
        companion: Box<Character>,
        next_scene: String,
    },
    DismissCompanion {
        next_scene: String,
    },
    StartEncounter(Encounter),
}

/// One choice offered by a scene.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SceneChoice {
    Direct(Consequence),
    /// The player's check picks which consequence applies.
    SkillCheck(SkillCheckRequest<Consequence>),
    Rest {
        kind: RestKind,
        next_scene: String,
    },
}

impl SceneChoice {
    pub fn goto(scene: impl Into<String>) -> Self {
        SceneChoice::Direct(Consequence::Goto(scene.into()))
    }
}

/// What a scene choice did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoiceReport {
    /// Set when the choice was a skill check.
    pub check: Option<CheckResult>,
    /// Initiative events when the choice started an encounter.
    pub combat_started: Option<Vec<CombatEvent>>,
    pub rest_started: Option<RestKind>,
    pub scene: String,
}

/// A combat round as seen by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRound {
    pub round: RoundReport,
    /// XP awarded to the player when the round ended the encounter.
    pub experience: Option<ExperienceReport>,
}

/// Serializable state of a session, without its tables or dice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub party: Party,
    pub combat: CombatEngine,
    pub rest: Option<PendingRest>,
    pub scene: String,
}

/// A single playthrough.
pub struct GameSession {
    party: Party,
    combat: CombatEngine,
    rest: Option<PendingRest>,
    scene: String,
    rules: Rulebook,
    dice: Box<dyn DiceSource>,
}

impl GameSession {
    pub fn new(config: SessionConfig, player: Character) -> Self {
        let dice: Box<dyn DiceSource> = match config.seed {
            Some(seed) => Box::new(RandomDice::seeded(seed)),
            None => Box::new(RandomDice::from_entropy()),
        };
        Self::with_dice(config, player, dice)
    }

    /// Create a session drawing from the given dice source.
    pub fn with_dice(config: SessionConfig, player: Character, dice: Box<dyn DiceSource>) -> Self {
        tracing::info!(player = %player.name, scene = %config.starting_scene, "new session");
        Self {
            party: Party::new(player),
            combat: CombatEngine::new(),
            rest: None,
            scene: config.starting_scene,
            rules: config.rules,
            dice,
        }
    }

    /// Rebuild a session from a snapshot.
    pub fn restore(snapshot: SessionSnapshot, rules: Rulebook, dice: Box<dyn DiceSource>) -> Self {
        Self {
            party: snapshot.party,
            combat: snapshot.combat,
            rest: snapshot.rest,
            scene: snapshot.scene,
            rules,
            dice,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            party: self.party.clone(),
            combat: self.combat.clone(),
            rest: self.rest.clone(),
            scene: self.scene.clone(),
        }
    }

    /// Discard all progress and start over with a new character.
    pub fn new_game(&mut self, player: Character, starting_scene: impl Into<String>) {
        self.party = Party::new(player);
        self.combat = CombatEngine::new();
        self.rest = None;
        self.scene = starting_scene.into();
        tracing::info!(player = %self.party.player.name, scene = %self.scene, "new game");
    }

    pub fn party(&self) -> &Party {
        &self.party
    }

    pub fn player(&self) -> &Character {
        &self.party.player
    }

    pub fn scene(&self) -> &str {
        &self.scene
    }

    pub fn combat(&self) -> &CombatEngine {
        &self.combat
    }

    pub fn rules(&self) -> &Rulebook {
        &self.rules
    }

    pub fn rest(&self) -> Option<&PendingRest> {
        self.rest.as_ref()
    }

    pub fn in_combat(&self) -> bool {
        self.combat.is_active()
    }

    /// Player's progress toward the next level, from 0.0 to 1.0.
    pub fn xp_progress(&self) -> f32 {
        resources::xp_progress(&self.party.player, &self.rules.config)
    }

    fn ensure_free(&self) -> RulesResult<()> {
        if self.combat.is_active() {
            return Err(RulesError::transition("an encounter is in progress"));
        }
        if self.rest.is_some() {
            return Err(RulesError::transition("a rest is in progress"));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Narrative
    // ------------------------------------------------------------------------

    /// Apply a scene choice.
    pub fn choose(&mut self, choice: SceneChoice) -> RulesResult<ChoiceReport> {
        self.ensure_free()?;

        let mut report = ChoiceReport {
            check: None,
            combat_started: None,
            rest_started: None,
            scene: String::new(),
        };

        match choice {
            SceneChoice::Direct(consequence) => {
                report.combat_started = self.apply(consequence);
            }
            SceneChoice::SkillCheck(request) => {
                let (result, consequence) =
                    request.resolve(&self.party.player, &self.rules.config, self.dice.as_mut());
                tracing::info!(check = %result.kind, outcome = ?result.outcome, "scene check");
                report.check = Some(result);
                report.combat_started = self.apply(consequence);
            }
            SceneChoice::Rest { kind, next_scene } => {
                tracing::info!(?kind, "rest started");
                self.rest = Some(PendingRest { kind, next_scene });
                report.rest_started = Some(kind);
            }
        }

        report.scene = self.scene.clone();
        Ok(report)
    }

    fn apply(&mut self, consequence: Consequence) -> Option<Vec<CombatEvent>> {
        match consequence {
            Consequence::Goto(scene) => {
                self.scene = scene;
            }
            Consequence::GainItems { items, next_scene } => {
                for entry in items {
                    self.party.player.inventory.add(entry.item, entry.quantity);
                }
                self.scene = next_scene;
            }
            Consequence::JoinCompanion {
                companion,
                next_scene,
            } => {
                tracing::info!(companion = %companion.name, "companion joined");
                self.party.companion = Some(*companion);
                self.scene = next_scene;
            }
            Consequence::DismissCompanion { next_scene } => {
                if let Some(companion) = self.party.companion.take() {
                    tracing::info!(companion = %companion.name, "companion left");
                }
                self.scene = next_scene;
            }
            Consequence::StartEncounter(encounter) => {
                return Some(self.start_encounter_unchecked(encounter));
            }
        }
        None
    }

    // ------------------------------------------------------------------------
    // Rests
    // ------------------------------------------------------------------------

    /// Spend hit dice for a party member during a short rest.
    pub fn spend_hit_dice(&mut self, member: PartyMember, count: u8) -> RulesResult<HitDiceReport> {
        match &self.rest {
            Some(PendingRest {
                kind: RestKind::Short,
                ..
            }) => {}
            _ => return Err(RulesError::transition("hit dice can only be spent during a short rest")),
        }
        let character = self
            .party
            .member_mut(member)
            .ok_or_else(|| RulesError::action(format!("{member:?} is not in the party")))?;
        resources::spend_hit_dice(character, count, self.dice.as_mut())
    }

    /// Finish the current rest and move to its follow-up scene.
    pub fn finish_rest(&mut self) -> RulesResult<&str> {
        let rest = self
            .rest
            .take()
            .ok_or_else(|| RulesError::transition("no rest is in progress"))?;
        match rest.kind {
            RestKind::Short => resources::short_rest(&mut self.party, &self.rules.classes),
            RestKind::Long => resources::long_rest(&mut self.party, &self.rules.config),
        }
        self.scene = rest.next_scene;
        Ok(&self.scene)
    }

    // ------------------------------------------------------------------------
    // Spells
    // ------------------------------------------------------------------------

    pub fn prepare_spell(&mut self, member: PartyMember, spell: &str) -> RulesResult<()> {
        if self.combat.is_active() {
            return Err(RulesError::transition("spells cannot be prepared during combat"));
        }
        let character = self
            .party
            .member_mut(member)
            .ok_or_else(|| RulesError::action(format!("{member:?} is not in the party")))?;
        resources::prepare_spell(character, spell, &self.rules.spells)
    }

    pub fn unprepare_spell(&mut self, member: PartyMember, spell: &str) -> RulesResult<()> {
        if self.combat.is_active() {
            return Err(RulesError::transition("spells cannot be unprepared during combat"));
        }
        let character = self
            .party
            .member_mut(member)
            .ok_or_else(|| RulesError::action(format!("{member:?} is not in the party")))?;
        resources::unprepare_spell(character, spell)
    }

    /// Drink a potion or use another consumable between fights.
    pub fn use_item(
        &mut self,
        member: PartyMember,
        item: &str,
        target: PartyMember,
    ) -> RulesResult<Vec<CombatEvent>> {
        self.ensure_free()?;
        let user = self.able_member(member)?;
        if !user.inventory.has(item) {
            return Err(RulesError::action(format!("{} has no {item}", user.name)));
        }
        let consumable = self
            .rules
            .items
            .get(item)
            .cloned()
            .ok_or_else(|| RulesError::action(format!("{item} cannot be used")))?;
        self.member(target)?;

        let mut party = self.party.clone();
        let user = member_mut(&mut party, member)?;
        if !user.inventory.remove(item, 1) {
            return Err(RulesError::action(format!("{} has no {item}", user.name)));
        }
        let mut events = vec![CombatEvent::ItemUsed {
            user: user.name.clone(),
            item: consumable.name.clone(),
        }];
        let recipient = member_mut(&mut party, target)?;
        events.push(combat::apply_item(recipient, &consumable, self.dice.as_mut()));

        tracing::info!(item = %consumable.name, ?target, "item used");
        self.party = party;
        Ok(events)
    }

    /// Cast a healing or utility spell between fights. Damage spells need an
    /// encounter to target.
    pub fn cast_spell(
        &mut self,
        member: PartyMember,
        spell: &str,
        slot_level: Option<u8>,
        target: Option<PartyMember>,
    ) -> RulesResult<Vec<CombatEvent>> {
        self.ensure_free()?;
        let caster = self.able_member(member)?;
        if caster.spellcasting.is_none() {
            return Err(RulesError::action(format!("{} cannot cast spells", caster.name)));
        }
        let data = self.rules.spells.get(spell);
        if matches!(data.effect, SpellEffect::Damage { .. }) {
            return Err(RulesError::action(format!(
                "{} has nothing to target outside combat",
                data.name
            )));
        }
        let slot_level = resources::slot_for_cast(caster, &data, slot_level)?;
        let bonus = caster
            .spellcasting
            .as_ref()
            .map(|s| caster.modifier(s.ability))
            .unwrap_or(0);
        let caster_level = caster.level;
        let target = target.unwrap_or(member);
        self.member(target)?;

        let mut party = self.party.clone();
        let caster = member_mut(&mut party, member)?;
        if let Some(level) = slot_level {
            resources::expend_spell_slot(caster, level)?;
        }
        let mut events = vec![CombatEvent::SpellCast {
            caster: caster.name.clone(),
            spell: data.name.clone(),
            slot_level,
        }];

        if let SpellEffect::Healing { dice, add_modifier } = &data.effect {
            let expr = data.scaled_dice(dice, caster_level, slot_level.unwrap_or(data.level));
            let bonus = if *add_modifier { bonus } else { 0 };
            let amount = (expr.roll(self.dice.as_mut()).total + bonus).max(0);
            let recipient = member_mut(&mut party, target)?;
            events.push(CombatEvent::Healed {
                source: data.name.clone(),
                target: recipient.name.clone(),
                amount: recipient.hit_points.heal(amount),
            });
        }

        tracing::info!(spell = %data.name, ?slot_level, "spell cast outside combat");
        self.party = party;
        Ok(events)
    }

    fn member(&self, who: PartyMember) -> RulesResult<&Character> {
        self.party
            .member(who)
            .ok_or_else(|| RulesError::action(format!("{who:?} is not in the party")))
    }

    /// A party member who is conscious and can act.
    fn able_member(&self, who: PartyMember) -> RulesResult<&Character> {
        let character = self.member(who)?;
        if !character.is_conscious() {
            return Err(RulesError::action(format!(
                "{} is down and cannot act",
                character.name
            )));
        }
        Ok(character)
    }

    // ------------------------------------------------------------------------
    // Combat
    // ------------------------------------------------------------------------

    /// Start an encounter outside of a scene choice.
    pub fn start_encounter(&mut self, encounter: Encounter) -> RulesResult<Vec<CombatEvent>> {
        self.ensure_free()?;
        Ok(self.start_encounter_unchecked(encounter))
    }

    fn start_encounter_unchecked(&mut self, encounter: Encounter) -> Vec<CombatEvent> {
        self.combat
            .start(encounter, &self.party, &self.rules, self.dice.as_mut())
    }

    /// Play one combat round. When it ends the encounter, the player earns
    /// XP for the enemies defeated (unless the party lost) and the story
    /// moves to the outcome's scene.
    pub fn play_round(&mut self, actions: &[PartyAction]) -> RulesResult<SessionRound> {
        let round = self.combat.play_round(
            &mut self.party,
            actions,
            &self.rules,
            self.dice.as_mut(),
        )?;

        let mut experience = None;
        if let Some(outcome) = &round.outcome {
            if outcome.kind != OutcomeKind::Defeat {
                if let Some(encounter) = self.combat.encounter() {
                    let xp = resources::xp_reward(
                        &outcome.defeated,
                        encounter,
                        &self.rules.bestiary,
                        &self.rules.config,
                    );
                    experience = Some(resources::award_experience(
                        &mut self.party.player,
                        xp,
                        &self.rules.classes,
                        &self.rules.config,
                    ));
                }
            }
            self.scene = outcome.next_scene.clone();
        }

        Ok(SessionRound { round, experience })
    }

    /// Long rest the party, then fight the last encounter again from the top.
    pub fn replay_encounter(&mut self) -> RulesResult<Vec<CombatEvent>> {
        let encounter = self
            .combat
            .encounter()
            .cloned()
            .ok_or_else(|| RulesError::transition("there is no encounter to replay"))?;
        self.rest = None;
        resources::long_rest(&mut self.party, &self.rules.config);
        tracing::info!(encounter = %encounter.name, "replaying encounter");
        Ok(self.start_encounter_unchecked(encounter))
    }

    /// Abandon the active encounter without rewards.
    pub fn end_encounter(&mut self) -> RulesResult<()> {
        self.combat.end_encounter()
    }
}

fn member_mut(party: &mut Party, who: PartyMember) -> RulesResult<&mut Character> {
    party
        .member_mut(who)
        .ok_or_else(|| RulesError::action(format!("{who:?} is not in the party")))
}
