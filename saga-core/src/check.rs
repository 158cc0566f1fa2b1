//! Narrative skill checks.
//!
//! A check rolls `d20 + bonus` against a difficulty class and lands in one
//! of four bands. The caller supplies one continuation per branch and gets
//! exactly one of them back; the resolver itself has no other effect.

use crate::character::Character;
use crate::config::RulesConfig;
use crate::dice::{roll_check_with_advantage, Advantage, CheckRoll, DiceSource};
use crate::stats::{Ability, Skill};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What is being tested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckKind {
    Skill(Skill),
    /// Raw ability check, no proficiency.
    Ability(Ability),
    Save(Ability),
}

impl CheckKind {
    /// The character's bonus on this check.
    pub fn bonus(&self, character: &Character) -> i32 {
        match *self {
            CheckKind::Skill(skill) => character.skill_bonus(skill),
            CheckKind::Ability(ability) => character.modifier(ability),
            CheckKind::Save(ability) => character.save_bonus(ability),
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckKind::Skill(skill) => write!(f, "{skill} check"),
            CheckKind::Ability(ability) => write!(f, "{} check", ability.name()),
            CheckKind::Save(ability) => write!(f, "{} saving throw", ability.name()),
        }
    }
}

/// Result band of a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckOutcome {
    /// Beat the DC by the critical margin or more.
    CriticalSuccess,
    Success,
    /// Missed the DC by no more than the partial margin.
    PartialSuccess,
    Failure,
}

impl CheckOutcome {
    /// Place a total relative to `dc` using the configured margins.
    pub fn classify(total: i32, dc: i32, config: &RulesConfig) -> CheckOutcome {
        if total >= dc + config.critical_margin {
            CheckOutcome::CriticalSuccess
        } else if total >= dc {
            CheckOutcome::Success
        } else if total >= dc - config.partial_margin {
            CheckOutcome::PartialSuccess
        } else {
            CheckOutcome::Failure
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CheckOutcome::CriticalSuccess | CheckOutcome::Success)
    }
}

/// A resolved check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub kind: CheckKind,
    pub dc: i32,
    pub roll: CheckRoll,
    pub outcome: CheckOutcome,
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} vs DC {} ({:?})",
            self.kind, self.roll, self.dc, self.outcome
        )
    }
}

/// Roll a check for `character` and classify it.
pub fn resolve_check(
    character: &Character,
    kind: CheckKind,
    dc: i32,
    advantage: Advantage,
    config: &RulesConfig,
    dice: &mut dyn DiceSource,
) -> CheckResult {
    let roll = roll_check_with_advantage(dice, kind.bonus(character), advantage);
    let outcome = CheckOutcome::classify(roll.total, dc, config);
    tracing::debug!(
        character = %character.name,
        check = %kind,
        dc,
        total = roll.total,
        ?outcome,
        "skill check"
    );
    CheckResult {
        kind,
        dc,
        roll,
        outcome,
    }
}

/// A check with one continuation per branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillCheckRequest<T> {
    pub check: CheckKind,
    pub dc: i32,
    #[serde(default)]
    pub advantage: Advantage,
    /// Taken on a critical success when present, otherwise `on_success` is.
    #[serde(default = "none")]
    pub on_critical: Option<T>,
    pub on_success: T,
    pub on_partial: T,
    pub on_failure: T,
}

fn none<T>() -> Option<T> {
    None
}

impl<T> SkillCheckRequest<T> {
    pub fn new(check: CheckKind, dc: i32, on_success: T, on_partial: T, on_failure: T) -> Self {
        Self {
            check,
            dc,
            advantage: Advantage::Normal,
            on_critical: None,
            on_success,
            on_partial,
            on_failure,
        }
    }

    pub fn with_critical(mut self, on_critical: T) -> Self {
        self.on_critical = Some(on_critical);
        self
    }

    pub fn with_advantage(mut self, advantage: Advantage) -> Self {
        self.advantage = advantage;
        self
    }

    /// Consume the request, keeping only the continuation for `outcome`.
    pub fn select(self, outcome: CheckOutcome) -> T {
        match outcome {
            CheckOutcome::CriticalSuccess => self.on_critical.unwrap_or(self.on_success),
            CheckOutcome::Success => self.on_success,
            CheckOutcome::PartialSuccess => self.on_partial,
            CheckOutcome::Failure => self.on_failure,
        }
    }

    /// Roll the check and hand back the matching continuation.
    pub fn resolve(
        self,
        character: &Character,
        config: &RulesConfig,
        dice: &mut dyn DiceSource,
    ) -> (CheckResult, T) {
        let result = resolve_check(character, self.check, self.dc, self.advantage, config, dice);
        let next = self.select(result.outcome);
        (result, next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_rogue, ScriptedDice};

    #[test]
    fn test_outcome_bands() {
        let config = RulesConfig::default();
        assert_eq!(CheckOutcome::classify(15, 15, &config), CheckOutcome::Success);
        assert_eq!(
            CheckOutcome::classify(25, 15, &config),
            CheckOutcome::CriticalSuccess
        );
        assert_eq!(CheckOutcome::classify(24, 15, &config), CheckOutcome::Success);
        assert_eq!(
            CheckOutcome::classify(11, 15, &config),
            CheckOutcome::PartialSuccess
        );
        assert_eq!(
            CheckOutcome::classify(10, 15, &config),
            CheckOutcome::PartialSuccess
        );
        assert_eq!(CheckOutcome::classify(9, 15, &config), CheckOutcome::Failure);
        assert_eq!(CheckOutcome::classify(5, 15, &config), CheckOutcome::Failure);
    }

    #[test]
    fn test_custom_margins() {
        let config = RulesConfig::default()
            .with_partial_margin(2)
            .with_critical_margin(5);
        assert_eq!(CheckOutcome::classify(12, 15, &config), CheckOutcome::Failure);
        assert_eq!(
            CheckOutcome::classify(20, 15, &config),
            CheckOutcome::CriticalSuccess
        );
    }

    #[test]
    fn test_exactly_one_continuation() {
        let rogue = sample_rogue();
        let config = RulesConfig::default();
        // Stealth +5 for the sample rogue.
        let bonus = CheckKind::Skill(Skill::Stealth).bonus(&rogue);
        assert_eq!(bonus, 5);

        let cases = [
            (20, "crit"),
            (10, "success"),
            (6, "partial"),
            (2, "failure"),
        ];
        for (face, expected) in cases {
            let request = SkillCheckRequest::new(
                CheckKind::Skill(Skill::Stealth),
                15,
                "success",
                "partial",
                "failure",
            )
            .with_critical("crit");
            let mut dice = ScriptedDice::new([face]);
            let (result, next) = request.resolve(&rogue, &config, &mut dice);
            assert_eq!(next, expected, "face {face} total {}", result.roll.total);
        }
    }

    #[test]
    fn test_critical_without_continuation_uses_success() {
        let request = SkillCheckRequest::new(CheckKind::Ability(Ability::Strength), 5, 1, 2, 3);
        assert_eq!(request.select(CheckOutcome::CriticalSuccess), 1);
    }

    #[test]
    fn test_save_uses_proficiency() {
        let rogue = sample_rogue();
        assert_eq!(CheckKind::Save(Ability::Dexterity).bonus(&rogue), 5);
        assert_eq!(CheckKind::Ability(Ability::Dexterity).bonus(&rogue), 3);
    }
}
