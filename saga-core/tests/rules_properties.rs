//! Property checks for the core rules.
//!
//! Run with: `cargo test -p saga-core --test rules_properties`

use saga_core::character::{HitPoints, SpellSlots, Weapon};
use saga_core::check::{CheckKind, CheckOutcome, SkillCheckRequest};
use saga_core::combat::{CombatEngine, OutcomeKind, PartyAction};
use saga_core::config::{Rulebook, RulesConfig};
use saga_core::encounter::{Encounter, EnemyAttack, EnemyProfile};
use saga_core::resources::{award_experience, long_rest, max_prepared_spells, prepare_spell};
use saga_core::stats::{ability_modifier, proficiency_bonus, Ability, ClassBook};
use saga_core::testing::{sample_fighter, sample_wizard, ScriptedDice};
use saga_core::{DiceExpression, Party, PartyMember};

/// Route engine logs to the test output when `RUST_LOG` is set.
fn setup() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// =============================================================================
// Derived stats
// =============================================================================

#[test]
fn test_modifier_floors_toward_negative_infinity() {
    setup();
    for score in -5..=30 {
        let expected = ((score - 10) as f64 / 2.0).floor() as i32;
        assert_eq!(ability_modifier(score), expected, "score {score}");
    }
    assert_eq!(ability_modifier(7), -2);
    assert_eq!(ability_modifier(9), -1);
}

#[test]
fn test_proficiency_bonus_never_decreases() {
    setup();
    for level in 1..20u8 {
        assert!(proficiency_bonus(level) <= proficiency_bonus(level + 1));
    }
    assert_eq!(proficiency_bonus(1), 2);
    assert_eq!(proficiency_bonus(20), 6);
}

// =============================================================================
// Skill checks
// =============================================================================

#[test]
fn test_check_bands_at_dc_15() {
    setup();
    let config = RulesConfig::default();
    assert_eq!(CheckOutcome::classify(15, 15, &config), CheckOutcome::Success);
    assert_eq!(CheckOutcome::classify(25, 15, &config), CheckOutcome::CriticalSuccess);
    assert_eq!(CheckOutcome::classify(11, 15, &config), CheckOutcome::PartialSuccess);
    assert_eq!(CheckOutcome::classify(5, 15, &config), CheckOutcome::Failure);
}

#[test]
fn test_check_selects_exactly_one_branch() {
    setup();
    let fighter = sample_fighter();
    let config = RulesConfig::default();
    // Raw strength check, +3.
    for face in 1..=20u32 {
        let request = SkillCheckRequest::new(
            CheckKind::Ability(Ability::Strength),
            15,
            vec!["success"],
            vec!["partial"],
            vec!["failure"],
        );
        let mut dice = ScriptedDice::new([face]);
        let (result, branch) = request.resolve(&fighter, &config, &mut dice);
        assert_eq!(branch.len(), 1);
        let expected = match result.outcome {
            CheckOutcome::CriticalSuccess | CheckOutcome::Success => "success",
            CheckOutcome::PartialSuccess => "partial",
            CheckOutcome::Failure => "failure",
        };
        assert_eq!(branch[0], expected);
        assert_eq!(result.roll.total, face as i32 + 3);
    }
}

// =============================================================================
// Combat
// =============================================================================

#[test]
fn test_exact_damage_kills_and_wins() {
    setup();
    let mut fighter = sample_fighter();
    // 7 flat plus STR +3 is exactly 10.
    fighter.weapons = vec![Weapon::new("Warhammer", "7")];
    let mut party = Party::new(fighter);
    let rules = Rulebook::standard();
    let encounter = Encounter::new("Straw man", "field", "grave")
        .with_stat_block(
            EnemyProfile::new("strawman", "Straw Man", 10, 8)
                .attack(EnemyAttack::new("Flail", 0, DiceExpression::flat(1))),
        )
        .with_enemies("strawman", 1);

    let mut engine = CombatEngine::new();
    engine.start(encounter, &party, &rules, &mut ScriptedDice::new([10, 10]));
    let target = engine.enemies().next().unwrap().id;

    let report = engine
        .play_round(
            &mut party,
            &[PartyAction::attack(PartyMember::Player, target)],
            &rules,
            &mut ScriptedDice::new([12]),
        )
        .unwrap();

    let outcome = report.outcome.expect("encounter should end");
    assert_eq!(outcome.kind, OutcomeKind::Victory);
    assert_eq!(outcome.next_scene, "field");
    assert_eq!(outcome.defeated[0].kind, "strawman");
    assert_eq!(outcome.defeated[0].count, 1);
    assert!(engine.enemies().next().is_none());
}

#[test]
fn test_enemy_hp_never_negative() {
    setup();
    let mut fighter = sample_fighter();
    fighter.weapons = vec![Weapon::new("Meteor", "100")];
    let mut party = Party::new(fighter);
    let rules = Rulebook::standard();
    let encounter = Encounter::new("Rats", "cellar", "grave").with_enemies("kobold", 3);

    let mut engine = CombatEngine::new();
    engine.start(encounter, &party, &rules, &mut ScriptedDice::new([20, 1, 1, 1]));
    let target = engine.enemies().next().unwrap().id;
    engine
        .play_round(
            &mut party,
            &[PartyAction::attack(PartyMember::Player, target)],
            &rules,
            &mut ScriptedDice::new([15]),
        )
        .unwrap();
    assert_eq!(engine.enemies().count(), 2);
    assert!(engine.combatants().iter().all(|c| c.current_hp >= 0));
    assert!(party.player.hit_points.current >= 0);
}

#[test]
fn test_end_encounter_twice_after_resolution() {
    setup();
    let mut fighter = sample_fighter();
    fighter.weapons = vec![Weapon::new("Maul", "50")];
    let mut party = Party::new(fighter);
    let rules = Rulebook::standard();
    let encounter = Encounter::new("Lone goblin", "camp", "grave").with_enemies("goblin", 1);

    let mut engine = CombatEngine::new();
    engine.start(encounter, &party, &rules, &mut ScriptedDice::new([10, 10]));
    let target = engine.enemies().next().unwrap().id;
    engine
        .play_round(
            &mut party,
            &[PartyAction::attack(PartyMember::Player, target)],
            &rules,
            &mut ScriptedDice::new([18]),
        )
        .unwrap();
    let outcome = engine.outcome().cloned().unwrap();

    assert!(engine.end_encounter().unwrap_err().is_invalid_transition());
    assert!(engine.end_encounter().unwrap_err().is_invalid_transition());
    assert_eq!(engine.outcome(), Some(&outcome));
}

// =============================================================================
// Resources
// =============================================================================

#[test]
fn test_long_rest_restores_hp_and_slots() {
    setup();
    let mut wizard = sample_wizard();
    wizard.hit_points = HitPoints {
        current: 5,
        maximum: 20,
    };
    let casting = wizard.spellcasting.as_mut().unwrap();
    casting.spell_slots = SpellSlots::with_totals([4, 0, 0, 0, 0, 0, 0, 0, 0]);
    for _ in 0..4 {
        casting.spell_slots.use_slot(1);
    }
    assert_eq!(casting.spell_slots.available(1), 0);

    let mut party = Party::new(wizard);
    long_rest(&mut party, &RulesConfig::default());

    assert_eq!(party.player.hit_points.current, 20);
    let slots = &party.player.spellcasting.as_ref().unwrap().spell_slots;
    assert_eq!(slots.available(1), 4);
}

#[test]
fn test_one_award_crosses_two_thresholds() {
    setup();
    let mut fighter = sample_fighter();
    let config = RulesConfig::default().with_xp_thresholds(vec![0, 300, 900, 2700]);
    let report = award_experience(&mut fighter, 1000, &ClassBook::standard(), &config);
    assert_eq!(report.old_level, 1);
    assert_eq!(report.new_level, 3);
    assert_eq!(fighter.level, 3);
    assert_eq!(fighter.experience, 1000);
}

#[test]
fn test_preparation_cap_refuses_sixth() {
    setup();
    let mut wizard = sample_wizard();
    wizard.level = 2;
    assert_eq!(wizard.modifier(Ability::Intelligence), 3);
    assert_eq!(max_prepared_spells(&wizard), 5);

    let rules = Rulebook::standard();
    let casting = wizard.spellcasting.as_mut().unwrap();
    casting.known_spells.push("Chromatic Orb".to_string());
    casting.prepared_spells.clear();

    for spell in ["Magic Missile", "Burning Hands", "Shield", "Thunderwave", "Detect Magic"] {
        prepare_spell(&mut wizard, spell, &rules.spells).unwrap();
    }
    let before = wizard.spellcasting.as_ref().unwrap().prepared_spells.clone();
    let err = prepare_spell(&mut wizard, "Chromatic Orb", &rules.spells).unwrap_err();
    assert!(err.is_invalid_action());
    assert_eq!(wizard.spellcasting.as_ref().unwrap().prepared_spells, before);
}
