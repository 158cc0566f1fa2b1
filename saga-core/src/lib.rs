//! Rules resolution engine for a narrative role-playing game.
//!
//! This crate provides:
//! - Dice rolling with an injectable random source
//! - Ability modifiers, proficiency and class-driven derived stats
//! - Narrative skill checks with success, partial and failure branches
//! - A turn-based combat state machine for a party against an encounter
//! - Experience, leveling, rests, spell slots and spell preparation
//!
//! # Quick Start
//!
//! ```no_run
//! use saga_core::{Encounter, GameSession, PartyAction, PartyMember, SessionConfig};
//! use saga_core::testing::sample_fighter;
//!
//! let mut session = GameSession::new(SessionConfig::new("crossroads").with_seed(7), sample_fighter());
//! session
//!     .start_encounter(
//!         Encounter::new("Roadside ambush", "crossroads_after", "game_over").with_enemies("goblin", 2),
//!     )
//!     .unwrap();
//!
//! while session.in_combat() {
//!     let target = session.combat().enemies().next().unwrap().id;
//!     let round = session
//!         .play_round(&[PartyAction::attack(PartyMember::Player, target)])
//!         .unwrap();
//!     for event in &round.round.events {
//!         println!("{event}");
//!     }
//! }
//! println!("Now at {}", session.scene());
//! ```

pub mod character;
pub mod check;
pub mod combat;
pub mod config;
pub mod dice;
pub mod encounter;
pub mod error;
pub mod items;
pub mod resources;
pub mod session;
pub mod spells;
pub mod stats;
pub mod testing;

// Primary public API
pub use character::{Character, CharacterId, Party, PartyMember};
pub use check::{resolve_check, CheckKind, CheckOutcome, CheckResult, SkillCheckRequest};
pub use combat::{
    CombatAction, CombatEngine, CombatEvent, CombatPhase, CombatantId, EncounterOutcome,
    OutcomeKind, PartyAction, RoundReport, Target,
};
pub use config::{Rulebook, RulesConfig};
pub use dice::{Advantage, DiceExpression, DiceSource, RandomDice};
pub use encounter::{Bestiary, Encounter, EnemyGroup, EnemyProfile};
pub use error::{RulesError, RulesResult};
pub use session::{Consequence, GameSession, RestKind, SceneChoice, SessionConfig};
pub use stats::{Ability, ClassBook, ClassProfile, Skill};
