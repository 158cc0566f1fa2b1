//! Encounter templates and enemy stat blocks.
//!
//! Templates are immutable content: the combat engine reads them and builds
//! its own live state. Enemy types resolve through the encounter's own stat
//! blocks first, then the bestiary, then the bestiary's default block.

use crate::dice::{DiceExpression, DieType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How an enemy picks who to attack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TargetPolicy {
    /// Always the player character while standing.
    Player,
    /// The conscious party member with the fewest hit points.
    #[default]
    LowestHp,
    HighestHp,
    Random,
}

/// One attack in an enemy's repertoire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnemyAttack {
    pub name: String,
    pub attack_bonus: i32,
    pub damage: DiceExpression,
}

impl EnemyAttack {
    pub fn new(name: impl Into<String>, attack_bonus: i32, damage: DiceExpression) -> Self {
        Self {
            name: name.into(),
            attack_bonus,
            damage,
        }
    }
}

/// Stat block and behaviour for one enemy type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnemyProfile {
    pub kind: String,
    pub name: String,
    pub max_hp: i32,
    pub armor_class: i32,
    pub initiative_modifier: i32,
    /// Flat bonus on every saving throw.
    pub save_bonus: i32,
    /// Used in order, wrapping around each turn.
    pub attacks: Vec<EnemyAttack>,
    pub target_policy: TargetPolicy,
    /// Pursuers oppose attempts to flee.
    pub pursues: bool,
    pub xp: u32,
}

impl EnemyProfile {
    pub fn new(kind: impl Into<String>, name: impl Into<String>, max_hp: i32, armor_class: i32) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            max_hp,
            armor_class,
            initiative_modifier: 0,
            save_bonus: 0,
            attacks: Vec::new(),
            target_policy: TargetPolicy::default(),
            pursues: false,
            xp: 0,
        }
    }

    pub fn attack(mut self, attack: EnemyAttack) -> Self {
        self.attacks.push(attack);
        self
    }

    pub fn initiative(mut self, modifier: i32) -> Self {
        self.initiative_modifier = modifier;
        self
    }

    pub fn saves(mut self, bonus: i32) -> Self {
        self.save_bonus = bonus;
        self
    }

    pub fn targeting(mut self, policy: TargetPolicy) -> Self {
        self.target_policy = policy;
        self
    }

    pub fn pursuing(mut self) -> Self {
        self.pursues = true;
        self
    }

    pub fn xp(mut self, xp: u32) -> Self {
        self.xp = xp;
        self
    }
}

lazy_static::lazy_static! {
    /// Built-in enemy stat blocks.
    static ref STANDARD_BESTIARY: Bestiary = build_standard_bestiary();
}

/// Enemy stat blocks keyed by type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bestiary {
    profiles: HashMap<String, EnemyProfile>,
    fallback: EnemyProfile,
}

impl Bestiary {
    pub fn new(fallback: EnemyProfile) -> Self {
        Self {
            profiles: HashMap::new(),
            fallback,
        }
    }

    pub fn standard() -> Self {
        STANDARD_BESTIARY.clone()
    }

    pub fn insert(&mut self, profile: EnemyProfile) {
        self.profiles.insert(profile.kind.to_lowercase(), profile);
    }

    pub fn with(mut self, profile: EnemyProfile) -> Self {
        self.insert(profile);
        self
    }

    pub fn find(&self, kind: &str) -> Option<&EnemyProfile> {
        self.profiles.get(&kind.to_lowercase())
    }

    /// The stat block for `kind`, or the default block renamed to `kind`.
    pub fn get(&self, kind: &str) -> EnemyProfile {
        match self.find(kind) {
            Some(profile) => profile.clone(),
            None => {
                tracing::warn!(kind, "unknown enemy type, using default stat block");
                EnemyProfile {
                    kind: kind.to_string(),
                    name: kind.to_string(),
                    ..self.fallback.clone()
                }
            }
        }
    }
}

impl Default for Bestiary {
    fn default() -> Self {
        Self::standard()
    }
}

fn build_standard_bestiary() -> Bestiary {
    use DieType::*;

    Bestiary::new(
        EnemyProfile::new("unknown", "Creature", 10, 12)
            .attack(EnemyAttack::new("Strike", 3, DiceExpression::new(1, D6, 1))),
    )
    .with(
        EnemyProfile::new("goblin", "Goblin", 7, 15)
            .initiative(2)
            .attack(EnemyAttack::new("Scimitar", 4, DiceExpression::new(1, D6, 2)))
            .attack(EnemyAttack::new("Shortbow", 4, DiceExpression::new(1, D6, 2)))
            .xp(50),
    )
    .with(
        EnemyProfile::new("skeleton", "Skeleton", 13, 13)
            .initiative(2)
            .attack(EnemyAttack::new("Shortsword", 4, DiceExpression::new(1, D6, 2)))
            .targeting(TargetPolicy::Player)
            .pursuing()
            .xp(50),
    )
    .with(
        EnemyProfile::new("imp", "Imp", 10, 13)
            .initiative(3)
            .saves(1)
            .attack(EnemyAttack::new("Sting", 5, DiceExpression::new(1, D4, 3)))
            .targeting(TargetPolicy::Random)
            .xp(200),
    )
    .with(
        EnemyProfile::new("devil", "Devil", 52, 13)
            .initiative(2)
            .saves(3)
            .attack(EnemyAttack::new("Glaive", 5, DiceExpression::new(1, D10, 3)))
            .attack(EnemyAttack::new("Beard", 5, DiceExpression::new(1, D8, 2)))
            .targeting(TargetPolicy::HighestHp)
            .pursuing()
            .xp(450),
    )
    .with(
        EnemyProfile::new("mud_mephit", "Mud Mephit", 27, 11)
            .initiative(1)
            .attack(EnemyAttack::new("Fists", 3, DiceExpression::new(1, D6, 1)))
            .xp(50),
    )
    .with(
        EnemyProfile::new("kobold", "Kobold", 5, 12)
            .initiative(2)
            .attack(EnemyAttack::new("Dagger", 4, DiceExpression::new(1, D4, 2)))
            .xp(25),
    )
    .with(
        EnemyProfile::new("ghoul", "Ghoul", 22, 12)
            .initiative(2)
            .attack(EnemyAttack::new("Claws", 4, DiceExpression::new(2, D4, 2)))
            .attack(EnemyAttack::new("Bite", 2, DiceExpression::new(2, D6, 2)))
            .targeting(TargetPolicy::Player)
            .pursuing()
            .xp(200),
    )
}

/// A group of identical enemies in an encounter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnemyGroup {
    pub kind: String,
    pub count: u32,
}

impl EnemyGroup {
    pub fn new(kind: impl Into<String>, count: u32) -> Self {
        Self {
            kind: kind.into(),
            count,
        }
    }
}

/// A combat scenario: who shows up and where the story goes afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Encounter {
    pub name: String,
    pub enemies: Vec<EnemyGroup>,
    /// Stat blocks that take precedence over the bestiary for this fight.
    #[serde(default)]
    pub stat_blocks: Vec<EnemyProfile>,
    pub victory_scene: String,
    pub defeat_scene: String,
    /// Scene reached by fleeing; `None` means there is no escape.
    #[serde(default)]
    pub flee_scene: Option<String>,
}

impl Encounter {
    pub fn new(
        name: impl Into<String>,
        victory_scene: impl Into<String>,
        defeat_scene: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            enemies: Vec::new(),
            stat_blocks: Vec::new(),
            victory_scene: victory_scene.into(),
            defeat_scene: defeat_scene.into(),
            flee_scene: None,
        }
    }

    pub fn with_enemies(mut self, kind: impl Into<String>, count: u32) -> Self {
        self.enemies.push(EnemyGroup::new(kind, count));
        self
    }

    pub fn with_stat_block(mut self, profile: EnemyProfile) -> Self {
        self.stat_blocks.push(profile);
        self
    }

    pub fn with_flee_scene(mut self, scene: impl Into<String>) -> Self {
        self.flee_scene = Some(scene.into());
        self
    }

    /// Resolve an enemy type for this encounter.
    pub fn profile(&self, kind: &str, bestiary: &Bestiary) -> EnemyProfile {
        self.stat_blocks
            .iter()
            .find(|p| p.kind.eq_ignore_ascii_case(kind))
            .cloned()
            .unwrap_or_else(|| bestiary.get(kind))
    }

    pub fn enemy_count(&self) -> u32 {
        self.enemies.iter().map(|g| g.count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bestiary_lookup() {
        let bestiary = Bestiary::standard();
        let goblin = bestiary.get("Goblin");
        assert_eq!(goblin.max_hp, 7);
        assert_eq!(goblin.xp, 50);
        assert_eq!(goblin.attacks.len(), 2);
    }

    #[test]
    fn test_unknown_enemy_uses_default_block() {
        let bestiary = Bestiary::standard();
        let thing = bestiary.get("owlbear");
        assert_eq!(thing.kind, "owlbear");
        assert_eq!(thing.max_hp, 10);
        assert!(!thing.attacks.is_empty());
    }

    #[test]
    fn test_encounter_stat_blocks_override_bestiary() {
        let encounter = Encounter::new("Ambush", "win", "lose")
            .with_enemies("goblin", 2)
            .with_stat_block(EnemyProfile::new("goblin", "Goblin Boss", 21, 17));
        let bestiary = Bestiary::standard();
        assert_eq!(encounter.profile("goblin", &bestiary).max_hp, 21);
        assert_eq!(encounter.profile("kobold", &bestiary).max_hp, 5);
        assert_eq!(encounter.enemy_count(), 2);
    }
}
