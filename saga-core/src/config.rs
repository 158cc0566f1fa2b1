//! Tunable rule constants and the tables the resolvers read.

use crate::encounter::Bestiary;
use crate::items::ItemBook;
use crate::spells::SpellBook;
use crate::stats::ClassBook;
use serde::{Deserialize, Serialize};

/// How many spent hit dice a long rest gives back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HitDiceRecovery {
    /// Half the pool, rounded down, at least one.
    Half,
    All,
}

/// Cumulative XP needed to reach each level, starting at level 1.
pub const STANDARD_XP_THRESHOLDS: [u32; 20] = [
    0, 300, 900, 2700, 6500, 14000, 23000, 34000, 48000, 64000, 85000, 100000, 120000, 140000,
    165000, 195000, 225000, 265000, 305000, 355000,
];

/// Rule constants shared by every resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// A check total this far above the DC is a critical success.
    pub critical_margin: i32,
    /// Totals up to this far below the DC are a partial success.
    pub partial_margin: i32,
    /// `xp_thresholds[n]` is the XP needed for level `n + 1`.
    pub xp_thresholds: Vec<u32>,
    /// XP for enemy types missing from every table.
    pub default_xp: u32,
    /// DC of the Dexterity check to escape pursuing enemies.
    pub flee_dc: i32,
    /// Natural 20 on an attack always hits and doubles damage dice.
    pub natural_twenty_crits: bool,
    pub hit_dice_recovery: HitDiceRecovery,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            critical_margin: 10,
            partial_margin: 5,
            xp_thresholds: STANDARD_XP_THRESHOLDS.to_vec(),
            default_xp: 100,
            flee_dc: 10,
            natural_twenty_crits: true,
            hit_dice_recovery: HitDiceRecovery::Half,
        }
    }
}

impl RulesConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_critical_margin(mut self, margin: i32) -> Self {
        self.critical_margin = margin;
        self
    }

    pub fn with_partial_margin(mut self, margin: i32) -> Self {
        self.partial_margin = margin;
        self
    }

    pub fn with_xp_thresholds(mut self, thresholds: impl Into<Vec<u32>>) -> Self {
        self.xp_thresholds = thresholds.into();
        self
    }

    pub fn with_default_xp(mut self, xp: u32) -> Self {
        self.default_xp = xp;
        self
    }

    pub fn with_flee_dc(mut self, dc: i32) -> Self {
        self.flee_dc = dc;
        self
    }

    pub fn with_hit_dice_recovery(mut self, recovery: HitDiceRecovery) -> Self {
        self.hit_dice_recovery = recovery;
        self
    }

    pub fn with_natural_twenty_crits(mut self, enabled: bool) -> Self {
        self.natural_twenty_crits = enabled;
        self
    }

    /// Highest level reachable with the configured thresholds.
    pub fn max_level(&self) -> u8 {
        self.xp_thresholds.len().clamp(1, u8::MAX as usize) as u8
    }

    /// XP needed for `level`, if the table goes that high.
    pub fn xp_required(&self, level: u8) -> Option<u32> {
        if level == 0 {
            return Some(0);
        }
        self.xp_thresholds.get(level as usize - 1).copied()
    }

    /// Level reached with `xp` total experience.
    pub fn level_for_xp(&self, xp: u32) -> u8 {
        self.xp_thresholds
            .iter()
            .rposition(|&threshold| xp >= threshold)
            .map(|idx| (idx + 1).min(u8::MAX as usize) as u8)
            .unwrap_or(1)
    }
}

/// Every data table plus the rule constants, passed to the resolvers as one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Rulebook {
    pub config: RulesConfig,
    pub classes: ClassBook,
    pub spells: SpellBook,
    pub items: ItemBook,
    pub bestiary: Bestiary,
}

impl Rulebook {
    /// Standard tables with default constants.
    pub fn standard() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: RulesConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_classes(mut self, classes: ClassBook) -> Self {
        self.classes = classes;
        self
    }

    pub fn with_spells(mut self, spells: SpellBook) -> Self {
        self.spells = spells;
        self
    }

    pub fn with_items(mut self, items: ItemBook) -> Self {
        self.items = items;
        self
    }

    pub fn with_bestiary(mut self, bestiary: Bestiary) -> Self {
        self.bestiary = bestiary;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RulesConfig::default();
        assert_eq!(config.critical_margin, 10);
        assert_eq!(config.partial_margin, 5);
        assert_eq!(config.max_level(), 20);
        assert_eq!(config.xp_required(2), Some(300));
        assert_eq!(config.xp_required(21), None);
    }

    #[test]
    fn test_level_for_xp() {
        let config = RulesConfig::default();
        assert_eq!(config.level_for_xp(0), 1);
        assert_eq!(config.level_for_xp(299), 1);
        assert_eq!(config.level_for_xp(300), 2);
        assert_eq!(config.level_for_xp(1000), 3);
        assert_eq!(config.level_for_xp(1_000_000), 20);
    }

    #[test]
    fn test_from_json_partial() {
        let config = RulesConfig::from_json(r#"{ "partial_margin": 3, "flee_dc": 12 }"#).unwrap();
        assert_eq!(config.partial_margin, 3);
        assert_eq!(config.flee_dc, 12);
        assert_eq!(config.critical_margin, 10);
        assert_eq!(config.hit_dice_recovery, HitDiceRecovery::Half);
    }
}
