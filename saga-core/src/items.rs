//! Consumable item table.
//!
//! Inventory entries are plain identifiers; this table says what using one
//! does. Items without an entry can be carried but not used.

use crate::dice::{DiceExpression, DieType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Effect of using a consumable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemEffect {
    /// Restore hit points to the target.
    Heal(DiceExpression),
    /// Give back spent hit dice.
    RestoreHitDice(u8),
}

/// A usable item definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumableItem {
    pub name: String,
    pub effect: ItemEffect,
}

impl ConsumableItem {
    pub fn healing_potion(name: impl Into<String>, count: u32, bonus: i32) -> Self {
        Self {
            name: name.into(),
            effect: ItemEffect::Heal(DiceExpression::new(count, DieType::D4, bonus)),
        }
    }
}

lazy_static::lazy_static! {
    /// Standard consumables.
    pub static ref CONSUMABLES: Vec<ConsumableItem> = vec![
        ConsumableItem::healing_potion("Healing Potion", 2, 2),
        ConsumableItem::healing_potion("Greater Healing Potion", 4, 4),
        ConsumableItem::healing_potion("Superior Healing Potion", 8, 8),
        ConsumableItem {
            name: "Traveler's Tonic".to_string(),
            effect: ItemEffect::RestoreHitDice(1),
        },
    ];
}

/// Lookup table for usable items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemBook {
    items: HashMap<String, ConsumableItem>,
}

impl ItemBook {
    pub fn empty() -> Self {
        Self {
            items: HashMap::new(),
        }
    }

    /// The standard consumables.
    pub fn standard() -> Self {
        CONSUMABLES
            .iter()
            .cloned()
            .fold(Self::empty(), |book, item| book.with(item))
    }

    pub fn insert(&mut self, item: ConsumableItem) {
        self.items.insert(item.name.to_lowercase(), item);
    }

    pub fn with(mut self, item: ConsumableItem) -> Self {
        self.insert(item);
        self
    }

    /// Get a consumable by name (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&ConsumableItem> {
        self.items.get(&name.to_lowercase())
    }
}

impl Default for ItemBook {
    fn default() -> Self {
        Self::standard()
    }
}
