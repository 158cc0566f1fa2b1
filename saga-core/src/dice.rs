//! Dice rolling primitives.
//!
//! Every random number in the engine flows through a [`DiceSource`], so a
//! test can substitute a scripted source and replay a fight exactly.
//! Supports standard dice notation: XdY+Z, keep highest/lowest, and
//! advantage/disadvantage on single d20 rolls.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Why a dice expression could not be parsed or rolled.
#[derive(Debug, Error)]
pub enum DiceError {
    #[error("Invalid dice notation: {0}")]
    InvalidNotation(String),
    #[error("Invalid die size: {0}")]
    InvalidDieSize(u32),
    #[error("A die must have at least one side (got {0})")]
    NonPositiveSides(i64),
    #[error("No dice specified")]
    NoDice,
    #[error("Cannot roll {0} dice at once (at most {max})", max = MAX_DICE)]
    TooManyDice(u32),
    #[error("Cannot keep {keep} dice when only rolling {count} (in {notation})")]
    InvalidKeepCount {
        keep: u32,
        count: u32,
        notation: String,
    },
}

/// Most dice a single notation term may roll.
pub const MAX_DICE: u32 = 100;

/// A source of die faces.
///
/// `roll` is only ever called with `sides >= 1` and must return a value in
/// `1..=sides`.
pub trait DiceSource {
    fn roll(&mut self, sides: u32) -> u32;
}

/// Uniform dice backed by a `rand` generator.
pub struct RandomDice<R = StdRng> {
    rng: R,
}

impl RandomDice<StdRng> {
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Reproducible dice for a given seed.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl<R: Rng> RandomDice<R> {
    pub fn with_rng(rng: R) -> Self {
        Self { rng }
    }
}

impl Default for RandomDice<StdRng> {
    fn default() -> Self {
        Self::from_entropy()
    }
}

impl<R: Rng> DiceSource for RandomDice<R> {
    fn roll(&mut self, sides: u32) -> u32 {
        self.rng.gen_range(1..=sides)
    }
}

/// Roll a single die with `sides` faces.
pub fn roll_die(dice: &mut dyn DiceSource, sides: i64) -> Result<u32, DiceError> {
    if sides <= 0 {
        return Err(DiceError::NonPositiveSides(sides));
    }
    let sides = u32::try_from(sides).map_err(|_| DiceError::InvalidDieSize(u32::MAX))?;
    Ok(dice.roll(sides).clamp(1, sides))
}

/// A d20 check: the natural face plus a flat modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRoll {
    pub natural: u32,
    pub modifier: i32,
    pub total: i32,
}

impl CheckRoll {
    pub fn is_natural_20(&self) -> bool {
        self.natural == 20
    }

    pub fn is_natural_1(&self) -> bool {
        self.natural == 1
    }
}

impl fmt::Display for CheckRoll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.modifier {
            0 => write!(f, "[{}] = {}", self.natural, self.total),
            m if m > 0 => write!(f, "[{}] + {} = {}", self.natural, m, self.total),
            m => write!(f, "[{}] - {} = {}", self.natural, m.abs(), self.total),
        }
    }
}

/// `d20 + modifier`.
pub fn roll_check(dice: &mut dyn DiceSource, modifier: i32) -> CheckRoll {
    roll_check_with_advantage(dice, modifier, Advantage::Normal)
}

/// `d20 + modifier`, rolling twice under advantage or disadvantage.
pub fn roll_check_with_advantage(
    dice: &mut dyn DiceSource,
    modifier: i32,
    advantage: Advantage,
) -> CheckRoll {
    let first = dice.roll(20).clamp(1, 20);
    let natural = match advantage {
        Advantage::Normal => first,
        Advantage::Advantage => first.max(dice.roll(20).clamp(1, 20)),
        Advantage::Disadvantage => first.min(dice.roll(20).clamp(1, 20)),
    };
    CheckRoll {
        natural,
        modifier,
        total: natural as i32 + modifier,
    }
}

/// Roll two d20s and keep the better or worse one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Advantage {
    #[default]
    Normal,
    Advantage,
    Disadvantage,
}

impl Advantage {
    /// Advantage and disadvantage from different sources cancel out.
    pub fn combine(self, other: Advantage) -> Advantage {
        match (self, other) {
            (Advantage::Normal, x) | (x, Advantage::Normal) => x,
            (Advantage::Advantage, Advantage::Disadvantage) => Advantage::Normal,
            (Advantage::Disadvantage, Advantage::Advantage) => Advantage::Normal,
            (Advantage::Advantage, Advantage::Advantage) => Advantage::Advantage,
            (Advantage::Disadvantage, Advantage::Disadvantage) => Advantage::Disadvantage,
        }
    }
}

/// Standard die types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DieType {
    D4,
    D6,
    D8,
    D10,
    D12,
    D20,
    D100,
}

impl DieType {
    pub fn sides(&self) -> u32 {
        match self {
            DieType::D4 => 4,
            DieType::D6 => 6,
            DieType::D8 => 8,
            DieType::D10 => 10,
            DieType::D12 => 12,
            DieType::D20 => 20,
            DieType::D100 => 100,
        }
    }

    pub fn from_sides(sides: u32) -> Option<DieType> {
        match sides {
            4 => Some(DieType::D4),
            6 => Some(DieType::D6),
            8 => Some(DieType::D8),
            10 => Some(DieType::D10),
            12 => Some(DieType::D12),
            20 => Some(DieType::D20),
            100 => Some(DieType::D100),
            _ => None,
        }
    }

    /// Fixed hit points gained per level instead of rolling (die/2 + 1).
    pub fn average(&self) -> i32 {
        (self.sides() / 2 + 1) as i32
    }
}

impl fmt::Display for DieType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "d{}", self.sides())
    }
}

/// `count` dice of one size, optionally keeping only the best or worst.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceComponent {
    pub count: u32,
    pub die_type: DieType,
    pub keep_highest: Option<u32>,
    pub keep_lowest: Option<u32>,
}

/// Dice plus a flat modifier, e.g. `2d6+3`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceExpression {
    pub components: Vec<DiceComponent>,
    pub modifier: i32,
    pub original: String,
}

impl DiceExpression {
    /// `count` dice of one type plus a flat modifier.
    pub fn new(count: u32, die_type: DieType, modifier: i32) -> Self {
        let mut expr = DiceExpression {
            components: vec![DiceComponent {
                count,
                die_type,
                keep_highest: None,
                keep_lowest: None,
            }],
            modifier,
            original: String::new(),
        };
        expr.original = expr.notation();
        expr
    }

    /// A fixed amount with no dice.
    pub fn flat(value: i32) -> Self {
        DiceExpression {
            components: Vec::new(),
            modifier: value,
            original: value.to_string(),
        }
    }

    /// Parse notation such as `1d20`, `2d6+1d4-1` or `4d6kh3`.
    pub fn parse(notation: &str) -> Result<Self, DiceError> {
        let notation = notation.trim().to_lowercase();
        let compact: String = notation.chars().filter(|c| !c.is_whitespace()).collect();

        let mut components = Vec::new();
        let mut modifier = 0i32;
        for (negative, term) in signed_terms(&compact)? {
            match parse_term(term)? {
                Term::Flat(value) if negative => modifier -= value,
                Term::Flat(value) => modifier += value,
                Term::Dice(_) if negative => {
                    return Err(DiceError::InvalidNotation(format!("-{term}")));
                }
                Term::Dice(component) => components.push(component),
            }
        }

        if components.is_empty() && modifier == 0 {
            return Err(DiceError::NoDice);
        }
        Ok(DiceExpression {
            components,
            modifier,
            original: notation,
        })
    }

    /// Same expression with a different flat modifier added on top.
    pub fn plus(&self, extra: i32) -> DiceExpression {
        let mut expr = self.clone();
        expr.modifier += extra;
        expr.original = expr.notation();
        expr
    }

    /// Same expression with every die count doubled (critical hits).
    pub fn doubled_dice(&self) -> DiceExpression {
        let mut expr = self.clone();
        for component in &mut expr.components {
            component.count = component.count.saturating_mul(2);
            component.keep_highest = component.keep_highest.map(|k| k.saturating_mul(2));
            component.keep_lowest = component.keep_lowest.map(|k| k.saturating_mul(2));
        }
        expr.original = expr.notation();
        expr
    }

    /// Add `count` extra dice of the given type.
    pub fn with_extra_dice(&self, count: u32, die_type: DieType) -> DiceExpression {
        let mut expr = self.clone();
        if count == 0 {
            return expr;
        }
        match expr
            .components
            .iter_mut()
            .find(|c| c.die_type == die_type && c.keep_highest.is_none() && c.keep_lowest.is_none())
        {
            Some(component) => component.count += count,
            None => expr.components.push(DiceComponent {
                count,
                die_type,
                keep_highest: None,
                keep_lowest: None,
            }),
        }
        expr.original = expr.notation();
        expr
    }

    /// Canonical notation for the expression.
    pub fn notation(&self) -> String {
        let mut out = self
            .components
            .iter()
            .map(|c| {
                let keep = match (c.keep_highest, c.keep_lowest) {
                    (Some(k), _) => format!("kh{k}"),
                    (_, Some(k)) => format!("kl{k}"),
                    _ => String::new(),
                };
                format!("{}{}{}", c.count, c.die_type, keep)
            })
            .collect::<Vec<_>>()
            .join("+");
        match self.modifier {
            0 if !out.is_empty() => {}
            m if out.is_empty() => out = m.to_string(),
            m if m > 0 => out.push_str(&format!("+{m}")),
            m => out.push_str(&format!("-{}", m.abs())),
        }
        out
    }

    /// Roll the expression with the given dice source.
    pub fn roll(&self, dice: &mut dyn DiceSource) -> RollResult {
        let component_results: Vec<ComponentResult> = self
            .components
            .iter()
            .map(|component| component.roll(dice))
            .collect();
        let total = component_results.iter().map(|c| c.subtotal as i32).sum::<i32>() + self.modifier;

        RollResult {
            expression: self.clone(),
            component_results,
            modifier: self.modifier,
            total,
        }
    }
}

impl DiceComponent {
    fn roll(&self, dice: &mut dyn DiceSource) -> ComponentResult {
        let sides = self.die_type.sides();
        let rolls: Vec<u32> = (0..self.count)
            .map(|_| dice.roll(sides).clamp(1, sides))
            .collect();

        let mut sorted = rolls.clone();
        let kept: Vec<u32> = match (self.keep_highest, self.keep_lowest) {
            (Some(keep), _) => {
                sorted.sort_unstable_by(|a, b| b.cmp(a));
                sorted.into_iter().take(keep as usize).collect()
            }
            (_, Some(keep)) => {
                sorted.sort_unstable();
                sorted.into_iter().take(keep as usize).collect()
            }
            _ => sorted,
        };

        ComponentResult {
            die_type: self.die_type,
            subtotal: kept.iter().sum(),
            rolls,
            kept,
        }
    }
}

impl FromStr for DiceExpression {
    type Err = DiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DiceExpression::parse(s)
    }
}

enum Term {
    Dice(DiceComponent),
    Flat(i32),
}

/// Split `2d6+1d4-1` into `(negative, term)` pairs.
fn signed_terms(notation: &str) -> Result<Vec<(bool, &str)>, DiceError> {
    let mut terms = Vec::new();
    let mut negative = false;
    let mut start = 0;
    for (i, ch) in notation.char_indices() {
        if ch != '+' && ch != '-' {
            continue;
        }
        if i > start {
            terms.push((negative, &notation[start..i]));
        } else if i > 0 {
            // Two signs in a row, e.g. "1d6+-2".
            return Err(DiceError::InvalidNotation(notation.to_string()));
        }
        negative = ch == '-';
        start = i + 1;
    }
    if start < notation.len() {
        terms.push((negative, &notation[start..]));
    } else if !notation.is_empty() {
        return Err(DiceError::InvalidNotation(notation.to_string()));
    }
    Ok(terms)
}

fn parse_term(term: &str) -> Result<Term, DiceError> {
    let invalid = || DiceError::InvalidNotation(term.to_string());
    let Some((count, rest)) = term.split_once('d') else {
        return term.parse().map(Term::Flat).map_err(|_| invalid());
    };

    let count: u32 = match count {
        "" => 1,
        digits => digits.parse().map_err(|_| invalid())?,
    };
    if count > MAX_DICE {
        return Err(DiceError::TooManyDice(count));
    }
    let (sides, keep_highest, keep_lowest) = match (rest.split_once("kh"), rest.split_once("kl")) {
        (Some((sides, keep)), _) => (sides, Some(keep.parse().map_err(|_| invalid())?), None),
        (_, Some((sides, keep))) => (sides, None, Some(keep.parse().map_err(|_| invalid())?)),
        _ => (rest, None, None),
    };
    let sides: u32 = sides.parse().map_err(|_| invalid())?;
    let die_type = DieType::from_sides(sides).ok_or(DiceError::InvalidDieSize(sides))?;

    match keep_highest.or(keep_lowest) {
        Some(keep) if keep > count => Err(DiceError::InvalidKeepCount {
            keep,
            count,
            notation: term.to_string(),
        }),
        _ => Ok(Term::Dice(DiceComponent {
            count,
            die_type,
            keep_highest,
            keep_lowest,
        })),
    }
}

impl fmt::Display for DiceExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.original)
    }
}

/// Faces rolled for one component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentResult {
    pub die_type: DieType,
    pub rolls: Vec<u32>,
    pub kept: Vec<u32>,
    pub subtotal: u32,
}

/// Everything rolled for an expression and the final total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollResult {
    pub expression: DiceExpression,
    pub component_results: Vec<ComponentResult>,
    pub modifier: i32,
    pub total: i32,
}

impl RollResult {
    /// Every face rolled, with dropped dice in parentheses: `[(1), 5, 3, 6] + 2`.
    pub fn dice_display(&self) -> String {
        let groups: Vec<String> = self
            .component_results
            .iter()
            .map(ComponentResult::faces)
            .collect();
        let dice = groups.join(" + ");

        match self.modifier {
            0 => dice,
            m if dice.is_empty() => m.to_string(),
            m if m > 0 => format!("{dice} + {m}"),
            m => format!("{dice} - {}", m.abs()),
        }
    }
}

impl ComponentResult {
    fn faces(&self) -> String {
        let mut unclaimed = self.kept.clone();
        let faces: Vec<String> = self
            .rolls
            .iter()
            .map(|&face| match unclaimed.iter().position(|&k| k == face) {
                Some(i) => {
                    unclaimed.swap_remove(i);
                    face.to_string()
                }
                None => format!("({face})"),
            })
            .collect();
        format!("[{}]", faces.join(", "))
    }
}

impl fmt::Display for RollResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.dice_display(), self.total)
    }
}
