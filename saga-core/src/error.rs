//! Error taxonomy for rules resolution.
//!
//! Refusals never leave state half-mutated: an operation that returns an
//! error has not touched the character, party or combat state it was given.

use crate::dice::DiceError;
use thiserror::Error;

/// Why an operation was refused.
#[derive(Debug, Error)]
pub enum RulesError {
    /// The action itself is illegal right now (defeated actor, unknown or
    /// unprepared spell, no slot or hit die left, preparation cap reached...).
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    /// The operation does not apply to the current lifecycle state
    /// (advancing a resolved encounter, ending a rest that never started...).
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Dice error: {0}")]
    Dice(#[from] DiceError),
}

impl RulesError {
    pub(crate) fn action(msg: impl Into<String>) -> Self {
        RulesError::InvalidAction(msg.into())
    }

    pub(crate) fn transition(msg: impl Into<String>) -> Self {
        RulesError::InvalidTransition(msg.into())
    }

    /// True for refusals caused by the requested action.
    pub fn is_invalid_action(&self) -> bool {
        matches!(self, RulesError::InvalidAction(_))
    }

    /// True for refusals caused by the lifecycle state.
    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, RulesError::InvalidTransition(_))
    }
}

pub type RulesResult<T> = Result<T, RulesError>;
