use std::fmt;

use crate::model::State;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Stored/incoming state combination outside the transition table.
    IllegalTransition {
        stored: Option<State>,
        incoming: State,
    },
    /// Mutating operation on an id that is absent or already terminal.
    NotAlive(String),
    /// No feasible window; the request was rejected.
    SlotUnavailable(String),
    /// The only feasible window had already elapsed; the request was released.
    SlotExpired(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::IllegalTransition { stored, incoming } => {
                write!(f, "illegal state transition {stored:?} -> {incoming:?}")
            }
            RegistryError::NotAlive(id) => write!(f, "no live allocation: {id}"),
            RegistryError::SlotUnavailable(id) => write!(f, "slot not available: {id}"),
            RegistryError::SlotExpired(id) => write!(f, "slot expired: {id}"),
        }
    }
}

impl std::error::Error for RegistryError {}
