//! Domain-specific identifier types.
//!
//! Round, event, and behaviour identifiers are interned `&'static str`
//! newtypes: the workflow graph is a static declaration, so its labels are
//! compile-time constants and identity is cheap pointer-wide equality.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a round, derived from its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoundId(pub &'static str);

impl RoundId {
    /// Get the identifier as a string slice.
    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque label naming one outgoing transition edge of a round.
///
/// Events carry no payload; they are pure control signals resolved by a
/// round's end-of-block evaluation (e.g. `DONE`, `NO_MAJORITY`,
/// `ROUND_TIMEOUT`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Event(pub &'static str);

impl Event {
    /// Get the label as a string slice.
    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an agent-local behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BehaviourId(pub &'static str);

impl fmt::Display for BehaviourId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Agent address identifying the sender of a payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Participant(pub String);

impl Participant {
    /// Create a participant from any string-like address.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Get the address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
