//! Payload submitted by an agent to the current round.

use conclave_types::Participant;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One agent's proposed outcome for a round.
///
/// The value is an opaque JSON document; a `null` value carries the meaning
/// "the sender could not produce a result" and drives the NONE/FAIL edges of
/// the rounds that distinguish it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Address of the submitting agent.
    pub sender: Participant,

    /// The proposed value.
    pub value: Value,
}

impl Payload {
    /// Create a payload.
    pub fn new(sender: Participant, value: Value) -> Self {
        Self { sender, value }
    }
}
