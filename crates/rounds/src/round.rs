//! The round contract and the degenerate terminal round.

use crate::{Payload, PayloadError};
use conclave_types::{Event, Participant, RoundId, SynchronizedData};
use indexmap::IndexMap;
use serde_json::Value;

/// One quorum-gated step of the shared workflow.
///
/// A round is created the moment the preceding round's resolved event names
/// it as the successor, and replaced the instant its own [`end_of_block`]
/// returns a `(snapshot, event)` pair.
///
/// [`end_of_block`]: Round::end_of_block
pub trait Round {
    /// Stable identifier of this round.
    fn id(&self) -> RoundId;

    /// Pre-validate a payload against the current collection without
    /// recording it. Used by the mempool-facing check before ordering.
    fn check_payload(&self, payload: &Payload) -> Result<(), PayloadError>;

    /// Record a payload delivered in a committed block.
    fn process_payload(&mut self, payload: Payload) -> Result<(), PayloadError>;

    /// Evaluate the round at the end of a consensus block.
    ///
    /// Returns `None` while unresolved; once the resolution rule is met,
    /// returns the new synchronized-data snapshot and the event naming the
    /// outgoing edge. Reads of the replicated state happen only here: the
    /// block, not the payload, is the unit consensus is reached on.
    fn end_of_block(&mut self) -> Option<(SynchronizedData, Event)>;

    /// The payloads collected so far, keyed by sender.
    fn collection(&self) -> &IndexMap<Participant, Value>;

    /// Whether the round's quorum condition is currently met.
    fn threshold_reached(&self) -> bool;
}

/// Degenerate sink round.
///
/// Never accepts payloads and never resolves; it exists purely as a
/// composition seam marking the end of a machine. The app machine
/// instantiates one automatically for every final round.
#[derive(Debug)]
pub struct Terminal {
    id: RoundId,
    empty: IndexMap<Participant, Value>,
}

impl Terminal {
    /// Create a terminal round with the given identity.
    pub fn new(id: RoundId) -> Self {
        Self {
            id,
            empty: IndexMap::new(),
        }
    }
}

impl Round for Terminal {
    fn id(&self) -> RoundId {
        self.id
    }

    fn check_payload(&self, _payload: &Payload) -> Result<(), PayloadError> {
        Err(PayloadError::NotAccepted { round: self.id })
    }

    fn process_payload(&mut self, _payload: Payload) -> Result<(), PayloadError> {
        Err(PayloadError::NotAccepted { round: self.id })
    }

    fn end_of_block(&mut self) -> Option<(SynchronizedData, Event)> {
        None
    }

    fn collection(&self) -> &IndexMap<Participant, Value> {
        &self.empty
    }

    fn threshold_reached(&self) -> bool {
        false
    }
}
