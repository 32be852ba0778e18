//! Round error types.

use conclave_types::{Participant, RoundId, SyncDataError};
use serde_json::Value;
use thiserror::Error;

/// Validation failure for a submitted payload.
///
/// These are per-payload rejections, not round failures: the round keeps
/// collecting from other senders.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PayloadError {
    /// The sender is not in the participant set snapshotted at round start.
    #[error("sender {sender} is not a recognized participant of round {round}")]
    UnknownSender { round: RoundId, sender: Participant },

    /// The sender already submitted for a round that admits one submission.
    #[error("sender {sender} already submitted a payload for round {round}")]
    AlreadySubmitted { round: RoundId, sender: Participant },

    /// The sender re-submitted with a value conflicting with what the round
    /// already holds.
    #[error("sender {sender} submitted a conflicting payload for round {round}")]
    ConflictingPayload { round: RoundId, sender: Participant },

    /// A distinct-payload round already collected this value from another
    /// sender.
    #[error("value {value} was already collected for round {round}")]
    DuplicateValue { round: RoundId, value: Value },

    /// The sender is not the elected keeper.
    #[error("sender {sender} is not the elected keeper for round {round}")]
    NotKeeper { round: RoundId, sender: Participant },

    /// The round does not accept payloads at all.
    #[error("round {round} does not accept payloads")]
    NotAccepted { round: RoundId },
}

/// Failure constructing a round from the latest snapshot.
///
/// Raised when the snapshot is missing the data a round needs at start
/// (the participant set, the elected keeper). With composition-time
/// precondition checking in place this indicates a wiring bug, so it is
/// surfaced as a hard error rather than tolerated.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoundInitError {
    #[error("cannot initialize round {round}: {source}")]
    Snapshot {
        round: RoundId,
        #[source]
        source: SyncDataError,
    },
}
