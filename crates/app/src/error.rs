//! App declaration and runtime error types.

use conclave_rounds::{PayloadError, RoundInitError};
use conclave_types::{Event, RoundId};
use thiserror::Error;

/// Fatal error in an app declaration or its runtime wiring.
///
/// All variants are raised at construction time, before any consensus round
/// executes; none is retried.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("app '{app}' declares no initial round")]
    MissingInitialRound { app: String },

    #[error("initial round {round} of app '{app}' has no outgoing transitions")]
    InitialRoundWithoutTransitions { app: String, round: RoundId },

    /// Timeouts need a first block timestamp to anchor on, so the initial
    /// round's outgoing edges must not carry them.
    #[error(
        "initial round {round} of app '{app}' has timeout events on outgoing edges: {events:?}"
    )]
    InitialRoundTimeouts {
        app: String,
        round: RoundId,
        events: Vec<Event>,
    },

    #[error("app '{app}' has an edge targeting undeclared round {round}")]
    UndeclaredRound { app: String, round: RoundId },

    #[error("final round {round} of app '{app}' has outgoing transitions")]
    FinalRoundWithTransitions { app: String, round: RoundId },

    #[error("rounds of app '{app}' unreachable from its initial rounds: {rounds:?}")]
    UnreachableRounds { app: String, rounds: Vec<RoundId> },

    #[error("app '{app}' configures a timeout for event {event} which no edge emits")]
    UnknownTimeoutEvent { app: String, event: Event },

    #[error("app '{app}' declares precondition keys for {round}, which is not an initial round")]
    PreconditionOnNonInitialRound { app: String, round: RoundId },

    #[error("app '{app}' declares postcondition keys for {round}, which is not a final round")]
    PostconditionOnNonFinalRound { app: String, round: RoundId },

    #[error("no round factory registered for non-final round {round}")]
    MissingRoundFactory { round: RoundId },

    #[error("round factory registered for final round {round}; final rounds are behaviourless")]
    FactoryForFinalRound { round: RoundId },

    #[error("round {round} failed to initialize")]
    RoundInit {
        round: RoundId,
        #[source]
        source: RoundInitError,
    },

    /// A payload arrived for a round that is neither the current main round
    /// nor an active background round.
    #[error("payload addressed to inactive round {round}")]
    PayloadForInactiveRound { round: RoundId },

    #[error(transparent)]
    Payload(#[from] PayloadError),
}
