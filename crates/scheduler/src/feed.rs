//! The consensus engine boundary.

use conclave_types::{RoundId, SynchronizedData};

/// Outcome of one recovery step on the consensus channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStatus {
    /// The recovery action needs more ticks.
    InProgress,

    /// The channel is healthy again.
    Recovered,
}

/// What the scheduler consumes from the consensus engine.
///
/// The engine itself (block production, gossip, leader election) and the
/// wire encoding of this signal live behind this trait; the scheduler only
/// reads the current round, its height, the latest replicated snapshot, and
/// the local health of the channel.
pub trait ConsensusFeed {
    /// Whether the local channel to the consensus engine is healthy.
    fn is_healthy(&self) -> bool;

    /// Attempt or continue the local recovery action. Called once per tick
    /// while the channel is unhealthy or a recovery is underway; behaviour
    /// activity resumes only after [`RecoveryStatus::Recovered`].
    fn recover(&mut self) -> RecoveryStatus;

    /// The currently active consensus round, if the workflow has started.
    fn current_round(&self) -> Option<RoundId>;

    /// Number of completed round transitions. Changes exactly when the
    /// active round changes, including re-entries of the same round type.
    fn round_height(&self) -> u64;

    /// The latest synchronized-data snapshot.
    fn synchronized_data(&self) -> SynchronizedData;
}
