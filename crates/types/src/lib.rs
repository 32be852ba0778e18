//! Core types for the Conclave consensus-workflow engine.
//!
//! This crate provides the foundational types shared by every layer:
//!
//! - Interned identifiers for rounds, events, and behaviours
//! - [`Participant`]: the sender identity recognized by a round
//! - Quorum arithmetic ([`consensus_threshold`], [`QuorumStrategy`])
//! - [`SynchronizedData`]: the immutable, versioned key/value snapshot
//!   replicated across agents and threaded through rounds

mod identifiers;
mod quorum;
mod sync_data;

pub use identifiers::{BehaviourId, Event, Participant, RoundId};
pub use quorum::{consensus_threshold, QuorumStrategy};
pub use sync_data::{SyncDataError, SynchronizedData, PARTICIPANTS_KEY};
