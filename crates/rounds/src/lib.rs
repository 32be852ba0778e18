//! Round model for the Conclave consensus-workflow engine.
//!
//! A round is one quorum-gated step of the shared workflow. Agents submit
//! payloads; the round collects them and, once its resolution rule is met,
//! its end-of-block evaluation yields a new synchronized-data snapshot and
//! the event naming the outgoing transition edge.
//!
//! # Collection strategies
//!
//! - [`CollectSameUntilThreshold`]: same payload from a `> 2/3` quorum
//! - [`CollectDifferentUntilAll`]: a distinct payload from every participant
//! - [`CollectSameUntilAll`]: unanimity, with a settle window before finalizing
//! - [`OnlyKeeperSends`]: a single elected sender resolves the round alone
//! - [`Terminal`]: degenerate sink round used purely as a composition seam
//!
//! All strategies reject payloads from senders outside the participant set
//! snapshotted at round start, so a round never holds more payloads than
//! there are participants.

mod collection;
mod error;
mod keeper;
mod payload;
mod round;
mod same_threshold;
mod until_all;

pub use error::{PayloadError, RoundInitError};
pub use keeper::{KeeperConfig, OnlyKeeperSends};
pub use payload::Payload;
pub use round::{Round, Terminal};
pub use same_threshold::{CollectSameUntilThreshold, SameThresholdConfig};
pub use until_all::{
    CollectDifferentUntilAll, CollectSameUntilAll, DifferentUntilAllConfig, SameUntilAllConfig,
};
