//! Per-agent scheduler mapping consensus rounds to local behaviours.
//!
//! Each agent runs one [`RoundBehaviourScheduler`]: a single-threaded,
//! tick-driven driver that observes the consensus engine's round signal
//! through a [`ConsensusFeed`] and keeps exactly one main [`Behaviour`]
//! active for the current round, alongside an independent set of background
//! behaviours that tick on every call.
//!
//! All activity is gated behind the local health of the consensus channel;
//! while it is unhealthy the scheduler only drives the recovery action.

mod behaviour;
mod config;
mod feed;
mod scheduler;

pub use behaviour::{AgentAction, Behaviour, BehaviourCx};
pub use config::EngineConfig;
pub use feed::{ConsensusFeed, RecoveryStatus};
pub use scheduler::{BehaviourDef, RoundBehaviourScheduler, SchedulerBuilder, SchedulerError};
