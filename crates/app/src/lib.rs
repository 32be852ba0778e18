//! Transition-function state machines and their composition.
//!
//! An app is a declarative graph: initial rounds, a transition function from
//! `(round, event)` to the next round, final rounds, per-event timeouts, and
//! the keys that survive a workflow-period reset. [`AppBuilder`] validates
//! the declaration once at construction; [`AppMachine`] is the running
//! instance that owns the current round and drives transitions from
//! end-of-block evaluations and expired timeouts.
//!
//! [`chain`] merges several apps into one, rewiring final rounds of earlier
//! machines into initial rounds of later ones and statically verifying that
//! every execution path provides the synchronized-data keys the next machine
//! requires.

mod compose;
mod error;
mod machine;
mod spec;
mod timeouts;

pub use compose::{chain, ComposeError};
pub use error::AppError;
pub use machine::{AppMachine, RoundFactory, RoundRegistry};
pub use spec::{AppBuilder, AppSpec, BackgroundApp};
