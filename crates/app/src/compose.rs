//! Static composition of state machines.
//!
//! [`chain`] merges an ordered list of apps into one: final rounds of
//! earlier machines are rewired into initial rounds of later ones, and the
//! data dependencies between them are verified across every reachable
//! execution path before the composed machine exists. All failures here are
//! fatal configuration errors raised before any consensus round executes.

use crate::{AppError, AppSpec, BackgroundApp};
use conclave_types::{Event, RoundId};
use indexmap::{IndexMap, IndexSet};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Composition failure, naming the offending machines, rounds, and keys.
#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("composition requires at least two state machines, got {count}")]
    TooFewMachines { count: usize },

    #[error("state machine '{app}' appears more than once in the composition")]
    DuplicateMachine { app: String },

    #[error("state machine '{app}' is declaration-only and cannot be composed")]
    AbstractMachine { app: String },

    /// Round identity must be globally unique after composition.
    #[error("round {round} is declared by both '{first}' and '{second}'")]
    DuplicateRound {
        round: RoundId,
        first: String,
        second: String,
    },

    #[error("mapping key {round} is not a final round of any input machine")]
    MappingKeyNotFinal { round: RoundId },

    #[error("mapping target {round} is not an initial round of any input machine")]
    MappingTargetNotInitial { round: RoundId },

    /// Preconditions must be explicit, even if empty.
    #[error("entry round {round} of '{app}' declares no precondition keys")]
    MissingPreconditions { app: String, round: RoundId },

    #[error(
        "entry round {round} of '{app}' requires keys not guaranteed on the path \
         arriving from '{origin}': missing {missing:?}"
    )]
    UnsatisfiedPreconditions {
        app: String,
        round: RoundId,
        origin: String,
        missing: Vec<String>,
    },

    #[error(
        "event {event} has conflicting timeouts: {first:?} in '{first_app}' \
         vs {second:?} in '{second_app}'"
    )]
    TimeoutConflict {
        event: Event,
        first: Duration,
        first_app: String,
        second: Duration,
        second_app: String,
    },

    #[error("background app '{app}' shares round identifiers with its host: {rounds:?}")]
    BackgroundRoundsNotDisjoint { app: String, rounds: Vec<RoundId> },

    #[error("background app '{app}' start event {event} is not an outgoing edge of its initial round")]
    BackgroundStartEventUnknown { app: String, event: Event },

    #[error("background app '{app}' end event {event} does not lead to a final round")]
    BackgroundEndEventUnknown { app: String, event: Event },

    /// The merged declaration failed the standard app validation.
    #[error(transparent)]
    Invalid(#[from] AppError),
}

/// Merge an ordered list of state machines into one.
///
/// `mapping` rewires final rounds of earlier machines into initial rounds
/// of later ones. Data dependencies are verified along every simple path
/// through the chain: the precondition keys of each entered machine must be
/// a subset of the postcondition keys accumulated so far. A branch stops
/// expanding the moment it revisits a machine already on the current path
/// (treated as an intentional self-loop).
pub fn chain(
    specs: Vec<AppSpec>,
    mapping: IndexMap<RoundId, RoundId>,
) -> Result<AppSpec, ComposeError> {
    if specs.len() < 2 {
        return Err(ComposeError::TooFewMachines { count: specs.len() });
    }

    let mut names: IndexSet<String> = IndexSet::new();
    for spec in &specs {
        if spec.is_abstract() {
            return Err(ComposeError::AbstractMachine {
                app: spec.name().to_owned(),
            });
        }
        if !names.insert(spec.name().to_owned()) {
            return Err(ComposeError::DuplicateMachine {
                app: spec.name().to_owned(),
            });
        }
    }

    // Round identity must be globally unique post-composition.
    let mut round_owner: IndexMap<RoundId, usize> = IndexMap::new();
    for (idx, spec) in specs.iter().enumerate() {
        for round in spec.rounds() {
            if let Some(&first) = round_owner.get(&round) {
                return Err(ComposeError::DuplicateRound {
                    round,
                    first: specs[first].name().to_owned(),
                    second: spec.name().to_owned(),
                });
            }
            round_owner.insert(round, idx);
        }
    }

    // Mapping keys must be finals, targets must be entry rounds.
    let all_finals: IndexSet<RoundId> = specs
        .iter()
        .flat_map(|spec| spec.final_rounds.iter().copied())
        .collect();
    let mut entry_owner: IndexMap<RoundId, usize> = IndexMap::new();
    for (idx, spec) in specs.iter().enumerate() {
        for round in &spec.initial_rounds {
            entry_owner.insert(*round, idx);
        }
    }
    for (key, target) in &mapping {
        if !all_finals.contains(key) {
            return Err(ComposeError::MappingKeyNotFinal { round: *key });
        }
        if !entry_owner.contains_key(target) {
            return Err(ComposeError::MappingTargetNotInitial { round: *target });
        }
    }

    // Shared event labels across machines are interpreted as semantically
    // identical; log a caution rather than failing.
    for (i, left) in specs.iter().enumerate() {
        for right in specs.iter().skip(i + 1) {
            let shared: Vec<Event> = left
                .events()
                .intersection(&right.events())
                .copied()
                .collect();
            if !shared.is_empty() {
                warn!(
                    first = left.name(),
                    second = right.name(),
                    events = ?shared,
                    "event labels appear in multiple machines; assuming identical semantics"
                );
            }
        }
    }

    verify_data_dependencies(&specs, &mapping, &entry_owner)?;

    merge(specs, mapping)
}

/// Depth-first enumeration of every simple path through the chain of
/// machines, accumulating guaranteed postcondition keys and checking each
/// entered machine's declared preconditions against them.
fn verify_data_dependencies(
    specs: &[AppSpec],
    mapping: &IndexMap<RoundId, RoundId>,
    entry_owner: &IndexMap<RoundId, usize>,
) -> Result<(), ComposeError> {
    let mut path = vec![0usize];
    walk(specs, mapping, entry_owner, 0, &IndexSet::new(), &mut path)
}

fn walk(
    specs: &[AppSpec],
    mapping: &IndexMap<RoundId, RoundId>,
    entry_owner: &IndexMap<RoundId, usize>,
    idx: usize,
    guaranteed: &IndexSet<String>,
    path: &mut Vec<usize>,
) -> Result<(), ComposeError> {
    for (final_round, target) in mapping {
        if !specs[idx].final_rounds.contains(final_round) {
            continue;
        }
        let mut accumulated = guaranteed.clone();
        if let Some(post) = specs[idx].post_conditions.get(final_round) {
            accumulated.extend(post.iter().cloned());
        }
        let Some(&next_idx) = entry_owner.get(target) else {
            continue;
        };
        if path.contains(&next_idx) {
            // Revisiting a machine already on this path is treated as an
            // intentional self-loop and not re-expanded. A second entry
            // round of that machine is deliberately not re-validated here;
            // see the regression test covering multi-entry revisits.
            continue;
        }
        let pre = specs[next_idx]
            .pre_conditions
            .get(target)
            .ok_or_else(|| ComposeError::MissingPreconditions {
                app: specs[next_idx].name().to_owned(),
                round: *target,
            })?;
        let missing: Vec<String> = pre
            .iter()
            .filter(|key| !accumulated.contains(*key))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(ComposeError::UnsatisfiedPreconditions {
                app: specs[next_idx].name().to_owned(),
                round: *target,
                origin: specs[idx].name().to_owned(),
                missing,
            });
        }
        path.push(next_idx);
        walk(specs, mapping, entry_owner, next_idx, &accumulated, path)?;
        path.pop();
    }
    Ok(())
}

fn merge(
    specs: Vec<AppSpec>,
    mapping: IndexMap<RoundId, RoundId>,
) -> Result<AppSpec, ComposeError> {
    let name = {
        let names: Vec<&str> = specs.iter().map(AppSpec::name).collect();
        format!("{}_chained", names.join("_"))
    };

    // The composed entry comes from the first machine unchanged.
    let initial_round = specs[0].initial_round;
    let initial_rounds = specs[0].initial_rounds.clone();
    let pre_conditions = specs[0].pre_conditions.clone();

    // Union of transition functions: entries for mapped-away final rounds
    // are dropped and edges targeting them are redirected to their chain
    // destination.
    let mut transitions: IndexMap<RoundId, IndexMap<Event, RoundId>> = IndexMap::new();
    for spec in &specs {
        for (from, edges) in &spec.transitions {
            if mapping.contains_key(from) {
                continue;
            }
            let redirected: IndexMap<Event, RoundId> = edges
                .iter()
                .map(|(event, to)| (*event, mapping.get(to).copied().unwrap_or(*to)))
                .collect();
            transitions.insert(*from, redirected);
        }
    }

    // Only rounds with no further redirection remain final.
    let final_rounds: IndexSet<RoundId> = specs
        .iter()
        .flat_map(|spec| spec.final_rounds.iter().copied())
        .filter(|round| !mapping.contains_key(round))
        .collect();

    // Timeout union; the same event with two different values is a conflict.
    let mut event_timeouts: IndexMap<Event, Duration> = IndexMap::new();
    let mut timeout_sources: IndexMap<Event, usize> = IndexMap::new();
    for (idx, spec) in specs.iter().enumerate() {
        for (event, timeout) in &spec.event_timeouts {
            match event_timeouts.get(event) {
                Some(existing) if existing != timeout => {
                    let first_idx = timeout_sources.get(event).copied().unwrap_or_default();
                    return Err(ComposeError::TimeoutConflict {
                        event: *event,
                        first: *existing,
                        first_app: specs[first_idx].name().to_owned(),
                        second: *timeout,
                        second_app: spec.name().to_owned(),
                    });
                }
                Some(_) => {}
                None => {
                    event_timeouts.insert(*event, *timeout);
                    timeout_sources.insert(*event, idx);
                }
            }
        }
    }

    let persisted_keys: IndexSet<String> = specs
        .iter()
        .flat_map(|spec| spec.persisted_keys.iter().cloned())
        .collect();

    let post_conditions: IndexMap<RoundId, IndexSet<String>> = specs
        .iter()
        .flat_map(|spec| spec.post_conditions.iter())
        .filter(|(round, _)| final_rounds.contains(*round))
        .map(|(round, keys)| (*round, keys.clone()))
        .collect();

    let backgrounds: Vec<BackgroundApp> = specs
        .iter()
        .flat_map(|spec| spec.backgrounds.iter().cloned())
        .collect();

    let composed = AppSpec {
        name,
        initial_round,
        initial_rounds,
        transitions,
        final_rounds,
        event_timeouts,
        persisted_keys,
        pre_conditions,
        post_conditions,
        abstract_spec: false,
        backgrounds,
    };
    composed.validate()?;
    info!(
        app = %composed.name,
        rounds = composed.rounds().len(),
        "composed state machines"
    );
    Ok(composed)
}

impl AppSpec {
    /// Graft an auxiliary machine to run concurrently with this one.
    ///
    /// The background machine's round identifiers must be disjoint from the
    /// host's (and from previously attached backgrounds'); the start event
    /// must be an edge out of its initial round and the end event must lead
    /// it into a final round.
    pub fn with_background(
        mut self,
        spec: AppSpec,
        start_event: Event,
        end_event: Event,
    ) -> Result<Self, ComposeError> {
        let mut taken = self.rounds();
        for existing in &self.backgrounds {
            taken.extend(existing.spec.rounds());
        }
        let clash: Vec<RoundId> = spec
            .rounds()
            .iter()
            .filter(|round| taken.contains(*round))
            .copied()
            .collect();
        if !clash.is_empty() {
            return Err(ComposeError::BackgroundRoundsNotDisjoint {
                app: spec.name().to_owned(),
                rounds: clash,
            });
        }
        let starts = spec
            .outgoing(spec.initial_round())
            .is_some_and(|edges| edges.contains_key(&start_event));
        if !starts {
            return Err(ComposeError::BackgroundStartEventUnknown {
                app: spec.name().to_owned(),
                event: start_event,
            });
        }
        let ends = spec.transitions.values().any(|edges| {
            edges
                .get(&end_event)
                .is_some_and(|target| spec.is_final(*target))
        });
        if !ends {
            return Err(ComposeError::BackgroundEndEventUnknown {
                app: spec.name().to_owned(),
                event: end_event,
            });
        }
        info!(host = %self.name, background = spec.name(), "attached background app");
        self.backgrounds.push(BackgroundApp {
            spec,
            start_event,
            end_event,
        });
        Ok(self)
    }
}
