//! App declarations and their construction-time validation.

use crate::AppError;
use conclave_types::{Event, RoundId};
use indexmap::{IndexMap, IndexSet};
use std::time::Duration;

/// An auxiliary state machine grafted onto a host app.
///
/// The background machine executes concurrently with the host and
/// interleaves its own round sequence into the shared block stream. The
/// start event is the edge out of its initial round that activates the
/// auxiliary flow; the end event is the edge that leads it back into a
/// final round, ending the attachment.
#[derive(Debug, Clone)]
pub struct BackgroundApp {
    /// The auxiliary machine's declaration.
    pub spec: AppSpec,

    /// Edge out of the background initial round that starts the flow.
    pub start_event: Event,

    /// Edge that leads the background flow into a final round.
    pub end_event: Event,
}

/// Validated declaration of a transition-function state machine.
///
/// Built once at process start via [`AppBuilder`] (or [`crate::chain`]) and
/// shared immutably afterwards; only the running [`crate::AppMachine`]
/// carries mutable state.
#[derive(Debug, Clone)]
pub struct AppSpec {
    pub(crate) name: String,
    pub(crate) initial_round: RoundId,
    pub(crate) initial_rounds: IndexSet<RoundId>,
    pub(crate) transitions: IndexMap<RoundId, IndexMap<Event, RoundId>>,
    pub(crate) final_rounds: IndexSet<RoundId>,
    pub(crate) event_timeouts: IndexMap<Event, Duration>,
    pub(crate) persisted_keys: IndexSet<String>,
    pub(crate) pre_conditions: IndexMap<RoundId, IndexSet<String>>,
    pub(crate) post_conditions: IndexMap<RoundId, IndexSet<String>>,
    pub(crate) abstract_spec: bool,
    pub(crate) backgrounds: Vec<BackgroundApp>,
}

impl AppSpec {
    /// The app's name, used in composition errors and logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The round the machine starts in.
    pub fn initial_round(&self) -> RoundId {
        self.initial_round
    }

    /// All entry rounds, including the initial round.
    pub fn initial_rounds(&self) -> &IndexSet<RoundId> {
        &self.initial_rounds
    }

    /// The final (terminal, behaviourless) rounds.
    pub fn final_rounds(&self) -> &IndexSet<RoundId> {
        &self.final_rounds
    }

    /// Whether `round` is a final round.
    pub fn is_final(&self, round: RoundId) -> bool {
        self.final_rounds.contains(&round)
    }

    /// Resolve the successor of `(round, event)`, if the edge exists.
    pub fn next_round(&self, round: RoundId, event: Event) -> Option<RoundId> {
        self.transitions.get(&round)?.get(&event).copied()
    }

    /// The outgoing edges of a round.
    pub fn outgoing(&self, round: RoundId) -> Option<&IndexMap<Event, RoundId>> {
        self.transitions.get(&round)
    }

    /// The configured timeout for an event, if any.
    pub fn timeout_of(&self, event: Event) -> Option<Duration> {
        self.event_timeouts.get(&event).copied()
    }

    /// Keys that survive a workflow-period reset.
    pub fn persisted_keys(&self) -> &IndexSet<String> {
        &self.persisted_keys
    }

    /// Precondition keys declared for an entry round.
    pub fn pre_conditions(&self, round: RoundId) -> Option<&IndexSet<String>> {
        self.pre_conditions.get(&round)
    }

    /// Postcondition keys guaranteed by a final round.
    pub fn post_conditions(&self, round: RoundId) -> Option<&IndexSet<String>> {
        self.post_conditions.get(&round)
    }

    /// Whether this is a declaration-only placeholder not meant to run.
    pub fn is_abstract(&self) -> bool {
        self.abstract_spec
    }

    /// The attached background apps.
    pub fn backgrounds(&self) -> &[BackgroundApp] {
        &self.backgrounds
    }

    /// Every declared round: transition sources and targets, entry rounds,
    /// and final rounds, in declaration order.
    pub fn rounds(&self) -> IndexSet<RoundId> {
        let mut rounds: IndexSet<RoundId> = self.initial_rounds.iter().copied().collect();
        for (from, edges) in &self.transitions {
            rounds.insert(*from);
            rounds.extend(edges.values().copied());
        }
        rounds.extend(self.final_rounds.iter().copied());
        rounds
    }

    /// Every event label appearing on an edge.
    pub fn events(&self) -> IndexSet<Event> {
        self.transitions
            .values()
            .flat_map(|edges| edges.keys().copied())
            .collect()
    }

    /// Set or replace the timeout of an event (configuration surface
    /// override). Fails if no edge emits the event, or if the override
    /// breaks a declaration invariant; the spec is left unchanged on error.
    pub fn override_timeout(&mut self, event: Event, timeout: Duration) -> Result<(), AppError> {
        if !self.events().contains(&event) {
            return Err(AppError::UnknownTimeoutEvent {
                app: self.name.clone(),
                event,
            });
        }
        let previous = self.event_timeouts.insert(event, timeout);
        if let Err(error) = self.validate() {
            match previous {
                Some(previous) => {
                    self.event_timeouts.insert(event, previous);
                }
                None => {
                    self.event_timeouts.shift_remove(&event);
                }
            }
            return Err(error);
        }
        Ok(())
    }

    /// Re-run the declaration checks. Used after composition merges.
    pub(crate) fn validate(&self) -> Result<(), AppError> {
        let declared = self.rounds();

        // Every edge target must itself be declared: either a transition
        // source or a final round.
        for edges in self.transitions.values() {
            for target in edges.values() {
                if !self.transitions.contains_key(target) && !self.final_rounds.contains(target) {
                    return Err(AppError::UndeclaredRound {
                        app: self.name.clone(),
                        round: *target,
                    });
                }
            }
        }

        // Final rounds are sinks.
        for round in &self.final_rounds {
            if self
                .transitions
                .get(round)
                .is_some_and(|edges| !edges.is_empty())
            {
                return Err(AppError::FinalRoundWithTransitions {
                    app: self.name.clone(),
                    round: *round,
                });
            }
        }

        // The initial round must be able to leave.
        let initial_edges = self
            .transitions
            .get(&self.initial_round)
            .filter(|edges| !edges.is_empty())
            .ok_or_else(|| AppError::InitialRoundWithoutTransitions {
                app: self.name.clone(),
                round: self.initial_round,
            })?;

        // No timeouts before the first block timestamp exists.
        let timed: Vec<Event> = initial_edges
            .keys()
            .filter(|event| self.event_timeouts.contains_key(*event))
            .copied()
            .collect();
        if !timed.is_empty() {
            return Err(AppError::InitialRoundTimeouts {
                app: self.name.clone(),
                round: self.initial_round,
                events: timed,
            });
        }

        // Timeouts must reference events some edge emits.
        let events = self.events();
        for event in self.event_timeouts.keys() {
            if !events.contains(event) {
                return Err(AppError::UnknownTimeoutEvent {
                    app: self.name.clone(),
                    event: *event,
                });
            }
        }

        // Every declared round must be reachable from an entry round.
        let mut reachable: IndexSet<RoundId> = self.initial_rounds.iter().copied().collect();
        let mut frontier: Vec<RoundId> = reachable.iter().copied().collect();
        while let Some(round) = frontier.pop() {
            if let Some(edges) = self.transitions.get(&round) {
                for target in edges.values() {
                    if reachable.insert(*target) {
                        frontier.push(*target);
                    }
                }
            }
        }
        let unreachable: Vec<RoundId> = declared
            .iter()
            .filter(|round| !reachable.contains(*round))
            .copied()
            .collect();
        if !unreachable.is_empty() {
            return Err(AppError::UnreachableRounds {
                app: self.name.clone(),
                rounds: unreachable,
            });
        }

        // Data-dependency declarations attach to entry and final rounds only.
        for round in self.pre_conditions.keys() {
            if !self.initial_rounds.contains(round) {
                return Err(AppError::PreconditionOnNonInitialRound {
                    app: self.name.clone(),
                    round: *round,
                });
            }
        }
        for round in self.post_conditions.keys() {
            if !self.final_rounds.contains(round) {
                return Err(AppError::PostconditionOnNonFinalRound {
                    app: self.name.clone(),
                    round: *round,
                });
            }
        }

        Ok(())
    }
}

/// Builder for [`AppSpec`] with an explicit, fallible `build` step.
#[derive(Debug, Default)]
pub struct AppBuilder {
    name: String,
    initial_round: Option<RoundId>,
    initial_rounds: IndexSet<RoundId>,
    transitions: IndexMap<RoundId, IndexMap<Event, RoundId>>,
    final_rounds: IndexSet<RoundId>,
    event_timeouts: IndexMap<Event, Duration>,
    persisted_keys: IndexSet<String>,
    pre_conditions: IndexMap<RoundId, IndexSet<String>>,
    post_conditions: IndexMap<RoundId, IndexSet<String>>,
    abstract_spec: bool,
}

impl AppBuilder {
    /// Start a declaration.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the round the machine starts in.
    pub fn initial_round(mut self, round: RoundId) -> Self {
        self.initial_round = Some(round);
        self.initial_rounds.insert(round);
        self
    }

    /// Declare an additional entry round (used as a chaining target).
    pub fn entry_round(mut self, round: RoundId) -> Self {
        self.initial_rounds.insert(round);
        self
    }

    /// Declare an edge: `from --event--> to`.
    pub fn transition(mut self, from: RoundId, event: Event, to: RoundId) -> Self {
        self.transitions.entry(from).or_default().insert(event, to);
        self
    }

    /// Declare a final round.
    pub fn final_round(mut self, round: RoundId) -> Self {
        self.final_rounds.insert(round);
        self
    }

    /// Configure the deadline for an event.
    pub fn timeout(mut self, event: Event, timeout: Duration) -> Self {
        self.event_timeouts.insert(event, timeout);
        self
    }

    /// Flag a synchronized-data key as surviving period resets.
    pub fn persist_key(mut self, key: impl Into<String>) -> Self {
        self.persisted_keys.insert(key.into());
        self
    }

    /// Declare the keys an entry round requires in the snapshot.
    pub fn pre_conditions<I, S>(mut self, round: RoundId, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pre_conditions
            .entry(round)
            .or_default()
            .extend(keys.into_iter().map(Into::into));
        self
    }

    /// Declare the keys a final round guarantees in the snapshot.
    pub fn post_conditions<I, S>(mut self, round: RoundId, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.post_conditions
            .entry(round)
            .or_default()
            .extend(keys.into_iter().map(Into::into));
        self
    }

    /// Mark this declaration as a placeholder not meant to run standalone.
    pub fn declaration_only(mut self) -> Self {
        self.abstract_spec = true;
        self
    }

    /// Validate and produce the spec.
    pub fn build(self) -> Result<AppSpec, AppError> {
        let initial_round = self
            .initial_round
            .ok_or_else(|| AppError::MissingInitialRound {
                app: self.name.clone(),
            })?;
        let spec = AppSpec {
            name: self.name,
            initial_round,
            initial_rounds: self.initial_rounds,
            transitions: self.transitions,
            final_rounds: self.final_rounds,
            event_timeouts: self.event_timeouts,
            persisted_keys: self.persisted_keys,
            pre_conditions: self.pre_conditions,
            post_conditions: self.post_conditions,
            abstract_spec: self.abstract_spec,
            backgrounds: Vec::new(),
        };
        spec.validate()?;
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLLECT: RoundId = RoundId("collect");
    const RETRY: RoundId = RoundId("retry");
    const FINISHED: RoundId = RoundId("finished");
    const DONE: Event = Event("DONE");
    const NO_MAJORITY: Event = Event("NO_MAJORITY");
    const TIMEOUT: Event = Event("ROUND_TIMEOUT");

    fn valid_builder() -> AppBuilder {
        AppBuilder::new("estimation")
            .initial_round(COLLECT)
            .transition(COLLECT, DONE, FINISHED)
            .transition(COLLECT, NO_MAJORITY, RETRY)
            .transition(RETRY, DONE, FINISHED)
            .final_round(FINISHED)
    }

    #[test]
    fn test_valid_declaration_builds() {
        let spec = valid_builder().build().unwrap();
        assert_eq!(spec.initial_round(), COLLECT);
        assert_eq!(spec.next_round(COLLECT, DONE), Some(FINISHED));
        assert!(spec.is_final(FINISHED));
        assert_eq!(spec.rounds().len(), 3);
    }

    #[test]
    fn test_missing_initial_round_rejected() {
        let result = AppBuilder::new("broken")
            .transition(COLLECT, DONE, FINISHED)
            .final_round(FINISHED)
            .build();
        assert!(matches!(result, Err(AppError::MissingInitialRound { .. })));
    }

    #[test]
    fn test_edge_to_undeclared_round_rejected() {
        let result = AppBuilder::new("broken")
            .initial_round(COLLECT)
            .transition(COLLECT, DONE, RoundId("nowhere"))
            .build();
        assert!(matches!(result, Err(AppError::UndeclaredRound { round, .. }) if round == RoundId("nowhere")));
    }

    #[test]
    fn test_final_round_with_outgoing_edge_rejected() {
        let result = valid_builder()
            .transition(FINISHED, DONE, COLLECT)
            .build();
        assert!(matches!(
            result,
            Err(AppError::FinalRoundWithTransitions { .. })
        ));
    }

    #[test]
    fn test_unreachable_round_rejected() {
        let result = valid_builder()
            .transition(RoundId("island"), DONE, FINISHED)
            .build();
        assert!(matches!(result, Err(AppError::UnreachableRounds { rounds, .. }) if rounds == vec![RoundId("island")]));
    }

    #[test]
    fn test_initial_round_timeout_rejected() {
        let result = valid_builder()
            .timeout(DONE, Duration::from_secs(30))
            .build();
        assert!(matches!(result, Err(AppError::InitialRoundTimeouts { .. })));
    }

    #[test]
    fn test_timeout_for_unused_event_rejected() {
        let result = valid_builder()
            .timeout(TIMEOUT, Duration::from_secs(30))
            .build();
        assert!(matches!(result, Err(AppError::UnknownTimeoutEvent { event, .. }) if event == TIMEOUT));
    }

    #[test]
    fn test_timeout_on_non_initial_edge_accepted() {
        let spec = AppBuilder::new("estimation")
            .initial_round(COLLECT)
            .transition(COLLECT, DONE, RETRY)
            .transition(RETRY, TIMEOUT, RETRY)
            .transition(RETRY, DONE, FINISHED)
            .final_round(FINISHED)
            .timeout(TIMEOUT, Duration::from_secs(30))
            .build()
            .unwrap();
        assert_eq!(spec.timeout_of(TIMEOUT), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_condition_placement_enforced() {
        let result = valid_builder()
            .pre_conditions(RETRY, ["participants"])
            .build();
        assert!(matches!(
            result,
            Err(AppError::PreconditionOnNonInitialRound { .. })
        ));

        let result = valid_builder().post_conditions(COLLECT, ["estimate"]).build();
        assert!(matches!(
            result,
            Err(AppError::PostconditionOnNonFinalRound { .. })
        ));
    }

    #[test]
    fn test_override_timeout() {
        let mut spec = AppBuilder::new("estimation")
            .initial_round(COLLECT)
            .transition(COLLECT, DONE, RETRY)
            .transition(RETRY, TIMEOUT, FINISHED)
            .final_round(FINISHED)
            .timeout(TIMEOUT, Duration::from_secs(30))
            .build()
            .unwrap();

        spec.override_timeout(TIMEOUT, Duration::from_secs(5)).unwrap();
        assert_eq!(spec.timeout_of(TIMEOUT), Some(Duration::from_secs(5)));

        assert!(spec
            .override_timeout(Event("UNKNOWN"), Duration::from_secs(5))
            .is_err());
    }
}
