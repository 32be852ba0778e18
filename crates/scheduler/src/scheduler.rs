//! The round-behaviour scheduler.

use crate::behaviour::{AgentAction, Behaviour, BehaviourCx};
use crate::config::EngineConfig;
use crate::feed::{ConsensusFeed, RecoveryStatus};
use conclave_app::{AppError, AppSpec};
use conclave_types::{BehaviourId, Participant, RoundId};
use indexmap::{IndexMap, IndexSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Scheduler construction failure. All variants abort agent startup before
/// any consensus round executes.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("behaviour id {id} declared more than once")]
    DuplicateBehaviourId { id: BehaviourId },

    #[error("behaviours {first} and {second} both match round {round}")]
    DuplicateMatchingRound {
        round: RoundId,
        first: BehaviourId,
        second: BehaviourId,
    },

    #[error("behaviour {behaviour} matches {round}, which no app or background declares")]
    UnknownMatchingRound {
        behaviour: BehaviourId,
        round: RoundId,
    },

    #[error("non-final round {round} has no matching behaviour")]
    MissingBehaviour { round: RoundId },

    #[error("final round {round} must not have a matching behaviour (got {behaviour})")]
    BehaviourForFinalRound {
        round: RoundId,
        behaviour: BehaviourId,
    },

    #[error("no initial behaviour declared")]
    MissingInitialBehaviour,

    #[error("declared initial behaviour {id} is not in the behaviour set")]
    UnknownInitialBehaviour { id: BehaviourId },

    #[error(transparent)]
    App(#[from] AppError),
}

/// A behaviour declaration: identity, matching round, and the factory the
/// scheduler uses to instantiate a fresh instance on each round entry.
pub struct BehaviourDef {
    id: BehaviourId,
    round: RoundId,
    factory: Box<dyn Fn() -> Box<dyn Behaviour>>,
}

impl BehaviourDef {
    /// Declare a behaviour.
    pub fn new<F>(id: BehaviourId, round: RoundId, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Behaviour> + 'static,
    {
        Self {
            id,
            round,
            factory: Box::new(factory),
        }
    }

    /// The behaviour's identifier.
    pub fn id(&self) -> BehaviourId {
        self.id
    }

    /// The round this behaviour is bound to.
    pub fn matching_round(&self) -> RoundId {
        self.round
    }

    fn instantiate(&self) -> Box<dyn Behaviour> {
        (self.factory)()
    }
}

impl fmt::Debug for BehaviourDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BehaviourDef")
            .field("id", &self.id)
            .field("round", &self.round)
            .finish()
    }
}

/// Builder for [`RoundBehaviourScheduler`] with an explicit `build` step
/// performing all construction-time validation.
pub struct SchedulerBuilder {
    spec: AppSpec,
    own_address: Participant,
    initial_behaviour: Option<BehaviourId>,
    defs: Vec<BehaviourDef>,
    config: EngineConfig,
}

impl SchedulerBuilder {
    /// Start building a scheduler for the given (possibly composed) app.
    pub fn new(spec: AppSpec, own_address: Participant) -> Self {
        Self {
            spec,
            own_address,
            initial_behaviour: None,
            defs: Vec::new(),
            config: EngineConfig::default(),
        }
    }

    /// Register a behaviour declaration.
    pub fn behaviour(mut self, def: BehaviourDef) -> Self {
        self.defs.push(def);
        self
    }

    /// Declare which behaviour the agent starts from.
    pub fn initial_behaviour(mut self, id: BehaviourId) -> Self {
        self.initial_behaviour = Some(id);
        self
    }

    /// Apply the agent's configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate everything and produce the scheduler.
    pub fn build(self) -> Result<RoundBehaviourScheduler, SchedulerError> {
        let Self {
            mut spec,
            own_address,
            initial_behaviour,
            defs,
            config,
        } = self;

        for (event, timeout) in &config.event_timeout_overrides {
            spec.override_timeout(*event, *timeout)?;
        }

        // Behaviour ids and matching rounds are unique.
        let mut ids: IndexSet<BehaviourId> = IndexSet::new();
        let mut by_round: IndexMap<RoundId, BehaviourDef> = IndexMap::new();
        for def in defs {
            if !ids.insert(def.id()) {
                return Err(SchedulerError::DuplicateBehaviourId { id: def.id() });
            }
            if let Some(existing) = by_round.get(&def.matching_round()) {
                return Err(SchedulerError::DuplicateMatchingRound {
                    round: def.matching_round(),
                    first: existing.id(),
                    second: def.id(),
                });
            }
            by_round.insert(def.matching_round(), def);
        }

        // Every behaviour matches a declared round.
        let mut known_rounds = spec.rounds();
        for background in spec.backgrounds() {
            known_rounds.extend(background.spec.rounds());
        }
        for def in by_round.values() {
            if !known_rounds.contains(&def.matching_round()) {
                return Err(SchedulerError::UnknownMatchingRound {
                    behaviour: def.id(),
                    round: def.matching_round(),
                });
            }
        }

        // The main machine plus every enabled background machine is fully
        // covered: exactly one behaviour per non-final round, none for
        // final rounds.
        let enabled: Vec<usize> = spec
            .backgrounds()
            .iter()
            .enumerate()
            .filter(|(_, background)| config.background_enabled(background.spec.name()))
            .map(|(index, _)| index)
            .collect();
        {
            let mut machines: Vec<&AppSpec> = vec![&spec];
            machines.extend(enabled.iter().map(|&index| &spec.backgrounds()[index].spec));
            for machine in machines {
                for round in machine.rounds() {
                    match by_round.get(&round) {
                        Some(def) if machine.is_final(round) => {
                            return Err(SchedulerError::BehaviourForFinalRound {
                                round,
                                behaviour: def.id(),
                            });
                        }
                        None if !machine.is_final(round) => {
                            return Err(SchedulerError::MissingBehaviour { round });
                        }
                        _ => {}
                    }
                }
            }
        }

        // The declared initial behaviour is itself in the set.
        let initial = initial_behaviour.ok_or(SchedulerError::MissingInitialBehaviour)?;
        if !ids.contains(&initial) {
            return Err(SchedulerError::UnknownInitialBehaviour { id: initial });
        }

        let spec = Arc::new(spec);

        // Background behaviours start alongside the agent, one per enabled
        // background app, from its initial round.
        let mut backgrounds: Vec<Box<dyn Behaviour>> = Vec::new();
        for &index in &enabled {
            let round = spec.backgrounds()[index].spec.initial_round();
            if let Some(def) = by_round.get(&round) {
                let instance = def.instantiate();
                info!(
                    behaviour = %instance.behaviour_id(),
                    app = spec.backgrounds()[index].spec.name(),
                    "background behaviour started"
                );
                backgrounds.push(instance);
            }
        }

        Ok(RoundBehaviourScheduler {
            spec,
            own_address,
            behaviours: by_round,
            main: None,
            backgrounds,
            last_round_height: None,
            recovering: false,
        })
    }
}

/// The per-agent driver.
///
/// Owns the single currently-active main behaviour and the independent set
/// of background behaviours. [`act`] is the scheduling tick, called by the
/// embedding runner on its own cadence.
///
/// [`act`]: RoundBehaviourScheduler::act
pub struct RoundBehaviourScheduler {
    spec: Arc<AppSpec>,
    own_address: Participant,
    behaviours: IndexMap<RoundId, BehaviourDef>,
    main: Option<Box<dyn Behaviour>>,
    backgrounds: Vec<Box<dyn Behaviour>>,
    last_round_height: Option<u64>,
    recovering: bool,
}

impl RoundBehaviourScheduler {
    /// The behaviour currently driving the main round, if any.
    pub fn active_behaviour_id(&self) -> Option<BehaviourId> {
        self.main.as_ref().map(|behaviour| behaviour.behaviour_id())
    }

    /// Identifiers of the running background behaviours.
    pub fn background_behaviour_ids(&self) -> Vec<BehaviourId> {
        self.backgrounds
            .iter()
            .map(|behaviour| behaviour.behaviour_id())
            .collect()
    }

    /// Whether the scheduler is currently driving a recovery action.
    pub fn is_recovering(&self) -> bool {
        self.recovering
    }

    fn is_final_anywhere(&self, round: RoundId) -> bool {
        self.spec.is_final(round)
            || self
                .spec
                .backgrounds()
                .iter()
                .any(|background| background.spec.is_final(round))
    }

    /// One scheduling tick.
    ///
    /// 1. Gate on consensus-channel health; drive recovery and return if
    ///    unhealthy or a recovery is underway.
    /// 2. On a round-height change, unconditionally interrupt the outgoing
    ///    main behaviour and instantiate the one matching the new round.
    /// 3. Tick the main behaviour, cleaning it up when it reports done.
    /// 4. Tick every background behaviour, independent of the main one.
    pub fn act(&mut self, feed: &mut dyn ConsensusFeed) -> Vec<AgentAction> {
        let mut actions = Vec::new();

        if self.recovering || !feed.is_healthy() {
            let status = feed.recover();
            self.recovering = status == RecoveryStatus::InProgress;
            debug!(?status, "consensus channel recovery tick");
            return actions;
        }

        let height = feed.round_height();
        if self.last_round_height != Some(height) {
            self.last_round_height = Some(height);
            if let Some(mut outgoing) = self.main.take() {
                // Consensus has moved on; local progress on the abandoned
                // round is discarded.
                info!(
                    behaviour = %outgoing.behaviour_id(),
                    height,
                    "round advanced, interrupting main behaviour"
                );
                outgoing.clean_up();
            }
            if let Some(round) = feed.current_round() {
                match self.behaviours.get(&round) {
                    Some(def) => {
                        let instance = def.instantiate();
                        debug!(
                            behaviour = %instance.behaviour_id(),
                            round = %round,
                            height,
                            "main behaviour instantiated"
                        );
                        self.main = Some(instance);
                    }
                    // Final rounds are behaviourless; anything else
                    // uncovered would have failed construction.
                    None if self.is_final_anywhere(round) => {}
                    None => warn!(round = %round, "no behaviour matches the current round"),
                }
            }
        }

        if let Some(main) = self.main.as_mut() {
            let data = feed.synchronized_data();
            let mut cx = BehaviourCx::new(
                &data,
                feed.current_round(),
                height,
                &self.own_address,
                &mut actions,
            );
            main.act(&mut cx);
        }
        if self.main.as_ref().is_some_and(|main| main.is_done()) {
            if let Some(mut finished) = self.main.take() {
                debug!(behaviour = %finished.behaviour_id(), "main behaviour done");
                finished.clean_up();
            }
        }

        // Background behaviours tick on every healthy call, in their
        // insertion order, regardless of the main behaviour's state.
        let data = feed.synchronized_data();
        let current_round = feed.current_round();
        let mut index = 0;
        while index < self.backgrounds.len() {
            {
                let mut cx = BehaviourCx::new(
                    &data,
                    current_round,
                    height,
                    &self.own_address,
                    &mut actions,
                );
                self.backgrounds[index].act(&mut cx);
            }
            if self.backgrounds[index].is_done() {
                let mut finished = self.backgrounds.remove(index);
                debug!(behaviour = %finished.behaviour_id(), "background behaviour done");
                finished.clean_up();
            } else {
                index += 1;
            }
        }

        actions
    }
}

impl fmt::Debug for RoundBehaviourScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoundBehaviourScheduler")
            .field("app", &self.spec.name())
            .field("active", &self.active_behaviour_id())
            .field("backgrounds", &self.background_behaviour_ids())
            .field("last_round_height", &self.last_round_height)
            .field("recovering", &self.recovering)
            .finish()
    }
}
