//! The running state-machine instance.

use crate::timeouts::Timeouts;
use crate::{AppError, AppSpec};
use conclave_rounds::{Payload, Round, RoundInitError, Terminal};
use conclave_types::{Event, RoundId, SynchronizedData};
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Factory producing a fresh round instance from the latest snapshot.
pub type RoundFactory = Box<dyn Fn(&SynchronizedData) -> Result<Box<dyn Round>, RoundInitError>>;

/// Maps round identifiers to their factories.
///
/// Final rounds take no factory; the machine instantiates a degenerate
/// [`Terminal`] round for them automatically.
#[derive(Default)]
pub struct RoundRegistry {
    factories: IndexMap<RoundId, RoundFactory>,
}

impl RoundRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the factory for a round.
    pub fn register<F>(&mut self, id: RoundId, factory: F)
    where
        F: Fn(&SynchronizedData) -> Result<Box<dyn Round>, RoundInitError> + 'static,
    {
        self.factories.insert(id, Box::new(factory));
    }

    /// Whether a factory is registered for `id`.
    pub fn contains(&self, id: RoundId) -> bool {
        self.factories.contains_key(&id)
    }

    fn instantiate(
        &self,
        id: RoundId,
        data: &SynchronizedData,
    ) -> Result<Box<dyn Round>, AppError> {
        let factory = self
            .factories
            .get(&id)
            .ok_or(AppError::MissingRoundFactory { round: id })?;
        factory(data).map_err(|source| AppError::RoundInit { round: id, source })
    }
}

impl fmt::Debug for RoundRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoundRegistry")
            .field("rounds", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A running background machine.
struct BackgroundRun {
    /// Index into the spec's background attachments.
    index: usize,
    current: Box<dyn Round>,
    current_id: RoundId,
}

/// The running instance of an [`AppSpec`].
///
/// Owns the single active main round, the independently advancing background
/// rounds, the result snapshots, and the pending event deadlines. Driven by
/// the consensus engine's block signal: payloads from committed blocks via
/// [`process_payload`], one [`end_of_block`] per height, and block
/// timestamps via [`update_time`].
///
/// [`process_payload`]: AppMachine::process_payload
/// [`end_of_block`]: AppMachine::end_of_block
/// [`update_time`]: AppMachine::update_time
pub struct AppMachine {
    spec: Arc<AppSpec>,
    registry: RoundRegistry,
    initial_data: SynchronizedData,
    current_round: Option<Box<dyn Round>>,
    previous_round_id: Option<RoundId>,
    round_height: u64,
    results: Vec<SynchronizedData>,
    timeouts: Timeouts,
    current_timeout_entries: Vec<u64>,
    last_timestamp: Option<Duration>,
    backgrounds: Vec<BackgroundRun>,
}

impl AppMachine {
    /// Create the machine, verifying the registry covers the spec: every
    /// non-final round of the main app and of each background app has a
    /// factory, and no final round has one.
    pub fn new(
        spec: Arc<AppSpec>,
        registry: RoundRegistry,
        initial_data: SynchronizedData,
    ) -> Result<Self, AppError> {
        Self::check_coverage(&spec, &registry)?;
        for background in spec.backgrounds() {
            Self::check_coverage(&background.spec, &registry)?;
        }
        Ok(Self {
            spec,
            registry,
            initial_data,
            current_round: None,
            previous_round_id: None,
            round_height: 0,
            results: Vec::new(),
            timeouts: Timeouts::new(),
            current_timeout_entries: Vec::new(),
            last_timestamp: None,
            backgrounds: Vec::new(),
        })
    }

    fn check_coverage(spec: &AppSpec, registry: &RoundRegistry) -> Result<(), AppError> {
        for round in spec.rounds() {
            if spec.is_final(round) {
                if registry.contains(round) {
                    return Err(AppError::FactoryForFinalRound { round });
                }
            } else if !registry.contains(round) {
                return Err(AppError::MissingRoundFactory { round });
            }
        }
        Ok(())
    }

    /// Enter the initial round and start every background machine.
    pub fn setup(&mut self) -> Result<(), AppError> {
        self.schedule_round(self.spec.initial_round())?;
        let snapshot = self.synchronized_data().clone();
        for (index, background) in self.spec.backgrounds().iter().enumerate() {
            let id = background.spec.initial_round();
            let round = self.registry.instantiate(id, &snapshot)?;
            info!(app = background.spec.name(), round = %id, "background app started");
            self.backgrounds.push(BackgroundRun {
                index,
                current: round,
                current_id: id,
            });
        }
        Ok(())
    }

    /// The identifier of the active main round.
    pub fn current_round_id(&self) -> Option<RoundId> {
        self.current_round.as_ref().map(|round| round.id())
    }

    /// The identifier of the previously active main round.
    pub fn previous_round_id(&self) -> Option<RoundId> {
        self.previous_round_id
    }

    /// Number of completed main-round transitions. The scheduler watches
    /// this to detect round changes, including re-entries of the same round.
    pub fn round_height(&self) -> u64 {
        self.round_height
    }

    /// The latest synchronized-data snapshot.
    pub fn synchronized_data(&self) -> &SynchronizedData {
        self.results.last().unwrap_or(&self.initial_data)
    }

    /// The active main round, for read-only inspection.
    pub fn current_round(&self) -> Option<&dyn Round> {
        self.current_round.as_deref()
    }

    /// Whether the machine has hit a dead end (or was never set up).
    pub fn is_finished(&self) -> bool {
        self.current_round.is_none()
    }

    /// Identifiers of the currently running background rounds.
    pub fn background_round_ids(&self) -> Vec<RoundId> {
        self.backgrounds.iter().map(|run| run.current_id).collect()
    }

    fn route(&self, round: RoundId) -> Result<&dyn Round, AppError> {
        if let Some(current) = self.current_round.as_deref() {
            if current.id() == round {
                return Ok(current);
            }
        }
        self.backgrounds
            .iter()
            .find(|run| run.current_id == round)
            .map(|run| run.current.as_ref())
            .ok_or(AppError::PayloadForInactiveRound { round })
    }

    fn route_mut(&mut self, round: RoundId) -> Result<&mut Box<dyn Round>, AppError> {
        if let Some(current) = self.current_round.as_mut() {
            if current.id() == round {
                return Ok(current);
            }
        }
        self.backgrounds
            .iter_mut()
            .find(|run| run.current_id == round)
            .map(|run| &mut run.current)
            .ok_or(AppError::PayloadForInactiveRound { round })
    }

    /// Pre-validate a payload addressed to `round` against the active main
    /// or background round.
    pub fn check_payload(&self, round: RoundId, payload: &Payload) -> Result<(), AppError> {
        self.route(round)?.check_payload(payload)?;
        Ok(())
    }

    /// Record a payload delivered in a committed block.
    pub fn process_payload(&mut self, round: RoundId, payload: Payload) -> Result<(), AppError> {
        self.route_mut(round)?.process_payload(payload)?;
        Ok(())
    }

    /// Evaluate the active rounds at the end of a consensus block. Returns
    /// the event resolved by the main round, if it resolved.
    pub fn end_of_block(&mut self) -> Result<Option<Event>, AppError> {
        let mut main_event = None;
        if let Some(round) = self.current_round.as_mut() {
            if let Some((data, event)) = round.end_of_block() {
                self.process_event(event, Some(data))?;
                main_event = Some(event);
            }
        }
        self.advance_backgrounds()?;
        Ok(main_event)
    }

    /// Observe the latest block's timestamp, firing any expired event
    /// deadlines as transition events.
    pub fn update_time(&mut self, timestamp: Duration) -> Result<(), AppError> {
        self.timeouts.pop_cancelled();
        while let Some((deadline, event)) = self.timeouts.earliest() {
            if deadline > timestamp {
                break;
            }
            self.timeouts.pop();
            warn!(%event, ?deadline, ?timestamp, "event deadline expired");
            // The expired deadline becomes the machine's notion of "now" so
            // follow-up rounds schedule their own deadlines consistently.
            self.last_timestamp = Some(timestamp);
            self.process_event(event, None)?;
            self.timeouts.pop_cancelled();
        }
        self.last_timestamp = Some(timestamp);
        Ok(())
    }

    /// Process a resolved event: record the result snapshot, advance the
    /// round height, and enter the successor round.
    fn process_event(
        &mut self,
        event: Event,
        result: Option<SynchronizedData>,
    ) -> Result<(), AppError> {
        let Some(current_id) = self.current_round_id() else {
            info!(%event, "cannot process event: no active round");
            return Ok(());
        };
        match result {
            Some(data) => self.results.push(data),
            // Preemptively ended rounds (timeouts) carry the prior snapshot.
            None => {
                let duplicate = self.synchronized_data().clone();
                self.results.push(duplicate);
            }
        }
        self.round_height += 1;
        info!(round = %current_id, %event, height = self.round_height, "round done");
        match self.spec.next_round(current_id, event) {
            Some(next) => self.schedule_round(next)?,
            None => {
                warn!(round = %current_id, %event, "app has reached a dead end");
                self.previous_round_id = Some(current_id);
                self.current_round = None;
            }
        }
        Ok(())
    }

    /// Enter a round: cancel the outgoing round's deadlines, schedule the
    /// new round's, and instantiate it from the latest snapshot.
    fn schedule_round(&mut self, round: RoundId) -> Result<(), AppError> {
        debug!(round = %round, "scheduling round");
        for entry in self.current_timeout_entries.drain(..) {
            self.timeouts.cancel(entry);
        }
        if let Some(edges) = self.spec.outgoing(round) {
            for event in edges.keys() {
                if let Some(timeout) = self.spec.timeout_of(*event) {
                    // The initial round carries no timeout edges (validated),
                    // so a timestamp has always been observed by now.
                    let deadline = self.last_timestamp.unwrap_or_default() + timeout;
                    let entry = self.timeouts.add(deadline, *event);
                    info!(%event, ?timeout, ?deadline, "scheduled event deadline");
                    self.current_timeout_entries.push(entry);
                }
            }
        }
        let snapshot = self.synchronized_data().clone();
        let instance: Box<dyn Round> = if self.spec.is_final(round) {
            Box::new(Terminal::new(round))
        } else {
            self.registry.instantiate(round, &snapshot)?
        };
        self.previous_round_id = self.current_round_id();
        self.current_round = Some(instance);
        info!(round = %round, period = snapshot.period_count(), "entered round");
        Ok(())
    }

    /// Advance background rounds independently of the main flow.
    fn advance_backgrounds(&mut self) -> Result<(), AppError> {
        let mut idx = 0;
        while idx < self.backgrounds.len() {
            let Some((data, event)) = self.backgrounds[idx].current.end_of_block() else {
                idx += 1;
                continue;
            };
            let current_id = self.backgrounds[idx].current_id;
            let attachment = &self.spec.backgrounds()[self.backgrounds[idx].index];
            let name = attachment.spec.name().to_owned();
            let next = attachment
                .spec
                .next_round(current_id, event)
                .map(|next| (next, attachment.spec.is_final(next)));
            info!(app = %name, round = %current_id, %event, "background round resolved");
            self.results.push(data);
            match next {
                Some((_, true)) => {
                    info!(app = %name, "background app finished");
                    self.backgrounds.remove(idx);
                }
                Some((next, false)) => {
                    let snapshot = self.synchronized_data().clone();
                    let round = self.registry.instantiate(next, &snapshot)?;
                    let run = &mut self.backgrounds[idx];
                    run.current = round;
                    run.current_id = next;
                    idx += 1;
                }
                None => {
                    warn!(app = %name, %event, "background app reached a dead end");
                    self.backgrounds.remove(idx);
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for AppMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppMachine")
            .field("app", &self.spec.name())
            .field("current_round", &self.current_round_id())
            .field("round_height", &self.round_height)
            .field("backgrounds", &self.background_round_ids())
            .finish()
    }
}
