//! The behaviour contract and its per-tick context.

use conclave_rounds::Payload;
use conclave_types::{BehaviourId, Participant, RoundId, SynchronizedData};
use serde_json::Value;

/// Actions the scheduler wants the embedding runner to perform.
///
/// The scheduler itself performs no I/O; payload submissions surface here
/// and the runner hands them to the consensus engine for ordering.
#[derive(Debug, Clone)]
pub enum AgentAction {
    /// Submit a payload as a transaction for ordering.
    SubmitPayload { round: RoundId, payload: Payload },
}

/// What a behaviour can see and do during one tick.
pub struct BehaviourCx<'a> {
    data: &'a SynchronizedData,
    current_round: Option<RoundId>,
    round_height: u64,
    own_address: &'a Participant,
    actions: &'a mut Vec<AgentAction>,
}

impl<'a> BehaviourCx<'a> {
    pub(crate) fn new(
        data: &'a SynchronizedData,
        current_round: Option<RoundId>,
        round_height: u64,
        own_address: &'a Participant,
        actions: &'a mut Vec<AgentAction>,
    ) -> Self {
        Self {
            data,
            current_round,
            round_height,
            own_address,
            actions,
        }
    }

    /// The latest synchronized-data snapshot (read-only).
    pub fn synchronized_data(&self) -> &SynchronizedData {
        self.data
    }

    /// The consensus-reported current round.
    pub fn current_round(&self) -> Option<RoundId> {
        self.current_round
    }

    /// The consensus-reported round height. Behaviours waiting for their
    /// round to resolve compare this against the height they started at.
    pub fn round_height(&self) -> u64 {
        self.round_height
    }

    /// This agent's own address.
    pub fn own_address(&self) -> &Participant {
        self.own_address
    }

    /// Queue a payload for submission to the given round.
    pub fn submit_payload(&mut self, round: RoundId, value: Value) {
        self.actions.push(AgentAction::SubmitPayload {
            round,
            payload: Payload::new(self.own_address.clone(), value),
        });
    }
}

/// The agent-local executable counterpart of one round type.
///
/// Behaviours are resumable tasks: each [`act`] call advances at most one
/// suspension step and must never block. Typical bodies are small state
/// machines that compute a value, submit it via
/// [`BehaviourCx::submit_payload`], then watch the round height until the
/// round resolves.
///
/// The scheduler is single-threaded and cooperative, so implementations
/// need no internal synchronization.
///
/// [`act`]: Behaviour::act
pub trait Behaviour {
    /// Unique identifier of this behaviour.
    fn behaviour_id(&self) -> BehaviourId;

    /// The round type this behaviour is bound to.
    fn matching_round(&self) -> RoundId;

    /// Advance one step. Called once per scheduler tick.
    fn act(&mut self, cx: &mut BehaviourCx<'_>);

    /// Release any agent-local resources. Called exactly once, either when
    /// the behaviour reports done or when the round moves on without it.
    fn clean_up(&mut self) {}

    /// Whether the local work has finished.
    fn is_done(&self) -> bool;

    /// Force the behaviour into the done state.
    fn set_done(&mut self);
}
