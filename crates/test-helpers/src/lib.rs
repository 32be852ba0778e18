//! Shared test fixtures for the Conclave crates.
//!
//! Provides a scriptable [`StubFeed`] standing in for the consensus engine
//! and instrumented [`ProbeBehaviour`]s whose lifecycle (instantiations,
//! ticks, clean-ups, submissions) is observable through a shared [`Probe`].

use conclave_scheduler::{Behaviour, BehaviourCx, BehaviourDef, ConsensusFeed, RecoveryStatus};
use conclave_types::{BehaviourId, RoundId, SynchronizedData, PARTICIPANTS_KEY};
use serde_json::{json, Value};
use std::cell::RefCell;
use std::rc::Rc;

/// A genesis snapshot whose participant set is `agent_0` .. `agent_{n-1}`.
pub fn snapshot_with_participants(n: usize) -> SynchronizedData {
    let addrs: Vec<Value> = (0..n).map(|i| json!(format!("agent_{i}"))).collect();
    SynchronizedData::new([(PARTICIPANTS_KEY.to_owned(), Value::Array(addrs))])
}

/// Scriptable consensus feed.
///
/// Tests mutate the public fields (or use the helpers) between scheduler
/// ticks to simulate round advancement and channel outages.
#[derive(Debug, Clone)]
pub struct StubFeed {
    pub healthy: bool,
    /// Recovery steps still needed before the channel heals.
    pub recovery_ticks: u32,
    pub round: Option<RoundId>,
    pub height: u64,
    pub data: SynchronizedData,
}

impl StubFeed {
    /// A healthy feed sitting in `round` at height 0.
    pub fn new(round: RoundId, data: SynchronizedData) -> Self {
        Self {
            healthy: true,
            recovery_ticks: 0,
            round: Some(round),
            height: 0,
            data,
        }
    }

    /// Report a round transition: new round, height + 1.
    pub fn advance_round(&mut self, round: RoundId) {
        self.round = Some(round);
        self.height += 1;
    }

    /// Take the channel down; it heals after `recovery_ticks` recovery
    /// steps.
    pub fn go_unhealthy(&mut self, recovery_ticks: u32) {
        self.healthy = false;
        self.recovery_ticks = recovery_ticks;
    }
}

impl ConsensusFeed for StubFeed {
    fn is_healthy(&self) -> bool {
        self.healthy
    }

    fn recover(&mut self) -> RecoveryStatus {
        if self.recovery_ticks > 0 {
            self.recovery_ticks -= 1;
            RecoveryStatus::InProgress
        } else {
            self.healthy = true;
            RecoveryStatus::Recovered
        }
    }

    fn current_round(&self) -> Option<RoundId> {
        self.round
    }

    fn round_height(&self) -> u64 {
        self.height
    }

    fn synchronized_data(&self) -> SynchronizedData {
        self.data.clone()
    }
}

/// Lifecycle counters recorded by [`ProbeBehaviour`]s sharing one probe.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProbeCounters {
    pub instantiated: u32,
    pub ticks: u32,
    pub cleanups: u32,
    pub submissions: u32,
}

/// Shared handle to probe counters. Clone freely; all clones observe the
/// same counters.
#[derive(Debug, Default, Clone)]
pub struct Probe(Rc<RefCell<ProbeCounters>>);

impl Probe {
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot of the counters.
    pub fn counters(&self) -> ProbeCounters {
        self.0.borrow().clone()
    }
}

/// Instrumented behaviour used to observe scheduler decisions.
pub struct ProbeBehaviour {
    id: BehaviourId,
    round: RoundId,
    probe: Probe,
    submit: Option<Value>,
    done_after: Option<u32>,
    ticks: u32,
    done: bool,
}

impl ProbeBehaviour {
    fn def(
        id: BehaviourId,
        round: RoundId,
        probe: &Probe,
        submit: Option<Value>,
        done_after: Option<u32>,
    ) -> BehaviourDef {
        let probe = probe.clone();
        BehaviourDef::new(id, round, move || {
            probe.0.borrow_mut().instantiated += 1;
            Box::new(ProbeBehaviour {
                id,
                round,
                probe: probe.clone(),
                submit: submit.clone(),
                done_after,
                ticks: 0,
                done: false,
            })
        })
    }
}

/// A behaviour that ticks forever without finishing.
pub fn probe_def(id: BehaviourId, round: RoundId, probe: &Probe) -> BehaviourDef {
    ProbeBehaviour::def(id, round, probe, None, None)
}

/// A behaviour that submits `value` on its first tick and never finishes.
pub fn submitting_def(
    id: BehaviourId,
    round: RoundId,
    probe: &Probe,
    value: Value,
) -> BehaviourDef {
    ProbeBehaviour::def(id, round, probe, Some(value), None)
}

/// A behaviour that reports done after `done_after` ticks.
pub fn finite_def(
    id: BehaviourId,
    round: RoundId,
    probe: &Probe,
    done_after: u32,
) -> BehaviourDef {
    ProbeBehaviour::def(id, round, probe, None, Some(done_after))
}

impl Behaviour for ProbeBehaviour {
    fn behaviour_id(&self) -> BehaviourId {
        self.id
    }

    fn matching_round(&self) -> RoundId {
        self.round
    }

    fn act(&mut self, cx: &mut BehaviourCx<'_>) {
        self.ticks += 1;
        self.probe.0.borrow_mut().ticks += 1;
        if self.ticks == 1 {
            if let Some(value) = self.submit.clone() {
                cx.submit_payload(self.round, value);
                self.probe.0.borrow_mut().submissions += 1;
            }
        }
        if let Some(done_after) = self.done_after {
            if self.ticks >= done_after {
                self.done = true;
            }
        }
    }

    fn clean_up(&mut self) {
        self.probe.0.borrow_mut().cleanups += 1;
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn set_done(&mut self) {
        self.done = true;
    }
}
