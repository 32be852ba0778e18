use conclave_app::{AppBuilder, AppError, AppSpec};
use conclave_scheduler::{AgentAction, EngineConfig, SchedulerBuilder, SchedulerError};
use conclave_test_helpers::{
    finite_def, probe_def, snapshot_with_participants, submitting_def, Probe, StubFeed,
};
use conclave_types::{BehaviourId, Event, Participant, RoundId};
use indexmap::IndexSet;
use serde_json::json;
use std::time::Duration;
use tracing_test::traced_test;

const COLLECT: RoundId = RoundId("collect");
const SUBMIT: RoundId = RoundId("submit");
const FINISHED: RoundId = RoundId("finished");
const DONE: Event = Event("DONE");
const RETRY_EVENT: Event = Event("ROUND_TIMEOUT");
const COLLECT_BEHAVIOUR: BehaviourId = BehaviourId("collect_behaviour");
const SUBMIT_BEHAVIOUR: BehaviourId = BehaviourId("submit_behaviour");

const WATCH: RoundId = RoundId("report_watch");
const VOTE: RoundId = RoundId("report_vote");
const REPORT_FINAL: RoundId = RoundId("report_final");
const REPORT: Event = Event("REPORT");
const REPORT_DONE: Event = Event("REPORT_DONE");
const WATCH_BEHAVIOUR: BehaviourId = BehaviourId("report_watch_behaviour");
const VOTE_BEHAVIOUR: BehaviourId = BehaviourId("report_vote_behaviour");

fn main_spec() -> AppSpec {
    AppBuilder::new("estimation")
        .initial_round(COLLECT)
        .transition(COLLECT, DONE, SUBMIT)
        .transition(SUBMIT, DONE, FINISHED)
        .transition(SUBMIT, RETRY_EVENT, COLLECT)
        .final_round(FINISHED)
        .build()
        .unwrap()
}

fn reporting_spec() -> AppSpec {
    AppBuilder::new("reporting")
        .initial_round(WATCH)
        .transition(WATCH, REPORT, VOTE)
        .transition(VOTE, REPORT_DONE, REPORT_FINAL)
        .final_round(REPORT_FINAL)
        .build()
        .unwrap()
}

fn builder(collect_probe: &Probe, submit_probe: &Probe) -> SchedulerBuilder {
    SchedulerBuilder::new(main_spec(), Participant::new("agent_0"))
        .behaviour(probe_def(COLLECT_BEHAVIOUR, COLLECT, collect_probe))
        .behaviour(probe_def(SUBMIT_BEHAVIOUR, SUBMIT, submit_probe))
        .initial_behaviour(COLLECT_BEHAVIOUR)
}

fn feed() -> StubFeed {
    StubFeed::new(COLLECT, snapshot_with_participants(4))
}

#[test]
fn test_build_rejects_duplicate_behaviour_id() {
    let probe = Probe::new();
    let result = SchedulerBuilder::new(main_spec(), Participant::new("agent_0"))
        .behaviour(probe_def(COLLECT_BEHAVIOUR, COLLECT, &probe))
        .behaviour(probe_def(COLLECT_BEHAVIOUR, SUBMIT, &probe))
        .initial_behaviour(COLLECT_BEHAVIOUR)
        .build();
    assert!(matches!(
        result,
        Err(SchedulerError::DuplicateBehaviourId { id }) if id == COLLECT_BEHAVIOUR
    ));
}

#[test]
fn test_build_rejects_duplicate_matching_round() {
    let probe = Probe::new();
    let result = SchedulerBuilder::new(main_spec(), Participant::new("agent_0"))
        .behaviour(probe_def(COLLECT_BEHAVIOUR, COLLECT, &probe))
        .behaviour(probe_def(SUBMIT_BEHAVIOUR, COLLECT, &probe))
        .initial_behaviour(COLLECT_BEHAVIOUR)
        .build();
    assert!(matches!(
        result,
        Err(SchedulerError::DuplicateMatchingRound { round, .. }) if round == COLLECT
    ));
}

#[test]
fn test_build_rejects_uncovered_round() {
    let probe = Probe::new();
    let result = SchedulerBuilder::new(main_spec(), Participant::new("agent_0"))
        .behaviour(probe_def(COLLECT_BEHAVIOUR, COLLECT, &probe))
        .initial_behaviour(COLLECT_BEHAVIOUR)
        .build();
    assert!(matches!(
        result,
        Err(SchedulerError::MissingBehaviour { round }) if round == SUBMIT
    ));
}

#[test]
fn test_build_rejects_behaviour_for_final_round() {
    let collect_probe = Probe::new();
    let submit_probe = Probe::new();
    let probe = Probe::new();
    let result = builder(&collect_probe, &submit_probe)
        .behaviour(probe_def(BehaviourId("finished_behaviour"), FINISHED, &probe))
        .build();
    assert!(matches!(
        result,
        Err(SchedulerError::BehaviourForFinalRound { round, .. }) if round == FINISHED
    ));
}

#[test]
fn test_build_rejects_behaviour_for_unknown_round() {
    let collect_probe = Probe::new();
    let submit_probe = Probe::new();
    let probe = Probe::new();
    let result = builder(&collect_probe, &submit_probe)
        .behaviour(probe_def(BehaviourId("ghost_behaviour"), RoundId("ghost"), &probe))
        .build();
    assert!(matches!(
        result,
        Err(SchedulerError::UnknownMatchingRound { round, .. }) if round == RoundId("ghost")
    ));
}

#[test]
fn test_build_requires_known_initial_behaviour() {
    let collect_probe = Probe::new();
    let submit_probe = Probe::new();
    let result = SchedulerBuilder::new(main_spec(), Participant::new("agent_0"))
        .behaviour(probe_def(COLLECT_BEHAVIOUR, COLLECT, &collect_probe))
        .behaviour(probe_def(SUBMIT_BEHAVIOUR, SUBMIT, &submit_probe))
        .build();
    assert!(matches!(result, Err(SchedulerError::MissingInitialBehaviour)));

    let result = builder(&collect_probe, &submit_probe)
        .initial_behaviour(BehaviourId("nobody"))
        .build();
    assert!(matches!(
        result,
        Err(SchedulerError::UnknownInitialBehaviour { .. })
    ));
}

#[traced_test]
#[test]
fn test_stable_height_keeps_the_same_instance() {
    let collect_probe = Probe::new();
    let submit_probe = Probe::new();
    let mut scheduler = builder(&collect_probe, &submit_probe).build().unwrap();
    let mut feed = feed();

    for _ in 0..5 {
        scheduler.act(&mut feed);
    }

    let counters = collect_probe.counters();
    assert_eq!(counters.instantiated, 1);
    assert_eq!(counters.ticks, 5);
    assert_eq!(counters.cleanups, 0);
    assert_eq!(scheduler.active_behaviour_id(), Some(COLLECT_BEHAVIOUR));
}

#[traced_test]
#[test]
fn test_height_change_interrupts_exactly_once() {
    let collect_probe = Probe::new();
    let submit_probe = Probe::new();
    let mut scheduler = builder(&collect_probe, &submit_probe).build().unwrap();
    let mut feed = feed();

    scheduler.act(&mut feed);
    assert_eq!(collect_probe.counters().instantiated, 1);

    feed.advance_round(SUBMIT);
    scheduler.act(&mut feed);

    // Exactly one clean-up of the outgoing instance, one instantiation
    // of the incoming one.
    assert_eq!(collect_probe.counters().cleanups, 1);
    assert_eq!(submit_probe.counters().instantiated, 1);
    assert_eq!(scheduler.active_behaviour_id(), Some(SUBMIT_BEHAVIOUR));

    scheduler.act(&mut feed);
    assert_eq!(submit_probe.counters().instantiated, 1);
    assert_eq!(submit_probe.counters().ticks, 2);
}

#[traced_test]
#[test]
fn test_same_round_reentry_restarts_the_behaviour() {
    let collect_probe = Probe::new();
    let submit_probe = Probe::new();
    let mut scheduler = builder(&collect_probe, &submit_probe).build().unwrap();
    let mut feed = feed();

    scheduler.act(&mut feed);
    // A retry loop re-enters collect: same round id, new height.
    feed.advance_round(SUBMIT);
    scheduler.act(&mut feed);
    feed.advance_round(COLLECT);
    scheduler.act(&mut feed);

    let counters = collect_probe.counters();
    assert_eq!(counters.instantiated, 2);
    assert_eq!(counters.cleanups, 1);
}

#[traced_test]
#[test]
fn test_final_round_leaves_main_slot_empty() {
    let collect_probe = Probe::new();
    let submit_probe = Probe::new();
    let mut scheduler = builder(&collect_probe, &submit_probe).build().unwrap();
    let mut feed = feed();

    scheduler.act(&mut feed);
    feed.advance_round(FINISHED);
    scheduler.act(&mut feed);

    assert_eq!(scheduler.active_behaviour_id(), None);
    assert_eq!(collect_probe.counters().cleanups, 1);
}

#[traced_test]
#[test]
fn test_done_behaviour_is_cleaned_up_and_slot_cleared() {
    let collect_probe = Probe::new();
    let submit_probe = Probe::new();
    let mut scheduler = SchedulerBuilder::new(main_spec(), Participant::new("agent_0"))
        .behaviour(finite_def(COLLECT_BEHAVIOUR, COLLECT, &collect_probe, 2))
        .behaviour(probe_def(SUBMIT_BEHAVIOUR, SUBMIT, &submit_probe))
        .initial_behaviour(COLLECT_BEHAVIOUR)
        .build()
        .unwrap();
    let mut feed = feed();

    scheduler.act(&mut feed);
    assert_eq!(scheduler.active_behaviour_id(), Some(COLLECT_BEHAVIOUR));

    scheduler.act(&mut feed);
    assert_eq!(scheduler.active_behaviour_id(), None);
    assert_eq!(collect_probe.counters().cleanups, 1);

    // Further ticks at the same height do not resurrect it.
    scheduler.act(&mut feed);
    assert_eq!(collect_probe.counters().instantiated, 1);
}

#[traced_test]
#[test]
fn test_background_behaviours_tick_on_every_healthy_call() {
    let collect_probe = Probe::new();
    let submit_probe = Probe::new();
    let watch_probe = Probe::new();
    let vote_probe = Probe::new();

    let spec = main_spec()
        .with_background(reporting_spec(), REPORT, REPORT_DONE)
        .unwrap();
    let mut scheduler = SchedulerBuilder::new(spec, Participant::new("agent_0"))
        .behaviour(finite_def(COLLECT_BEHAVIOUR, COLLECT, &collect_probe, 1))
        .behaviour(probe_def(SUBMIT_BEHAVIOUR, SUBMIT, &submit_probe))
        .behaviour(probe_def(WATCH_BEHAVIOUR, WATCH, &watch_probe))
        .behaviour(probe_def(VOTE_BEHAVIOUR, VOTE, &vote_probe))
        .initial_behaviour(COLLECT_BEHAVIOUR)
        .build()
        .unwrap();
    assert_eq!(
        scheduler.background_behaviour_ids(),
        vec![WATCH_BEHAVIOUR]
    );
    let mut feed = feed();

    // Tick 1: the main behaviour completes and is cleaned up. Ticks 2
    // and 3: no main at all. The background behaviour ticks every time.
    scheduler.act(&mut feed);
    scheduler.act(&mut feed);
    scheduler.act(&mut feed);
    assert_eq!(watch_probe.counters().ticks, 3);
    assert_eq!(scheduler.active_behaviour_id(), None);

    // And keeps ticking across main-round changes.
    feed.advance_round(SUBMIT);
    scheduler.act(&mut feed);
    assert_eq!(watch_probe.counters().ticks, 4);
}

#[traced_test]
#[test]
fn test_unhealthy_channel_suspends_all_activity() {
    let collect_probe = Probe::new();
    let submit_probe = Probe::new();
    let watch_probe = Probe::new();
    let vote_probe = Probe::new();

    let spec = main_spec()
        .with_background(reporting_spec(), REPORT, REPORT_DONE)
        .unwrap();
    let mut scheduler = SchedulerBuilder::new(spec, Participant::new("agent_0"))
        .behaviour(probe_def(COLLECT_BEHAVIOUR, COLLECT, &collect_probe))
        .behaviour(probe_def(SUBMIT_BEHAVIOUR, SUBMIT, &submit_probe))
        .behaviour(probe_def(WATCH_BEHAVIOUR, WATCH, &watch_probe))
        .behaviour(probe_def(VOTE_BEHAVIOUR, VOTE, &vote_probe))
        .initial_behaviour(COLLECT_BEHAVIOUR)
        .build()
        .unwrap();
    let mut feed = feed();

    scheduler.act(&mut feed);
    assert_eq!(collect_probe.counters().ticks, 1);
    assert_eq!(watch_probe.counters().ticks, 1);

    // Two recovery steps needed; during them nothing else runs.
    feed.go_unhealthy(2);
    for _ in 0..2 {
        let actions = scheduler.act(&mut feed);
        assert!(actions.is_empty());
        assert!(scheduler.is_recovering());
    }
    assert_eq!(collect_probe.counters().ticks, 1);
    assert_eq!(watch_probe.counters().ticks, 1);

    // The recovery completes on the next tick, still without behaviour
    // activity; the one after that resumes normally.
    scheduler.act(&mut feed);
    assert!(!scheduler.is_recovering());
    assert_eq!(collect_probe.counters().ticks, 1);

    scheduler.act(&mut feed);
    assert_eq!(collect_probe.counters().ticks, 2);
    assert_eq!(watch_probe.counters().ticks, 2);
}

#[traced_test]
#[test]
fn test_submitted_payload_surfaces_as_action() {
    let collect_probe = Probe::new();
    let submit_probe = Probe::new();
    let mut scheduler = SchedulerBuilder::new(main_spec(), Participant::new("agent_0"))
        .behaviour(submitting_def(
            COLLECT_BEHAVIOUR,
            COLLECT,
            &collect_probe,
            json!(1.5),
        ))
        .behaviour(probe_def(SUBMIT_BEHAVIOUR, SUBMIT, &submit_probe))
        .initial_behaviour(COLLECT_BEHAVIOUR)
        .build()
        .unwrap();
    let mut feed = feed();

    let actions = scheduler.act(&mut feed);
    assert_eq!(actions.len(), 1);
    let AgentAction::SubmitPayload { round, payload } = &actions[0];
    assert_eq!(*round, COLLECT);
    assert_eq!(payload.sender, Participant::new("agent_0"));
    assert_eq!(payload.value, json!(1.5));

    // Submission happens once; later ticks are quiet.
    let actions = scheduler.act(&mut feed);
    assert!(actions.is_empty());
}

#[test]
fn test_disabled_background_app_is_not_started() {
    let collect_probe = Probe::new();
    let submit_probe = Probe::new();
    let watch_probe = Probe::new();
    let vote_probe = Probe::new();

    let spec = main_spec()
        .with_background(reporting_spec(), REPORT, REPORT_DONE)
        .unwrap();
    let config = EngineConfig {
        enabled_background_apps: Some(IndexSet::new()),
        ..EngineConfig::default()
    };
    let scheduler = SchedulerBuilder::new(spec, Participant::new("agent_0"))
        .behaviour(probe_def(COLLECT_BEHAVIOUR, COLLECT, &collect_probe))
        .behaviour(probe_def(SUBMIT_BEHAVIOUR, SUBMIT, &submit_probe))
        .behaviour(probe_def(WATCH_BEHAVIOUR, WATCH, &watch_probe))
        .behaviour(probe_def(VOTE_BEHAVIOUR, VOTE, &vote_probe))
        .initial_behaviour(COLLECT_BEHAVIOUR)
        .config(config)
        .build()
        .unwrap();

    assert!(scheduler.background_behaviour_ids().is_empty());
    assert_eq!(watch_probe.counters().instantiated, 0);
}

#[test]
fn test_timeout_override_is_validated() {
    let collect_probe = Probe::new();
    let submit_probe = Probe::new();

    // Overriding an event on a non-initial edge is fine.
    let config = EngineConfig {
        event_timeout_overrides: [(RETRY_EVENT, Duration::from_secs(5))]
            .into_iter()
            .collect(),
        ..EngineConfig::default()
    };
    assert!(builder(&collect_probe, &submit_probe)
        .config(config)
        .build()
        .is_ok());

    // DONE is an outgoing edge of the initial round: a timeout there
    // has nothing to anchor on and must be rejected.
    let config = EngineConfig {
        event_timeout_overrides: [(DONE, Duration::from_secs(5))].into_iter().collect(),
        ..EngineConfig::default()
    };
    let result = builder(&collect_probe, &submit_probe).config(config).build();
    assert!(matches!(
        result,
        Err(SchedulerError::App(AppError::InitialRoundTimeouts { .. }))
    ));
}
