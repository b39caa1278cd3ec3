use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use simkernel::{
    ActivityId, ActivityKind, ActivityState, ActorId, DeterminismCheck, Engine, Event,
    KernelError, Observer, PlatformBuilder, SeededRandom, SimBuilder, SimConfig, SimError,
    SimTime, SimcallKind, StopReason,
};

mod common;
use common::{approx, init_tracing, one_host, two_hosts};

/// Records completions and checks the life cycle rules while the simulation runs.
#[derive(Default)]
struct Audit {
    last_time: f64,
    kinds: BTreeMap<ActivityId, ActivityKind>,
    done: Vec<ActivityId>,
    terminal: BTreeMap<ActivityId, usize>,
    destroyed: BTreeSet<ActivityId>,
}

impl Observer for Audit {
    fn activity_created(&mut self, _now: SimTime, activity: ActivityId, kind: ActivityKind) {
        self.kinds.insert(activity, kind);
    }

    fn activity_state_changed(
        &mut self,
        _now: SimTime,
        activity: ActivityId,
        from: ActivityState,
        to: ActivityState,
    ) {
        assert!(!from.is_terminal(), "{activity} left terminal state {from:?}");
        if to.is_terminal() {
            *self.terminal.entry(activity).or_default() += 1;
        }
        if to == ActivityState::Done {
            self.done.push(activity);
        }
    }

    fn activity_destroyed(&mut self, _now: SimTime, activity: ActivityId) {
        assert!(self.destroyed.insert(activity), "{activity} destroyed twice");
    }

    fn time_advanced(&mut self, now: SimTime) {
        assert!(now.as_secs() >= self.last_time, "time went backwards");
        self.last_time = now.as_secs();
    }
}

#[test]
fn simultaneous_completions_in_one_step() {
    init_tracing();
    let mut builder = PlatformBuilder::new();
    let alice = builder.add_host("alice", 1e9).unwrap();
    let bob = builder.add_host("bob", 1e9).unwrap();
    let platform = builder.build();
    let mut engine = Engine::new(&platform, SimConfig::default());
    engine.add_observer(Audit::default());
    let first = engine
        .spawn("first", alice, |actor| async move {
            actor.execute(5e9).await.unwrap();
        })
        .unwrap();
    let second = engine
        .spawn("second", bob, |actor| async move {
            actor.execute(5e9).await.unwrap();
        })
        .unwrap();
    assert_eq!(engine.runnable(), [first, second]);
    while engine.run_round().unwrap() > 0 {}
    assert!(engine.runnable().is_empty());

    let woken = engine.advance_time().unwrap();
    assert_eq!(woken, [first, second]);
    assert!(approx(engine.now().as_secs(), 5.0));
    let done = engine.with_observer(|a: &mut Audit| a.done.clone()).unwrap();
    assert_eq!(done.len(), 2);
    assert!(done[0] < done[1], "completions follow creation order");

    let report = engine.run().unwrap();
    assert!(approx(report.end_time.as_secs(), 5.0));
    assert!(engine.advance_time().unwrap().is_empty());
}

#[test]
fn model_checker_picks_the_order() {
    init_tracing();
    let (platform, host) = one_host();
    let mut engine = Engine::new(&platform, SimConfig::default());
    let mailbox = engine.mailbox("race");
    let senders: Vec<ActorId> = (1..=2u32)
        .map(|i| {
            engine
                .spawn(format!("sender-{i}"), host, move |actor| async move {
                    actor.dsend(mailbox, i, 1.0).await.unwrap();
                })
                .unwrap()
        })
        .collect();
    assert_eq!(engine.poll_ready().unwrap(), 2);
    let pending = engine.pending_simcalls();
    assert_eq!(pending.len(), 2);
    assert!(pending.iter().all(|p| p.kind == SimcallKind::Send));
    // handle the second sender first
    engine.handle_simcall(senders[1]).unwrap();
    assert_eq!(engine.pending_simcalls().len(), 1);
    engine.run_round().unwrap();
    assert!(engine.pending_simcalls().is_empty());

    let received = Rc::new(RefCell::new(Vec::new()));
    let r = received.clone();
    engine
        .spawn("receiver", host, move |actor| async move {
            for _ in 0..2 {
                let value: u32 = actor.recv(mailbox).await.unwrap();
                r.borrow_mut().push(value);
            }
        })
        .unwrap();
    engine.run().unwrap();
    assert_eq!(*received.borrow(), [2, 1]);
}

#[test]
fn handling_a_missing_simcall_is_fatal() {
    init_tracing();
    let (platform, host) = one_host();
    let mut engine = Engine::new(&platform, SimConfig::default());
    let idle = engine
        .spawn("idle", host, |actor| async move {
            actor.sleep(1.0).await.unwrap();
        })
        .unwrap();
    assert!(engine.handle_simcall(idle).is_err());
    assert!(matches!(engine.run(), Err(KernelError::Terminated)));
}

#[test]
fn seeded_random_policy_is_reproducible() {
    init_tracing();
    let (platform, host) = one_host();
    let received = Rc::new(RefCell::new(Vec::new()));
    let output = SimBuilder::new_test().run(&platform, |engine| {
        received.borrow_mut().clear();
        engine.set_policy(SeededRandom::new(42));
        let mailbox = engine.mailbox("lottery");
        for i in 0..6u32 {
            engine
                .spawn(format!("player-{i}"), host, move |actor| async move {
                    actor.dsend(mailbox, i, 1.0).await.unwrap();
                })
                .unwrap();
        }
        let received = received.clone();
        engine
            .spawn("dealer", host, move |actor| async move {
                for _ in 0..6 {
                    let value: u32 = actor.recv(mailbox).await.unwrap();
                    received.borrow_mut().push(value);
                }
            })
            .unwrap();
    });
    assert!(output.result.is_ok());
    assert!(!output.events().unwrap().is_empty());
    let mut sorted = received.borrow().clone();
    sorted.sort();
    assert_eq!(sorted, [0, 1, 2, 3, 4, 5]);
}

fn lottery(config: SimConfig) -> Vec<u32> {
    let (platform, host) = one_host();
    let mut engine = Engine::new(&platform, config);
    let mailbox = engine.mailbox("lottery");
    for i in 0..6u32 {
        engine
            .spawn(format!("player-{i}"), host, move |actor| async move {
                actor.dsend(mailbox, i, 1.0).await.unwrap();
            })
            .unwrap();
    }
    let received = Rc::new(RefCell::new(Vec::new()));
    let r = received.clone();
    engine
        .spawn("dealer", host, move |actor| async move {
            for _ in 0..6 {
                let value: u32 = actor.recv(mailbox).await.unwrap();
                r.borrow_mut().push(value);
            }
        })
        .unwrap();
    engine.run().unwrap();
    received.take()
}

#[test]
fn configured_seed_selects_the_order() {
    init_tracing();
    assert_eq!(lottery(SimConfig::default()), [0, 1, 2, 3, 4, 5]);
    let orders: Vec<Vec<u32>> = (0..8)
        .map(|seed| lottery(SimConfig::new().with_seed(seed)))
        .collect();
    assert_eq!(lottery(SimConfig::new().with_seed(3)), orders[3]);
    assert!(orders.iter().any(|order| *order != [0, 1, 2, 3, 4, 5]));
    for order in &orders {
        let mut sorted = order.clone();
        sorted.sort();
        assert_eq!(sorted, [0, 1, 2, 3, 4, 5]);
    }
}

#[test]
#[should_panic]
fn nondeterminism_is_detected() {
    let (platform, host) = one_host();
    let mut iteration = 0.0;
    SimBuilder::new()
        .with_determinism_check(DeterminismCheck::Hash { iterations: 2 })
        .run(&platform, |engine| {
            iteration += 1.0;
            let duration = iteration;
            engine
                .spawn("clock", host, move |actor| async move {
                    actor.sleep(duration).await.unwrap();
                })
                .unwrap();
        })
        .unwrap();
}

#[test]
fn recorded_events() {
    init_tracing();
    let (platform, host) = one_host();
    let output = SimBuilder::new()
        .with_determinism_check(DeterminismCheck::Full { iterations: 2 })
        .run(&platform, |engine| {
            engine
                .spawn("sleeper", host, |actor| async move {
                    actor.sleep(2.0).await.unwrap();
                })
                .unwrap();
        });
    assert!(approx(output.end_time.as_secs(), 2.0));
    let events = output.events().unwrap();
    assert!(matches!(events[0], Event::ActorSpawned { .. }));
    assert!(events.contains(&Event::TimeAdvanced(SimTime::from_secs(2.0))));
    assert!(
        events
            .iter()
            .any(|e| matches!(e, Event::ActorTerminated { killed: false, .. }))
    );
    output.unwrap();
}

#[test]
fn time_limit() {
    init_tracing();
    let (platform, host) = one_host();
    let report = SimBuilder::new_test()
        .with_config(SimConfig::new().with_max_time(5.0))
        .run(&platform, |engine| {
            engine
                .spawn("ticker", host, |actor| async move {
                    loop {
                        actor.sleep(2.0).await.unwrap();
                    }
                })
                .unwrap();
        })
        .unwrap();
    assert_eq!(report.reason, StopReason::TimeLimit);
    assert!(approx(report.end_time.as_secs(), 5.0));
}

#[test]
fn deadlock_lists_blocked_actors() {
    init_tracing();
    let (platform, host) = one_host();
    let mut engine = Engine::new(&platform, SimConfig::default());
    let mailbox = engine.mailbox("silence");
    for name in ["left", "right"] {
        engine
            .spawn(name, host, move |actor| async move {
                let _ = actor.recv::<()>(mailbox).await;
            })
            .unwrap();
    }
    match engine.run() {
        Err(KernelError::Deadlock { blocked, .. }) => {
            let names: Vec<&str> = blocked.iter().map(|b| b.name.as_str()).collect();
            assert_eq!(names, ["left", "right"]);
            assert!(blocked.iter().all(|b| b.simcall == Some(SimcallKind::Wait)));
        }
        other => panic!("expected a deadlock, got {other:?}"),
    }
    assert!(matches!(engine.run(), Err(KernelError::Terminated)));
}

#[test]
fn activity_life_cycle() {
    init_tracing();
    let (builder, alice, bob, _) = two_hosts();
    let platform = builder.build();
    let mut engine = Engine::new(&platform, SimConfig::default());
    engine.add_observer(Audit::default());
    let mailbox = engine.mailbox("audit");
    engine
        .spawn("client", alice, move |actor| async move {
            let exec = actor.exec_async(3e9).await.unwrap();
            actor.sleep(1.0).await.unwrap();
            exec.cancel().await.unwrap();
            assert_eq!(
                actor.send_timeout(mailbox, 1u8, 1e3, 0.5).await,
                Err(SimError::Timeout)
            );
            actor.send(mailbox, 2u8, 1e3).await.unwrap();
            actor.execute(1e9).await.unwrap();
        })
        .unwrap();
    let server = engine
        .spawn("server", bob, move |actor| async move {
            actor.sleep(2.0).await.unwrap();
            assert_eq!(actor.recv::<u8>(mailbox).await, Ok(2));
            actor.sleep(100.0).await.unwrap();
        })
        .unwrap();
    engine
        .spawn("reaper", bob, move |actor| async move {
            actor.sleep(3.0).await.unwrap();
            actor.kill(server).await.unwrap();
        })
        .unwrap();
    engine.run().unwrap();
    engine
        .with_observer(|audit: &mut Audit| {
            assert!(audit.kinds.values().any(|k| *k == ActivityKind::Comm));
            for (activity, count) in &audit.terminal {
                assert_eq!(*count, 1, "{activity} ended {count} times");
            }
            for activity in &audit.destroyed {
                assert!(audit.terminal.contains_key(activity));
            }
        })
        .unwrap();
}

#[test]
fn kill_from_outside() {
    init_tracing();
    let (platform, host) = one_host();
    let mut engine = Engine::new(&platform, SimConfig::default());
    let looper = engine
        .spawn("looper", host, |actor| async move {
            loop {
                actor.yield_now().await.unwrap();
            }
        })
        .unwrap();
    for _ in 0..10 {
        engine.run_round().unwrap();
    }
    assert!(engine.is_alive(looper));
    engine.kill(looper).unwrap();
    assert!(!engine.is_alive(looper));
    assert_eq!(engine.kill(looper), Err(SimError::NoSuchActor(looper)));
    let report = engine.run().unwrap();
    assert!(approx(report.end_time.as_secs(), 0.0));
}

#[test]
fn link_state_of_an_unknown_link() {
    init_tracing();
    let (builder, _, _, link) = two_hosts();
    let (platform, _) = one_host();
    let mut engine = Engine::new(&platform, SimConfig::default());
    assert!(matches!(
        engine.set_link_state(link, false),
        Err(KernelError::UnknownLink(l)) if l == link
    ));

    let platform = builder.build();
    let mut engine = Engine::new(&platform, SimConfig::default());
    engine.set_link_state(link, false).unwrap();
    engine.set_link_state(link, true).unwrap();
}
