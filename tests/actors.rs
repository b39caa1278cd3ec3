use std::cell::RefCell;
use std::rc::Rc;

use simkernel::{
    ActorId, Engine, KernelError, Observer, PlatformBuilder, SimBuilder, SimError,
    SimTime, SpawnOptions, StopReason,
};

mod common;
use common::{approx, init_tracing, one_host, two_hosts};

/// Remembers how every actor ended.
#[derive(Default)]
struct Terminations(Vec<(ActorId, bool, f64)>);

impl Observer for Terminations {
    fn actor_terminated(&mut self, now: SimTime, actor: ActorId, killed: bool) {
        self.0.push((actor, killed, now.as_secs()));
    }
}

fn terminations(engine: &mut Engine) -> Vec<(ActorId, bool, f64)> {
    engine
        .with_observer(|t: &mut Terminations| t.0.clone())
        .unwrap()
}

#[test]
fn kill_and_join() {
    init_tracing();
    let (platform, host) = one_host();
    let mut engine = Engine::new(&platform, Default::default());
    engine.add_observer(Terminations::default());
    let worker = engine
        .spawn("worker", host, |actor| async move {
            actor.sleep(100.0).await.unwrap();
            unreachable!("killed while sleeping");
        })
        .unwrap();
    let killer = engine
        .spawn("killer", host, move |actor| async move {
            actor.sleep(1.0).await.unwrap();
            assert!(actor.is_alive(worker));
            actor.kill(worker).await.unwrap();
            assert!(!actor.is_alive(worker));
            assert_eq!(actor.kill(worker).await, Err(SimError::NoSuchActor(worker)));
        })
        .unwrap();
    let joiner = engine
        .spawn("joiner", host, move |actor| async move {
            actor.join(worker).await.unwrap();
            assert!(approx(actor.now().as_secs(), 1.0));
            // joining a dead actor returns at once
            actor.join(worker).await.unwrap();
        })
        .unwrap();
    let report = engine.run().unwrap();
    assert!(approx(report.end_time.as_secs(), 1.0));
    assert_eq!(
        terminations(&mut engine),
        [(worker, true, 1.0), (killer, false, 1.0), (joiner, false, 1.0)]
    );
}

#[test]
fn join_timeout() {
    init_tracing();
    let (platform, host) = one_host();
    SimBuilder::new_test()
        .run(&platform, |engine| {
            let sleeper = engine
                .spawn("sleeper", host, |actor| async move {
                    actor.sleep(3.0).await.unwrap();
                })
                .unwrap();
            engine
                .spawn("joiner", host, move |actor| async move {
                    assert_eq!(actor.join_for(sleeper, 1.0).await, Err(SimError::Timeout));
                    assert!(approx(actor.now().as_secs(), 1.0));
                    actor.join_for(sleeper, 10.0).await.unwrap();
                    assert!(approx(actor.now().as_secs(), 3.0));
                })
                .unwrap();
        })
        .unwrap();
}

#[test]
fn self_join_is_fatal() {
    init_tracing();
    let (platform, host) = one_host();
    let mut engine = Engine::new(&platform, Default::default());
    engine
        .spawn("narcissus", host, |actor| async move {
            let _ = actor.join(actor.id()).await;
        })
        .unwrap();
    assert!(matches!(
        engine.run(),
        Err(KernelError::ConsistencyViolation { .. })
    ));
}

#[test]
fn suspend_pauses_execution() {
    init_tracing();
    let (platform, host) = one_host();
    let finished = Rc::new(RefCell::new(None));
    SimBuilder::new_test()
        .run(&platform, |engine| {
            finished.borrow_mut().take();
            let f = finished.clone();
            let worker = engine
                .spawn("worker", host, move |actor| async move {
                    actor.execute(2e9).await.unwrap();
                    *f.borrow_mut() = Some(actor.now().as_secs());
                })
                .unwrap();
            engine
                .spawn("controller", host, move |actor| async move {
                    actor.sleep(1.0).await.unwrap();
                    actor.suspend(worker).await.unwrap();
                    actor.sleep(3.0).await.unwrap();
                    actor.resume(worker).await.unwrap();
                })
                .unwrap();
        })
        .unwrap();
    // one second of work, three suspended, one more of work
    assert!(approx(finished.borrow().unwrap(), 5.0));
}

#[test]
fn self_suspension() {
    init_tracing();
    let (platform, host) = one_host();
    SimBuilder::new_test()
        .run(&platform, |engine| {
            let sleeper = engine
                .spawn("sleeper", host, |actor| async move {
                    actor.suspend_self().await.unwrap();
                    assert!(approx(actor.now().as_secs(), 1.5));
                })
                .unwrap();
            engine
                .spawn("waker", host, move |actor| async move {
                    actor.sleep(1.5).await.unwrap();
                    actor.resume(sleeper).await.unwrap();
                })
                .unwrap();
        })
        .unwrap();
}

#[test]
fn daemons_do_not_keep_the_simulation_alive() {
    init_tracing();
    let (platform, host) = one_host();
    let mut engine = Engine::new(&platform, Default::default());
    engine.add_observer(Terminations::default());
    let daemon = engine
        .spawn("daemon", host, |actor| async move {
            actor.daemonize().await.unwrap();
            loop {
                actor.sleep(1.0).await.unwrap();
            }
        })
        .unwrap();
    let other = engine
        .spawn_with(
            "background",
            host,
            SpawnOptions {
                daemon: true,
                ..Default::default()
            },
            |actor| async move {
                actor.sleep(100.0).await.unwrap();
            },
        )
        .unwrap();
    let main = engine
        .spawn("main", host, |actor| async move {
            actor.sleep(3.5).await.unwrap();
        })
        .unwrap();
    let report = engine.run().unwrap();
    assert_eq!(report.reason, StopReason::Completed);
    assert!(approx(report.end_time.as_secs(), 3.5));
    assert_eq!(
        terminations(&mut engine),
        [(main, false, 3.5), (daemon, true, 3.5), (other, true, 3.5)]
    );
}

#[test]
fn kill_time() {
    init_tracing();
    let (platform, host) = one_host();
    let report = SimBuilder::new_test()
        .run(&platform, |engine| {
            engine
                .spawn_with(
                    "doomed",
                    host,
                    SpawnOptions {
                        kill_time: Some(2.0),
                        ..Default::default()
                    },
                    |actor| async move {
                        actor.sleep(10.0).await.unwrap();
                        unreachable!();
                    },
                )
                .unwrap();
        })
        .unwrap();
    assert!(approx(report.end_time.as_secs(), 2.0));
}

#[test]
fn exit_and_kill_all() {
    init_tracing();
    let (platform, host) = one_host();
    let mut engine = Engine::new(&platform, Default::default());
    engine.add_observer(Terminations::default());
    let quitter = engine
        .spawn("quitter", host, |actor| async move {
            actor.exit().await;
            unreachable!();
        })
        .unwrap();
    let victims: Vec<ActorId> = (0..2)
        .map(|i| {
            engine
                .spawn(format!("victim-{i}"), host, |actor| async move {
                    actor.sleep(50.0).await.unwrap();
                })
                .unwrap()
        })
        .collect();
    let boss = engine
        .spawn("boss", host, |actor| async move {
            actor.sleep(1.0).await.unwrap();
            actor.kill_all().await.unwrap();
            actor.sleep(1.0).await.unwrap();
        })
        .unwrap();
    let report = engine.run().unwrap();
    assert!(approx(report.end_time.as_secs(), 2.0));
    assert_eq!(
        terminations(&mut engine),
        [
            (quitter, true, 0.0),
            (victims[0], true, 1.0),
            (victims[1], true, 1.0),
            (boss, false, 2.0)
        ]
    );
}

#[test]
fn spawning_from_an_actor() {
    init_tracing();
    let (builder, alice, bob, _) = two_hosts();
    let platform = builder.build();
    let hosts = Rc::new(RefCell::new(Vec::new()));
    SimBuilder::new_test()
        .run(&platform, |engine| {
            hosts.borrow_mut().clear();
            let hosts = hosts.clone();
            engine
                .spawn("parent", alice, move |actor| async move {
                    let h = hosts.clone();
                    let child = actor
                        .spawn("child", bob, move |child| async move {
                            h.borrow_mut().push(child.host_name(child.host()).unwrap());
                            assert_eq!(child.name(), "child");
                        })
                        .await
                        .unwrap();
                    actor.join(child).await.unwrap();
                    hosts.borrow_mut().push(actor.host_name(actor.host()).unwrap());
                })
                .unwrap();
        })
        .unwrap();
    assert_eq!(*hosts.borrow(), ["bob", "alice"]);
}

#[test]
fn host_failure_interrupts_execution() {
    init_tracing();
    let (mut builder, alice, _, _) = two_hosts();
    builder.schedule_host_state(alice, 0.5, false).unwrap();
    let platform = builder.build();
    let mut engine = Engine::new(&platform, Default::default());
    engine.add_observer(Terminations::default());
    let log = Rc::new(RefCell::new(Vec::new()));
    let l = log.clone();
    let worker = engine
        .spawn("worker", alice, move |actor| async move {
            let result = actor.execute(1e9).await;
            l.borrow_mut().push((result, actor.now().as_secs()));
            // the host is down, the next simcall never returns
            let _ = actor.sleep(1.0).await;
            unreachable!();
        })
        .unwrap();
    let report = engine.run().unwrap();
    assert!(approx(report.end_time.as_secs(), 0.5));
    assert_eq!(*log.borrow(), [(Err(SimError::HostFailure(alice)), 0.5)]);
    assert_eq!(terminations(&mut engine), [(worker, true, 0.5)]);
    assert!(!engine.host_is_on(alice));
}

#[test]
fn host_failure_fails_pending_receive() {
    init_tracing();
    let (builder, alice, bob, _) = two_hosts();
    let platform = builder.build();
    let mut engine = Engine::new(&platform, Default::default());
    engine.add_observer(Terminations::default());
    let mailbox = engine.mailbox("never");
    let log = Rc::new(RefCell::new(Vec::new()));
    let l = log.clone();
    let waiter = engine
        .spawn("waiter", alice, move |actor| async move {
            let result = actor.recv::<u8>(mailbox).await;
            l.borrow_mut().push(result);
            let _ = actor.yield_now().await;
            unreachable!();
        })
        .unwrap();
    let operator = engine
        .spawn("operator", bob, move |actor| async move {
            actor.sleep(2.0).await.unwrap();
            actor.set_host_state(alice, false).await.unwrap();
            assert!(!actor.host_is_on(alice));
            actor.set_host_state(alice, true).await.unwrap();
            actor
                .spawn("newcomer", alice, |actor| async move {
                    actor.sleep(1.0).await.unwrap();
                })
                .await
                .unwrap();
        })
        .unwrap();
    let report = engine.run().unwrap();
    assert!(approx(report.end_time.as_secs(), 3.0));
    assert_eq!(*log.borrow(), [Err(SimError::HostFailure(alice))]);
    let ended = terminations(&mut engine);
    assert_eq!(ended.len(), 3);
    assert_eq!(ended[0], (waiter, true, 2.0));
    assert_eq!(ended[1], (operator, false, 2.0));
    assert!(approx(ended[2].2, 3.0));
}

#[test]
fn spawning_on_a_dead_host() {
    init_tracing();
    let mut builder = PlatformBuilder::new();
    let host = builder.add_host("alice", 1e9).unwrap();
    let platform = builder.build();
    let mut engine = Engine::new(&platform, Default::default());
    engine.set_host_state(host, false).unwrap();
    let result = engine.spawn("ghost", host, |_| async {});
    assert_eq!(result, Err(SimError::HostFailure(host)));

    // a host of another, bigger platform
    let (_, _, bob, _) = two_hosts();
    assert!(matches!(
        engine.set_host_state(bob, true),
        Err(KernelError::UnknownHost(h)) if h == bob
    ));
}
