use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use simkernel::activity::IoOp;
use simkernel::{
    ActivityHandle, ActivityId, ActivityKind, ActivityState, Engine, Observer, PlatformBuilder,
    SimBuilder, SimError, SimTime, StopReason,
};

mod common;
use common::{approx, init_tracing, one_host};

#[test]
fn execution_time() {
    init_tracing();
    let (platform, host) = one_host();
    let report = SimBuilder::new_test()
        .run(&platform, |engine| {
            engine
                .spawn("worker", host, |actor| async move {
                    actor.execute(2.5e9).await.unwrap();
                    assert!(approx(actor.now().as_secs(), 2.5));
                })
                .unwrap();
        })
        .unwrap();
    assert!(approx(report.end_time.as_secs(), 2.5));
}

#[test]
fn short_execution_on_a_late_clock() {
    init_tracing();
    let (platform, host) = one_host();
    let report = SimBuilder::new_test()
        .run(&platform, |engine| {
            engine
                .spawn("night-shift", host, |actor| async move {
                    actor.sleep(1e9).await.unwrap();
                    actor.execute(50.0).await.unwrap();
                    actor.execute(1.0).await.unwrap();
                })
                .unwrap();
        })
        .unwrap();
    assert_eq!(report.reason, StopReason::Completed);
    assert!(approx(report.end_time.as_secs(), 1e9));
}

#[test]
fn wait_any_returns_first_finished() {
    init_tracing();
    let (platform, host) = one_host();
    SimBuilder::new_test()
        .run(&platform, |engine| {
            engine
                .spawn("worker", host, |actor| async move {
                    let long = actor.exec_async(2e9).await.unwrap();
                    let short = actor.exec_async(1e9).await.unwrap();
                    assert_eq!(long.activity().kind(), Some(ActivityKind::Exec));
                    assert_eq!(
                        actor.test_any(&[long.activity(), short.activity()]).await,
                        Ok(None)
                    );
                    // both share the cpu until the short one is done
                    let first = actor
                        .wait_any(&[long.activity(), short.activity()])
                        .await
                        .unwrap();
                    assert_eq!(first, 1);
                    assert!(approx(actor.now().as_secs(), 2.0));
                    assert_eq!(short.state(), ActivityState::Done);
                    assert!(approx(long.remaining().unwrap(), 1e9));
                    assert_eq!(
                        actor.test_any(&[long.activity(), short.activity()]).await,
                        Ok(Some(1))
                    );
                    long.wait().await.unwrap();
                    assert!(approx(actor.now().as_secs(), 3.0));
                })
                .unwrap();
        })
        .unwrap();
}

#[test]
fn wait_any_timeout() {
    init_tracing();
    let (platform, host) = one_host();
    SimBuilder::new_test()
        .run(&platform, |engine| {
            engine
                .spawn("worker", host, |actor| async move {
                    let exec = actor.exec_async(5e9).await.unwrap();
                    let result = actor.wait_any_for(&[exec.activity()], 1.0).await;
                    assert_eq!(result, Err(SimError::Timeout));
                    // only the wait gave up, the execution goes on
                    assert!(!exec.state().is_terminal());
                    exec.wait().await.unwrap();
                    assert!(approx(actor.now().as_secs(), 5.0));
                })
                .unwrap();
        })
        .unwrap();
}

#[test]
fn priorities_weight_the_share() {
    init_tracing();
    let (platform, host) = one_host();
    let done = Rc::new(RefCell::new(Vec::new()));
    SimBuilder::new_test()
        .run(&platform, |engine| {
            done.borrow_mut().clear();
            let done = done.clone();
            engine
                .spawn("worker", host, move |actor| async move {
                    let low = actor.exec_async_with(1e9, 1.0, None).await.unwrap();
                    let high = actor.exec_async_with(1e9, 3.0, None).await.unwrap();
                    high.wait().await.unwrap();
                    done.borrow_mut().push(actor.now().as_secs());
                    low.wait().await.unwrap();
                    done.borrow_mut().push(actor.now().as_secs());
                })
                .unwrap();
        })
        .unwrap();
    let done = done.borrow();
    assert!(approx(done[0], 4.0 / 3.0));
    assert!(approx(done[1], 2.0));
}

#[test]
fn bounded_execution() {
    init_tracing();
    let (platform, host) = one_host();
    SimBuilder::new_test()
        .run(&platform, |engine| {
            engine
                .spawn("worker", host, |actor| async move {
                    let exec = actor.exec_async_with(1e9, 1.0, Some(2.5e8)).await.unwrap();
                    exec.wait().await.unwrap();
                    assert!(approx(actor.now().as_secs(), 4.0));
                })
                .unwrap();
        })
        .unwrap();
}

#[test]
fn cancel_execution() {
    init_tracing();
    let (platform, host) = one_host();
    SimBuilder::new_test()
        .run(&platform, |engine| {
            engine
                .spawn("worker", host, |actor| async move {
                    let exec = actor.exec_async(10e9).await.unwrap();
                    actor.sleep(1.0).await.unwrap();
                    assert!(approx(exec.remaining().unwrap(), 9e9));
                    exec.cancel().await.unwrap();
                    assert_eq!(exec.state(), ActivityState::Canceled);
                    assert_eq!(exec.wait().await, Err(SimError::Canceled));
                    assert!(approx(actor.now().as_secs(), 1.0));
                })
                .unwrap();
        })
        .unwrap();
}

#[test]
fn wait_timeout_keeps_execution() {
    init_tracing();
    let (platform, host) = one_host();
    SimBuilder::new_test()
        .run(&platform, |engine| {
            engine
                .spawn("worker", host, |actor| async move {
                    let exec = actor.exec_async(5e9).await.unwrap();
                    assert_eq!(exec.wait_for(1.0).await, Err(SimError::Timeout));
                    assert!(!exec.test().await.unwrap());
                    assert_eq!(exec.wait_for(0.0).await, Err(SimError::Timeout));
                    exec.wait().await.unwrap();
                    assert!(approx(actor.now().as_secs(), 5.0));
                })
                .unwrap();
        })
        .unwrap();
}

#[test]
fn storage_io() {
    init_tracing();
    let mut builder = PlatformBuilder::new();
    let host = builder.add_host("server", 1e9).unwrap();
    let disk = builder.add_storage("disk", host, 100.0, 50.0).unwrap();
    let platform = builder.build();
    SimBuilder::new_test()
        .run(&platform, |engine| {
            engine
                .spawn("client", host, move |actor| async move {
                    actor.read(disk, 200.0).await.unwrap();
                    assert!(approx(actor.now().as_secs(), 2.0));
                    actor.write(disk, 100.0).await.unwrap();
                    assert!(approx(actor.now().as_secs(), 4.0));
                    let io = actor.io_async(disk, IoOp::Read, 100.0).await.unwrap();
                    assert_eq!(io.kind(), Some(ActivityKind::Io));
                    actor.wait(&io).await.unwrap();
                    assert!(approx(actor.now().as_secs(), 5.0));
                })
                .unwrap();
        })
        .unwrap();
}

#[test]
fn test_leaves_payload_in_place() {
    init_tracing();
    let (platform, host) = one_host();
    SimBuilder::new_test()
        .run(&platform, |engine| {
            let mailbox = engine.mailbox("box");
            engine
                .spawn("sender", host, move |actor| async move {
                    actor.send(mailbox, vec![1u8, 2, 3], 10.0).await.unwrap();
                })
                .unwrap();
            engine
                .spawn("receiver", host, move |actor| async move {
                    let recv = actor.irecv::<Vec<u8>>(mailbox).await.unwrap();
                    while !recv.test().await.unwrap() {
                        actor.sleep(0.5).await.unwrap();
                    }
                    assert!(recv.test().await.unwrap());
                    assert_eq!(recv.wait().await.unwrap(), [1, 2, 3]);
                    assert_eq!(recv.wait().await, Err(SimError::PayloadConsumed));
                })
                .unwrap();
        })
        .unwrap();
}

#[test]
fn several_waiters_on_one_execution() {
    init_tracing();
    let (platform, host) = one_host();
    let log = Rc::new(RefCell::new(Vec::new()));
    SimBuilder::new_test()
        .run(&platform, |engine| {
            log.borrow_mut().clear();
            let log = log.clone();
            engine
                .spawn("owner", host, move |actor| async move {
                    let exec = actor.exec_async(2e9).await.unwrap();
                    for name in ["left", "right"] {
                        let shared = exec.activity().clone();
                        let log = log.clone();
                        actor
                            .spawn(name, host, move |watcher| async move {
                                watcher.wait(&shared).await.unwrap();
                                log.borrow_mut().push((name, watcher.now().as_secs()));
                                // an ended activity answers at once and wakes nobody
                                watcher.wait(&shared).await.unwrap();
                            })
                            .await
                            .unwrap();
                    }
                    exec.wait().await.unwrap();
                    log.borrow_mut().push(("owner", actor.now().as_secs()));
                })
                .unwrap();
        })
        .unwrap();
    let log = log.borrow();
    let mut names: Vec<&str> = log.iter().map(|(name, _)| *name).collect();
    names.sort();
    assert_eq!(names, ["left", "owner", "right"]);
    assert!(log.iter().all(|(_, at)| approx(*at, 2.0)));
}

/// Terminal states reached by executions.
#[derive(Default)]
struct ExecEnds {
    execs: BTreeSet<ActivityId>,
    ends: Vec<(ActivityState, f64)>,
}

impl Observer for ExecEnds {
    fn activity_created(&mut self, _now: SimTime, activity: ActivityId, kind: ActivityKind) {
        if kind == ActivityKind::Exec {
            self.execs.insert(activity);
        }
    }

    fn activity_state_changed(
        &mut self,
        now: SimTime,
        activity: ActivityId,
        _from: ActivityState,
        to: ActivityState,
    ) {
        if to.is_terminal() && self.execs.contains(&activity) {
            self.ends.push((to, now.as_secs()));
        }
    }
}

#[test]
fn handle_inside_an_undelivered_payload_is_released() {
    init_tracing();
    let (platform, host) = one_host();
    let mut engine = Engine::new(&platform, Default::default());
    engine.add_observer(ExecEnds::default());
    let mailbox = engine.mailbox("nobody");
    engine
        .spawn("sender", host, move |actor| async move {
            let exec = actor.exec_async(10e9).await.unwrap();
            let shared: ActivityHandle = exec.activity().clone();
            // the failed comm is destroyed together with the handle it carries
            assert_eq!(
                actor.send_timeout(mailbox, shared, 1.0, 0.5).await,
                Err(SimError::Timeout)
            );
            drop(exec);
            actor.sleep(1.0).await.unwrap();
        })
        .unwrap();
    let report = engine.run().unwrap();
    assert!(approx(report.end_time.as_secs(), 1.5));
    let ends = engine.with_observer(|e: &mut ExecEnds| e.ends.clone()).unwrap();
    assert_eq!(ends.len(), 1);
    assert_eq!(ends[0].0, ActivityState::Canceled);
    assert!(approx(ends[0].1, 0.5));
}
