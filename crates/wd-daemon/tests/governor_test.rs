mod common;

use std::time::Duration;

use common::{daemon, governor, governor_config, World};
use wd_core::types::{DaemonStatus, RestartOutcome};
use wd_daemon::governor::{Governor, GovernorError, RestartSource};
use wd_daemon::signal_bus::{Signal, SignalBus};
use wd_daemon::topology::TopologyError;

fn position(order: &[String], name: &str) -> usize {
    order.iter().position(|n| n == name).expect("daemon in order")
}

#[test]
fn cycle_is_a_configuration_error_before_any_launch() {
    let world = World::new();
    let specs = vec![daemon("a").depends_on("b"), daemon("b").depends_on("a")];
    let result = Governor::new(
        specs,
        &governor_config(),
        world.inspector(),
        world.launcher(),
        SignalBus::local(),
    );
    match result {
        Err(GovernorError::Configuration(TopologyError::Cycle(path))) => {
            assert_eq!(path.first(), path.last());
        }
        Err(other) => panic!("expected cycle, got {other}"),
        Ok(_) => panic!("cycle accepted"),
    }
    assert_eq!(world.launches("a") + world.launches("b"), 0);
}

#[test]
fn unknown_dependency_is_a_configuration_error() {
    let world = World::new();
    let result = Governor::new(
        vec![daemon("api").depends_on("db")],
        &governor_config(),
        world.inspector(),
        world.launcher(),
        SignalBus::local(),
    );
    assert!(matches!(
        result,
        Err(GovernorError::Configuration(TopologyError::UnknownDependency { .. }))
    ));
}

#[tokio::test(start_paused = true)]
async fn queue_starts_everything_in_dependency_order() {
    let world = World::new();
    let specs = vec![
        daemon("web").with_priority(0).depends_on("cache").depends_on("db"),
        daemon("cache").with_priority(1).depends_on("db"),
        daemon("db").with_priority(5),
        daemon("metrics").with_priority(10),
    ];
    let mut gov = governor(&world, specs, SignalBus::local());

    let order = gov.startup_order().to_vec();
    assert!(position(&order, "db") < position(&order, "cache"));
    assert!(position(&order, "cache") < position(&order, "web"));
    assert_eq!(order.len(), 4);

    gov.govern_tick().await;
    assert_eq!(gov.running_count(), 4);
    assert_eq!(gov.pending().count(), 0);
    for name in ["web", "cache", "db", "metrics"] {
        assert!(world.is_alive(name), "{name} should be alive");
        assert_eq!(world.launches(name), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn dependency_not_ready_when_dependency_failed() {
    let world = World::new();
    world.break_daemon("a");
    let mut gov = governor(
        &world,
        vec![daemon("a"), daemon("b").depends_on("a")],
        SignalBus::local(),
    );

    gov.govern_tick().await;
    assert_eq!(gov.state("a").unwrap().status, DaemonStatus::Failed);
    assert_eq!(gov.state("b").unwrap().status, DaemonStatus::Stopped);

    match gov.start("b").await {
        Err(GovernorError::DependencyNotReady { daemon, dependency }) => {
            assert_eq!(daemon, "b");
            assert_eq!(dependency, "a");
        }
        other => panic!("expected dependency not ready, got {other:?}"),
    }
    assert_eq!(world.launches("b"), 0);
}

#[tokio::test(start_paused = true)]
async fn dependent_crashing_with_its_dependency_comes_back() {
    let world = World::new();
    let mut gov = governor(
        &world,
        vec![daemon("a"), daemon("b").depends_on("a")],
        SignalBus::local(),
    );
    gov.govern_tick().await;
    assert_eq!(gov.running_count(), 2);

    world.break_daemon("a");
    world.kill("a");
    world.kill("b");
    gov.govern_tick().await;
    assert_eq!(gov.state("a").unwrap().status, DaemonStatus::Failed);
    assert_eq!(gov.state("b").unwrap().status, DaemonStatus::Stopped);
    assert_eq!(gov.pending().collect::<Vec<_>>(), vec!["b"]);

    world.fix_daemon("a");
    for _ in 0..5 {
        tokio::time::advance(Duration::from_secs(10)).await;
        gov.govern_tick().await;
    }
    assert_eq!(gov.state("a").unwrap().status, DaemonStatus::Running);
    assert_eq!(gov.state("b").unwrap().status, DaemonStatus::Running);
    assert!(world.is_alive("b"));
    assert_eq!(world.launches("b"), 2);
    assert_eq!(gov.pending().count(), 0);
}

#[tokio::test(start_paused = true)]
async fn stale_dependency_sample_is_rechecked() {
    let world = World::new();
    let mut gov = governor(
        &world,
        vec![daemon("a"), daemon("b").depends_on("a").with_priority(200)],
        SignalBus::local(),
    );
    gov.start("a").await.expect("a starts");

    // The governor still believes "a" is running, but its sample is older
    // than one health-check interval, so it is queried again.
    world.kill("a");
    tokio::time::advance(Duration::from_secs(6)).await;
    assert!(matches!(
        gov.start("b").await,
        Err(GovernorError::DependencyNotReady { .. })
    ));
    assert_eq!(world.launches("b"), 0);
}

#[tokio::test(start_paused = true)]
async fn restart_count_is_capped_then_exhausted() {
    let world = World::new();
    world.break_daemon("flaky");
    let signals = SignalBus::local();
    let rx = signals.subscribe();
    let mut gov = governor(
        &world,
        vec![daemon("flaky").with_max_restart_attempts(2)],
        signals,
    );

    for _ in 0..8 {
        gov.govern_tick().await;
        tokio::time::advance(Duration::from_secs(10)).await;
        let state = gov.state("flaky").unwrap();
        assert!(state.restart_count <= 2);
    }

    let state = gov.state("flaky").unwrap();
    assert!(state.exhausted);
    assert_eq!(state.status, DaemonStatus::Failed);
    assert_eq!(state.restart_count, 2);
    // Initial start plus two restarts, then nothing more.
    assert_eq!(world.launches("flaky"), 3);

    assert!(matches!(
        gov.restart("flaky").await,
        Err(GovernorError::RestartExhausted { attempts: 2, .. })
    ));
    assert_eq!(world.launches("flaky"), 3);

    let signals: Vec<Signal> = rx.try_iter().collect();
    assert!(signals
        .iter()
        .any(|s| matches!(s, Signal::DaemonExhausted { daemon, restart_count: 2 } if daemon == "flaky")));
}

#[tokio::test(start_paused = true)]
async fn reset_clears_exhaustion() {
    let world = World::new();
    world.break_daemon("flaky");
    let mut gov = governor(
        &world,
        vec![daemon("flaky").with_max_restart_attempts(0)],
        SignalBus::local(),
    );
    gov.govern_tick().await;
    assert!(gov.state("flaky").unwrap().exhausted);

    world.fix_daemon("flaky");
    gov.reset("flaky").expect("known daemon");
    let state = gov.state("flaky").unwrap();
    assert_eq!(state.status, DaemonStatus::Stopped);
    assert_eq!(state.restart_count, 0);
    assert!(!state.exhausted);

    gov.govern_tick().await;
    assert_eq!(gov.state("flaky").unwrap().status, DaemonStatus::Running);
}

#[tokio::test(start_paused = true)]
async fn restarts_inside_cool_down_are_no_ops() {
    let world = World::new();
    let mut gov = governor(&world, vec![daemon("relay")], SignalBus::local());
    gov.govern_tick().await;
    assert!(world.is_alive("relay"));

    world.kill("relay");
    let first = gov
        .request_restart("relay", RestartSource::Watchdog)
        .await
        .unwrap();
    assert_eq!(first, RestartOutcome::Started);
    assert_eq!(world.launches("relay"), 2);

    // Second failure: cool-down is now base * 2 = 2s.
    world.kill("relay");
    let second = gov
        .request_restart("relay", RestartSource::Watchdog)
        .await
        .unwrap();
    assert_eq!(second, RestartOutcome::InCoolDown);
    assert_eq!(gov.state("relay").unwrap().status, DaemonStatus::Failed);
    assert_eq!(world.launches("relay"), 2);

    tokio::time::advance(Duration::from_millis(2_100)).await;
    let third = gov.restart("relay").await.unwrap();
    assert_eq!(third, RestartOutcome::Started);
    assert_eq!(world.launches("relay"), 3);

    let outcomes: Vec<RestartOutcome> = gov.restart_history().map(|r| r.outcome).collect();
    assert_eq!(outcomes, vec![RestartOutcome::Started, RestartOutcome::Started]);
}

#[tokio::test(start_paused = true)]
async fn watchdog_request_leaves_live_or_stopped_daemons_alone() {
    let world = World::new();
    let mut gov = governor(&world, vec![daemon("a"), daemon("b")], SignalBus::local());
    gov.start("a").await.unwrap();

    let alive = gov.request_restart("a", RestartSource::Watchdog).await.unwrap();
    assert_eq!(alive, RestartOutcome::NotEligible);
    let never_started = gov.request_restart("b", RestartSource::Watchdog).await.unwrap();
    assert_eq!(never_started, RestartOutcome::NotEligible);
    assert_eq!(world.launches("a"), 1);
    assert_eq!(world.launches("b"), 0);
}

#[tokio::test(start_paused = true)]
async fn governor_tick_restarts_crashed_daemon() {
    let world = World::new();
    let signals = SignalBus::local();
    let rx = signals.subscribe();
    let mut gov = governor(&world, vec![daemon("relay")], signals);
    gov.govern_tick().await;

    world.kill("relay");
    gov.govern_tick().await;
    assert!(world.is_alive("relay"));
    let state = gov.state("relay").unwrap();
    assert_eq!(state.status, DaemonStatus::Running);
    assert_eq!(state.restart_count, 1);

    let kinds: Vec<&'static str> = rx.try_iter().map(|s| s.kind()).collect();
    assert!(kinds.contains(&"daemon-failed"));
    assert!(kinds.contains(&"daemon-restarted"));
}

#[tokio::test(start_paused = true)]
async fn stubborn_daemon_is_marked_failed_on_stop() {
    let world = World::new();
    let mut gov = governor(&world, vec![daemon("sticky")], SignalBus::local());
    gov.start("sticky").await.unwrap();
    world.make_stubborn("sticky");

    assert!(matches!(
        gov.stop("sticky").await,
        Err(GovernorError::StopFailed { .. })
    ));
    let state = gov.state("sticky").unwrap();
    assert_eq!(state.status, DaemonStatus::Failed);
    assert!(state.last_error.is_some());
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_in_reverse_start_order() {
    let world = World::new();
    let signals = SignalBus::local();
    let rx = signals.subscribe();
    let mut gov = governor(
        &world,
        vec![daemon("db"), daemon("api").depends_on("db")],
        signals,
    );
    gov.govern_tick().await;
    let _ = rx.try_iter().count();

    let errors = gov.shutdown_all().await;
    assert!(errors.is_empty());
    let stopped: Vec<String> = rx
        .try_iter()
        .filter_map(|s| match s {
            Signal::DaemonStopped { daemon } => Some(daemon),
            _ => None,
        })
        .collect();
    assert_eq!(stopped, vec!["api".to_string(), "db".to_string()]);
    assert!(!world.is_alive("db") && !world.is_alive("api"));
}

#[tokio::test(start_paused = true)]
async fn snapshot_is_published_on_change() {
    let world = World::new();
    let mut gov = governor(&world, vec![daemon("relay")], SignalBus::local());
    let rx = gov.subscribe();
    assert_eq!(rx.borrow().running_count(), 0);

    gov.govern_tick().await;
    let snapshot = rx.borrow().clone();
    assert_eq!(snapshot.running_count(), 1);
    assert_eq!(snapshot.daemon("relay").unwrap().status, DaemonStatus::Running);
    assert!(snapshot.pending.is_empty());
}
