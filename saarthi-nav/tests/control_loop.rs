//! Control loop behavior against scripted action servers.
//!
//! Everything here runs on a manual clock, so multi-second waits and
//! retry pauses cost no wall-clock time.
//!
//! Run with: `cargo test --test control_loop`

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use approx::assert_relative_eq;
use saarthi_nav::action::{ScriptedActionClient, SubmissionLog};
use saarthi_nav::clock::{Clock, ManualClock};
use saarthi_nav::config::SaarthiConfig;
use saarthi_nav::geometry::{Quaternion, Time, Transform, TransformStamped, Vector3};
use saarthi_nav::{
    ControlLoop, GoalDispatcher, GoalState, LoopTiming, NavError, NavigationGoal, Observation,
    ShutdownSignal, TransformObserver, TransformPublisher, TransformRegistry,
};

// ============================================================================
// Test Fixtures
// ============================================================================

struct Fixture {
    clock: Arc<ManualClock>,
    registry: Arc<TransformRegistry>,
    log: SubmissionLog,
    shutdown: ShutdownSignal,
    control: ControlLoop<ScriptedActionClient>,
}

fn fixture() -> Fixture {
    let config = SaarthiConfig::default();
    let clock = ManualClock::shared(1000.0);
    let dyn_clock: Arc<dyn Clock> = clock.clone();
    let registry = Arc::new(TransformRegistry::default());
    let log = SubmissionLog::new();
    let shutdown = ShutdownSignal::new();

    let dispatcher = |robot: &saarthi_nav::config::RobotConfig| {
        GoalDispatcher::new(
            &robot.name,
            ScriptedActionClient::new(&robot.service, Arc::clone(&dyn_clock)).with_log(log.clone()),
            NavigationGoal::from_config(robot, dyn_clock.now()),
            config.timing.server_wait(),
        )
    };
    let explorer = dispatcher(&config.explorer);
    let follower = dispatcher(&config.follower);

    let publisher =
        TransformPublisher::new(&config.transform, Arc::clone(&registry), Arc::clone(&dyn_clock));
    let observer = TransformObserver::new(&config.transform, Arc::clone(&registry));

    let control = ControlLoop::new(
        explorer,
        follower,
        publisher,
        observer,
        LoopTiming::from(&config.timing),
        dyn_clock,
        shutdown.clone(),
    );

    Fixture {
        clock,
        registry,
        log,
        shutdown,
        control,
    }
}

/// Connect the sensor frame to `map` so lookups of `my_frame` succeed.
fn connect_sensor_to_map(registry: &TransformRegistry) {
    registry
        .set_static_transform(
            TransformStamped::new(
                "map",
                "explorer_tf/camera_rgb_optical_frame",
                Time(1.0),
                Transform::new(Vector3::new(1.0, 2.0, 0.0), Quaternion::IDENTITY),
            ),
            "test",
        )
        .unwrap();
}

// ============================================================================
// Goal Dispatch
// ============================================================================

#[test]
fn test_both_goals_sent_in_first_tick_explorer_first() {
    let mut f = fixture();

    let report = f.control.tick();

    assert_eq!(report.tick, 1);
    assert_eq!(report.goals_sent, vec!["explorer", "follower"]);
    assert_eq!(
        f.log.services(),
        vec!["/explorer/move_base", "/follower/move_base"]
    );
    assert_eq!(report.explorer_state, GoalState::Pending);
    assert_eq!(report.follower_state, GoalState::Pending);
}

#[test]
fn test_goals_submitted_once_over_many_ticks() {
    let mut f = fixture();

    for i in 0..50 {
        let report = f.control.tick();
        if i > 0 {
            assert!(report.goals_sent.is_empty());
        }
    }

    assert_eq!(f.log.len(), 2);
    assert_eq!(f.control.explorer().client().sent_goals().len(), 1);
    assert_eq!(f.control.follower().client().sent_goals().len(), 1);
    assert!(f.control.explorer().goal_sent());
    assert!(f.control.follower().goal_sent());
}

#[test]
fn test_submitted_goals_match_configuration() {
    let mut f = fixture();
    f.control.tick();

    let entries = f.log.entries();
    let (_, explorer_goal) = &entries[0];
    assert_eq!(explorer_goal.frame_id, "map");
    assert_relative_eq!(explorer_goal.x, 7.710214);
    assert_relative_eq!(explorer_goal.y, -1.716889);
    assert_eq!(explorer_goal.orientation, Quaternion::IDENTITY);

    let (_, follower_goal) = &entries[1];
    assert_relative_eq!(follower_goal.x, -0.289296);
    assert_relative_eq!(follower_goal.y, -1.282680);
}

// ============================================================================
// Status Reporting
// ============================================================================

#[test]
fn test_success_logged_every_tick_while_succeeded() {
    let mut f = fixture();
    f.control.tick();

    f.control
        .explorer_mut()
        .client_mut()
        .set_state(GoalState::Succeeded);

    for _ in 0..5 {
        let report = f.control.tick();
        assert_eq!(report.successes, vec!["explorer"]);
        assert_eq!(report.explorer_state, GoalState::Succeeded);
    }

    f.control
        .follower_mut()
        .client_mut()
        .set_state(GoalState::Succeeded);
    let report = f.control.tick();
    assert_eq!(report.successes, vec!["explorer", "follower"]);
}

#[test]
fn test_failed_goals_are_not_reported_or_resent() {
    let mut f = fixture();
    f.control.tick();

    f.control
        .explorer_mut()
        .client_mut()
        .set_state(GoalState::Aborted);
    f.control
        .follower_mut()
        .client_mut()
        .set_state(GoalState::Rejected);

    for _ in 0..5 {
        let report = f.control.tick();
        assert!(report.successes.is_empty());
        assert!(report.goals_sent.is_empty());
        assert_eq!(report.explorer_state, GoalState::Aborted);
        assert_eq!(report.follower_state, GoalState::Rejected);
    }
    assert_eq!(f.log.len(), 2);
}

// ============================================================================
// Transform Publish / Observe
// ============================================================================

#[test]
fn test_published_sample_is_constant() {
    let mut f = fixture();

    let mut samples = Vec::new();
    for tick in 0..6 {
        if tick == 3 {
            connect_sensor_to_map(&f.registry);
        }
        samples.push(f.control.tick().published);
    }

    for sample in &samples {
        assert_eq!(sample.frame_id, "explorer_tf/camera_rgb_optical_frame");
        assert_eq!(sample.child_frame_id, "my_frame");
        assert_eq!(
            sample.transform,
            Transform::new(Vector3::new(0.5, 0.5, 0.2), Quaternion::IDENTITY)
        );
    }
    // Restamped every tick
    for pair in samples.windows(2) {
        assert!(pair[1].stamp.as_secs() > pair[0].stamp.as_secs());
    }
}

#[test]
fn test_lookup_failures_until_frames_connect() {
    const CONNECT_AT_TICK: u64 = 6;
    let mut f = fixture();

    let mut unavailable = 0;
    let mut positions = Vec::new();
    for tick in 1..=12u64 {
        if tick == CONNECT_AT_TICK {
            connect_sensor_to_map(&f.registry);
        }
        match f.control.tick().observation {
            Observation::Unavailable(_) => {
                assert!(positions.is_empty(), "failure after first success");
                unavailable += 1;
            }
            Observation::Position(tf) => positions.push(tf),
        }
    }

    assert_eq!(unavailable, CONNECT_AT_TICK - 1);
    assert_eq!(f.control.lookup_failures(), CONNECT_AT_TICK - 1);
    assert_eq!(positions.len() as u64, 12 - (CONNECT_AT_TICK - 1));
    assert_eq!(f.control.ticks(), 12);

    let t = positions[0].transform.translation;
    assert_relative_eq!(t.x, 1.5, epsilon = 1e-9);
    assert_relative_eq!(t.y, 2.5, epsilon = 1e-9);
    assert_relative_eq!(t.z, 0.2, epsilon = 1e-9);
}

#[test]
fn test_lookup_failure_pauses_one_second() {
    let mut f = fixture();
    let start = f.clock.now().as_secs();

    // Frames not connected: 1s pause, then the overrun resets the schedule
    f.control.tick();
    let after_failure = f.clock.now().as_secs();
    assert_relative_eq!(after_failure - start, 1.0, epsilon = 1e-6);

    // Connected: plain 100ms period
    connect_sensor_to_map(&f.registry);
    f.control.tick();
    assert_relative_eq!(f.clock.now().as_secs() - after_failure, 0.1, epsilon = 1e-6);
}

#[test]
fn test_loop_runs_at_fixed_rate() {
    let mut f = fixture();
    connect_sensor_to_map(&f.registry);
    let start = f.clock.now().as_secs();

    assert_eq!(f.control.run_for(20), 20);

    assert_relative_eq!(f.clock.now().as_secs() - start, 2.0, epsilon = 1e-5);
}

// ============================================================================
// Shutdown and Startup
// ============================================================================

#[test]
fn test_run_returns_on_shutdown() {
    let mut f = fixture();
    f.shutdown.signal();

    assert_eq!(f.control.run(), 0);
    assert!(f.log.is_empty());
}

#[test]
fn test_never_ready_server_blocks_until_shutdown() {
    let clock: Arc<dyn Clock> = ManualClock::shared(1.0);
    let shutdown = ShutdownSignal::new();
    let mut dispatcher = GoalDispatcher::new(
        "follower",
        ScriptedActionClient::never_ready("/follower/move_base", clock),
        NavigationGoal::new("map", -0.289296, -1.282680, Time(1.0)),
        Duration::from_secs(5),
    );

    let signal = shutdown.clone();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        signal.signal();
    });

    let result = dispatcher.await_server(&shutdown);
    stopper.join().unwrap();

    assert!(matches!(result, Err(NavError::Shutdown)));
    assert!(dispatcher.client().attempts() > 0);
    assert!(!dispatcher.goal_sent());
    assert!(dispatcher.client().sent_goals().is_empty());
}

#[test]
fn test_startup_waits_explorer_then_follower() {
    let clock = ManualClock::shared(1.0);
    let dyn_clock: Arc<dyn Clock> = clock.clone();
    let shutdown = ShutdownSignal::new();

    let mut explorer = GoalDispatcher::new(
        "explorer",
        ScriptedActionClient::ready_after_attempts("/explorer/move_base", Arc::clone(&dyn_clock), 3),
        NavigationGoal::new("map", 7.710214, -1.716889, Time(1.0)),
        Duration::from_secs(5),
    );
    let mut follower = GoalDispatcher::new(
        "follower",
        ScriptedActionClient::ready_after_attempts("/follower/move_base", dyn_clock, 2),
        NavigationGoal::new("map", -0.289296, -1.282680, Time(1.0)),
        Duration::from_secs(5),
    );

    explorer.await_server(&shutdown).unwrap();
    assert_relative_eq!(clock.now().as_secs(), 11.0, epsilon = 1e-9);
    assert_eq!(follower.client().attempts(), 0);

    follower.await_server(&shutdown).unwrap();
    assert_relative_eq!(clock.now().as_secs(), 16.0, epsilon = 1e-9);
    assert_eq!(explorer.client().attempts(), 3);
    assert_eq!(follower.client().attempts(), 2);
}
