//! In-process action backends.
//!
//! - [`SimulatedActionClient`]: a robot on its own thread that drives toward
//!   the goal in a straight line and publishes its pose into the transform
//!   registry, for running the whole loop without any servers.
//! - [`ScriptedActionClient`]: no threads, no real time. Readiness and status
//!   are set by the test, and waits advance an injected clock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{ActionClient, GoalState, NavigationGoal};
use crate::clock::Clock;
use crate::config::{RobotConfig, SimConfig};
use crate::error::{NavError, Result};
use crate::geometry::{Quaternion, Transform, TransformStamped, Vector3};
use crate::tf::TransformRegistry;

/// Poll interval while waiting for simulated readiness
const READY_POLL: Duration = Duration::from_millis(10);

/// Holonomic point robot moving in straight lines.
#[derive(Clone, Debug)]
pub(crate) struct SimRobot {
    pub x: f64,
    pub y: f64,
    pub yaw: f64,
    speed: f64,
    tolerance: f64,
}

impl SimRobot {
    pub fn new(x: f64, y: f64, speed: f64, tolerance: f64) -> Self {
        Self {
            x,
            y,
            yaw: 0.0,
            speed,
            tolerance,
        }
    }

    /// Advance `dt` seconds toward the target. Returns true once within tolerance.
    pub fn step_toward(&mut self, tx: f64, ty: f64, dt: f64) -> bool {
        let dx = tx - self.x;
        let dy = ty - self.y;
        let dist = dx.hypot(dy);
        if dist <= self.tolerance {
            return true;
        }

        self.yaw = dy.atan2(dx);
        let step = self.speed * dt;
        if step >= dist {
            self.x = tx;
            self.y = ty;
            return true;
        }
        self.x += dx / dist * step;
        self.y += dy / dist * step;
        dist - step <= self.tolerance
    }

    pub fn transform(&self) -> Transform {
        Transform::new(
            Vector3::new(self.x, self.y, 0.0),
            Quaternion::from_yaw(self.yaw),
        )
    }
}

#[derive(Debug)]
struct SimState {
    ready: bool,
    robot: SimRobot,
    target: Option<(f64, f64)>,
    goal_state: GoalState,
}

struct SimInner {
    state: Mutex<SimState>,
    stop: AtomicBool,
}

impl SimInner {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Frames published by one simulated robot.
struct SimFrames {
    global: String,
    base: String,
}

/// Simulated navigation stack running on its own thread.
pub struct SimulatedActionClient {
    service: String,
    inner: Arc<SimInner>,
    handle: Option<JoinHandle<()>>,
}

impl SimulatedActionClient {
    /// Start the simulated robot.
    ///
    /// `ready_after = None` means the server never becomes ready.
    pub fn spawn(
        robot: &RobotConfig,
        sim: &SimConfig,
        ready_after: Option<Duration>,
        registry: Arc<TransformRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let frames = SimFrames {
            global: robot.goal.frame_id.clone(),
            base: SimConfig::robot_frame(&robot.name, &sim.base_frame),
        };
        let camera = SimConfig::robot_frame(&robot.name, &sim.camera_frame);
        let authority = format!("sim_{}", robot.name);

        registry.set_static_transform(
            TransformStamped::new(
                frames.base.as_str(),
                camera.as_str(),
                clock.now(),
                Transform::new(
                    Vector3::new(sim.camera_x, 0.0, sim.camera_z),
                    Quaternion::IDENTITY,
                ),
            ),
            &authority,
        )?;

        let inner = Arc::new(SimInner {
            state: Mutex::new(SimState {
                ready: false,
                robot: SimRobot::new(robot.start_x, robot.start_y, sim.speed, sim.goal_tolerance),
                target: None,
                goal_state: GoalState::Lost,
            }),
            stop: AtomicBool::new(false),
        });

        let period = Duration::from_secs_f64(1.0 / sim.update_hz);
        let ready_at = ready_after.map(|d| Instant::now() + d);
        let thread_inner = Arc::clone(&inner);
        let service = robot.service.clone();
        let handle = thread::Builder::new()
            .name(format!("sim-{}", robot.name))
            .spawn(move || {
                simulation_loop(
                    thread_inner,
                    frames,
                    authority,
                    period,
                    ready_at,
                    registry,
                    clock,
                );
            })
            .map_err(NavError::Connection)?;

        tracing::info!("Simulated navigation stack for {} started", service);
        Ok(Self {
            service,
            inner,
            handle: Some(handle),
        })
    }

    /// Current simulated position (x, y).
    pub fn position(&self) -> (f64, f64) {
        let state = self.inner.lock();
        (state.robot.x, state.robot.y)
    }
}

fn simulation_loop(
    inner: Arc<SimInner>,
    frames: SimFrames,
    authority: String,
    period: Duration,
    ready_at: Option<Instant>,
    registry: Arc<TransformRegistry>,
    clock: Arc<dyn Clock>,
) {
    let mut last_step = Instant::now();

    while !inner.stop.load(Ordering::Acquire) {
        let dt = last_step.elapsed().as_secs_f64();
        last_step = Instant::now();

        let pose = {
            let mut state = inner.lock();
            if !state.ready && ready_at.is_some_and(|t| Instant::now() >= t) {
                state.ready = true;
            }

            match (state.goal_state, state.target) {
                (GoalState::Pending, Some(_)) => state.goal_state = GoalState::Active,
                (GoalState::Active, Some((tx, ty))) => {
                    if state.robot.step_toward(tx, ty, dt) {
                        state.goal_state = GoalState::Succeeded;
                        state.target = None;
                    }
                }
                _ => {}
            }
            state.robot.transform()
        };

        let sample = TransformStamped::new(frames.global.as_str(), frames.base.as_str(), clock.now(), pose);
        if let Err(e) = registry.set_transform(sample, &authority) {
            tracing::error!("Failed to publish simulated pose: {}", e);
        }

        thread::sleep(period);
    }
}

impl ActionClient for SimulatedActionClient {
    fn service(&self) -> &str {
        &self.service
    }

    fn wait_for_server(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.inner.lock().ready {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(READY_POLL.min(deadline - now));
        }
    }

    fn send_goal(&mut self, goal: &NavigationGoal) {
        let mut state = self.inner.lock();
        if !state.ready {
            tracing::error!("Goal sent to {} before the server was ready", self.service);
            state.goal_state = GoalState::Lost;
            return;
        }
        if state.target.is_some() {
            tracing::info!("Previous goal on {} preempted", self.service);
        }
        state.target = Some((goal.x, goal.y));
        state.goal_state = GoalState::Pending;
    }

    fn state(&self) -> GoalState {
        self.inner.lock().goal_state
    }
}

impl Drop for SimulatedActionClient {
    fn drop(&mut self) {
        self.inner.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Shared record of goal submissions across clients, in order.
#[derive(Clone, Debug, Default)]
pub struct SubmissionLog {
    entries: Arc<Mutex<Vec<(String, NavigationGoal)>>>,
}

impl SubmissionLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, service: &str, goal: &NavigationGoal) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((service.to_string(), goal.clone()));
    }

    pub fn entries(&self) -> Vec<(String, NavigationGoal)> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Services in submission order
    pub fn services(&self) -> Vec<String> {
        self.entries().into_iter().map(|(s, _)| s).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Deterministic action client driven by the caller.
pub struct ScriptedActionClient {
    service: String,
    clock: Arc<dyn Clock>,
    /// Attempt number on which `wait_for_server` first succeeds
    ready_on_attempt: Option<usize>,
    attempts: usize,
    state: GoalState,
    sent: Vec<NavigationGoal>,
    log: Option<SubmissionLog>,
}

impl ScriptedActionClient {
    /// Ready on the first wait.
    pub fn new(service: &str, clock: Arc<dyn Clock>) -> Self {
        Self::ready_after_attempts(service, clock, 1)
    }

    /// Every wait times out.
    pub fn never_ready(service: &str, clock: Arc<dyn Clock>) -> Self {
        let mut client = Self::new(service, clock);
        client.ready_on_attempt = None;
        client
    }

    /// The first `attempts - 1` waits time out.
    pub fn ready_after_attempts(service: &str, clock: Arc<dyn Clock>, attempts: usize) -> Self {
        Self {
            service: service.to_string(),
            clock,
            ready_on_attempt: Some(attempts.max(1)),
            attempts: 0,
            state: GoalState::Lost,
            sent: Vec::new(),
            log: None,
        }
    }

    pub fn with_log(mut self, log: SubmissionLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Simulate a status update from the server.
    pub fn set_state(&mut self, state: GoalState) {
        self.state = state;
    }

    /// Number of `wait_for_server` calls so far.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub fn sent_goals(&self) -> &[NavigationGoal] {
        &self.sent
    }
}

impl ActionClient for ScriptedActionClient {
    fn service(&self) -> &str {
        &self.service
    }

    fn wait_for_server(&mut self, timeout: Duration) -> bool {
        self.attempts += 1;
        if self.ready_on_attempt.is_some_and(|n| self.attempts >= n) {
            return true;
        }
        self.clock.sleep(timeout);
        false
    }

    fn send_goal(&mut self, goal: &NavigationGoal) {
        self.sent.push(goal.clone());
        if let Some(log) = &self.log {
            log.record(&self.service, goal);
        }
        self.state = GoalState::Pending;
    }

    fn state(&self) -> GoalState {
        self.state
    }
}
