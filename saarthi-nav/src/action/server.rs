//! Navigation action server backed by a simulated robot.
//!
//! Serves one client connection at a time. The robot pose persists across
//! connections, so a reconnecting client sees the robot where it stopped.
//!
//! # Goal Lifecycle
//!
//! ```text
//! SendGoal ─▶ PENDING ─▶ ACTIVE ─▶ SUCCEEDED   (within goal_tolerance)
//!                          │
//!                          └────▶ PREEMPTED   (replaced by a newer goal)
//! SendGoal in wrong frame / non-finite ─▶ REJECTED
//! ```

use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::GoalState;
use super::sim::SimRobot;
use super::wire::{self, ActionMessage, FrameReader, Payload, SendGoal};
use crate::config::{RobotConfig, SimConfig};
use crate::error::{NavError, Result};
use crate::shared::ShutdownSignal;

/// Poll interval for the non-blocking accept loop
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Navigation server settings.
#[derive(Clone, Debug)]
pub struct NavServerConfig {
    /// Announced in `ServerReady`
    pub service: String,
    /// Goals in any other frame are rejected
    pub global_frame: String,
    pub speed: f64,
    pub goal_tolerance: f64,
    pub update_hz: f64,
    pub start_x: f64,
    pub start_y: f64,
}

impl Default for NavServerConfig {
    fn default() -> Self {
        let sim = SimConfig::default();
        Self {
            service: "/explorer/move_base".to_string(),
            global_frame: "map".to_string(),
            speed: sim.speed,
            goal_tolerance: sim.goal_tolerance,
            update_hz: sim.update_hz,
            start_x: 0.0,
            start_y: 0.0,
        }
    }
}

impl NavServerConfig {
    pub fn from_sim(robot: &RobotConfig, sim: &SimConfig) -> Self {
        Self {
            service: robot.service.clone(),
            global_frame: robot.goal.frame_id.clone(),
            speed: sim.speed,
            goal_tolerance: sim.goal_tolerance,
            update_hz: sim.update_hz,
            start_x: robot.start_x,
            start_y: robot.start_y,
        }
    }

    /// Reject settings that would stall or corrupt the simulated robot.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("speed", self.speed), ("update_hz", self.update_hz)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(NavError::Config(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        if !(self.goal_tolerance.is_finite() && self.goal_tolerance >= 0.0) {
            return Err(NavError::Config(format!(
                "goal_tolerance must not be negative, got {}",
                self.goal_tolerance
            )));
        }
        if !(self.start_x.is_finite() && self.start_y.is_finite()) {
            return Err(NavError::Config("start pose must be finite".into()));
        }
        Ok(())
    }
}

/// Goal currently being executed.
struct ActiveGoal {
    id: String,
    x: f64,
    y: f64,
}

/// TCP navigation action server.
pub struct NavServer {
    listener: TcpListener,
    config: NavServerConfig,
    shutdown: ShutdownSignal,
    robot: SimRobot,
}

impl NavServer {
    /// Bind to `address` (use port 0 for an ephemeral port).
    pub fn bind(address: &str, config: NavServerConfig, shutdown: ShutdownSignal) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(address)?;
        listener.set_nonblocking(true)?;
        let robot = SimRobot::new(
            config.start_x,
            config.start_y,
            config.speed,
            config.goal_tolerance,
        );
        tracing::info!(
            "Navigation server for {} listening on {}",
            config.service,
            listener.local_addr()?
        );
        Ok(Self {
            listener,
            config,
            shutdown,
            robot,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Run on a background thread until shutdown.
    pub fn spawn(self) -> Result<JoinHandle<()>> {
        let name = format!("nav-server-{}", self.config.service.trim_matches('/').replace('/', "-"));
        thread::Builder::new()
            .name(name)
            .spawn(move || {
                if let Err(e) = self.run() {
                    tracing::error!("Navigation server error: {}", e);
                }
            })
            .map_err(NavError::Connection)
    }

    /// Accept and serve clients until shutdown.
    pub fn run(mut self) -> Result<()> {
        while self.shutdown.is_running() {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    tracing::info!("Client connected: {}", peer);
                    match self.serve(stream) {
                        Ok(()) => tracing::info!("Client disconnected: {}", peer),
                        Err(e) => tracing::warn!("Session with {} ended: {}", peer, e),
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                Err(e) => return Err(NavError::Connection(e)),
            }
        }
        tracing::info!("Navigation server for {} stopped", self.config.service);
        Ok(())
    }

    fn serve(&mut self, mut stream: TcpStream) -> Result<()> {
        let step = Duration::from_secs_f64(1.0 / self.config.update_hz);
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(step))?;
        stream.set_nodelay(true)?;

        wire::write_frame(&mut stream, &ActionMessage::server_ready(&self.config.service))?;

        let mut frames = FrameReader::new();
        let mut active: Option<ActiveGoal> = None;
        let mut last_step = Instant::now();

        while self.shutdown.is_running() {
            match frames.poll(&mut stream) {
                Ok(Some(msg)) => match msg.payload {
                    Some(Payload::SendGoal(goal)) => {
                        self.accept_goal(&mut stream, &mut active, goal)?;
                    }
                    Some(other) => tracing::warn!("Unexpected message from client: {:?}", other),
                    None => tracing::warn!("Empty payload from client"),
                },
                Ok(None) => {}
                Err(NavError::Connection(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                    return Ok(());
                }
                Err(e) => return Err(e),
            }

            let dt = last_step.elapsed().as_secs_f64();
            last_step = Instant::now();
            let reached = match active.as_ref() {
                Some(goal) => self.robot.step_toward(goal.x, goal.y, dt),
                None => false,
            };
            if reached && let Some(goal) = active.take() {
                tracing::info!(
                    "Goal {} reached at ({:.3}, {:.3})",
                    goal.id,
                    self.robot.x,
                    self.robot.y
                );
                send_status(&mut stream, &goal.id, GoalState::Succeeded)?;
            }
        }
        Ok(())
    }

    fn accept_goal(
        &mut self,
        stream: &mut TcpStream,
        active: &mut Option<ActiveGoal>,
        goal: SendGoal,
    ) -> Result<()> {
        tracing::info!(
            "Goal {} received: ({:.6}, {:.6}) in {}",
            goal.goal_id,
            goal.x,
            goal.y,
            goal.frame_id
        );

        if goal.frame_id != self.config.global_frame || !(goal.x.is_finite() && goal.y.is_finite())
        {
            tracing::warn!("Rejecting goal {}", goal.goal_id);
            return send_status(stream, &goal.goal_id, GoalState::Rejected);
        }

        if let Some(previous) = active.take() {
            tracing::info!("Goal {} preempted by {}", previous.id, goal.goal_id);
            send_status(stream, &previous.id, GoalState::Preempted)?;
        }

        send_status(stream, &goal.goal_id, GoalState::Pending)?;
        send_status(stream, &goal.goal_id, GoalState::Active)?;
        *active = Some(ActiveGoal {
            id: goal.goal_id,
            x: goal.x,
            y: goal.y,
        });
        Ok(())
    }
}

fn send_status(stream: &mut TcpStream, goal_id: &str, state: GoalState) -> Result<()> {
    wire::write_frame(stream, &ActionMessage::goal_status(goal_id, state))
}
