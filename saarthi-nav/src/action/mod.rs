//! Navigation action clients.
//!
//! An action service accepts one long-running goal at a time and reports its
//! progress through a pollable [`GoalState`]. The control loop only ever sees
//! the [`ActionClient`] trait; backends:
//!
//! - [`TcpActionClient`]: length-prefixed protobuf over TCP to a [`NavServer`]
//! - [`SimulatedActionClient`]: in-process robot that drives toward the goal
//!   and publishes its pose into the transform registry
//! - [`ScriptedActionClient`]: deterministic, for tests

mod client;
mod server;
mod sim;
pub mod wire;

pub use client::TcpActionClient;
pub use server::{NavServer, NavServerConfig};
pub use sim::{ScriptedActionClient, SimulatedActionClient, SubmissionLog};

use std::fmt;
use std::time::Duration;

use crate::config::RobotConfig;
use crate::geometry::{Pose, PoseStamped, Quaternion, Time, Vector3};

/// Remote status of the most recent goal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum GoalState {
    /// Accepted, not yet being processed
    Pending = 0,
    /// Being processed
    Active = 1,
    /// Cancelled after it started (e.g. replaced by a newer goal)
    Preempted = 2,
    /// Reached
    Succeeded = 3,
    /// Server gave up
    Aborted = 4,
    /// Server refused the goal
    Rejected = 5,
    /// Cancelled before it started
    Recalled = 6,
    /// No goal sent, or the connection dropped
    #[default]
    Lost = 7,
}

impl GoalState {
    /// True for terminal states.
    pub fn is_done(self) -> bool {
        !matches!(self, GoalState::Pending | GoalState::Active)
    }

    pub fn from_wire(value: i32) -> Option<Self> {
        Some(match value {
            0 => GoalState::Pending,
            1 => GoalState::Active,
            2 => GoalState::Preempted,
            3 => GoalState::Succeeded,
            4 => GoalState::Aborted,
            5 => GoalState::Rejected,
            6 => GoalState::Recalled,
            7 => GoalState::Lost,
            _ => return None,
        })
    }

    pub fn to_wire(self) -> i32 {
        self as i32
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GoalState::Pending => "PENDING",
            GoalState::Active => "ACTIVE",
            GoalState::Preempted => "PREEMPTED",
            GoalState::Succeeded => "SUCCEEDED",
            GoalState::Aborted => "ABORTED",
            GoalState::Rejected => "REJECTED",
            GoalState::Recalled => "RECALLED",
            GoalState::Lost => "LOST",
        }
    }
}

impl fmt::Display for GoalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target pose for one navigation stack. Orientation is always identity.
#[derive(Clone, Debug, PartialEq)]
pub struct NavigationGoal {
    pub frame_id: String,
    pub stamp: Time,
    pub x: f64,
    pub y: f64,
    pub orientation: Quaternion,
}

impl NavigationGoal {
    pub fn new(frame_id: impl Into<String>, x: f64, y: f64, stamp: Time) -> Self {
        Self {
            frame_id: frame_id.into(),
            stamp,
            x,
            y,
            orientation: Quaternion::IDENTITY,
        }
    }

    /// Goal from a robot's configured target.
    pub fn from_config(robot: &RobotConfig, stamp: Time) -> Self {
        Self::new(robot.goal.frame_id.as_str(), robot.goal.x, robot.goal.y, stamp)
    }

    pub fn target_pose(&self) -> PoseStamped {
        PoseStamped {
            frame_id: self.frame_id.clone(),
            stamp: self.stamp,
            pose: Pose {
                position: Vector3::new(self.x, self.y, 0.0),
                orientation: self.orientation,
            },
        }
    }
}

/// Client side of one navigation action service.
///
/// Implementations run their own communication thread, so `state` is a cheap
/// read of the last status received.
pub trait ActionClient: Send {
    /// Action service name ("/explorer/move_base")
    fn service(&self) -> &str;

    /// Block until the server is ready or `timeout` elapses.
    fn wait_for_server(&mut self, timeout: Duration) -> bool;

    /// Submit a goal without waiting for the result.
    fn send_goal(&mut self, goal: &NavigationGoal);

    /// Last reported status of the most recent goal.
    fn state(&self) -> GoalState;
}

impl<T: ActionClient + ?Sized> ActionClient for Box<T> {
    fn service(&self) -> &str {
        (**self).service()
    }

    fn wait_for_server(&mut self, timeout: Duration) -> bool {
        (**self).wait_for_server(timeout)
    }

    fn send_goal(&mut self, goal: &NavigationGoal) {
        (**self).send_goal(goal)
    }

    fn state(&self) -> GoalState {
        (**self).state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_goal_state_wire_values() {
        for state in [
            GoalState::Pending,
            GoalState::Active,
            GoalState::Preempted,
            GoalState::Succeeded,
            GoalState::Aborted,
            GoalState::Rejected,
            GoalState::Recalled,
            GoalState::Lost,
        ] {
            assert_eq!(GoalState::from_wire(state.to_wire()), Some(state));
        }
        assert_eq!(GoalState::from_wire(42), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!GoalState::Pending.is_done());
        assert!(!GoalState::Active.is_done());
        assert!(GoalState::Succeeded.is_done());
        assert!(GoalState::Aborted.is_done());
        assert!(GoalState::Lost.is_done());
    }

    #[test]
    fn test_goal_from_config_has_identity_orientation() {
        let config = crate::config::SaarthiConfig::default();
        let goal = NavigationGoal::from_config(&config.explorer, Time(3.0));
        assert_eq!(goal.frame_id, "map");
        assert_eq!(goal.orientation, Quaternion::IDENTITY);
        let pose = goal.target_pose();
        assert_eq!(pose.pose.position, Vector3::new(7.710214, -1.716889, 0.0));
        assert_eq!(pose.stamp, Time(3.0));
    }
}
