//! Configuration loading for SaarthiNav
//!
//! Every field has a default, so the program runs with no config file at
//! all. A TOML file can override any section:
//!
//! ```toml
//! backend = "tcp"
//!
//! [explorer]
//! name = "explorer"
//! service = "/explorer/move_base"
//! address = "192.168.68.101:7301"
//! goal = { frame_id = "map", x = 7.710214, y = -1.716889 }
//!
//! [timing]
//! rate_hz = 10.0
//! ```

use crate::error::{NavError, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Clone, Debug, Deserialize)]
pub struct SaarthiConfig {
    /// Which action client implementation to use
    #[serde(default)]
    pub backend: BackendKind,

    #[serde(default = "default_explorer")]
    pub explorer: RobotConfig,

    #[serde(default = "default_follower")]
    pub follower: RobotConfig,

    #[serde(default)]
    pub transform: TransformConfig,

    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub sim: SimConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Action client backend
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Length-prefixed protobuf over TCP to a navigation server
    #[default]
    Tcp,
    /// In-process simulated robots
    Sim,
}

/// One navigation stack
#[derive(Clone, Debug, Deserialize)]
pub struct RobotConfig {
    /// Short name used in logs and frame prefixes ("explorer")
    pub name: String,

    /// Action service name ("/explorer/move_base")
    pub service: String,

    /// Server address for the TCP backend. Left empty in a TOML table, it
    /// falls back to that robot's default port (explorer 7301, follower 7302)
    #[serde(default)]
    pub address: String,

    /// Fixed navigation goal
    pub goal: GoalConfig,

    /// Start pose for the simulated backend (meters)
    #[serde(default)]
    pub start_x: f64,
    #[serde(default)]
    pub start_y: f64,
}

/// Goal position; orientation is always identity
#[derive(Clone, Debug, Deserialize)]
pub struct GoalConfig {
    #[serde(default = "default_map_frame")]
    pub frame_id: String,
    pub x: f64,
    pub y: f64,
}

/// Published frame and the frame it is observed in
#[derive(Clone, Debug, Deserialize)]
pub struct TransformConfig {
    /// Sensor frame the published frame hangs off
    #[serde(default = "default_sensor_frame")]
    pub parent_frame: String,

    /// Published frame
    #[serde(default = "default_child_frame")]
    pub child_frame: String,

    /// Frame the observer reports positions in
    #[serde(default = "default_map_frame")]
    pub target_frame: String,

    /// Fixed offset from the sensor frame (meters)
    #[serde(default = "default_offset_xy")]
    pub x: f64,
    #[serde(default = "default_offset_xy")]
    pub y: f64,
    #[serde(default = "default_offset_z")]
    pub z: f64,
}

/// Loop timing
#[derive(Clone, Debug, Deserialize)]
pub struct TimingConfig {
    /// Main loop rate (Hz)
    #[serde(default = "default_rate_hz")]
    pub rate_hz: f64,

    /// Timeout per server readiness attempt (seconds)
    #[serde(default = "default_server_wait_secs")]
    pub server_wait_secs: f64,

    /// Pause after a failed transform lookup (seconds)
    #[serde(default = "default_lookup_retry_secs")]
    pub lookup_retry_secs: f64,

    /// Transform history kept per edge (seconds)
    #[serde(default = "default_cache_secs")]
    pub cache_secs: f64,
}

/// Simulated robot parameters (sim backend and `serve`)
#[derive(Clone, Debug, Deserialize)]
pub struct SimConfig {
    /// Straight-line travel speed (m/s)
    #[serde(default = "default_sim_speed")]
    pub speed: f64,

    /// Distance at which a goal counts as reached (meters)
    #[serde(default = "default_goal_tolerance")]
    pub goal_tolerance: f64,

    /// Delay before the simulated server reports ready (seconds)
    #[serde(default)]
    pub ready_after_secs: f64,

    /// Simulation step rate (Hz)
    #[serde(default = "default_update_hz")]
    pub update_hz: f64,

    /// Robot base frame, prefixed with "<name>_tf/"
    #[serde(default = "default_base_frame")]
    pub base_frame: String,

    /// Camera frame, prefixed with "<name>_tf/"
    #[serde(default = "default_camera_frame")]
    pub camera_frame: String,

    /// Camera mount offset from the base (meters)
    #[serde(default = "default_camera_x")]
    pub camera_x: f64,
    #[serde(default = "default_camera_z")]
    pub camera_z: f64,
}

/// Logging configuration
#[derive(Clone, Debug, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive, overridden by RUST_LOG
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_explorer() -> RobotConfig {
    RobotConfig {
        name: "explorer".to_string(),
        service: "/explorer/move_base".to_string(),
        address: "127.0.0.1:7301".to_string(),
        goal: GoalConfig {
            frame_id: default_map_frame(),
            x: 7.710214,
            y: -1.716889,
        },
        start_x: 0.0,
        start_y: 0.0,
    }
}
fn default_follower() -> RobotConfig {
    RobotConfig {
        name: "follower".to_string(),
        service: "/follower/move_base".to_string(),
        address: "127.0.0.1:7302".to_string(),
        goal: GoalConfig {
            frame_id: default_map_frame(),
            x: -0.289296,
            y: -1.282680,
        },
        start_x: 0.0,
        start_y: -1.0,
    }
}
fn default_map_frame() -> String {
    "map".to_string()
}
fn default_sensor_frame() -> String {
    "explorer_tf/camera_rgb_optical_frame".to_string()
}
fn default_child_frame() -> String {
    "my_frame".to_string()
}
fn default_offset_xy() -> f64 {
    0.5
}
fn default_offset_z() -> f64 {
    0.2
}
fn default_rate_hz() -> f64 {
    10.0
}
fn default_server_wait_secs() -> f64 {
    5.0
}
fn default_lookup_retry_secs() -> f64 {
    1.0
}
fn default_cache_secs() -> f64 {
    10.0
}
fn default_sim_speed() -> f64 {
    0.5
}
fn default_goal_tolerance() -> f64 {
    0.05
}
fn default_update_hz() -> f64 {
    20.0
}
fn default_base_frame() -> String {
    "base_link".to_string()
}
fn default_camera_frame() -> String {
    "camera_rgb_optical_frame".to_string()
}
fn default_camera_x() -> f64 {
    0.1
}
fn default_camera_z() -> f64 {
    0.25
}
fn default_log_level() -> String {
    "saarthi_nav=info".to_string()
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            parent_frame: default_sensor_frame(),
            child_frame: default_child_frame(),
            target_frame: default_map_frame(),
            x: default_offset_xy(),
            y: default_offset_xy(),
            z: default_offset_z(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            rate_hz: default_rate_hz(),
            server_wait_secs: default_server_wait_secs(),
            lookup_retry_secs: default_lookup_retry_secs(),
            cache_secs: default_cache_secs(),
        }
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            speed: default_sim_speed(),
            goal_tolerance: default_goal_tolerance(),
            ready_after_secs: 0.0,
            update_hz: default_update_hz(),
            base_frame: default_base_frame(),
            camera_frame: default_camera_frame(),
            camera_x: default_camera_x(),
            camera_z: default_camera_z(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for SaarthiConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            explorer: default_explorer(),
            follower: default_follower(),
            transform: TransformConfig::default(),
            timing: TimingConfig::default(),
            sim: SimConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl TimingConfig {
    pub fn server_wait(&self) -> Duration {
        Duration::from_secs_f64(self.server_wait_secs)
    }

    pub fn lookup_retry_pause(&self) -> Duration {
        Duration::from_secs_f64(self.lookup_retry_secs)
    }

    pub fn cache_duration(&self) -> Duration {
        Duration::from_secs_f64(self.cache_secs)
    }
}

impl SimConfig {
    /// Fully-qualified frame id for one of a robot's frames.
    pub fn robot_frame(robot: &str, frame: &str) -> String {
        format!("{}_tf/{}", robot, frame)
    }
}

impl SaarthiConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| NavError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: SaarthiConfig = toml::from_str(content)?;
        config.fill_robot_addresses();
        config.validate()?;
        Ok(config)
    }

    fn fill_robot_addresses(&mut self) {
        for (robot, default) in [
            (&mut self.explorer, default_explorer()),
            (&mut self.follower, default_follower()),
        ] {
            if robot.address.is_empty() {
                robot.address = default.address;
            }
        }
    }

    /// Both robots, explorer first
    pub fn robots(&self) -> [&RobotConfig; 2] {
        [&self.explorer, &self.follower]
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.timing;
        for (name, value) in [
            ("timing.rate_hz", t.rate_hz),
            ("timing.server_wait_secs", t.server_wait_secs),
            ("timing.cache_secs", t.cache_secs),
            ("sim.speed", self.sim.speed),
            ("sim.update_hz", self.sim.update_hz),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(NavError::Config(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        for (name, value) in [
            ("timing.lookup_retry_secs", t.lookup_retry_secs),
            ("sim.ready_after_secs", self.sim.ready_after_secs),
            ("sim.goal_tolerance", self.sim.goal_tolerance),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(NavError::Config(format!(
                    "{} must not be negative, got {}",
                    name, value
                )));
            }
        }

        let tf = &self.transform;
        if tf.parent_frame.is_empty() || tf.child_frame.is_empty() || tf.target_frame.is_empty() {
            return Err(NavError::Config("transform frame ids must not be empty".into()));
        }
        if tf.parent_frame == tf.child_frame {
            return Err(NavError::Config(format!(
                "transform.child_frame \"{}\" cannot equal its parent",
                tf.child_frame
            )));
        }

        for robot in self.robots() {
            if robot.name.is_empty() || robot.service.is_empty() {
                return Err(NavError::Config("robot name and service must not be empty".into()));
            }
            if !(robot.goal.x.is_finite() && robot.goal.y.is_finite()) {
                return Err(NavError::Config(format!(
                    "goal for {} must be finite",
                    robot.name
                )));
            }
        }
        if self.explorer.service == self.follower.service {
            return Err(NavError::Config(format!(
                "explorer and follower share service {}",
                self.explorer.service
            )));
        }
        if self.explorer.address == self.follower.address {
            return Err(NavError::Config(format!(
                "explorer and follower share address {}",
                self.explorer.address
            )));
        }
        Ok(())
    }
}
