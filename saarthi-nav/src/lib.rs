//! SaarthiNav - Dual-robot goal dispatcher for VacuumTiger
//!
//! Sends one fixed navigation goal to each of two navigation stacks
//! ("explorer" and "follower"), reports when they succeed, and publishes and
//! looks up a fixed sensor-offset frame at a fixed rate.
//!
//! ## Architecture
//!
//! ```text
//!                    ┌──────────────────────┐
//!                    │  ControlLoop (10Hz)  │
//!                    └──┬──────┬──────┬─────┘
//!          ┌────────────┘      │      └────────────┐
//!          ▼                   ▼                   ▼
//!  GoalDispatcher ×2   TransformPublisher   TransformObserver
//!          │                   │                   │
//!          ▼                   └───────┬───────────┘
//!   dyn ActionClient                   ▼
//!   (TCP / sim thread)        TransformRegistry
//! ```
//!
//! Only the action clients own background threads. The loop itself is
//! single-threaded; its only blocking calls are the startup waits and the
//! period sleep, both routed through an injectable [`Clock`](clock::Clock).

pub mod action;
pub mod clock;
pub mod config;
pub mod control;
pub mod dispatcher;
pub mod error;
pub mod geometry;
pub mod shared;
pub mod tf;

pub use action::{ActionClient, GoalState, NavigationGoal};
pub use config::SaarthiConfig;
pub use control::{ControlLoop, LoopTiming, TickReport};
pub use dispatcher::GoalDispatcher;
pub use error::{NavError, Result};
pub use shared::ShutdownSignal;
pub use tf::{Observation, TfError, TransformObserver, TransformPublisher, TransformRegistry};
