//! One-shot goal dispatch to a navigation action service.
//!
//! ```text
//! UNSENT ──send_goal_once──▶ SENT
//! ```
//!
//! `SENT` is terminal: the goal is submitted at most once per process. The
//! remote service runs its own state machine (PENDING → ACTIVE → SUCCEEDED /
//! ABORTED / ...), which the dispatcher only observes.

use std::time::Duration;

use crate::action::{ActionClient, GoalState, NavigationGoal};
use crate::error::{NavError, Result};
use crate::shared::ShutdownSignal;

/// Owns one action client and the goal destined for it.
pub struct GoalDispatcher<C: ActionClient> {
    name: String,
    client: C,
    goal: NavigationGoal,
    server_wait: Duration,
    goal_sent: bool,
}

impl<C: ActionClient> GoalDispatcher<C> {
    /// `server_wait` is the timeout of each readiness attempt.
    pub fn new(name: &str, client: C, goal: NavigationGoal, server_wait: Duration) -> Self {
        Self {
            name: name.to_string(),
            client,
            goal,
            server_wait,
            goal_sent: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service(&self) -> &str {
        self.client.service()
    }

    pub fn goal(&self) -> &NavigationGoal {
        &self.goal
    }

    pub fn goal_sent(&self) -> bool {
        self.goal_sent
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    /// Wait for the action server, retrying forever.
    ///
    /// Each attempt blocks for up to `server_wait`. Only returns early with
    /// [`NavError::Shutdown`] when shutdown is signaled.
    pub fn await_server(&mut self, shutdown: &ShutdownSignal) -> Result<()> {
        self.wait_ready(None, shutdown)
    }

    /// Like [`await_server`](Self::await_server) but gives up after
    /// `max_attempts` with [`NavError::ServerUnavailable`].
    pub fn await_server_attempts(
        &mut self,
        max_attempts: usize,
        shutdown: &ShutdownSignal,
    ) -> Result<()> {
        self.wait_ready(Some(max_attempts), shutdown)
    }

    fn wait_ready(&mut self, limit: Option<usize>, shutdown: &ShutdownSignal) -> Result<()> {
        let mut attempts = 0usize;
        loop {
            if shutdown.is_signaled() {
                return Err(NavError::Shutdown);
            }
            if limit.is_some_and(|max| attempts >= max) {
                return Err(NavError::ServerUnavailable {
                    service: self.client.service().to_string(),
                    attempts,
                });
            }

            attempts += 1;
            if self.client.wait_for_server(self.server_wait) {
                tracing::info!(
                    "Action server {} is up for {}",
                    self.client.service(),
                    self.name
                );
                return Ok(());
            }
            tracing::info!(
                "Waiting for the move_base action server to come up for {} (attempt {})",
                self.name,
                attempts
            );
        }
    }

    /// Submit the goal unless it has already been sent.
    ///
    /// Returns true if this call submitted it.
    pub fn send_goal_once(&mut self) -> bool {
        if self.goal_sent {
            return false;
        }
        tracing::info!(
            "Sending goal for {}: ({}, {}) in {}",
            self.name,
            self.goal.x,
            self.goal.y,
            self.goal.frame_id
        );
        self.client.send_goal(&self.goal);
        self.goal_sent = true;
        true
    }

    /// Last status reported for the goal.
    pub fn poll_state(&self) -> GoalState {
        self.client.state()
    }
}
