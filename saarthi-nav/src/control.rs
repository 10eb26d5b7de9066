//! Main control loop: dual goal dispatch plus transform broadcast/lookup.
//!
//! Each tick, in order:
//!
//! 1. Send the explorer goal if not yet sent
//! 2. Log if the explorer goal has succeeded
//! 3. Send the follower goal if not yet sent
//! 4. Log if the follower goal has succeeded
//! 5. Publish the fixed transform
//! 6. Look it up in the map frame; on failure pause before continuing
//! 7. Sleep for the rest of the period
//!
//! Success is logged on every tick the status stays SUCCEEDED, not only on
//! the transition. Other terminal states are not acted on.

use std::sync::Arc;
use std::time::Duration;

use crate::action::{ActionClient, GoalState};
use crate::clock::{Clock, LoopRate};
use crate::config::TimingConfig;
use crate::dispatcher::GoalDispatcher;
use crate::geometry::TransformStamped;
use crate::shared::ShutdownSignal;
use crate::tf::{Observation, TransformObserver, TransformPublisher};

/// What happened during one tick.
#[derive(Clone, Debug)]
pub struct TickReport {
    /// 1-based tick number
    pub tick: u64,
    /// Dispatcher names whose goal was submitted this tick, in order
    pub goals_sent: Vec<String>,
    /// Dispatcher names for which success was logged this tick
    pub successes: Vec<String>,
    pub explorer_state: GoalState,
    pub follower_state: GoalState,
    pub published: TransformStamped,
    pub observation: Observation,
}

/// Loop timing resolved from config.
#[derive(Clone, Debug)]
pub struct LoopTiming {
    pub rate_hz: f64,
    pub lookup_retry_pause: Duration,
}

impl From<&TimingConfig> for LoopTiming {
    fn from(config: &TimingConfig) -> Self {
        Self {
            rate_hz: config.rate_hz,
            lookup_retry_pause: config.lookup_retry_pause(),
        }
    }
}

impl Default for LoopTiming {
    fn default() -> Self {
        Self::from(&TimingConfig::default())
    }
}

/// Fixed-rate loop composing both dispatchers, publisher and observer.
pub struct ControlLoop<C: ActionClient> {
    explorer: GoalDispatcher<C>,
    follower: GoalDispatcher<C>,
    publisher: TransformPublisher,
    observer: TransformObserver,
    clock: Arc<dyn Clock>,
    rate: LoopRate,
    lookup_retry_pause: Duration,
    shutdown: ShutdownSignal,
    ticks: u64,
    lookup_failures: u64,
}

impl<C: ActionClient> ControlLoop<C> {
    pub fn new(
        explorer: GoalDispatcher<C>,
        follower: GoalDispatcher<C>,
        publisher: TransformPublisher,
        observer: TransformObserver,
        timing: LoopTiming,
        clock: Arc<dyn Clock>,
        shutdown: ShutdownSignal,
    ) -> Self {
        let rate = LoopRate::new(timing.rate_hz, Arc::clone(&clock));
        Self {
            explorer,
            follower,
            publisher,
            observer,
            clock,
            rate,
            lookup_retry_pause: timing.lookup_retry_pause,
            shutdown,
            ticks: 0,
            lookup_failures: 0,
        }
    }

    pub fn explorer(&self) -> &GoalDispatcher<C> {
        &self.explorer
    }

    pub fn explorer_mut(&mut self) -> &mut GoalDispatcher<C> {
        &mut self.explorer
    }

    pub fn follower(&self) -> &GoalDispatcher<C> {
        &self.follower
    }

    pub fn follower_mut(&mut self) -> &mut GoalDispatcher<C> {
        &mut self.follower
    }

    /// Ticks executed so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Failed lookups so far.
    pub fn lookup_failures(&self) -> u64 {
        self.lookup_failures
    }

    /// Run one tick, including the end-of-period sleep.
    pub fn tick(&mut self) -> TickReport {
        self.ticks += 1;
        let mut goals_sent = Vec::new();
        let mut successes = Vec::new();

        let explorer_state = dispatch(&mut self.explorer, &mut goals_sent, &mut successes);
        let follower_state = dispatch(&mut self.follower, &mut goals_sent, &mut successes);

        let published = self.publisher.publish_once();
        let observation = self.observer.observe_once();
        if !observation.is_available() {
            self.lookup_failures += 1;
            self.clock.sleep(self.lookup_retry_pause);
        }

        if !self.rate.sleep() {
            tracing::debug!(
                "Tick {} overran the {:?} period",
                self.ticks,
                self.rate.period()
            );
        }

        TickReport {
            tick: self.ticks,
            goals_sent,
            successes,
            explorer_state,
            follower_state,
            published,
            observation,
        }
    }

    /// Tick until shutdown. Returns the number of ticks run.
    pub fn run(&mut self) -> u64 {
        self.run_while(|_| true)
    }

    /// Tick until shutdown or until `max_ticks` have run.
    pub fn run_for(&mut self, max_ticks: u64) -> u64 {
        let start = self.ticks;
        self.run_while(|loop_ticks| loop_ticks - start < max_ticks)
    }

    fn run_while(&mut self, mut keep_going: impl FnMut(u64) -> bool) -> u64 {
        let start = self.ticks;
        tracing::info!("Control loop started");
        while self.shutdown.is_running() && keep_going(self.ticks) {
            self.tick();
        }
        tracing::info!(
            "Control loop stopped after {} ticks ({} failed lookups)",
            self.ticks - start,
            self.lookup_failures
        );
        self.ticks - start
    }
}

/// Steps 1-2 (or 3-4) for one dispatcher.
fn dispatch<C: ActionClient>(
    dispatcher: &mut GoalDispatcher<C>,
    goals_sent: &mut Vec<String>,
    successes: &mut Vec<String>,
) -> GoalState {
    if dispatcher.send_goal_once() {
        goals_sent.push(dispatcher.name().to_string());
    }
    let state = dispatcher.poll_state();
    if state == GoalState::Succeeded {
        tracing::info!("Hooray, {} reached goal", dispatcher.name());
        successes.push(dispatcher.name().to_string());
    }
    state
}
