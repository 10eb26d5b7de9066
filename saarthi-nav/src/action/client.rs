//! TCP action client for a remote navigation server.
//!
//! A background thread owns the socket's read side: it (re)connects,
//! decodes frames and records readiness and goal status. The caller's thread
//! only writes goals and reads the recorded state, so polling never blocks
//! on the network.

use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::wire::{self, ActionMessage, FrameReader, Payload};
use super::{ActionClient, GoalState, NavigationGoal};
use crate::error::{NavError, Result};

/// Connect attempt timeout
const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Delay between failed connect attempts
const RECONNECT_INTERVAL: Duration = Duration::from_millis(200);

/// Socket read timeout, bounds how long shutdown takes to be noticed
const READ_TIMEOUT: Duration = Duration::from_millis(100);

const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// State written by the receive side, read by the caller.
#[derive(Debug, Default)]
struct Shared {
    ready: bool,
    /// Write half of the current connection
    writer: Option<TcpStream>,
    /// Id of the most recent goal sent
    goal_id: Option<String>,
    state: GoalState,
}

struct Inner {
    shared: Mutex<Shared>,
    ready_changed: Condvar,
    stop: AtomicBool,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Receive side: connection management and frame decoding.
struct Receiver {
    service: String,
    address: SocketAddr,
    inner: Arc<Inner>,
    stream: Option<TcpStream>,
    frames: FrameReader,
}

impl Receiver {
    /// One connect attempt or one frame poll.
    fn spin_once(&mut self) {
        let Some(stream) = self.stream.as_mut() else {
            self.try_connect();
            return;
        };

        match self.frames.poll(stream) {
            Ok(Some(msg)) => self.handle(msg),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("Connection to {} lost: {}", self.service, e);
                self.disconnect();
            }
        }
    }

    fn try_connect(&mut self) {
        let stream = match TcpStream::connect_timeout(&self.address, CONNECT_TIMEOUT) {
            Ok(s) => s,
            Err(e) => {
                tracing::trace!("Connect to {} ({}) failed: {}", self.service, self.address, e);
                thread::sleep(RECONNECT_INTERVAL);
                return;
            }
        };

        let configured = stream
            .set_read_timeout(Some(READ_TIMEOUT))
            .and_then(|_| stream.set_write_timeout(Some(WRITE_TIMEOUT)))
            .and_then(|_| stream.set_nodelay(true))
            .and_then(|_| stream.try_clone());
        match configured {
            Ok(writer) => {
                tracing::debug!("Connected to {} at {}", self.service, self.address);
                self.frames.reset();
                self.inner.lock().writer = Some(writer);
                self.stream = Some(stream);
            }
            Err(e) => {
                tracing::warn!("Failed to configure socket for {}: {}", self.service, e);
                thread::sleep(RECONNECT_INTERVAL);
            }
        }
    }

    fn disconnect(&mut self) {
        self.stream = None;
        let mut shared = self.inner.lock();
        shared.ready = false;
        shared.writer = None;
        if shared.goal_id.is_some() && !shared.state.is_done() {
            shared.state = GoalState::Lost;
        }
        self.inner.ready_changed.notify_all();
    }

    fn handle(&mut self, msg: ActionMessage) {
        match msg.payload {
            Some(Payload::ServerReady(ready)) => {
                // A server for another service is not our server
                if ready.service != self.service {
                    tracing::warn!(
                        "Server at {} announced {} (expected {}), not ready",
                        self.address,
                        ready.service,
                        self.service
                    );
                    return;
                }
                self.inner.lock().ready = true;
                self.inner.ready_changed.notify_all();
            }
            Some(Payload::GoalStatus(status)) => {
                let Some(state) = GoalState::from_wire(status.state) else {
                    tracing::warn!("Unknown goal state {} from {}", status.state, self.service);
                    return;
                };
                let mut shared = self.inner.lock();
                if shared.goal_id.as_deref() == Some(status.goal_id.as_str()) {
                    if shared.state != state {
                        tracing::debug!("{} goal {} -> {}", self.service, status.goal_id, state);
                    }
                    shared.state = state;
                } else {
                    tracing::trace!("Ignoring status for stale goal {}", status.goal_id);
                }
            }
            Some(Payload::SendGoal(_)) => {
                tracing::warn!("Received goal from server {}", self.service);
            }
            None => tracing::warn!("Empty payload from {}", self.service),
        }
    }
}

/// Action client over TCP.
pub struct TcpActionClient {
    service: String,
    inner: Arc<Inner>,
    /// Present when the caller drives the receive side via `spin_once`
    receiver: Option<Receiver>,
    handle: Option<JoinHandle<()>>,
    goals_sent: u64,
}

impl TcpActionClient {
    /// Create a client for `service` served at `address`.
    ///
    /// With `spin_thread` the receive side runs on its own thread; otherwise
    /// the caller must call [`spin_once`](Self::spin_once) (which
    /// `wait_for_server` does on its own).
    pub fn connect(service: &str, address: &str, spin_thread: bool) -> Result<Self> {
        let address: SocketAddr = address
            .parse()
            .map_err(|e| NavError::Config(format!("Invalid address {}: {}", address, e)))?;

        let inner = Arc::new(Inner {
            shared: Mutex::new(Shared::default()),
            ready_changed: Condvar::new(),
            stop: AtomicBool::new(false),
        });
        let mut receiver = Receiver {
            service: service.to_string(),
            address,
            inner: Arc::clone(&inner),
            stream: None,
            frames: FrameReader::new(),
        };

        let (receiver, handle) = if spin_thread {
            let thread_inner = Arc::clone(&inner);
            let handle = thread::Builder::new()
                .name(format!("action-{}", service.trim_matches('/').replace('/', "-")))
                .spawn(move || {
                    while !thread_inner.stop.load(Ordering::Acquire) {
                        receiver.spin_once();
                    }
                    tracing::debug!("Action client thread for {} stopped", receiver.service);
                })
                .map_err(NavError::Connection)?;
            (None, Some(handle))
        } else {
            (Some(receiver), None)
        };

        tracing::info!("Action client for {} targeting {}", service, address);
        Ok(Self {
            service: service.to_string(),
            inner,
            receiver,
            handle,
            goals_sent: 0,
        })
    }

    /// Drive the receive side once when no background thread is running.
    pub fn spin_once(&mut self) {
        if let Some(receiver) = self.receiver.as_mut() {
            receiver.spin_once();
        }
    }

    pub fn is_server_connected(&self) -> bool {
        self.inner.lock().ready
    }
}

impl ActionClient for TcpActionClient {
    fn service(&self) -> &str {
        &self.service
    }

    fn wait_for_server(&mut self, timeout: Duration) -> bool {
        if self.receiver.is_some() {
            let deadline = Instant::now() + timeout;
            while Instant::now() < deadline {
                self.spin_once();
                if self.is_server_connected() {
                    return true;
                }
            }
            return self.is_server_connected();
        }

        let shared = self.inner.lock();
        let (shared, _) = self
            .inner
            .ready_changed
            .wait_timeout_while(shared, timeout, |s| !s.ready)
            .unwrap_or_else(|e| e.into_inner());
        shared.ready
    }

    fn send_goal(&mut self, goal: &NavigationGoal) {
        self.goals_sent += 1;
        let goal_id = format!("{}-{}", self.service.trim_matches('/'), self.goals_sent);
        let msg = ActionMessage::send_goal(&goal_id, goal);

        let writer = {
            let mut shared = self.inner.lock();
            shared.goal_id = Some(goal_id.clone());
            shared.state = GoalState::Pending;
            shared.writer.as_ref().map(TcpStream::try_clone)
        };

        // Never write while holding the lock
        let written = match writer {
            Some(Ok(mut writer)) => wire::write_frame(&mut writer, &msg),
            Some(Err(e)) => Err(NavError::Connection(e)),
            None => Err(NavError::Protocol("not connected".into())),
        };
        if let Err(e) = written {
            tracing::error!("Failed to send goal {} to {}: {}", goal_id, self.service, e);
            let mut shared = self.inner.lock();
            if shared.goal_id.as_deref() == Some(goal_id.as_str()) {
                shared.state = GoalState::Lost;
            }
        }
    }

    fn state(&self) -> GoalState {
        self.inner.lock().state
    }
}

impl Drop for TcpActionClient {
    fn drop(&mut self) {
        self.inner.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
