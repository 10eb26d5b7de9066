//! Action wire protocol
//!
//! Client and server exchange length-prefixed protobuf frames:
//!
//! ```text
//! ┌──────────────────┬─────────────────────────┐
//! │ Length (4 bytes) │ Protobuf ActionMessage  │
//! │ Big-endian u32   │ (variable size)         │
//! └──────────────────┴─────────────────────────┘
//! ```
//!
//! # Message Flow
//!
//! ```text
//! server → client   ServerReady { service }         once, on accept
//! client → server   SendGoal { goal_id, pose }      once per goal
//! server → client   GoalStatus { goal_id, state }   on every transition
//! ```
//!
//! Frames larger than [`MAX_FRAME_SIZE`] are rejected.

use std::io::{ErrorKind, Read, Write};

use prost::Message as ProstMessage;

use super::{GoalState, NavigationGoal};
use crate::error::{NavError, Result};
use crate::geometry::{Quaternion, Time};

/// Upper bound on a single frame payload
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Top-level frame
#[derive(Clone, PartialEq, prost::Message)]
pub struct ActionMessage {
    #[prost(oneof = "Payload", tags = "1, 2, 3")]
    pub payload: Option<Payload>,
}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum Payload {
    #[prost(message, tag = "1")]
    ServerReady(ServerReady),
    #[prost(message, tag = "2")]
    SendGoal(SendGoal),
    #[prost(message, tag = "3")]
    GoalStatus(GoalStatus),
}

/// Sent by the server as soon as a client connects
#[derive(Clone, PartialEq, prost::Message)]
pub struct ServerReady {
    #[prost(string, tag = "1")]
    pub service: String,
}

/// Goal submission
#[derive(Clone, PartialEq, prost::Message)]
pub struct SendGoal {
    #[prost(string, tag = "1")]
    pub goal_id: String,
    #[prost(string, tag = "2")]
    pub frame_id: String,
    #[prost(double, tag = "3")]
    pub x: f64,
    #[prost(double, tag = "4")]
    pub y: f64,
    #[prost(double, tag = "5")]
    pub qx: f64,
    #[prost(double, tag = "6")]
    pub qy: f64,
    #[prost(double, tag = "7")]
    pub qz: f64,
    #[prost(double, tag = "8")]
    pub qw: f64,
    #[prost(double, tag = "9")]
    pub stamp: f64,
}

/// Status transition for one goal
#[derive(Clone, PartialEq, prost::Message)]
pub struct GoalStatus {
    #[prost(string, tag = "1")]
    pub goal_id: String,
    /// [`GoalState`] wire value
    #[prost(int32, tag = "2")]
    pub state: i32,
}

impl ActionMessage {
    pub fn server_ready(service: &str) -> Self {
        Self {
            payload: Some(Payload::ServerReady(ServerReady {
                service: service.to_string(),
            })),
        }
    }

    pub fn send_goal(goal_id: &str, goal: &NavigationGoal) -> Self {
        Self {
            payload: Some(Payload::SendGoal(SendGoal {
                goal_id: goal_id.to_string(),
                frame_id: goal.frame_id.clone(),
                x: goal.x,
                y: goal.y,
                qx: goal.orientation.x,
                qy: goal.orientation.y,
                qz: goal.orientation.z,
                qw: goal.orientation.w,
                stamp: goal.stamp.as_secs(),
            })),
        }
    }

    pub fn goal_status(goal_id: &str, state: GoalState) -> Self {
        Self {
            payload: Some(Payload::GoalStatus(GoalStatus {
                goal_id: goal_id.to_string(),
                state: state.to_wire(),
            })),
        }
    }
}

impl SendGoal {
    pub fn to_goal(&self) -> NavigationGoal {
        NavigationGoal {
            frame_id: self.frame_id.clone(),
            stamp: Time(self.stamp),
            x: self.x,
            y: self.y,
            orientation: Quaternion::new(self.qx, self.qy, self.qz, self.qw),
        }
    }
}

/// Write one length-prefixed frame and flush.
pub fn write_frame<W: Write>(writer: &mut W, msg: &ActionMessage) -> Result<()> {
    let encoded = msg.encode_to_vec();
    if encoded.len() > MAX_FRAME_SIZE {
        return Err(NavError::Protocol(format!(
            "Message too large: {} bytes",
            encoded.len()
        )));
    }
    let len = encoded.len() as u32;

    // Write length prefix (big-endian)
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(&encoded)?;
    writer.flush()?;
    Ok(())
}

/// Incremental frame decoder for sockets with a read timeout.
///
/// Partial frames survive a timed-out read and are completed on the next
/// call, unlike `read_exact`.
#[derive(Debug, Default)]
pub struct FrameReader {
    buffer: Vec<u8>,
}

/// Chunk size per socket read
const READ_CHUNK: usize = 4096;

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop any partially received frame (after a reconnect).
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` when the read timed out before a full frame was
    /// available, and an `UnexpectedEof` error when the peer closed.
    pub fn poll<R: Read>(&mut self, reader: &mut R) -> Result<Option<ActionMessage>> {
        loop {
            if let Some(msg) = self.take_frame()? {
                return Ok(Some(msg));
            }

            let mut chunk = [0u8; READ_CHUNK];
            match reader.read(&mut chunk) {
                Ok(0) => {
                    return Err(NavError::Connection(std::io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "peer closed connection",
                    )));
                }
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == ErrorKind::TimedOut => return Ok(None),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(NavError::Connection(e)),
            }
        }
    }

    fn take_frame(&mut self) -> Result<Option<ActionMessage>> {
        if self.buffer.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([
            self.buffer[0],
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
        ]) as usize;

        // Sanity check on length
        if len > MAX_FRAME_SIZE {
            self.buffer.clear();
            return Err(NavError::Protocol(format!(
                "Message too large: {} bytes",
                len
            )));
        }
        if self.buffer.len() < 4 + len {
            return Ok(None);
        }

        let msg = ActionMessage::decode(&self.buffer[4..4 + len]);
        self.buffer.drain(..4 + len);
        Ok(Some(msg?))
    }
}
