//! Transform lookup errors

use thiserror::Error;

/// Errors from [`TransformRegistry`](super::TransformRegistry).
///
/// All of these are recoverable from the control loop's point of view: the
/// frame graph may simply not be populated yet.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TfError {
    /// Frame is not present in the graph
    #[error("frame \"{0}\" does not exist")]
    LookupFailure(String),

    /// Both frames exist but share no common ancestor
    #[error(
        "could not find a connection between \"{target_frame}\" and \"{source_frame}\" because they are not part of the same tree"
    )]
    ConnectivityFailure {
        target_frame: String,
        source_frame: String,
    },

    /// Requested time lies outside an edge's buffered history
    #[error(
        "lookup for \"{frame}\" at {requested:.3} would require extrapolation (data from {earliest:.3} to {latest:.3})"
    )]
    ExtrapolationFailure {
        frame: String,
        requested: f64,
        earliest: f64,
        latest: f64,
    },

    /// Rejected on insert
    #[error("invalid transform: {0}")]
    InvalidTransform(String),
}
