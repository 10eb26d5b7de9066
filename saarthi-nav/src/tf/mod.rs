//! Transform frames: registry, publisher and observer.
//!
//! The registry is the process-wide store of named frames. The publisher and
//! observer never talk to each other directly; the publisher writes a sample
//! every tick and the observer independently looks it up relative to `map`.

mod error;
mod observer;
mod publisher;
mod registry;

pub use error::TfError;
pub use observer::{Observation, TransformObserver};
pub use publisher::TransformPublisher;
pub use registry::{DEFAULT_CACHE_DURATION, TransformRegistry};
