//! Looks up the published frame in the map frame.

use std::sync::Arc;

use super::{TfError, TransformRegistry};
use crate::config::TransformConfig;
use crate::geometry::{Time, TransformStamped};

/// Outcome of one lookup.
#[derive(Clone, Debug, PartialEq)]
pub enum Observation {
    /// Pose of the observed frame in the target frame
    Position(TransformStamped),
    /// Frames not connected (yet); retried next tick
    Unavailable(TfError),
}

impl Observation {
    pub fn is_available(&self) -> bool {
        matches!(self, Observation::Position(_))
    }
}

/// Queries the registry for `source_frame` in `target_frame` at the latest time.
pub struct TransformObserver {
    registry: Arc<TransformRegistry>,
    target_frame: String,
    source_frame: String,
}

impl TransformObserver {
    pub fn new(config: &TransformConfig, registry: Arc<TransformRegistry>) -> Self {
        Self {
            registry,
            target_frame: config.target_frame.clone(),
            source_frame: config.child_frame.clone(),
        }
    }

    /// Look up once. Failures are logged as warnings and returned, never raised.
    pub fn observe_once(&self) -> Observation {
        match self
            .registry
            .lookup_transform(&self.target_frame, &self.source_frame, Time::ZERO)
        {
            Ok(tf) => {
                let t = tf.transform.translation;
                tracing::info!(
                    "Position in {} frame: [{:.4},{:.4},{:.4}]",
                    self.target_frame,
                    t.x,
                    t.y,
                    t.z
                );
                Observation::Position(tf)
            }
            Err(e) => {
                tracing::warn!("{}", e);
                Observation::Unavailable(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Quaternion, Transform, Vector3};
    use approx::assert_relative_eq;

    #[test]
    fn test_unavailable_before_chain_exists() {
        let registry = Arc::new(TransformRegistry::default());
        let observer = TransformObserver::new(&TransformConfig::default(), registry);
        let obs = observer.observe_once();
        assert!(!obs.is_available());
        assert!(matches!(obs, Observation::Unavailable(TfError::LookupFailure(_))));
    }

    #[test]
    fn test_position_through_chain() {
        let config = TransformConfig::default();
        let registry = Arc::new(TransformRegistry::default());
        registry
            .set_transform(
                TransformStamped::new(
                    "map",
                    config.parent_frame.as_str(),
                    Time(1.0),
                    Transform::new(Vector3::new(2.0, 1.0, 0.0), Quaternion::IDENTITY),
                ),
                "test",
            )
            .unwrap();
        registry
            .set_transform(
                TransformStamped::new(
                    config.parent_frame.as_str(),
                    "my_frame",
                    Time(1.0),
                    Transform::new(Vector3::new(0.5, 0.5, 0.2), Quaternion::IDENTITY),
                ),
                "test",
            )
            .unwrap();

        let observer = TransformObserver::new(&config, registry);
        match observer.observe_once() {
            Observation::Position(tf) => {
                assert_eq!(tf.frame_id, "map");
                assert_eq!(tf.child_frame_id, "my_frame");
                assert_relative_eq!(tf.transform.translation.x, 2.5);
                assert_relative_eq!(tf.transform.translation.y, 1.5);
                assert_relative_eq!(tf.transform.translation.z, 0.2);
            }
            other => panic!("expected position, got {:?}", other),
        }
    }
}
