//! Fixed-offset frame broadcaster.

use std::sync::Arc;

use super::TransformRegistry;
use crate::clock::Clock;
use crate::config::TransformConfig;
use crate::geometry::{Quaternion, Transform, TransformStamped, Vector3};

/// Publishes one rigidly-offset frame every tick.
pub struct TransformPublisher {
    registry: Arc<TransformRegistry>,
    clock: Arc<dyn Clock>,
    parent_frame: String,
    child_frame: String,
    offset: Transform,
}

impl TransformPublisher {
    pub fn new(config: &TransformConfig, registry: Arc<TransformRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self {
            registry,
            clock,
            parent_frame: config.parent_frame.clone(),
            child_frame: config.child_frame.clone(),
            offset: Transform::new(
                Vector3::new(config.x, config.y, config.z),
                Quaternion::IDENTITY,
            ),
        }
    }

    /// Stamp the offset with the current time and write it to the registry.
    ///
    /// Returns the sample that was written.
    pub fn publish_once(&self) -> TransformStamped {
        let sample = TransformStamped::new(
            self.parent_frame.as_str(),
            self.child_frame.as_str(),
            self.clock.now(),
            self.offset,
        );
        tracing::info!("Broadcasting {} -> {}", sample.frame_id, sample.child_frame_id);

        // Config validation already rejects bad frame pairs
        if let Err(e) = self.registry.set_transform(sample.clone(), "transform_publisher") {
            tracing::error!("Registry rejected published transform: {}", e);
        }
        sample
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::geometry::Time;
    use approx::assert_relative_eq;
    use std::time::Duration;

    #[test]
    fn test_publish_writes_fixed_offset() {
        let clock = ManualClock::shared(50.0);
        let registry = Arc::new(TransformRegistry::default());
        let publisher =
            TransformPublisher::new(&TransformConfig::default(), Arc::clone(&registry), clock.clone());

        let sample = publisher.publish_once();
        assert_eq!(sample.frame_id, "explorer_tf/camera_rgb_optical_frame");
        assert_eq!(sample.child_frame_id, "my_frame");
        assert_eq!(sample.stamp, Time(50.0));
        assert_relative_eq!(sample.transform.translation.x, 0.5);
        assert_relative_eq!(sample.transform.translation.y, 0.5);
        assert_relative_eq!(sample.transform.translation.z, 0.2);
        assert_eq!(sample.transform.rotation, Quaternion::IDENTITY);

        let stored = registry
            .lookup_transform("explorer_tf/camera_rgb_optical_frame", "my_frame", Time::ZERO)
            .unwrap();
        assert_eq!(stored.transform, sample.transform);
    }

    #[test]
    fn test_publish_restamps_every_call() {
        let clock = ManualClock::shared(50.0);
        let registry = Arc::new(TransformRegistry::default());
        let publisher =
            TransformPublisher::new(&TransformConfig::default(), registry, clock.clone());

        let first = publisher.publish_once();
        clock.advance(Duration::from_millis(100));
        let second = publisher.publish_once();

        assert!(second.stamp.as_secs() > first.stamp.as_secs());
        assert_eq!(first.transform, second.transform);
    }
}
