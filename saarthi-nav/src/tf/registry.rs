//! Time-indexed frame graph.
//!
//! Every frame has at most one parent. Each parent/child edge keeps a short,
//! stamp-ordered history of samples so lookups can interpolate between them.
//! Lookups walk both frames up to their common ancestor and compose the edges
//! along the way.
//!
//! ```text
//!            map
//!             │  (dynamic, from localization / simulation)
//!      explorer_tf/base_link
//!             │  (static sensor mount)
//!  explorer_tf/camera_rgb_optical_frame
//!             │  (published every tick)
//!          my_frame
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::time::Duration;

use super::TfError;
use crate::geometry::{Time, Transform, TransformStamped};

/// How much history each dynamic edge keeps, relative to its newest sample.
pub const DEFAULT_CACHE_DURATION: Duration = Duration::from_secs(10);

/// Guards against cycles introduced by inconsistent publishers.
const MAX_GRAPH_DEPTH: usize = 1000;

/// Samples closer than this are treated as the same instant.
const TIME_EPSILON: f64 = 1e-9;

/// One parent/child edge.
#[derive(Debug)]
struct Edge {
    parent: String,
    is_static: bool,
    authority: String,
    /// Ordered by stamp, oldest first
    history: VecDeque<TransformStamped>,
}

impl Edge {
    fn new(parent: &str, is_static: bool, authority: &str) -> Self {
        Self {
            parent: parent.to_string(),
            is_static,
            authority: authority.to_string(),
            history: VecDeque::new(),
        }
    }

    fn insert(&mut self, sample: TransformStamped, cache_duration: Duration) {
        if self.is_static {
            self.history.clear();
            self.history.push_back(sample);
            return;
        }

        // Common case: samples arrive in order
        let stamp = sample.stamp.as_secs();
        let pos = self
            .history
            .iter()
            .rposition(|s| s.stamp.as_secs() <= stamp + TIME_EPSILON);
        match pos {
            Some(i) if (self.history[i].stamp.as_secs() - stamp).abs() < TIME_EPSILON => {
                self.history[i] = sample;
            }
            Some(i) => self.history.insert(i + 1, sample),
            None => self.history.push_front(sample),
        }

        if let Some(newest) = self.history.back().map(|s| s.stamp.as_secs()) {
            let cutoff = newest - cache_duration.as_secs_f64();
            while self
                .history
                .front()
                .is_some_and(|s| s.stamp.as_secs() < cutoff)
            {
                self.history.pop_front();
            }
        }
    }

    /// Newest sample stamp, `None` for static edges.
    fn newest_stamp(&self) -> Option<Time> {
        if self.is_static {
            return None;
        }
        self.history.back().map(|s| s.stamp)
    }

    /// Transform of this edge at `time`.
    fn sample_at(&self, child: &str, time: Time) -> Result<Transform, TfError> {
        let (oldest, newest) = match (self.history.front(), self.history.back()) {
            (Some(o), Some(n)) => (o, n),
            _ => return Err(TfError::LookupFailure(child.to_string())),
        };

        if self.is_static || time.is_zero() {
            return Ok(newest.transform);
        }

        let t = time.as_secs();
        let extrapolation = || TfError::ExtrapolationFailure {
            frame: child.to_string(),
            requested: t,
            earliest: oldest.stamp.as_secs(),
            latest: newest.stamp.as_secs(),
        };

        if t < oldest.stamp.as_secs() - TIME_EPSILON || t > newest.stamp.as_secs() + TIME_EPSILON {
            return Err(extrapolation());
        }

        // Exact hit (covers the single-sample case)
        if let Some(s) = self
            .history
            .iter()
            .find(|s| (s.stamp.as_secs() - t).abs() < TIME_EPSILON)
        {
            return Ok(s.transform);
        }

        let upper = self
            .history
            .iter()
            .position(|s| s.stamp.as_secs() > t)
            .ok_or_else(extrapolation)?;
        if upper == 0 {
            return Err(extrapolation());
        }
        let a = &self.history[upper - 1];
        let b = &self.history[upper];
        let span = b.stamp.as_secs() - a.stamp.as_secs();
        let ratio = (t - a.stamp.as_secs()) / span;
        Ok(a.transform.interpolate(&b.transform, ratio))
    }
}

/// Thread-safe transform store shared by publishers and observers.
#[derive(Debug)]
pub struct TransformRegistry {
    /// Keyed by child frame id
    edges: RwLock<HashMap<String, Edge>>,
    cache_duration: Duration,
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_DURATION)
    }
}

impl TransformRegistry {
    pub fn new(cache_duration: Duration) -> Self {
        Self {
            edges: RwLock::new(HashMap::new()),
            cache_duration,
        }
    }

    /// Insert a dynamic sample.
    ///
    /// `authority` names the publisher and is kept for diagnostics.
    pub fn set_transform(&self, sample: TransformStamped, authority: &str) -> Result<(), TfError> {
        self.insert(sample, authority, false)
    }

    /// Insert a sample that holds for all times.
    pub fn set_static_transform(
        &self,
        sample: TransformStamped,
        authority: &str,
    ) -> Result<(), TfError> {
        self.insert(sample, authority, true)
    }

    fn insert(
        &self,
        mut sample: TransformStamped,
        authority: &str,
        is_static: bool,
    ) -> Result<(), TfError> {
        sample.frame_id = strip_slash(&sample.frame_id).to_string();
        sample.child_frame_id = strip_slash(&sample.child_frame_id).to_string();
        validate(&sample, authority)?;
        sample.transform.rotation = sample.transform.rotation.normalize();

        let mut edges = self.edges.write().unwrap_or_else(|e| e.into_inner());
        let child = sample.child_frame_id.clone();
        let edge = edges
            .entry(child.clone())
            .or_insert_with(|| Edge::new(&sample.frame_id, is_static, authority));

        if edge.parent != sample.frame_id || edge.is_static != is_static {
            tracing::debug!(
                "Frame {} re-parented from {} to {} by {}",
                child,
                edge.parent,
                sample.frame_id,
                authority
            );
            *edge = Edge::new(&sample.frame_id, is_static, authority);
        }
        edge.authority = authority.to_string();
        edge.insert(sample, self.cache_duration);
        Ok(())
    }

    /// Pose of `source_frame` expressed in `target_frame` at `time`.
    ///
    /// [`Time::ZERO`] resolves to the latest time every dynamic edge on the
    /// path has data for, and all edges are evaluated at that one time.
    pub fn lookup_transform(
        &self,
        target_frame: &str,
        source_frame: &str,
        time: Time,
    ) -> Result<TransformStamped, TfError> {
        let target = strip_slash(target_frame);
        let source = strip_slash(source_frame);
        let edges = self.edges.read().unwrap_or_else(|e| e.into_inner());

        for frame in [target, source] {
            if !frame_exists(&edges, frame) {
                return Err(TfError::LookupFailure(frame.to_string()));
            }
        }

        if target == source {
            return Ok(TransformStamped::new(target, source, time, Transform::IDENTITY));
        }

        let source_path = path_to_root(&edges, source);
        let target_path = path_to_root(&edges, target);
        let Some((source_depth, target_depth)) = common_ancestor(&source_path, &target_path) else {
            return Err(TfError::ConnectivityFailure {
                target_frame: target.to_string(),
                source_frame: source.to_string(),
            });
        };
        let source_path = &source_path[..source_depth];
        let target_path = &target_path[..target_depth];

        let time = if time.is_zero() {
            latest_common_time(&edges, [source_path, target_path])
        } else {
            time
        };

        let source_in_ancestor = compose_up(&edges, source_path, time)?;
        let target_in_ancestor = compose_up(&edges, target_path, time)?;
        Ok(TransformStamped::new(
            target,
            source,
            time,
            target_in_ancestor.inverse().compose(&source_in_ancestor),
        ))
    }

    pub fn can_transform(&self, target_frame: &str, source_frame: &str, time: Time) -> bool {
        self.lookup_transform(target_frame, source_frame, time)
            .is_ok()
    }

    /// All known frame ids, sorted.
    pub fn frames(&self) -> Vec<String> {
        let edges = self.edges.read().unwrap_or_else(|e| e.into_inner());
        let mut frames: Vec<String> = edges
            .iter()
            .flat_map(|(child, edge)| [child.clone(), edge.parent.clone()])
            .collect();
        frames.sort();
        frames.dedup();
        frames
    }

    /// Parent of `frame`, if it has one.
    pub fn parent_of(&self, frame: &str) -> Option<String> {
        let edges = self.edges.read().unwrap_or_else(|e| e.into_inner());
        edges.get(strip_slash(frame)).map(|e| e.parent.clone())
    }

    /// Publisher that last wrote the edge ending at `frame`.
    pub fn authority_of(&self, frame: &str) -> Option<String> {
        let edges = self.edges.read().unwrap_or_else(|e| e.into_inner());
        edges.get(strip_slash(frame)).map(|e| e.authority.clone())
    }
}

/// `frame` followed by each of its ancestors up to the root.
fn path_to_root<'a>(edges: &'a HashMap<String, Edge>, frame: &'a str) -> Vec<&'a str> {
    let mut path = Vec::new();
    let mut current = frame;
    for _ in 0..MAX_GRAPH_DEPTH {
        path.push(current);
        match edges.get(current) {
            Some(edge) => current = edge.parent.as_str(),
            None => break,
        }
    }
    path
}

/// Indices of the first shared frame in each path.
fn common_ancestor(source_path: &[&str], target_path: &[&str]) -> Option<(usize, usize)> {
    target_path.iter().enumerate().find_map(|(ti, frame)| {
        source_path
            .iter()
            .position(|f| f == frame)
            .map(|si| (si, ti))
    })
}

/// Oldest of the newest stamps over the dynamic edges owned by the frames
/// in `paths`.
///
/// [`Time::ZERO`] if every edge is static.
fn latest_common_time(edges: &HashMap<String, Edge>, paths: [&[&str]; 2]) -> Time {
    paths
        .into_iter()
        .flatten()
        .filter_map(|frame| edges.get(*frame))
        .filter_map(Edge::newest_stamp)
        .min_by(|a, b| a.as_secs().total_cmp(&b.as_secs()))
        .unwrap_or(Time::ZERO)
}

/// Pose of `frames[0]` in the parent of the last frame.
fn compose_up(edges: &HashMap<String, Edge>, frames: &[&str], time: Time) -> Result<Transform, TfError> {
    let mut acc = Transform::IDENTITY;
    for frame in frames {
        let edge = edges
            .get(*frame)
            .ok_or_else(|| TfError::LookupFailure(frame.to_string()))?;
        acc = edge.sample_at(frame, time)?.compose(&acc);
    }
    Ok(acc)
}

fn strip_slash(frame: &str) -> &str {
    frame.strip_prefix('/').unwrap_or(frame)
}

fn frame_exists(edges: &HashMap<String, Edge>, frame: &str) -> bool {
    edges.contains_key(frame) || edges.values().any(|e| e.parent == frame)
}

fn validate(sample: &TransformStamped, authority: &str) -> Result<(), TfError> {
    if sample.frame_id.is_empty() || sample.child_frame_id.is_empty() {
        return Err(TfError::InvalidTransform(format!(
            "empty frame id from {}",
            authority
        )));
    }
    if sample.frame_id == sample.child_frame_id {
        return Err(TfError::InvalidTransform(format!(
            "frame \"{}\" cannot be its own parent (from {})",
            sample.child_frame_id, authority
        )));
    }
    if !sample.transform.is_finite() || !sample.stamp.as_secs().is_finite() {
        return Err(TfError::InvalidTransform(format!(
            "non-finite values for \"{}\" from {}",
            sample.child_frame_id, authority
        )));
    }
    if sample.transform.rotation.norm() < f64::EPSILON {
        return Err(TfError::InvalidTransform(format!(
            "zero rotation quaternion for \"{}\" from {}",
            sample.child_frame_id, authority
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Quaternion, Vector3};
    use approx::assert_relative_eq;

    fn sample(parent: &str, child: &str, stamp: f64, x: f64, y: f64) -> TransformStamped {
        TransformStamped::new(
            parent,
            child,
            Time(stamp),
            Transform::new(Vector3::new(x, y, 0.0), Quaternion::IDENTITY),
        )
    }

    #[test]
    fn test_unknown_frame() {
        let registry = TransformRegistry::default();
        let err = registry
            .lookup_transform("map", "my_frame", Time::ZERO)
            .unwrap_err();
        assert_eq!(err, TfError::LookupFailure("map".to_string()));
    }

    #[test]
    fn test_direct_edge_latest() {
        let registry = TransformRegistry::default();
        registry
            .set_transform(sample("map", "base", 1.0, 1.0, 0.0), "test")
            .unwrap();
        registry
            .set_transform(sample("map", "base", 2.0, 3.0, 0.0), "test")
            .unwrap();

        let tf = registry.lookup_transform("map", "base", Time::ZERO).unwrap();
        assert_relative_eq!(tf.transform.translation.x, 3.0);
        assert_eq!(tf.stamp, Time(2.0));
        assert_eq!(tf.frame_id, "map");
        assert_eq!(tf.child_frame_id, "base");
    }

    #[test]
    fn test_latest_time_is_common_to_the_chain() {
        let registry = TransformRegistry::default();
        // Robot moving along x, newest sample at 11.0
        registry
            .set_transform(sample("map", "base", 10.0, 0.0, 0.0), "test")
            .unwrap();
        registry
            .set_transform(sample("map", "base", 11.0, 2.0, 0.0), "test")
            .unwrap();
        // Frame mounted on the robot, newest sample at 10.5
        registry
            .set_transform(sample("base", "my_frame", 10.0, 0.5, 0.0), "test")
            .unwrap();
        registry
            .set_transform(sample("base", "my_frame", 10.5, 0.5, 0.0), "test")
            .unwrap();

        let tf = registry
            .lookup_transform("map", "my_frame", Time::ZERO)
            .unwrap();
        assert_eq!(tf.stamp, Time(10.5));
        // Base evaluated at 10.5 (x = 1.0), not at its newest sample
        assert_relative_eq!(tf.transform.translation.x, 1.5, epsilon = 1e-9);
    }

    #[test]
    fn test_latest_time_without_overlap_fails() {
        let registry = TransformRegistry::default();
        registry
            .set_transform(sample("map", "base", 5.0, 0.0, 0.0), "test")
            .unwrap();
        registry
            .set_transform(sample("base", "my_frame", 8.0, 0.5, 0.0), "test")
            .unwrap();

        let err = registry
            .lookup_transform("map", "my_frame", Time::ZERO)
            .unwrap_err();
        assert!(matches!(err, TfError::ExtrapolationFailure { .. }));
    }

    #[test]
    fn test_latest_time_through_static_edge() {
        let registry = TransformRegistry::default();
        registry
            .set_static_transform(sample("map", "camera", 1.0, 1.0, 2.0), "test")
            .unwrap();
        registry
            .set_transform(sample("camera", "my_frame", 42.0, 0.5, 0.5), "test")
            .unwrap();

        let tf = registry
            .lookup_transform("map", "my_frame", Time::ZERO)
            .unwrap();
        assert_eq!(tf.stamp, Time(42.0));
        assert_relative_eq!(tf.transform.translation.x, 1.5);
        assert_relative_eq!(tf.transform.translation.y, 2.5);
    }

    #[test]
    fn test_inverse_direction() {
        let registry = TransformRegistry::default();
        registry
            .set_transform(sample("map", "base", 1.0, 1.0, 2.0), "test")
            .unwrap();

        let tf = registry.lookup_transform("base", "map", Time::ZERO).unwrap();
        assert_relative_eq!(tf.transform.translation.x, -1.0);
        assert_relative_eq!(tf.transform.translation.y, -2.0);
    }

    #[test]
    fn test_interpolation_between_samples() {
        let registry = TransformRegistry::default();
        registry
            .set_transform(sample("map", "base", 10.0, 0.0, 0.0), "test")
            .unwrap();
        registry
            .set_transform(sample("map", "base", 12.0, 2.0, 4.0), "test")
            .unwrap();

        let tf = registry.lookup_transform("map", "base", Time(11.5)).unwrap();
        assert_relative_eq!(tf.transform.translation.x, 1.5, epsilon = 1e-9);
        assert_relative_eq!(tf.transform.translation.y, 3.0, epsilon = 1e-9);
        assert_eq!(tf.stamp, Time(11.5));
    }

    #[test]
    fn test_extrapolation_rejected() {
        let registry = TransformRegistry::default();
        registry
            .set_transform(sample("map", "base", 10.0, 0.0, 0.0), "test")
            .unwrap();
        registry
            .set_transform(sample("map", "base", 11.0, 1.0, 0.0), "test")
            .unwrap();

        let err = registry
            .lookup_transform("map", "base", Time(12.0))
            .unwrap_err();
        assert!(matches!(err, TfError::ExtrapolationFailure { .. }));
    }

    #[test]
    fn test_out_of_order_insert() {
        let registry = TransformRegistry::default();
        registry
            .set_transform(sample("map", "base", 12.0, 2.0, 0.0), "test")
            .unwrap();
        registry
            .set_transform(sample("map", "base", 10.0, 0.0, 0.0), "test")
            .unwrap();

        let latest = registry.lookup_transform("map", "base", Time::ZERO).unwrap();
        assert_relative_eq!(latest.transform.translation.x, 2.0);
        let mid = registry.lookup_transform("map", "base", Time(11.0)).unwrap();
        assert_relative_eq!(mid.transform.translation.x, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_cache_prunes_old_samples() {
        let registry = TransformRegistry::new(Duration::from_secs(5));
        registry
            .set_transform(sample("map", "base", 1.0, 0.0, 0.0), "test")
            .unwrap();
        registry
            .set_transform(sample("map", "base", 20.0, 1.0, 0.0), "test")
            .unwrap();

        let err = registry
            .lookup_transform("map", "base", Time(1.0))
            .unwrap_err();
        assert!(matches!(err, TfError::ExtrapolationFailure { .. }));
    }

    #[test]
    fn test_static_edge_valid_for_all_times() {
        let registry = TransformRegistry::default();
        registry
            .set_static_transform(sample("base", "camera", 1.0, 0.1, 0.0), "test")
            .unwrap();

        let tf = registry
            .lookup_transform("base", "camera", Time(500.0))
            .unwrap();
        assert_relative_eq!(tf.transform.translation.x, 0.1);
    }

    #[test]
    fn test_sibling_frames_share_ancestor() {
        let registry = TransformRegistry::default();
        registry
            .set_transform(sample("map", "a", 1.0, 1.0, 0.0), "test")
            .unwrap();
        registry
            .set_transform(sample("map", "b", 1.0, 0.0, 1.0), "test")
            .unwrap();

        // Pose of b in a
        let tf = registry.lookup_transform("a", "b", Time::ZERO).unwrap();
        assert_relative_eq!(tf.transform.translation.x, -1.0);
        assert_relative_eq!(tf.transform.translation.y, 1.0);
    }

    #[test]
    fn test_disconnected_trees() {
        let registry = TransformRegistry::default();
        registry
            .set_transform(sample("map", "base", 1.0, 0.0, 0.0), "test")
            .unwrap();
        registry
            .set_transform(sample("camera", "my_frame", 1.0, 0.5, 0.5), "test")
            .unwrap();

        let err = registry
            .lookup_transform("map", "my_frame", Time::ZERO)
            .unwrap_err();
        assert_eq!(
            err,
            TfError::ConnectivityFailure {
                target_frame: "map".to_string(),
                source_frame: "my_frame".to_string(),
            }
        );
    }

    #[test]
    fn test_invalid_samples_rejected() {
        let registry = TransformRegistry::default();
        assert!(
            registry
                .set_transform(sample("map", "map", 1.0, 0.0, 0.0), "test")
                .is_err()
        );
        assert!(
            registry
                .set_transform(sample("", "base", 1.0, 0.0, 0.0), "test")
                .is_err()
        );
        assert!(
            registry
                .set_transform(sample("map", "base", 1.0, f64::NAN, 0.0), "test")
                .is_err()
        );
        assert!(registry.frames().is_empty());
    }

    #[test]
    fn test_leading_slash_ignored() {
        let registry = TransformRegistry::default();
        registry
            .set_transform(sample("/map", "/base", 1.0, 1.0, 0.0), "test")
            .unwrap();
        assert!(registry.can_transform("map", "base", Time::ZERO));
        assert_eq!(registry.parent_of("/base").as_deref(), Some("map"));
        assert_eq!(registry.frames(), vec!["base".to_string(), "map".to_string()]);
    }

    #[test]
    fn test_reparenting_replaces_edge() {
        let registry = TransformRegistry::default();
        registry
            .set_transform(sample("odom", "base", 1.0, 1.0, 0.0), "a")
            .unwrap();
        registry
            .set_transform(sample("map", "base", 2.0, 2.0, 0.0), "b")
            .unwrap();
        assert_eq!(registry.parent_of("base").as_deref(), Some("map"));
        assert_eq!(registry.authority_of("base").as_deref(), Some("b"));
        assert!(!registry.can_transform("odom", "base", Time::ZERO));
    }
}
