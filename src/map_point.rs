//! MapPoint - a 3D landmark tracked against incoming frames.
//!
//! The map store itself lives outside this crate; frames only need the
//! viewing geometry of a landmark plus a scratch area the frustum test
//! fills in for the matcher that runs afterwards.

use nalgebra::Vector3;

use crate::features::ScalePyramid;

/// A 3D landmark with the viewing-geometry invariants used by the
/// frustum test, and the tracking scratch it writes.
#[derive(Debug, Clone)]
pub struct MapPoint {
    /// 3D position in world frame.
    pub position: Vector3<f32>,

    /// Mean viewing direction (unit vector, world frame).
    pub normal: Vector3<f32>,

    /// Minimum distance at which this point can be reliably observed.
    pub min_distance: f32,

    /// Maximum distance at which this point can be reliably observed.
    pub max_distance: f32,

    // Scratch written by `Frame::is_in_frustum` and consumed by the
    // projection matcher; meaningless when `track_in_view` is false.
    pub track_in_view: bool,
    pub track_proj_x: f32,
    pub track_proj_xr: f32,
    pub track_proj_y: f32,
    pub track_scale_level: usize,
    pub track_view_cos: f32,
}

impl MapPoint {
    pub fn new(position: Vector3<f32>, normal: Vector3<f32>, min_distance: f32, max_distance: f32) -> Self {
        Self {
            position,
            normal,
            min_distance,
            max_distance,
            track_in_view: false,
            track_proj_x: 0.0,
            track_proj_xr: 0.0,
            track_proj_y: 0.0,
            track_scale_level: 0,
            track_view_cos: 0.0,
        }
    }

    /// Check if a viewing distance is within the valid range.
    pub fn is_in_distance_range(&self, distance: f32) -> bool {
        distance >= self.min_distance && distance <= self.max_distance
    }

    /// Predict the pyramid level a point at `distance` would be detected
    /// at, from the distance bound and the pyramid's scale ratio.
    pub fn predict_scale(&self, distance: f32, pyramid: &ScalePyramid) -> usize {
        let ratio = self.max_distance / distance;
        let level = (ratio.ln() / pyramid.log_scale_factor).ceil() as i32;
        level.clamp(0, pyramid.levels as i32 - 1) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn landmark(max_distance: f32) -> MapPoint {
        MapPoint::new(
            Vector3::new(0.0, 0.0, 5.0),
            Vector3::new(0.0, 0.0, 1.0),
            0.5,
            max_distance,
        )
    }

    #[test]
    fn distance_range() {
        let mp = landmark(10.0);
        assert!(mp.is_in_distance_range(1.0));
        assert!(mp.is_in_distance_range(10.0));
        assert!(!mp.is_in_distance_range(0.3));
        assert!(!mp.is_in_distance_range(15.0));
    }

    #[test]
    fn predicted_scale_grows_as_point_approaches() {
        let pyramid = ScalePyramid::new(8, 1.2);
        let mp = landmark(10.0);

        // At the far limit the point sits at level 0.
        assert_eq!(mp.predict_scale(10.0, &pyramid), 0);

        // Closer observation means a coarser detection level.
        let near = mp.predict_scale(8.0, &pyramid);
        let nearer = mp.predict_scale(6.0, &pyramid);
        assert!(near >= 1);
        assert!(nearer > near);

        // Clamped to the pyramid range no matter how close.
        assert_eq!(mp.predict_scale(1e-4, &pyramid), pyramid.levels - 1);
    }
}
