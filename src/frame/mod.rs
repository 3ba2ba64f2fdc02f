//! Frame-level processing: extraction orchestration, undistortion,
//! depth recovery, the spatial grid and pose-dependent queries.

pub mod grid;
pub mod rgbd;
pub mod stereo;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use image::GrayImage;
use nalgebra::Vector3;
use tracing::debug;

use crate::camera::CalibrationContext;
use crate::features::{Descriptor, FeatureExtractor, FeatureSet, KeyPoint, ScalePyramid};
use crate::geometry::CameraPose;
use crate::map_point::MapPoint;
use crate::vocabulary::{BowVector, FeatureVector, Vocabulary, BOW_LEVELS_UP};

pub use grid::{GridIndex, FRAME_GRID_COLS, FRAME_GRID_ROWS};
pub use rgbd::DepthImage;
pub use stereo::{StereoDepth, TH_HIGH, TH_LOW};

static NEXT_FRAME_ID: AtomicU64 = AtomicU64::new(0);

/// One processed input image (or image pair) with everything the
/// tracker needs: undistorted keypoints, descriptors, per-keypoint
/// depth, a spatial index, and pose bookkeeping.
///
/// A frame is immutable after its pose is set; the map-point
/// associations and outlier flags are the only fields the tracking
/// collaborator mutates afterwards.
pub struct Frame {
    /// Monotonically increasing frame identifier.
    pub id: u64,
    /// Capture timestamp in seconds.
    pub timestamp: f64,

    calib: Arc<CalibrationContext>,
    scales: Arc<ScalePyramid>,

    /// Raw (distorted) keypoints as detected.
    pub keypoints_raw: Vec<KeyPoint>,
    /// Undistorted keypoints; these drive matching and geometry.
    pub keypoints_undist: Vec<KeyPoint>,
    /// Right-image keypoints (empty for monocular and RGB-D input).
    pub keypoints_right: Vec<KeyPoint>,
    pub descriptors: Vec<Descriptor>,
    pub descriptors_right: Vec<Descriptor>,

    /// Matched right-image column per keypoint, -1 when unmatched.
    pub right_u: Vec<f32>,
    /// Metric depth per keypoint, -1 when unknown.
    pub depth: Vec<f32>,

    /// Map-point association per keypoint, populated by the tracker.
    pub map_points: Vec<Option<usize>>,
    /// Outlier flags maintained by pose optimization.
    pub outlier: Vec<bool>,

    pose: Option<CameraPose>,
    bow: Option<(BowVector, FeatureVector)>,
    grid: GridIndex,
}

impl Frame {
    /// Build a frame from a rectified stereo pair. Left and right
    /// extraction run on two threads and join before any downstream
    /// work; the extractors write disjoint outputs.
    pub fn stereo(
        left_image: &GrayImage,
        right_image: &GrayImage,
        timestamp: f64,
        extractor_left: &mut dyn FeatureExtractor,
        extractor_right: &mut dyn FeatureExtractor,
        calib: &Arc<CalibrationContext>,
    ) -> Frame {
        let scales = extractor_left.scale_pyramid();

        let (features, right_features) = thread::scope(|s| {
            let l = &mut *extractor_left;
            let r = &mut *extractor_right;
            let left_handle = s.spawn(move || l.extract(left_image));
            let right_handle = s.spawn(move || r.extract(right_image));
            (
                left_handle.join().expect("left extraction thread panicked"),
                right_handle.join().expect("right extraction thread panicked"),
            )
        });

        if features.is_empty() {
            return Self::finish(timestamp, calib, scales, features, Vec::new(), right_features, StereoDepth::unmatched(0));
        }

        let keypoints_undist = calib.camera.undistort_points(&features.keypoints);
        let depth = stereo::match_stereo(
            &features,
            &right_features,
            extractor_left.image_pyramid(),
            extractor_right.image_pyramid(),
            &scales,
            calib,
        );
        Self::finish(timestamp, calib, scales, features, keypoints_undist, right_features, depth)
    }

    /// Build a frame from an RGB-D pair; depth comes straight from the
    /// depth image and a virtual right coordinate keeps the stereo
    /// representation uniform.
    pub fn rgbd(
        gray_image: &GrayImage,
        depth_image: &DepthImage,
        timestamp: f64,
        extractor: &mut dyn FeatureExtractor,
        calib: &Arc<CalibrationContext>,
    ) -> Frame {
        let scales = extractor.scale_pyramid();
        let features = extractor.extract(gray_image);

        if features.is_empty() {
            return Self::finish(timestamp, calib, scales, features, Vec::new(), FeatureSet::default(), StereoDepth::unmatched(0));
        }

        let keypoints_undist = calib.camera.undistort_points(&features.keypoints);
        let depth = rgbd::bind_depth(&features.keypoints, &keypoints_undist, depth_image, calib.camera.bf);
        Self::finish(timestamp, calib, scales, features, keypoints_undist, FeatureSet::default(), depth)
    }

    /// Build a monocular frame: no depth source, every keypoint is
    /// unmatched.
    pub fn monocular(
        gray_image: &GrayImage,
        timestamp: f64,
        extractor: &mut dyn FeatureExtractor,
        calib: &Arc<CalibrationContext>,
    ) -> Frame {
        let scales = extractor.scale_pyramid();
        let features = extractor.extract(gray_image);

        let keypoints_undist = calib.camera.undistort_points(&features.keypoints);
        let n = features.len();
        Self::finish(timestamp, calib, scales, features, keypoints_undist, FeatureSet::default(), StereoDepth::unmatched(n))
    }

    fn finish(
        timestamp: f64,
        calib: &Arc<CalibrationContext>,
        scales: Arc<ScalePyramid>,
        features: FeatureSet,
        keypoints_undist: Vec<KeyPoint>,
        right_features: FeatureSet,
        depth: StereoDepth,
    ) -> Frame {
        let n = features.len();

        // Reserve half the mean cell occupancy per cell.
        let reserve = n / (2 * FRAME_GRID_COLS * FRAME_GRID_ROWS);
        let mut grid = GridIndex::new(calib, reserve);
        for (i, kp) in keypoints_undist.iter().enumerate() {
            grid.insert(i, kp.x, kp.y);
        }

        let id = NEXT_FRAME_ID.fetch_add(1, Ordering::Relaxed);
        let with_depth = depth.depth.iter().filter(|d| **d > 0.0).count();
        debug!("[Frame] id={} keypoints={} with_depth={}", id, n, with_depth);

        Frame {
            id,
            timestamp,
            calib: Arc::clone(calib),
            scales,
            keypoints_raw: features.keypoints,
            keypoints_undist,
            keypoints_right: right_features.keypoints,
            descriptors: features.descriptors,
            descriptors_right: right_features.descriptors,
            right_u: depth.right_u,
            depth: depth.depth,
            map_points: vec![None; n],
            outlier: vec![false; n],
            pose: None,
            bow: None,
            grid,
        }
    }

    /// Number of (left) keypoints.
    pub fn num_keypoints(&self) -> usize {
        self.keypoints_raw.len()
    }

    pub fn calibration(&self) -> &CalibrationContext {
        &self.calib
    }

    pub fn scale_pyramid(&self) -> &ScalePyramid {
        &self.scales
    }

    /// Set the world-to-camera pose; derived matrices are cached inside
    /// [`CameraPose`].
    pub fn set_pose(&mut self, pose: CameraPose) {
        self.pose = Some(pose);
    }

    pub fn pose(&self) -> Option<&CameraPose> {
        self.pose.as_ref()
    }

    /// Visibility test for a map point against this frame's pose, with
    /// the side effect of filling the point's tracking scratch when it
    /// passes. Returns false (and clears `track_in_view`) otherwise.
    pub fn is_in_frustum(&self, mp: &mut MapPoint, viewing_cos_limit: f32) -> bool {
        mp.track_in_view = false;

        let Some(pose) = &self.pose else {
            return false;
        };

        // Positive depth in front of the camera.
        let pc = pose.transform_to_camera(&mp.position);
        if pc.z <= 0.0 {
            return false;
        }

        // Projects inside the undistorted image.
        let uv = self.calib.camera.project(&pc);
        if !self.calib.bounds.contains(uv.x, uv.y) {
            return false;
        }

        // Distance within the point's scale-invariance band.
        let po = mp.position - pose.camera_center();
        let dist = po.norm();
        if !mp.is_in_distance_range(dist) {
            return false;
        }

        // Viewing direction close enough to the point's mean normal.
        let view_cos = po.dot(&mp.normal) / dist;
        if view_cos < viewing_cos_limit {
            return false;
        }

        let predicted_level = mp.predict_scale(dist, &self.scales);

        mp.track_in_view = true;
        mp.track_proj_x = uv.x;
        mp.track_proj_xr = uv.x - self.calib.camera.bf / pc.z;
        mp.track_proj_y = uv.y;
        mp.track_scale_level = predicted_level;
        mp.track_view_cos = view_cos;
        true
    }

    /// Indices of undistorted keypoints within the square window of
    /// half-size `r` around `(x, y)`, optionally restricted to a level
    /// range (negative bound = unbounded).
    pub fn features_in_area(&self, x: f32, y: f32, r: f32, min_level: i32, max_level: i32) -> Vec<usize> {
        self.grid.query(&self.keypoints_undist, x, y, r, min_level, max_level)
    }

    /// Compute the Bag-of-Words representation once; later calls are
    /// no-ops.
    pub fn compute_bow(&mut self, vocabulary: &dyn Vocabulary) {
        if self.bow.is_none() {
            self.bow = Some(vocabulary.transform(&self.descriptors, BOW_LEVELS_UP));
        }
    }

    pub fn bow(&self) -> Option<&(BowVector, FeatureVector)> {
        self.bow.as_ref()
    }

    /// Back-project keypoint `i` through its measured depth into world
    /// coordinates. `None` without depth or before the pose is set.
    pub fn unproject_stereo(&self, i: usize) -> Option<Vector3<f32>> {
        let z = self.depth[i];
        if z <= 0.0 {
            return None;
        }
        let pose = self.pose.as_ref()?;
        let kp = &self.keypoints_undist[i];
        let pc = self.calib.camera.backproject(kp.x, kp.y, z);
        Some(pose.transform_to_world(&pc))
    }

    /// Whether keypoint `i` has trusted (close-range) depth.
    pub fn is_close(&self, i: usize) -> bool {
        self.depth[i] > 0.0 && self.depth[i] < self.calib.camera.th_depth
    }
}
