//! Feature primitives shared across the front-end: keypoints, binary
//! descriptors, pyramid scale tables and the extractor interface.

use std::sync::Arc;

use image::GrayImage;

/// Size of a binary feature descriptor in bytes (256 bits).
pub const DESCRIPTOR_SIZE: usize = 32;

/// A detected keypoint in image coordinates.
///
/// Coordinates are always expressed at pyramid level 0; `octave` records
/// the level the point was detected at.
#[derive(Debug, Clone, Copy)]
pub struct KeyPoint {
    /// X coordinate (column) in pixels.
    pub x: f32,
    /// Y coordinate (row) in pixels.
    pub y: f32,
    /// Pyramid level the point was detected at.
    pub octave: usize,
    /// Detector response (higher = stronger corner).
    pub response: f32,
    /// Orientation in radians.
    pub angle: f32,
}

/// A 256-bit binary descriptor compared by Hamming distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor(pub [u8; DESCRIPTOR_SIZE]);

impl Descriptor {
    /// Hamming distance to another descriptor (popcount of the XOR).
    pub fn hamming(&self, other: &Descriptor) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

/// Keypoints and descriptors produced by one extraction pass.
///
/// The two vectors are parallel: `descriptors[i]` belongs to
/// `keypoints[i]`.
#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    pub keypoints: Vec<KeyPoint>,
    pub descriptors: Vec<Descriptor>,
}

impl FeatureSet {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

/// Per-level scale bookkeeping for a multi-resolution image pyramid.
///
/// Level 0 is the full-resolution image; level `i` is scaled by
/// `scale_factor^i`. Frames share one table by reference.
#[derive(Debug)]
pub struct ScalePyramid {
    /// Number of pyramid levels.
    pub levels: usize,
    /// Scale ratio between consecutive levels (> 1).
    pub scale_factor: f32,
    /// Natural logarithm of `scale_factor`, used for scale prediction.
    pub log_scale_factor: f32,
    /// `scale_factor^i` per level; `scale_factors[0] == 1`.
    pub scale_factors: Vec<f32>,
    pub inv_scale_factors: Vec<f32>,
    /// Measurement variance per level, `scale_factors[i]^2`.
    pub level_sigma2: Vec<f32>,
    pub inv_level_sigma2: Vec<f32>,
}

impl ScalePyramid {
    pub fn new(levels: usize, scale_factor: f32) -> Self {
        debug_assert!(levels > 0);
        debug_assert!(scale_factor >= 1.0);

        let mut scale_factors = Vec::with_capacity(levels);
        scale_factors.push(1.0f32);
        for i in 1..levels {
            scale_factors.push(scale_factors[i - 1] * scale_factor);
        }
        let inv_scale_factors: Vec<f32> = scale_factors.iter().map(|s| 1.0 / s).collect();
        let level_sigma2: Vec<f32> = scale_factors.iter().map(|s| s * s).collect();
        let inv_level_sigma2: Vec<f32> = level_sigma2.iter().map(|s| 1.0 / s).collect();

        Self {
            levels,
            scale_factor,
            log_scale_factor: scale_factor.ln(),
            scale_factors,
            inv_scale_factors,
            level_sigma2,
            inv_level_sigma2,
        }
    }
}

/// Interface to the feature extraction collaborator.
///
/// The extractor owns the pyramid buffers it built during the last
/// `extract` call; `image_pyramid` exposes them as an immutable snapshot
/// so the stereo matcher can run its SAD refinement on the same data.
pub trait FeatureExtractor: Send {
    /// Detect keypoints and compute descriptors for a grayscale image.
    fn extract(&mut self, image: &GrayImage) -> FeatureSet;

    /// Scale table describing the extractor's pyramid.
    fn scale_pyramid(&self) -> Arc<ScalePyramid>;

    /// Pyramid buffers of the last extracted image, one per level.
    /// Only valid after `extract` has returned.
    fn image_pyramid(&self) -> &[GrayImage];
}
