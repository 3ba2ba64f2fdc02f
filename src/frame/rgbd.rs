//! Depth-image binding for RGB-D input.
//!
//! RGB-D frames reuse the stereo representation: a measured depth `d`
//! yields a virtual right-image column `u - bf / d`, so downstream
//! matching code never distinguishes the two sensor types.

use image::{ImageBuffer, Luma};

use crate::features::KeyPoint;
use crate::frame::stereo::StereoDepth;

/// Metric depth image, row-major, units matching `bf`.
pub type DepthImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Read depth at each raw keypoint pixel and synthesize the virtual
/// right-image coordinate from the undistorted column. Invalid depth
/// (<= 0) leaves the keypoint unmatched.
pub fn bind_depth(
    raw: &[KeyPoint],
    undistorted: &[KeyPoint],
    depth_image: &DepthImage,
    bf: f32,
) -> StereoDepth {
    let mut out = StereoDepth::unmatched(raw.len());

    for (i, (kp, kp_u)) in raw.iter().zip(undistorted.iter()).enumerate() {
        let u = kp.x as u32;
        let v = kp.y as u32;
        if u >= depth_image.width() || v >= depth_image.height() {
            continue;
        }

        let d = depth_image.get_pixel(u, v).0[0];
        if d > 0.0 {
            out.depth[i] = d;
            out.right_u[i] = kp_u.x - bf / d;
        }
    }

    out
}
