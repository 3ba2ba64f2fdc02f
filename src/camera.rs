//! Pinhole camera model with Brown-Conrady distortion and the shared,
//! immutable calibration state derived from it.
//!
//! All arithmetic is single precision; callers guard divisions by
//! near-zero depth.

use nalgebra::{Matrix3, Vector2, Vector3};

use crate::error::FrontendError;
use crate::features::KeyPoint;
use crate::frame::grid::{FRAME_GRID_COLS, FRAME_GRID_ROWS};

/// Fixed-point iterations used to invert the distortion model.
const UNDISTORT_ITERATIONS: usize = 8;

/// Brown-Conrady (plumb-bob) distortion coefficients.
#[derive(Debug, Clone, Copy, Default)]
pub struct Distortion {
    pub k1: f32,
    pub k2: f32,
    pub p1: f32,
    pub p2: f32,
    pub k3: f32,
}

impl Distortion {
    /// A distortion-free lens.
    pub fn none() -> Self {
        Self::default()
    }

    /// Rectified input is flagged by a zero leading radial coefficient.
    pub fn is_zero(&self) -> bool {
        self.k1 == 0.0
    }
}

/// Pinhole intrinsics plus the stereo quantities derived from them.
#[derive(Debug, Clone)]
pub struct PinholeCamera {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
    pub inv_fx: f32,
    pub inv_fy: f32,
    pub dist: Distortion,
    /// Stereo baseline times horizontal focal length (0 for monocular).
    pub bf: f32,
    /// Depth separating close (trusted) from far stereo points.
    pub th_depth: f32,
}

impl PinholeCamera {
    pub fn new(fx: f32, fy: f32, cx: f32, cy: f32, dist: Distortion, bf: f32, th_depth: f32) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            inv_fx: 1.0 / fx,
            inv_fy: 1.0 / fy,
            dist,
            bf,
            th_depth,
        }
    }

    /// Intrinsics as a 3x3 matrix K.
    pub fn k_matrix(&self) -> Matrix3<f32> {
        Matrix3::new(
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    /// Project a camera-frame point to pixel coordinates. The caller
    /// guarantees `pc.z` is safely away from zero.
    pub fn project(&self, pc: &Vector3<f32>) -> Vector2<f32> {
        let inv_z = 1.0 / pc.z;
        Vector2::new(
            self.fx * pc.x * inv_z + self.cx,
            self.fy * pc.y * inv_z + self.cy,
        )
    }

    /// Back-project pixel `(u, v)` at depth `z` into the camera frame.
    pub fn backproject(&self, u: f32, v: f32, z: f32) -> Vector3<f32> {
        Vector3::new((u - self.cx) * z * self.inv_fx, (v - self.cy) * z * self.inv_fy, z)
    }

    /// Apply the forward distortion model to normalized coordinates.
    pub fn distort_normalized(&self, x: f32, y: f32) -> (f32, f32) {
        let d = &self.dist;
        let r2 = x * x + y * y;
        let radial = 1.0 + r2 * (d.k1 + r2 * (d.k2 + r2 * d.k3));
        let xd = x * radial + 2.0 * d.p1 * x * y + d.p2 * (r2 + 2.0 * x * x);
        let yd = y * radial + d.p1 * (r2 + 2.0 * y * y) + 2.0 * d.p2 * x * y;
        (xd, yd)
    }

    /// Undistort a single pixel coordinate by fixed-point iteration of
    /// the inverse distortion model.
    pub fn undistort_pixel(&self, u: f32, v: f32) -> (f32, f32) {
        let x0 = (u - self.cx) * self.inv_fx;
        let y0 = (v - self.cy) * self.inv_fy;

        let d = &self.dist;
        let mut x = x0;
        let mut y = y0;
        for _ in 0..UNDISTORT_ITERATIONS {
            let r2 = x * x + y * y;
            let icdist = 1.0 / (1.0 + r2 * (d.k1 + r2 * (d.k2 + r2 * d.k3)));
            let dx = 2.0 * d.p1 * x * y + d.p2 * (r2 + 2.0 * x * x);
            let dy = d.p1 * (r2 + 2.0 * y * y) + 2.0 * d.p2 * x * y;
            x = (x0 - dx) * icdist;
            y = (y0 - dy) * icdist;
        }

        (self.fx * x + self.cx, self.fy * y + self.cy)
    }

    /// Undistort a keypoint set, preserving every attribute except the
    /// coordinates. Rectified input is returned unchanged.
    pub fn undistort_points(&self, keypoints: &[KeyPoint]) -> Vec<KeyPoint> {
        if self.dist.is_zero() {
            return keypoints.to_vec();
        }

        keypoints
            .iter()
            .map(|kp| {
                let (x, y) = self.undistort_pixel(kp.x, kp.y);
                KeyPoint { x, y, ..*kp }
            })
            .collect()
    }

    /// Undistort the four image corners and take the axis-aligned
    /// extrema of the resulting quadrilateral.
    pub fn compute_image_bounds(&self, width: u32, height: u32) -> ImageBounds {
        if self.dist.is_zero() {
            return ImageBounds {
                min_x: 0.0,
                max_x: width as f32,
                min_y: 0.0,
                max_y: height as f32,
            };
        }

        let w = width as f32;
        let h = height as f32;
        let top_left = self.undistort_pixel(0.0, 0.0);
        let top_right = self.undistort_pixel(w, 0.0);
        let bottom_left = self.undistort_pixel(0.0, h);
        let bottom_right = self.undistort_pixel(w, h);

        ImageBounds {
            min_x: top_left.0.min(bottom_left.0),
            max_x: top_right.0.max(bottom_right.0),
            min_y: top_left.1.min(top_right.1),
            max_y: bottom_left.1.max(bottom_right.1),
        }
    }
}

/// Axis-aligned bounds of the undistorted image region. Constant across
/// a session and shared by every frame.
#[derive(Debug, Clone, Copy)]
pub struct ImageBounds {
    pub min_x: f32,
    pub max_x: f32,
    pub min_y: f32,
    pub max_y: f32,
}

impl ImageBounds {
    pub fn width(&self) -> f32 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f32 {
        self.max_y - self.min_y
    }

    pub fn contains(&self, u: f32, v: f32) -> bool {
        u >= self.min_x && u <= self.max_x && v >= self.min_y && v <= self.max_y
    }
}

/// Immutable per-session calibration state shared by all frames.
///
/// The one-time work the first frame used to do (image bounds, grid cell
/// inverses, baseline) happens in the builder, so construction order can
/// never observe an unset baseline.
#[derive(Debug, Clone)]
pub struct CalibrationContext {
    pub camera: PinholeCamera,
    pub bounds: ImageBounds,
    /// Stereo baseline in metric units, `bf / fx`.
    pub baseline: f32,
    /// Grid columns per undistorted pixel column.
    pub grid_element_width_inv: f32,
    /// Grid rows per undistorted pixel row.
    pub grid_element_height_inv: f32,
}

impl CalibrationContext {
    pub fn new(camera: PinholeCamera, width: u32, height: u32) -> Result<Self, FrontendError> {
        if width == 0 || height == 0 {
            return Err(FrontendError::EmptyImage { width, height });
        }
        if camera.fx == 0.0 || camera.fy == 0.0 {
            return Err(FrontendError::BadCalibration("zero focal length"));
        }

        let bounds = camera.compute_image_bounds(width, height);
        let baseline = camera.bf / camera.fx;
        Ok(Self {
            grid_element_width_inv: FRAME_GRID_COLS as f32 / bounds.width(),
            grid_element_height_inv: FRAME_GRID_ROWS as f32 / bounds.height(),
            camera,
            bounds,
            baseline,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn test_camera(dist: Distortion) -> PinholeCamera {
        PinholeCamera::new(500.0, 500.0, 320.0, 240.0, dist, 50.0, 4.0)
    }

    #[test]
    fn undistort_is_identity_without_distortion() {
        let cam = test_camera(Distortion::none());
        let kps = vec![
            KeyPoint { x: 10.5, y: 20.25, octave: 0, response: 1.0, angle: 0.0 },
            KeyPoint { x: 630.0, y: 470.0, octave: 3, response: 2.0, angle: 1.0 },
        ];
        let undist = cam.undistort_points(&kps);
        for (a, b) in kps.iter().zip(undist.iter()) {
            assert_eq!(a.x, b.x);
            assert_eq!(a.y, b.y);
            assert_eq!(a.octave, b.octave);
        }
    }

    #[test]
    fn undistort_inverts_forward_distortion() {
        let cam = test_camera(Distortion {
            k1: -0.28,
            k2: 0.07,
            p1: 0.0002,
            p2: -0.0001,
            k3: 0.0,
        });

        // Distort an ideal pixel, then undo it.
        for &(u, v) in &[(320.0f32, 240.0f32), (100.0, 80.0), (550.0, 400.0)] {
            let x = (u - cam.cx) * cam.inv_fx;
            let y = (v - cam.cy) * cam.inv_fy;
            let (xd, yd) = cam.distort_normalized(x, y);
            let distorted_u = cam.fx * xd + cam.cx;
            let distorted_v = cam.fy * yd + cam.cy;

            let (uu, vv) = cam.undistort_pixel(distorted_u, distorted_v);
            assert_relative_eq!(uu, u, epsilon = 1e-2);
            assert_relative_eq!(vv, v, epsilon = 1e-2);
        }
    }

    #[test]
    fn bounds_equal_image_without_distortion() {
        let cam = test_camera(Distortion::none());
        let bounds = cam.compute_image_bounds(640, 480);
        assert_eq!(bounds.min_x, 0.0);
        assert_eq!(bounds.max_x, 640.0);
        assert_eq!(bounds.min_y, 0.0);
        assert_eq!(bounds.max_y, 480.0);
        assert!(bounds.contains(320.0, 240.0));
        assert!(!bounds.contains(-1.0, 240.0));
    }

    #[test]
    fn project_backproject_round_trip() {
        let cam = test_camera(Distortion::none());
        let pc = Vector3::new(0.4, -0.3, 2.5);
        let uv = cam.project(&pc);
        let back = cam.backproject(uv.x, uv.y, pc.z);
        assert_relative_eq!(back.x, pc.x, epsilon = 1e-5);
        assert_relative_eq!(back.y, pc.y, epsilon = 1e-5);
        assert_relative_eq!(back.z, pc.z, epsilon = 1e-5);
    }

    #[test]
    fn context_rejects_degenerate_calibration() {
        let cam = PinholeCamera::new(0.0, 500.0, 320.0, 240.0, Distortion::none(), 0.0, 0.0);
        assert!(CalibrationContext::new(cam, 640, 480).is_err());

        let cam = test_camera(Distortion::none());
        assert!(CalibrationContext::new(cam.clone(), 0, 480).is_err());

        let ctx = CalibrationContext::new(cam, 640, 480).unwrap();
        assert_relative_eq!(ctx.baseline, 0.1);
        assert_relative_eq!(ctx.grid_element_width_inv, 64.0 / 640.0);
        assert_relative_eq!(ctx.grid_element_height_inv, 48.0 / 480.0);
    }
}
