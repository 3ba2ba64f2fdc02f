//! Typed world-to-camera transform.
//!
//! Poses are stored as the rigid transform Tcw (points map world ->
//! camera). The inverse rotation and the camera center are derived once
//! at construction since the frustum test and unprojection read them on
//! every call.

use nalgebra::{Matrix3, Matrix4, Vector3};

/// A camera pose Tcw in SE(3) with cached derived quantities.
#[derive(Debug, Clone)]
pub struct CameraPose {
    rcw: Matrix3<f32>,
    tcw: Vector3<f32>,
    rwc: Matrix3<f32>,
    ow: Vector3<f32>,
}

impl CameraPose {
    /// The identity pose: camera at the world origin.
    pub fn identity() -> Self {
        Self::from_rt(Matrix3::identity(), Vector3::zeros())
    }

    /// Build from rotation Rcw and translation tcw, deriving
    /// Rwc = Rcw^T and the camera center Ow = -Rcw^T * tcw.
    pub fn from_rt(rcw: Matrix3<f32>, tcw: Vector3<f32>) -> Self {
        let rwc = rcw.transpose();
        let ow = -rwc * tcw;
        Self { rcw, tcw, rwc, ow }
    }

    /// Build from a homogeneous 4x4 transform.
    pub fn from_matrix(tcw: &Matrix4<f32>) -> Self {
        let rcw = tcw.fixed_view::<3, 3>(0, 0).into_owned();
        let t = tcw.fixed_view::<3, 1>(0, 3).into_owned();
        Self::from_rt(rcw, t)
    }

    /// Rotation world -> camera.
    pub fn rotation(&self) -> &Matrix3<f32> {
        &self.rcw
    }

    /// Rotation camera -> world.
    pub fn rotation_inv(&self) -> &Matrix3<f32> {
        &self.rwc
    }

    /// Translation of Tcw.
    pub fn translation(&self) -> &Vector3<f32> {
        &self.tcw
    }

    /// Camera center in world coordinates.
    pub fn camera_center(&self) -> &Vector3<f32> {
        &self.ow
    }

    /// Express a world point in the camera frame.
    pub fn transform_to_camera(&self, pw: &Vector3<f32>) -> Vector3<f32> {
        self.rcw * pw + self.tcw
    }

    /// Express a camera-frame point in world coordinates.
    pub fn transform_to_world(&self, pc: &Vector3<f32>) -> Vector3<f32> {
        self.rwc * pc + self.ow
    }

    /// The homogeneous 4x4 form of Tcw.
    pub fn to_matrix(&self) -> Matrix4<f32> {
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(&self.rcw);
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.tcw);
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::FRAC_PI_4;

    fn rotation_y(angle: f32) -> Matrix3<f32> {
        let (s, c) = angle.sin_cos();
        Matrix3::new(
            c, 0.0, s, //
            0.0, 1.0, 0.0, //
            -s, 0.0, c,
        )
    }

    #[test]
    fn camera_center_matches_definition() {
        let r = rotation_y(FRAC_PI_4);
        let t = Vector3::new(0.3, -0.1, 1.0);
        let pose = CameraPose::from_rt(r, t);

        let expected = -r.transpose() * t;
        assert_relative_eq!(*pose.camera_center(), expected, epsilon = 1e-6);

        // The camera center maps to the origin of the camera frame.
        let center_in_cam = pose.transform_to_camera(pose.camera_center());
        assert_relative_eq!(center_in_cam.norm(), 0.0, epsilon = 1e-5);
    }

    #[test]
    fn world_camera_round_trip() {
        let pose = CameraPose::from_rt(rotation_y(0.3), Vector3::new(1.0, 2.0, 3.0));
        let pw = Vector3::new(-0.5, 0.8, 4.0);
        let back = pose.transform_to_world(&pose.transform_to_camera(&pw));
        assert_relative_eq!(back, pw, epsilon = 1e-5);
    }

    #[test]
    fn matrix_round_trip() {
        let pose = CameraPose::from_rt(rotation_y(-0.7), Vector3::new(0.1, 0.0, -2.0));
        let rebuilt = CameraPose::from_matrix(&pose.to_matrix());
        assert_relative_eq!(*rebuilt.rotation(), *pose.rotation(), epsilon = 1e-6);
        assert_relative_eq!(*rebuilt.translation(), *pose.translation(), epsilon = 1e-6);
    }
}
