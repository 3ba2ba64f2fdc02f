//! Cheirality check: validate a candidate (R, t) by triangulating the
//! inlier correspondences and counting the points that land in front of
//! both cameras with a small reprojection error.

use nalgebra::{Matrix3, Vector2, Vector3};

use crate::features::KeyPoint;
use crate::geometry::{projection_matrix, triangulate};

/// Cosine above which a triangulated point is treated as being at
/// near-infinity: its depth sign is unreliable, and it cannot count as
/// a well-conditioned ("good") triangulation.
const COS_PARALLAX_NEAR_INFINITY: f32 = 0.99998;

/// Outcome of checking one motion hypothesis.
#[derive(Debug, Clone)]
pub struct CheiralityCheck {
    /// Points that passed every test.
    pub n_good: usize,
    /// Triangulated coordinates, indexed by reference keypoint index.
    /// Only meaningful where `good` is set.
    pub points: Vec<Vector3<f32>>,
    /// Per-reference-keypoint flag: passed and with measurable parallax.
    pub good: Vec<bool>,
    /// Parallax (degrees) at the 50th-smallest cosine, or the overall
    /// maximum when fewer points qualify.
    pub parallax_deg: f32,
}

/// Triangulate every inlier pair under the candidate motion and count
/// the geometrically consistent points.
#[allow(clippy::too_many_arguments)]
pub fn check_candidate(
    r: &Matrix3<f32>,
    t: &Vector3<f32>,
    keypoints1: &[KeyPoint],
    keypoints2: &[KeyPoint],
    pairs: &[(usize, usize)],
    pair_inliers: &[bool],
    k: &Matrix3<f32>,
    th2: f32,
) -> CheiralityCheck {
    let fx = k[(0, 0)];
    let fy = k[(1, 1)];
    let cx = k[(0, 2)];
    let cy = k[(1, 2)];

    let mut good = vec![false; keypoints1.len()];
    let mut points = vec![Vector3::zeros(); keypoints1.len()];
    let mut cos_parallaxes: Vec<f32> = Vec::with_capacity(keypoints1.len());

    // Camera 1 at the origin, camera 2 displaced by the candidate motion.
    let proj1 = projection_matrix(k, &Matrix3::identity(), &Vector3::zeros());
    let proj2 = projection_matrix(k, r, t);
    let o1 = Vector3::zeros();
    let o2 = -r.transpose() * t;

    let mut n_good = 0usize;

    for (pair_idx, &(i1, i2)) in pairs.iter().enumerate() {
        if !pair_inliers[pair_idx] {
            continue;
        }

        let kp1 = &keypoints1[i1];
        let kp2 = &keypoints2[i2];
        let p1 = Vector2::new(kp1.x, kp1.y);
        let p2 = Vector2::new(kp2.x, kp2.y);

        let Some(p3d_c1) = triangulate(&p1, &p2, &proj1, &proj2) else {
            continue;
        };
        if !p3d_c1.x.is_finite() || !p3d_c1.y.is_finite() || !p3d_c1.z.is_finite() {
            continue;
        }

        // Parallax angle at the triangulated point.
        let normal1 = p3d_c1 - o1;
        let dist1 = normal1.norm();
        let normal2 = p3d_c1 - o2;
        let dist2 = normal2.norm();
        let cos_parallax = normal1.dot(&normal2) / (dist1 * dist2);

        // Depth must be positive in both cameras, except for
        // near-infinite points whose depth sign is unreliable.
        if p3d_c1.z <= 0.0 && cos_parallax < COS_PARALLAX_NEAR_INFINITY {
            continue;
        }
        let p3d_c2 = r * p3d_c1 + t;
        if p3d_c2.z <= 0.0 && cos_parallax < COS_PARALLAX_NEAR_INFINITY {
            continue;
        }

        // Reprojection error in both images.
        let inv_z1 = 1.0 / p3d_c1.z;
        let u1 = fx * p3d_c1.x * inv_z1 + cx;
        let v1 = fy * p3d_c1.y * inv_z1 + cy;
        let err1 = (u1 - kp1.x) * (u1 - kp1.x) + (v1 - kp1.y) * (v1 - kp1.y);
        if err1 > th2 {
            continue;
        }

        let inv_z2 = 1.0 / p3d_c2.z;
        let u2 = fx * p3d_c2.x * inv_z2 + cx;
        let v2 = fy * p3d_c2.y * inv_z2 + cy;
        let err2 = (u2 - kp2.x) * (u2 - kp2.x) + (v2 - kp2.y) * (v2 - kp2.y);
        if err2 > th2 {
            continue;
        }

        cos_parallaxes.push(cos_parallax);
        points[i1] = p3d_c1;
        n_good += 1;

        if cos_parallax < COS_PARALLAX_NEAR_INFINITY {
            good[i1] = true;
        }
    }

    let parallax_deg = if cos_parallaxes.is_empty() {
        0.0
    } else {
        // The 50th-smallest cosine (largest parallaxes first when
        // sorted ascending) is a robust "large" parallax statistic.
        cos_parallaxes.sort_by(|a, b| a.total_cmp(b));
        let idx = 50.min(cos_parallaxes.len() - 1);
        cos_parallaxes[idx].acos().to_degrees()
    };

    CheiralityCheck { n_good, points, good, parallax_deg }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::decompose_essential;
    use crate::geometry::skew_symmetric;
    use nalgebra::Vector2;

    fn k_test() -> Matrix3<f32> {
        Matrix3::new(
            500.0, 0.0, 320.0, //
            0.0, 500.0, 240.0, //
            0.0, 0.0, 1.0,
        )
    }

    fn rotation_y(angle: f32) -> Matrix3<f32> {
        let (s, c) = angle.sin_cos();
        Matrix3::new(
            c, 0.0, s, //
            0.0, 1.0, 0.0, //
            -s, 0.0, c,
        )
    }

    fn kp(p: Vector2<f32>) -> KeyPoint {
        KeyPoint { x: p.x, y: p.y, octave: 0, response: 0.0, angle: 0.0 }
    }

    fn synthetic_views(
        r: &Matrix3<f32>,
        t: &Vector3<f32>,
        n_points: usize,
    ) -> (Vec<KeyPoint>, Vec<KeyPoint>, Vec<(usize, usize)>) {
        let k = k_test();
        let proj1 = projection_matrix(&k, &Matrix3::identity(), &Vector3::zeros());
        let proj2 = projection_matrix(&k, r, t);

        let mut kps1 = Vec::new();
        let mut kps2 = Vec::new();
        for i in 0..n_points {
            let fi = i as f32;
            let x = Vector3::new(
                (fi * 0.37).sin() * 2.0,
                (fi * 0.73).cos() * 1.5,
                5.0 + (fi * 0.51).sin() * 2.0,
            );
            let project = |p: &crate::geometry::ProjectionMatrix| {
                let xh = nalgebra::Vector4::new(x.x, x.y, x.z, 1.0);
                let uvw = p * xh;
                Vector2::new(uvw.x / uvw.z, uvw.y / uvw.z)
            };
            kps1.push(kp(project(&proj1)));
            kps2.push(kp(project(&proj2)));
        }
        let pairs = (0..n_points).map(|i| (i, i)).collect();
        (kps1, kps2, pairs)
    }

    #[test]
    fn true_motion_places_points_in_front() {
        let r = rotation_y(0.1);
        let t = Vector3::new(0.5, 0.0, 0.0);
        let (kps1, kps2, pairs) = synthetic_views(&r, &t, 60);
        let inliers = vec![true; pairs.len()];

        let check = check_candidate(&r, &t, &kps1, &kps2, &pairs, &inliers, &k_test(), 4.0);

        assert_eq!(check.n_good, 60);
        assert!(check.parallax_deg > 1.0);

        // Triangulated points reproduce the scene depth band.
        for (i1, _) in &pairs {
            assert!(check.good[*i1]);
            assert!(check.points[*i1].z > 2.0 && check.points[*i1].z < 8.0);
        }
    }

    /// Of the four decompositions of an essential matrix, exactly one
    /// places the forward-configured cloud in front of both cameras.
    #[test]
    fn exactly_one_decomposition_wins() {
        let r_true = rotation_y(0.08);
        let t_true = Vector3::new(0.6, 0.05, 0.0).normalize();
        let (kps1, kps2, pairs) = synthetic_views(&r_true, &t_true, 80);
        let inliers = vec![true; pairs.len()];

        let e = skew_symmetric(&t_true) * r_true;
        let (r1, r2, t) = decompose_essential(&e).unwrap();

        let candidates = [(r1, t), (r1, -t), (r2, t), (r2, -t)];
        let mut wins = 0;
        for (r, t) in &candidates {
            let check = check_candidate(r, t, &kps1, &kps2, &pairs, &inliers, &k_test(), 4.0);
            if check.n_good as f32 > 0.99 * pairs.len() as f32 {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }
}
