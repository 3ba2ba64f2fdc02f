//! Projective-geometry kernels for two-view reconstruction: point
//! normalization, DLT model fitting, triangulation and essential-matrix
//! decomposition.
//!
//! Model fitting follows the normalized DLT recipe: callers normalize
//! both point sets with [`normalize_points`], fit on the normalized
//! coordinates, then undo the similarity transforms.

use nalgebra::{DMatrix, Matrix3, Matrix4, SMatrix, Vector2, Vector3};

/// A 3x4 camera projection matrix.
pub type ProjectionMatrix = SMatrix<f32, 3, 4>;

/// Translate points to their centroid and scale each axis so the mean
/// absolute deviation is one. Returns the normalized points and the 3x3
/// similarity T mapping original to normalized coordinates.
pub fn normalize_points(points: &[Vector2<f32>]) -> (Vec<Vector2<f32>>, Matrix3<f32>) {
    let n = points.len() as f32;

    let mut mean_x = 0.0;
    let mut mean_y = 0.0;
    for p in points {
        mean_x += p.x;
        mean_y += p.y;
    }
    mean_x /= n;
    mean_y /= n;

    let mut normalized: Vec<Vector2<f32>> = points
        .iter()
        .map(|p| Vector2::new(p.x - mean_x, p.y - mean_y))
        .collect();

    let mut mean_dev_x = 0.0;
    let mut mean_dev_y = 0.0;
    for p in &normalized {
        mean_dev_x += p.x.abs();
        mean_dev_y += p.y.abs();
    }
    mean_dev_x /= n;
    mean_dev_y /= n;

    let sx = 1.0 / mean_dev_x;
    let sy = 1.0 / mean_dev_y;
    for p in &mut normalized {
        p.x *= sx;
        p.y *= sy;
    }

    let t = Matrix3::new(
        sx, 0.0, -mean_x * sx, //
        0.0, sy, -mean_y * sy, //
        0.0, 0.0, 1.0,
    );
    (normalized, t)
}

/// Nullspace vector of a DLT design matrix: the eigenvector of A^T A
/// with the smallest eigenvalue, reshaped to 3x3 row-major.
fn dlt_nullspace(a: &DMatrix<f32>) -> Matrix3<f32> {
    let ata = a.transpose() * a;
    let eig = ata.symmetric_eigen();

    let mut min_idx = 0;
    for i in 1..eig.eigenvalues.len() {
        if eig.eigenvalues[i] < eig.eigenvalues[min_idx] {
            min_idx = i;
        }
    }
    let h = eig.eigenvectors.column(min_idx);

    Matrix3::new(
        h[0], h[1], h[2], //
        h[3], h[4], h[5], //
        h[6], h[7], h[8],
    )
}

/// Homography from (normalized) correspondences via DLT: two rows per
/// pair, nullspace of the stacked system.
pub fn compute_homography(p1: &[Vector2<f32>], p2: &[Vector2<f32>]) -> Matrix3<f32> {
    let n = p1.len();
    let mut a = DMatrix::<f32>::zeros(2 * n, 9);

    for i in 0..n {
        let (u1, v1) = (p1[i].x, p1[i].y);
        let (u2, v2) = (p2[i].x, p2[i].y);

        a[(2 * i, 3)] = -u1;
        a[(2 * i, 4)] = -v1;
        a[(2 * i, 5)] = -1.0;
        a[(2 * i, 6)] = v2 * u1;
        a[(2 * i, 7)] = v2 * v1;
        a[(2 * i, 8)] = v2;

        a[(2 * i + 1, 0)] = u1;
        a[(2 * i + 1, 1)] = v1;
        a[(2 * i + 1, 2)] = 1.0;
        a[(2 * i + 1, 6)] = -u2 * u1;
        a[(2 * i + 1, 7)] = -u2 * v1;
        a[(2 * i + 1, 8)] = -u2;
    }

    dlt_nullspace(&a)
}

/// Fundamental matrix from (normalized) correspondences via the
/// eight-point algorithm, with the rank-2 constraint enforced by zeroing
/// the smallest singular value.
pub fn compute_fundamental(p1: &[Vector2<f32>], p2: &[Vector2<f32>]) -> Option<Matrix3<f32>> {
    let n = p1.len();
    let mut a = DMatrix::<f32>::zeros(n, 9);

    for i in 0..n {
        let (u1, v1) = (p1[i].x, p1[i].y);
        let (u2, v2) = (p2[i].x, p2[i].y);

        a[(i, 0)] = u2 * u1;
        a[(i, 1)] = u2 * v1;
        a[(i, 2)] = u2;
        a[(i, 3)] = v2 * u1;
        a[(i, 4)] = v2 * v1;
        a[(i, 5)] = v2;
        a[(i, 6)] = u1;
        a[(i, 7)] = v1;
        a[(i, 8)] = 1.0;
    }

    let f_full = dlt_nullspace(&a);

    let svd = f_full.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let mut w = svd.singular_values;
    w[2] = 0.0;

    Some(u * Matrix3::from_diagonal(&w) * v_t)
}

/// Assemble K * [R | t].
pub fn projection_matrix(k: &Matrix3<f32>, r: &Matrix3<f32>, t: &Vector3<f32>) -> ProjectionMatrix {
    let mut rt = ProjectionMatrix::zeros();
    rt.fixed_view_mut::<3, 3>(0, 0).copy_from(r);
    rt.fixed_view_mut::<3, 1>(0, 3).copy_from(t);
    k * rt
}

/// Triangulate a 3D point from two pixel observations and their
/// projection matrices (linear DLT, homogeneous solution from the
/// nullspace of the 4x4 cross-product system).
pub fn triangulate(
    p1: &Vector2<f32>,
    p2: &Vector2<f32>,
    proj1: &ProjectionMatrix,
    proj2: &ProjectionMatrix,
) -> Option<Vector3<f32>> {
    let mut a = Matrix4::<f32>::zeros();
    for j in 0..4 {
        a[(0, j)] = p1.x * proj1[(2, j)] - proj1[(0, j)];
        a[(1, j)] = p1.y * proj1[(2, j)] - proj1[(1, j)];
        a[(2, j)] = p2.x * proj2[(2, j)] - proj2[(0, j)];
        a[(3, j)] = p2.y * proj2[(2, j)] - proj2[(1, j)];
    }

    let svd = a.svd(true, true);
    let v_t = svd.v_t?;
    let x = v_t.row(3);

    if x[3].abs() < 1e-10 {
        return None;
    }
    Some(Vector3::new(x[0] / x[3], x[1] / x[3], x[2] / x[3]))
}

/// Decompose an essential matrix into its two candidate rotations and
/// the unit translation. The four motion hypotheses are
/// (R1, t), (R1, -t), (R2, t), (R2, -t).
pub fn decompose_essential(e: &Matrix3<f32>) -> Option<(Matrix3<f32>, Matrix3<f32>, Vector3<f32>)> {
    let svd = e.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;

    let t: Vector3<f32> = u.column(2).into_owned();
    let t = t.normalize();

    // Rotation by pi/2 around Z.
    let w = Matrix3::new(
        0.0, -1.0, 0.0, //
        1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0,
    );

    let mut r1 = u * w * v_t;
    if r1.determinant() < 0.0 {
        r1 = -r1;
    }
    let mut r2 = u * w.transpose() * v_t;
    if r2.determinant() < 0.0 {
        r2 = -r2;
    }

    Some((r1, r2, t))
}

/// Skew-symmetric matrix [v]_x such that [v]_x * w = v x w.
pub fn skew_symmetric(v: &Vector3<f32>) -> Matrix3<f32> {
    Matrix3::new(
        0.0, -v.z, v.y, //
        v.z, 0.0, -v.x, //
        -v.y, v.x, 0.0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn rotation_y(angle: f32) -> Matrix3<f32> {
        let (s, c) = angle.sin_cos();
        Matrix3::new(
            c, 0.0, s, //
            0.0, 1.0, 0.0, //
            -s, 0.0, c,
        )
    }

    fn k_test() -> Matrix3<f32> {
        Matrix3::new(
            500.0, 0.0, 320.0, //
            0.0, 500.0, 240.0, //
            0.0, 0.0, 1.0,
        )
    }

    fn project(p: &ProjectionMatrix, x: &Vector3<f32>) -> Vector2<f32> {
        let xh = nalgebra::Vector4::new(x.x, x.y, x.z, 1.0);
        let uvw = p * xh;
        Vector2::new(uvw.x / uvw.z, uvw.y / uvw.z)
    }

    #[test]
    fn normalization_centers_and_scales() {
        let points = vec![
            Vector2::new(10.0, 20.0),
            Vector2::new(30.0, 60.0),
            Vector2::new(-10.0, 100.0),
            Vector2::new(50.0, -20.0),
        ];
        let (normalized, t) = normalize_points(&points);

        let mean: Vector2<f32> = normalized.iter().sum::<Vector2<f32>>() / 4.0;
        assert_relative_eq!(mean.norm(), 0.0, epsilon = 1e-5);

        let dev_x: f32 = normalized.iter().map(|p| p.x.abs()).sum::<f32>() / 4.0;
        let dev_y: f32 = normalized.iter().map(|p| p.y.abs()).sum::<f32>() / 4.0;
        assert_relative_eq!(dev_x, 1.0, epsilon = 1e-5);
        assert_relative_eq!(dev_y, 1.0, epsilon = 1e-5);

        // T applied to an original point reproduces the normalized one.
        let p = Vector3::new(points[2].x, points[2].y, 1.0);
        let q = t * p;
        assert_relative_eq!(q.x / q.z, normalized[2].x, epsilon = 1e-5);
        assert_relative_eq!(q.y / q.z, normalized[2].y, epsilon = 1e-5);
    }

    #[test]
    fn homography_dlt_recovers_known_model() {
        let h_true = Matrix3::new(
            1.1, 0.02, 3.0, //
            -0.05, 0.95, -2.0, //
            0.0004, -0.0002, 1.0,
        );

        let p1: Vec<Vector2<f32>> = vec![
            Vector2::new(0.1, 0.2),
            Vector2::new(-1.0, 0.5),
            Vector2::new(0.7, -0.8),
            Vector2::new(1.3, 1.1),
            Vector2::new(-0.4, -1.2),
            Vector2::new(0.9, 0.3),
            Vector2::new(-1.5, 0.9),
            Vector2::new(0.2, -0.6),
        ];
        let p2: Vec<Vector2<f32>> = p1
            .iter()
            .map(|p| {
                let q = h_true * Vector3::new(p.x, p.y, 1.0);
                Vector2::new(q.x / q.z, q.y / q.z)
            })
            .collect();

        let h = compute_homography(&p1, &p2);

        // Compare up to projective scale.
        let scale = h_true[(2, 2)] / h[(2, 2)];
        for r in 0..3 {
            for c in 0..3 {
                assert_relative_eq!(h[(r, c)] * scale, h_true[(r, c)], epsilon = 1e-3);
            }
        }
    }

    #[test]
    fn fundamental_satisfies_epipolar_constraint() {
        let k = k_test();
        let r = rotation_y(0.1);
        let t = Vector3::new(0.5, 0.05, 0.02);

        let proj1 = projection_matrix(&k, &Matrix3::identity(), &Vector3::zeros());
        let proj2 = projection_matrix(&k, &r, &t);

        // Non-coplanar scene.
        let points3d: Vec<Vector3<f32>> = (0..12)
            .map(|i| {
                let fi = i as f32;
                Vector3::new(
                    (fi * 0.37).sin() * 2.0,
                    (fi * 0.73).cos() * 1.5,
                    4.0 + (fi * 0.51).sin() * 2.0,
                )
            })
            .collect();

        let p1: Vec<Vector2<f32>> = points3d.iter().map(|x| project(&proj1, x)).collect();
        let p2: Vec<Vector2<f32>> = points3d.iter().map(|x| project(&proj2, x)).collect();

        let (n1, t1) = normalize_points(&p1);
        let (n2, t2) = normalize_points(&p2);
        let fn_ = compute_fundamental(&n1[..8], &n2[..8]).unwrap();
        let f = t2.transpose() * fn_ * t1;
        let f = f / f.norm();

        // Rank 2 by construction.
        assert_relative_eq!(f.determinant(), 0.0, epsilon = 1e-4);

        // Every correspondence (including the four unused ones) lies on
        // its epipolar line to sub-pixel accuracy.
        for (a, b) in p1.iter().zip(p2.iter()) {
            let x1 = Vector3::new(a.x, a.y, 1.0);
            let line2 = f * x1;
            let dist = (line2.x * b.x + line2.y * b.y + line2.z).abs()
                / (line2.x * line2.x + line2.y * line2.y).sqrt();
            assert!(dist < 0.1, "epipolar distance {dist}");
        }
    }

    #[test]
    fn triangulation_round_trip() {
        let k = k_test();
        let r = rotation_y(0.05);
        let t = Vector3::new(0.4, 0.0, 0.0);

        let proj1 = projection_matrix(&k, &Matrix3::identity(), &Vector3::zeros());
        let proj2 = projection_matrix(&k, &r, &t);

        let x = Vector3::new(0.3, -0.2, 5.0);
        let p1 = project(&proj1, &x);
        let p2 = project(&proj2, &x);

        let recovered = triangulate(&p1, &p2, &proj1, &proj2).unwrap();
        assert_relative_eq!(recovered, x, epsilon = 1e-3);
    }

    #[test]
    fn essential_decomposition_contains_true_motion() {
        let r_true = rotation_y(0.2);
        let t_true = Vector3::new(0.8, 0.1, -0.2).normalize();

        let e = skew_symmetric(&t_true) * r_true;
        let (r1, r2, t) = decompose_essential(&e).unwrap();

        let rot_close = |a: &Matrix3<f32>, b: &Matrix3<f32>| (a - b).norm() < 1e-3;
        let vec_close = |a: &Vector3<f32>, b: &Vector3<f32>| (a - b).norm() < 1e-3;

        let rotation_found = rot_close(&r1, &r_true) || rot_close(&r2, &r_true);
        let translation_found = vec_close(&t, &t_true) || vec_close(&(-t), &t_true);
        assert!(rotation_found);
        assert!(translation_found);
    }

    #[test]
    fn skew_symmetric_reproduces_cross_product() {
        let v = Vector3::new(1.0, 2.0, 3.0);
        let w = Vector3::new(-0.5, 0.7, 0.1);
        let s = skew_symmetric(&v);
        assert_relative_eq!(s * w, v.cross(&w), epsilon = 1e-6);
        assert_relative_eq!((s + s.transpose()).norm(), 0.0);
    }
}
