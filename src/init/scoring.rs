//! Symmetric-transfer scoring of homography and fundamental hypotheses.
//!
//! Squared transfer distances are divided by the measurement variance to
//! form chi-square statistics; a correspondence is an inlier only when
//! both transfer directions pass. Accepted residuals add
//! `5.991 - stat` to the score in both models so the two totals stay
//! comparable for model selection.

use nalgebra::Matrix3;

use crate::features::KeyPoint;

/// 95% chi-square threshold with 2 degrees of freedom (point transfer).
pub const CHI2_2DOF: f32 = 5.991;
/// 95% chi-square threshold with 1 degree of freedom (line distance).
pub const CHI2_1DOF: f32 = 3.841;

/// Score a homography H21 (and its inverse H12) by symmetric transfer
/// error over all putative pairs.
pub fn score_homography(
    h21: &Matrix3<f32>,
    h12: &Matrix3<f32>,
    pairs: &[(usize, usize)],
    keypoints1: &[KeyPoint],
    keypoints2: &[KeyPoint],
    sigma: f32,
) -> (f32, Vec<bool>) {
    let inv_sigma_square = 1.0 / (sigma * sigma);
    let mut score = 0.0f32;
    let mut inliers = vec![false; pairs.len()];

    for (i, &(i1, i2)) in pairs.iter().enumerate() {
        let kp1 = &keypoints1[i1];
        let kp2 = &keypoints2[i2];
        let (u1, v1) = (kp1.x, kp1.y);
        let (u2, v2) = (kp2.x, kp2.y);
        let mut is_inlier = true;

        // Transfer image 2 -> image 1 through H12.
        let w2in1_inv = 1.0 / (h12[(2, 0)] * u2 + h12[(2, 1)] * v2 + h12[(2, 2)]);
        let u2in1 = (h12[(0, 0)] * u2 + h12[(0, 1)] * v2 + h12[(0, 2)]) * w2in1_inv;
        let v2in1 = (h12[(1, 0)] * u2 + h12[(1, 1)] * v2 + h12[(1, 2)]) * w2in1_inv;
        let square_dist1 = (u1 - u2in1) * (u1 - u2in1) + (v1 - v2in1) * (v1 - v2in1);
        let chi_square1 = square_dist1 * inv_sigma_square;
        if chi_square1 > CHI2_2DOF {
            is_inlier = false;
        } else {
            score += CHI2_2DOF - chi_square1;
        }

        // Transfer image 1 -> image 2 through H21.
        let w1in2_inv = 1.0 / (h21[(2, 0)] * u1 + h21[(2, 1)] * v1 + h21[(2, 2)]);
        let u1in2 = (h21[(0, 0)] * u1 + h21[(0, 1)] * v1 + h21[(0, 2)]) * w1in2_inv;
        let v1in2 = (h21[(1, 0)] * u1 + h21[(1, 1)] * v1 + h21[(1, 2)]) * w1in2_inv;
        let square_dist2 = (u2 - u1in2) * (u2 - u1in2) + (v2 - v1in2) * (v2 - v1in2);
        let chi_square2 = square_dist2 * inv_sigma_square;
        if chi_square2 > CHI2_2DOF {
            is_inlier = false;
        } else {
            score += CHI2_2DOF - chi_square2;
        }

        inliers[i] = is_inlier;
    }

    (score, inliers)
}

/// Score a fundamental matrix F21 by symmetric point-to-epipolar-line
/// distance over all putative pairs.
pub fn score_fundamental(
    f21: &Matrix3<f32>,
    pairs: &[(usize, usize)],
    keypoints1: &[KeyPoint],
    keypoints2: &[KeyPoint],
    sigma: f32,
) -> (f32, Vec<bool>) {
    let inv_sigma_square = 1.0 / (sigma * sigma);
    let mut score = 0.0f32;
    let mut inliers = vec![false; pairs.len()];

    for (i, &(i1, i2)) in pairs.iter().enumerate() {
        let kp1 = &keypoints1[i1];
        let kp2 = &keypoints2[i2];
        let (u1, v1) = (kp1.x, kp1.y);
        let (u2, v2) = (kp2.x, kp2.y);
        let mut is_inlier = true;

        // Epipolar line of x1 in image 2: l2 = F21 * x1.
        let a2 = f21[(0, 0)] * u1 + f21[(0, 1)] * v1 + f21[(0, 2)];
        let b2 = f21[(1, 0)] * u1 + f21[(1, 1)] * v1 + f21[(1, 2)];
        let c2 = f21[(2, 0)] * u1 + f21[(2, 1)] * v1 + f21[(2, 2)];
        let num2 = a2 * u2 + b2 * v2 + c2;
        let square_dist1 = num2 * num2 / (a2 * a2 + b2 * b2);
        let chi_square1 = square_dist1 * inv_sigma_square;
        if chi_square1 > CHI2_1DOF {
            is_inlier = false;
        } else {
            score += CHI2_2DOF - chi_square1;
        }

        // Epipolar line of x2 in image 1: l1 = F21^T * x2.
        let a1 = f21[(0, 0)] * u2 + f21[(1, 0)] * v2 + f21[(2, 0)];
        let b1 = f21[(0, 1)] * u2 + f21[(1, 1)] * v2 + f21[(2, 1)];
        let c1 = f21[(0, 2)] * u2 + f21[(1, 2)] * v2 + f21[(2, 2)];
        let num1 = a1 * u1 + b1 * v1 + c1;
        let square_dist2 = num1 * num1 / (a1 * a1 + b1 * b1);
        let chi_square2 = square_dist2 * inv_sigma_square;
        if chi_square2 > CHI2_1DOF {
            is_inlier = false;
        } else {
            score += CHI2_2DOF - chi_square2;
        }

        inliers[i] = is_inlier;
    }

    (score, inliers)
}
