//! Monocular two-view initializer.
//!
//! From putative matches between the first two frames of a session, a
//! homography and a fundamental matrix are estimated by RANSAC on two
//! parallel threads. The model with the better score ratio is
//! decomposed into motion hypotheses, and the hypothesis whose
//! triangulated points are geometrically consistent (cheirality,
//! reprojection, parallax) becomes the bootstrap reconstruction.

pub mod cheirality;
pub mod ransac;
pub mod scoring;

use std::thread;

use nalgebra::{Matrix3, Vector2, Vector3};
use tracing::debug;

use crate::camera::PinholeCamera;
use crate::features::KeyPoint;
use crate::geometry::{
    compute_fundamental, compute_homography, decompose_essential, normalize_points,
};

use cheirality::{check_candidate, CheiralityCheck};
use ransac::{best_scoring_model, draw_minimal_sets, RansacEstimate, MINIMAL_SET_SIZE};

/// Score ratio above which the homography explains the matches better
/// than the fundamental matrix.
const MODEL_SELECTION_RATIO: f32 = 0.40;

/// Configuration for the two-view initializer.
#[derive(Debug, Clone)]
pub struct InitializerConfig {
    /// Measurement standard deviation in pixels.
    pub sigma: f32,
    /// RANSAC iterations for each model.
    pub max_iterations: usize,
    /// Minimum parallax (degrees) for a trustworthy reconstruction.
    pub min_parallax_deg: f32,
    /// Minimum number of well-triangulated points.
    pub min_triangulated: usize,
    /// Seed for the shared minimal-set pre-draw.
    pub seed: u64,
}

impl Default for InitializerConfig {
    fn default() -> Self {
        Self {
            sigma: 1.0,
            max_iterations: 200,
            min_parallax_deg: 1.0,
            min_triangulated: 50,
            seed: 0,
        }
    }
}

/// Relative motion and structure recovered from the first two views.
///
/// `points` and `triangulated` are indexed by reference keypoint index;
/// the translation is unit length (monocular scale is free).
#[derive(Debug, Clone)]
pub struct Reconstruction {
    pub rotation: Matrix3<f32>,
    pub translation: Vector3<f32>,
    pub points: Vec<Vector3<f32>>,
    pub triangulated: Vec<bool>,
}

/// Two-view initializer anchored at a reference frame.
pub struct Initializer {
    ref_keypoints: Vec<KeyPoint>,
    k: Matrix3<f32>,
    sigma: f32,
    sigma2: f32,
    config: InitializerConfig,
}

impl Initializer {
    /// Anchor the initializer at the reference frame's undistorted
    /// keypoints.
    pub fn new(
        reference_keypoints: Vec<KeyPoint>,
        camera: &PinholeCamera,
        config: InitializerConfig,
    ) -> Self {
        Self {
            ref_keypoints: reference_keypoints,
            k: camera.k_matrix(),
            sigma: config.sigma,
            sigma2: config.sigma * config.sigma,
            config,
        }
    }

    /// Attempt the bootstrap reconstruction against the current frame.
    ///
    /// `matches` is indexed by reference keypoint; each entry holds the
    /// matched current-frame keypoint index. Returns `None` while no
    /// geometrically consistent reconstruction exists; the caller
    /// retries with the next frame.
    pub fn initialize(
        &self,
        current_keypoints: &[KeyPoint],
        matches: &[Option<usize>],
    ) -> Option<Reconstruction> {
        let pairs: Vec<(usize, usize)> = matches
            .iter()
            .enumerate()
            .filter_map(|(i1, m)| m.map(|i2| (i1, i2)))
            .collect();
        if pairs.len() < MINIMAL_SET_SIZE {
            return None;
        }

        // Shared by both RANSAC threads: the same seeded sample table
        // gives both models the same random structure and makes runs
        // reproducible.
        let sets = draw_minimal_sets(pairs.len(), self.config.max_iterations, self.config.seed);

        let coords1: Vec<Vector2<f32>> =
            self.ref_keypoints.iter().map(|k| Vector2::new(k.x, k.y)).collect();
        let coords2: Vec<Vector2<f32>> =
            current_keypoints.iter().map(|k| Vector2::new(k.x, k.y)).collect();
        let (norm1, t1) = normalize_points(&coords1);
        let (norm2, t2) = normalize_points(&coords2);

        let (h_est, f_est) = thread::scope(|s| {
            let h_handle = s.spawn(|| {
                self.find_homography(&norm1, &t1, &norm2, &t2, current_keypoints, &pairs, &sets)
            });
            let f_handle = s.spawn(|| {
                self.find_fundamental(&norm1, &t1, &norm2, &t2, current_keypoints, &pairs, &sets)
            });
            (
                h_handle.join().expect("homography thread panicked"),
                f_handle.join().expect("fundamental thread panicked"),
            )
        });
        let h_est = h_est?;
        let f_est = f_est?;

        let ratio = h_est.score / (h_est.score + f_est.score);
        debug!(
            "[Initializer] pairs={} SH={:.1} SF={:.1} RH={:.2}",
            pairs.len(),
            h_est.score,
            f_est.score,
            ratio
        );

        if ratio > MODEL_SELECTION_RATIO {
            self.reconstruct_from_homography(&h_est, current_keypoints, &pairs)
        } else {
            self.reconstruct_from_fundamental(&f_est, current_keypoints, &pairs)
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn find_homography(
        &self,
        norm1: &[Vector2<f32>],
        t1: &Matrix3<f32>,
        norm2: &[Vector2<f32>],
        t2: &Matrix3<f32>,
        current_keypoints: &[KeyPoint],
        pairs: &[(usize, usize)],
        sets: &[[usize; MINIMAL_SET_SIZE]],
    ) -> Option<RansacEstimate<Matrix3<f32>>> {
        let t2_inv = t2.try_inverse()?;

        best_scoring_model(
            sets,
            |set| {
                let p1: Vec<Vector2<f32>> = set.iter().map(|&i| norm1[pairs[i].0]).collect();
                let p2: Vec<Vector2<f32>> = set.iter().map(|&i| norm2[pairs[i].1]).collect();
                let h_norm = compute_homography(&p1, &p2);
                Some(t2_inv * h_norm * t1)
            },
            |h21| match h21.try_inverse() {
                Some(h12) => scoring::score_homography(
                    h21,
                    &h12,
                    pairs,
                    &self.ref_keypoints,
                    current_keypoints,
                    self.sigma,
                ),
                None => (0.0, vec![false; pairs.len()]),
            },
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn find_fundamental(
        &self,
        norm1: &[Vector2<f32>],
        t1: &Matrix3<f32>,
        norm2: &[Vector2<f32>],
        t2: &Matrix3<f32>,
        current_keypoints: &[KeyPoint],
        pairs: &[(usize, usize)],
        sets: &[[usize; MINIMAL_SET_SIZE]],
    ) -> Option<RansacEstimate<Matrix3<f32>>> {
        let t2_t = t2.transpose();

        best_scoring_model(
            sets,
            |set| {
                let p1: Vec<Vector2<f32>> = set.iter().map(|&i| norm1[pairs[i].0]).collect();
                let p2: Vec<Vector2<f32>> = set.iter().map(|&i| norm2[pairs[i].1]).collect();
                let f_norm = compute_fundamental(&p1, &p2)?;
                Some(t2_t * f_norm * t1)
            },
            |f21| {
                scoring::score_fundamental(
                    f21,
                    pairs,
                    &self.ref_keypoints,
                    current_keypoints,
                    self.sigma,
                )
            },
        )
    }

    /// Recover motion from the fundamental matrix: lift to the
    /// essential matrix, decompose into the four candidate motions and
    /// keep the single candidate with dominant cheirality support.
    fn reconstruct_from_fundamental(
        &self,
        est: &RansacEstimate<Matrix3<f32>>,
        current_keypoints: &[KeyPoint],
        pairs: &[(usize, usize)],
    ) -> Option<Reconstruction> {
        let n_inliers = est.inliers.iter().filter(|&&b| b).count();

        let e21 = self.k.transpose() * est.model * self.k;
        let (r1, r2, t) = decompose_essential(&e21)?;
        let th2 = 4.0 * self.sigma2;

        let candidates = [(r1, t), (r1, -t), (r2, t), (r2, -t)];
        let mut checks: Vec<CheiralityCheck> = candidates
            .iter()
            .map(|(r, t)| {
                check_candidate(
                    r,
                    t,
                    &self.ref_keypoints,
                    current_keypoints,
                    pairs,
                    &est.inliers,
                    &self.k,
                    th2,
                )
            })
            .collect();

        let max_good = checks.iter().map(|c| c.n_good).max()?;
        let n_min_good = ((0.9 * n_inliers as f32) as usize).max(self.config.min_triangulated);

        // A clear winner: enough support and no second hypothesis close
        // to it.
        let n_similar = checks
            .iter()
            .filter(|c| c.n_good as f32 > 0.7 * max_good as f32)
            .count();
        if max_good < n_min_good || n_similar > 1 {
            debug!(
                "[Initializer] F rejected: max_good={} needed={} similar={}",
                max_good, n_min_good, n_similar
            );
            return None;
        }

        let best_idx = checks.iter().position(|c| c.n_good == max_good)?;
        let best = checks.swap_remove(best_idx);
        if best.parallax_deg < self.config.min_parallax_deg {
            debug!("[Initializer] F rejected: parallax={:.2}deg", best.parallax_deg);
            return None;
        }

        let (rotation, translation) = candidates[best_idx];
        Some(Reconstruction {
            rotation,
            translation,
            points: best.points,
            triangulated: best.good,
        })
    }

    /// Recover motion from the homography via the Faugeras
    /// decomposition: eight candidate motions from the SVD of
    /// K^-1 H K, checked exhaustively by cheirality.
    fn reconstruct_from_homography(
        &self,
        est: &RansacEstimate<Matrix3<f32>>,
        current_keypoints: &[KeyPoint],
        pairs: &[(usize, usize)],
    ) -> Option<Reconstruction> {
        let n_inliers = est.inliers.iter().filter(|&&b| b).count();

        let k_inv = self.k.try_inverse()?;
        let a = k_inv * est.model * self.k;

        let svd = a.svd(true, true);
        let u = svd.u?;
        let v_t = svd.v_t?;
        let s = u.determinant() * v_t.determinant();
        let d1 = svd.singular_values[0];
        let d2 = svd.singular_values[1];
        let d3 = svd.singular_values[2];

        // The decomposition needs strictly separated singular values.
        if d1 / d2 < 1.00001 || d2 / d3 < 1.00001 {
            debug!("[Initializer] H rejected: degenerate singular values");
            return None;
        }

        let aux1 = ((d1 * d1 - d2 * d2) / (d1 * d1 - d3 * d3)).sqrt();
        let aux3 = ((d2 * d2 - d3 * d3) / (d1 * d1 - d3 * d3)).sqrt();
        let x1 = [aux1, aux1, -aux1, -aux1];
        let x3 = [aux3, -aux3, aux3, -aux3];

        let mut rotations: Vec<Matrix3<f32>> = Vec::with_capacity(8);
        let mut translations: Vec<Vector3<f32>> = Vec::with_capacity(8);

        // Case d' = d2.
        let aux_s_theta = ((d1 * d1 - d2 * d2) * (d2 * d2 - d3 * d3)).sqrt() / ((d1 + d3) * d2);
        let c_theta = (d2 * d2 + d1 * d3) / ((d1 + d3) * d2);
        let s_theta = [aux_s_theta, -aux_s_theta, -aux_s_theta, aux_s_theta];

        for i in 0..4 {
            let rp = Matrix3::new(
                c_theta, 0.0, -s_theta[i], //
                0.0, 1.0, 0.0, //
                s_theta[i], 0.0, c_theta,
            );
            rotations.push(s * u * rp * v_t);

            let tp = Vector3::new(x1[i], 0.0, -x3[i]) * (d1 - d3);
            let t = u * tp;
            translations.push(t / t.norm());
        }

        // Case d' = -d2.
        let aux_s_phi = ((d1 * d1 - d2 * d2) * (d2 * d2 - d3 * d3)).sqrt() / ((d1 - d3) * d2);
        let c_phi = (d1 * d3 - d2 * d2) / ((d1 - d3) * d2);
        let s_phi = [aux_s_phi, -aux_s_phi, -aux_s_phi, aux_s_phi];

        for i in 0..4 {
            let rp = Matrix3::new(
                c_phi, 0.0, s_phi[i], //
                0.0, -1.0, 0.0, //
                s_phi[i], 0.0, -c_phi,
            );
            rotations.push(s * u * rp * v_t);

            let tp = Vector3::new(x1[i], 0.0, x3[i]) * (d1 + d3);
            let t = u * tp;
            translations.push(t / t.norm());
        }

        // All eight hypotheses are reconstructed and compared; the
        // visibility constraints of the original method fail for points
        // seen with low parallax.
        let th2 = 4.0 * self.sigma2;
        let mut best_good = 0usize;
        let mut second_best_good = 0usize;
        let mut best_idx = None;
        let mut best_check: Option<CheiralityCheck> = None;

        for i in 0..8 {
            let check = check_candidate(
                &rotations[i],
                &translations[i],
                &self.ref_keypoints,
                current_keypoints,
                pairs,
                &est.inliers,
                &self.k,
                th2,
            );
            if check.n_good > best_good {
                second_best_good = best_good;
                best_good = check.n_good;
                best_idx = Some(i);
                best_check = Some(check);
            } else if check.n_good > second_best_good {
                second_best_good = check.n_good;
            }
        }

        let best_idx = best_idx?;
        let best = best_check?;

        if (second_best_good as f32) < 0.75 * best_good as f32
            && best.parallax_deg >= self.config.min_parallax_deg
            && best_good > self.config.min_triangulated
            && (best_good as f32) > 0.9 * n_inliers as f32
        {
            Some(Reconstruction {
                rotation: rotations[best_idx],
                translation: translations[best_idx],
                points: best.points,
                triangulated: best.good,
            })
        } else {
            debug!(
                "[Initializer] H rejected: best_good={} second={} parallax={:.2}deg",
                best_good, second_best_good, best.parallax_deg
            );
            None
        }
    }
}
