//! Stereo matching for rectified image pairs.
//!
//! For each left keypoint the matcher searches a row band in the right
//! image constrained by the disparity range, pre-selects the best
//! candidate by descriptor distance, then refines the horizontal match
//! with an 11x11 SAD sliding window at the keypoint's pyramid level and
//! a parabolic sub-pixel fit. A final pass rejects matches whose SAD
//! cost is far above the median.

use image::GrayImage;

use crate::camera::CalibrationContext;
use crate::features::{FeatureSet, ScalePyramid};

/// Descriptor distance above which a match is never considered.
pub const TH_HIGH: u32 = 100;
/// Descriptor distance of a confident match.
pub const TH_LOW: u32 = 50;

/// SAD patch half-size (11x11 window).
const SAD_HALF_WINDOW: i32 = 5;
/// Sliding-window shift range around the descriptor match.
const SAD_SHIFT_RANGE: i32 = 5;

/// Per-keypoint stereo output: the matched right-image column and the
/// recovered metric depth, `-1` where no match survived.
#[derive(Debug, Clone)]
pub struct StereoDepth {
    pub right_u: Vec<f32>,
    pub depth: Vec<f32>,
}

impl StereoDepth {
    /// All keypoints unmatched (also the monocular case).
    pub fn unmatched(n: usize) -> Self {
        Self {
            right_u: vec![-1.0; n],
            depth: vec![-1.0; n],
        }
    }
}

fn pixel(img: &GrayImage, x: i32, y: i32) -> f32 {
    img.get_pixel(x as u32, y as u32).0[0] as f32
}

/// Match left keypoints against the right image and recover depth.
///
/// Keypoint coordinates are the raw (distorted) detections: the pyramid
/// buffers the SAD runs on are the original images, and rectified stereo
/// input makes raw rows comparable across the pair.
pub fn match_stereo(
    left: &FeatureSet,
    right: &FeatureSet,
    left_pyramid: &[GrayImage],
    right_pyramid: &[GrayImage],
    scales: &ScalePyramid,
    calib: &CalibrationContext,
) -> StereoDepth {
    let n = left.len();
    let mut out = StereoDepth::unmatched(n);
    if n == 0 || right.is_empty() || calib.baseline <= 0.0 {
        return out;
    }

    let rows = left_pyramid[0].height() as usize;

    // Row table: each right keypoint is visible from a band of rows
    // proportional to its scale uncertainty.
    let mut row_indices: Vec<Vec<usize>> = (0..rows).map(|_| Vec::with_capacity(200)).collect();
    for (ir, kp) in right.keypoints.iter().enumerate() {
        let r = 2.0 * scales.scale_factors[kp.octave];
        let min_row = ((kp.y - r).floor() as i64).max(0) as usize;
        let max_row = ((kp.y + r).ceil() as i64).min(rows as i64 - 1) as usize;
        for row in min_row..=max_row {
            row_indices[row].push(ir);
        }
    }

    // Disparity limits: points closer than the baseline are rejected,
    // so the maximum disparity is bf / b = fx.
    let min_z = calib.baseline;
    let min_d = 0.0f32;
    let max_d = calib.camera.bf / min_z;

    let th_orb_dist = (TH_HIGH + TH_LOW) / 2;

    // (best SAD cost, left index) of accepted matches, for the median
    // outlier pass.
    let mut cost_index: Vec<(f32, usize)> = Vec::with_capacity(n);

    for (il, kp_l) in left.keypoints.iter().enumerate() {
        let level_l = kp_l.octave;
        let u_l = kp_l.x;
        let v_l = kp_l.y;

        let row = v_l.floor() as i64;
        if row < 0 || row >= rows as i64 {
            continue;
        }
        let candidates = &row_indices[row as usize];
        if candidates.is_empty() {
            continue;
        }

        let min_u = u_l - max_d;
        let max_u = u_l - min_d;
        if max_u < 0.0 {
            continue;
        }

        // Descriptor pre-selection among scale-compatible candidates in
        // the admissible column range.
        let mut best_dist = TH_HIGH;
        let mut best_idx_r: Option<usize> = None;
        let d_l = &left.descriptors[il];

        for &ir in candidates {
            let kp_r = &right.keypoints[ir];
            let octave_r = kp_r.octave as i32;
            if octave_r < level_l as i32 - 1 || octave_r > level_l as i32 + 1 {
                continue;
            }

            let u_r = kp_r.x;
            if u_r >= min_u && u_r <= max_u {
                let dist = d_l.hamming(&right.descriptors[ir]);
                if dist < best_dist {
                    best_dist = dist;
                    best_idx_r = Some(ir);
                }
            }
        }

        let Some(best_idx_r) = best_idx_r else { continue };
        if best_dist >= th_orb_dist {
            continue;
        }

        // SAD refinement in pyramid coordinates at the keypoint's level.
        let u_r0 = right.keypoints[best_idx_r].x;
        let inv_scale = scales.inv_scale_factors[level_l];
        let scaled_u_l = (u_l * inv_scale).round() as i32;
        let scaled_v_l = (v_l * inv_scale).round() as i32;
        let scaled_u_r0 = (u_r0 * inv_scale).round() as i32;

        let left_img = &left_pyramid[level_l];
        let right_img = &right_pyramid[level_l];

        let w = SAD_HALF_WINDOW;
        let l = SAD_SHIFT_RANGE;

        // The sliding patch spans scaled_u_r0 + inc +- w for inc in
        // [-l, l]; every position must stay inside the right image, and
        // the fixed patches must fit vertically and in the left image.
        let ini_u = scaled_u_r0 - l - w;
        let end_u = scaled_u_r0 + l + w + 1;
        if ini_u < 0 || end_u > right_img.width() as i32 {
            continue;
        }
        if scaled_v_l - w < 0 || scaled_v_l + w + 1 > right_img.height() as i32 {
            continue;
        }
        if scaled_u_l - w < 0 || scaled_u_l + w + 1 > left_img.width() as i32 {
            continue;
        }

        // Left patch with its center pixel subtracted (cheap local
        // illumination normalization).
        let center_l = pixel(left_img, scaled_u_l, scaled_v_l);
        let mut patch_l = [[0.0f32; 11]; 11];
        for dy in -w..=w {
            for dx in -w..=w {
                patch_l[(dy + w) as usize][(dx + w) as usize] =
                    pixel(left_img, scaled_u_l + dx, scaled_v_l + dy) - center_l;
            }
        }

        let mut best_sad = f32::INFINITY;
        let mut best_inc = 0i32;
        let mut sad_at_shift = [0.0f32; 11];

        for inc in -l..=l {
            let center_r = pixel(right_img, scaled_u_r0 + inc, scaled_v_l);
            let mut sad = 0.0f32;
            for dy in -w..=w {
                for dx in -w..=w {
                    let r_val = pixel(right_img, scaled_u_r0 + inc + dx, scaled_v_l + dy) - center_r;
                    sad += (patch_l[(dy + w) as usize][(dx + w) as usize] - r_val).abs();
                }
            }
            if sad < best_sad {
                best_sad = sad;
                best_inc = inc;
            }
            sad_at_shift[(l + inc) as usize] = sad;
        }

        // A minimum on the window boundary cannot be bracketed by the
        // parabola fit.
        if best_inc == -l || best_inc == l {
            continue;
        }

        // Sub-pixel correction from the parabola through the three SAD
        // values around the minimum.
        let d1 = sad_at_shift[(l + best_inc - 1) as usize];
        let d2 = sad_at_shift[(l + best_inc) as usize];
        let d3 = sad_at_shift[(l + best_inc + 1) as usize];
        let delta = (d1 - d3) / (2.0 * (d1 + d3 - 2.0 * d2));
        if delta < -1.0 || delta > 1.0 {
            continue;
        }

        let best_u_r = scales.scale_factors[level_l] * (scaled_u_r0 as f32 + best_inc as f32 + delta);
        let mut disparity = u_l - best_u_r;
        if disparity >= min_d && disparity < max_d {
            let mut u_r = best_u_r;
            if disparity <= 0.0 {
                disparity = 0.01;
                u_r = u_l - 0.01;
            }
            out.depth[il] = calib.camera.bf / disparity;
            out.right_u[il] = u_r;
            cost_index.push((best_sad, il));
        }
    }

    reject_sad_outliers(&mut cost_index, &mut out);
    out
}

/// Adaptive outlier pass: drop matches whose SAD cost is at least
/// 1.5 * 1.4 times the median cost.
fn reject_sad_outliers(cost_index: &mut Vec<(f32, usize)>, out: &mut StereoDepth) {
    if cost_index.is_empty() {
        return;
    }
    cost_index.sort_by(|a, b| a.0.total_cmp(&b.0));
    let median = cost_index[cost_index.len() / 2].0;
    let th_dist = 1.5 * 1.4 * median;

    for &(cost, idx) in cost_index.iter().rev() {
        if cost < th_dist {
            break;
        }
        out.right_u[idx] = -1.0;
        out.depth[idx] = -1.0;
    }
}
