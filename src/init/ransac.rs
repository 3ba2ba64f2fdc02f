//! Deterministic RANSAC support for the two-view initializer.
//!
//! The minimal sets are drawn once from a seeded generator and shared by
//! the homography and fundamental estimations, so a fixed seed yields
//! identical models, inlier masks and scores on every run.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Size of the minimal sample both models are fit from.
pub const MINIMAL_SET_SIZE: usize = 8;

/// Best model found by a RANSAC loop together with its support.
#[derive(Debug, Clone)]
pub struct RansacEstimate<M> {
    pub model: M,
    pub inliers: Vec<bool>,
    pub score: f32,
}

/// Pre-draw one 8-element sample per iteration, uniformly without
/// replacement (replace-with-last-then-pop over the index range).
pub fn draw_minimal_sets(
    num_pairs: usize,
    iterations: usize,
    seed: u64,
) -> Vec<[usize; MINIMAL_SET_SIZE]> {
    debug_assert!(num_pairs >= MINIMAL_SET_SIZE);

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let all_indices: Vec<usize> = (0..num_pairs).collect();

    let mut sets = Vec::with_capacity(iterations);
    for _ in 0..iterations {
        let mut available = all_indices.clone();
        let mut set = [0usize; MINIMAL_SET_SIZE];
        for slot in &mut set {
            let pick = rng.gen_range(0..available.len());
            *slot = available[pick];
            available[pick] = available[available.len() - 1];
            available.pop();
        }
        sets.push(set);
    }
    sets
}

/// Run the iteration loop: fit a model on each pre-drawn minimal set,
/// score it, and keep the best score seen.
pub fn best_scoring_model<M>(
    sets: &[[usize; MINIMAL_SET_SIZE]],
    mut fit: impl FnMut(&[usize; MINIMAL_SET_SIZE]) -> Option<M>,
    mut score: impl FnMut(&M) -> (f32, Vec<bool>),
) -> Option<RansacEstimate<M>> {
    let mut best: Option<RansacEstimate<M>> = None;

    for set in sets {
        let Some(model) = fit(set) else { continue };
        let (current_score, inliers) = score(&model);

        let improved = best.as_ref().map_or(true, |b| current_score > b.score);
        if improved {
            best = Some(RansacEstimate { model, inliers, score: current_score });
        }
    }

    best
}
