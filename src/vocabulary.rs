//! Bag-of-Words vocabulary interface.
//!
//! The vocabulary tree itself (training, storage, quantization) lives
//! outside this crate; frames only need the transform that turns their
//! descriptors into the two lookup structures used by place recognition
//! and accelerated matching.

use std::collections::HashMap;

use crate::features::Descriptor;

/// Histogram of visual-word occurrences: word_id -> weight.
pub type BowVector = HashMap<u32, f32>;

/// Feature grouping by vocabulary node: node_id -> descriptor indices.
///
/// Nodes are taken `levels_up` levels above the leaves so features that
/// quantize to nearby words share a group.
pub type FeatureVector = HashMap<u32, Vec<usize>>;

/// Default number of levels above the leaves used for feature grouping.
pub const BOW_LEVELS_UP: usize = 4;

/// Interface to the vocabulary collaborator.
pub trait Vocabulary {
    /// Quantize a frame's descriptors into a word histogram and a
    /// node-grouped feature index.
    fn transform(&self, descriptors: &[Descriptor], levels_up: usize) -> (BowVector, FeatureVector);
}
