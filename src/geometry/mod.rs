//! Geometry utilities: typed SE(3) poses and projective kernels.

pub mod kernels;
pub mod se3;

pub use kernels::{
    compute_fundamental, compute_homography, decompose_essential, normalize_points,
    projection_matrix, skew_symmetric, triangulate, ProjectionMatrix,
};
pub use se3::CameraPose;
