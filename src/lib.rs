//! Geometric front-end for feature-based visual SLAM.
//!
//! Turns incoming images (monocular, rectified stereo, or RGB-D) into
//! [`frame::Frame`]s: undistorted keypoints with descriptors,
//! per-keypoint depth where a depth source exists, and a grid index for
//! fast area queries. For monocular sessions, [`init::Initializer`]
//! bootstraps the map with a two-view reconstruction.
//!
//! Feature extraction, the vocabulary and the map store are external
//! collaborators behind the traits in [`features`] and [`vocabulary`].

pub mod camera;
pub mod error;
pub mod features;
pub mod frame;
pub mod geometry;
pub mod init;
pub mod map_point;
pub mod vocabulary;
