//! Error taxonomy for the front-end.
//!
//! Only genuinely unrecoverable inputs surface as errors; per-keypoint
//! failures (no stereo match, out-of-bounds coordinate) stay in-band as
//! `-1` sentinels or are silently dropped.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrontendError {
    /// Calibration that cannot produce a usable frame (e.g. fx = 0).
    #[error("degenerate calibration: {0}")]
    BadCalibration(&'static str),

    /// Image dimensions that leave no pixels to work with.
    #[error("empty image: {width}x{height}")]
    EmptyImage { width: u32, height: u32 },
}
