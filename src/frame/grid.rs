//! Uniform 2D grid over the undistorted image used for fast area
//! queries during feature matching.
//!
//! Cell geometry is fixed per session (it depends only on the image
//! bounds), so matching reduces candidate sets from all keypoints to the
//! few cells a search window overlaps.

use crate::camera::CalibrationContext;
use crate::features::KeyPoint;

/// Grid columns over the undistorted image width.
pub const FRAME_GRID_COLS: usize = 64;
/// Grid rows over the undistorted image height.
pub const FRAME_GRID_ROWS: usize = 48;

/// Fixed-cell index from undistorted pixel coordinates to keypoint
/// indices.
#[derive(Debug, Clone)]
pub struct GridIndex {
    /// Row-major cells: `cells[row * FRAME_GRID_COLS + col]`.
    cells: Vec<Vec<usize>>,
    min_x: f32,
    min_y: f32,
    width_inv: f32,
    height_inv: f32,
}

impl GridIndex {
    /// Create an empty grid with `reserve` slots per cell.
    pub fn new(calib: &CalibrationContext, reserve: usize) -> Self {
        let mut cells = vec![Vec::new(); FRAME_GRID_COLS * FRAME_GRID_ROWS];
        if reserve > 0 {
            for cell in &mut cells {
                cell.reserve(reserve);
            }
        }
        Self {
            cells,
            min_x: calib.bounds.min_x,
            min_y: calib.bounds.min_y,
            width_inv: calib.grid_element_width_inv,
            height_inv: calib.grid_element_height_inv,
        }
    }

    /// Cell position of an undistorted coordinate, or `None` when it
    /// falls outside the grid (undistortion can push points past the
    /// nominal bounds).
    fn cell_of(&self, x: f32, y: f32) -> Option<(usize, usize)> {
        let cx = ((x - self.min_x) * self.width_inv).round() as i32;
        let cy = ((y - self.min_y) * self.height_inv).round() as i32;
        if cx < 0 || cx >= FRAME_GRID_COLS as i32 || cy < 0 || cy >= FRAME_GRID_ROWS as i32 {
            return None;
        }
        Some((cx as usize, cy as usize))
    }

    /// Insert keypoint `index` at its undistorted coordinate. Points
    /// outside the grid are silently skipped; returns whether the point
    /// landed in a cell.
    pub fn insert(&mut self, index: usize, x: f32, y: f32) -> bool {
        match self.cell_of(x, y) {
            Some((cx, cy)) => {
                self.cells[cy * FRAME_GRID_COLS + cx].push(index);
                true
            }
            None => false,
        }
    }

    /// Indices of keypoints within the square window `|dx| < r`,
    /// `|dy| < r` around `(x, y)`, restricted to pyramid levels
    /// `[min_level, max_level]`. A negative level bound is unbounded.
    /// Result order is unspecified.
    pub fn query(
        &self,
        keypoints: &[KeyPoint],
        x: f32,
        y: f32,
        r: f32,
        min_level: i32,
        max_level: i32,
    ) -> Vec<usize> {
        let mut indices = Vec::with_capacity(keypoints.len());

        let min_cell_x = (((x - self.min_x - r) * self.width_inv).floor() as i32).max(0);
        if min_cell_x >= FRAME_GRID_COLS as i32 {
            return indices;
        }
        let max_cell_x =
            (((x - self.min_x + r) * self.width_inv).ceil() as i32).min(FRAME_GRID_COLS as i32 - 1);
        if max_cell_x < 0 {
            return indices;
        }

        let min_cell_y = (((y - self.min_y - r) * self.height_inv).floor() as i32).max(0);
        if min_cell_y >= FRAME_GRID_ROWS as i32 {
            return indices;
        }
        let max_cell_y =
            (((y - self.min_y + r) * self.height_inv).ceil() as i32).min(FRAME_GRID_ROWS as i32 - 1);
        if max_cell_y < 0 {
            return indices;
        }

        for cy in min_cell_y..=max_cell_y {
            for cx in min_cell_x..=max_cell_x {
                let cell = &self.cells[cy as usize * FRAME_GRID_COLS + cx as usize];
                for &idx in cell {
                    let kp = &keypoints[idx];
                    if min_level >= 0 && (kp.octave as i32) < min_level {
                        continue;
                    }
                    if max_level >= 0 && (kp.octave as i32) > max_level {
                        continue;
                    }
                    if (kp.x - x).abs() < r && (kp.y - y).abs() < r {
                        indices.push(idx);
                    }
                }
            }
        }

        indices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CalibrationContext, Distortion, PinholeCamera};

    fn context() -> CalibrationContext {
        let cam = PinholeCamera::new(500.0, 500.0, 320.0, 240.0, Distortion::none(), 0.0, 0.0);
        CalibrationContext::new(cam, 640, 480).unwrap()
    }

    fn kp(x: f32, y: f32, octave: usize) -> KeyPoint {
        KeyPoint { x, y, octave, response: 0.0, angle: 0.0 }
    }

    #[test]
    fn every_interior_point_is_retrievable() {
        let calib = context();
        let keypoints: Vec<KeyPoint> = (0..100)
            .map(|i| kp(6.2 * i as f32 + 3.0, 4.6 * (i % 50) as f32 + 2.0, i % 8))
            .collect();

        let mut grid = GridIndex::new(&calib, 0);
        for (i, k) in keypoints.iter().enumerate() {
            assert!(grid.insert(i, k.x, k.y));
        }

        for (i, k) in keypoints.iter().enumerate() {
            let found = grid.query(&keypoints, k.x, k.y, 0.5, -1, -1);
            assert!(found.contains(&i), "keypoint {i} not found at its own position");
        }
    }

    #[test]
    fn out_of_bounds_points_are_skipped() {
        let calib = context();
        let mut grid = GridIndex::new(&calib, 0);
        assert!(!grid.insert(0, -20.0, 10.0));
        assert!(!grid.insert(1, 10.0, 1000.0));

        let keypoints = vec![kp(-20.0, 10.0, 0), kp(10.0, 1000.0, 0)];
        assert!(grid.query(&keypoints, 10.0, 10.0, 50.0, -1, -1).is_empty());
    }

    #[test]
    fn query_far_outside_grid_is_empty() {
        let calib = context();
        let keypoints = vec![kp(320.0, 240.0, 0)];
        let mut grid = GridIndex::new(&calib, 0);
        grid.insert(0, 320.0, 240.0);

        assert!(grid.query(&keypoints, 10_000.0, 240.0, 5.0, -1, -1).is_empty());
        assert!(grid.query(&keypoints, -10_000.0, 240.0, 5.0, -1, -1).is_empty());
    }

    #[test]
    fn level_bounds_filter_results() {
        let calib = context();
        let keypoints = vec![kp(100.0, 100.0, 0), kp(101.0, 100.0, 2), kp(102.0, 100.0, 5)];
        let mut grid = GridIndex::new(&calib, 0);
        for (i, k) in keypoints.iter().enumerate() {
            grid.insert(i, k.x, k.y);
        }

        let all = grid.query(&keypoints, 101.0, 100.0, 5.0, -1, -1);
        assert_eq!(all.len(), 3);

        let mid = grid.query(&keypoints, 101.0, 100.0, 5.0, 1, 4);
        assert_eq!(mid, vec![1]);

        let coarse = grid.query(&keypoints, 101.0, 100.0, 5.0, 3, -1);
        assert_eq!(coarse, vec![2]);
    }
}
