//! Linear algebra type system for the landmark filters
//!
//! Fixed-size aliases so every EKF product is dimension-checked at compile
//! time. nalgebra provides the arithmetic, inverse and determinant.

use nalgebra::{SMatrix, SVector};

// ===== Landmark State =====
/// Landmark state is (x, y, r, g, b)
pub const LANDMARK_DIM: usize = 5;

// ===== Measurement =====
/// A sighting measures (bearing, r, g, b)
pub const MEASURE_DIM: usize = 4;

pub type LandmarkVec = SVector<f64, LANDMARK_DIM>;
pub type LandmarkCov = SMatrix<f64, LANDMARK_DIM, LANDMARK_DIM>;

pub type MeasurementVec = SVector<f64, MEASURE_DIM>;
pub type MeasurementCov = SMatrix<f64, MEASURE_DIM, MEASURE_DIM>;

pub type MeasurementJacobian = SMatrix<f64, MEASURE_DIM, LANDMARK_DIM>; // 4×5
pub type KalmanGain = SMatrix<f64, LANDMARK_DIM, MEASURE_DIM>; // 5×4

/// Build a landmark covariance from a row-major array (config friendly).
pub fn landmark_cov_from_rows(rows: &[[f64; LANDMARK_DIM]; LANDMARK_DIM]) -> LandmarkCov {
    LandmarkCov::from_fn(|r, c| rows[r][c])
}

/// Build a measurement covariance from a row-major array.
pub fn measurement_cov_from_rows(rows: &[[f64; MEASURE_DIM]; MEASURE_DIM]) -> MeasurementCov {
    MeasurementCov::from_fn(|r, c| rows[r][c])
}

/// Average a square matrix with its transpose.
///
/// Floating-point products drift away from exact symmetry; every stored
/// covariance goes through here.
pub fn symmetrize(m: &LandmarkCov) -> LandmarkCov {
    (m + m.transpose()) * 0.5
}
