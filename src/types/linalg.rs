//! Linear algebra type system for the pose filter
//!
//! Provides compile-time dimension checking and clean type aliases
//! for the state, measurement and Jacobian matrices.

use nalgebra::{SMatrix, SVector};

// ===== State Dimensions =====
pub const STATE_DIM: usize = 3; // (x, y, theta)

// ===== Measurement Dimensions =====
pub const MEASURE_DIM_POSITION: usize = 2; // antenna (x, y)
pub const MEASURE_DIM_HEADING: usize = 1; // theta

// ===== State Types =====
pub type StateVec = SVector<f64, STATE_DIM>;
pub type StateMat = SMatrix<f64, STATE_DIM, STATE_DIM>;

// ===== Generic Measurement Types =====
pub type MeasVec<const M: usize> = SVector<f64, M>;
pub type MeasMat<const M: usize> = SMatrix<f64, M, M>;

// Jacobian of h w.r.t. the state (M×3)
pub type MeasJacobian<const M: usize> = SMatrix<f64, M, STATE_DIM>;

// Kalman gain (3×M)
pub type KalmanGain<const M: usize> = SMatrix<f64, STATE_DIM, M>;

// ===== Sensor Shortcuts =====
pub type PositionVec = MeasVec<MEASURE_DIM_POSITION>;
pub type PositionNoise = MeasMat<MEASURE_DIM_POSITION>;
pub type JacobianPosition = MeasJacobian<MEASURE_DIM_POSITION>; // 2×3
pub type HeadingVec = MeasVec<MEASURE_DIM_HEADING>;
pub type HeadingNoise = MeasMat<MEASURE_DIM_HEADING>;
pub type JacobianHeading = MeasJacobian<MEASURE_DIM_HEADING>; // 1×3
