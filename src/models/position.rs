//! Antenna position measurement model
//!
//! The positioning sensor (RTK GPS antenna, or a beacon receiver) is mounted
//! at a fixed lever arm from the robot reference point. The sensor reports
//! the world-frame position of the antenna, not of the robot, so the expected
//! reading depends on the heading:
//!
//! ```text
//! z_x = x + cos(θ)·dx − sin(θ)·dy
//! z_y = y + sin(θ)·dx + cos(θ)·dy
//! ```
//!
//! Robot frame is right handed: x = forward, y = left, z = up.

use serde::{Deserialize, Serialize};

use super::MeasurementModel;
use crate::covariance::validate_psd;
use crate::error::{FilterError, FilterResult};
use crate::types::{JacobianPosition, PositionNoise, PositionVec, State, MEASURE_DIM_POSITION};

/// Antenna lever arm in the robot frame [m]
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AntennaOffset {
    /// Distance to the front of the robot reference point
    pub forward: f64,

    /// Distance to the left of the robot reference point
    pub left: f64,
}

impl AntennaOffset {
    pub fn new(forward: f64, left: f64) -> Self {
        Self { forward, left }
    }

    pub fn is_finite(&self) -> bool {
        self.forward.is_finite() && self.left.is_finite()
    }
}

impl Default for AntennaOffset {
    fn default() -> Self {
        Self {
            forward: -0.01,
            left: 0.03,
        }
    }
}

/// How `H` is evaluated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JacobianMode {
    /// Full partials including the heading column
    #[default]
    Analytic,

    /// `H = [I₂ | 0]`: ignores the lever arm rotation. Only exact for a zero
    /// offset; kept to reproduce baselines recorded with that approximation.
    Identity,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PositionMeasurementModel {
    offset: AntennaOffset,
    noise: PositionNoise,
    noise_jacobian: PositionNoise,
    jacobian_mode: JacobianMode,
}

impl PositionMeasurementModel {
    pub fn new(offset: AntennaOffset, noise: PositionNoise) -> FilterResult<Self> {
        if !offset.is_finite() {
            return Err(FilterError::CalibrationMisconfiguration(format!(
                "antenna offset must be finite, got ({}, {})",
                offset.forward, offset.left
            )));
        }
        validate_psd(&noise, "position noise")?;

        Ok(Self {
            offset,
            noise,
            // additive sensor noise, state independent
            noise_jacobian: PositionNoise::identity(),
            jacobian_mode: JacobianMode::Analytic,
        })
    }

    pub fn with_jacobian_mode(mut self, mode: JacobianMode) -> Self {
        self.jacobian_mode = mode;
        self
    }

    pub fn offset(&self) -> &AntennaOffset {
        &self.offset
    }

    pub fn jacobian_mode(&self) -> JacobianMode {
        self.jacobian_mode
    }

    /// Robot reference point that would put the antenna at `z` with heading `theta`
    pub fn reference_point(&self, z: &PositionVec, theta: f64) -> (f64, f64) {
        let (s, c) = theta.sin_cos();
        let (dx, dy) = (self.offset.forward, self.offset.left);
        (z[0] - (c * dx - s * dy), z[1] - (s * dx + c * dy))
    }
}

impl MeasurementModel<MEASURE_DIM_POSITION> for PositionMeasurementModel {
    fn h(&self, x: &State) -> PositionVec {
        let (s, c) = x.theta().sin_cos();
        let (dx, dy) = (self.offset.forward, self.offset.left);
        PositionVec::new(x.x() + c * dx - s * dy, x.y() + s * dx + c * dy)
    }

    fn state_jacobian(&self, x: &State) -> JacobianPosition {
        match self.jacobian_mode {
            JacobianMode::Analytic => {
                let (s, c) = x.theta().sin_cos();
                let (dx, dy) = (self.offset.forward, self.offset.left);
                JacobianPosition::new(
                    1.0, 0.0, -s * dx - c * dy, //
                    0.0, 1.0, c * dx - s * dy,
                )
            }
            JacobianMode::Identity => JacobianPosition::new(
                1.0, 0.0, 0.0, //
                0.0, 1.0, 0.0,
            ),
        }
    }

    fn noise_jacobian(&self) -> PositionNoise {
        self.noise_jacobian
    }

    fn noise_covariance(&self) -> &PositionNoise {
        &self.noise
    }
}
