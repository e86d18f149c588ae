use super::MeasurementModel;
use crate::covariance::validate_psd;
use crate::error::FilterResult;
use crate::types::{
    angle_diff, wrap_angle, HeadingNoise, HeadingVec, JacobianHeading, State, MEASURE_DIM_HEADING,
};

/// Absolute heading sensor (compass, dual-antenna GPS, IMU yaw).
///
/// Innovations are wrapped to (-π, π] so a reading of 179° against an
/// estimate of −179° is a 2° correction, not 358°.
#[derive(Clone, Debug, PartialEq)]
pub struct HeadingMeasurementModel {
    noise: HeadingNoise,
}

impl HeadingMeasurementModel {
    /// Create from the heading noise variance [rad²]
    pub fn new(variance: f64) -> FilterResult<Self> {
        let noise = HeadingNoise::new(variance);
        validate_psd(&noise, "heading noise")?;
        Ok(Self { noise })
    }
}

impl MeasurementModel<MEASURE_DIM_HEADING> for HeadingMeasurementModel {
    fn h(&self, x: &State) -> HeadingVec {
        HeadingVec::new(wrap_angle(x.theta()))
    }

    fn state_jacobian(&self, _x: &State) -> JacobianHeading {
        JacobianHeading::new(0.0, 0.0, 1.0)
    }

    fn noise_jacobian(&self) -> HeadingNoise {
        HeadingNoise::identity()
    }

    fn noise_covariance(&self) -> &HeadingNoise {
        &self.noise
    }

    fn residual(&self, z: &HeadingVec, predicted: &HeadingVec) -> HeadingVec {
        HeadingVec::new(angle_diff(z[0], predicted[0]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    fn test_residual_wraps_across_seam() {
        let m = HeadingMeasurementModel::new(0.01).unwrap();
        let predicted = m.h(&State::new(0.0, 0.0, -PI + 0.05));
        let z = HeadingVec::new(PI - 0.05);

        let y = m.residual(&z, &predicted);
        assert_relative_eq!(y[0], -0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_h_wraps_unwrapped_state() {
        let m = HeadingMeasurementModel::new(0.01).unwrap();
        let z = m.h(&State::new(0.0, 0.0, 2.0 * PI + 0.3));
        assert_relative_eq!(z[0], 0.3, epsilon = 1e-12);
    }

    #[test]
    fn test_rejects_negative_variance() {
        assert!(HeadingMeasurementModel::new(-1e-3).is_err());
        assert!(HeadingMeasurementModel::new(f64::NAN).is_err());
    }
}
