use super::SystemModel;
use crate::covariance::validate_psd;
use crate::error::{FilterError, FilterResult};
use crate::types::{wrap_angle, Control, State, StateMat};

/// Below this half-angle `sin(a)/a` switches to its Taylor series
const SINC_SERIES_THRESHOLD: f64 = 1e-4;

/// `sin(a)/a`, smooth through `a = 0`
fn sinc(a: f64) -> f64 {
    if a.abs() < SINC_SERIES_THRESHOLD {
        1.0 - a * a / 6.0
    } else {
        a.sin() / a
    }
}

/// Velocity / turn-rate (differential drive) motion model.
///
/// Integrates the exact circular arc over one step of length `dt`:
///
/// ```text
/// a  = ω·dt/2
/// d  = v·dt·sinc(a)          chord length
/// x' = x + d·cos(θ + a)
/// y' = y + d·sin(θ + a)
/// θ' = wrap(θ + ω·dt)
/// ```
///
/// The chord form reduces to straight-line motion as ω → 0 without a
/// division by ω. Process noise `(forward, lateral, heading)` enters in the
/// body frame at the mid-step heading, so `W` is that rotation.
#[derive(Clone, Debug, PartialEq)]
pub struct UnicycleModel {
    dt: f64,
    process_noise: StateMat,
}

impl UnicycleModel {
    /// Create a model with step length `dt` [s] and body-frame noise `Q`.
    pub fn new(dt: f64, process_noise: StateMat) -> FilterResult<Self> {
        if !dt.is_finite() || dt <= 0.0 {
            return Err(FilterError::CalibrationMisconfiguration(format!(
                "time step must be finite and positive, got {}",
                dt
            )));
        }
        validate_psd(&process_noise, "process noise")?;

        Ok(Self { dt, process_noise })
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Chord displacement `(dx, dy)` and mid-step heading for one step
    fn displacement(&self, x: &State, u: &Control) -> (f64, f64, f64) {
        let half_turn = 0.5 * u.turn_rate * self.dt;
        let chord = u.velocity * self.dt * sinc(half_turn);
        let mid_heading = x.theta() + half_turn;
        (
            chord * mid_heading.cos(),
            chord * mid_heading.sin(),
            mid_heading,
        )
    }
}

impl SystemModel for UnicycleModel {
    fn f(&self, x: &State, u: &Control) -> State {
        let (dx, dy, _) = self.displacement(x, u);
        State::new(
            x.x() + dx,
            x.y() + dy,
            wrap_angle(x.theta() + u.turn_rate * self.dt),
        )
    }

    fn state_jacobian(&self, x: &State, u: &Control) -> StateMat {
        let (dx, dy, _) = self.displacement(x, u);
        StateMat::new(
            1.0, 0.0, -dy, //
            0.0, 1.0, dx, //
            0.0, 0.0, 1.0,
        )
    }

    fn noise_jacobian(&self, x: &State, u: &Control) -> StateMat {
        let (_, _, mid_heading) = self.displacement(x, u);
        let (s, c) = mid_heading.sin_cos();
        StateMat::new(
            c, -s, 0.0, //
            s, c, 0.0, //
            0.0, 0.0, 1.0,
        )
    }

    fn noise_covariance(&self) -> &StateMat {
        &self.process_noise
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fd_jacobian;
    use crate::types::{angle_diff, StateVec};
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::f64::consts::{FRAC_PI_2, PI};

    fn model(dt: f64) -> UnicycleModel {
        UnicycleModel::new(dt, StateMat::identity() * 1e-3).unwrap()
    }

    fn state_diff(a: &StateVec, b: &StateVec) -> StateVec {
        StateVec::new(a[0] - b[0], a[1] - b[1], angle_diff(a[2], b[2]))
    }

    #[test]
    fn test_straight_line() {
        let m = model(0.5);
        let next = m.f(&State::new(1.0, 2.0, FRAC_PI_2), &Control::new(2.0, 0.0));

        assert_relative_eq!(next.x(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(next.y(), 3.0, epsilon = 1e-12);
        assert_relative_eq!(next.theta(), FRAC_PI_2, epsilon = 1e-12);
    }

    #[test]
    fn test_quarter_circle() {
        // v = 1 m/s, ω = π/2 rad/s for 1 s: quarter circle of radius 2/π
        let m = model(1.0);
        let next = m.f(&State::default(), &Control::new(1.0, FRAC_PI_2));
        let radius = 2.0 / PI;

        assert_relative_eq!(next.x(), radius, epsilon = 1e-12);
        assert_relative_eq!(next.y(), radius, epsilon = 1e-12);
        assert_relative_eq!(next.theta(), FRAC_PI_2, epsilon = 1e-12);
    }

    #[test]
    fn test_near_zero_turn_rate_is_continuous() {
        let m = model(0.1);
        let x = State::new(0.3, -0.2, 0.7);
        let straight = m.f(&x, &Control::new(1.5, 0.0));

        for omega in [1e-12, -1e-9, 1e-6, 1e-3] {
            let curved = m.f(&x, &Control::new(1.5, omega));
            assert!(curved.is_finite());
            assert!((curved.x() - straight.x()).abs() < 1e-3 * 0.15 + 1e-12);
            assert!((curved.y() - straight.y()).abs() < 1e-3 * 0.15 + 1e-12);
        }

        let tiny = m.f(&x, &Control::new(1.5, 1e-12));
        assert_relative_eq!(tiny.x(), straight.x(), epsilon = 1e-14);
        assert_relative_eq!(tiny.y(), straight.y(), epsilon = 1e-14);
    }

    #[test]
    fn test_sinc_series_matches_closed_form_at_threshold() {
        let a = SINC_SERIES_THRESHOLD;
        assert_relative_eq!(1.0 - a * a / 6.0, a.sin() / a, epsilon = 1e-15);
        assert_eq!(sinc(0.0), 1.0);
    }

    #[test]
    fn test_state_jacobian_matches_finite_differences() {
        let mut rng = StdRng::seed_from_u64(7);
        let m = model(0.2);

        for _ in 0..200 {
            let x = State::new(
                rng.gen_range(-10.0..10.0),
                rng.gen_range(-10.0..10.0),
                rng.gen_range(-PI + 0.01..PI),
            );
            let u = Control::new(rng.gen_range(-2.0..2.0), rng.gen_range(-1.5..1.5));

            let analytic = m.state_jacobian(&x, &u);
            let numeric = fd_jacobian(|s| *m.f(s, &u).as_vector(), state_diff, &x);

            for (a, n) in analytic.iter().zip(numeric.iter()) {
                assert!(
                    (a - n).abs() <= 1e-4 * a.abs().max(1.0),
                    "analytic {} vs numeric {}",
                    a,
                    n
                );
            }
        }
    }

    #[test]
    fn test_noise_jacobian_is_rotation() {
        let m = model(0.1);
        let x = State::new(0.0, 0.0, 1.2);
        let u = Control::new(1.0, 0.4);
        let w = m.noise_jacobian(&x, &u);

        assert_relative_eq!(w * w.transpose(), StateMat::identity(), epsilon = 1e-12);
        assert_relative_eq!(w.determinant(), 1.0, epsilon = 1e-12);

        // isotropic planar noise is invariant under the rotation
        let q = StateMat::from_diagonal(&StateVec::new(0.3, 0.3, 0.01));
        assert_relative_eq!(w * q * w.transpose(), q, epsilon = 1e-12);
    }

    #[test]
    fn test_rejects_bad_calibration() {
        assert!(UnicycleModel::new(0.0, StateMat::identity()).is_err());
        assert!(UnicycleModel::new(f64::NAN, StateMat::identity()).is_err());

        let mut q = StateMat::identity();
        q[(0, 1)] = 0.5;
        assert!(matches!(
            UnicycleModel::new(0.1, q),
            Err(FilterError::CalibrationMisconfiguration(_))
        ));
    }
}
