pub mod linalg;

pub use linalg::*;

use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, TAU};

/// Wrap an angle to (-π, π].
pub fn wrap_angle(angle: f64) -> f64 {
    if angle > -PI && angle <= PI {
        return angle;
    }
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI {
        wrapped + TAU
    } else {
        wrapped
    }
}

/// Shortest signed rotation taking `b` onto `a`, in (-π, π].
pub fn angle_diff(a: f64, b: f64) -> f64 {
    wrap_angle(a - b)
}

/// Robot pose estimate: position in the world frame [m] and heading [rad].
///
/// Heading is counter-clockwise from the world x-axis. Storage does not force
/// wrapping; use [`State::heading`] or [`angle_diff`] before comparing angles.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct State {
    vector: StateVec,
}

impl State {
    pub const X: usize = 0;
    pub const Y: usize = 1;
    pub const THETA: usize = 2;

    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Self {
            vector: StateVec::new(x, y, theta),
        }
    }

    pub fn from_vector(vector: StateVec) -> Self {
        Self { vector }
    }

    pub fn as_vector(&self) -> &StateVec {
        &self.vector
    }

    pub fn x(&self) -> f64 {
        self.vector[Self::X]
    }

    pub fn y(&self) -> f64 {
        self.vector[Self::Y]
    }

    pub fn theta(&self) -> f64 {
        self.vector[Self::THETA]
    }

    pub fn x_mut(&mut self) -> &mut f64 {
        &mut self.vector[Self::X]
    }

    pub fn y_mut(&mut self) -> &mut f64 {
        &mut self.vector[Self::Y]
    }

    pub fn theta_mut(&mut self) -> &mut f64 {
        &mut self.vector[Self::THETA]
    }

    /// Heading wrapped to (-π, π]
    pub fn heading(&self) -> f64 {
        wrap_angle(self.theta())
    }

    /// Copy of this state with the heading wrapped to (-π, π]
    pub fn normalized(&self) -> Self {
        Self::new(self.x(), self.y(), self.heading())
    }

    pub fn is_finite(&self) -> bool {
        self.vector.iter().all(|v| v.is_finite())
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }
}

/// Commanded motion for one step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Control {
    /// Forward velocity [m/s]
    pub velocity: f64,

    /// Turn rate, counter-clockwise positive [rad/s]
    pub turn_rate: f64,
}

impl Control {
    pub fn new(velocity: f64, turn_rate: f64) -> Self {
        Self {
            velocity,
            turn_rate,
        }
    }

    pub fn velocity(&self) -> f64 {
        self.velocity
    }

    pub fn turn_rate(&self) -> f64 {
        self.turn_rate
    }

    pub fn velocity_mut(&mut self) -> &mut f64 {
        &mut self.velocity
    }

    pub fn turn_rate_mut(&mut self) -> &mut f64 {
        &mut self.turn_rate
    }

    pub fn is_finite(&self) -> bool {
        self.velocity.is_finite() && self.turn_rate.is_finite()
    }
}

/// Antenna position reported by the positioning sensor, world frame [m].
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionMeasurement {
    pub x_pos: f64,
    pub y_pos: f64,
}

impl PositionMeasurement {
    pub fn new(x_pos: f64, y_pos: f64) -> Self {
        Self { x_pos, y_pos }
    }

    pub fn x_pos(&self) -> f64 {
        self.x_pos
    }

    pub fn y_pos(&self) -> f64 {
        self.y_pos
    }

    pub fn x_pos_mut(&mut self) -> &mut f64 {
        &mut self.x_pos
    }

    pub fn y_pos_mut(&mut self) -> &mut f64 {
        &mut self.y_pos
    }

    pub fn from_vector(z: &PositionVec) -> Self {
        Self::new(z[0], z[1])
    }
}

impl From<PositionMeasurement> for PositionVec {
    fn from(m: PositionMeasurement) -> Self {
        PositionVec::new(m.x_pos, m.y_pos)
    }
}

/// Absolute heading reported by a compass-like sensor [rad].
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HeadingMeasurement {
    pub heading: f64,
}

impl HeadingMeasurement {
    pub fn new(heading: f64) -> Self {
        Self { heading }
    }
}

impl From<HeadingMeasurement> for HeadingVec {
    fn from(m: HeadingMeasurement) -> Self {
        HeadingVec::new(m.heading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_angle_range() {
        assert!((wrap_angle(0.0)).abs() < 1e-15);
        assert!((wrap_angle(PI) - PI).abs() < 1e-12);
        assert!((wrap_angle(-PI) - PI).abs() < 1e-12);
        assert!((wrap_angle(3.0 * PI) - PI).abs() < 1e-12);
        assert!((wrap_angle(TAU + 0.5) - 0.5).abs() < 1e-12);
        assert!((wrap_angle(-TAU - 0.5) + 0.5).abs() < 1e-12);

        for i in -200..200 {
            let a = wrap_angle(i as f64 * 0.37);
            assert!(a > -PI && a <= PI, "{} out of range", a);
        }
    }

    #[test]
    fn test_wrap_angle_keeps_in_range_angles_exact() {
        for i in 0..1000 {
            let a = -PI + (i as f64 + 0.5) * TAU / 1000.0;
            assert_eq!(wrap_angle(a).to_bits(), a.to_bits(), "{} changed", a);
        }
        assert_eq!(wrap_angle(0.4), 0.4);
        assert_eq!(wrap_angle(PI), PI);
        assert_eq!(State::new(1.0, 2.0, 0.4).normalized(), State::new(1.0, 2.0, 0.4));
    }

    #[test]
    fn test_angle_diff_across_seam() {
        let d = angle_diff(PI - 0.1, -PI + 0.1);
        assert!((d + 0.2).abs() < 1e-12);

        let d = angle_diff(-PI + 0.1, PI - 0.1);
        assert!((d - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_state_accessors() {
        let mut s = State::new(1.0, 2.0, 3.0);
        assert_eq!(s.x(), 1.0);
        assert_eq!(s.y(), 2.0);
        assert_eq!(s.theta(), 3.0);

        *s.x_mut() = -4.0;
        *s.y_mut() += 1.0;
        *s.theta_mut() = 4.0;
        assert_eq!(s.as_vector(), &StateVec::new(-4.0, 3.0, 4.0));
        assert!((s.heading() - (4.0 - TAU)).abs() < 1e-12);
        assert!((s.normalized().theta() - (4.0 - TAU)).abs() < 1e-12);
    }

    #[test]
    fn test_non_finite_detection() {
        assert!(State::new(0.0, 0.0, 0.0).is_finite());
        assert!(!State::new(f64::NAN, 0.0, 0.0).is_finite());
        assert!(!Control::new(1.0, f64::INFINITY).is_finite());
        assert!(Control::new(1.0, -0.5).is_finite());
    }

    #[test]
    fn test_measurement_vectors() {
        let z: PositionVec = PositionMeasurement::new(1.5, -2.5).into();
        assert_eq!(z, PositionVec::new(1.5, -2.5));
        assert_eq!(PositionMeasurement::from_vector(&z).y_pos(), -2.5);

        let h: HeadingVec = HeadingMeasurement::new(0.25).into();
        assert_eq!(h[0], 0.25);
    }
}
