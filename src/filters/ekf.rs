//! Extended Kalman Filter for the planar pose (x, y, θ).
//!
//! Predict:  x ← f(x, u),  P ← F·P·Fᵀ + W·Q·Wᵀ
//! Update:   y = z ⊖ h(x),  S = H·P·Hᵀ + V·R·Vᵀ,  K = P·Hᵀ·S⁻¹,
//!           x ← x + K·y,   P ← (I − K·H)·P·(I − K·H)ᵀ + K·V·R·Vᵀ·Kᵀ
//!
//! Jacobians are re-evaluated at the current estimate on every call. A step
//! that fails (non-finite input, singular S, gated innovation, divergence)
//! returns an error and leaves both mean and covariance on their prior.

use log::{debug, trace, warn};
use serde::Serialize;

use crate::covariance::{CovarianceStrategy, SquareRootCovariance, StandardCovariance};
use crate::error::{FilterError, FilterResult};
use crate::health::CovarianceHealth;
use crate::models::{MeasurementModel, SystemModel};
use crate::types::{Control, KalmanGain, MeasVec, State, StateMat, STATE_DIM};

/// Smallest squared Cholesky pivot of S, relative to its largest diagonal
/// entry, accepted as non-singular
const SINGULAR_PIVOT_TOL: f64 = 1e-12;

/// Step counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FilterStats {
    pub predictions: u64,
    pub rejected_predictions: u64,
    pub updates: u64,
    pub rejected_updates: u64,

    /// Rejected updates since the last accepted one (or the last reset)
    pub consecutive_rejections: u32,
}

/// Outcome of an accepted measurement update
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UpdateReport<const M: usize> {
    /// `z ⊖ h(x)` at the prior
    pub innovation: MeasVec<M>,

    /// Normalized innovation squared `yᵀ·S⁻¹·y`
    pub nis: f64,
}

/// Serializable view of the estimate
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EstimateSnapshot {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
    pub covariance: [[f64; STATE_DIM]; STATE_DIM],
    pub covariance_trace: f64,
    pub covariance_form: &'static str,
    pub stats: FilterStats,
}

pub struct ExtendedKalmanFilter<S, C = StandardCovariance> {
    system: S,
    x: State,
    cov: C,
    innovation_gate: Option<f64>,
    stats: FilterStats,
}

/// EKF propagating the lower-triangular covariance square root
pub type SquareRootEkf<S> = ExtendedKalmanFilter<S, SquareRootCovariance>;

impl<S: SystemModel, C: CovarianceStrategy> ExtendedKalmanFilter<S, C> {
    /// Create a filter from a prior mean and covariance
    pub fn new(system: S, x0: State, p0: &StateMat) -> FilterResult<Self> {
        if !x0.is_finite() {
            return Err(FilterError::CalibrationMisconfiguration(
                "initial state must be finite".to_string(),
            ));
        }
        let cov = C::from_covariance(p0)?;

        Ok(Self {
            system,
            x: x0.normalized(),
            cov,
            innovation_gate: None,
            stats: FilterStats::default(),
        })
    }

    /// Reject measurements whose NIS exceeds `gate` (chi-square quantile)
    pub fn with_innovation_gate(mut self, gate: f64) -> FilterResult<Self> {
        if !gate.is_finite() || gate <= 0.0 {
            return Err(FilterError::CalibrationMisconfiguration(format!(
                "innovation gate must be finite and positive, got {}",
                gate
            )));
        }
        self.innovation_gate = Some(gate);
        Ok(self)
    }

    /// Re-initialize mean and covariance. Counters are kept, the rejection
    /// streak is cleared.
    pub fn reset(&mut self, x0: State, p0: &StateMat) -> FilterResult<()> {
        if !x0.is_finite() {
            return Err(FilterError::CalibrationMisconfiguration(
                "reset state must be finite".to_string(),
            ));
        }
        self.cov = C::from_covariance(p0)?;
        self.x = x0.normalized();
        self.stats.consecutive_rejections = 0;
        debug!("[EKF] reset to ({:.3}, {:.3}, {:.3})", self.x.x(), self.x.y(), self.x.theta());
        Ok(())
    }

    pub fn state(&self) -> &State {
        &self.x
    }

    pub fn covariance(&self) -> StateMat {
        self.cov.covariance()
    }

    pub fn covariance_strategy(&self) -> &C {
        &self.cov
    }

    pub fn system(&self) -> &S {
        &self.system
    }

    pub fn innovation_gate(&self) -> Option<f64> {
        self.innovation_gate
    }

    pub fn stats(&self) -> &FilterStats {
        &self.stats
    }

    pub fn health(&self) -> CovarianceHealth {
        CovarianceHealth::assess(&self.cov.covariance())
    }

    pub fn snapshot(&self) -> EstimateSnapshot {
        let p = self.cov.covariance();
        let mut covariance = [[0.0; STATE_DIM]; STATE_DIM];
        for (r, row) in covariance.iter_mut().enumerate() {
            for (c, value) in row.iter_mut().enumerate() {
                *value = p[(r, c)];
            }
        }

        EstimateSnapshot {
            x: self.x.x(),
            y: self.x.y(),
            theta: self.x.theta(),
            covariance,
            covariance_trace: p.trace(),
            covariance_form: C::NAME,
            stats: self.stats,
        }
    }

    /// Time update with control `u`
    pub fn predict(&mut self, u: &Control) -> FilterResult<()> {
        match self.try_predict(u) {
            Ok(()) => {
                self.stats.predictions += 1;
                trace!(
                    "[EKF] predict v={:.3} w={:.3} -> ({:.3}, {:.3}, {:.3})",
                    u.velocity,
                    u.turn_rate,
                    self.x.x(),
                    self.x.y(),
                    self.x.theta()
                );
                Ok(())
            }
            Err(e) => {
                self.stats.rejected_predictions += 1;
                warn!("[EKF] predict rejected: {}", e);
                Err(e)
            }
        }
    }

    fn try_predict(&mut self, u: &Control) -> FilterResult<()> {
        if !u.is_finite() {
            return Err(FilterError::InvalidInput("control"));
        }

        // Linearize at the prior before moving the mean
        let f = self.system.state_jacobian(&self.x, u);
        let w = self.system.noise_jacobian(&self.x, u);
        let x_new = self.system.f(&self.x, u);
        if !x_new.is_finite() {
            return Err(FilterError::Divergence(
                "motion model produced a non-finite state".to_string(),
            ));
        }

        let mut cov = self.cov.clone();
        cov.propagate(&f, &w, self.system.noise_covariance())?;
        cov.check()?;

        self.x = x_new.normalized();
        self.cov = cov;
        Ok(())
    }

    /// Measurement update with sensor `model` and reading `z`
    pub fn update<H, const M: usize>(
        &mut self,
        model: &H,
        z: impl Into<MeasVec<M>>,
    ) -> FilterResult<UpdateReport<M>>
    where
        H: MeasurementModel<M>,
    {
        let z = z.into();
        match self.try_update(model, &z) {
            Ok(report) => {
                self.stats.updates += 1;
                self.stats.consecutive_rejections = 0;
                trace!("[EKF] update accepted (NIS {:.3})", report.nis);
                Ok(report)
            }
            Err(e) => {
                self.stats.rejected_updates += 1;
                self.stats.consecutive_rejections += 1;
                warn!(
                    "[EKF] measurement rejected ({} in a row): {}",
                    self.stats.consecutive_rejections, e
                );
                Err(e)
            }
        }
    }

    fn try_update<H, const M: usize>(
        &mut self,
        model: &H,
        z: &MeasVec<M>,
    ) -> FilterResult<UpdateReport<M>>
    where
        H: MeasurementModel<M>,
    {
        if z.iter().any(|v| !v.is_finite()) {
            return Err(FilterError::InvalidInput("measurement"));
        }

        let predicted = model.h(&self.x);
        let h = model.state_jacobian(&self.x);
        let v = model.noise_jacobian();
        let r = model.noise_covariance();
        let innovation = model.residual(z, &predicted);

        let s = self.cov.innovation_covariance(&h, &v, r);
        if s.iter().any(|e| !e.is_finite()) {
            return Err(FilterError::SingularCovariance);
        }
        let chol = s.cholesky().ok_or(FilterError::SingularCovariance)?;

        // Round-off can leave a rank-deficient S with a tiny positive pivot
        let min_pivot = chol.l_dirty().diagonal().map(|d| d * d).min();
        if !(min_pivot >= SINGULAR_PIVOT_TOL * s.diagonal().max()) {
            return Err(FilterError::SingularCovariance);
        }

        let nis = innovation.dot(&chol.solve(&innovation));
        if let Some(gate) = self.innovation_gate {
            if nis > gate {
                return Err(FilterError::InnovationGated { nis, gate });
            }
        }

        // K = P·Hᵀ·S⁻¹, solved as Kᵀ = S⁻¹·(H·P) since P and S are symmetric
        let p = self.cov.covariance();
        let k: KalmanGain<M> = chol.solve(&(h * p)).transpose();

        let x_new = State::from_vector(self.x.as_vector() + k * innovation).normalized();
        if !x_new.is_finite() {
            return Err(FilterError::Divergence(
                "correction produced a non-finite state".to_string(),
            ));
        }

        let mut cov = self.cov.clone();
        cov.correct(&k, &h, &v, r)?;
        cov.check()?;

        self.x = x_new;
        self.cov = cov;
        Ok(UpdateReport { innovation, nis })
    }
}
