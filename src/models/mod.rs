//! Process and measurement models.
//!
//! Models are pure functions of (state, input, calibration): every Jacobian is
//! evaluated at the linearization point passed in, nothing is cached between
//! calls.

pub mod heading;
pub mod position;
pub mod unicycle;

pub use heading::HeadingMeasurementModel;
pub use position::{AntennaOffset, JacobianMode, PositionMeasurementModel};
pub use unicycle::UnicycleModel;

use crate::types::{Control, MeasJacobian, MeasMat, MeasVec, State, StateMat};

/// Nonlinear state transition `x' = f(x, u, w)` linearized about `(x, u, 0)`.
pub trait SystemModel {
    /// Predicted state for one step
    fn f(&self, x: &State, u: &Control) -> State;

    /// `F = ∂f/∂x` at `(x, u)`
    fn state_jacobian(&self, x: &State, u: &Control) -> StateMat;

    /// `W = ∂f/∂w` at `(x, u)`
    fn noise_jacobian(&self, x: &State, u: &Control) -> StateMat;

    /// Process noise covariance `Q`
    fn noise_covariance(&self) -> &StateMat;
}

/// Nonlinear observation `z = h(x) + V·v` of dimension `M`.
pub trait MeasurementModel<const M: usize> {
    /// Expected measurement in state `x`
    fn h(&self, x: &State) -> MeasVec<M>;

    /// `H = ∂h/∂x` at `x`
    fn state_jacobian(&self, x: &State) -> MeasJacobian<M>;

    /// `V = ∂h/∂v`
    fn noise_jacobian(&self) -> MeasMat<M>;

    /// Measurement noise covariance `R`
    fn noise_covariance(&self) -> &MeasMat<M>;

    /// Innovation `z − ẑ`. Models with angular components override this.
    fn residual(&self, z: &MeasVec<M>, predicted: &MeasVec<M>) -> MeasVec<M> {
        z - predicted
    }
}

/// Forward-difference Jacobian used to cross-check the analytic ones.
///
/// Step `h_j = √ε · max(|x_j|, 1)`; `diff` maps output pairs to their
/// difference so angular outputs can wrap.
#[cfg(test)]
pub(crate) fn fd_jacobian<const M: usize>(
    f: impl Fn(&State) -> MeasVec<M>,
    diff: impl Fn(&MeasVec<M>, &MeasVec<M>) -> MeasVec<M>,
    x: &State,
) -> MeasJacobian<M> {
    let f0 = f(x);
    let mut jac = MeasJacobian::<M>::zeros();

    for j in 0..crate::types::STATE_DIM {
        let xj = x.as_vector()[j];
        let step = f64::EPSILON.sqrt() * xj.abs().max(1.0);
        let mut perturbed = *x.as_vector();
        perturbed[j] = xj + step;
        let f1 = f(&State::from_vector(perturbed));

        jac.set_column(j, &(diff(&f1, &f0) / step));
    }

    jac
}
