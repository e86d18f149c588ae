//! Covariance representations for the pose filter.
//!
//! The filter is generic over [`CovarianceStrategy`] so the same predict/update
//! recursion can run on a full covariance matrix ([`StandardCovariance`]) or on
//! its lower-triangular square root ([`SquareRootCovariance`], `P = S·Sᵀ`).
//! Both must produce the same mean and covariance to numerical tolerance.

pub mod square_root;
pub mod standard;

pub use square_root::SquareRootCovariance;
pub use standard::StandardCovariance;

use std::fmt;

use nalgebra::{DMatrix, SMatrix};

use crate::error::{FilterError, FilterResult};
use crate::types::{KalmanGain, MeasJacobian, MeasMat, StateMat, STATE_DIM};

/// Relative tolerance for symmetry and PSD checks
const SYMMETRY_TOL: f64 = 1e-9;
const PSD_TOL: f64 = 1e-9;

/// Shared update contract of the covariance representations.
///
/// Every mutating method either succeeds or leaves `self` untouched.
pub trait CovarianceStrategy: Clone + fmt::Debug {
    /// Short name used in logs and snapshots
    const NAME: &'static str;

    /// Build from a full covariance matrix (must be symmetric PSD)
    fn from_covariance(p: &StateMat) -> FilterResult<Self>;

    /// Full covariance matrix
    fn covariance(&self) -> StateMat;

    /// Time update: `P ← F·P·Fᵀ + W·Q·Wᵀ`
    fn propagate(&mut self, f: &StateMat, w: &StateMat, q: &StateMat) -> FilterResult<()>;

    /// Innovation covariance `H·P·Hᵀ + V·R·Vᵀ`
    fn innovation_covariance<const M: usize>(
        &self,
        h: &MeasJacobian<M>,
        v: &MeasMat<M>,
        r: &MeasMat<M>,
    ) -> MeasMat<M>;

    /// Measurement update with gain `K`:
    /// `P ← (I − K·H)·P·(I − K·H)ᵀ + K·V·R·Vᵀ·Kᵀ`
    fn correct<const M: usize>(
        &mut self,
        k: &KalmanGain<M>,
        h: &MeasJacobian<M>,
        v: &MeasMat<M>,
        r: &MeasMat<M>,
    ) -> FilterResult<()>;

    /// Verify the representation invariant
    fn check(&self) -> FilterResult<()>;
}

/// Validate a square noise/covariance matrix: finite, symmetric and PSD.
pub(crate) fn validate_psd<const D: usize>(m: &SMatrix<f64, D, D>, name: &str) -> FilterResult<()> {
    if m.iter().any(|v| !v.is_finite()) {
        return Err(FilterError::CalibrationMisconfiguration(format!(
            "{} contains non-finite entries",
            name
        )));
    }

    let scale = m.amax().max(1.0);
    let asymmetry = (m - m.transpose()).amax();
    if asymmetry > SYMMETRY_TOL * scale {
        return Err(FilterError::CalibrationMisconfiguration(format!(
            "{} is not symmetric (max |P - Pᵀ| = {:.3e})",
            name, asymmetry
        )));
    }

    let min_eig = min_eigenvalue(&to_dynamic(m));
    if min_eig < -PSD_TOL * scale {
        return Err(FilterError::CalibrationMisconfiguration(format!(
            "{} is not positive semi-definite (min eigenvalue {:.3e})",
            name, min_eig
        )));
    }

    Ok(())
}

/// Covariance invariant check used by the strategies after a step.
pub(crate) fn check_psd(p: &StateMat) -> FilterResult<()> {
    validate_psd(p, "covariance").map_err(|e| match e {
        FilterError::CalibrationMisconfiguration(msg) => FilterError::Divergence(msg),
        other => other,
    })
}

pub(crate) fn to_dynamic<const R: usize, const C: usize>(m: &SMatrix<f64, R, C>) -> DMatrix<f64> {
    DMatrix::from_column_slice(R, C, m.as_slice())
}

pub(crate) fn min_eigenvalue(m: &DMatrix<f64>) -> f64 {
    if m.nrows() == 1 {
        return m[(0, 0)];
    }
    let sym = (m + m.transpose()) * 0.5;
    sym.symmetric_eigenvalues()
        .iter()
        .cloned()
        .fold(f64::INFINITY, f64::min)
}

/// Symmetric square root `A` of a PSD matrix such that `A·Aᵀ = P`.
///
/// Negative eigenvalues from round-off are clamped to zero, so singular
/// noise matrices (e.g. a noiseless axis) are accepted.
pub(crate) fn psd_sqrt(p: &DMatrix<f64>) -> DMatrix<f64> {
    if p.nrows() == 1 {
        return DMatrix::from_element(1, 1, p[(0, 0)].max(0.0).sqrt());
    }
    let sym = (p + p.transpose()) * 0.5;
    let eig = sym.symmetric_eigen();
    let mut a = eig.eigenvectors;
    for (j, lambda) in eig.eigenvalues.iter().enumerate() {
        let s = lambda.max(0.0).sqrt();
        a.column_mut(j).scale_mut(s);
    }
    a
}

/// Lower-triangular `S` with non-negative diagonal such that `S·Sᵀ = A·Aᵀ`.
///
/// `a` is 3×k with k ≥ 3. Uses `Aᵀ = Q·R`, hence `A·Aᵀ = Rᵀ·R` and `S = Rᵀ`.
pub(crate) fn triangularize(a: &DMatrix<f64>) -> FilterResult<StateMat> {
    if a.nrows() != STATE_DIM || a.ncols() < STATE_DIM {
        return Err(FilterError::Divergence(format!(
            "compound factor has shape {}x{}",
            a.nrows(),
            a.ncols()
        )));
    }
    if a.iter().any(|v| !v.is_finite()) {
        return Err(FilterError::Divergence(
            "compound factor contains non-finite entries".to_string(),
        ));
    }

    let r = a.transpose().qr().r();
    let mut s = StateMat::from_fn(|i, j| if j <= i { r[(j, i)] } else { 0.0 });

    // QR is unique only up to the sign of each row of R
    for j in 0..STATE_DIM {
        if s[(j, j)] < 0.0 {
            for i in j..STATE_DIM {
                s[(i, j)] = -s[(i, j)];
            }
        }
    }

    Ok(s)
}

pub(crate) fn symmetrize(p: &StateMat) -> StateMat {
    (p + p.transpose()) * 0.5
}
