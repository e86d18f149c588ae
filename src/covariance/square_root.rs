use nalgebra::DMatrix;

use super::{psd_sqrt, to_dynamic, triangularize, validate_psd, CovarianceStrategy};
use crate::error::{FilterError, FilterResult};
use crate::types::{KalmanGain, MeasJacobian, MeasMat, StateMat, STATE_DIM};

/// Lower-triangular square-root factor `S` with `P = S·Sᵀ`.
///
/// Time and measurement updates build a compound factor whose outer product
/// is the updated covariance and re-triangularize it with a QR decomposition:
///
/// - predict: `[F·S | W·√Q]`
/// - correct: `[(I − K·H)·S | K·V·√R]` (Joseph form in factored form)
///
/// Neither step inverts a matrix or re-symmetrizes `P`; positive
/// semi-definiteness holds by construction.
#[derive(Clone, Debug, PartialEq)]
pub struct SquareRootCovariance {
    s: StateMat,
}

impl SquareRootCovariance {
    /// Build directly from a lower-triangular factor.
    pub fn from_factor(s: StateMat) -> FilterResult<Self> {
        let cov = Self { s };
        cov.check().map_err(|e| match e {
            FilterError::Divergence(msg) => FilterError::CalibrationMisconfiguration(msg),
            other => other,
        })?;
        Ok(cov)
    }

    /// The lower-triangular factor `S`
    pub fn factor(&self) -> &StateMat {
        &self.s
    }

    fn compound(left: &StateMat, right: &DMatrix<f64>) -> DMatrix<f64> {
        let cols = STATE_DIM + right.ncols();
        DMatrix::from_fn(STATE_DIM, cols, |i, j| {
            if j < STATE_DIM {
                left[(i, j)]
            } else {
                right[(i, j - STATE_DIM)]
            }
        })
    }
}

impl CovarianceStrategy for SquareRootCovariance {
    const NAME: &'static str = "square_root";

    fn from_covariance(p: &StateMat) -> FilterResult<Self> {
        validate_psd(p, "initial covariance")?;

        let s = match p.cholesky() {
            Some(chol) => chol.l(),
            // Singular but PSD prior: triangularize its symmetric square root
            None => triangularize(&psd_sqrt(&to_dynamic(p)))
                .map_err(|e| FilterError::CalibrationMisconfiguration(e.to_string()))?,
        };
        Ok(Self { s })
    }

    fn covariance(&self) -> StateMat {
        self.s * self.s.transpose()
    }

    fn propagate(&mut self, f: &StateMat, w: &StateMat, q: &StateMat) -> FilterResult<()> {
        let wq = to_dynamic(w) * psd_sqrt(&to_dynamic(q));
        let compound = Self::compound(&(f * self.s), &wq);
        self.s = triangularize(&compound)?;
        Ok(())
    }

    fn innovation_covariance<const M: usize>(
        &self,
        h: &MeasJacobian<M>,
        v: &MeasMat<M>,
        r: &MeasMat<M>,
    ) -> MeasMat<M> {
        let hs = h * self.s;
        hs * hs.transpose() + v * r * v.transpose()
    }

    fn correct<const M: usize>(
        &mut self,
        k: &KalmanGain<M>,
        h: &MeasJacobian<M>,
        v: &MeasMat<M>,
        r: &MeasMat<M>,
    ) -> FilterResult<()> {
        let i_kh = StateMat::identity() - k * h;
        let kvr = to_dynamic(&(k * v)) * psd_sqrt(&to_dynamic(r));
        let compound = Self::compound(&(i_kh * self.s), &kvr);
        self.s = triangularize(&compound)?;
        Ok(())
    }

    fn check(&self) -> FilterResult<()> {
        if self.s.iter().any(|v| !v.is_finite()) {
            return Err(FilterError::Divergence(
                "square-root factor contains non-finite entries".to_string(),
            ));
        }
        for i in 0..STATE_DIM {
            if self.s[(i, i)] < 0.0 {
                return Err(FilterError::Divergence(format!(
                    "square-root factor has negative diagonal entry S[{},{}] = {:.3e}",
                    i,
                    i,
                    self.s[(i, i)]
                )));
            }
            for j in (i + 1)..STATE_DIM {
                if self.s[(i, j)] != 0.0 {
                    return Err(FilterError::Divergence(format!(
                        "square-root factor is not lower-triangular at ({}, {})",
                        i, j
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Matrix3;

    #[test]
    fn test_from_covariance_uses_cholesky_factor() {
        let p = Matrix3::new(4.0, 2.0, 0.0, 2.0, 5.0, 1.0, 0.0, 1.0, 3.0);
        let cov = SquareRootCovariance::from_covariance(&p).unwrap();

        assert!(cov.check().is_ok());
        assert_relative_eq!(cov.factor()[(0, 0)], 2.0, epsilon = 1e-15);
        assert_relative_eq!(cov.covariance(), p, epsilon = 1e-12);
    }

    #[test]
    fn test_singular_prior_is_accepted() {
        let p = Matrix3::from_diagonal(&nalgebra::Vector3::new(1.0, 0.0, 0.25));
        let cov = SquareRootCovariance::from_covariance(&p).unwrap();

        assert!(cov.check().is_ok());
        assert_relative_eq!(cov.covariance(), p, epsilon = 1e-12);

        let zero = SquareRootCovariance::from_covariance(&Matrix3::zeros()).unwrap();
        assert_eq!(zero.covariance(), Matrix3::zeros());
    }

    #[test]
    fn test_from_factor_rejects_upper_entries() {
        let mut s = Matrix3::identity();
        s[(0, 2)] = 0.1;
        assert!(matches!(
            SquareRootCovariance::from_factor(s),
            Err(FilterError::CalibrationMisconfiguration(_))
        ));
    }

    #[test]
    fn test_propagate_stays_triangular() {
        let mut cov = SquareRootCovariance::from_covariance(&Matrix3::identity()).unwrap();
        let f = Matrix3::new(1.0, 0.0, -0.5, 0.0, 1.0, 0.25, 0.0, 0.0, 1.0);
        let q = Matrix3::from_diagonal(&nalgebra::Vector3::new(0.01, 0.0, 0.002));

        for _ in 0..50 {
            cov.propagate(&f, &Matrix3::identity(), &q).unwrap();
            assert!(cov.check().is_ok());
        }

        let mut expected = Matrix3::identity();
        for _ in 0..50 {
            expected = f * expected * f.transpose() + q;
        }
        assert_relative_eq!(cov.covariance(), expected, max_relative = 1e-10);
    }

    #[test]
    fn test_non_finite_step_keeps_prior() {
        let mut cov = SquareRootCovariance::from_covariance(&Matrix3::identity()).unwrap();
        let mut f = Matrix3::identity();
        f[(1, 2)] = f64::INFINITY;

        let result = cov.propagate(&f, &Matrix3::identity(), &Matrix3::zeros());
        assert!(matches!(result, Err(FilterError::Divergence(_))));
        assert_eq!(cov.factor(), &Matrix3::identity());
    }
}
