use serde::Serialize;

use crate::covariance::{min_eigenvalue, to_dynamic};
use crate::types::StateMat;

/// Default tolerance on the smallest eigenvalue, relative to the largest entry
pub const DEFAULT_EIGEN_TOLERANCE: f64 = 1e-9;

/// Numerical health of a covariance matrix
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CovarianceHealth {
    pub finite: bool,
    pub trace: f64,
    pub min_eigenvalue: f64,
    pub max_asymmetry: f64,
    /// Largest absolute entry, used to scale tolerances
    pub scale: f64,
}

impl CovarianceHealth {
    pub fn assess(p: &StateMat) -> Self {
        let finite = p.iter().all(|v| v.is_finite());
        if !finite {
            return CovarianceHealth {
                finite,
                trace: f64::NAN,
                min_eigenvalue: f64::NAN,
                max_asymmetry: f64::NAN,
                scale: f64::NAN,
            };
        }

        CovarianceHealth {
            finite,
            trace: p.trace(),
            min_eigenvalue: min_eigenvalue(&to_dynamic(p)),
            max_asymmetry: (p - p.transpose()).amax(),
            scale: p.amax(),
        }
    }

    /// Symmetric and PSD within `eps` (relative to the largest entry)
    pub fn is_healthy(&self, eps: f64) -> bool {
        let tol = eps * self.scale.max(1.0);
        self.finite && self.min_eigenvalue >= -tol && self.max_asymmetry <= tol
    }

    /// Format health status for logging
    pub fn format_status(&self) -> String {
        if !self.finite {
            return "✗ covariance non-finite".to_string();
        }

        let marker = if self.is_healthy(DEFAULT_EIGEN_TOLERANCE) {
            "✓"
        } else {
            "⚠"
        };
        format!(
            "{} trace {:.4e} | min eig {:.3e} | asym {:.1e}",
            marker, self.trace, self.min_eigenvalue, self.max_asymmetry
        )
    }
}
