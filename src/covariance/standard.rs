use super::{check_psd, symmetrize, validate_psd, CovarianceStrategy};
use crate::error::{FilterError, FilterResult};
use crate::types::{KalmanGain, MeasJacobian, MeasMat, StateMat};

/// Full covariance matrix `P`, updated in Joseph form and re-symmetrized
/// after every step.
#[derive(Clone, Debug, PartialEq)]
pub struct StandardCovariance {
    p: StateMat,
}

impl StandardCovariance {
    fn commit(&mut self, candidate: StateMat, step: &str) -> FilterResult<()> {
        if candidate.iter().any(|v| !v.is_finite()) {
            return Err(FilterError::Divergence(format!(
                "{} produced a non-finite covariance",
                step
            )));
        }
        self.p = symmetrize(&candidate);
        Ok(())
    }
}

impl CovarianceStrategy for StandardCovariance {
    const NAME: &'static str = "standard";

    fn from_covariance(p: &StateMat) -> FilterResult<Self> {
        validate_psd(p, "initial covariance")?;
        Ok(Self { p: symmetrize(p) })
    }

    fn covariance(&self) -> StateMat {
        self.p
    }

    fn propagate(&mut self, f: &StateMat, w: &StateMat, q: &StateMat) -> FilterResult<()> {
        let candidate = f * self.p * f.transpose() + w * q * w.transpose();
        self.commit(candidate, "propagate")
    }

    fn innovation_covariance<const M: usize>(
        &self,
        h: &MeasJacobian<M>,
        v: &MeasMat<M>,
        r: &MeasMat<M>,
    ) -> MeasMat<M> {
        h * self.p * h.transpose() + v * r * v.transpose()
    }

    fn correct<const M: usize>(
        &mut self,
        k: &KalmanGain<M>,
        h: &MeasJacobian<M>,
        v: &MeasMat<M>,
        r: &MeasMat<M>,
    ) -> FilterResult<()> {
        // Joseph form
        let i_kh = StateMat::identity() - k * h;
        let kv = k * v;
        let candidate = i_kh * self.p * i_kh.transpose() + kv * r * kv.transpose();
        self.commit(candidate, "correct")
    }

    fn check(&self) -> FilterResult<()> {
        check_psd(&self.p)
    }
}
