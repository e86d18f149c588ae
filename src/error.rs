use thiserror::Error;

/// Pose filter error types
///
/// Numerical faults (`SingularCovariance`, `InvalidInput`, `Divergence`,
/// `InnovationGated`) reject a single step and leave the filter on its prior.
/// `CalibrationMisconfiguration` is raised only while building models or filters.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("Innovation covariance is singular or not positive definite")]
    SingularCovariance,

    #[error("Non-finite {0} rejected")]
    InvalidInput(&'static str),

    #[error("Calibration misconfiguration: {0}")]
    CalibrationMisconfiguration(String),

    #[error("Filter diverged: {0}")]
    Divergence(String),

    #[error("Measurement gated out (NIS {nis:.3} > {gate:.3})")]
    InnovationGated { nis: f64, gate: f64 },
}

impl FilterError {
    /// True for faults that only reject the current step
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, FilterError::CalibrationMisconfiguration(_))
    }
}

/// Result type for filter operations
pub type FilterResult<T> = Result<T, FilterError>;
