use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::Context;
use nalgebra::SMatrix;
use serde::{Deserialize, Serialize};

use crate::covariance::{
    validate_psd, CovarianceStrategy, SquareRootCovariance, StandardCovariance,
};
use crate::error::{FilterError, FilterResult};
use crate::filters::ExtendedKalmanFilter;
use crate::models::{
    AntennaOffset, HeadingMeasurementModel, JacobianMode, PositionMeasurementModel, UnicycleModel,
};
use crate::types::{PositionNoise, State, StateMat, MEASURE_DIM_POSITION, STATE_DIM};

// ─── Configuration ───────────────────────────────────────────────────────────

/// Which covariance representation the filter carries
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CovarianceForm {
    #[default]
    Standard,
    SquareRoot,
}

impl CovarianceForm {
    /// Matches [`CovarianceStrategy::NAME`] of the implementing type
    pub fn name(&self) -> &'static str {
        match self {
            CovarianceForm::Standard => StandardCovariance::NAME,
            CovarianceForm::SquareRoot => SquareRootCovariance::NAME,
        }
    }
}

/// Calibration of the pose filter. Matrices are row lists.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    // ── Motion model ──
    pub dt: f64,
    pub process_noise: Vec<Vec<f64>>,

    // ── Sensors ──
    pub antenna: AntennaOffset,
    pub position_noise: Vec<Vec<f64>>,
    pub heading_noise: f64,
    pub jacobian_mode: JacobianMode,

    // ── Filter ──
    pub covariance_form: CovarianceForm,
    pub initial_state: [f64; STATE_DIM],
    pub initial_covariance: Vec<Vec<f64>>,
    pub innovation_gate: Option<f64>,

    /// Rejected updates in a row before the replay driver re-initializes
    pub max_consecutive_rejections: u32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            dt: 0.1,
            process_noise: vec![
                vec![1e-3, 0.0, 0.0],
                vec![0.0, 1e-3, 0.0],
                vec![0.0, 0.0, 5e-4],
            ],
            antenna: AntennaOffset::default(),
            position_noise: vec![vec![2.5e-3, 0.0], vec![0.0, 2.5e-3]],
            heading_noise: 1e-2,
            jacobian_mode: JacobianMode::Analytic,
            covariance_form: CovarianceForm::Standard,
            initial_state: [0.0; STATE_DIM],
            initial_covariance: vec![
                vec![1.0, 0.0, 0.0],
                vec![0.0, 1.0, 0.0],
                vec![0.0, 0.0, 0.5],
            ],
            innovation_gate: None,
            max_consecutive_rejections: 5,
        }
    }
}

impl FilterConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("opening config {}", path.display()))?;
        let config: FilterConfig = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing config {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("validating config {}", path.display()))?;
        Ok(config)
    }

    /// Check every calibration constant without building anything
    pub fn validate(&self) -> FilterResult<()> {
        self.build_system_model()?;
        self.build_position_model()?;
        self.build_heading_model()?;
        self.initial_covariance_matrix()?;

        if !self.initial_state().is_finite() {
            return Err(FilterError::CalibrationMisconfiguration(
                "initial_state must be finite".to_string(),
            ));
        }
        if let Some(gate) = self.innovation_gate {
            if !gate.is_finite() || gate <= 0.0 {
                return Err(FilterError::CalibrationMisconfiguration(format!(
                    "innovation_gate must be finite and positive, got {}",
                    gate
                )));
            }
        }
        if self.max_consecutive_rejections == 0 {
            return Err(FilterError::CalibrationMisconfiguration(
                "max_consecutive_rejections must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn build_system_model(&self) -> FilterResult<UnicycleModel> {
        let q = matrix_from_rows::<STATE_DIM>(&self.process_noise, "process_noise")?;
        UnicycleModel::new(self.dt, q)
    }

    pub fn build_position_model(&self) -> FilterResult<PositionMeasurementModel> {
        let r: PositionNoise =
            matrix_from_rows::<MEASURE_DIM_POSITION>(&self.position_noise, "position_noise")?;
        Ok(PositionMeasurementModel::new(self.antenna, r)?.with_jacobian_mode(self.jacobian_mode))
    }

    pub fn build_heading_model(&self) -> FilterResult<HeadingMeasurementModel> {
        HeadingMeasurementModel::new(self.heading_noise)
    }

    pub fn initial_state(&self) -> State {
        let [x, y, theta] = self.initial_state;
        State::new(x, y, theta)
    }

    pub fn initial_covariance_matrix(&self) -> FilterResult<StateMat> {
        let p0 = matrix_from_rows::<STATE_DIM>(&self.initial_covariance, "initial_covariance")?;
        validate_psd(&p0, "initial_covariance")?;
        Ok(p0)
    }

    /// Filter on the unicycle model with this prior and gate. `C` must be the
    /// strategy named by `covariance_form`; callers dispatch on the form.
    pub fn build_filter<C: CovarianceStrategy>(
        &self,
    ) -> FilterResult<ExtendedKalmanFilter<UnicycleModel, C>> {
        self.validate()?;
        if C::NAME != self.covariance_form.name() {
            return Err(FilterError::CalibrationMisconfiguration(format!(
                "covariance_form is {} but a {} filter was requested",
                self.covariance_form.name(),
                C::NAME
            )));
        }
        let ekf = ExtendedKalmanFilter::new(
            self.build_system_model()?,
            self.initial_state(),
            &self.initial_covariance_matrix()?,
        )?;
        match self.innovation_gate {
            Some(gate) => ekf.with_innovation_gate(gate),
            None => Ok(ekf),
        }
    }
}

/// Square `D`×`D` matrix from a row list, rejecting ragged or missized input
pub fn matrix_from_rows<const D: usize>(
    rows: &[Vec<f64>],
    name: &str,
) -> FilterResult<SMatrix<f64, D, D>> {
    if rows.len() != D {
        return Err(FilterError::CalibrationMisconfiguration(format!(
            "{} must have {} rows, got {}",
            name,
            D,
            rows.len()
        )));
    }
    if let Some((i, row)) = rows.iter().enumerate().find(|(_, row)| row.len() != D) {
        return Err(FilterError::CalibrationMisconfiguration(format!(
            "{} row {} must have {} entries, got {}",
            name,
            i,
            D,
            row.len()
        )));
    }

    Ok(SMatrix::<f64, D, D>::from_fn(|r, c| rows[r][c]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MeasurementModel;

    #[test]
    fn test_default_config_is_valid() {
        let config = FilterConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.antenna, AntennaOffset::new(-0.01, 0.03));
        assert_eq!(config.covariance_form, CovarianceForm::Standard);
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let json = r#"{
            "dt": 0.05,
            "antenna": { "forward": 0.3, "left": 0.0 },
            "covariance_form": "square_root",
            "jacobian_mode": "identity",
            "innovation_gate": 13.8
        }"#;
        let config: FilterConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.dt, 0.05);
        assert_eq!(config.covariance_form, CovarianceForm::SquareRoot);
        assert_eq!(config.innovation_gate, Some(13.8));
        assert_eq!(config.heading_noise, FilterConfig::default().heading_noise);
        assert!(config.validate().is_ok());

        let position = config.build_position_model().unwrap();
        assert_eq!(position.jacobian_mode(), JacobianMode::Identity);
        assert_eq!(position.offset().forward, 0.3);
        assert_eq!(position.noise_covariance()[(0, 0)], 2.5e-3);
    }

    #[test]
    fn test_wrong_dimensions_are_rejected() {
        let config = FilterConfig {
            process_noise: vec![vec![1.0, 0.0], vec![0.0, 1.0]],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(FilterError::CalibrationMisconfiguration(_))
        ));

        let config = FilterConfig {
            position_noise: vec![vec![1.0, 0.0], vec![0.0]],
            ..Default::default()
        };
        assert!(matches!(
            config.build_position_model(),
            Err(FilterError::CalibrationMisconfiguration(_))
        ));
    }

    #[test]
    fn test_bad_values_are_rejected() {
        let bad = [
            FilterConfig {
                dt: 0.0,
                ..Default::default()
            },
            FilterConfig {
                heading_noise: -1.0,
                ..Default::default()
            },
            FilterConfig {
                initial_covariance: vec![
                    vec![1.0, 2.0, 0.0],
                    vec![2.0, 1.0, 0.0],
                    vec![0.0, 0.0, 1.0],
                ],
                ..Default::default()
            },
            FilterConfig {
                initial_state: [0.0, f64::NAN, 0.0],
                ..Default::default()
            },
            FilterConfig {
                innovation_gate: Some(0.0),
                ..Default::default()
            },
            FilterConfig {
                max_consecutive_rejections: 0,
                ..Default::default()
            },
        ];

        for config in bad.iter() {
            assert!(config.validate().is_err(), "{:?} accepted", config);
        }
    }

    #[test]
    fn test_build_filter_uses_prior_and_gate() {
        let config = FilterConfig {
            covariance_form: CovarianceForm::SquareRoot,
            initial_state: [1.0, 2.0, 0.5],
            innovation_gate: Some(9.21),
            ..Default::default()
        };
        let ekf = config.build_filter::<SquareRootCovariance>().unwrap();

        assert_eq!(ekf.state(), &State::new(1.0, 2.0, 0.5));
        assert_eq!(ekf.innovation_gate(), Some(9.21));
        assert!((ekf.covariance()[(2, 2)] - 0.5).abs() < 1e-12);
        assert_eq!(ekf.system().dt(), 0.1);
    }

    #[test]
    fn test_build_filter_rejects_mismatched_form() {
        let config = FilterConfig {
            covariance_form: CovarianceForm::SquareRoot,
            ..Default::default()
        };
        assert!(matches!(
            config.build_filter::<StandardCovariance>(),
            Err(FilterError::CalibrationMisconfiguration(_))
        ));
        assert!(FilterConfig::default()
            .build_filter::<SquareRootCovariance>()
            .is_err());
        assert!(FilterConfig::default()
            .build_filter::<StandardCovariance>()
            .is_ok());
    }

    #[test]
    fn test_matrix_from_rows_layout() {
        let m = matrix_from_rows::<2>(&[vec![1.0, 2.0], vec![3.0, 4.0]], "m").unwrap();
        assert_eq!(m[(0, 1)], 2.0);
        assert_eq!(m[(1, 0)], 3.0);
    }

    #[test]
    fn test_from_json_file_reports_path() {
        let path = std::env::temp_dir().join("pose_ekf_missing_config.json");
        let err = FilterConfig::from_json_file(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("pose_ekf_missing_config.json"));
    }
}
