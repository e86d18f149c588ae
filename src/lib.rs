//! Planar pose (x, y, θ) estimation with an Extended Kalman Filter.
//!
//! A unicycle motion model is corrected by an antenna position sensor mounted
//! at a lever arm and, optionally, an absolute heading sensor. The covariance
//! is carried either as a full matrix or as its lower-triangular square root.

pub mod config;
pub mod covariance;
pub mod error;
pub mod filters;
pub mod health;
pub mod models;
pub mod replay;
pub mod types;

pub use config::{CovarianceForm, FilterConfig};
pub use covariance::{CovarianceStrategy, SquareRootCovariance, StandardCovariance};
pub use error::{FilterError, FilterResult};
pub use filters::{EstimateSnapshot, ExtendedKalmanFilter, FilterStats, SquareRootEkf, UpdateReport};
pub use health::CovarianceHealth;
pub use models::{
    AntennaOffset, HeadingMeasurementModel, JacobianMode, MeasurementModel,
    PositionMeasurementModel, SystemModel, UnicycleModel,
};
pub use types::{Control, HeadingMeasurement, PositionMeasurement, State};
