pub mod ekf;

pub use ekf::{EstimateSnapshot, ExtendedKalmanFilter, FilterStats, SquareRootEkf, UpdateReport};
