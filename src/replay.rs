//! Offline replay of recorded drives through the pose filter.
//!
//! A log is a JSON document (optionally gzip-compressed) of timestamped events:
//!
//! ```text
//! { "name": "yard_loop",
//!   "events": [
//!     { "timestamp": 0.0, "type": "control",  "velocity": 1.0, "turn_rate": 0.1 },
//!     { "timestamp": 0.1, "type": "position", "x_pos": 0.09, "y_pos": 0.03 },
//!     { "timestamp": 0.1, "type": "heading",  "heading": 0.01 } ] }
//! ```
//!
//! Each control event is one predict step of the model's `dt`.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::Context;
use flate2::read::GzDecoder;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::FilterConfig;
use crate::covariance::CovarianceStrategy;
use crate::error::{FilterError, FilterResult};
use crate::filters::{EstimateSnapshot, ExtendedKalmanFilter};
use crate::models::{HeadingMeasurementModel, PositionMeasurementModel, SystemModel};
use crate::types::{
    Control, HeadingMeasurement, PositionMeasurement, PositionVec, State, StateMat,
};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplayEvent {
    Control(Control),
    Position(PositionMeasurement),
    Heading(HeadingMeasurement),
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimedEvent {
    pub timestamp: f64,
    #[serde(flatten)]
    pub event: ReplayEvent,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayLog {
    #[serde(default)]
    pub name: Option<String>,
    pub events: Vec<TimedEvent>,
}

pub fn load_log(path: &Path) -> anyhow::Result<ReplayLog> {
    let file = File::open(path).with_context(|| format!("opening log {}", path.display()))?;
    let gzipped = path.extension().map(|e| e == "gz").unwrap_or(false);
    let log: serde_json::Result<ReplayLog> = if gzipped {
        serde_json::from_reader(BufReader::new(GzDecoder::new(file)))
    } else {
        serde_json::from_reader(BufReader::new(file))
    };
    log.with_context(|| format!("parsing log {}", path.display()))
}

/// Sensor models used while replaying
#[derive(Clone, Debug)]
pub struct ReplaySensors {
    pub position: PositionMeasurementModel,
    pub heading: HeadingMeasurementModel,
}

impl ReplaySensors {
    pub fn from_config(config: &FilterConfig) -> FilterResult<Self> {
        Ok(Self {
            position: config.build_position_model()?,
            heading: config.build_heading_model()?,
        })
    }
}

/// When and how the replay driver re-initializes a filter that lost track
#[derive(Clone, Debug, PartialEq)]
pub struct ReinitPolicy {
    pub max_consecutive_rejections: u32,
    pub covariance: StateMat,
}

impl ReinitPolicy {
    pub fn from_config(config: &FilterConfig) -> FilterResult<Self> {
        Ok(Self {
            max_consecutive_rejections: config.max_consecutive_rejections,
            covariance: config.initial_covariance_matrix()?,
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RejectionCounts {
    pub singular: u64,
    pub gated: u64,
    pub invalid: u64,
    pub diverged: u64,
}

impl RejectionCounts {
    fn record(&mut self, err: &FilterError) {
        match err {
            FilterError::SingularCovariance => self.singular += 1,
            FilterError::InnovationGated { .. } => self.gated += 1,
            FilterError::InvalidInput(_) => self.invalid += 1,
            FilterError::Divergence(_) => self.diverged += 1,
            FilterError::CalibrationMisconfiguration(_) => {}
        }
    }

    pub fn total(&self) -> u64 {
        self.singular + self.gated + self.invalid + self.diverged
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ReplaySummary {
    pub name: Option<String>,
    pub events: usize,
    pub controls: usize,
    pub positions: usize,
    pub headings: usize,
    pub out_of_order: usize,
    pub rejections: RejectionCounts,
    pub reinitializations: u32,
    pub mean_nis: Option<f64>,
    pub duration: f64,
    pub final_estimate: EstimateSnapshot,
}

/// Run every event of `log` through `ekf`.
///
/// Rejected steps are counted and skipped. After
/// `policy.max_consecutive_rejections` rejected updates in a row the filter is
/// reset onto the latest position fix with the policy covariance.
pub fn replay_log<S, C>(
    ekf: &mut ExtendedKalmanFilter<S, C>,
    log: &ReplayLog,
    sensors: &ReplaySensors,
    policy: &ReinitPolicy,
) -> FilterResult<ReplaySummary>
where
    S: SystemModel,
    C: CovarianceStrategy,
{
    let mut controls = 0;
    let mut positions = 0;
    let mut headings = 0;
    let mut out_of_order = 0;
    let mut rejections = RejectionCounts::default();
    let mut reinitializations = 0;
    let mut nis_sum = 0.0;
    let mut nis_count = 0usize;

    let mut first_ts: Option<f64> = None;
    let mut last_ts = f64::NEG_INFINITY;
    let mut last_fix: Option<PositionVec> = None;

    for event in &log.events {
        // NaN timestamps fail this comparison too
        if !(event.timestamp >= last_ts) {
            out_of_order += 1;
            warn!(
                "[REPLAY] skipping event at t={} (previous t={})",
                event.timestamp, last_ts
            );
            continue;
        }
        last_ts = event.timestamp;
        first_ts.get_or_insert(event.timestamp);

        let outcome = match event.event {
            ReplayEvent::Control(u) => {
                controls += 1;
                ekf.predict(&u).map(|_| None)
            }
            ReplayEvent::Position(z) => {
                positions += 1;
                let z = PositionVec::from(z);
                if z.iter().all(|v| v.is_finite()) {
                    last_fix = Some(z);
                }
                ekf.update(&sensors.position, z).map(|r| Some(r.nis))
            }
            ReplayEvent::Heading(z) => {
                headings += 1;
                ekf.update(&sensors.heading, z).map(|r| Some(r.nis))
            }
        };

        match outcome {
            Ok(Some(nis)) => {
                nis_sum += nis;
                nis_count += 1;
            }
            Ok(None) => {}
            Err(e) if e.is_recoverable() => rejections.record(&e),
            Err(e) => return Err(e),
        }

        if ekf.stats().consecutive_rejections >= policy.max_consecutive_rejections {
            let theta = ekf.state().theta();
            let (x, y) = match last_fix {
                Some(z) => sensors.position.reference_point(&z, theta),
                None => (ekf.state().x(), ekf.state().y()),
            };
            info!(
                "[REPLAY] re-initializing at t={:.2} after {} rejected updates -> ({:.2}, {:.2})",
                event.timestamp,
                ekf.stats().consecutive_rejections,
                x,
                y
            );
            ekf.reset(State::new(x, y, theta), &policy.covariance)?;
            reinitializations += 1;
        }
    }

    let summary = ReplaySummary {
        name: log.name.clone(),
        events: log.events.len(),
        controls,
        positions,
        headings,
        out_of_order,
        rejections,
        reinitializations,
        mean_nis: (nis_count > 0).then(|| nis_sum / nis_count as f64),
        duration: first_ts.map(|t0| last_ts - t0).unwrap_or(0.0),
        final_estimate: ekf.snapshot(),
    };

    info!(
        "[REPLAY] {} events, {} rejected, {} re-inits, {}",
        summary.events,
        summary.rejections.total(),
        summary.reinitializations,
        ekf.health().format_status()
    );

    Ok(summary)
}
