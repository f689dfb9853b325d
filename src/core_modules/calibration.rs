// THEORY:
// The `calibration` module derives thresholds from the data itself when no hand-tuned
// threshold file exists yet. It streams a log once, collects every longitudinal
// acceleration, lateral acceleration magnitude and longitudinal jerk magnitude, and
// treats the most extreme 5% of each as anomalous.
//
// Calibration is an offline preparation step. Its output is written to a threshold
// file, which the analysis run then loads like any hand-written one.

use crate::config::ThresholdConfig;
use crate::core_modules::kinematics::MotionProfile;
use crate::telemetry_reader::{FrameSource, ReadError};
use thiserror::Error;
use tracing::{debug, info};

const BRAKE_PERCENTILE: f64 = 5.0;
const LATERAL_PERCENTILE: f64 = 95.0;
const JERK_PERCENTILE: f64 = 95.0;

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error(transparent)]
    Read(#[from] ReadError),
    #[error("not enough motion data to calibrate ({0})")]
    InsufficientData(&'static str),
    #[error("calibrated thresholds are unusable: {0}")]
    Unusable(#[from] crate::config::ConfigError),
}

/// Running collection of motion samples across frames.
///
/// Holds every collected value of the calibration log, so memory grows with the
/// log. Calibrate on a representative segment,
/// not a whole dataset.
#[derive(Debug, Default)]
pub struct CalibrationSamples {
    accel_x: Vec<f64>,
    accel_y_abs: Vec<f64>,
    jerk_x_abs: Vec<f64>,
}

impl CalibrationSamples {
    pub fn add(&mut self, profile: &MotionProfile) {
        for accel in &profile.accelerations {
            self.accel_x.push(accel.ax);
            self.accel_y_abs.push(accel.ay.abs());
        }
        self.jerk_x_abs.extend(profile.jerks.iter().map(|j| j.jx.abs()));
    }

    pub fn thresholds(mut self) -> Result<ThresholdConfig, CalibrationError> {
        let thresholds = ThresholdConfig {
            hard_brake: percentile(&mut self.accel_x, BRAKE_PERCENTILE)
                .ok_or(CalibrationError::InsufficientData("no longitudinal acceleration"))?,
            lateral: percentile(&mut self.accel_y_abs, LATERAL_PERCENTILE)
                .ok_or(CalibrationError::InsufficientData("no lateral acceleration"))?,
            jerk: percentile(&mut self.jerk_x_abs, JERK_PERCENTILE)
                .ok_or(CalibrationError::InsufficientData("no jerk"))?,
        };
        thresholds.validate()?;
        Ok(thresholds)
    }
}

/// Streams every frame of `source` and derives percentile thresholds. Frames that
/// cannot be parsed or differentiated are skipped.
pub fn calibrate(source: &mut dyn FrameSource) -> Result<ThresholdConfig, CalibrationError> {
    let mut samples = CalibrationSamples::default();
    let mut frames = 0u64;

    while let Some(next) = source.next_frame() {
        let frame = match next {
            Ok(frame) => frame,
            Err(e) if e.is_recoverable() => {
                debug!(error = %e, "skipping malformed frame during calibration");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        match MotionProfile::from_samples(&frame.velocities) {
            Ok(profile) => {
                samples.add(&profile);
                frames += 1;
            }
            Err(e) => debug!(sequence = frame.sequence, error = %e, "skipping frame during calibration"),
        }
    }

    let thresholds = samples.thresholds()?;
    info!(
        file = source.file_id(),
        frames,
        hard_brake = thresholds.hard_brake,
        lateral = thresholds.lateral,
        jerk = thresholds.jerk,
        "calibrated thresholds"
    );
    Ok(thresholds)
}

/// Linear-interpolated percentile (0-100). Sorts `values` in place.
fn percentile(values: &mut [f64], pct: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let rank = (pct / 100.0) * (values.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let fraction = rank - lower as f64;
    Some(values[lower] + (values[upper] - values[lower]) * fraction)
}
