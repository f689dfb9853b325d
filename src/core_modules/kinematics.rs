// THEORY:
// The `kinematics` module is the first analytical layer of the engine. It turns a
// frame's raw velocity history into scalar motion aggregates that the classifier
// can compare against thresholds.
//
// Key architectural principles:
// 1.  **Finite Differences**: Acceleration is the change in velocity between two
//     consecutive samples divided by the elapsed time. Each acceleration sample is
//     placed at the midpoint of its interval, and jerk is the same difference taken
//     over consecutive accelerations.
// 2.  **Absent Is Not Zero**: Zero acceleration is a perfectly valid, non-triggering
//     measurement. A history too short to differentiate therefore produces `None`,
//     never `0.0`, so the classifier can tell "calm" apart from "unknown".
// 3.  **Fail Per Frame**: Malformed histories (empty, non-finite, time running
//     backwards, spacing too tight to differentiate) are reported as a `KinematicsError` for that frame only. The caller
//     decides to skip the frame; nothing here aborts a run.

use crate::core_modules::frame_sample::VelocitySample;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a velocity history could not be turned into kinematics.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum KinematicsError {
    #[error("velocity history is empty")]
    Empty,
    #[error("non-finite value in velocity sample {index}")]
    NonFinite { index: usize },
    #[error("timestamps must strictly increase (sample {index})")]
    NonIncreasingTime { index: usize },
    /// Finite inputs whose spacing is too small to differentiate.
    #[error("derived {quantity} is not finite (interval {index})")]
    Degenerate { quantity: &'static str, index: usize },
}

/// Per-frame motion aggregates. Differentiated fields are `None` when the history
/// was too short to compute them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionAggregates {
    pub speed_min: f64,
    pub speed_max: f64,
    pub speed_mean: f64,
    /// Longitudinal acceleration extremes in m/s². Braking is negative.
    pub accel_x_min: Option<f64>,
    pub accel_x_max: Option<f64>,
    /// Lateral acceleration extremes in m/s².
    pub accel_y_min: Option<f64>,
    pub accel_y_max: Option<f64>,
    /// Largest jerk magnitude per axis in m/s³.
    pub jerk_x_max: Option<f64>,
    pub jerk_y_max: Option<f64>,
}

/// A derived acceleration sample, located at the midpoint of its velocity interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccelSample {
    pub t: f64,
    pub ax: f64,
    pub ay: f64,
}

/// A derived jerk sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JerkSample {
    pub jx: f64,
    pub jy: f64,
}

/// The full differentiated series for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionProfile {
    pub speeds: Vec<f64>,
    pub accelerations: Vec<AccelSample>,
    pub jerks: Vec<JerkSample>,
}

impl MotionProfile {
    pub fn from_samples(samples: &[VelocitySample]) -> Result<Self, KinematicsError> {
        validate(samples)?;

        let speeds: Vec<f64> = samples.iter().map(VelocitySample::speed).collect();
        if let Some(index) = speeds.iter().position(|v| !v.is_finite()) {
            return Err(KinematicsError::Degenerate { quantity: "speed", index });
        }

        let accelerations: Vec<AccelSample> = samples
            .windows(2)
            .map(|pair| {
                let dt = pair[1].t - pair[0].t;
                AccelSample {
                    t: pair[0].t + dt / 2.0,
                    ax: (pair[1].vx - pair[0].vx) / dt,
                    ay: (pair[1].vy - pair[0].vy) / dt,
                }
            })
            .collect();
        if let Some(index) = accelerations.iter().position(|a| !(a.t.is_finite() && a.ax.is_finite() && a.ay.is_finite())) {
            return Err(KinematicsError::Degenerate { quantity: "acceleration", index });
        }

        let jerks: Vec<JerkSample> = accelerations
            .windows(2)
            .map(|pair| {
                let dt = pair[1].t - pair[0].t;
                JerkSample {
                    jx: (pair[1].ax - pair[0].ax) / dt,
                    jy: (pair[1].ay - pair[0].ay) / dt,
                }
            })
            .collect();
        if let Some(index) = jerks.iter().position(|j| !(j.jx.is_finite() && j.jy.is_finite())) {
            return Err(KinematicsError::Degenerate { quantity: "jerk", index });
        }

        Ok(Self { speeds, accelerations, jerks })
    }

    pub fn aggregates(&self) -> MotionAggregates {
        // `from_samples` guarantees at least one speed.
        let (speed_min, speed_max) = min_max(self.speeds.iter().copied()).unwrap_or((0.0, 0.0));
        let speed_mean = self.speeds.iter().sum::<f64>() / self.speeds.len().max(1) as f64;

        let accel_x = min_max(self.accelerations.iter().map(|a| a.ax));
        let accel_y = min_max(self.accelerations.iter().map(|a| a.ay));
        let jerk_x = min_max(self.jerks.iter().map(|j| j.jx.abs()));
        let jerk_y = min_max(self.jerks.iter().map(|j| j.jy.abs()));

        MotionAggregates {
            speed_min,
            speed_max,
            speed_mean,
            accel_x_min: accel_x.map(|(min, _)| min),
            accel_x_max: accel_x.map(|(_, max)| max),
            accel_y_min: accel_y.map(|(min, _)| min),
            accel_y_max: accel_y.map(|(_, max)| max),
            jerk_x_max: jerk_x.map(|(_, max)| max),
            jerk_y_max: jerk_y.map(|(_, max)| max),
        }
    }
}

/// Extracts the motion aggregates for one frame's velocity history.
pub fn extract(samples: &[VelocitySample]) -> Result<MotionAggregates, KinematicsError> {
    MotionProfile::from_samples(samples).map(|profile| profile.aggregates())
}

fn validate(samples: &[VelocitySample]) -> Result<(), KinematicsError> {
    if samples.is_empty() {
        return Err(KinematicsError::Empty);
    }
    for (index, sample) in samples.iter().enumerate() {
        if !(sample.t.is_finite() && sample.vx.is_finite() && sample.vy.is_finite()) {
            return Err(KinematicsError::NonFinite { index });
        }
        if index > 0 && sample.t <= samples[index - 1].t {
            return Err(KinematicsError::NonIncreasingTime { index });
        }
    }
    Ok(())
}

fn min_max(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    values.fold(None, |acc, v| match acc {
        None => Some((v, v)),
        Some((min, max)) => Some((min.min(v), max.max(v))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(points: &[(f64, f64, f64)]) -> Vec<VelocitySample> {
        points.iter().map(|&(t, vx, vy)| VelocitySample::new(t, vx, vy)).collect()
    }

    #[test]
    fn single_sample_yields_speed_only() {
        let aggregates = extract(&history(&[(0.0, 30.0, 40.0)])).unwrap();

        assert_eq!(aggregates.speed_min, 50.0);
        assert_eq!(aggregates.speed_max, 50.0);
        assert_eq!(aggregates.speed_mean, 50.0);
        assert_eq!(aggregates.accel_x_min, None);
        assert_eq!(aggregates.accel_y_max, None);
        assert_eq!(aggregates.jerk_x_max, None);
        assert_eq!(aggregates.jerk_y_max, None);
    }

    #[test]
    fn two_samples_yield_acceleration_but_no_jerk() {
        let aggregates = extract(&history(&[(0.0, 10.0, 0.0), (0.5, 9.0, 0.5)])).unwrap();

        assert_eq!(aggregates.accel_x_min, Some(-2.0));
        assert_eq!(aggregates.accel_x_max, Some(-2.0));
        assert_eq!(aggregates.accel_y_max, Some(1.0));
        assert_eq!(aggregates.jerk_x_max, None);
    }

    #[test]
    fn constant_velocity_is_zero_not_absent() {
        let aggregates = extract(&history(&[(0.0, 5.0, 0.0), (1.0, 5.0, 0.0), (2.0, 5.0, 0.0)])).unwrap();

        assert_eq!(aggregates.accel_x_min, Some(0.0));
        assert_eq!(aggregates.jerk_x_max, Some(0.0));
    }

    #[test]
    fn jerk_is_difference_of_acceleration() {
        // ax: -1.0 then -3.0 over 1s spacing -> jerk_x magnitude 2.0
        let aggregates = extract(&history(&[(0.0, 10.0, 0.0), (1.0, 9.0, 0.0), (2.0, 6.0, 0.0)])).unwrap();

        assert_eq!(aggregates.accel_x_min, Some(-3.0));
        assert_eq!(aggregates.accel_x_max, Some(-1.0));
        assert_eq!(aggregates.jerk_x_max, Some(2.0));
        assert_eq!(aggregates.jerk_y_max, Some(0.0));
    }

    #[test]
    fn uneven_spacing_uses_interval_midpoints() {
        // ax = 1.0 on [0,1] (mid 0.5), ax = 2.0 on [1,1.5] (mid 1.25); jerk = 1.0 / 0.75
        let aggregates = extract(&history(&[(0.0, 0.0, 0.0), (1.0, 1.0, 0.0), (1.5, 2.0, 0.0)])).unwrap();
        let jerk = aggregates.jerk_x_max.unwrap();
        assert!((jerk - 1.0 / 0.75).abs() < 1e-12);
    }

    #[test]
    fn malformed_histories_are_rejected() {
        assert_eq!(extract(&[]), Err(KinematicsError::Empty));
        assert_eq!(
            extract(&history(&[(0.0, 1.0, 0.0), (0.0, 1.0, 0.0)])),
            Err(KinematicsError::NonIncreasingTime { index: 1 })
        );
        assert_eq!(
            extract(&history(&[(0.0, f64::NAN, 0.0)])),
            Err(KinematicsError::NonFinite { index: 0 })
        );
    }

    #[test]
    fn subnormal_spacing_is_degenerate() {
        // Strictly increasing and finite, but the differences overflow.
        let result = extract(&history(&[(0.0, 0.0, 0.0), (5e-324, 1.0, 0.0), (1e-323, 3.0, 0.0)]));
        assert!(matches!(result, Err(KinematicsError::Degenerate { quantity: "acceleration", .. })));
    }

    #[test]
    fn overflowing_speed_is_degenerate() {
        let result = extract(&history(&[(0.0, 1e200, 1e200)]));
        assert_eq!(result, Err(KinematicsError::Degenerate { quantity: "speed", index: 0 }));
    }

    #[test]
    fn speed_mean_across_history() {
        let aggregates = extract(&history(&[(0.0, 2.0, 0.0), (1.0, 4.0, 0.0), (2.0, 6.0, 0.0)])).unwrap();
        assert_eq!(aggregates.speed_min, 2.0);
        assert_eq!(aggregates.speed_max, 6.0);
        assert_eq!(aggregates.speed_mean, 4.0);
    }
}
